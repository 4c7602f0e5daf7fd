//! Miscellaneous host functions: debug printing and the runtime version
//! self-query.

use chainvm_core::{FunctionContext, HostFunction, Value, ValueType, args, custom_section};

use crate::codec::{HostResult, read_arg, read_str, return_encoded};
use crate::logging::LoggingHost;

const I64: ValueType = ValueType::I64;

/// Custom section holding the SCALE-encoded runtime version.
pub const RUNTIME_VERSION_SECTION: &str = "runtime_version";

fn print_num(ctx: &mut dyn FunctionContext, args: &[Value]) -> HostResult {
    let value = args::i64(args, 0)?;
    LoggingHost::print(ctx.context(), &value.to_string());
    Ok(None)
}

fn print_utf8(ctx: &mut dyn FunctionContext, args: &[Value]) -> HostResult {
    let message = read_str(ctx, args, 0, "ext_misc_print_utf8_version_1")?;
    LoggingHost::print(ctx.context(), &message);
    Ok(None)
}

fn print_hex(ctx: &mut dyn FunctionContext, args: &[Value]) -> HostResult {
    let data = read_arg(ctx, args, 0)?;
    LoggingHost::print(ctx.context(), &hex::encode(data));
    Ok(None)
}

/// Read the version embedded in another runtime blob.
///
/// The answer is `None` when the blob carries no version section.
fn runtime_version(ctx: &mut dyn FunctionContext, args: &[Value]) -> HostResult {
    let wasm = read_arg(ctx, args, 0)?;
    let version = custom_section(&wasm, RUNTIME_VERSION_SECTION).map(<[u8]>::to_vec);
    return_encoded(ctx, &version)
}

/// Miscellaneous functions.
pub const FUNCTIONS: &[HostFunction] = &[
    HostFunction::new("ext_misc_print_num_version_1", &[I64], None, print_num),
    HostFunction::new("ext_misc_print_utf8_version_1", &[I64], None, print_utf8),
    HostFunction::new("ext_misc_print_hex_version_1", &[I64], None, print_hex),
    HostFunction::new("ext_misc_runtime_version_version_1", &[I64], Some(I64), runtime_version),
];

#[cfg(test)]
mod tests {
    use super::*;
    use chainvm_core::{Context, MemoryContext};

    use crate::codec::decode_all;
    use crate::testing::{self, arg, output};

    fn call(ctx: &mut MemoryContext, name: &str, args: &[Value]) -> HostResult {
        testing::call(FUNCTIONS, ctx, name, args)
    }

    #[test]
    fn test_prints_are_captured() {
        let mut ctx = MemoryContext::new(1, 4096, Context::default());
        let text = arg(&mut ctx, 0, "héllo".as_bytes());
        let data = arg(&mut ctx, 32, &[0xde, 0xad]);

        call(&mut ctx, "ext_misc_print_num_version_1", &[Value::I64(-42)]).unwrap();
        call(&mut ctx, "ext_misc_print_utf8_version_1", &[text]).unwrap();
        call(&mut ctx, "ext_misc_print_hex_version_1", &[data]).unwrap();

        let messages: Vec<_> = ctx.context.logs.iter().map(|l| l.message.as_str()).collect();
        assert_eq!(messages, ["-42", "héllo", "dead"]);
    }

    #[test]
    fn test_runtime_version_reads_custom_section() {
        let wasm = wat::parse_str(r#"(module (@custom "runtime_version" "\01\02\03"))"#).unwrap();
        let mut ctx = MemoryContext::new(2, 8192, Context::default());
        let blob = arg(&mut ctx, 0, &wasm);

        let result = call(&mut ctx, "ext_misc_runtime_version_version_1", &[blob]);
        let bytes = output(&mut ctx, result);
        assert_eq!(decode_all::<Option<Vec<u8>>>(&bytes, "test").unwrap(), Some(vec![1, 2, 3]));
    }

    #[test]
    fn test_runtime_version_without_section() {
        let wasm = wat::parse_str("(module)").unwrap();
        let mut ctx = MemoryContext::new(1, 4096, Context::default());
        let blob = arg(&mut ctx, 0, &wasm);

        let result = call(&mut ctx, "ext_misc_runtime_version_version_1", &[blob]);
        assert_eq!(output(&mut ctx, result), vec![0]);
    }
}
