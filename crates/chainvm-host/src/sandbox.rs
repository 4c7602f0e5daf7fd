//! Sandbox host functions.
//!
//! Nested guest execution is not provided. Every entry is a stub returning
//! the documented failure code, so a runtime probing for the feature sees it
//! as unavailable rather than trapping (unless the stub policy says so).

use chainvm_core::{FunctionContext, HostFunction, Value, ValueType};

use crate::codec::{HostResult, return_encoded, return_u32};

const I32: ValueType = ValueType::I32;
const I64: ValueType = ValueType::I64;

/// Returned by `instantiate` when the module cannot be created.
pub const ERR_MODULE: u32 = u32::MAX;

/// Returned by `invoke` when execution fails.
pub const ERR_EXECUTION: u32 = u32::MAX;

/// Returned by the memory accessors for an invalid range or handle.
pub const ERR_OUT_OF_BOUNDS: u32 = 1;

fn instantiate(_ctx: &mut dyn FunctionContext, _args: &[Value]) -> HostResult {
    return_u32(ERR_MODULE)
}

fn invoke(_ctx: &mut dyn FunctionContext, _args: &[Value]) -> HostResult {
    return_u32(ERR_EXECUTION)
}

fn memory_new(_ctx: &mut dyn FunctionContext, _args: &[Value]) -> HostResult {
    return_u32(ERR_MODULE)
}

fn memory_access(_ctx: &mut dyn FunctionContext, _args: &[Value]) -> HostResult {
    return_u32(ERR_OUT_OF_BOUNDS)
}

fn teardown(_ctx: &mut dyn FunctionContext, _args: &[Value]) -> HostResult {
    Ok(None)
}

fn get_global_val(ctx: &mut dyn FunctionContext, _args: &[Value]) -> HostResult {
    return_encoded(ctx, &None::<()>)
}

/// Sandbox functions, all stubs.
pub const FUNCTIONS: &[HostFunction] = &[
    HostFunction::stub(
        "ext_sandbox_instantiate_version_1",
        &[I32, I64, I64, I32],
        Some(I32),
        instantiate,
    ),
    HostFunction::stub("ext_sandbox_instance_teardown_version_1", &[I32], None, teardown),
    HostFunction::stub(
        "ext_sandbox_invoke_version_1",
        &[I32, I64, I64, I32, I32, I32],
        Some(I32),
        invoke,
    ),
    HostFunction::stub("ext_sandbox_memory_new_version_1", &[I32, I32], Some(I32), memory_new),
    HostFunction::stub(
        "ext_sandbox_memory_get_version_1",
        &[I32, I32, I32, I32],
        Some(I32),
        memory_access,
    ),
    HostFunction::stub(
        "ext_sandbox_memory_set_version_1",
        &[I32, I32, I32, I32],
        Some(I32),
        memory_access,
    ),
    HostFunction::stub("ext_sandbox_memory_teardown_version_1", &[I32], None, teardown),
    HostFunction::stub(
        "ext_sandbox_get_global_val_version_1",
        &[I32, I64],
        Some(I64),
        get_global_val,
    ),
];

#[cfg(test)]
mod tests {
    use super::*;
    use chainvm_core::{Context, MemoryContext};

    use crate::testing::{self, output};

    #[test]
    fn test_sentinels() {
        let mut ctx = MemoryContext::new(1, 4096, Context::default());

        let result = testing::call(
            FUNCTIONS,
            &mut ctx,
            "ext_sandbox_instantiate_version_1",
            &[Value::I32(0), Value::I64(0), Value::I64(0), Value::I32(0)],
        );
        assert_eq!(result.unwrap(), Some(Value::I32(-1)));

        let result = testing::call(
            FUNCTIONS,
            &mut ctx,
            "ext_sandbox_memory_get_version_1",
            &[Value::I32(0); 4],
        );
        assert_eq!(result.unwrap(), Some(Value::I32(1)));

        let result = testing::call(
            FUNCTIONS,
            &mut ctx,
            "ext_sandbox_get_global_val_version_1",
            &[Value::I32(0), Value::I64(0)],
        );
        assert_eq!(output(&mut ctx, result), vec![0]);
    }

    #[test]
    fn test_every_entry_is_a_stub() {
        assert!(FUNCTIONS.iter().all(HostFunction::is_stub));
    }
}
