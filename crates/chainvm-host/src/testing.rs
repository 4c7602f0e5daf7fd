//! Helpers for handler unit tests.

use chainvm_common::Span;
use chainvm_core::{FunctionContext, HostFunction, MemoryContext, Value};

use crate::codec::HostResult;

/// Invoke `name` from `functions`.
pub(crate) fn call(
    functions: &[HostFunction],
    ctx: &mut MemoryContext,
    name: &str,
    args: &[Value],
) -> HostResult {
    functions
        .iter()
        .find(|f| f.name == name)
        .unwrap_or_else(|| panic!("{name} is not registered"))
        .invoke(ctx, args)
}

/// Place `bytes` at `ptr` and return them as a span argument.
pub(crate) fn arg(ctx: &mut MemoryContext, ptr: u32, bytes: &[u8]) -> Value {
    ctx.write(ptr, bytes).unwrap();
    Value::from_span(Span::new(ptr, bytes.len() as u32))
}

/// Bytes behind a returned span.
pub(crate) fn output(ctx: &mut MemoryContext, result: HostResult) -> Vec<u8> {
    let Some(Value::I64(packed)) = result.unwrap() else {
        panic!("expected a span");
    };
    ctx.read_span(Span::from_packed(packed)).unwrap()
}

/// Pointer returned as `i32`.
pub(crate) fn pointer(result: HostResult) -> u32 {
    let Some(Value::I32(ptr)) = result.unwrap() else {
        panic!("expected a pointer");
    };
    ptr as u32
}
