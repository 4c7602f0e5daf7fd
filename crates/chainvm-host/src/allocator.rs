//! Allocator host functions.
//!
//! The guest's `malloc`/`free` are served by the host-managed heap, the same
//! one used for result buffers, so both sides share one free-list.

use chainvm_core::{FunctionContext, HostFunction, Value, ValueType, args};

use crate::codec::{HostResult, return_u32};

const I32: ValueType = ValueType::I32;

fn malloc(ctx: &mut dyn FunctionContext, args: &[Value]) -> HostResult {
    let size = args::u32(args, 0)?;
    let ptr = ctx.allocate(size)?;
    return_u32(ptr)
}

fn free(ctx: &mut dyn FunctionContext, args: &[Value]) -> HostResult {
    let ptr = args::u32(args, 0)?;
    ctx.deallocate(ptr)?;
    Ok(None)
}

/// Allocator functions.
pub const FUNCTIONS: &[HostFunction] = &[
    HostFunction::new("ext_allocator_malloc_version_1", &[I32], Some(I32), malloc),
    HostFunction::new("ext_allocator_free_version_1", &[I32], None, free),
];

#[cfg(test)]
mod tests {
    use super::*;
    use chainvm_common::{AllocationError, HostError};
    use chainvm_core::{Context, MemoryContext};

    use crate::testing::{self, pointer};

    fn call(ctx: &mut MemoryContext, name: &str, args: &[Value]) -> HostResult {
        testing::call(FUNCTIONS, ctx, name, args)
    }

    #[test]
    fn test_malloc_then_free_reuses_block() {
        let mut ctx = MemoryContext::new(1, 1024, Context::default());

        let ptr = pointer(call(&mut ctx, "ext_allocator_malloc_version_1", &[Value::I32(100)]));
        assert!(ptr >= 1024);

        call(&mut ctx, "ext_allocator_free_version_1", &[Value::from_u32(ptr)]).unwrap();
        let again = pointer(call(&mut ctx, "ext_allocator_malloc_version_1", &[Value::I32(100)]));
        assert_eq!(again, ptr);
    }

    #[test]
    fn test_invalid_free() {
        let mut ctx = MemoryContext::new(1, 1024, Context::default());

        let err = call(&mut ctx, "ext_allocator_free_version_1", &[Value::I32(12)]).unwrap_err();
        assert!(matches!(
            err,
            HostError::Allocation(AllocationError::InvalidFree { .. })
        ));
    }
}
