//! Engine backends.
//!
//! Each backend turns a [`CompiledModule`] into a running [`Vm`]:
//! - Registers every [`HostFunction`](crate::HostFunction) with its linker
//! - Creates `env.memory` when the runtime imports its memory
//! - Places the allocator at `__heap_base`
//!
//! Everything above the [`Vm`] trait (argument passing, result decoding, the
//! allocator reset) is shared and lives in [`Instance`](crate::Instance).

mod wasmi_vm;
mod wasmtime_vm;

use chainvm_common::{EngineConfig, HostError, RuntimeError, Span, WASM_PAGE_SIZE};

use crate::context::Context;
use crate::engine::{EngineKind, WasmEngine};
use crate::function::{FunctionContext, HostFunction, HostFunctions, Value};
use crate::module::{CompiledModule, ModuleKind};

/// Name of the linear memory export or import.
pub(crate) const MEMORY_NAME: &str = "memory";

/// Global marking the end of the guest's static data.
pub(crate) const HEAP_BASE_NAME: &str = "__heap_base";

/// A running guest.
pub(crate) trait Vm: FunctionContext + Send {
    /// Call the export `name` with signature `(i32, i32) -> i64`.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::MissingExport`] if there is no such export and
    /// [`RuntimeError::GuestTrap`] if the guest traps.
    fn call_export(&mut self, name: &str, args: Span) -> Result<i64, RuntimeError>;
}

/// Instantiate `module` with the engine that compiled it.
///
/// # Errors
///
/// Returns [`RuntimeError::Instantiation`] if linking or the start function
/// fails, or if the engine and module come from different backends.
pub(crate) fn instantiate(
    engine: &WasmEngine,
    module: &CompiledModule,
    functions: &HostFunctions,
    context: Context,
) -> Result<Box<dyn Vm>, RuntimeError> {
    match (engine.kind(), module.kind()) {
        (EngineKind::Wasmtime(engine_inner), ModuleKind::Wasmtime(module_inner)) => {
            let vm = wasmtime_vm::WasmtimeVm::instantiate(
                engine_inner,
                module_inner,
                engine.config(),
                functions,
                context,
            )?;
            Ok(Box::new(vm))
        }
        (EngineKind::Wasmi(engine_inner), ModuleKind::Wasmi(module_inner)) => {
            let vm = wasmi_vm::WasmiVm::instantiate(
                engine_inner,
                module_inner,
                engine.config(),
                functions,
                context,
            )?;
            Ok(Box::new(vm))
        }
        _ => Err(RuntimeError::instantiation(
            "module was compiled by a different backend",
        )),
    }
}

/// Pages to add to an imported memory of `current_pages` pages.
pub(crate) fn extra_heap_pages(config: &EngineConfig, current_pages: u64) -> u64 {
    let room = u64::from(config.max_memory_pages).saturating_sub(current_pages);
    u64::from(config.heap_pages).min(room)
}

/// Start of the heap: `__heap_base` if exported, otherwise the end of memory.
#[allow(clippy::cast_sign_loss)]
pub(crate) fn heap_base(global: Option<i32>, memory_size: u64) -> u32 {
    match global {
        Some(base) => base as u32,
        None => u32::try_from(memory_size).unwrap_or(u32::MAX),
    }
}

/// Turn a failed grow into the error host functions report.
pub(crate) fn grow_failed(pages: u32, heap_limit: u32) -> HostError {
    HostError::Allocation(chainvm_common::AllocationError::OutOfMemory {
        requested: pages.saturating_mul(WASM_PAGE_SIZE),
        heap_limit,
    })
}

/// Error for a guest without linear memory.
pub(crate) fn no_memory() -> HostError {
    HostError::MissingCapability {
        capability: MEMORY_NAME,
    }
}

/// Run `function` and keep its error for the trap report.
///
/// Returns the message the backend should trap with on failure.
pub(crate) fn dispatch(
    function: &HostFunction,
    ctx: &mut dyn FunctionContext,
    args: &[Value],
) -> Result<Option<Value>, String> {
    function
        .invoke(ctx, args)
        .map_err(|error| record_failure(ctx.context(), function.name, error))
}

/// Keep `error` as the cause of the coming trap and return the trap message.
pub(crate) fn record_failure(context: &mut Context, function: &str, error: HostError) -> String {
    tracing::debug!(function, error = %error, "Host function failed");
    let message = format!("{function}: {error}");
    context.pending_error = Some(error);
    message
}

/// Build the trap error for a failed export call.
pub(crate) fn trap_error(context: &mut Context, message: String) -> RuntimeError {
    RuntimeError::GuestTrap {
        message,
        cause: context.take_pending_error(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_heap_base() {
        assert_eq!(heap_base(Some(1024), 65_536), 1024);
        assert_eq!(heap_base(None, 131_072), 131_072);
    }

    #[test]
    fn test_extra_heap_pages() {
        let config = EngineConfig {
            heap_pages: 16,
            max_memory_pages: 20,
            ..Default::default()
        };
        assert_eq!(extra_heap_pages(&config, 2), 16);
        assert_eq!(extra_heap_pages(&config, 10), 10);
        assert_eq!(extra_heap_pages(&config, 30), 0);
    }

    #[test]
    fn test_trap_error_takes_cause() {
        let mut context = Context::default();
        context.pending_error = Some(HostError::NoActiveTransaction);

        let err = trap_error(&mut context, "boom".into());
        assert!(matches!(
            err,
            RuntimeError::GuestTrap {
                cause: Some(HostError::NoActiveTransaction),
                ..
            }
        ));
        assert!(context.pending_error.is_none());
    }
}
