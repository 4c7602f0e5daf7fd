//! Runtime instance lifecycle management.
//!
//! This module provides [`Instance`], which owns one running guest and
//! serializes calls into it:
//!
//! 1. Copy the argument bytes into a fresh heap allocation
//! 2. Call the export with the argument span
//! 3. Copy the bytes of the returned span out of guest memory
//! 4. Reset the guest heap and other per-call host state
//!
//! A trap poisons the instance. Its memory may be half-written, so every
//! later call fails with [`RuntimeError::InstancePoisoned`].

use std::path::Path;
use std::time::Instant;

use parking_lot::Mutex;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use chainvm_common::{Backend, HostError, RuntimeConfig, RuntimeError, Span};

use crate::backend::{self, Vm};
use crate::context::{Context, LogEntry, Storage};
use crate::engine::WasmEngine;
use crate::function::{FunctionContext, HostFunctions};
use crate::module::{CompiledModule, RuntimeCode};

enum InstanceState {
    Running(Box<dyn Vm>),
    Poisoned,
    Stopped,
}

/// A runtime loaded into a virtual machine.
///
/// # Thread Safety
///
/// `Instance` is `Send + Sync`. Calls from several threads are serialized by
/// an internal lock; at most one [`exec`](Self::exec) runs at a time.
///
/// # Example
///
/// ```ignore
/// let instance = Instance::new(&wasm, &RuntimeConfig::default(), &host_functions())?;
/// instance.set_context(InMemoryStorage::new())?;
/// let version = instance.exec("Core_version", &[])?;
/// ```
pub struct Instance {
    id: Uuid,
    backend: Backend,
    code: RuntimeCode,
    state: Mutex<InstanceState>,
}

impl Instance {
    /// Compile `code` and instantiate it with an empty context.
    ///
    /// # Arguments
    ///
    /// * `code` - Wasm bytes of the runtime
    /// * `config` - Engine and host settings
    /// * `functions` - Host functions offered to the guest
    ///
    /// # Errors
    ///
    /// Returns an error if the code does not compile or cannot be linked.
    pub fn new(
        code: &[u8],
        config: &RuntimeConfig,
        functions: &HostFunctions,
    ) -> Result<Self, RuntimeError> {
        let code = RuntimeCode::from_bytes(code)?;
        Self::from_code(&code, config, functions, Context::new(config.host.clone()))
    }

    /// Load the runtime from a file and instantiate it.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::Io`] if the file cannot be read, or any error
    /// of [`new`](Self::new).
    pub fn from_file(
        path: impl AsRef<Path>,
        config: &RuntimeConfig,
        functions: &HostFunctions,
    ) -> Result<Self, RuntimeError> {
        let code = RuntimeCode::from_file(path)?;
        Self::from_code(&code, config, functions, Context::new(config.host.clone()))
    }

    /// Instantiate `code` with a prepared context.
    ///
    /// # Errors
    ///
    /// Returns an error if the code does not compile or cannot be linked.
    pub fn from_code(
        code: &RuntimeCode,
        config: &RuntimeConfig,
        functions: &HostFunctions,
        context: Context,
    ) -> Result<Self, RuntimeError> {
        let engine = WasmEngine::new(&config.engine)?;
        let module = CompiledModule::compile(&engine, code)?;
        Self::from_module(&engine, &module, functions, context)
    }

    /// Instantiate an already compiled module.
    ///
    /// Several instances can share one engine and module.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::Instantiation`] if linking fails.
    #[instrument(skip_all, fields(backend = %engine.backend()))]
    pub fn from_module(
        engine: &WasmEngine,
        module: &CompiledModule,
        functions: &HostFunctions,
        context: Context,
    ) -> Result<Self, RuntimeError> {
        let vm = backend::instantiate(engine, module, functions, context)?;
        let id = Uuid::new_v4();

        info!(
            instance_id = %id,
            content_hash = module.code().content_hash(),
            host_functions = functions.len(),
            module_age_ms = module.compiled_at().elapsed().as_millis(),
            "Instance created"
        );

        Ok(Self {
            id,
            backend: engine.backend(),
            code: module.code().clone(),
            state: Mutex::new(InstanceState::Running(vm)),
        })
    }

    /// Unique identifier of this instance, used in logs.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Backend running this instance.
    pub fn backend(&self) -> Backend {
        self.backend
    }

    /// The runtime code.
    pub fn code(&self) -> &RuntimeCode {
        &self.code
    }

    /// Replace the storage backend.
    ///
    /// Must be called before the first [`exec`](Self::exec).
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::InstanceStopped`] or
    /// [`RuntimeError::InstancePoisoned`] if the instance cannot run anymore.
    pub fn set_context(&self, storage: impl Storage + 'static) -> Result<(), RuntimeError> {
        self.with_context_mut(|context| context.storage = Some(Box::new(storage)))
    }

    /// Run `f` on the execution context between calls.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::InstanceStopped`] or
    /// [`RuntimeError::InstancePoisoned`] if the instance cannot run anymore.
    pub fn with_context_mut<R>(&self, f: impl FnOnce(&mut Context) -> R) -> Result<R, RuntimeError> {
        let mut state = self.state.lock();
        match &mut *state {
            InstanceState::Running(vm) => Ok(f(vm.context())),
            InstanceState::Poisoned => Err(RuntimeError::InstancePoisoned),
            InstanceState::Stopped => Err(RuntimeError::InstanceStopped),
        }
    }

    /// Call the export `function` with `args` and return the bytes it produced.
    ///
    /// # Arguments
    ///
    /// * `function` - Export name, e.g. `Core_version`
    /// * `args` - Encoded arguments, passed to the guest as one span
    ///
    /// # Errors
    ///
    /// - [`RuntimeError::NilStorage`] if no storage backend was set
    /// - [`RuntimeError::MissingExport`] if the export does not exist
    /// - [`RuntimeError::GuestTrap`] if the guest traps (the instance is then poisoned)
    /// - [`RuntimeError::Decode`] if the returned span lies outside memory
    /// - [`RuntimeError::Allocation`] if the arguments do not fit on the heap
    #[instrument(skip_all, fields(instance_id = %self.id, function = %function, args_len = args.len()))]
    pub fn exec(&self, function: &str, args: &[u8]) -> Result<Vec<u8>, RuntimeError> {
        let start = Instant::now();
        let mut state = self.state.lock();

        let vm = match &mut *state {
            InstanceState::Running(vm) => vm,
            InstanceState::Poisoned => return Err(RuntimeError::InstancePoisoned),
            InstanceState::Stopped => return Err(RuntimeError::InstanceStopped),
        };

        if vm.context().storage.is_none() {
            return Err(RuntimeError::NilStorage);
        }

        let result = call(vm.as_mut(), function, args);
        vm.context().end_call();

        match result {
            Ok(output) => {
                debug!(
                    duration_us = start.elapsed().as_micros(),
                    result_len = output.len(),
                    "Call completed"
                );
                Ok(output)
            }
            Err(error) => {
                if error.is_trap() {
                    warn!(
                        duration_us = start.elapsed().as_micros(),
                        error = %error,
                        "Guest trapped; instance poisoned"
                    );
                    *state = InstanceState::Poisoned;
                } else {
                    debug!(error = %error, "Call failed");
                }
                Err(error)
            }
        }
    }

    /// Remove and return the guest logs captured so far.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::InstanceStopped`] or
    /// [`RuntimeError::InstancePoisoned`] if the instance cannot run anymore.
    pub fn take_logs(&self) -> Result<Vec<LogEntry>, RuntimeError> {
        self.with_context_mut(Context::take_logs)
    }

        /// Whether a previous call trapped.
    pub fn is_poisoned(&self) -> bool {
        matches!(*self.state.lock(), InstanceState::Poisoned)
    }

    /// Tear down the virtual machine.
    ///
    /// Later calls fail with [`RuntimeError::InstanceStopped`].
    pub fn stop(&self) {
        let mut state = self.state.lock();
        if !matches!(*state, InstanceState::Stopped) {
            info!(instance_id = %self.id, "Instance stopped");
        }
        *state = InstanceState::Stopped;
    }
}

fn call(vm: &mut dyn Vm, function: &str, args: &[u8]) -> Result<Vec<u8>, RuntimeError> {
    let input = vm.write_span(args).map_err(argument_error)?;
    let packed = vm.call_export(function, input)?;

    let output = Span::from_packed(packed);
    vm.read_span(output)
        .map_err(|e| RuntimeError::decode(format!("result of {function}: {e}")))
}

fn argument_error(error: HostError) -> RuntimeError {
    match error {
        HostError::Allocation(e) => RuntimeError::Allocation(e),
        other => RuntimeError::GuestTrap {
            message: other.to_string(),
            cause: Some(other),
        },
    }
}

impl std::fmt::Debug for Instance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = match *self.state.lock() {
            InstanceState::Running(_) => "running",
            InstanceState::Poisoned => "poisoned",
            InstanceState::Stopped => "stopped",
        };
        f.debug_struct("Instance")
            .field("id", &self.id)
            .field("backend", &self.backend)
            .field("state", &state)
            .finish_non_exhaustive()
    }
}
