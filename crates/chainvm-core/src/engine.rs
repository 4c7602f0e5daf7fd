//! Engine configuration and creation.
//!
//! The [`WasmEngine`] is the foundation of the runtime. It is:
//! - Thread-safe and shared across instances
//! - Backed by either Wasmtime (Cranelift JIT) or wasmi (interpreter)
//! - Configured for deterministic execution

use tracing::info;

use chainvm_common::{Backend, EngineConfig, RuntimeError};

/// Thread-safe WebAssembly engine wrapper.
///
/// Both engine types are cheap to clone handles to shared state, so a single
/// `WasmEngine` can compile modules for any number of instances.
///
/// # Configuration
///
/// On Wasmtime the engine is configured with:
/// - **NaN canonicalization**: identical float results on every host
/// - **No threads, SIMD or multi-memory**: features a runtime may not rely on
/// - **Cranelift speed optimizations** when `optimize` is set
///
/// # Example
///
/// ```ignore
/// use chainvm_common::EngineConfig;
/// use chainvm_core::WasmEngine;
///
/// let engine = WasmEngine::new(&EngineConfig::default())?;
/// ```
#[derive(Clone)]
pub struct WasmEngine {
    kind: EngineKind,
    config: EngineConfig,
}

#[derive(Clone)]
pub(crate) enum EngineKind {
    Wasmtime(wasmtime::Engine),
    Wasmi(wasmi::Engine),
}

impl WasmEngine {
    /// Create a new engine with the given configuration.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::InvalidConfig`] if the memory limits are
    /// inconsistent or the Wasmtime configuration is rejected.
    pub fn new(config: &EngineConfig) -> Result<Self, RuntimeError> {
        config.validate()?;

        let kind = match config.backend {
            Backend::Wasmtime => EngineKind::Wasmtime(Self::create_wasmtime(config)?),
            Backend::Wasmi => EngineKind::Wasmi(wasmi::Engine::default()),
        };

        info!(
            backend = %config.backend,
            heap_pages = config.heap_pages,
            max_memory_pages = config.max_memory_pages,
            "Engine initialized"
        );

        Ok(Self {
            kind,
            config: config.clone(),
        })
    }

    fn create_wasmtime(config: &EngineConfig) -> Result<wasmtime::Engine, RuntimeError> {
        let mut wasmtime_config = wasmtime::Config::new();

        wasmtime_config.wasm_threads(false);
        wasmtime_config.wasm_simd(false);
        wasmtime_config.wasm_relaxed_simd(false);
        wasmtime_config.wasm_multi_memory(false);
        wasmtime_config.cranelift_nan_canonicalization(config.nan_canonicalization);

        if config.optimize {
            wasmtime_config.cranelift_opt_level(wasmtime::OptLevel::Speed);
        } else {
            wasmtime_config.cranelift_opt_level(wasmtime::OptLevel::None);
        }

        wasmtime::Engine::new(&wasmtime_config).map_err(|e| {
            RuntimeError::invalid_config(format!("Failed to create Wasmtime engine: {e}"))
        })
    }

    pub(crate) fn kind(&self) -> &EngineKind {
        &self.kind
    }

    /// Which backend this engine runs.
    pub fn backend(&self) -> Backend {
        self.config.backend
    }

    /// Get the engine configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }
}

impl std::fmt::Debug for WasmEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WasmEngine")
            .field("backend", &self.config.backend)
            .field("heap_pages", &self.config.heap_pages)
            .field("max_memory_pages", &self.config.max_memory_pages)
            .finish_non_exhaustive()
    }
}
