//! Configuration structures for chainvm.
//!
//! This module defines configuration options for various components:
//! - [`RuntimeConfig`]: Top-level configuration containing all settings
//! - [`EngineConfig`]: Engine backend selection and guest memory limits
//! - [`HostConfig`]: Host function behaviour (stubs, guest logging)

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::RuntimeError;

/// Size of one WebAssembly page in bytes.
pub const WASM_PAGE_SIZE: u32 = 65_536;

/// Pages addressable by a 32-bit linear memory.
pub const MAX_WASM_PAGES: u32 = 65_536;

/// Most verbose guest log level (trace).
pub const MAX_LOG_LEVEL: u32 = 5;

/// Top-level runtime configuration.
///
/// This structure contains all configuration options for a runtime instance.
/// It can be loaded from files (TOML, JSON).
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RuntimeConfig {
    /// Engine configuration.
    #[serde(default)]
    pub engine: EngineConfig,

    /// Host function configuration.
    #[serde(default)]
    pub host: HostConfig,
}

/// The virtual machine used to execute the runtime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// Cranelift-compiled execution through Wasmtime.
    #[default]
    Wasmtime,
    /// Interpreted execution through wasmi.
    Wasmi,
}

impl Backend {
    /// All available backends.
    pub const ALL: [Backend; 2] = [Backend::Wasmtime, Backend::Wasmi];
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Backend::Wasmtime => write!(f, "wasmtime"),
            Backend::Wasmi => write!(f, "wasmi"),
        }
    }
}

impl FromStr for Backend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "wasmtime" => Ok(Backend::Wasmtime),
            "wasmi" => Ok(Backend::Wasmi),
            other => Err(format!("unknown backend '{other}'")),
        }
    }
}

/// Engine configuration.
///
/// These settings select the virtual machine and bound the guest's
/// linear memory.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EngineConfig {
    /// Which engine executes the runtime.
    #[serde(default)]
    pub backend: Backend,

    /// Extra pages reserved for the host-managed heap.
    ///
    /// When the runtime imports its memory, it is created with
    /// `initial + heap_pages` pages.
    #[serde(default = "defaults::heap_pages")]
    pub heap_pages: u32,

    /// Upper bound on the guest's linear memory in pages.
    ///
    /// The allocator refuses to grow the heap beyond this size.
    #[serde(default = "defaults::max_memory_pages")]
    pub max_memory_pages: u32,

    /// Canonicalize NaN results for deterministic floating point.
    ///
    /// Only effective on the Wasmtime backend.
    #[serde(default = "defaults::nan_canonicalization")]
    pub nan_canonicalization: bool,

    /// Compile with Cranelift's speed optimizations.
    #[serde(default = "defaults::optimize")]
    pub optimize: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            backend: Backend::default(),
            heap_pages: defaults::heap_pages(),
            max_memory_pages: defaults::max_memory_pages(),
            nan_canonicalization: defaults::nan_canonicalization(),
            optimize: defaults::optimize(),
        }
    }
}

impl EngineConfig {
    /// Engine configuration for the given backend with default limits.
    pub fn with_backend(backend: Backend) -> Self {
        Self {
            backend,
            ..Default::default()
        }
    }

    /// Highest address the guest heap may reach, in bytes.
    pub fn heap_limit(&self) -> u32 {
        let bytes = u64::from(self.max_memory_pages) * u64::from(WASM_PAGE_SIZE);
        u32::try_from(bytes).unwrap_or(u32::MAX)
    }

    /// Check the memory limits.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::InvalidConfig`] if `max_memory_pages` is zero
    /// or beyond 32-bit addressing, or smaller than `heap_pages`.
    pub fn validate(&self) -> Result<(), RuntimeError> {
        if self.max_memory_pages == 0 || self.max_memory_pages > MAX_WASM_PAGES {
            return Err(RuntimeError::invalid_config(format!(
                "max_memory_pages must be between 1 and {MAX_WASM_PAGES}, got {}",
                self.max_memory_pages
            )));
        }
        if self.heap_pages > self.max_memory_pages {
            return Err(RuntimeError::invalid_config(format!(
                "heap_pages ({}) exceeds max_memory_pages ({})",
                self.heap_pages, self.max_memory_pages
            )));
        }
        Ok(())
    }
}

/// What a stubbed host function does when the guest calls it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StubPolicy {
    /// Return the documented fixed sentinel value.
    #[default]
    Sentinel,
    /// Trap the guest with an "unsupported" error.
    Trap,
}

/// Host function configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HostConfig {
    /// Behaviour of host functions that are not implemented.
    #[serde(default)]
    pub stub_policy: StubPolicy,

    /// Maximum guest log level reported to the runtime.
    ///
    /// 0 means off, 1 error, 2 warn, 3 info, 4 debug, 5 trace.
    #[serde(default = "defaults::max_log_level")]
    pub max_log_level: u32,

    /// Keep guest log lines in the execution context.
    #[serde(default = "defaults::capture_guest_logs")]
    pub capture_guest_logs: bool,

    /// Most log lines kept in the execution context.
    ///
    /// Once full, the oldest line is dropped for each new one.
    #[serde(default = "defaults::max_captured_logs")]
    pub max_captured_logs: usize,
}

impl HostConfig {
    /// Check the log settings.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::InvalidConfig`] if `max_log_level` is above
    /// trace.
    pub fn validate(&self) -> Result<(), RuntimeError> {
        if self.max_log_level > MAX_LOG_LEVEL {
            return Err(RuntimeError::invalid_config(format!(
                "max_log_level must be at most {MAX_LOG_LEVEL}, got {}",
                self.max_log_level
            )));
        }
        Ok(())
    }
}

impl RuntimeConfig {
    /// Check engine and host settings.
    pub fn validate(&self) -> Result<(), RuntimeError> {
        self.engine.validate()?;
        self.host.validate()
    }
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            stub_policy: StubPolicy::default(),
            max_log_level: defaults::max_log_level(),
            capture_guest_logs: defaults::capture_guest_logs(),
            max_captured_logs: defaults::max_captured_logs(),
        }
    }
}

/// Default value functions for serde.
mod defaults {
    pub const fn heap_pages() -> u32 {
        2048
    }

    pub const fn max_memory_pages() -> u32 {
        // 4 GiB minus one page keeps every address representable in a u32.
        65_535
    }

    pub const fn nan_canonicalization() -> bool {
        true
    }

    pub const fn optimize() -> bool {
        true
    }

    pub const fn max_log_level() -> u32 {
        3
    }

    pub const fn capture_guest_logs() -> bool {
        true
    }

    pub const fn max_captured_logs() -> usize {
        1024
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = RuntimeConfig::default();

        assert_eq!(config.engine.backend, Backend::Wasmtime);
        assert_eq!(config.engine.heap_pages, 2048);
        assert_eq!(config.engine.max_memory_pages, 65_535);
        assert!(config.engine.nan_canonicalization);
        assert!(config.engine.optimize);

        assert_eq!(config.host.stub_policy, StubPolicy::Sentinel);
        assert_eq!(config.host.max_log_level, 3);
        assert!(config.host.capture_guest_logs);
        assert_eq!(config.host.max_captured_logs, 1024);
    }

    #[test]
    fn test_config_serialization() {
        let config = RuntimeConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let deserialized: RuntimeConfig = serde_json::from_str(&json).unwrap();

        assert_eq!(config.engine.heap_pages, deserialized.engine.heap_pages);
        assert_eq!(config.host.stub_policy, deserialized.host.stub_policy);
    }

    #[test]
    fn test_partial_deserialization() {
        let json = r#"{"engine": {"backend": "wasmi", "heap_pages": 64}}"#;
        let config: RuntimeConfig = serde_json::from_str(json).unwrap();

        assert_eq!(config.engine.backend, Backend::Wasmi);
        assert_eq!(config.engine.heap_pages, 64);
        // Default values for unspecified fields
        assert_eq!(config.engine.max_memory_pages, 65_535);
        assert_eq!(config.host.max_log_level, 3);
    }

    #[test]
    fn test_heap_limit() {
        let config = EngineConfig {
            max_memory_pages: 16,
            ..Default::default()
        };
        assert_eq!(config.heap_limit(), 16 * WASM_PAGE_SIZE);

        let config = EngineConfig {
            max_memory_pages: 65_536,
            ..Default::default()
        };
        assert_eq!(config.heap_limit(), u32::MAX);
    }

    #[test]
    fn test_validate() {
        assert!(RuntimeConfig::default().validate().is_ok());

        let config = EngineConfig {
            max_memory_pages: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(RuntimeError::InvalidConfig { .. })));

        let config = EngineConfig {
            heap_pages: 64,
            max_memory_pages: 32,
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("heap_pages"), "{err}");

        let host = HostConfig {
            max_log_level: 6,
            ..Default::default()
        };
        assert!(host.validate().is_err());
    }

    #[test]
    fn test_backend_parse_and_display() {
        assert_eq!("wasmtime".parse::<Backend>(), Ok(Backend::Wasmtime));
        assert_eq!("WASMI".parse::<Backend>(), Ok(Backend::Wasmi));
        assert!("v8".parse::<Backend>().is_err());
        assert_eq!(Backend::Wasmi.to_string(), "wasmi");
    }
}
