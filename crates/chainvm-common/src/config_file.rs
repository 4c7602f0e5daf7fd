//! Configuration file structures for chainvm.
//!
//! This module defines structures for TOML configuration files:
//! - [`ConfigFile`]: Top-level configuration file structure
//! - [`NodeSection`]: Which runtime to load and in what role

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::RuntimeConfig;

/// Top-level configuration file structure.
///
/// # Example
///
/// ```toml
/// [runtime.engine]
/// backend = "wasmi"
/// heap_pages = 1024
///
/// [runtime.host]
/// stub_policy = "trap"
/// max_log_level = 4
///
/// [node]
/// runtime_path = "./runtime.wasm"
/// validator = true
/// ```
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ConfigFile {
    /// Runtime configuration (engine + host settings).
    #[serde(default)]
    pub runtime: RuntimeConfig,

    /// Node settings.
    #[serde(default)]
    pub node: NodeSection,
}

impl ConfigFile {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigFileError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| ConfigFileError::Io {
            path: path.as_ref().display().to_string(),
            source: e,
        })?;

        debug!(path = %path.as_ref().display(), "Loaded config file");

        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigFileError::Parse`] if the string is not valid TOML
    /// for this schema, or [`ConfigFileError::Invalid`] if the runtime
    /// settings are inconsistent.
    pub fn from_toml(content: &str) -> Result<Self, ConfigFileError> {
        let config: Self = toml::from_str(content).map_err(|e| ConfigFileError::Parse {
            message: e.to_string(),
        })?;

        config
            .runtime
            .validate()
            .map_err(|e| ConfigFileError::Invalid {
                message: e.to_string(),
            })?;

        Ok(config)
    }
}

/// Node settings from the config file.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct NodeSection {
    /// Path to the runtime WebAssembly blob.
    #[serde(default)]
    pub runtime_path: Option<String>,

    /// Whether this node runs as a validator.
    ///
    /// Reported to the runtime by `ext_offchain_is_validator_version_1`.
    #[serde(default)]
    pub validator: bool,
}

/// Configuration file errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigFileError {
    /// Failed to read configuration file.
    #[error("Failed to read config file '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Failed to parse configuration file.
    #[error("Failed to parse config file: {message}")]
    Parse { message: String },

    /// The file parsed but its settings are rejected.
    #[error("Invalid config file: {message}")]
    Invalid { message: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Backend, StubPolicy};

    #[test]
    fn test_default_config_file() {
        let config = ConfigFile::default();

        assert_eq!(config.runtime.engine.backend, Backend::Wasmtime);
        assert!(config.node.runtime_path.is_none());
        assert!(!config.node.validator);
    }

    #[test]
    fn test_parse_minimal_config() {
        let toml = r#"
            [node]
            runtime_path = "./runtime.wasm"
        "#;

        let config = ConfigFile::from_toml(toml).unwrap();

        assert_eq!(config.node.runtime_path.as_deref(), Some("./runtime.wasm"));
        // Defaults applied
        assert_eq!(config.runtime.engine.heap_pages, 2048);
    }

    #[test]
    fn test_parse_full_config() {
        let toml = r#"
            [runtime.engine]
            backend = "wasmi"
            heap_pages = 1024
            max_memory_pages = 4096
            nan_canonicalization = false

            [runtime.host]
            stub_policy = "trap"
            max_log_level = 5
            capture_guest_logs = false

            [node]
            runtime_path = "/var/lib/chain/runtime.wasm"
            validator = true
        "#;

        let config = ConfigFile::from_toml(toml).unwrap();

        assert_eq!(config.runtime.engine.backend, Backend::Wasmi);
        assert_eq!(config.runtime.engine.heap_pages, 1024);
        assert_eq!(config.runtime.engine.max_memory_pages, 4096);
        assert!(!config.runtime.engine.nan_canonicalization);
        assert_eq!(config.runtime.host.stub_policy, StubPolicy::Trap);
        assert_eq!(config.runtime.host.max_log_level, 5);
        assert!(!config.runtime.host.capture_guest_logs);
        assert!(config.node.validator);
    }

    #[test]
    fn test_parse_invalid_toml() {
        let invalid = "this is not valid toml [";
        let result = ConfigFile::from_toml(invalid);
        assert!(result.is_err());
    }

    #[test]
    fn test_inconsistent_limits_rejected() {
        let toml = r#"
            [runtime.engine]
            heap_pages = 512
            max_memory_pages = 256
        "#;
        assert!(matches!(
            ConfigFile::from_toml(toml),
            Err(ConfigFileError::Invalid { .. })
        ));
    }

    #[test]
    fn test_unknown_backend_rejected() {
        let toml = r#"
            [runtime.engine]
            backend = "v8"
        "#;
        assert!(matches!(
            ConfigFile::from_toml(toml),
            Err(ConfigFileError::Parse { .. })
        ));
    }
}
