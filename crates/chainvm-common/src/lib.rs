//! Common types, errors, and utilities for chainvm.
//!
//! This crate provides shared functionality used across the chainvm workspace:
//! - Error types using `thiserror` for type-safe error handling
//! - Configuration structures for the engine and host functions
//! - The span codec used for every buffer crossing the host/guest boundary

pub mod config;
pub mod config_file;
pub mod error;
pub mod span;

pub use config::{
    Backend, EngineConfig, HostConfig, MAX_LOG_LEVEL, MAX_WASM_PAGES, RuntimeConfig, StubPolicy,
    WASM_PAGE_SIZE,
};
pub use config_file::{ConfigFile, ConfigFileError, NodeSection};
pub use error::{AllocationError, HostError, RuntimeError};
pub use span::Span;
