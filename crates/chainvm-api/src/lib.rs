//! Runtime API for chainvm.
//!
//! This crate wraps an [`Instance`](chainvm_core::Instance) with typed calls
//! for the entry points used to build, import and validate blocks:
//! - [`RuntimeApi`]: One method per runtime export
//! - [`types`]: Headers, blocks, digests and decoded results
//! - [`version`]: Decoding of the `Core_version` layout
//!
//! # Example
//!
//! ```ignore
//! use chainvm_api::RuntimeApi;
//! use chainvm_core::Instance;
//! use chainvm_host::{InMemoryStorage, host_functions};
//!
//! let instance = Instance::from_file("runtime.wasm", &config, &host_functions())?;
//! instance.set_context(InMemoryStorage::new())?;
//!
//! let api = RuntimeApi::new(instance);
//! println!("{}", api.version()?.spec_name);
//! ```

pub mod runtime_api;
pub mod types;
pub mod version;

pub use runtime_api::{RuntimeApi, TransactionValidity, decode_validity, exports};
pub use types::{
    ApiVersion, Authority, BabeConfiguration, Block, Digest, DigestItem, Header,
    TransactionValidityError, Validity, VersionApi,
};
pub use version::decode_version;
