//! Host functions for chainvm.
//!
//! This crate provides the host side of the runtime interface: every
//! function a runtime imports from `env`, grouped by category, plus
//! in-memory implementations of the collaborators those functions reach
//! through the execution context.
//!
//! # Categories
//!
//! - [`allocator`]: `malloc`/`free` on the host-managed heap
//! - [`storage`] and [`child_storage`]: State access and nested transactions
//! - [`hashing`], [`crypto`], [`trie`]: Digests, signatures, Merkle roots
//! - [`offchain`]: Node storage, network state, transaction submission
//! - [`sandbox`]: Nested execution (stubs)
//! - [`logging`] and [`misc`]: Guest logs, debug printing, version query
//!
//! # Stubs
//!
//! Some functions are registered as stubs. They return a fixed failure
//! value, or trap with `Unsupported` under `StubPolicy::Trap`.
//! [`HostFunctions::stubs`](chainvm_core::HostFunctions::stubs) lists them.

pub mod allocator;
pub mod child_storage;
mod codec;
pub mod crypto;
pub mod hashing;
pub mod in_memory;
pub mod linker;
pub mod logging;
pub mod misc;
pub mod offchain;
pub mod sandbox;
pub mod storage;
#[cfg(test)]
mod testing;
pub mod trie;

pub use in_memory::{
    InMemoryKeystore, InMemoryNodeStorage, InMemoryStorage, StaticNetwork, TransactionPool,
};
pub use linker::{host_functions, register_all};
pub use logging::LoggingHost;
