//! Host function registration.
//!
//! This module assembles the catalogue of every `env` import a runtime may
//! use. Backends link from the resulting [`HostFunctions`] table, so the
//! catalogue is built once and shared by both engines.

use tracing::debug;

use chainvm_core::{HostFunction, HostFunctions};

use crate::{
    allocator, child_storage, crypto, hashing, logging, misc, offchain, sandbox, storage, trie,
};

/// Every category, in registration order.
const CATEGORIES: &[(&str, &[HostFunction])] = &[
    ("allocator", allocator::FUNCTIONS),
    ("storage", storage::FUNCTIONS),
    ("child_storage", child_storage::FUNCTIONS),
    ("hashing", hashing::FUNCTIONS),
    ("crypto", crypto::FUNCTIONS),
    ("trie", trie::FUNCTIONS),
    ("offchain", offchain::FUNCTIONS),
    ("sandbox", sandbox::FUNCTIONS),
    ("logging", logging::FUNCTIONS),
    ("misc", misc::FUNCTIONS),
];

/// Register all standard host functions on a table.
///
/// This registers the following categories:
/// - allocator, storage and default child storage
/// - hashing, crypto and trie roots
/// - offchain worker support and sandbox stubs
/// - logging and miscellaneous debug output
///
/// # Arguments
///
/// * `functions` - The table to register functions on
pub fn register_all(functions: &mut HostFunctions) {
    for (category, entries) in CATEGORIES {
        functions.extend(entries.iter().copied());
        debug!(category, count = entries.len(), "Registered host functions");
    }
}

/// The full catalogue.
pub fn host_functions() -> HostFunctions {
    let mut functions = HostFunctions::new();
    register_all(&mut functions);
    functions
}
