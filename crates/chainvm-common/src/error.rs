//! Error types for chainvm.
//!
//! This module defines a hierarchy of error types using `thiserror`:
//! - [`RuntimeError`]: Top-level errors surfaced by an instance or the runtime API
//! - [`HostError`]: Errors raised inside host functions while the guest is running
//! - [`AllocationError`]: Guest heap exhaustion and invalid frees

use std::io;

use thiserror::Error;

/// Top-level runtime errors.
///
/// These errors represent failures that can occur during the lifecycle of
/// a runtime instance, from compilation to a single `exec` call.
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// The guest heap could not satisfy an allocation.
    #[error("Allocation failed: {0}")]
    Allocation(#[from] AllocationError),

    /// `exec` was attempted before a storage backend was installed.
    #[error("No storage backend set on the execution context")]
    NilStorage,

    /// The requested guest export does not exist or has the wrong signature.
    #[error("Missing export: {name}")]
    MissingExport {
        /// Name of the export that was looked up.
        name: String,
    },

    /// The guest trapped (memory violation, unreachable, stack exhaustion, or a host
    /// function failure).
    #[error("Guest trap: {message}")]
    GuestTrap {
        /// Description of the trap as reported by the engine.
        message: String,
        /// The host function error that caused the trap, if any.
        cause: Option<HostError>,
    },

    /// A result buffer returned by the guest could not be decoded.
    #[error("Decode error: {reason}")]
    Decode {
        /// Description of the decoding failure.
        reason: String,
    },

    /// WebAssembly compilation or validation failed.
    #[error("Compilation failed: {reason}")]
    CompilationFailed {
        /// Description of the compilation failure.
        reason: String,
    },

    /// Linking or instantiation of the module failed.
    #[error("Instantiation failed: {reason}")]
    Instantiation {
        /// Description of the instantiation failure.
        reason: String,
    },

    /// The instance was stopped and can no longer execute calls.
    #[error("Instance has been stopped")]
    InstanceStopped,

    /// A previous call trapped and left the instance in an unknown state.
    #[error("Instance is poisoned by a previous trap")]
    InstancePoisoned,

    /// Invalid configuration was provided.
    #[error("Invalid configuration: {reason}")]
    InvalidConfig {
        /// Description of the configuration error.
        reason: String,
    },

    /// I/O operation failed.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Errors from the guest heap allocator.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AllocationError {
    /// Growing the heap would exceed the configured maximum.
    #[error("Out of memory: requested {requested} bytes, heap limit is {heap_limit} bytes")]
    OutOfMemory {
        /// Size of the allocation request in bytes.
        requested: u32,
        /// Highest address the heap may reach.
        heap_limit: u32,
    },

    /// The block fits under the heap limit but not in the current memory,
    /// and the caller cannot grow it.
    #[error("Memory too small: requested {requested} bytes, memory is {memory_size} bytes")]
    MemoryTooSmall {
        /// Size of the allocation request in bytes.
        requested: u32,
        /// Current size of linear memory in bytes.
        memory_size: u64,
    },

    /// The request is larger than the biggest supported order.
    #[error("Allocation of {requested} bytes exceeds the maximum allocation size")]
    RequestTooLarge {
        /// Size of the allocation request in bytes.
        requested: u32,
    },

    /// The pointer passed to `free` was not handed out by the allocator.
    #[error("Invalid free of pointer {pointer:#x}")]
    InvalidFree {
        /// The offending pointer.
        pointer: u32,
    },
}

/// Errors from host function implementations.
///
/// A host function that fails traps the guest. The error is kept and attached to
/// the resulting [`RuntimeError::GuestTrap`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HostError {
    /// A `(pointer, length)` pair does not fit inside the guest's linear memory.
    #[error("Memory access out of bounds: ptr={ptr:#x} len={len} memory_size={memory_size}")]
    OutOfBounds {
        /// Start of the requested range.
        ptr: u32,
        /// Length of the requested range.
        len: u32,
        /// Current size of the linear memory in bytes.
        memory_size: usize,
    },

    /// Allocation on behalf of the guest failed.
    #[error("Allocation failed: {0}")]
    Allocation(#[from] AllocationError),

    /// An argument buffer could not be decoded.
    #[error("Failed to decode argument of {function}: {reason}")]
    Decode {
        /// Host function that received the argument.
        function: String,
        /// Description of the decoding failure.
        reason: String,
    },

    /// A string argument was not valid UTF-8.
    #[error("Invalid UTF-8 passed to {function}")]
    Utf8 {
        /// Host function that received the argument.
        function: String,
    },

    /// Commit or rollback without a matching `start_transaction`.
    #[error("No active storage transaction")]
    NoActiveTransaction,

    /// The function is a stub and the stub policy forbids calling it.
    #[error("Host function {function} is not supported")]
    Unsupported {
        /// Name of the stubbed host function.
        function: String,
    },

    /// The context lacks a collaborator the function needs.
    #[error("Missing capability: {capability}")]
    MissingCapability {
        /// Name of the missing collaborator.
        capability: &'static str,
    },

    /// The guest passed a value of the wrong type, or too few arguments.
    #[error("Wrong argument {index} for {function}")]
    WrongArgument {
        /// Host function that was called.
        function: String,
        /// Zero-based index of the offending argument.
        index: usize,
    },

    /// The storage backend reported a failure.
    #[error("Storage error: {0}")]
    Storage(String),

    /// The keystore could not create or use a key.
    #[error("Keystore error: {0}")]
    Keystore(String),
}

impl RuntimeError {
    /// Create a new `MissingExport` error.
    pub fn missing_export(name: impl Into<String>) -> Self {
        Self::MissingExport { name: name.into() }
    }

    /// Create a new `GuestTrap` error without a host cause.
    pub fn trap(message: impl Into<String>) -> Self {
        Self::GuestTrap {
            message: message.into(),
            cause: None,
        }
    }

    /// Create a new `Decode` error.
    pub fn decode(reason: impl Into<String>) -> Self {
        Self::Decode {
            reason: reason.into(),
        }
    }

    /// Create a new `CompilationFailed` error.
    pub fn compilation_failed(reason: impl Into<String>) -> Self {
        Self::CompilationFailed {
            reason: reason.into(),
        }
    }

    /// Create a new `Instantiation` error.
    pub fn instantiation(reason: impl Into<String>) -> Self {
        Self::Instantiation {
            reason: reason.into(),
        }
    }

    /// Create a new `InvalidConfig` error.
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            reason: reason.into(),
        }
    }

    /// Returns `true` if this error is a guest trap.
    pub fn is_trap(&self) -> bool {
        matches!(self, Self::GuestTrap { .. })
    }

    /// Returns `true` if the in-flight call cannot be salvaged.
    ///
    /// Decode errors are contract violations but leave the instance usable.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Allocation(_)
                | Self::NilStorage
                | Self::MissingExport { .. }
                | Self::GuestTrap { .. }
                | Self::InstanceStopped
                | Self::InstancePoisoned
        )
    }
}

impl HostError {
    /// Create a new `Decode` error.
    pub fn decode(function: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Decode {
            function: function.into(),
            reason: reason.into(),
        }
    }

    /// Create a new `Unsupported` error.
    pub fn unsupported(function: impl Into<String>) -> Self {
        Self::Unsupported {
            function: function.into(),
        }
    }
}
