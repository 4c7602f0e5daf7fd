//! Virtual machine layer for chainvm.
//!
//! This crate provides the machinery to run a runtime module:
//! - [`WasmEngine`]: Wasmtime or wasmi engine, shared across instances
//! - [`CompiledModule`]: Runtime code compiled for one engine
//! - [`Instance`]: A running guest with its [`Context`], serializing calls
//! - [`HeapAllocator`]: Host-managed heap inside the guest's linear memory
//! - [`HostFunctions`]: Engine-independent table of imported functions
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                     WasmEngine                          │
//! │  (Shared, thread-safe)                                  │
//! │  - Wasmtime (Cranelift) or wasmi (interpreter)          │
//! │  - Deterministic float settings                         │
//! └─────────────────────────────────────────────────────────┘
//!                            │
//!                            ▼
//! ┌─────────────────────────────────────────────────────────┐
//! │                   CompiledModule                        │
//! │  (Shared across instances)                              │
//! │  - Validated runtime code                               │
//! └─────────────────────────────────────────────────────────┘
//!                            │
//!                            ▼
//! ┌─────────────────────────────────────────────────────────┐
//! │              Instance (one backend Vm)                  │
//! │  (Calls serialized by a mutex)                          │
//! │  - Linear memory + HeapAllocator                        │
//! │  - Context: storage, keystore, offchain, logs           │
//! │  - HostFunctions linked under `env`                     │
//! └─────────────────────────────────────────────────────────┘
//! ```

mod backend;
pub mod allocator;
pub mod context;
pub mod engine;
pub mod function;
pub mod instance;
pub mod memory;
pub mod module;

pub use allocator::{Allocation, HeapAllocator, MAX_ALLOCATION};
pub use context::{
    BatchVerification, Context, KeyScheme, KeyTypeId, Keystore, LogEntry, LogLevel, Network,
    NetworkState, NodeStorage, OffchainStorage, Storage, StorageKind, TransactionState,
};
pub use engine::WasmEngine;
pub use function::{
    FunctionContext, HOST_MODULE, Handler, HostFunction, HostFunctions, MemoryContext, Support,
    Value, ValueType, args, read_array,
};
pub use instance::Instance;
pub use memory::{GuestMemory, GuestMemoryMut};
pub use module::{CompiledModule, RuntimeCode, custom_section};
