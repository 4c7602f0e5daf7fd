//! Per-instance execution context and the external interfaces it holds.
//!
//! This module provides:
//! - [`Context`]: State bound to one instance and visible to host functions
//! - [`Storage`], [`Keystore`], [`OffchainStorage`], [`Network`],
//!   [`TransactionState`]: Collaborators injected by the embedder
//! - [`LogEntry`] and [`LogLevel`]: Log lines emitted by the guest

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use chainvm_common::{HostConfig, HostError};

use crate::allocator::HeapAllocator;

/// Key/value state the runtime reads and writes.
///
/// The storage is only touched from inside a serialized `exec` call. When the
/// same database backs several instances, isolation between their
/// transactions is the implementation's responsibility.
pub trait Storage: Send {
    /// Value stored under `key`.
    fn get(&self, key: &[u8]) -> Option<Vec<u8>>;

    /// Store `value` under `key`.
    fn set(&mut self, key: &[u8], value: &[u8]);

    /// Remove `key`.
    fn clear(&mut self, key: &[u8]);

    /// Whether `key` holds a value.
    fn exists(&self, key: &[u8]) -> bool {
        self.get(key).is_some()
    }

    /// Remove keys starting with `prefix`, at most `limit` of them.
    ///
    /// Returns how many keys were removed and whether no matching key remains.
    fn clear_prefix(&mut self, prefix: &[u8], limit: Option<u32>) -> (u32, bool);

    /// Smallest key strictly greater than `key`.
    fn next_key(&self, key: &[u8]) -> Option<Vec<u8>>;

    /// Root hash over the current state.
    fn root(&mut self) -> [u8; 32];

    /// Open a nested transaction.
    fn start_transaction(&mut self);

    /// Fold the innermost transaction into its parent.
    ///
    /// # Errors
    ///
    /// Returns [`HostError::NoActiveTransaction`] when none is open.
    fn commit_transaction(&mut self) -> Result<(), HostError>;

    /// Discard the innermost transaction.
    ///
    /// # Errors
    ///
    /// Returns [`HostError::NoActiveTransaction`] when none is open.
    fn rollback_transaction(&mut self) -> Result<(), HostError>;
}

/// Signature scheme of a keystore key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyScheme {
    /// Ed25519 signatures.
    Ed25519,
    /// Schnorr signatures over Ristretto25519.
    Sr25519,
}

/// Four-byte tag grouping keys by purpose (e.g. `b"babe"`).
pub type KeyTypeId = [u8; 4];

/// Holder of the node's private keys.
pub trait Keystore: Send + Sync {
    /// Public keys of the given type and scheme.
    fn public_keys(&self, key_type: KeyTypeId, scheme: KeyScheme) -> Vec<[u8; 32]>;

    /// Create a key, random or derived from `seed`, and return its public half.
    ///
    /// # Errors
    ///
    /// Returns a description of the failure if the key cannot be created.
    fn generate(
        &self,
        key_type: KeyTypeId,
        scheme: KeyScheme,
        seed: Option<&[u8]>,
    ) -> Result<[u8; 32], String>;

    /// Sign `message` with the key whose public half is `public`.
    ///
    /// Returns `None` if the keystore does not hold that key.
    fn sign(
        &self,
        key_type: KeyTypeId,
        scheme: KeyScheme,
        public: &[u8; 32],
        message: &[u8],
    ) -> Option<[u8; 64]>;
}

/// Key/value store outside of consensus, used by offchain workers.
pub trait OffchainStorage: Send + Sync {
    /// Value stored under `key`.
    fn get(&self, key: &[u8]) -> Option<Vec<u8>>;

    /// Store `value` under `key`.
    fn set(&self, key: &[u8], value: &[u8]);

    /// Remove `key`.
    fn clear(&self, key: &[u8]);

    /// Set `key` to `new` only if it currently holds `old`.
    ///
    /// `old == None` means the key must be absent. Returns whether the value
    /// was written.
    fn compare_and_set(&self, key: &[u8], old: Option<&[u8]>, new: &[u8]) -> bool;
}

/// Which offchain store a call addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageKind {
    /// Shared between forks and kept across restarts.
    Persistent,
    /// Local to the node and the current fork.
    Local,
}

impl StorageKind {
    /// Decode the numeric kind used on the wire.
    pub fn from_u32(kind: u32) -> Option<Self> {
        match kind {
            1 => Some(Self::Persistent),
            2 => Some(Self::Local),
            _ => None,
        }
    }
}

/// The two offchain key/value scopes.
#[derive(Clone, Default)]
pub struct NodeStorage {
    /// Local storage.
    pub local: Option<Arc<dyn OffchainStorage>>,
    /// Persistent storage, also the target of offchain indexing.
    pub persistent: Option<Arc<dyn OffchainStorage>>,
}

impl NodeStorage {
    /// The store for `kind`, if configured.
    pub fn get(&self, kind: StorageKind) -> Option<&Arc<dyn OffchainStorage>> {
        match kind {
            StorageKind::Local => self.local.as_ref(),
            StorageKind::Persistent => self.persistent.as_ref(),
        }
    }
}

impl fmt::Debug for NodeStorage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeStorage")
            .field("local", &self.local.is_some())
            .field("persistent", &self.persistent.is_some())
            .finish()
    }
}

/// Snapshot of the node's network identity.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NetworkState {
    /// Encoded peer id.
    pub peer_id: Vec<u8>,
    /// Encoded multiaddresses the node is reachable at.
    pub external_addresses: Vec<Vec<u8>>,
}

/// Access to peer-to-peer networking.
pub trait Network: Send + Sync {
    /// Current network state.
    fn network_state(&self) -> NetworkState;
}

/// Pool receiving transactions submitted by the runtime.
pub trait TransactionState: Send + Sync {
    /// Queue an encoded extrinsic. Returns whether it was accepted.
    fn submit(&self, extrinsic: Vec<u8>) -> bool;
}

/// A single log entry from guest code.
#[derive(Debug, Clone)]
pub struct LogEntry {
    /// Log level.
    pub level: LogLevel,

    /// Target given by the guest.
    pub target: String,

    /// Log message content.
    pub message: String,

    /// Timestamp when the log was recorded.
    pub timestamp: Instant,
}

/// Log level for guest logs.
///
/// Numbering follows the runtime interface: 1 is error, 5 is trace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    /// Error messages.
    Error = 1,
    /// Warning messages.
    Warn = 2,
    /// Informational messages.
    Info = 3,
    /// Debug-level messages.
    Debug = 4,
    /// Very verbose messages.
    Trace = 5,
}

impl LogLevel {
    /// Convert a numeric level; unknown values map to `Info`.
    pub fn from_u32(level: u32) -> Self {
        match level {
            1 => LogLevel::Error,
            2 => LogLevel::Warn,
            4 => LogLevel::Debug,
            5 => LogLevel::Trace,
            _ => LogLevel::Info,
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogLevel::Error => write!(f, "ERROR"),
            LogLevel::Warn => write!(f, "WARN"),
            LogLevel::Info => write!(f, "INFO"),
            LogLevel::Debug => write!(f, "DEBUG"),
            LogLevel::Trace => write!(f, "TRACE"),
        }
    }
}

/// Outcome of a batch of signature checks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchVerification {
    /// Signatures checked so far.
    pub checked: u32,
    /// Whether every check succeeded.
    pub all_valid: bool,
}

/// Execution state bound to one instance.
///
/// Host functions reach the context through
/// [`FunctionContext`](crate::FunctionContext). There is exactly one
/// context per instance; it is replaced only through `set_context`.
pub struct Context {
    /// State backend; must be set before any call.
    pub storage: Option<Box<dyn Storage>>,

    /// Allocator owning the guest heap.
    pub allocator: HeapAllocator,

    /// Keystore for signing host functions.
    pub keystore: Option<Arc<dyn Keystore>>,

    /// Whether the node is a validator.
    pub validator: bool,

    /// Offchain key/value stores.
    pub node_storage: NodeStorage,

    /// Network accessor.
    pub network: Option<Arc<dyn Network>>,

    /// Pool for submitted transactions.
    pub transaction_state: Option<Arc<dyn TransactionState>>,

    /// Host function settings.
    pub config: HostConfig,

    /// Logs collected from guest code, oldest first.
    ///
    /// Holds at most `config.max_captured_logs` entries.
    pub logs: VecDeque<LogEntry>,

    /// Open signature batch, if any.
    pub batch: Option<BatchVerification>,

    /// Error raised by the host function that trapped the guest.
    pub(crate) pending_error: Option<HostError>,
}

impl Context {
    /// Create an empty context with the given host configuration.
    pub fn new(config: HostConfig) -> Self {
        Self {
            storage: None,
            allocator: HeapAllocator::new(0, 0),
            keystore: None,
            validator: false,
            node_storage: NodeStorage::default(),
            network: None,
            transaction_state: None,
            config,
            logs: VecDeque::new(),
            batch: None,
            pending_error: None,
        }
    }

    /// Set the storage backend.
    pub fn with_storage(mut self, storage: impl Storage + 'static) -> Self {
        self.storage = Some(Box::new(storage));
        self
    }

    /// Set the keystore.
    pub fn with_keystore(mut self, keystore: Arc<dyn Keystore>) -> Self {
        self.keystore = Some(keystore);
        self
    }

    /// Mark the node as a validator.
    pub fn with_validator(mut self, validator: bool) -> Self {
        self.validator = validator;
        self
    }

    /// Set the offchain stores.
    pub fn with_node_storage(mut self, node_storage: NodeStorage) -> Self {
        self.node_storage = node_storage;
        self
    }

    /// Set the network accessor.
    pub fn with_network(mut self, network: Arc<dyn Network>) -> Self {
        self.network = Some(network);
        self
    }

    /// Set the transaction pool.
    pub fn with_transaction_state(mut self, pool: Arc<dyn TransactionState>) -> Self {
        self.transaction_state = Some(pool);
        self
    }

    /// Storage backend, or an error for host functions.
    ///
    /// # Errors
    ///
    /// Returns [`HostError::MissingCapability`] if no storage is set.
    pub fn storage_mut(&mut self) -> Result<&mut (dyn Storage + 'static), HostError> {
        match self.storage.as_deref_mut() {
            Some(storage) => Ok(storage),
            None => Err(HostError::MissingCapability {
                capability: "storage",
            }),
        }
    }

    /// Add a log entry, dropping the oldest one when the buffer is full.
    pub fn log(&mut self, level: LogLevel, target: &str, message: String) {
        let capacity = self.config.max_captured_logs;
        if !self.config.capture_guest_logs || capacity == 0 {
            return;
        }
        while self.logs.len() >= capacity {
            self.logs.pop_front();
        }
        self.logs.push_back(LogEntry {
            level,
            target: target.to_string(),
            message,
            timestamp: Instant::now(),
        });
    }

    /// Remove and return the captured logs.
    pub fn take_logs(&mut self) -> Vec<LogEntry> {
        self.logs.drain(..).collect()
    }

    /// Drop everything tied to the export call that just returned.
    pub(crate) fn end_call(&mut self) {
        self.allocator.clear();
        self.batch = None;
        self.pending_error = None;
    }

    /// Take the error recorded by the last failing host function.
    pub(crate) fn take_pending_error(&mut self) -> Option<HostError> {
        self.pending_error.take()
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new(HostConfig::default())
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("has_storage", &self.storage.is_some())
            .field("allocator", &self.allocator)
            .field("has_keystore", &self.keystore.is_some())
            .field("validator", &self.validator)
            .field("node_storage", &self.node_storage)
            .field("logs", &self.logs.len())
            .finish_non_exhaustive()
    }
}
