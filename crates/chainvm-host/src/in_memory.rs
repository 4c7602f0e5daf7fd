//! In-memory implementations of the context collaborators.
//!
//! This module provides:
//! - [`InMemoryStorage`]: Transactional key/value state with a Merkle root
//! - [`InMemoryNodeStorage`]: Offchain key/value store
//! - [`InMemoryKeystore`]: ed25519 and sr25519 keys held in process
//! - [`StaticNetwork`]: Fixed network state
//! - [`TransactionPool`]: Collects submitted transactions
//!
//! They back the CLI and the tests, and serve as reference implementations
//! of the traits in `chainvm_core::context`.

use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;
use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parking_lot::{Mutex, RwLock};
use tracing::debug;

use chainvm_common::HostError;
use chainvm_core::{
    KeyScheme, KeyTypeId, Keystore, Network, NetworkState, OffchainStorage, Storage,
    TransactionState,
};

use crate::crypto::{ed25519_public, ed25519_sign, sr25519_keypair, sr25519_sign};
use crate::hashing::blake2_256;
use crate::trie::merkle_root;

/// Pending writes of one transaction; `None` marks a deletion.
type Overlay = BTreeMap<Vec<u8>, Option<Vec<u8>>>;

#[derive(Debug, Default)]
struct StorageState {
    committed: BTreeMap<Vec<u8>, Vec<u8>>,
    transactions: Vec<Overlay>,
}

impl StorageState {
    fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
        for overlay in self.transactions.iter().rev() {
            if let Some(change) = overlay.get(key) {
                return change.clone();
            }
        }
        self.committed.get(key).cloned()
    }

    fn write(&mut self, key: &[u8], value: Option<Vec<u8>>) {
        match self.transactions.last_mut() {
            Some(overlay) => {
                overlay.insert(key.to_vec(), value);
            }
            None => match value {
                Some(value) => {
                    self.committed.insert(key.to_vec(), value);
                }
                None => {
                    self.committed.remove(key);
                }
            },
        }
    }

    /// Committed state with every open transaction applied.
    fn merged(&self) -> BTreeMap<Vec<u8>, Vec<u8>> {
        let mut view = self.committed.clone();
        for overlay in &self.transactions {
            for (key, change) in overlay {
                match change {
                    Some(value) => view.insert(key.clone(), value.clone()),
                    None => view.remove(key),
                };
            }
        }
        view
    }

    fn next_key(&self, key: &[u8]) -> Option<Vec<u8>> {
        if self.transactions.is_empty() {
            return self
                .committed
                .range::<[u8], _>((Bound::Excluded(key), Bound::Unbounded))
                .next()
                .map(|(k, _)| k.clone());
        }
        self.merged()
            .range::<[u8], _>((Bound::Excluded(key), Bound::Unbounded))
            .next()
            .map(|(k, _)| k.clone())
    }
}

/// Transactional key/value state held in memory.
///
/// Clones share the same state, so a test can keep a handle after moving one
/// into an instance's context.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStorage {
    inner: Arc<Mutex<StorageState>>,
}

impl InMemoryStorage {
    /// Create an empty storage.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a storage holding `pairs`.
    pub fn from_pairs(pairs: impl IntoIterator<Item = (Vec<u8>, Vec<u8>)>) -> Self {
        let storage = Self::new();
        storage.inner.lock().committed.extend(pairs);
        storage
    }

    /// Value stored under `key`, including uncommitted writes.
    pub fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
        self.inner.lock().get(key)
    }

    /// Store `value` under `key`.
    pub fn set(&self, key: &[u8], value: &[u8]) {
        self.inner.lock().write(key, Some(value.to_vec()));
    }

    /// Remove `key`.
    pub fn clear(&self, key: &[u8]) {
        self.inner.lock().write(key, None);
    }

    /// Merkle root over the visible state.
    pub fn root(&self) -> [u8; 32] {
        let view = self.inner.lock().merged();
        merkle_root(view.iter().map(|(k, v)| (k.as_slice(), v.as_slice())), blake2_256)
    }

    /// Every visible key/value pair, sorted by key.
    pub fn snapshot(&self) -> BTreeMap<Vec<u8>, Vec<u8>> {
        self.inner.lock().merged()
    }

    /// Number of open transactions.
    pub fn transaction_depth(&self) -> usize {
        self.inner.lock().transactions.len()
    }
}

impl Storage for InMemoryStorage {
    fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
        InMemoryStorage::get(self, key)
    }

    fn set(&mut self, key: &[u8], value: &[u8]) {
        InMemoryStorage::set(self, key, value);
    }

    fn clear(&mut self, key: &[u8]) {
        InMemoryStorage::clear(self, key);
    }

    fn clear_prefix(&mut self, prefix: &[u8], limit: Option<u32>) -> (u32, bool) {
        let mut state = self.inner.lock();
        let matching: Vec<Vec<u8>> = state
            .merged()
            .into_keys()
            .filter(|key| key.starts_with(prefix))
            .collect();

        let limit = limit.map_or(usize::MAX, |l| l as usize);
        let removed = matching.len().min(limit);
        for key in &matching[..removed] {
            state.write(key, None);
        }

        (removed as u32, removed == matching.len())
    }

    fn next_key(&self, key: &[u8]) -> Option<Vec<u8>> {
        self.inner.lock().next_key(key)
    }

    fn root(&mut self) -> [u8; 32] {
        InMemoryStorage::root(self)
    }

    fn start_transaction(&mut self) {
        self.inner.lock().transactions.push(Overlay::new());
    }

    fn commit_transaction(&mut self) -> Result<(), HostError> {
        let mut state = self.inner.lock();
        let overlay = state
            .transactions
            .pop()
            .ok_or(HostError::NoActiveTransaction)?;
        for (key, change) in overlay {
            state.write(&key, change);
        }
        Ok(())
    }

    fn rollback_transaction(&mut self) -> Result<(), HostError> {
        self.inner
            .lock()
            .transactions
            .pop()
            .map(|_| ())
            .ok_or(HostError::NoActiveTransaction)
    }
}

/// Offchain key/value store held in memory.
#[derive(Debug, Default)]
pub struct InMemoryNodeStorage {
    entries: DashMap<Vec<u8>, Vec<u8>>,
}

impl InMemoryNodeStorage {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored keys.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl OffchainStorage for InMemoryNodeStorage {
    fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
        self.entries.get(key).map(|value| value.clone())
    }

    fn set(&self, key: &[u8], value: &[u8]) {
        self.entries.insert(key.to_vec(), value.to_vec());
    }

    fn clear(&self, key: &[u8]) {
        self.entries.remove(key);
    }

    fn compare_and_set(&self, key: &[u8], old: Option<&[u8]>, new: &[u8]) -> bool {
        match self.entries.entry(key.to_vec()) {
            Entry::Occupied(mut entry) => {
                if old != Some(entry.get().as_slice()) {
                    return false;
                }
                entry.insert(new.to_vec());
                true
            }
            Entry::Vacant(entry) => {
                if old.is_some() {
                    return false;
                }
                entry.insert(new.to_vec());
                true
            }
        }
    }
}

/// Keys indexed by type, scheme and public key; values are 32-byte secrets.
type KeyMap = HashMap<(KeyTypeId, KeyScheme, [u8; 32]), [u8; 32]>;

/// Keystore holding secrets in memory.
///
/// A seed is hashed with BLAKE2b-256 into the secret, so the same seed
/// always yields the same key.
#[derive(Debug, Default)]
pub struct InMemoryKeystore {
    keys: RwLock<KeyMap>,
}

impl InMemoryKeystore {
    /// Create an empty keystore.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored keys.
    pub fn len(&self) -> usize {
        self.keys.read().len()
    }

    /// Whether the keystore is empty.
    pub fn is_empty(&self) -> bool {
        self.keys.read().is_empty()
    }
}

impl Keystore for InMemoryKeystore {
    fn public_keys(&self, key_type: KeyTypeId, scheme: KeyScheme) -> Vec<[u8; 32]> {
        let mut keys: Vec<[u8; 32]> = self
            .keys
            .read()
            .keys()
            .filter(|(ty, sch, _)| *ty == key_type && *sch == scheme)
            .map(|(_, _, public)| *public)
            .collect();
        keys.sort_unstable();
        keys
    }

    fn generate(
        &self,
        key_type: KeyTypeId,
        scheme: KeyScheme,
        seed: Option<&[u8]>,
    ) -> Result<[u8; 32], String> {
        let secret = match seed {
            Some(seed) => blake2_256(seed),
            None => rand::random(),
        };

        let public = match scheme {
            KeyScheme::Ed25519 => ed25519_public(&secret),
            KeyScheme::Sr25519 => sr25519_keypair(&secret)
                .map_err(|e| e.to_string())?
                .public
                .to_bytes(),
        };

        self.keys.write().insert((key_type, scheme, public), secret);
        debug!(
            key_type = %String::from_utf8_lossy(&key_type),
            ?scheme,
            "Keystore generated key"
        );
        Ok(public)
    }

    fn sign(
        &self,
        key_type: KeyTypeId,
        scheme: KeyScheme,
        public: &[u8; 32],
        message: &[u8],
    ) -> Option<[u8; 64]> {
        let secret = *self.keys.read().get(&(key_type, scheme, *public))?;
        match scheme {
            KeyScheme::Ed25519 => Some(ed25519_sign(&secret, message)),
            KeyScheme::Sr25519 => {
                let keypair = sr25519_keypair(&secret).ok()?;
                Some(sr25519_sign(&keypair, message))
            }
        }
    }
}

/// Network accessor returning a fixed state.
#[derive(Debug, Clone, Default)]
pub struct StaticNetwork {
    state: NetworkState,
}

impl StaticNetwork {
    /// Create an accessor reporting `state`.
    pub fn new(state: NetworkState) -> Self {
        Self { state }
    }
}

impl Network for StaticNetwork {
    fn network_state(&self) -> NetworkState {
        self.state.clone()
    }
}

/// Transaction pool that keeps every submission.
#[derive(Debug, Default)]
pub struct TransactionPool {
    pending: Mutex<Vec<Vec<u8>>>,
}

impl TransactionPool {
    /// Create an empty pool.
    pub fn new() -> Self {
        Self::default()
    }

    /// Submitted transactions, oldest first.
    pub fn pending(&self) -> Vec<Vec<u8>> {
        self.pending.lock().clone()
    }

    /// Remove and return every submitted transaction.
    pub fn drain(&self) -> Vec<Vec<u8>> {
        std::mem::take(&mut *self.pending.lock())
    }
}

impl TransactionState for TransactionPool {
    fn submit(&self, extrinsic: Vec<u8>) -> bool {
        self.pending.lock().push(extrinsic);
        true
    }
}
