//! Data types exchanged with the runtime.
//!
//! Everything here is SCALE-encoded on the wire. Blocks and headers travel
//! in both directions; the remaining types are only decoded from results.

use parity_scale_codec::{Decode, Encode};
use serde::Serialize;
use thiserror::Error;

/// A 256-bit hash.
pub type Hash = [u8; 32];

/// Four-byte consensus engine identifier, e.g. `*b"BABE"`.
pub type ConsensusEngineId = [u8; 4];

/// Block header.
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub struct Header {
    /// Hash of the parent block.
    pub parent_hash: Hash,
    /// Block height.
    #[codec(compact)]
    pub number: u32,
    /// State trie root after executing the block.
    pub state_root: Hash,
    /// Ordered trie root of the block's extrinsics.
    pub extrinsics_root: Hash,
    /// Consensus and runtime digest items.
    pub digest: Digest,
}

impl Header {
    /// Header for block `number` on top of `parent_hash` with empty roots.
    pub fn new(parent_hash: Hash, number: u32) -> Self {
        Self {
            parent_hash,
            number,
            state_root: Hash::default(),
            extrinsics_root: Hash::default(),
            digest: Digest::default(),
        }
    }

    /// Remove every seal from the digest.
    ///
    /// Returns the number of items removed.
    pub fn strip_seals(&mut self) -> usize {
        let before = self.digest.logs.len();
        self.digest.logs.retain(|item| !item.is_seal());
        before - self.digest.logs.len()
    }
}

/// Header digest.
#[derive(Debug, Clone, Default, PartialEq, Eq, Encode, Decode)]
pub struct Digest {
    /// Items in insertion order.
    pub logs: Vec<DigestItem>,
}

/// One digest entry.
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub enum DigestItem {
    /// Chain-specific data.
    #[codec(index = 0)]
    Other(Vec<u8>),
    /// Message from the runtime to a consensus engine.
    #[codec(index = 4)]
    Consensus(ConsensusEngineId, Vec<u8>),
    /// Block author's signature over the header, added after execution.
    #[codec(index = 5)]
    Seal(ConsensusEngineId, Vec<u8>),
    /// Consensus data produced before the runtime runs, e.g. a slot claim.
    #[codec(index = 6)]
    PreRuntime(ConsensusEngineId, Vec<u8>),
    /// The runtime code or heap pages changed in this block.
    #[codec(index = 8)]
    RuntimeEnvironmentUpdated,
}

impl DigestItem {
    /// Whether this item is a seal.
    pub fn is_seal(&self) -> bool {
        matches!(self, Self::Seal(..))
    }
}

/// A block: header plus opaque extrinsics.
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub struct Block {
    /// The header.
    pub header: Header,
    /// Encoded extrinsics, each opaque to the host.
    pub extrinsics: Vec<Vec<u8>>,
}

/// Runtime version, as returned by `Core_version`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VersionApi {
    /// Identifies the runtime family, e.g. `"node"`.
    pub spec_name: String,
    /// Name of this implementation of the runtime family.
    pub impl_name: String,
    /// Version of the authorship interface.
    pub authoring_version: u32,
    /// Version of the runtime logic; bumped on any behaviour change.
    pub spec_version: u32,
    /// Version of the implementation.
    pub impl_version: u32,
    /// Runtime APIs the runtime implements.
    pub apis: Vec<ApiVersion>,
    /// Transaction format version, absent in older runtimes.
    pub transaction_version: Option<u32>,
}

impl VersionApi {
    /// Version of the API with the given identifier.
    pub fn api_version(&self, id: &[u8; 8]) -> Option<u32> {
        self.apis.iter().find(|api| &api.id == id).map(|api| api.version)
    }
}

/// An implemented Runtime API and its version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ApiVersion {
    /// Eight-byte identifier (a hash prefix of the API name).
    pub id: [u8; 8],
    /// Implemented version.
    pub version: u32,
}

/// Which slots may be claimed by secondary authors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode)]
pub enum AllowedSlots {
    /// Only primary slots.
    PrimarySlots,
    /// Primary and plain secondary slots.
    PrimaryAndSecondaryPlainSlots,
    /// Primary and VRF secondary slots.
    PrimaryAndSecondaryVrfSlots,
}

/// BABE consensus parameters, as returned by `BabeApi_configuration`.
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub struct BabeConfiguration {
    /// Slot duration in milliseconds.
    pub slot_duration: u64,
    /// Slots per epoch.
    pub epoch_length: u64,
    /// Leadership probability as a fraction `(numerator, denominator)`.
    pub c: (u64, u64),
    /// Genesis authorities as `(sr25519 key, weight)`.
    pub authorities: Vec<(Hash, u64)>,
    /// Genesis randomness.
    pub randomness: Hash,
    /// Secondary slot policy.
    pub allowed_slots: AllowedSlots,
}

/// A finality authority with a validated ed25519 key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Authority {
    /// Public key.
    pub key: Hash,
    /// Voting weight, never zero.
    pub weight: u64,
}

/// Successful transaction validation.
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub struct Validity {
    /// Ordering priority in the pool.
    pub priority: u64,
    /// Tags that must be provided by earlier transactions.
    pub requires: Vec<Vec<u8>>,
    /// Tags this transaction provides.
    pub provides: Vec<Vec<u8>>,
    /// Number of blocks the validity holds for.
    pub longevity: u64,
    /// Whether the transaction may be gossiped.
    pub propagate: bool,
}

/// Why a transaction failed validation.
///
/// This is an expected outcome of `validate_transaction`, not a runtime
/// failure.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionValidityError {
    /// The transaction is invalid.
    #[error("Invalid transaction")]
    Invalid,

    /// Validity could not be determined.
    #[error("Unknown transaction validity")]
    Unknown,

    /// The result buffer named neither outcome.
    #[error("Transaction cannot be validated")]
    CannotValidate,
}
