//! Typed wrappers over [`Instance::exec`].
//!
//! Each call encodes its arguments, runs one runtime export and decodes the
//! result. Block building on one instance follows
//! `initialize_block -> apply_extrinsic* -> finalize_block`; the instance
//! lock keeps those calls from interleaving with others.

use ed25519_dalek::VerifyingKey;
use parity_scale_codec::{DecodeAll, Encode};
use tracing::{debug, instrument};

use chainvm_common::RuntimeError;
use chainvm_core::Instance;

use crate::types::{
    Authority, BabeConfiguration, Block, Hash, Header, TransactionValidityError, Validity,
    VersionApi,
};
use crate::version::decode_version;

/// Runtime export names.
pub mod exports {
    pub const CORE_VERSION: &str = "Core_version";
    pub const CORE_INITIALIZE_BLOCK: &str = "Core_initialize_block";
    pub const CORE_EXECUTE_BLOCK: &str = "Core_execute_block";
    pub const METADATA: &str = "Metadata_metadata";
    pub const BABE_CONFIGURATION: &str = "BabeApi_configuration";
    pub const GRANDPA_AUTHORITIES: &str = "GrandpaApi_grandpa_authorities";
    pub const INHERENT_EXTRINSICS: &str = "BlockBuilder_inherent_extrinsics";
    pub const APPLY_EXTRINSIC: &str = "BlockBuilder_apply_extrinsic";
    pub const FINALIZE_BLOCK: &str = "BlockBuilder_finalize_block";
    pub const CHECK_INHERENTS: &str = "BlockBuilder_check_inherents";
    pub const VALIDATE_TRANSACTION: &str = "TaggedTransactionQueue_validate_transaction";
    pub const OFFCHAIN_WORKER: &str = "OffchainWorkerApi_offchain_worker";
}

/// Outcome of `validate_transaction`.
pub type TransactionValidity = Result<Validity, TransactionValidityError>;

/// Runtime API bound to one instance.
#[derive(Debug)]
pub struct RuntimeApi {
    instance: Instance,
}

impl RuntimeApi {
    /// Wrap an instance. Its storage must be set before the first call.
    pub fn new(instance: Instance) -> Self {
        Self { instance }
    }

    /// The underlying instance.
    pub fn instance(&self) -> &Instance {
        &self.instance
    }

    /// Unwrap the instance.
    pub fn into_inner(self) -> Instance {
        self.instance
    }

    /// Query the runtime version.
    pub fn version(&self) -> Result<VersionApi, RuntimeError> {
        let output = self.instance.exec(exports::CORE_VERSION, &[])?;
        decode_version(&output)
    }

    /// Fetch the runtime metadata blob.
    ///
    /// The content is chain-defined and returned without interpretation.
    pub fn metadata(&self) -> Result<Vec<u8>, RuntimeError> {
        let output = self.instance.exec(exports::METADATA, &[])?;
        decode(exports::METADATA, &output)
    }

    /// Query the BABE consensus parameters.
    pub fn babe_configuration(&self) -> Result<BabeConfiguration, RuntimeError> {
        let output = self.instance.exec(exports::BABE_CONFIGURATION, &[])?;
        decode(exports::BABE_CONFIGURATION, &output)
    }

    /// Query the current finality authority set.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::Decode`] if any entry has an invalid ed25519
    /// key or a zero weight.
    pub fn grandpa_authorities(&self) -> Result<Vec<Authority>, RuntimeError> {
        let output = self.instance.exec(exports::GRANDPA_AUTHORITIES, &[])?;
        let raw: Vec<(Hash, u64)> = decode(exports::GRANDPA_AUTHORITIES, &output)?;

        raw.into_iter()
            .enumerate()
            .map(|(index, (key, weight))| authority(index, key, weight))
            .collect()
    }

    /// Start building a block on top of `header`.
    #[instrument(skip_all, fields(number = header.number))]
    pub fn initialize_block(&self, header: &Header) -> Result<(), RuntimeError> {
        self.instance.exec(exports::CORE_INITIALIZE_BLOCK, &header.encode())?;
        Ok(())
    }

    /// Ask the runtime for the inherent extrinsics derived from `data`.
    ///
    /// `data` is the encoded inherent data; the result is the encoded list
    /// of extrinsics.
    pub fn inherent_extrinsics(&self, data: &[u8]) -> Result<Vec<u8>, RuntimeError> {
        self.instance.exec(exports::INHERENT_EXTRINSICS, data)
    }

    /// Apply one encoded extrinsic to the block being built.
    ///
    /// Returns the encoded apply result. A rejected extrinsic is reported
    /// inside those bytes, not as an error.
    pub fn apply_extrinsic(&self, extrinsic: &[u8]) -> Result<Vec<u8>, RuntimeError> {
        self.instance.exec(exports::APPLY_EXTRINSIC, extrinsic)
    }

    /// Finish the block being built and return its header.
    pub fn finalize_block(&self) -> Result<Header, RuntimeError> {
        let output = self.instance.exec(exports::FINALIZE_BLOCK, &[])?;
        decode(exports::FINALIZE_BLOCK, &output)
    }

    /// Execute a complete block.
    ///
    /// Seals are removed from the header before it is passed to the runtime,
    /// which checks the header it would itself have produced.
    #[instrument(
        skip_all,
        fields(number = block.header.number, extrinsics = block.extrinsics.len())
    )]
    pub fn execute_block(&self, block: &Block) -> Result<Vec<u8>, RuntimeError> {
        let mut block = block.clone();
        let stripped = block.header.strip_seals();
        debug!(stripped, "Removed seals before execution");

        self.instance.exec(exports::CORE_EXECUTE_BLOCK, &block.encode())
    }

    /// Validate a transaction for the pool.
    ///
    /// `extrinsic` is passed through unchanged, so it must already hold
    /// every encoded argument the runtime's queue API expects.
    ///
    /// # Errors
    ///
    /// An invalid transaction is `Ok(Err(_))`. `Err` is reserved for
    /// execution and decoding failures.
    pub fn validate_transaction(
        &self,
        extrinsic: &[u8],
    ) -> Result<TransactionValidity, RuntimeError> {
        let output = self.instance.exec(exports::VALIDATE_TRANSACTION, extrinsic)?;
        decode_validity(&output)
    }

    /// Check the inherents of `block` against `data`.
    ///
    /// Returns the encoded check result.
    pub fn check_inherents(&self, block: &Block, data: &[u8]) -> Result<Vec<u8>, RuntimeError> {
        let mut args = block.encode();
        args.extend_from_slice(data);
        self.instance.exec(exports::CHECK_INHERENTS, &args)
    }

    /// Run the offchain worker for the block with `header`.
    pub fn offchain_worker(&self, header: &Header) -> Result<(), RuntimeError> {
        self.instance.exec(exports::OFFCHAIN_WORKER, &header.encode())?;
        Ok(())
    }
}

/// Decode a `validate_transaction` result buffer.
///
/// A leading `0` is followed by the encoded [`Validity`]. Otherwise the
/// second byte selects the error: `0` invalid, `1` unknown, anything else
/// cannot validate.
///
/// # Errors
///
/// Returns [`RuntimeError::Decode`] for a buffer too short to select an
/// outcome or a malformed [`Validity`].
pub fn decode_validity(bytes: &[u8]) -> Result<TransactionValidity, RuntimeError> {
    match bytes {
        [0, rest @ ..] => decode(exports::VALIDATE_TRANSACTION, rest).map(Ok),
        [_, 0, ..] => Ok(Err(TransactionValidityError::Invalid)),
        [_, 1, ..] => Ok(Err(TransactionValidityError::Unknown)),
        [_, _, ..] => Ok(Err(TransactionValidityError::CannotValidate)),
        _ => Err(RuntimeError::decode(format!(
            "{}: {} byte result",
            exports::VALIDATE_TRANSACTION,
            bytes.len()
        ))),
    }
}

fn authority(index: usize, key: Hash, weight: u64) -> Result<Authority, RuntimeError> {
    if weight == 0 {
        return Err(RuntimeError::decode(format!("grandpa authority {index}: zero weight")));
    }
    VerifyingKey::from_bytes(&key)
        .map_err(|e| RuntimeError::decode(format!("grandpa authority {index}: {e}")))?;
    Ok(Authority { key, weight })
}

fn decode<T: DecodeAll>(function: &str, bytes: &[u8]) -> Result<T, RuntimeError> {
    T::decode_all(&mut &bytes[..]).map_err(|e| RuntimeError::decode(format!("{function}: {e}")))
}
