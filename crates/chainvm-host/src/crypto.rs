//! Crypto host functions.
//!
//! This module provides:
//! - ed25519 and sr25519 key listing, generation and signing through the
//!   context's [`Keystore`](chainvm_core::Keystore)
//! - signature verification, single or inside a batch
//! - secp256k1 public key recovery
//!
//! The ECDSA keystore functions are stubs: they report no keys, refuse to
//! sign and reject every signature.

use ed25519_dalek::{Signer, Verifier};
use parity_scale_codec::Encode;
use tracing::debug;

use chainvm_common::HostError;
use chainvm_core::{
    BatchVerification, FunctionContext, HostFunction, KeyScheme, Keystore, Value, ValueType, args,
    read_array,
};

use crate::codec::{
    HostResult, decode_arg, read_arg, return_bool, return_encoded, return_pointer, return_span,
};

const I32: ValueType = ValueType::I32;
const I64: ValueType = ValueType::I64;

/// Signing context used by sr25519 runtimes.
pub const SR25519_SIGNING_CONTEXT: &[u8] = b"substrate";

/// Public key of the ed25519 secret `secret`.
pub fn ed25519_public(secret: &[u8; 32]) -> [u8; 32] {
    ed25519_dalek::SigningKey::from_bytes(secret)
        .verifying_key()
        .to_bytes()
}

/// Sign `message` with the ed25519 secret `secret`.
pub fn ed25519_sign(secret: &[u8; 32], message: &[u8]) -> [u8; 64] {
    ed25519_dalek::SigningKey::from_bytes(secret)
        .sign(message)
        .to_bytes()
}

/// Check an ed25519 signature. Malformed keys are invalid.
pub fn ed25519_verify(signature: &[u8; 64], message: &[u8], public: &[u8; 32]) -> bool {
    let Ok(key) = ed25519_dalek::VerifyingKey::from_bytes(public) else {
        return false;
    };
    let signature = ed25519_dalek::Signature::from_bytes(signature);
    key.verify(message, &signature).is_ok()
}

/// sr25519 keypair expanded from a 32-byte mini secret.
pub fn sr25519_keypair(secret: &[u8; 32]) -> Result<schnorrkel::Keypair, HostError> {
    let mini = schnorrkel::MiniSecretKey::from_bytes(secret)
        .map_err(|e| HostError::Keystore(e.to_string()))?;
    Ok(mini.expand_to_keypair(schnorrkel::ExpansionMode::Ed25519))
}

/// Sign `message` with an sr25519 keypair.
pub fn sr25519_sign(keypair: &schnorrkel::Keypair, message: &[u8]) -> [u8; 64] {
    keypair
        .sign_simple(SR25519_SIGNING_CONTEXT, message)
        .to_bytes()
}

/// Check an sr25519 signature. Malformed keys or signatures are invalid.
pub fn sr25519_verify(signature: &[u8; 64], message: &[u8], public: &[u8; 32]) -> bool {
    let (Ok(key), Ok(signature)) = (
        schnorrkel::PublicKey::from_bytes(public),
        schnorrkel::Signature::from_bytes(signature),
    ) else {
        return false;
    };
    key.verify_simple(SR25519_SIGNING_CONTEXT, message, &signature)
        .is_ok()
}

/// Why a secp256k1 recovery failed, as returned to the guest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode)]
pub enum EcdsaVerifyError {
    /// Malformed `r` or `s`.
    BadRS,
    /// Recovery id out of range.
    BadV,
    /// No public key matches the signature.
    BadSignature,
}

/// How strictly to parse the `r || s` part of a signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureParsing {
    /// Reduce overflowing scalars modulo the curve order.
    Overflowing,
    /// Reject overflowing scalars.
    Standard,
}

/// Recover the public key that produced a 65-byte `r || s || v` signature.
pub fn secp256k1_recover(
    signature: &[u8; 65],
    message: &[u8; 32],
    parsing: SignatureParsing,
) -> Result<libsecp256k1::PublicKey, EcdsaVerifyError> {
    let rs = match parsing {
        SignatureParsing::Overflowing => {
            libsecp256k1::Signature::parse_overflowing_slice(&signature[..64])
        }
        SignatureParsing::Standard => libsecp256k1::Signature::parse_standard_slice(&signature[..64]),
    }
    .map_err(|_| EcdsaVerifyError::BadRS)?;

    let v = signature[64];
    let v = if v > 26 { v - 27 } else { v };
    let recovery_id = libsecp256k1::RecoveryId::parse(v).map_err(|_| EcdsaVerifyError::BadV)?;

    let message = libsecp256k1::Message::parse(message);
    libsecp256k1::recover(&message, &rs, &recovery_id).map_err(|_| EcdsaVerifyError::BadSignature)
}

fn keystore(ctx: &mut dyn FunctionContext) -> Option<std::sync::Arc<dyn Keystore>> {
    ctx.context().keystore.clone()
}

fn public_keys(ctx: &mut dyn FunctionContext, args: &[Value], scheme: KeyScheme) -> HostResult {
    let key_type = read_array::<4>(ctx, args::u32(args, 0)?)?;
    let keys = keystore(ctx)
        .map(|keystore| keystore.public_keys(key_type, scheme))
        .unwrap_or_default();
    return_encoded(ctx, &keys)
}

fn generate(
    ctx: &mut dyn FunctionContext,
    args: &[Value],
    scheme: KeyScheme,
    name: &str,
) -> HostResult {
    let key_type = read_array::<4>(ctx, args::u32(args, 0)?)?;
    let seed: Option<Vec<u8>> = decode_arg(ctx, args, 1, name)?;
    let keystore = keystore(ctx).ok_or(HostError::MissingCapability {
        capability: "keystore",
    })?;

    let public = keystore
        .generate(key_type, scheme, seed.as_deref())
        .map_err(HostError::Keystore)?;
    debug!(function = name, public = %hex::encode(public), "Generated key");
    return_pointer(ctx, &public)
}

fn sign(ctx: &mut dyn FunctionContext, args: &[Value], scheme: KeyScheme) -> HostResult {
    let key_type = read_array::<4>(ctx, args::u32(args, 0)?)?;
    let public = read_array::<32>(ctx, args::u32(args, 1)?)?;
    let message = read_arg(ctx, args, 2)?;

    let signature = keystore(ctx)
        .and_then(|keystore| keystore.sign(key_type, scheme, &public, &message));
    return_encoded(ctx, &signature)
}

fn check(
    ctx: &mut dyn FunctionContext,
    args: &[Value],
    scheme: KeyScheme,
) -> Result<bool, HostError> {
    let signature = read_array::<64>(ctx, args::u32(args, 0)?)?;
    let message = read_arg(ctx, args, 1)?;
    let public = read_array::<32>(ctx, args::u32(args, 2)?)?;

    Ok(match scheme {
        KeyScheme::Ed25519 => ed25519_verify(&signature, &message, &public),
        KeyScheme::Sr25519 => sr25519_verify(&signature, &message, &public),
    })
}

fn verify(ctx: &mut dyn FunctionContext, args: &[Value], scheme: KeyScheme) -> HostResult {
    let valid = check(ctx, args, scheme)?;
    return_bool(valid)
}

/// Verify now; inside an open batch, record the outcome and report success.
fn batch_verify(ctx: &mut dyn FunctionContext, args: &[Value], scheme: KeyScheme) -> HostResult {
    let valid = check(ctx, args, scheme)?;
    match ctx.context().batch.as_mut() {
        Some(batch) => {
            batch.checked += 1;
            batch.all_valid &= valid;
            return_bool(true)
        }
        None => return_bool(valid),
    }
}

fn ed25519_public_keys(ctx: &mut dyn FunctionContext, args: &[Value]) -> HostResult {
    public_keys(ctx, args, KeyScheme::Ed25519)
}

fn ed25519_generate(ctx: &mut dyn FunctionContext, args: &[Value]) -> HostResult {
    generate(ctx, args, KeyScheme::Ed25519, "ext_crypto_ed25519_generate_version_1")
}

fn ed25519_sign_handler(ctx: &mut dyn FunctionContext, args: &[Value]) -> HostResult {
    sign(ctx, args, KeyScheme::Ed25519)
}

fn ed25519_verify_handler(ctx: &mut dyn FunctionContext, args: &[Value]) -> HostResult {
    verify(ctx, args, KeyScheme::Ed25519)
}

fn ed25519_batch_verify(ctx: &mut dyn FunctionContext, args: &[Value]) -> HostResult {
    batch_verify(ctx, args, KeyScheme::Ed25519)
}

fn sr25519_public_keys(ctx: &mut dyn FunctionContext, args: &[Value]) -> HostResult {
    public_keys(ctx, args, KeyScheme::Sr25519)
}

fn sr25519_generate(ctx: &mut dyn FunctionContext, args: &[Value]) -> HostResult {
    generate(ctx, args, KeyScheme::Sr25519, "ext_crypto_sr25519_generate_version_1")
}

fn sr25519_sign_handler(ctx: &mut dyn FunctionContext, args: &[Value]) -> HostResult {
    sign(ctx, args, KeyScheme::Sr25519)
}

fn sr25519_verify_handler(ctx: &mut dyn FunctionContext, args: &[Value]) -> HostResult {
    verify(ctx, args, KeyScheme::Sr25519)
}

fn sr25519_batch_verify(ctx: &mut dyn FunctionContext, args: &[Value]) -> HostResult {
    batch_verify(ctx, args, KeyScheme::Sr25519)
}

fn start_batch_verify(ctx: &mut dyn FunctionContext, _args: &[Value]) -> HostResult {
    ctx.context().batch = Some(BatchVerification {
        checked: 0,
        all_valid: true,
    });
    Ok(None)
}

fn finish_batch_verify(ctx: &mut dyn FunctionContext, _args: &[Value]) -> HostResult {
    let Some(batch) = ctx.context().batch.take() else {
        return Err(HostError::decode(
            "ext_crypto_finish_batch_verify_version_1",
            "no batch verification in progress",
        ));
    };
    debug!(checked = batch.checked, all_valid = batch.all_valid, "Finished batch verification");
    return_bool(batch.all_valid)
}

fn recover(
    ctx: &mut dyn FunctionContext,
    args: &[Value],
    parsing: SignatureParsing,
    compressed: bool,
) -> HostResult {
    let signature = read_array::<65>(ctx, args::u32(args, 0)?)?;
    let message = read_array::<32>(ctx, args::u32(args, 1)?)?;

    let recovered = secp256k1_recover(&signature, &message, parsing);
    let encoded = if compressed {
        recovered.map(|key| key.serialize_compressed()).encode()
    } else {
        // Drop the 0x04 tag of the uncompressed form.
        recovered
            .map(|key| {
                let mut raw = [0u8; 64];
                raw.copy_from_slice(&key.serialize()[1..]);
                raw
            })
            .encode()
    };
    return_span(ctx, &encoded)
}

fn secp256k1_recover_v1(ctx: &mut dyn FunctionContext, args: &[Value]) -> HostResult {
    recover(ctx, args, SignatureParsing::Overflowing, false)
}

fn secp256k1_recover_v2(ctx: &mut dyn FunctionContext, args: &[Value]) -> HostResult {
    recover(ctx, args, SignatureParsing::Standard, false)
}

fn secp256k1_recover_compressed_v1(ctx: &mut dyn FunctionContext, args: &[Value]) -> HostResult {
    recover(ctx, args, SignatureParsing::Overflowing, true)
}

fn secp256k1_recover_compressed_v2(ctx: &mut dyn FunctionContext, args: &[Value]) -> HostResult {
    recover(ctx, args, SignatureParsing::Standard, true)
}

fn ecdsa_public_keys(ctx: &mut dyn FunctionContext, _args: &[Value]) -> HostResult {
    return_encoded(ctx, &Vec::<[u8; 33]>::new())
}

fn ecdsa_generate(ctx: &mut dyn FunctionContext, _args: &[Value]) -> HostResult {
    return_pointer(ctx, &[0u8; 33])
}

fn ecdsa_sign(ctx: &mut dyn FunctionContext, _args: &[Value]) -> HostResult {
    return_encoded(ctx, &None::<[u8; 65]>)
}

fn ecdsa_verify(_ctx: &mut dyn FunctionContext, _args: &[Value]) -> HostResult {
    return_bool(false)
}

/// Crypto functions.
pub const FUNCTIONS: &[HostFunction] = &[
    HostFunction::new(
        "ext_crypto_ed25519_public_keys_version_1",
        &[I32],
        Some(I64),
        ed25519_public_keys,
    ),
    HostFunction::new(
        "ext_crypto_ed25519_generate_version_1",
        &[I32, I64],
        Some(I32),
        ed25519_generate,
    ),
    HostFunction::new(
        "ext_crypto_ed25519_sign_version_1",
        &[I32, I32, I64],
        Some(I64),
        ed25519_sign_handler,
    ),
    HostFunction::new(
        "ext_crypto_ed25519_verify_version_1",
        &[I32, I64, I32],
        Some(I32),
        ed25519_verify_handler,
    ),
    HostFunction::new(
        "ext_crypto_ed25519_batch_verify_version_1",
        &[I32, I64, I32],
        Some(I32),
        ed25519_batch_verify,
    ),
    HostFunction::new(
        "ext_crypto_sr25519_public_keys_version_1",
        &[I32],
        Some(I64),
        sr25519_public_keys,
    ),
    HostFunction::new(
        "ext_crypto_sr25519_generate_version_1",
        &[I32, I64],
        Some(I32),
        sr25519_generate,
    ),
    HostFunction::new(
        "ext_crypto_sr25519_sign_version_1",
        &[I32, I32, I64],
        Some(I64),
        sr25519_sign_handler,
    ),
    HostFunction::new(
        "ext_crypto_sr25519_verify_version_1",
        &[I32, I64, I32],
        Some(I32),
        sr25519_verify_handler,
    ),
    HostFunction::new(
        "ext_crypto_sr25519_verify_version_2",
        &[I32, I64, I32],
        Some(I32),
        sr25519_verify_handler,
    ),
    HostFunction::new(
        "ext_crypto_sr25519_batch_verify_version_1",
        &[I32, I64, I32],
        Some(I32),
        sr25519_batch_verify,
    ),
    HostFunction::new("ext_crypto_start_batch_verify_version_1", &[], None, start_batch_verify),
    HostFunction::new(
        "ext_crypto_finish_batch_verify_version_1",
        &[],
        Some(I32),
        finish_batch_verify,
    ),
    HostFunction::new(
        "ext_crypto_secp256k1_ecdsa_recover_version_1",
        &[I32, I32],
        Some(I64),
        secp256k1_recover_v1,
    ),
    HostFunction::new(
        "ext_crypto_secp256k1_ecdsa_recover_version_2",
        &[I32, I32],
        Some(I64),
        secp256k1_recover_v2,
    ),
    HostFunction::new(
        "ext_crypto_secp256k1_ecdsa_recover_compressed_version_1",
        &[I32, I32],
        Some(I64),
        secp256k1_recover_compressed_v1,
    ),
    HostFunction::new(
        "ext_crypto_secp256k1_ecdsa_recover_compressed_version_2",
        &[I32, I32],
        Some(I64),
        secp256k1_recover_compressed_v2,
    ),
    HostFunction::stub(
        "ext_crypto_ecdsa_public_keys_version_1",
        &[I32],
        Some(I64),
        ecdsa_public_keys,
    ),
    HostFunction::stub(
        "ext_crypto_ecdsa_generate_version_1",
        &[I32, I64],
        Some(I32),
        ecdsa_generate,
    ),
    HostFunction::stub("ext_crypto_ecdsa_sign_version_1", &[I32, I32, I64], Some(I64), ecdsa_sign),
    HostFunction::stub(
        "ext_crypto_ecdsa_verify_version_1",
        &[I32, I64, I32],
        Some(I32),
        ecdsa_verify,
    ),
];
