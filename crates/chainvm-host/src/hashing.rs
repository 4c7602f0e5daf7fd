//! Hashing host functions.
//!
//! Each function takes a data span and returns a pointer to a freshly
//! allocated buffer holding the fixed-size digest.

use std::hash::Hasher;

use sha2::{Digest, Sha256};
use tiny_keccak::{Hasher as _, Keccak};
use twox_hash::XxHash64;

use chainvm_core::{FunctionContext, HostFunction, Value, ValueType};

use crate::codec::{HostResult, read_arg, return_pointer};

const I32: ValueType = ValueType::I32;
const I64: ValueType = ValueType::I64;

/// BLAKE2b with a 128-bit output.
pub fn blake2_128(data: &[u8]) -> [u8; 16] {
    let mut out = [0; 16];
    out.copy_from_slice(blake2_rfc::blake2b::blake2b(16, &[], data).as_bytes());
    out
}

/// BLAKE2b with a 256-bit output.
pub fn blake2_256(data: &[u8]) -> [u8; 32] {
    let mut out = [0; 32];
    out.copy_from_slice(blake2_rfc::blake2b::blake2b(32, &[], data).as_bytes());
    out
}

/// Keccak with a 256-bit output.
pub fn keccak_256(data: &[u8]) -> [u8; 32] {
    let mut keccak = Keccak::v256();
    keccak.update(data);
    let mut out = [0; 32];
    keccak.finalize(&mut out);
    out
}

/// Keccak with a 512-bit output.
pub fn keccak_512(data: &[u8]) -> [u8; 64] {
    let mut keccak = Keccak::v512();
    keccak.update(data);
    let mut out = [0; 64];
    keccak.finalize(&mut out);
    out
}

/// SHA2 with a 256-bit output.
pub fn sha2_256(data: &[u8]) -> [u8; 32] {
    Sha256::digest(data).into()
}

/// xxHash64 with seeds `0..N`, concatenated little-endian.
pub fn twox<const N: usize>(data: &[u8]) -> Vec<u8> {
    (0..N as u64)
        .flat_map(|seed| {
            let mut hasher = XxHash64::with_seed(seed);
            hasher.write(data);
            hasher.finish().to_le_bytes()
        })
        .collect()
}

/// 64-bit xxHash.
pub fn twox_64(data: &[u8]) -> [u8; 8] {
    let mut out = [0; 8];
    out.copy_from_slice(&twox::<1>(data));
    out
}

/// 128-bit xxHash.
pub fn twox_128(data: &[u8]) -> [u8; 16] {
    let mut out = [0; 16];
    out.copy_from_slice(&twox::<2>(data));
    out
}

/// 256-bit xxHash.
pub fn twox_256(data: &[u8]) -> [u8; 32] {
    let mut out = [0; 32];
    out.copy_from_slice(&twox::<4>(data));
    out
}

fn hash_with(
    ctx: &mut dyn FunctionContext,
    args: &[Value],
    hash: impl FnOnce(&[u8]) -> Vec<u8>,
) -> HostResult {
    let data = read_arg(ctx, args, 0)?;
    return_pointer(ctx, &hash(&data))
}

fn ext_keccak_256(ctx: &mut dyn FunctionContext, args: &[Value]) -> HostResult {
    hash_with(ctx, args, |d| keccak_256(d).to_vec())
}

fn ext_keccak_512(ctx: &mut dyn FunctionContext, args: &[Value]) -> HostResult {
    hash_with(ctx, args, |d| keccak_512(d).to_vec())
}

fn ext_sha2_256(ctx: &mut dyn FunctionContext, args: &[Value]) -> HostResult {
    hash_with(ctx, args, |d| sha2_256(d).to_vec())
}

fn ext_blake2_128(ctx: &mut dyn FunctionContext, args: &[Value]) -> HostResult {
    hash_with(ctx, args, |d| blake2_128(d).to_vec())
}

fn ext_blake2_256(ctx: &mut dyn FunctionContext, args: &[Value]) -> HostResult {
    hash_with(ctx, args, |d| blake2_256(d).to_vec())
}

fn ext_twox_64(ctx: &mut dyn FunctionContext, args: &[Value]) -> HostResult {
    hash_with(ctx, args, twox::<1>)
}

fn ext_twox_128(ctx: &mut dyn FunctionContext, args: &[Value]) -> HostResult {
    hash_with(ctx, args, twox::<2>)
}

fn ext_twox_256(ctx: &mut dyn FunctionContext, args: &[Value]) -> HostResult {
    hash_with(ctx, args, twox::<4>)
}

/// Hashing functions.
pub const FUNCTIONS: &[HostFunction] = &[
    HostFunction::new("ext_hashing_keccak_256_version_1", &[I64], Some(I32), ext_keccak_256),
    HostFunction::new("ext_hashing_keccak_512_version_1", &[I64], Some(I32), ext_keccak_512),
    HostFunction::new("ext_hashing_sha2_256_version_1", &[I64], Some(I32), ext_sha2_256),
    HostFunction::new("ext_hashing_blake2_128_version_1", &[I64], Some(I32), ext_blake2_128),
    HostFunction::new("ext_hashing_blake2_256_version_1", &[I64], Some(I32), ext_blake2_256),
    HostFunction::new("ext_hashing_twox_64_version_1", &[I64], Some(I32), ext_twox_64),
    HostFunction::new("ext_hashing_twox_128_version_1", &[I64], Some(I32), ext_twox_128),
    HostFunction::new("ext_hashing_twox_256_version_1", &[I64], Some(I32), ext_twox_256),
];
