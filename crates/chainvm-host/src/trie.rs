//! Trie root host functions and the Merkle commitment they use.
//!
//! Roots are sorted-key binary Merkle roots:
//! - leaf = `H(0x00 || key_len_le32 || key || value)`
//! - node = `H(0x01 || left || right)`, an odd node is promoted unchanged
//! - the empty set hashes to 32 zero bytes
//!
//! The same commitment backs [`InMemoryStorage::root`](crate::InMemoryStorage).

use parity_scale_codec::{Compact, Encode};

use chainvm_core::{FunctionContext, HostFunction, Value, ValueType};

use crate::codec::{HostResult, decode_arg, return_pointer};
use crate::hashing::{blake2_256, keccak_256};

const I32: ValueType = ValueType::I32;
const I64: ValueType = ValueType::I64;

/// Domain separator for leaves.
const LEAF_PREFIX: u8 = 0x00;

/// Domain separator for internal nodes.
const INTERNAL_PREFIX: u8 = 0x01;

/// A 32-byte hash function.
pub type Hash256 = fn(&[u8]) -> [u8; 32];

/// Merkle root over `entries`, which must be sorted by key and unique.
pub fn merkle_root<'a>(
    entries: impl IntoIterator<Item = (&'a [u8], &'a [u8])>,
    hash: Hash256,
) -> [u8; 32] {
    let mut level: Vec<[u8; 32]> = entries
        .into_iter()
        .map(|(key, value)| hash_leaf(key, value, hash))
        .collect();

    if level.is_empty() {
        return [0; 32];
    }

    while level.len() > 1 {
        level = level
            .chunks(2)
            .map(|pair| match pair {
                [left, right] => hash_internal(left, right, hash),
                _ => pair[0],
            })
            .collect();
    }

    level[0]
}

/// Root over unsorted pairs; later duplicates win.
pub fn unordered_root(pairs: Vec<(Vec<u8>, Vec<u8>)>, hash: Hash256) -> [u8; 32] {
    let sorted: std::collections::BTreeMap<Vec<u8>, Vec<u8>> = pairs.into_iter().collect();
    merkle_root(sorted.iter().map(|(k, v)| (k.as_slice(), v.as_slice())), hash)
}

/// Root over values keyed by their compact-encoded position.
pub fn ordered_root(values: Vec<Vec<u8>>, hash: Hash256) -> [u8; 32] {
    let pairs = values
        .into_iter()
        .enumerate()
        .map(|(index, value)| (Compact(index as u32).encode(), value))
        .collect();
    unordered_root(pairs, hash)
}

fn hash_leaf(key: &[u8], value: &[u8], hash: Hash256) -> [u8; 32] {
    let key_len = (key.len() as u32).to_le_bytes();
    let mut data = Vec::with_capacity(1 + 4 + key.len() + value.len());
    data.push(LEAF_PREFIX);
    data.extend_from_slice(&key_len);
    data.extend_from_slice(key);
    data.extend_from_slice(value);
    hash(&data)
}

fn hash_internal(left: &[u8; 32], right: &[u8; 32], hash: Hash256) -> [u8; 32] {
    let mut data = [0u8; 1 + 32 + 32];
    data[0] = INTERNAL_PREFIX;
    data[1..33].copy_from_slice(left);
    data[33..65].copy_from_slice(right);
    hash(&data)
}

fn trie_root(ctx: &mut dyn FunctionContext, args: &[Value], name: &str, hash: Hash256) -> HostResult {
    let pairs: Vec<(Vec<u8>, Vec<u8>)> = decode_arg(ctx, args, 0, name)?;
    return_pointer(ctx, &unordered_root(pairs, hash))
}

fn trie_ordered_root(
    ctx: &mut dyn FunctionContext,
    args: &[Value],
    name: &str,
    hash: Hash256,
) -> HostResult {
    let values: Vec<Vec<u8>> = decode_arg(ctx, args, 0, name)?;
    return_pointer(ctx, &ordered_root(values, hash))
}

// The state version argument of the `_version_2` variants does not change the
// commitment, so both versions share a handler.

fn blake2_256_root(ctx: &mut dyn FunctionContext, args: &[Value]) -> HostResult {
    trie_root(ctx, args, "ext_trie_blake2_256_root", blake2_256)
}

fn blake2_256_ordered_root(ctx: &mut dyn FunctionContext, args: &[Value]) -> HostResult {
    trie_ordered_root(ctx, args, "ext_trie_blake2_256_ordered_root", blake2_256)
}

fn keccak_256_root(ctx: &mut dyn FunctionContext, args: &[Value]) -> HostResult {
    trie_root(ctx, args, "ext_trie_keccak_256_root", keccak_256)
}

fn keccak_256_ordered_root(ctx: &mut dyn FunctionContext, args: &[Value]) -> HostResult {
    trie_ordered_root(ctx, args, "ext_trie_keccak_256_ordered_root", keccak_256)
}

/// Trie functions.
pub const FUNCTIONS: &[HostFunction] = &[
    HostFunction::new("ext_trie_blake2_256_root_version_1", &[I64], Some(I32), blake2_256_root),
    HostFunction::new("ext_trie_blake2_256_root_version_2", &[I64, I32], Some(I32), blake2_256_root),
    HostFunction::new(
        "ext_trie_blake2_256_ordered_root_version_1",
        &[I64],
        Some(I32),
        blake2_256_ordered_root,
    ),
    HostFunction::new(
        "ext_trie_blake2_256_ordered_root_version_2",
        &[I64, I32],
        Some(I32),
        blake2_256_ordered_root,
    ),
    HostFunction::new("ext_trie_keccak_256_root_version_1", &[I64], Some(I32), keccak_256_root),
    HostFunction::new("ext_trie_keccak_256_root_version_2", &[I64, I32], Some(I32), keccak_256_root),
    HostFunction::new(
        "ext_trie_keccak_256_ordered_root_version_1",
        &[I64],
        Some(I32),
        keccak_256_ordered_root,
    ),
    HostFunction::new(
        "ext_trie_keccak_256_ordered_root_version_2",
        &[I64, I32],
        Some(I32),
        keccak_256_ordered_root,
    ),
];
