//! Default child storage host functions.
//!
//! A child trie lives inside the main storage under
//! `:child_storage:default:` followed by the compact-encoded length of the
//! child's storage key and the key itself. Item keys are appended to that
//! prefix, so every operation maps onto plain [`Storage`] calls. The length
//! keeps child `c` from covering the keys of child `cd`.

use chainvm_common::HostError;
use parity_scale_codec::{Compact, Encode};

use chainvm_core::{FunctionContext, HostFunction, Storage, Value, ValueType, args};

use crate::codec::{
    HostResult, KillStorageResult, decode_arg, read_arg, return_bool, return_encoded, return_span,
};
use crate::hashing::blake2_256;
use crate::storage::read_into;
use crate::trie::merkle_root;

const I32: ValueType = ValueType::I32;
const I64: ValueType = ValueType::I64;

/// Prefix shared by every default child trie.
pub const DEFAULT_CHILD_STORAGE_PREFIX: &[u8] = b":child_storage:default:";

/// Main-storage prefix of the child trie `storage_key`.
pub fn child_prefix(storage_key: &[u8]) -> Vec<u8> {
    let mut prefix = DEFAULT_CHILD_STORAGE_PREFIX.to_vec();
    Compact(storage_key.len() as u32).encode_to(&mut prefix);
    prefix.extend_from_slice(storage_key);
    prefix
}

fn child_key(storage_key: &[u8], key: &[u8]) -> Vec<u8> {
    let mut full = child_prefix(storage_key);
    full.extend_from_slice(key);
    full
}

/// Entries of one child trie, in key order, with the prefix removed.
pub fn child_entries(storage: &dyn Storage, storage_key: &[u8]) -> Vec<(Vec<u8>, Vec<u8>)> {
    let prefix = child_prefix(storage_key);
    let mut entries = Vec::new();

    if let Some(value) = storage.get(&prefix) {
        entries.push((Vec::new(), value));
    }

    let mut cursor = prefix.clone();
    while let Some(key) = storage.next_key(&cursor) {
        if !key.starts_with(&prefix) {
            break;
        }
        if let Some(value) = storage.get(&key) {
            entries.push((key[prefix.len()..].to_vec(), value));
        }
        cursor = key;
    }

    entries
}

/// Root of one child trie.
pub fn child_root(storage: &dyn Storage, storage_key: &[u8]) -> [u8; 32] {
    let entries = child_entries(storage, storage_key);
    merkle_root(
        entries.iter().map(|(k, v)| (k.as_slice(), v.as_slice())),
        blake2_256,
    )
}

fn storage(ctx: &mut dyn FunctionContext) -> Result<&mut (dyn Storage + 'static), HostError> {
    ctx.context().storage_mut()
}

/// Child storage key and item key from the first two arguments.
fn keys(ctx: &mut dyn FunctionContext, args: &[Value]) -> Result<(Vec<u8>, Vec<u8>), HostError> {
    let storage_key = read_arg(ctx, args, 0)?;
    let key = read_arg(ctx, args, 1)?;
    let full = child_key(&storage_key, &key);
    Ok((storage_key, full))
}

fn get(ctx: &mut dyn FunctionContext, args: &[Value]) -> HostResult {
    let (_, key) = keys(ctx, args)?;
    let value = storage(ctx)?.get(&key);
    return_encoded(ctx, &value)
}

fn read(ctx: &mut dyn FunctionContext, args: &[Value]) -> HostResult {
    let (_, key) = keys(ctx, args)?;
    let out = args::span(args, 2)?;
    let offset = args::u32(args, 3)?;
    let value = storage(ctx)?.get(&key);
    read_into(ctx, value, out, offset)
}

fn set(ctx: &mut dyn FunctionContext, args: &[Value]) -> HostResult {
    let (_, key) = keys(ctx, args)?;
    let value = read_arg(ctx, args, 2)?;
    storage(ctx)?.set(&key, &value);
    Ok(None)
}

fn clear(ctx: &mut dyn FunctionContext, args: &[Value]) -> HostResult {
    let (_, key) = keys(ctx, args)?;
    storage(ctx)?.clear(&key);
    Ok(None)
}

fn exists(ctx: &mut dyn FunctionContext, args: &[Value]) -> HostResult {
    let (_, key) = keys(ctx, args)?;
    let found = storage(ctx)?.exists(&key);
    return_bool(found)
}

fn kill(
    ctx: &mut dyn FunctionContext,
    args: &[Value],
    limit: Option<u32>,
) -> Result<(u32, bool), HostError> {
    let storage_key = read_arg(ctx, args, 0)?;
    Ok(storage(ctx)?.clear_prefix(&child_prefix(&storage_key), limit))
}

fn storage_kill_v1(ctx: &mut dyn FunctionContext, args: &[Value]) -> HostResult {
    kill(ctx, args, None)?;
    Ok(None)
}

fn storage_kill_v2(ctx: &mut dyn FunctionContext, args: &[Value]) -> HostResult {
    let limit: Option<u32> =
        decode_arg(ctx, args, 1, "ext_default_child_storage_storage_kill_version_2")?;
    let (_, all_removed) = kill(ctx, args, limit)?;
    return_bool(all_removed)
}

fn storage_kill_v3(ctx: &mut dyn FunctionContext, args: &[Value]) -> HostResult {
    let limit: Option<u32> =
        decode_arg(ctx, args, 1, "ext_default_child_storage_storage_kill_version_3")?;
    let (removed, all_removed) = kill(ctx, args, limit)?;
    return_encoded(ctx, &KillStorageResult::new(removed, all_removed))
}

fn clear_prefix(
    ctx: &mut dyn FunctionContext,
    args: &[Value],
    limit: Option<u32>,
) -> Result<(u32, bool), HostError> {
    let (_, prefix) = keys(ctx, args)?;
    Ok(storage(ctx)?.clear_prefix(&prefix, limit))
}

fn clear_prefix_v1(ctx: &mut dyn FunctionContext, args: &[Value]) -> HostResult {
    clear_prefix(ctx, args, None)?;
    Ok(None)
}

fn clear_prefix_v2(ctx: &mut dyn FunctionContext, args: &[Value]) -> HostResult {
    let limit: Option<u32> =
        decode_arg(ctx, args, 2, "ext_default_child_storage_clear_prefix_version_2")?;
    let (removed, all_removed) = clear_prefix(ctx, args, limit)?;
    return_encoded(ctx, &KillStorageResult::new(removed, all_removed))
}

fn root(ctx: &mut dyn FunctionContext, args: &[Value]) -> HostResult {
    let storage_key = read_arg(ctx, args, 0)?;
    let root = child_root(storage(ctx)?, &storage_key);
    return_span(ctx, &root)
}

fn next_key(ctx: &mut dyn FunctionContext, args: &[Value]) -> HostResult {
    let (storage_key, key) = keys(ctx, args)?;
    let prefix = child_prefix(&storage_key);
    let next = storage(ctx)?
        .next_key(&key)
        .filter(|next| next.starts_with(&prefix))
        .map(|next| next[prefix.len()..].to_vec());
    return_encoded(ctx, &next)
}

/// Default child storage functions.
pub const FUNCTIONS: &[HostFunction] = &[
    HostFunction::new("ext_default_child_storage_get_version_1", &[I64, I64], Some(I64), get),
    HostFunction::new(
        "ext_default_child_storage_read_version_1",
        &[I64, I64, I64, I32],
        Some(I64),
        read,
    ),
    HostFunction::new("ext_default_child_storage_set_version_1", &[I64, I64, I64], None, set),
    HostFunction::new("ext_default_child_storage_clear_version_1", &[I64, I64], None, clear),
    HostFunction::new(
        "ext_default_child_storage_storage_kill_version_1",
        &[I64],
        None,
        storage_kill_v1,
    ),
    HostFunction::new(
        "ext_default_child_storage_storage_kill_version_2",
        &[I64, I64],
        Some(I32),
        storage_kill_v2,
    ),
    HostFunction::new(
        "ext_default_child_storage_storage_kill_version_3",
        &[I64, I64],
        Some(I64),
        storage_kill_v3,
    ),
    HostFunction::new(
        "ext_default_child_storage_exists_version_1",
        &[I64, I64],
        Some(I32),
        exists,
    ),
    HostFunction::new(
        "ext_default_child_storage_clear_prefix_version_1",
        &[I64, I64],
        None,
        clear_prefix_v1,
    ),
    HostFunction::new(
        "ext_default_child_storage_clear_prefix_version_2",
        &[I64, I64, I64],
        Some(I64),
        clear_prefix_v2,
    ),
    HostFunction::new("ext_default_child_storage_root_version_1", &[I64], Some(I64), root),
    HostFunction::new("ext_default_child_storage_root_version_2", &[I64, I32], Some(I64), root),
    HostFunction::new(
        "ext_default_child_storage_next_key_version_1",
        &[I64, I64],
        Some(I64),
        next_key,
    ),
];
