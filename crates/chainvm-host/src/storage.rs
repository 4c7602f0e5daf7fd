//! Storage host functions.
//!
//! Every function works against [`Context::storage`](chainvm_core::Context);
//! calling one before a storage backend is installed fails with
//! `MissingCapability`.

use parity_scale_codec::{Compact, Decode, Encode};

use chainvm_common::{HostError, Span};
use chainvm_core::{FunctionContext, HostFunction, Storage, Value, ValueType, args};

use crate::codec::{
    HostResult, KillStorageResult, decode_arg, read_arg, return_bool, return_encoded, return_span,
};

const I32: ValueType = ValueType::I32;
const I64: ValueType = ValueType::I64;

/// Copy `value[offset..]` into the guest's `out` buffer, truncated to fit.
///
/// Returns the SCALE-encoded `Option<u32>` holding the number of bytes left
/// in the value after `offset`, or `None` if the key is absent.
pub(crate) fn read_into(
    ctx: &mut dyn FunctionContext,
    value: Option<Vec<u8>>,
    out: Span,
    offset: u32,
) -> HostResult {
    let Some(value) = value else {
        return return_encoded(ctx, &None::<u32>);
    };

    let start = (offset as usize).min(value.len());
    let remaining = &value[start..];
    let written = remaining.len().min(out.len as usize);
    ctx.write(out.ptr, &remaining[..written])?;

    return_encoded(ctx, &Some(remaining.len() as u32))
}

/// Append one encoded item to a SCALE `Vec` value.
///
/// A missing or undecodable existing value is replaced by a one-item vector.
pub(crate) fn append_item(existing: Option<Vec<u8>>, item: &[u8]) -> Vec<u8> {
    let restart = || {
        let mut fresh = Compact(1u32).encode();
        fresh.extend_from_slice(item);
        fresh
    };

    let Some(existing) = existing else {
        return restart();
    };

    let mut input = existing.as_slice();
    let Ok(Compact(len)) = Compact::<u32>::decode(&mut input) else {
        return restart();
    };
    let Some(new_len) = len.checked_add(1) else {
        return restart();
    };

    let mut out = Compact(new_len).encode();
    out.extend_from_slice(input);
    out.extend_from_slice(item);
    out
}

fn storage(ctx: &mut dyn FunctionContext) -> Result<&mut (dyn Storage + 'static), HostError> {
    ctx.context().storage_mut()
}

fn set(ctx: &mut dyn FunctionContext, args: &[Value]) -> HostResult {
    let key = read_arg(ctx, args, 0)?;
    let value = read_arg(ctx, args, 1)?;
    storage(ctx)?.set(&key, &value);
    Ok(None)
}

fn get(ctx: &mut dyn FunctionContext, args: &[Value]) -> HostResult {
    let key = read_arg(ctx, args, 0)?;
    let value = storage(ctx)?.get(&key);
    return_encoded(ctx, &value)
}

fn read(ctx: &mut dyn FunctionContext, args: &[Value]) -> HostResult {
    let key = read_arg(ctx, args, 0)?;
    let out = args::span(args, 1)?;
    let offset = args::u32(args, 2)?;
    let value = storage(ctx)?.get(&key);
    read_into(ctx, value, out, offset)
}

fn clear(ctx: &mut dyn FunctionContext, args: &[Value]) -> HostResult {
    let key = read_arg(ctx, args, 0)?;
    storage(ctx)?.clear(&key);
    Ok(None)
}

fn exists(ctx: &mut dyn FunctionContext, args: &[Value]) -> HostResult {
    let key = read_arg(ctx, args, 0)?;
    let found = storage(ctx)?.exists(&key);
    return_bool(found)
}

fn clear_prefix_v1(ctx: &mut dyn FunctionContext, args: &[Value]) -> HostResult {
    let prefix = read_arg(ctx, args, 0)?;
    storage(ctx)?.clear_prefix(&prefix, None);
    Ok(None)
}

fn clear_prefix_v2(ctx: &mut dyn FunctionContext, args: &[Value]) -> HostResult {
    let prefix = read_arg(ctx, args, 0)?;
    let limit: Option<u32> = decode_arg(ctx, args, 1, "ext_storage_clear_prefix_version_2")?;
    let (removed, all_removed) = storage(ctx)?.clear_prefix(&prefix, limit);
    return_encoded(ctx, &KillStorageResult::new(removed, all_removed))
}

fn root(ctx: &mut dyn FunctionContext, _args: &[Value]) -> HostResult {
    let root = storage(ctx)?.root();
    return_span(ctx, &root)
}

fn changes_root(ctx: &mut dyn FunctionContext, _args: &[Value]) -> HostResult {
    // Changes tries are not maintained.
    return_encoded(ctx, &None::<Vec<u8>>)
}

fn next_key(ctx: &mut dyn FunctionContext, args: &[Value]) -> HostResult {
    let key = read_arg(ctx, args, 0)?;
    let next = storage(ctx)?.next_key(&key);
    return_encoded(ctx, &next)
}

fn append(ctx: &mut dyn FunctionContext, args: &[Value]) -> HostResult {
    let key = read_arg(ctx, args, 0)?;
    let item = read_arg(ctx, args, 1)?;
    let storage = storage(ctx)?;
    let value = append_item(storage.get(&key), &item);
    storage.set(&key, &value);
    Ok(None)
}

fn start_transaction(ctx: &mut dyn FunctionContext, _args: &[Value]) -> HostResult {
    storage(ctx)?.start_transaction();
    Ok(None)
}

fn commit_transaction(ctx: &mut dyn FunctionContext, _args: &[Value]) -> HostResult {
    storage(ctx)?.commit_transaction()?;
    Ok(None)
}

fn rollback_transaction(ctx: &mut dyn FunctionContext, _args: &[Value]) -> HostResult {
    storage(ctx)?.rollback_transaction()?;
    Ok(None)
}

/// Storage functions.
pub const FUNCTIONS: &[HostFunction] = &[
    HostFunction::new("ext_storage_set_version_1", &[I64, I64], None, set),
    HostFunction::new("ext_storage_get_version_1", &[I64], Some(I64), get),
    HostFunction::new("ext_storage_read_version_1", &[I64, I64, I32], Some(I64), read),
    HostFunction::new("ext_storage_clear_version_1", &[I64], None, clear),
    HostFunction::new("ext_storage_exists_version_1", &[I64], Some(I32), exists),
    HostFunction::new("ext_storage_clear_prefix_version_1", &[I64], None, clear_prefix_v1),
    HostFunction::new(
        "ext_storage_clear_prefix_version_2",
        &[I64, I64],
        Some(I64),
        clear_prefix_v2,
    ),
    HostFunction::new("ext_storage_root_version_1", &[], Some(I64), root),
    HostFunction::new("ext_storage_root_version_2", &[I32], Some(I64), root),
    HostFunction::new("ext_storage_changes_root_version_1", &[I64], Some(I64), changes_root),
    HostFunction::new("ext_storage_next_key_version_1", &[I64], Some(I64), next_key),
    HostFunction::new("ext_storage_append_version_1", &[I64, I64], None, append),
    HostFunction::new(
        "ext_storage_start_transaction_version_1",
        &[],
        None,
        start_transaction,
    ),
    HostFunction::new(
        "ext_storage_commit_transaction_version_1",
        &[],
        None,
        commit_transaction,
    ),
    HostFunction::new(
        "ext_storage_rollback_transaction_version_1",
        &[],
        None,
        rollback_transaction,
    ),
];
