//! Offchain worker host functions.
//!
//! This module provides the functions available to offchain workers:
//! - Local and persistent node storage (`kind` 1 and 2)
//! - Offchain indexing into persistent storage during block import
//! - Transaction submission, validator role, network state
//! - Time and randomness
//!
//! HTTP requests are stubs: starting a request fails, and every request id
//! is reported as invalid.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use parity_scale_codec::{Decode, Encode};
use tracing::{debug, trace, warn};

use chainvm_common::HostError;
use chainvm_core::{
    FunctionContext, HostFunction, OffchainStorage, StorageKind, Value, ValueType, args,
};

use crate::codec::{HostResult, decode_arg, read_arg, return_bool, return_encoded, return_pointer};

const I32: ValueType = ValueType::I32;
const I64: ValueType = ValueType::I64;

/// Error of an HTTP request, as returned to the guest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode)]
pub enum HttpError {
    /// The deadline passed.
    #[codec(index = 0)]
    DeadlineReached,
    /// The connection failed.
    #[codec(index = 1)]
    IoError,
    /// The request id is unknown.
    #[codec(index = 2)]
    Invalid,
}

/// Status of an HTTP request, as returned to the guest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode)]
pub enum HttpRequestStatus {
    /// The deadline passed.
    #[codec(index = 0)]
    DeadlineReached,
    /// The connection failed.
    #[codec(index = 1)]
    IoError,
    /// The request id is unknown.
    #[codec(index = 2)]
    Invalid,
    /// The response arrived with this status code.
    #[codec(index = 3)]
    Finished(u16),
}

/// Milliseconds since the Unix epoch.
pub fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or_default()
}

/// The node store addressed by the numeric `kind` argument at `index`.
fn node_storage(
    ctx: &mut dyn FunctionContext,
    args: &[Value],
    index: usize,
    function: &str,
) -> Result<Arc<dyn OffchainStorage>, HostError> {
    let raw = args::u32(args, index)?;
    let kind = StorageKind::from_u32(raw)
        .ok_or_else(|| HostError::decode(function, format!("unknown storage kind {raw}")))?;

    ctx.context()
        .node_storage
        .get(kind)
        .cloned()
        .ok_or(HostError::MissingCapability {
            capability: "node storage",
        })
}

fn local_storage_set(ctx: &mut dyn FunctionContext, args: &[Value]) -> HostResult {
    let store = node_storage(ctx, args, 0, "ext_offchain_local_storage_set_version_1")?;
    let key = read_arg(ctx, args, 1)?;
    let value = read_arg(ctx, args, 2)?;
    store.set(&key, &value);
    Ok(None)
}

fn local_storage_clear(ctx: &mut dyn FunctionContext, args: &[Value]) -> HostResult {
    let store = node_storage(ctx, args, 0, "ext_offchain_local_storage_clear_version_1")?;
    let key = read_arg(ctx, args, 1)?;
    store.clear(&key);
    Ok(None)
}

fn local_storage_compare_and_set(ctx: &mut dyn FunctionContext, args: &[Value]) -> HostResult {
    const NAME: &str = "ext_offchain_local_storage_compare_and_set_version_1";
    let store = node_storage(ctx, args, 0, NAME)?;
    let key = read_arg(ctx, args, 1)?;
    let old: Option<Vec<u8>> = decode_arg(ctx, args, 2, NAME)?;
    let new = read_arg(ctx, args, 3)?;
    return_bool(store.compare_and_set(&key, old.as_deref(), &new))
}

fn local_storage_get(ctx: &mut dyn FunctionContext, args: &[Value]) -> HostResult {
    let store = node_storage(ctx, args, 0, "ext_offchain_local_storage_get_version_1")?;
    let key = read_arg(ctx, args, 1)?;
    let value = store.get(&key);
    return_encoded(ctx, &value)
}

fn index_set(ctx: &mut dyn FunctionContext, args: &[Value]) -> HostResult {
    let key = read_arg(ctx, args, 0)?;
    let value = read_arg(ctx, args, 1)?;
    match ctx.context().node_storage.persistent.as_ref() {
        Some(store) => store.set(&key, &value),
        None => trace!(key = %hex::encode(&key), "Offchain indexing disabled, dropping write"),
    }
    Ok(None)
}

fn index_clear(ctx: &mut dyn FunctionContext, args: &[Value]) -> HostResult {
    let key = read_arg(ctx, args, 0)?;
    if let Some(store) = ctx.context().node_storage.persistent.as_ref() {
        store.clear(&key);
    }
    Ok(None)
}

fn is_validator(ctx: &mut dyn FunctionContext, _args: &[Value]) -> HostResult {
    return_bool(ctx.context().validator)
}

fn submit_transaction(ctx: &mut dyn FunctionContext, args: &[Value]) -> HostResult {
    let extrinsic = read_arg(ctx, args, 0)?;
    let len = extrinsic.len();

    let accepted = match ctx.context().transaction_state.clone() {
        Some(pool) => pool.submit(extrinsic),
        None => {
            warn!("No transaction pool, dropping submitted transaction");
            false
        }
    };
    debug!(len, accepted, "Transaction submitted from the runtime");

    let result: Result<(), ()> = if accepted { Ok(()) } else { Err(()) };
    return_encoded(ctx, &result)
}

fn network_state(ctx: &mut dyn FunctionContext, _args: &[Value]) -> HostResult {
    let result: Result<(Vec<u8>, Vec<Vec<u8>>), ()> = match ctx.context().network.clone() {
        Some(network) => {
            let state = network.network_state();
            Ok((state.peer_id, state.external_addresses))
        }
        None => Err(()),
    };
    return_encoded(ctx, &result)
}

#[allow(clippy::cast_possible_wrap)]
fn timestamp(_ctx: &mut dyn FunctionContext, _args: &[Value]) -> HostResult {
    Ok(Some(Value::I64(unix_millis() as i64)))
}

fn sleep_until(_ctx: &mut dyn FunctionContext, _args: &[Value]) -> HostResult {
    Ok(None)
}

fn random_seed(ctx: &mut dyn FunctionContext, _args: &[Value]) -> HostResult {
    let seed: [u8; 32] = rand::random();
    return_pointer(ctx, &seed)
}

fn http_request_start(ctx: &mut dyn FunctionContext, _args: &[Value]) -> HostResult {
    return_encoded(ctx, &Err::<u16, ()>(()))
}

fn http_request_add_header(ctx: &mut dyn FunctionContext, _args: &[Value]) -> HostResult {
    return_encoded(ctx, &Err::<(), ()>(()))
}

fn http_request_write_body(ctx: &mut dyn FunctionContext, _args: &[Value]) -> HostResult {
    return_encoded(ctx, &Err::<(), HttpError>(HttpError::Invalid))
}

fn http_response_wait(ctx: &mut dyn FunctionContext, args: &[Value]) -> HostResult {
    let ids: Vec<u16> = decode_arg(ctx, args, 0, "ext_offchain_http_response_wait_version_1")?;
    let statuses = vec![HttpRequestStatus::Invalid; ids.len()];
    return_encoded(ctx, &statuses)
}

fn http_response_headers(ctx: &mut dyn FunctionContext, _args: &[Value]) -> HostResult {
    return_encoded(ctx, &Vec::<(Vec<u8>, Vec<u8>)>::new())
}

fn http_response_read_body(ctx: &mut dyn FunctionContext, _args: &[Value]) -> HostResult {
    return_encoded(ctx, &Err::<u32, HttpError>(HttpError::Invalid))
}

/// Offchain functions.
pub const FUNCTIONS: &[HostFunction] = &[
    HostFunction::new(
        "ext_offchain_local_storage_set_version_1",
        &[I32, I64, I64],
        None,
        local_storage_set,
    ),
    HostFunction::new(
        "ext_offchain_local_storage_clear_version_1",
        &[I32, I64],
        None,
        local_storage_clear,
    ),
    HostFunction::new(
        "ext_offchain_local_storage_compare_and_set_version_1",
        &[I32, I64, I64, I64],
        Some(I32),
        local_storage_compare_and_set,
    ),
    HostFunction::new(
        "ext_offchain_local_storage_get_version_1",
        &[I32, I64],
        Some(I64),
        local_storage_get,
    ),
    HostFunction::new("ext_offchain_index_set_version_1", &[I64, I64], None, index_set),
    HostFunction::new("ext_offchain_index_clear_version_1", &[I64], None, index_clear),
    HostFunction::new("ext_offchain_is_validator_version_1", &[], Some(I32), is_validator),
    HostFunction::new(
        "ext_offchain_submit_transaction_version_1",
        &[I64],
        Some(I64),
        submit_transaction,
    ),
    HostFunction::new("ext_offchain_network_state_version_1", &[], Some(I64), network_state),
    HostFunction::new("ext_offchain_timestamp_version_1", &[], Some(I64), timestamp),
    HostFunction::new("ext_offchain_sleep_until_version_1", &[I64], None, sleep_until),
    HostFunction::new("ext_offchain_random_seed_version_1", &[], Some(I32), random_seed),
    HostFunction::stub(
        "ext_offchain_http_request_start_version_1",
        &[I64, I64, I64],
        Some(I64),
        http_request_start,
    ),
    HostFunction::stub(
        "ext_offchain_http_request_add_header_version_1",
        &[I32, I64, I64],
        Some(I64),
        http_request_add_header,
    ),
    HostFunction::stub(
        "ext_offchain_http_request_write_body_version_1",
        &[I32, I64, I64],
        Some(I64),
        http_request_write_body,
    ),
    HostFunction::stub(
        "ext_offchain_http_response_wait_version_1",
        &[I64, I64],
        Some(I64),
        http_response_wait,
    ),
    HostFunction::stub(
        "ext_offchain_http_response_headers_version_1",
        &[I32],
        Some(I64),
        http_response_headers,
    ),
    HostFunction::stub(
        "ext_offchain_http_response_read_body_version_1",
        &[I32, I64, I64],
        Some(I64),
        http_response_read_body,
    ),
];
