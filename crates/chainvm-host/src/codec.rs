//! Argument decoding and result encoding shared by the host functions.
//!
//! Buffers crossing the boundary are SCALE encoded. Handlers read their span
//! arguments through these helpers and hand results back either as a span
//! (`i64`) or, for fixed-size outputs, as a bare pointer (`i32`).

use parity_scale_codec::{Decode, Encode};

use chainvm_common::HostError;
use chainvm_core::{FunctionContext, Value, args};

/// Result type of every handler.
pub(crate) type HostResult = Result<Option<Value>, HostError>;

/// Bytes of the span argument at `index`.
pub(crate) fn read_arg(
    ctx: &mut dyn FunctionContext,
    arguments: &[Value],
    index: usize,
) -> Result<Vec<u8>, HostError> {
    let span = args::span(arguments, index)?;
    ctx.read_span(span)
}

/// SCALE-decode the span argument at `index`.
pub(crate) fn decode_arg<T: Decode>(
    ctx: &mut dyn FunctionContext,
    arguments: &[Value],
    index: usize,
    function: &str,
) -> Result<T, HostError> {
    let bytes = read_arg(ctx, arguments, index)?;
    decode_all(&bytes, function)
}

/// SCALE-decode `bytes` as a whole.
pub(crate) fn decode_all<T: Decode>(bytes: &[u8], function: &str) -> Result<T, HostError> {
    let mut input = bytes;
    let value = T::decode(&mut input).map_err(|e| HostError::decode(function, e.to_string()))?;
    if !input.is_empty() {
        return Err(HostError::decode(
            function,
            format!("{} trailing bytes", input.len()),
        ));
    }
    Ok(value)
}

/// The span argument at `index` as UTF-8.
pub(crate) fn read_str(
    ctx: &mut dyn FunctionContext,
    arguments: &[Value],
    index: usize,
    function: &str,
) -> Result<String, HostError> {
    let bytes = read_arg(ctx, arguments, index)?;
    String::from_utf8(bytes).map_err(|_| HostError::Utf8 {
        function: function.to_string(),
    })
}

/// Copy `bytes` into a new heap buffer and return its span.
pub(crate) fn return_span(ctx: &mut dyn FunctionContext, bytes: &[u8]) -> HostResult {
    let span = ctx.write_span(bytes)?;
    Ok(Some(Value::from_span(span)))
}

/// SCALE-encode `value` into a new heap buffer and return its span.
pub(crate) fn return_encoded<T: Encode>(ctx: &mut dyn FunctionContext, value: &T) -> HostResult {
    return_span(ctx, &value.encode())
}

/// Copy `bytes` into a new heap buffer and return its pointer.
pub(crate) fn return_pointer(ctx: &mut dyn FunctionContext, bytes: &[u8]) -> HostResult {
    let ptr = ctx.write_pointer(bytes)?;
    Ok(Some(Value::from_u32(ptr)))
}

/// Return a boolean as `i32`.
#[allow(clippy::unnecessary_wraps)]
pub(crate) fn return_bool(value: bool) -> HostResult {
    Ok(Some(Value::I32(i32::from(value))))
}

/// Return a plain `u32` as `i32`.
#[allow(clippy::unnecessary_wraps)]
pub(crate) fn return_u32(value: u32) -> HostResult {
    Ok(Some(Value::from_u32(value)))
}

/// Result of killing a set of keys, as returned to the guest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode)]
pub(crate) enum KillStorageResult {
    /// No key is left.
    #[codec(index = 0)]
    AllRemoved(u32),
    /// Keys remain because the limit was reached.
    #[codec(index = 1)]
    SomeRemaining(u32),
}

impl KillStorageResult {
    pub(crate) fn new(removed: u32, all_removed: bool) -> Self {
        if all_removed {
            Self::AllRemoved(removed)
        } else {
            Self::SomeRemaining(removed)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chainvm_common::Span;
    use chainvm_core::{Context, MemoryContext};

    #[test]
    fn test_decode_arg() {
        let mut ctx = MemoryContext::new(1, 1024, Context::default());
        let encoded = Some(vec![1u8, 2, 3]).encode();
        ctx.write(64, &encoded).unwrap();
        let args = [Value::from_span(Span::new(64, encoded.len() as u32))];

        let value: Option<Vec<u8>> = decode_arg(&mut ctx, &args, 0, "test").unwrap();
        assert_eq!(value, Some(vec![1, 2, 3]));
    }

    #[test]
    fn test_decode_rejects_trailing_bytes() {
        let result: Result<u8, _> = decode_all(&[1, 2], "test");
        assert!(matches!(result, Err(HostError::Decode { .. })));
    }

    #[test]
    fn test_optional_span_round_trip() {
        let mut ctx = MemoryContext::new(1, 1024, Context::default());

        for value in [None, Some(Vec::new()), Some(b"value".to_vec())] {
            let Some(Value::I64(packed)) = return_encoded(&mut ctx, &value).unwrap() else {
                panic!("expected a span");
            };
            let bytes = ctx.read_span(Span::from_packed(packed)).unwrap();
            let decoded: Option<Vec<u8>> = decode_all(&bytes, "test").unwrap();
            assert_eq!(decoded, value);
        }
    }

    #[test]
    fn test_read_str_rejects_invalid_utf8() {
        let mut ctx = MemoryContext::new(1, 1024, Context::default());
        ctx.write(0, &[0xff, 0xfe]).unwrap();
        let args = [Value::from_span(Span::new(0, 2))];

        assert_eq!(
            read_str(&mut ctx, &args, 0, "ext_misc_print_utf8_version_1"),
            Err(HostError::Utf8 {
                function: "ext_misc_print_utf8_version_1".into()
            })
        );
    }

    #[test]
    fn test_kill_storage_result_encoding() {
        assert_eq!(KillStorageResult::new(3, true).encode(), vec![0, 3, 0, 0, 0]);
        assert_eq!(KillStorageResult::new(2, false).encode(), vec![1, 2, 0, 0, 0]);
    }
}
