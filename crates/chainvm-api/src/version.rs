//! Runtime version decoding.
//!
//! The `Core_version` result is laid out as:
//!
//! ```text
//! [spec_name: compact len + bytes][impl_name: compact len + bytes]
//! [authoring_version: u32][spec_version: u32][impl_version: u32]
//! [api count: compact][count x (id: 8 bytes, version: u32)]
//! [transaction_version: u32, optional]
//! ```
//!
//! The two names are variable length, so every later field is located by a
//! running offset rather than a fixed position.

use parity_scale_codec::{Compact, Decode, Encode};

use chainvm_common::RuntimeError;

use crate::types::{ApiVersion, VersionApi};

/// Size of one `(id, version)` record.
const API_RECORD_LEN: usize = 12;

/// Decode a `Core_version` result.
///
/// # Errors
///
/// Returns [`RuntimeError::Decode`] if the buffer is truncated, a name is
/// not UTF-8, or the API count exceeds the remaining bytes.
pub fn decode_version(bytes: &[u8]) -> Result<VersionApi, RuntimeError> {
    let mut reader = Reader { bytes, offset: 0 };

    let spec_name = reader.string("spec_name")?;
    let impl_name = reader.string("impl_name")?;
    let authoring_version = reader.u32("authoring_version")?;
    let spec_version = reader.u32("spec_version")?;
    let impl_version = reader.u32("impl_version")?;

    let count = reader.compact("api count")? as usize;
    if count > reader.remaining() / API_RECORD_LEN {
        return Err(RuntimeError::decode(format!(
            "version: {count} apis do not fit in {} bytes",
            reader.remaining()
        )));
    }

    let mut apis = Vec::with_capacity(count);
    for _ in 0..count {
        let mut id = [0u8; 8];
        id.copy_from_slice(reader.take(8, "api id")?);
        let version = reader.u32("api version")?;
        apis.push(ApiVersion { id, version });
    }

    let transaction_version = if reader.remaining() >= 4 {
        Some(reader.u32("transaction_version")?)
    } else {
        None
    };

    Ok(VersionApi {
        spec_name,
        impl_name,
        authoring_version,
        spec_version,
        impl_version,
        apis,
        transaction_version,
    })
}

impl VersionApi {
    /// Encode in the `Core_version` layout.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        self.spec_name.encode_to(&mut out);
        self.impl_name.encode_to(&mut out);
        self.authoring_version.encode_to(&mut out);
        self.spec_version.encode_to(&mut out);
        self.impl_version.encode_to(&mut out);
        Compact(self.apis.len() as u32).encode_to(&mut out);
        for api in &self.apis {
            out.extend_from_slice(&api.id);
            api.version.encode_to(&mut out);
        }
        if let Some(version) = self.transaction_version {
            version.encode_to(&mut out);
        }
        out
    }
}

struct Reader<'a> {
    bytes: &'a [u8],
    offset: usize,
}

impl<'a> Reader<'a> {
    fn remaining(&self) -> usize {
        self.bytes.len() - self.offset
    }

    fn take(&mut self, len: usize, field: &str) -> Result<&'a [u8], RuntimeError> {
        if len > self.remaining() {
            return Err(RuntimeError::decode(format!(
                "version: {field} needs {len} bytes at offset {}, {} left",
                self.offset,
                self.remaining()
            )));
        }
        let slice = &self.bytes[self.offset..self.offset + len];
        self.offset += len;
        Ok(slice)
    }

    fn u32(&mut self, field: &str) -> Result<u32, RuntimeError> {
        let mut word = [0u8; 4];
        word.copy_from_slice(self.take(4, field)?);
        Ok(u32::from_le_bytes(word))
    }

    fn compact(&mut self, field: &str) -> Result<u32, RuntimeError> {
        let mut input = &self.bytes[self.offset..];
        let Compact(value) = Compact::<u32>::decode(&mut input).map_err(|e| {
            RuntimeError::decode(format!("version: {field} at offset {}: {e}", self.offset))
        })?;
        self.offset = self.bytes.len() - input.len();
        Ok(value)
    }

    fn string(&mut self, field: &str) -> Result<String, RuntimeError> {
        let len = self.compact(field)? as usize;
        let raw = self.take(len, field)?;
        String::from_utf8(raw.to_vec())
            .map_err(|_| RuntimeError::decode(format!("version: {field} is not UTF-8")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> VersionApi {
        VersionApi {
            spec_name: "node-template".to_string(),
            impl_name: "chainvm-test".to_string(),
            authoring_version: 1,
            spec_version: 100,
            impl_version: 2,
            apis: vec![
                ApiVersion {
                    id: [0xdf, 0x6a, 0xcb, 0x68, 0x99, 0x07, 0x60, 0x9b],
                    version: 4,
                },
                ApiVersion {
                    id: [0x37, 0xe3, 0x97, 0xfc, 0x7c, 0x91, 0xf5, 0xe4],
                    version: 1,
                },
            ],
            transaction_version: Some(1),
        }
    }

    #[test]
    fn test_decode_version() {
        let version = sample();
        assert_eq!(decode_version(&version.to_bytes()).unwrap(), version);
    }

    #[test]
    fn test_offsets_follow_name_lengths() {
        let mut version = sample();
        version.spec_name = "x".repeat(100);
        version.impl_name = String::new();

        let bytes = version.to_bytes();
        // Two-byte compact prefix for a 100-byte name.
        assert_eq!(&bytes[..2], &[0x91, 0x01]);
        assert_eq!(decode_version(&bytes).unwrap(), version);
    }

    #[test]
    fn test_transaction_version_is_optional() {
        let mut version = sample();
        version.transaction_version = None;

        let decoded = decode_version(&version.to_bytes()).unwrap();
        assert_eq!(decoded.transaction_version, None);
        assert_eq!(decoded.apis.len(), 2);
    }

    #[test]
    fn test_truncated_buffer() {
        let bytes = sample().to_bytes();

        // Cut inside the second api record.
        let cut = bytes.len() - 4 - 6;
        let err = decode_version(&bytes[..cut]).unwrap_err();
        assert!(matches!(err, RuntimeError::Decode { .. }));

        assert!(decode_version(&[]).is_err());
    }

    #[test]
    fn test_api_count_larger_than_buffer() {
        let mut version = sample();
        version.apis.clear();
        version.transaction_version = None;

        let mut bytes = version.to_bytes();
        bytes.pop();
        Compact(1_000_000u32).encode_to(&mut bytes);

        let err = decode_version(&bytes).unwrap_err();
        assert!(err.to_string().contains("do not fit"), "{err}");
    }

    #[test]
    fn test_invalid_utf8_name() {
        let mut bytes = Vec::new();
        vec![0xffu8, 0xfe].encode_to(&mut bytes);

        let err = decode_version(&bytes).unwrap_err();
        assert!(err.to_string().contains("spec_name"), "{err}");
    }
}
