//! Runtime code loading and compilation.
//!
//! This module provides:
//! - [`RuntimeCode`]: The raw Wasm bytes of a runtime plus a content hash
//! - [`CompiledModule`]: The same code compiled for one engine backend
//! - [`custom_section`]: Lookup of a named custom section in a Wasm binary

use std::hash::{DefaultHasher, Hash, Hasher};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info, instrument};

use chainvm_common::RuntimeError;

use crate::engine::{EngineKind, WasmEngine};

/// Raw runtime code.
///
/// Cloning is cheap; the bytes are shared.
#[derive(Clone)]
pub struct RuntimeCode {
    bytes: Arc<[u8]>,
    content_hash: String,
}

impl RuntimeCode {
    /// Wrap Wasm bytes after checking the header.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::CompilationFailed`] if the bytes do not start
    /// with the Wasm magic number.
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Result<Self, RuntimeError> {
        let bytes = bytes.into();
        validate_wasm_header(&bytes)?;
        let content_hash = compute_hash(&bytes);

        Ok(Self {
            bytes: bytes.into(),
            content_hash,
        })
    }

    /// Read runtime code from a file.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::Io`] if the file cannot be read, or a
    /// compilation error if it is not Wasm.
    #[instrument(skip(path), fields(path = %path.as_ref().display()))]
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, RuntimeError> {
        let bytes = std::fs::read(path.as_ref())?;
        debug!(bytes_len = bytes.len(), "Runtime code read from disk");
        Self::from_bytes(bytes)
    }

    /// Assemble runtime code from WAT (WebAssembly Text Format).
    ///
    /// This is primarily for testing purposes.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::CompilationFailed`] if the text does not parse.
    pub fn from_wat(wat: &str) -> Result<Self, RuntimeError> {
        let bytes = wat::parse_str(wat).map_err(|e| {
            RuntimeError::compilation_failed(format!("WAT assembly failed: {e}"))
        })?;
        Self::from_bytes(bytes)
    }

    /// The Wasm bytes.
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Get the content hash of the Wasm bytes.
    pub fn content_hash(&self) -> &str {
        &self.content_hash
    }

    /// Contents of the custom section called `name`, if present.
    pub fn custom_section(&self, name: &str) -> Option<&[u8]> {
        custom_section(&self.bytes, name)
    }
}

impl std::fmt::Debug for RuntimeCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuntimeCode")
            .field("content_hash", &self.content_hash)
            .field("bytes_len", &self.bytes.len())
            .finish()
    }
}

/// Runtime code compiled for one engine.
///
/// # Thread Safety
///
/// `CompiledModule` is thread-safe and can be shared across multiple instances
/// created from the same [`WasmEngine`].
#[derive(Clone)]
pub struct CompiledModule {
    inner: ModuleKind,
    code: RuntimeCode,
    compiled_at: Instant,
}

#[derive(Clone)]
pub(crate) enum ModuleKind {
    Wasmtime(wasmtime::Module),
    Wasmi(wasmi::Module),
}

impl CompiledModule {
    /// Compile runtime code with the given engine.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::CompilationFailed`] if validation or
    /// compilation fails.
    #[instrument(skip(engine, code), fields(backend = %engine.backend(), content_hash = %code.content_hash()))]
    pub fn compile(engine: &WasmEngine, code: &RuntimeCode) -> Result<Self, RuntimeError> {
        let start = Instant::now();

        let inner = match engine.kind() {
            EngineKind::Wasmtime(engine) => {
                let module = wasmtime::Module::new(engine, code.bytes()).map_err(|e| {
                    RuntimeError::compilation_failed(format!("Wasmtime compilation failed: {e}"))
                })?;
                ModuleKind::Wasmtime(module)
            }
            EngineKind::Wasmi(engine) => {
                let module = wasmi::Module::new(engine, code.bytes()).map_err(|e| {
                    RuntimeError::compilation_failed(format!("wasmi compilation failed: {e}"))
                })?;
                ModuleKind::Wasmi(module)
            }
        };

        info!(
            duration_ms = start.elapsed().as_millis(),
            "Runtime module compiled"
        );

        Ok(Self {
            inner,
            code: code.clone(),
            compiled_at: Instant::now(),
        })
    }

    pub(crate) fn kind(&self) -> &ModuleKind {
        &self.inner
    }

    /// The code this module was compiled from.
    pub fn code(&self) -> &RuntimeCode {
        &self.code
    }

    /// Get when this module was compiled.
    pub fn compiled_at(&self) -> Instant {
        self.compiled_at
    }
}

impl std::fmt::Debug for CompiledModule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let backend = match self.inner {
            ModuleKind::Wasmtime(_) => "wasmtime",
            ModuleKind::Wasmi(_) => "wasmi",
        };
        f.debug_struct("CompiledModule")
            .field("content_hash", &self.code.content_hash)
            .field("backend", &backend)
            .finish_non_exhaustive()
    }
}

/// Validate WebAssembly header (magic number).
fn validate_wasm_header(bytes: &[u8]) -> Result<(), RuntimeError> {
    if bytes.len() < 8 {
        return Err(RuntimeError::compilation_failed(
            "Invalid Wasm: file too small",
        ));
    }

    if &bytes[0..4] != b"\0asm" {
        return Err(RuntimeError::compilation_failed(
            "Invalid Wasm: bad magic number",
        ));
    }

    Ok(())
}

/// Compute a hash of the given bytes.
fn compute_hash(bytes: &[u8]) -> String {
    let mut hasher = DefaultHasher::new();
    bytes.hash(&mut hasher);
    format!("{:016x}", hasher.finish())
}

/// Find the custom section called `name` in a Wasm binary.
///
/// Returns `None` if the binary is malformed or has no such section.
pub fn custom_section<'a>(wasm: &'a [u8], name: &str) -> Option<&'a [u8]> {
    let mut rest = wasm.get(8..)?;

    while !rest.is_empty() {
        let id = rest[0];
        let (size, used) = read_leb_u32(&rest[1..])?;
        let start = 1 + used;
        let end = start.checked_add(size as usize)?;
        let payload = rest.get(start..end)?;

        if id == 0 {
            let (name_len, used) = read_leb_u32(payload)?;
            let name_end = used.checked_add(name_len as usize)?;
            if payload.get(used..name_end)? == name.as_bytes() {
                return payload.get(name_end..);
            }
        }

        rest = &rest[end..];
    }

    None
}

/// Decode an unsigned LEB128 value, returning it and the bytes consumed.
fn read_leb_u32(bytes: &[u8]) -> Option<(u32, usize)> {
    let mut value: u32 = 0;
    for (i, byte) in bytes.iter().take(5).enumerate() {
        value |= u32::from(byte & 0x7f) << (7 * i);
        if byte & 0x80 == 0 {
            return Some((value, i + 1));
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use chainvm_common::{Backend, EngineConfig};

    // Minimal valid Wasm module (empty module)
    const MINIMAL_WASM: &[u8] = &[
        0x00, 0x61, 0x73, 0x6d, // magic: \0asm
        0x01, 0x00, 0x00, 0x00, // version: 1
    ];

    #[test]
    fn test_validate_wasm_header() {
        assert!(validate_wasm_header(MINIMAL_WASM).is_ok());
        assert!(validate_wasm_header(&[0x00, 0x61]).is_err());
        assert!(validate_wasm_header(&[0, 0, 0, 0, 1, 0, 0, 0]).is_err());
    }

    #[test]
    fn test_compute_hash() {
        let hash1 = compute_hash(b"hello");
        let hash2 = compute_hash(b"hello");
        let hash3 = compute_hash(b"world");

        assert_eq!(hash1, hash2);
        assert_ne!(hash1, hash3);
        assert_eq!(hash1.len(), 16);
    }

    #[test]
    fn test_module_compilation_both_backends() {
        let code = RuntimeCode::from_bytes(MINIMAL_WASM).unwrap();

        for backend in Backend::ALL {
            let engine = WasmEngine::new(&EngineConfig::with_backend(backend)).unwrap();
            let module = CompiledModule::compile(&engine, &code).unwrap();
            assert_eq!(module.code().content_hash(), code.content_hash());
        }
    }

    #[test]
    fn test_invalid_module_rejected() {
        // Valid header, garbage section.
        let code = RuntimeCode::from_bytes(vec![0, 0x61, 0x73, 0x6d, 1, 0, 0, 0, 0xff]).unwrap();

        for backend in Backend::ALL {
            let engine = WasmEngine::new(&EngineConfig::with_backend(backend)).unwrap();
            let result = CompiledModule::compile(&engine, &code);
            assert!(matches!(result, Err(RuntimeError::CompilationFailed { .. })));
        }
    }

    #[test]
    fn test_from_wat() {
        let code = RuntimeCode::from_wat("(module)").unwrap();
        assert_eq!(code.bytes(), MINIMAL_WASM);
        assert!(RuntimeCode::from_wat("(module").is_err());
    }

    #[test]
    fn test_custom_section() {
        let code = RuntimeCode::from_wat(
            r#"(module
                (@custom "runtime_version" "\01\02\03")
                (@custom "other" "x")
            )"#,
        )
        .unwrap();

        assert_eq!(code.custom_section("runtime_version"), Some(&[1u8, 2, 3][..]));
        assert_eq!(code.custom_section("other"), Some(&b"x"[..]));
        assert_eq!(code.custom_section("missing"), None);
    }

    #[test]
    fn test_read_leb() {
        assert_eq!(read_leb_u32(&[0x05]), Some((5, 1)));
        assert_eq!(read_leb_u32(&[0xe5, 0x8e, 0x26]), Some((624_485, 3)));
        assert_eq!(read_leb_u32(&[0x80]), None);
    }
}
