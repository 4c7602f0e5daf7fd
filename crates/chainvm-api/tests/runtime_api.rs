//! Integration tests for chainvm-api.
//!
//! A small block-building runtime written in WAT is linked against the full
//! host function catalogue and driven through [`RuntimeApi`] on both backends.

use std::fmt::Write as _;

use parity_scale_codec::{Decode, Encode};

use chainvm_api::types::AllowedSlots;
use chainvm_api::{
    ApiVersion, Authority, BabeConfiguration, Block, DigestItem, Header, RuntimeApi,
    TransactionValidityError, Validity, VersionApi, exports,
};
use chainvm_common::{Backend, EngineConfig, HostConfig, RuntimeConfig, RuntimeError};
use chainvm_core::{Context, Instance, RuntimeCode};
use chainvm_host::hashing::blake2_256;
use chainvm_host::trie::ordered_root;
use chainvm_host::{InMemoryStorage, host_functions};

/// Exports implemented in WAT below; constant exports are generated.
const BLOCK_BUILDER_WAT: &str = r#"
    (import "env" "ext_storage_set_version_1" (func $set (param i64 i64)))
    (import "env" "ext_storage_read_version_1" (func $read (param i64 i64 i32) (result i64)))
    (import "env" "ext_storage_append_version_1" (func $append (param i64 i64)))
    (import "env" "ext_storage_root_version_1" (func $root (result i64)))
    (import "env" "ext_trie_blake2_256_ordered_root_version_1"
        (func $ordered_root (param i64) (result i32)))
    (memory (export "memory") 2)
    (global (export "__heap_base") i32 (i32.const 65536))
    (data (i32.const 16) ":header")
    (data (i32.const 32) ":extrinsics")
    (data (i32.const 48) ":executed")
    (data (i32.const 80) "\00\00")

    (func $span (param $ptr i32) (param $len i32) (result i64)
        (i64.or
            (i64.shl (i64.extend_i32_u (local.get $len)) (i64.const 32))
            (i64.extend_i32_u (local.get $ptr))))

    (func $copy32 (param $dst i32) (param $src i32)
        (i64.store offset=0 (local.get $dst) (i64.load offset=0 (local.get $src)))
        (i64.store offset=8 (local.get $dst) (i64.load offset=8 (local.get $src)))
        (i64.store offset=16 (local.get $dst) (i64.load offset=16 (local.get $src)))
        (i64.store offset=24 (local.get $dst) (i64.load offset=24 (local.get $src))))

    (func (export "Core_initialize_block") (param $ptr i32) (param $len i32) (result i64)
        (call $set
            (call $span (i32.const 16) (i32.const 7))
            (call $span (local.get $ptr) (local.get $len)))
        (i64.const 0))

    ;; Record the extrinsic and touch state so the root moves.
    (func (export "BlockBuilder_apply_extrinsic") (param $ptr i32) (param $len i32) (result i64)
        (call $append
            (call $span (i32.const 32) (i32.const 11))
            (call $span (local.get $ptr) (local.get $len)))
        (call $set
            (call $span (local.get $ptr) (local.get $len))
            (call $span (i32.const 80) (i32.const 2)))
        (call $span (i32.const 80) (i32.const 2)))

    ;; Header is 98 bytes at 1024: state root at +33, extrinsics root at +65.
    (func (export "BlockBuilder_finalize_block") (param i32 i32) (result i64)
        (local $read i64)
        (local $len i32)
        (drop (call $read
            (call $span (i32.const 16) (i32.const 7))
            (call $span (i32.const 1024) (i32.const 98))
            (i32.const 0)))
        (local.set $read (call $read
            (call $span (i32.const 32) (i32.const 11))
            (call $span (i32.const 1280) (i32.const 512))
            (i32.const 0)))
        (local.set $len (i32.load offset=1 (i32.wrap_i64 (local.get $read))))
        (call $copy32
            (i32.const 1089)
            (call $ordered_root (call $span (i32.const 1280) (local.get $len))))
        (call $copy32 (i32.const 1057) (i32.wrap_i64 (call $root)))
        (call $span (i32.const 1024) (i32.const 98)))

    (func (export "Core_execute_block") (param $ptr i32) (param $len i32) (result i64)
        (call $set
            (call $span (i32.const 48) (i32.const 9))
            (call $span (local.get $ptr) (local.get $len)))
        (i64.const 0))

    (func (export "OffchainWorkerApi_offchain_worker") (param i32 i32) (result i64)
        (i64.const 0))
"#;

/// First address used for constant results.
const CONSTANTS_BASE: u32 = 2048;

fn sample_version() -> VersionApi {
    VersionApi {
        spec_name: "node-template".to_string(),
        impl_name: "chainvm-test".to_string(),
        authoring_version: 1,
        spec_version: 100,
        impl_version: 1,
        apis: vec![ApiVersion {
            id: [0xdf, 0x6a, 0xcb, 0x68, 0x99, 0x07, 0x60, 0x9b],
            version: 4,
        }],
        transaction_version: Some(1),
    }
}

fn sample_babe() -> BabeConfiguration {
    BabeConfiguration {
        slot_duration: 6000,
        epoch_length: 200,
        c: (1, 4),
        authorities: vec![([5; 32], 1)],
        randomness: [9; 32],
        allowed_slots: AllowedSlots::PrimaryAndSecondaryVrfSlots,
    }
}

fn sample_validity() -> Validity {
    Validity {
        priority: 42,
        requires: vec![],
        provides: vec![b"alice-0".to_vec()],
        longevity: 64,
        propagate: true,
    }
}

fn grandpa_key(seed: u8) -> [u8; 32] {
    ed25519_dalek::SigningKey::from_bytes(&[seed; 32])
        .verifying_key()
        .to_bytes()
}

/// Assemble the runtime with exports returning fixed byte strings.
fn runtime_wat(constants: &[(&str, Vec<u8>)]) -> String {
    let mut data = String::new();
    let mut funcs = String::new();
    let mut ptr = CONSTANTS_BASE;

    for (name, bytes) in constants {
        let escaped: String = bytes.iter().fold(String::new(), |mut out, b| {
            let _ = write!(out, "\\{b:02x}");
            out
        });
        let packed = (u64::from(bytes.len() as u32) << 32) | u64::from(ptr);

        let _ = writeln!(data, r#"(data (i32.const {ptr}) "{escaped}")"#);
        let _ = writeln!(
            funcs,
            r#"(func (export "{name}") (param i32 i32) (result i64) (i64.const {packed}))"#
        );
        ptr += bytes.len() as u32;
    }

    format!("(module {BLOCK_BUILDER_WAT} {data} {funcs})")
}

fn standard_constants() -> Vec<(&'static str, Vec<u8>)> {
    let mut validity = vec![0];
    sample_validity().encode_to(&mut validity);

    vec![
        (exports::CORE_VERSION, sample_version().to_bytes()),
        (exports::METADATA, b"meta-v14".to_vec().encode()),
        (exports::BABE_CONFIGURATION, sample_babe().encode()),
        (
            exports::GRANDPA_AUTHORITIES,
            vec![(grandpa_key(1), 1u64), (grandpa_key(2), 3u64)].encode(),
        ),
        (exports::INHERENT_EXTRINSICS, vec![vec![0x04u8, 0x00]].encode()),
        (exports::CHECK_INHERENTS, vec![1, 0, 0]),
        (exports::VALIDATE_TRANSACTION, validity),
    ]
}

fn config(backend: Backend) -> RuntimeConfig {
    RuntimeConfig {
        engine: EngineConfig {
            heap_pages: 16,
            max_memory_pages: 256,
            ..EngineConfig::with_backend(backend)
        },
        host: HostConfig::default(),
    }
}

fn runtime_api(wat: &str, backend: Backend, storage: &InMemoryStorage) -> RuntimeApi {
    let config = config(backend);
    let code = RuntimeCode::from_wat(wat).unwrap();
    let instance = Instance::from_code(
        &code,
        &config,
        &host_functions(),
        Context::new(config.host.clone()),
    )
    .unwrap();
    instance.set_context(storage.clone()).unwrap();
    RuntimeApi::new(instance)
}

fn standard_api(backend: Backend, storage: &InMemoryStorage) -> RuntimeApi {
    runtime_api(&runtime_wat(&standard_constants()), backend, storage)
}

// ============================================================================
// Test: Queries
// ============================================================================

#[test]
fn test_version() {
    for backend in Backend::ALL {
        let api = standard_api(backend, &InMemoryStorage::new());
        assert_eq!(api.version().unwrap(), sample_version(), "backend {backend}");
    }
}

#[test]
fn test_metadata() {
    for backend in Backend::ALL {
        let api = standard_api(backend, &InMemoryStorage::new());
        assert_eq!(api.metadata().unwrap(), b"meta-v14", "backend {backend}");
    }
}

#[test]
fn test_babe_configuration() {
    for backend in Backend::ALL {
        let api = standard_api(backend, &InMemoryStorage::new());
        assert_eq!(api.babe_configuration().unwrap(), sample_babe(), "backend {backend}");
    }
}

#[test]
fn test_grandpa_authorities() {
    for backend in Backend::ALL {
        let api = standard_api(backend, &InMemoryStorage::new());

        let authorities = api.grandpa_authorities().unwrap();
        assert_eq!(
            authorities,
            vec![
                Authority { key: grandpa_key(1), weight: 1 },
                Authority { key: grandpa_key(2), weight: 3 },
            ],
            "backend {backend}"
        );
    }
}

#[test]
fn test_grandpa_authority_rejected() {
    let constants = vec![(
        exports::GRANDPA_AUTHORITIES,
        vec![(grandpa_key(1), 1u64), (grandpa_key(2), 0u64)].encode(),
    )];
    let api = runtime_api(&runtime_wat(&constants), Backend::Wasmi, &InMemoryStorage::new());

    let err = api.grandpa_authorities().unwrap_err();
    assert!(matches!(err, RuntimeError::Decode { .. }));
    assert!(err.to_string().contains("authority 1"), "{err}");
}

// ============================================================================
// Test: Block Building
// ============================================================================

#[test]
fn test_build_block() {
    for backend in Backend::ALL {
        let storage = InMemoryStorage::new();
        let api = standard_api(backend, &storage);

        let parent = Header::new([1; 32], 1);
        api.initialize_block(&parent).unwrap();

        let inherents = api.inherent_extrinsics(&[]).unwrap();
        assert_eq!(Vec::<Vec<u8>>::decode(&mut &inherents[..]).unwrap(), vec![vec![4, 0]]);

        let first = vec![1u8, 2, 3];
        let second = vec![4u8, 5];
        assert_eq!(api.apply_extrinsic(&first.encode()).unwrap(), vec![0, 0]);
        assert_eq!(api.apply_extrinsic(&second.encode()).unwrap(), vec![0, 0]);

        let header = api.finalize_block().unwrap();

        assert_eq!(header.parent_hash, parent.parent_hash, "backend {backend}");
        assert_eq!(header.number, parent.number);
        assert_ne!(header.state_root, parent.state_root);
        assert_eq!(header.state_root, storage.root());
        assert_ne!(header.extrinsics_root, [0; 32]);
        assert_eq!(header.extrinsics_root, ordered_root(vec![first, second], blake2_256));
    }
}

#[test]
fn test_execute_block_strips_seal() {
    for backend in Backend::ALL {
        let storage = InMemoryStorage::new();
        let api = standard_api(backend, &storage);

        let mut header = Header::new([2; 32], 5);
        header.digest.logs = vec![
            DigestItem::PreRuntime(*b"BABE", vec![1, 2, 3]),
            DigestItem::Seal(*b"BABE", vec![7; 64]),
        ];
        let block = Block { header, extrinsics: vec![vec![1, 2, 3]] };

        api.execute_block(&block).unwrap();

        let executed = storage.get(b":executed").unwrap();
        let executed = Block::decode(&mut &executed[..]).unwrap();
        assert_eq!(
            executed.header.digest.logs,
            vec![DigestItem::PreRuntime(*b"BABE", vec![1, 2, 3])],
            "backend {backend}"
        );
        assert_eq!(executed.extrinsics, block.extrinsics);
        // The caller's block keeps its seal.
        assert_eq!(block.header.digest.logs.len(), 2);
    }
}

#[test]
fn test_check_inherents_and_offchain_worker() {
    for backend in Backend::ALL {
        let api = standard_api(backend, &InMemoryStorage::new());
        let block = Block { header: Header::new([3; 32], 2), extrinsics: vec![] };

        assert_eq!(api.check_inherents(&block, &[0]).unwrap(), vec![1, 0, 0]);
        api.offchain_worker(&block.header).unwrap();
    }
}

// ============================================================================
// Test: Transaction Validation
// ============================================================================

#[test]
fn test_validate_transaction() {
    for backend in Backend::ALL {
        let api = standard_api(backend, &InMemoryStorage::new());

        let validity = api.validate_transaction(&[0x04, 0x00]).unwrap();
        assert_eq!(validity, Ok(sample_validity()), "backend {backend}");
    }
}

#[test]
fn test_validate_transaction_errors() {
    let cases = [
        (vec![1, 0], TransactionValidityError::Invalid),
        (vec![1, 1], TransactionValidityError::Unknown),
        (vec![1, 2], TransactionValidityError::CannotValidate),
    ];

    for (bytes, expected) in cases {
        let constants = vec![(exports::VALIDATE_TRANSACTION, bytes)];
        let storage = InMemoryStorage::new();
        let api = runtime_api(&runtime_wat(&constants), Backend::Wasmtime, &storage);

        assert_eq!(api.validate_transaction(&[]).unwrap(), Err(expected));
    }
}

// ============================================================================
// Test: Failures
// ============================================================================

#[test]
fn test_missing_export() {
    for backend in Backend::ALL {
        let api = runtime_api(&runtime_wat(&[]), backend, &InMemoryStorage::new());

        let err = api.version().unwrap_err();
        assert!(matches!(err, RuntimeError::MissingExport { .. }), "backend {backend}: {err}");
        assert!(!api.instance().is_poisoned());
    }
}

#[test]
fn test_call_before_storage_is_set() {
    for backend in Backend::ALL {
        let config = config(backend);
        let code = RuntimeCode::from_wat(&runtime_wat(&standard_constants())).unwrap();
        let instance = Instance::from_code(
            &code,
            &config,
            &host_functions(),
            Context::new(config.host.clone()),
        )
        .unwrap();
        let api = RuntimeApi::new(instance);

        assert!(matches!(api.version(), Err(RuntimeError::NilStorage)), "backend {backend}");
    }
}

#[test]
fn test_malformed_result() {
    let constants = vec![(exports::BABE_CONFIGURATION, vec![1, 2, 3])];
    let api = runtime_api(&runtime_wat(&constants), Backend::Wasmi, &InMemoryStorage::new());

    assert!(matches!(api.babe_configuration(), Err(RuntimeError::Decode { .. })));
}
