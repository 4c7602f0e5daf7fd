//! Integration tests for chainvm-host.
//!
//! These tests link the full host function catalogue into real instances on
//! both backends:
//! - Storage writes, reads and transactions from guest code
//! - Hashing results returned as guest pointers
//! - Guest logging captured in the context
//! - Host errors surfacing as trap causes
//! - Per-call host state dropped between calls

use chainvm_common::{Backend, EngineConfig, HostConfig, HostError, RuntimeConfig, RuntimeError};
use chainvm_core::{Context, Instance, RuntimeCode};
use chainvm_host::hashing::blake2_256;
use chainvm_host::{InMemoryStorage, host_functions};
use ed25519_dalek::{Signer, SigningKey};

const RUNTIME_WAT: &str = r#"
    (module
        (import "env" "ext_storage_set_version_1" (func $set (param i64 i64)))
        (import "env" "ext_storage_get_version_1" (func $get (param i64) (result i64)))
        (import "env" "ext_storage_start_transaction_version_1" (func $start))
        (import "env" "ext_storage_rollback_transaction_version_1" (func $rollback))
        (import "env" "ext_storage_commit_transaction_version_1" (func $commit))
        (import "env" "ext_hashing_blake2_256_version_1" (func $blake2 (param i64) (result i32)))
        (import "env" "ext_logging_log_version_1" (func $log (param i32 i64 i64)))
        (import "env" "ext_allocator_malloc_version_1" (func $malloc (param i32) (result i32)))
        (import "env" "ext_allocator_free_version_1" (func $free (param i32)))
        (import "env" "ext_crypto_start_batch_verify_version_1" (func $start_batch))
        (import "env" "ext_crypto_ed25519_batch_verify_version_1"
            (func $batch_verify (param i32 i64 i32) (result i32)))
        (memory (export "memory") 2)
        (global (export "__heap_base") i32 (i32.const 4096))
        (data (i32.const 16) "value")
        (data (i32.const 32) "guest")

        (func $span (param $ptr i32) (param $len i32) (result i64)
            (i64.or
                (i64.shl (i64.extend_i32_u (local.get $len)) (i64.const 32))
                (i64.extend_i32_u (local.get $ptr))))

        ;; Store "value" under the argument and read it back.
        (func (export "store") (param $ptr i32) (param $len i32) (result i64)
            (call $set
                (call $span (local.get $ptr) (local.get $len))
                (call $span (i32.const 16) (i32.const 5)))
            (call $get (call $span (local.get $ptr) (local.get $len))))

        ;; Same, inside a transaction that is rolled back.
        (func (export "store_and_rollback") (param $ptr i32) (param $len i32) (result i64)
            (call $start)
            (call $set
                (call $span (local.get $ptr) (local.get $len))
                (call $span (i32.const 16) (i32.const 5)))
            (call $rollback)
            (call $get (call $span (local.get $ptr) (local.get $len))))

        (func (export "commit_without_start") (param i32 i32) (result i64)
            (call $commit)
            (i64.const 0))

        (func (export "hash") (param $ptr i32) (param $len i32) (result i64)
            (call $span
                (call $blake2 (call $span (local.get $ptr) (local.get $len)))
                (i32.const 32)))

        (func (export "log") (param $ptr i32) (param $len i32) (result i64)
            (call $log
                (i32.const 2)
                (call $span (i32.const 32) (i32.const 5))
                (call $span (local.get $ptr) (local.get $len)))
            (i64.const 0))

        ;; Open a signature batch and return without finishing it.
        (func (export "open_batch") (param i32 i32) (result i64)
            (call $start_batch)
            (i64.const 0))

        ;; Argument is signature (64) ++ public key (32) ++ message.
        (func (export "batch_verify") (param $ptr i32) (param $len i32) (result i64)
            (i32.store (i32.const 96)
                (call $batch_verify
                    (local.get $ptr)
                    (call $span
                        (i32.add (local.get $ptr) (i32.const 96))
                        (i32.sub (local.get $len) (i32.const 96)))
                    (i32.add (local.get $ptr) (i32.const 64))))
            (call $span (i32.const 96) (i32.const 4)))

        ;; Allocate, free and allocate again; return both pointers.
        (func (export "malloc_twice") (param i32 i32) (result i64)
            (local $first i32)
            (local $second i32)
            (local.set $first (call $malloc (i32.const 40)))
            (call $free (local.get $first))
            (local.set $second (call $malloc (i32.const 40)))
            (i32.store (i32.const 64) (local.get $first))
            (i32.store (i32.const 68) (local.get $second))
            (call $span (i32.const 64) (i32.const 8)))
    )
"#;

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

fn instance(backend: Backend, storage: &InMemoryStorage) -> Instance {
    instance_with(config(backend), storage)
}

fn instance_with(config: RuntimeConfig, storage: &InMemoryStorage) -> Instance {
    let code = RuntimeCode::from_wat(RUNTIME_WAT).unwrap();
    let instance = Instance::from_code(
        &code,
        &config,
        &host_functions(),
        Context::new(config.host.clone()),
    )
    .unwrap();
    instance.set_context(storage.clone()).unwrap();
    instance
}

// ============================================================================
// Test: Storage
// ============================================================================

#[test]
fn test_storage_round_trip() {
    for backend in Backend::ALL {
        let storage = InMemoryStorage::new();
        let instance = instance(backend, &storage);

        let output = instance.exec("store", b"key").unwrap();

        // Some(b"value") as SCALE.
        assert_eq!(output, [&[1, 20][..], b"value"].concat(), "backend {backend}");
        assert_eq!(storage.get(b"key"), Some(b"value".to_vec()));
    }
}

#[test]
fn test_rolled_back_write_is_invisible() {
    for backend in Backend::ALL {
        let storage = InMemoryStorage::new();
        let instance = instance(backend, &storage);

        let output = instance.exec("store_and_rollback", b"key").unwrap();
        assert_eq!(output, vec![0], "backend {backend}");
        assert_eq!(storage.get(b"key"), None);
        assert_eq!(storage.transaction_depth(), 0);
    }
}

#[test]
fn test_host_error_is_trap_cause() {
    for backend in Backend::ALL {
        let storage = InMemoryStorage::new();
        let instance = instance(backend, &storage);

        match instance.exec("commit_without_start", &[]) {
            Err(RuntimeError::GuestTrap { cause, .. }) => {
                assert_eq!(cause, Some(HostError::NoActiveTransaction), "backend {backend}");
            }
            other => panic!("expected a trap, got {other:?}"),
        }
        assert!(matches!(
            instance.exec("store", b"key"),
            Err(RuntimeError::InstancePoisoned)
        ));
    }
}

// ============================================================================
// Test: Hashing and Allocation
// ============================================================================

#[test]
fn test_hash_from_guest() {
    for backend in Backend::ALL {
        let instance = instance(backend, &InMemoryStorage::new());

        let output = instance.exec("hash", b"chainvm").unwrap();
        assert_eq!(output, blake2_256(b"chainvm"), "backend {backend}");
    }
}

#[test]
fn test_guest_malloc_reuses_freed_block() {
    for backend in Backend::ALL {
        let instance = instance(backend, &InMemoryStorage::new());

        let output = instance.exec("malloc_twice", &[]).unwrap();
        let first = u32::from_le_bytes(output[..4].try_into().unwrap());
        let second = u32::from_le_bytes(output[4..].try_into().unwrap());
        assert_eq!(first, second, "backend {backend}");
        assert!(first >= 4096);
    }
}

// ============================================================================
// Test: Logging
// ============================================================================

#[test]
fn test_guest_log_is_captured() {
    for backend in Backend::ALL {
        let instance = instance(backend, &InMemoryStorage::new());

        instance.exec("log", b"something happened").unwrap();

        let logs = instance.with_context_mut(|ctx| ctx.logs.clone()).unwrap();
        assert_eq!(logs.len(), 1, "backend {backend}");
        assert_eq!(logs[0].target, "guest");
        assert_eq!(logs[0].message, "something happened");
    }
}

#[test]
fn test_log_buffer_keeps_newest_lines() {
    for backend in Backend::ALL {
        let mut config = config(backend);
        config.host.max_captured_logs = 4;
        let instance = instance_with(config, &InMemoryStorage::new());

        for i in 0..10 {
            instance.exec("log", format!("line {i}").as_bytes()).unwrap();
        }

        let logs = instance.take_logs().unwrap();
        let messages: Vec<_> = logs.iter().map(|l| l.message.as_str()).collect();
        assert_eq!(messages, ["line 6", "line 7", "line 8", "line 9"], "backend {backend}");
        assert!(instance.take_logs().unwrap().is_empty());
    }
}

// ============================================================================
// Test: Per-call State
// ============================================================================

/// Signature ++ public key ++ message, as `batch_verify` expects.
fn signed_input(message: &[u8], forge: bool) -> Vec<u8> {
    let key = SigningKey::from_bytes(&[3; 32]);
    let mut signature = key.sign(message).to_bytes();
    if forge {
        signature[0] ^= 1;
    }
    let public = key.verifying_key().to_bytes();
    [&signature[..], &public[..], message].concat()
}

#[test]
fn test_unfinished_batch_does_not_leak_into_next_call() {
    for backend in Backend::ALL {
        let instance = instance(backend, &InMemoryStorage::new());

        instance.exec("open_batch", &[]).unwrap();
        assert!(instance.with_context_mut(|ctx| ctx.batch.is_none()).unwrap());

        // Outside a batch the check result is reported directly.
        let output = instance.exec("batch_verify", &signed_input(b"transfer", true)).unwrap();
        assert_eq!(output, 0u32.to_le_bytes(), "backend {backend}");

        let output = instance.exec("batch_verify", &signed_input(b"transfer", false)).unwrap();
        assert_eq!(output, 1u32.to_le_bytes(), "backend {backend}");
    }
}
