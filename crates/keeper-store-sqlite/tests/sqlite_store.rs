// crates/keeper-store-sqlite/tests/sqlite_store.rs
// ============================================================================
// Module: SQLite Keeper Store Tests
// Description: Validate SQLite KeeperStore behavior.
// Purpose: Ensure durable, atomic, and monotonic keeper bookkeeping.
// Dependencies: keeper-store-sqlite, keeper-core, rusqlite, tempfile
// ============================================================================

//! ## Overview
//! Conformance tests for the SQLite-backed keeper store. Covers registry
//! validation, upsert bookkeeping preservation, exact bulk deletes, the
//! last-run compare-and-set, registry scoping, durability across reopen,
//! lock contention, interruption, and schema/path guards.

#![allow(
    clippy::panic,
    clippy::print_stdout,
    clippy::print_stderr,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::use_debug,
    clippy::dbg_macro,
    clippy::panic_in_result_fn,
    clippy::unwrap_in_result,
    reason = "Test-only assertions and helpers are permitted."
)]

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::thread;
use std::time::Duration;
use std::time::Instant;

use keeper_core::Address;
use keeper_core::EligibilityRequest;
use keeper_core::JobId;
use keeper_core::KeeperGateway;
use keeper_core::KeeperRegistry;
use keeper_core::KeeperStore;
use keeper_core::LastRunUpdate;
use keeper_core::RegistryId;
use keeper_core::RegistrySpec;
use keeper_core::StoreError;
use keeper_core::UpkeepId;
use keeper_core::UpkeepSpec;
use keeper_store_sqlite::SqliteKeeperStore;
use keeper_store_sqlite::SqliteStoreConfig;
use keeper_store_sqlite::SqliteStoreError;
use keeper_store_sqlite::SqliteStoreMode;
use keeper_store_sqlite::SqliteSyncMode;
use tempfile::TempDir;

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Address this node transacts as (keeper 0).
const FROM: Address = Address::with_last_byte(0x01);
/// Address of keeper 1.
const PEER: Address = Address::with_last_byte(0x02);

/// Opens a store at `path` with a short busy timeout.
fn store_for(path: &Path) -> SqliteKeeperStore {
    let config = SqliteStoreConfig {
        path: path.to_path_buf(),
        busy_timeout_ms: 1_000,
        journal_mode: SqliteStoreMode::Wal,
        sync_mode: SqliteSyncMode::Full,
    };
    SqliteKeeperStore::new(config).expect("store init")
}

/// Two-keeper registry spec where this node is keeper 0.
fn registry_spec(job_id: i64, contract: u8) -> RegistrySpec {
    RegistrySpec {
        job_id: JobId::new(job_id),
        contract_address: Address::with_last_byte(contract),
        from_address: FROM,
        keeper_index: 0,
        num_keepers: 2,
        block_count_per_turn: 20,
        keepers: vec![FROM, PEER],
    }
}

/// Upserts a registry and `count` never-run upkeeps.
fn registry_with_upkeeps(
    store: &SqliteKeeperStore,
    job_id: i64,
    contract: u8,
    count: u64,
) -> KeeperRegistry {
    let registry = store.upsert_registry(registry_spec(job_id, contract)).unwrap();
    for id in 0 .. count {
        store
            .upsert_upkeep(UpkeepSpec::new(registry.id, UpkeepId::new(id), 2_500_000, vec![0xca]))
            .unwrap();
    }
    registry
}

// ============================================================================
// SECTION: Registries
// ============================================================================

#[test]
fn sqlite_store_upserts_registry_by_contract_address() {
    let temp = TempDir::new().unwrap();
    let store = store_for(&temp.path().join("keeper.sqlite"));
    let created = store.upsert_registry(registry_spec(1, 0xaa)).unwrap();
    let mut changed = registry_spec(1, 0xaa);
    changed.block_count_per_turn = 40;
    changed.keepers = vec![FROM, Address::with_last_byte(0x03)];
    let updated = store.upsert_registry(changed).unwrap();
    assert_eq!(updated.id, created.id);
    assert_eq!(updated.created_at, created.created_at);
    assert_eq!(updated.block_count_per_turn, 40);
    assert_eq!(updated.keepers, vec![FROM, Address::with_last_byte(0x03)]);
    assert_eq!(store.registries().unwrap(), vec![updated.clone()]);
    assert_eq!(store.registry_for_job(JobId::new(1)).unwrap(), updated);
    assert_eq!(store.registry_by_contract_address(&Address::with_last_byte(0xaa)).unwrap(), updated);
}

#[test]
fn sqlite_store_rejects_invalid_registries_before_writing() {
    let temp = TempDir::new().unwrap();
    let store = store_for(&temp.path().join("keeper.sqlite"));
    let mut no_keepers = registry_spec(1, 0xaa);
    no_keepers.num_keepers = 0;
    let mut empty_turn = registry_spec(1, 0xaa);
    empty_turn.block_count_per_turn = 0;
    let mut duplicate = registry_spec(1, 0xaa);
    duplicate.keepers = vec![FROM, FROM];
    let mut oversized_turn = registry_spec(1, 0xaa);
    oversized_turn.block_count_per_turn = u64::MAX;
    for spec in [no_keepers, empty_turn, duplicate, oversized_turn] {
        assert!(matches!(store.upsert_registry(spec), Err(StoreError::Validation(_))));
    }
    assert!(store.registries().unwrap().is_empty());
}

#[test]
fn sqlite_store_rejects_rebinding_a_job() {
    let temp = TempDir::new().unwrap();
    let store = store_for(&temp.path().join("keeper.sqlite"));
    store.upsert_registry(registry_spec(1, 0xaa)).unwrap();
    assert!(matches!(
        store.upsert_registry(registry_spec(1, 0xbb)),
        Err(StoreError::Validation(_))
    ));
    assert!(matches!(
        store.registry_by_contract_address(&Address::with_last_byte(0xbb)),
        Err(StoreError::NotFound(_))
    ));
}

#[test]
fn sqlite_store_cascades_job_teardown() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("keeper.sqlite");
    let store = store_for(&path);
    let registry = registry_with_upkeeps(&store, 1, 0xaa, 3);
    assert!(store.delete_registry_for_job(JobId::new(1)).unwrap());
    assert!(!store.delete_registry_for_job(JobId::new(1)).unwrap());
    assert!(store.all_upkeep_ids_for_registry(registry.id).unwrap().is_empty());

    let connection = rusqlite::Connection::open(&path).unwrap();
    let remaining: i64 = connection
        .query_row("SELECT COUNT(*) FROM upkeep_registrations", rusqlite::params![], |row| {
            row.get(0)
        })
        .unwrap();
    assert_eq!(remaining, 0);
}

// ============================================================================
// SECTION: Upkeeps
// ============================================================================

#[test]
fn sqlite_store_upsert_preserves_last_run_bookkeeping() {
    let temp = TempDir::new().unwrap();
    let store = store_for(&temp.path().join("keeper.sqlite"));
    let registry = registry_with_upkeeps(&store, 1, 0xaa, 1);
    let upkeep_id = UpkeepId::new(0);
    store.set_last_run_info(JobId::new(1), upkeep_id, 10, &PEER).unwrap();

    let mut reobserved = UpkeepSpec::new(registry.id, upkeep_id, 1_000, vec![0x01, 0x02, 0x03]);
    reobserved.positioning_constant = -4;
    reobserved.last_run_block_height = 0;
    let updated = store.upsert_upkeep(reobserved).unwrap();
    assert_eq!(updated.execute_gas, 1_000);
    assert_eq!(updated.check_data, vec![0x01, 0x02, 0x03]);
    assert_eq!(updated.positioning_constant, -4);
    assert_eq!(updated.last_run_block_height, 10);
    assert_eq!(updated.last_keeper_index, Some(1));
    assert_eq!(store.upkeep(registry.id, upkeep_id).unwrap(), Some(updated));
}

#[test]
fn sqlite_store_requires_registry_for_upkeeps() {
    let temp = TempDir::new().unwrap();
    let store = store_for(&temp.path().join("keeper.sqlite"));
    let result = store.upsert_upkeep(UpkeepSpec::new(RegistryId::new(9), UpkeepId::new(1), 1, vec![]));
    assert!(matches!(result, Err(StoreError::NotFound(_))));
}

#[test]
fn sqlite_store_rejects_unstorable_upkeep_ids() {
    let temp = TempDir::new().unwrap();
    let store = store_for(&temp.path().join("keeper.sqlite"));
    let registry = registry_with_upkeeps(&store, 1, 0xaa, 0);
    let result =
        store.upsert_upkeep(UpkeepSpec::new(registry.id, UpkeepId::new(u64::MAX), 1, vec![]));
    assert!(matches!(result, Err(StoreError::Validation(_))));
}

#[test]
fn sqlite_store_batch_delete_is_exact() {
    let temp = TempDir::new().unwrap();
    let store = store_for(&temp.path().join("keeper.sqlite"));
    let registry = registry_with_upkeeps(&store, 1, 0xaa, 3);
    let deleted = store
        .batch_delete_upkeeps_for_job(JobId::new(1), &[UpkeepId::new(0), UpkeepId::new(2)])
        .unwrap();
    assert_eq!(deleted, 2);
    assert_eq!(store.all_upkeep_ids_for_registry(registry.id).unwrap(), vec![UpkeepId::new(1)]);
    let missing = store
        .batch_delete_upkeeps_for_job(JobId::new(1), &[UpkeepId::new(7), UpkeepId::new(u64::MAX)])
        .unwrap();
    assert_eq!(missing, 0);
    assert!(matches!(
        store.batch_delete_upkeeps_for_job(JobId::new(2), &[UpkeepId::new(1)]),
        Err(StoreError::NotFound(_))
    ));
}

// ============================================================================
// SECTION: Last Run
// ============================================================================

#[test]
fn sqlite_store_last_run_is_monotonic() {
    let temp = TempDir::new().unwrap();
    let store = store_for(&temp.path().join("keeper.sqlite"));
    let registry = registry_with_upkeeps(&store, 1, 0xaa, 1);
    let job = JobId::new(1);
    let upkeep_id = UpkeepId::new(0);

    assert_eq!(store.set_last_run_info(job, upkeep_id, 100, &FROM).unwrap(), LastRunUpdate::Recorded);
    assert_eq!(store.upkeep(registry.id, upkeep_id).unwrap().unwrap().last_run_block_height, 100);
    assert_eq!(store.set_last_run_info(job, upkeep_id, 0, &PEER).unwrap(), LastRunUpdate::Stale);
    let stored = store.upkeep(registry.id, upkeep_id).unwrap().unwrap();
    assert_eq!(stored.last_run_block_height, 100);
    assert_eq!(stored.last_keeper_index, Some(0));
    assert_eq!(store.set_last_run_info(job, upkeep_id, 101, &FROM).unwrap(), LastRunUpdate::Recorded);
    assert_eq!(store.upkeep(registry.id, upkeep_id).unwrap().unwrap().last_run_block_height, 101);
}

#[test]
fn sqlite_store_last_run_rejects_unknown_references() {
    let temp = TempDir::new().unwrap();
    let store = store_for(&temp.path().join("keeper.sqlite"));
    registry_with_upkeeps(&store, 1, 0xaa, 1);
    let stranger = Address::with_last_byte(0x77);
    for result in [
        store.set_last_run_info(JobId::new(4), UpkeepId::new(0), 5, &FROM),
        store.set_last_run_info(JobId::new(1), UpkeepId::new(3), 5, &FROM),
        store.set_last_run_info(JobId::new(1), UpkeepId::new(0), 5, &stranger),
    ] {
        assert!(matches!(result, Err(StoreError::NotFound(_))));
    }
    assert!(matches!(
        store.set_last_run_info(JobId::new(1), UpkeepId::new(0), u64::MAX, &FROM),
        Err(StoreError::Validation(_))
    ));
}

#[test]
fn sqlite_store_concurrent_reports_keep_the_maximum() {
    let temp = TempDir::new().unwrap();
    let store = Arc::new(store_for(&temp.path().join("keeper.sqlite")));
    let registry = registry_with_upkeeps(&store, 1, 0xaa, 2);
    let mut handles = Vec::new();
    for worker in 0 .. 6_u64 {
        let store = Arc::clone(&store);
        handles.push(thread::spawn(move || {
            let keeper = if worker % 2 == 0 { FROM } else { PEER };
            for step in 1 ..= 25_u64 {
                for id in 0 .. 2 {
                    store
                        .set_last_run_info(JobId::new(1), UpkeepId::new(id), step * 6 + worker, &keeper)
                        .unwrap();
                }
            }
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }
    for id in 0 .. 2 {
        let stored = store.upkeep(registry.id, UpkeepId::new(id)).unwrap().unwrap();
        assert_eq!(stored.last_run_block_height, 25 * 6 + 5);
        assert_eq!(stored.last_keeper_index, Some(1));
    }
}

// ============================================================================
// SECTION: Snapshots and Eligibility
// ============================================================================

#[test]
fn sqlite_store_snapshots_are_scoped_by_contract_address() {
    let temp = TempDir::new().unwrap();
    let store = store_for(&temp.path().join("keeper.sqlite"));
    let first = registry_with_upkeeps(&store, 1, 0xaa, 4);
    let second = registry_with_upkeeps(&store, 2, 0xbb, 6);
    let snapshot = store.registry_snapshot(&first.contract_address).unwrap();
    assert_eq!(snapshot.registry, first);
    assert_eq!(snapshot.upkeeps.len(), 4);
    assert!(snapshot.upkeeps.iter().all(|upkeep| upkeep.registry_id == first.id));
    let other = store.registry_snapshot(&second.contract_address).unwrap();
    assert_eq!(other.upkeeps.len(), 6);
    assert!(matches!(
        store.registry_snapshot(&Address::with_last_byte(0xcc)),
        Err(StoreError::NotFound(_))
    ));
}

#[test]
fn sqlite_gateway_applies_self_skip_and_buddy_coverage() {
    let temp = TempDir::new().unwrap();
    let gateway = KeeperGateway::new(store_for(&temp.path().join("keeper.sqlite")));
    let registry = gateway.upsert_registry(registry_spec(1, 0xaa)).unwrap();
    for id in 0 .. 100 {
        gateway.upsert_upkeep(UpkeepSpec::new(registry.id, UpkeepId::new(id), 1, vec![])).unwrap();
        gateway.set_last_run_info(JobId::new(1), UpkeepId::new(id), 10, &FROM).unwrap();
    }
    let seed = "1100101".parse().unwrap();
    let within = EligibilityRequest::new(10 + 100 - 1, 100, seed);
    assert!(gateway.eligible_upkeeps(&registry.contract_address, &within).unwrap().is_empty());

    for id in 0 .. 100 {
        gateway.set_last_run_info(JobId::new(1), UpkeepId::new(id), 11, &PEER).unwrap();
    }
    let covered = EligibilityRequest::new(12, 100, within.seed);
    assert_eq!(gateway.eligible_upkeeps(&registry.contract_address, &covered).unwrap().len(), 100);
}

// ============================================================================
// SECTION: Durability and Guards
// ============================================================================

#[test]
fn sqlite_store_persists_across_instances() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("keeper.sqlite");
    let registry = {
        let store = store_for(&path);
        let registry = registry_with_upkeeps(&store, 1, 0xaa, 2);
        store.set_last_run_info(JobId::new(1), UpkeepId::new(1), 55, &PEER).unwrap();
        registry
    };
    let reopened = store_for(&path);
    assert_eq!(reopened.registry_for_job(JobId::new(1)).unwrap(), registry);
    let upkeep = reopened.upkeep(registry.id, UpkeepId::new(1)).unwrap().unwrap();
    assert_eq!(upkeep.last_run_block_height, 55);
    assert_eq!(upkeep.last_keeper_index, Some(1));
}

#[test]
fn sqlite_store_reports_lock_contention_as_busy() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("keeper.sqlite");
    let mut config = SqliteStoreConfig::new(&path);
    config.busy_timeout_ms = 50;
    let store = SqliteKeeperStore::new(config).expect("store init");
    registry_with_upkeeps(&store, 1, 0xaa, 1);

    let blocker = rusqlite::Connection::open(&path).unwrap();
    blocker.execute_batch("BEGIN IMMEDIATE;").unwrap();
    let result = store.delete_registry_for_job(JobId::new(1));
    blocker.execute_batch("COMMIT;").unwrap();
    let err = result.unwrap_err();
    assert!(matches!(err, StoreError::Busy(_)));
    assert!(err.is_transient());
    assert!(store.delete_registry_for_job(JobId::new(1)).unwrap());
}

#[test]
fn sqlite_store_interrupt_ends_lock_wait_and_rolls_back() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("keeper.sqlite");
    let mut config = SqliteStoreConfig::new(&path);
    config.busy_timeout_ms = 3_000;
    let store = Arc::new(SqliteKeeperStore::new(config).expect("store init"));
    let registry = registry_with_upkeeps(&store, 1, 0xaa, 2);

    let blocker = rusqlite::Connection::open(&path).unwrap();
    blocker.execute_batch("BEGIN IMMEDIATE;").unwrap();
    let interrupter = {
        let store = Arc::clone(&store);
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(200));
            store.interrupt();
        })
    };
    let started = Instant::now();
    let result = store.delete_registry_for_job(JobId::new(1));
    let elapsed = started.elapsed();
    interrupter.join().unwrap();
    blocker.execute_batch("COMMIT;").unwrap();

    let err = result.unwrap_err();
    assert!(matches!(err, StoreError::Interrupted(_)), "unexpected error: {err}");
    assert!(err.is_transient());
    assert!(elapsed < Duration::from_millis(2_000), "waited {elapsed:?}");
    assert_eq!(store.registries().unwrap().len(), 1);
    assert_eq!(
        store.all_upkeep_ids_for_registry(registry.id).unwrap(),
        vec![UpkeepId::new(0), UpkeepId::new(1)]
    );
}

#[test]
fn sqlite_store_interrupt_aborts_running_batch_delete() {
    let temp = TempDir::new().unwrap();
    let store = Arc::new(store_for(&temp.path().join("keeper.sqlite")));
    let registry = registry_with_upkeeps(&store, 1, 0xaa, 4);
    let upkeep_ids: Vec<UpkeepId> = (0 .. 400_000).map(UpkeepId::new).collect();

    let finished = Arc::new(AtomicBool::new(false));
    let interrupter = {
        let store = Arc::clone(&store);
        let finished = Arc::clone(&finished);
        thread::spawn(move || {
            while !finished.load(Ordering::Acquire) {
                thread::sleep(Duration::from_millis(1));
                store.interrupt();
            }
        })
    };
    thread::sleep(Duration::from_millis(5));
    let result = store.batch_delete_upkeeps_for_job(JobId::new(1), &upkeep_ids);
    finished.store(true, Ordering::Release);
    interrupter.join().unwrap();

    assert!(matches!(result, Err(StoreError::Interrupted(_))), "unexpected result: {result:?}");
    assert_eq!(store.all_upkeep_ids_for_registry(registry.id).unwrap().len(), 4);
}

#[test]
fn sqlite_store_interrupt_while_idle_is_harmless() {
    let temp = TempDir::new().unwrap();
    let store = store_for(&temp.path().join("keeper.sqlite"));
    store.interrupt();
    registry_with_upkeeps(&store, 1, 0xaa, 1);
    assert_eq!(store.registries().unwrap().len(), 1);
}

#[test]
fn sqlite_store_detects_corrupt_rows() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("keeper.sqlite");
    let store = store_for(&path);
    registry_with_upkeeps(&store, 1, 0xaa, 1);
    {
        let connection = rusqlite::Connection::open(&path).unwrap();
        connection
            .execute("UPDATE keeper_registries SET from_address = 'not-an-address'", rusqlite::params![])
            .unwrap();
    }
    assert!(matches!(store.registry_for_job(JobId::new(1)), Err(StoreError::Corrupt(_))));
}

#[test]
fn sqlite_store_rejects_version_mismatch() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("keeper.sqlite");
    let _store = store_for(&path);

    let connection = rusqlite::Connection::open(&path).unwrap();
    connection.execute("UPDATE store_meta SET version = 999", rusqlite::params![]).unwrap();

    let result = SqliteKeeperStore::new(SqliteStoreConfig::new(path));
    assert!(matches!(result, Err(SqliteStoreError::VersionMismatch(_))));
}

#[test]
fn sqlite_store_rejects_directory_path() {
    let temp = TempDir::new().unwrap();
    let result = SqliteKeeperStore::new(SqliteStoreConfig::new(temp.path()));
    assert!(matches!(result, Err(SqliteStoreError::Invalid(_))));
}

#[test]
fn sqlite_store_rejects_zero_busy_timeout() {
    let temp = TempDir::new().unwrap();
    let mut config = SqliteStoreConfig::new(temp.path().join("keeper.sqlite"));
    config.busy_timeout_ms = 0;
    assert!(matches!(SqliteKeeperStore::new(config), Err(SqliteStoreError::Invalid(_))));
}
