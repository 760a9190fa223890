// crates/keeper-store-sqlite/src/store.rs
// ============================================================================
// Module: SQLite Keeper Store
// Description: Durable KeeperStore backed by SQLite.
// Purpose: Persist registries and upkeeps with atomic, monotonic bookkeeping.
// Dependencies: keeper-core, alloy-primitives, rusqlite, serde, serde_json, thiserror, tracing
// ============================================================================

//! ## Overview
//! This module implements a durable [`KeeperStore`] using `SQLite`. Every
//! operation runs inside one transaction on a shared connection, so multi-row
//! deletes are never partially applied and snapshots are consistent.
//! `set_last_run_info` is a conditional `UPDATE` guarded by
//! `last_run_block_height < ?`, which makes the height compare-and-set atomic
//! at the storage layer.
//!
//! Lock contention is waited out by the store rather than by `SQLite`'s busy
//! handler: attempts are retried with capped backoff until the configured
//! busy timeout expires. [`SqliteKeeperStore::interrupt`] ends that wait as
//! well as any running statement, and the interrupted call rolls back.
//!
//! Addresses are stored as lowercase `0x`-prefixed hex. Unsigned values are
//! stored as `INTEGER` and must fit in `i64`; larger inputs are rejected as
//! validation errors and out-of-range stored values are reported as corrupt.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::thread;
use std::time::Duration;
use std::time::Instant;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;

use alloy_primitives::hex;
use keeper_core::Address;
use keeper_core::JobId;
use keeper_core::KeeperRegistry;
use keeper_core::KeeperStore;
use keeper_core::LastRunUpdate;
use keeper_core::RegistryId;
use keeper_core::RegistrySnapshot;
use keeper_core::RegistrySpec;
use keeper_core::StoreError;
use keeper_core::UpkeepId;
use keeper_core::UpkeepRegistration;
use keeper_core::UpkeepSpec;
use rusqlite::Connection;
use rusqlite::ErrorCode;
use rusqlite::InterruptHandle;
use rusqlite::OptionalExtension;
use rusqlite::Row;
use rusqlite::ToSql;
use rusqlite::Transaction;
use rusqlite::TransactionBehavior;
use rusqlite::params;
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;
use tracing::info;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// `SQLite` schema version for the store.
const SCHEMA_VERSION: i64 = 1;
/// Default busy timeout (ms).
const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;
/// Largest busy timeout `SQLite` accepts (ms).
const MAX_SQLITE_BUSY_TIMEOUT_MS: u64 = 2_147_483_647;
/// First pause between attempts while the database is locked.
const LOCK_RETRY_INITIAL_DELAY: Duration = Duration::from_millis(1);
/// Longest pause between attempts while the database is locked.
const LOCK_RETRY_MAX_DELAY: Duration = Duration::from_millis(20);
/// Registry columns in [`RegistryRow`] order.
const REGISTRY_COLUMNS: &str = "id, job_id, contract_address, from_address, keeper_index, \
                                num_keepers, block_count_per_turn, keepers_json, created_at";
/// Upkeep columns in [`UpkeepRow`] order.
const UPKEEP_COLUMNS: &str = "id, registry_id, upkeep_id, execute_gas, check_data, \
                              positioning_constant, last_run_block_height, last_keeper_index, \
                              created_at";

// ============================================================================
// SECTION: Config
// ============================================================================

/// `SQLite` journal mode configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SqliteStoreMode {
    /// WAL journal mode (recommended).
    #[default]
    Wal,
    /// Delete journal mode.
    Delete,
}

impl SqliteStoreMode {
    /// Returns the `SQLite` pragma value.
    #[must_use]
    pub const fn pragma_value(self) -> &'static str {
        match self {
            Self::Wal => "wal",
            Self::Delete => "delete",
        }
    }
}

/// `SQLite` sync mode configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SqliteSyncMode {
    /// Full synchronous mode (safest).
    #[default]
    Full,
    /// Normal synchronous mode.
    Normal,
}

impl SqliteSyncMode {
    /// Returns the `SQLite` pragma value.
    #[must_use]
    pub const fn pragma_value(self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::Normal => "normal",
        }
    }
}

/// Configuration for the `SQLite` keeper store.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SqliteStoreConfig {
    /// Path to the `SQLite` database file.
    pub path: PathBuf,
    /// Busy timeout in milliseconds; bounds how long any call waits on a lock.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
    /// `SQLite` journal mode.
    #[serde(default)]
    pub journal_mode: SqliteStoreMode,
    /// `SQLite` sync mode.
    #[serde(default)]
    pub sync_mode: SqliteSyncMode,
}

impl SqliteStoreConfig {
    /// Creates a config for `path` with default timeout and modes.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
            journal_mode: SqliteStoreMode::default(),
            sync_mode: SqliteSyncMode::default(),
        }
    }
}

/// Returns the default busy timeout for `SQLite` connections.
const fn default_busy_timeout_ms() -> u64 {
    DEFAULT_BUSY_TIMEOUT_MS
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// `SQLite` store errors.
#[derive(Debug, Error)]
pub enum SqliteStoreError {
    /// Store I/O error.
    #[error("sqlite store io error: {0}")]
    Io(String),
    /// `SQLite` engine error.
    #[error("sqlite store db error: {0}")]
    Db(String),
    /// Database stayed locked past the busy timeout.
    #[error("sqlite store busy: {0}")]
    Busy(String),
    /// Call aborted by [`SqliteKeeperStore::interrupt`].
    #[error("sqlite store interrupted: {0}")]
    Interrupted(String),
    /// Lookup matched no row.
    #[error("sqlite store not found: {0}")]
    NotFound(String),
    /// Input rejected before writing.
    #[error("sqlite store validation error: {0}")]
    Validation(String),
    /// Stored row violates model invariants.
    #[error("sqlite store corruption: {0}")]
    Corrupt(String),
    /// Store schema version mismatch.
    #[error("sqlite store version mismatch: {0}")]
    VersionMismatch(String),
    /// Invalid store configuration.
    #[error("sqlite store invalid configuration: {0}")]
    Invalid(String),
}

impl From<SqliteStoreError> for StoreError {
    fn from(error: SqliteStoreError) -> Self {
        match error {
            SqliteStoreError::Io(message) => Self::Io(message),
            SqliteStoreError::Db(message) => Self::Store(message),
            SqliteStoreError::Busy(message) => Self::Busy(message),
            SqliteStoreError::Interrupted(message) => Self::Interrupted(message),
            SqliteStoreError::NotFound(message) => Self::NotFound(message),
            SqliteStoreError::Validation(message) => Self::Validation(message),
            SqliteStoreError::Corrupt(message) => Self::Corrupt(message),
            SqliteStoreError::VersionMismatch(message) => Self::VersionMismatch(message),
            SqliteStoreError::Invalid(message) => Self::Invalid(message),
        }
    }
}

/// Classifies a `rusqlite` error, keeping busy and interrupt codes distinct.
fn db_error(err: rusqlite::Error) -> SqliteStoreError {
    match err.sqlite_error_code() {
        Some(ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked) => {
            SqliteStoreError::Busy(err.to_string())
        }
        Some(ErrorCode::OperationInterrupted) => SqliteStoreError::Interrupted(err.to_string()),
        _ => SqliteStoreError::Db(err.to_string()),
    }
}

// ============================================================================
// SECTION: Store
// ============================================================================

/// `SQLite`-backed keeper store.
#[derive(Clone)]
pub struct SqliteKeeperStore {
    /// Store configuration.
    config: SqliteStoreConfig,
    /// Shared `SQLite` connection guarded by a mutex.
    connection: Arc<Mutex<Connection>>,
    /// Handle that aborts the statement currently running on `connection`.
    interrupt: Arc<InterruptHandle>,
    /// Bumped by [`SqliteKeeperStore::interrupt`]; calls that observe a
    /// change since they started abort.
    cancel_epoch: Arc<AtomicU64>,
}

impl SqliteKeeperStore {
    /// Opens an `SQLite`-backed keeper store, creating the schema if needed.
    ///
    /// # Errors
    ///
    /// Returns [`SqliteStoreError`] when the database cannot be opened or
    /// initialized, or carries an unsupported schema version.
    pub fn new(config: SqliteStoreConfig) -> Result<Self, SqliteStoreError> {
        if config.busy_timeout_ms == 0 {
            return Err(SqliteStoreError::Invalid(
                "busy_timeout_ms must be greater than zero".to_string(),
            ));
        }
        prepare_store_path(&config.path)?;
        let mut connection = open_connection(&config)?;
        initialize_schema(&mut connection)?;
        connection.busy_handler(None).map_err(db_error)?;
        let interrupt = Arc::new(connection.get_interrupt_handle());
        debug!(path = %config.path.display(), "Keeper sqlite store opened");
        Ok(Self {
            config,
            connection: Arc::new(Mutex::new(connection)),
            interrupt,
            cancel_epoch: Arc::new(AtomicU64::new(0)),
        })
    }

    /// Returns the store configuration.
    #[must_use]
    pub const fn config(&self) -> &SqliteStoreConfig {
        &self.config
    }

    /// Aborts every call in flight on this store.
    ///
    /// A running statement is stopped, and calls waiting on lock contention
    /// stop waiting. Each aborted call fails with [`StoreError::Interrupted`]
    /// and its transaction is rolled back. Calls started afterwards are not
    /// affected.
    pub fn interrupt(&self) {
        self.cancel_epoch.fetch_add(1, Ordering::AcqRel);
        self.interrupt.interrupt();
    }

    /// Runs `operation` in one transaction, waiting out lock contention.
    ///
    /// `SQLite`'s own busy handler is disabled, so a locked database file
    /// fails the attempt at once and the connection mutex is only ever held
    /// for one attempt. Busy attempts are retried with capped backoff, outside
    /// the mutex, until the busy timeout expires or the store is interrupted.
    fn transact<T>(
        &self,
        behavior: TransactionBehavior,
        mut operation: impl FnMut(&Transaction<'_>) -> Result<T, SqliteStoreError>,
    ) -> Result<T, SqliteStoreError> {
        let epoch = self.cancel_epoch.load(Ordering::Acquire);
        let deadline =
            Instant::now().checked_add(Duration::from_millis(self.config.busy_timeout_ms));
        let mut delay = LOCK_RETRY_INITIAL_DELAY;
        loop {
            let attempt = {
                let mut connection = self
                    .connection
                    .lock()
                    .map_err(|_| SqliteStoreError::Db("mutex poisoned".to_string()))?;
                if self.interrupted_since(epoch) {
                    return Err(SqliteStoreError::Interrupted(
                        "interrupted while waiting for the connection".to_string(),
                    ));
                }
                self.attempt(&mut connection, behavior, epoch, &mut operation)
            };
            let message = match attempt {
                Err(SqliteStoreError::Busy(message)) => message,
                other => return other,
            };
            if self.interrupted_since(epoch) {
                return Err(SqliteStoreError::Interrupted(format!(
                    "interrupted while waiting: {message}"
                )));
            }
            let wait = match deadline {
                Some(deadline) => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    if remaining.is_zero() {
                        return Err(SqliteStoreError::Busy(message));
                    }
                    delay.min(remaining)
                }
                None => delay,
            };
            thread::sleep(wait);
            delay = delay.saturating_mul(2).min(LOCK_RETRY_MAX_DELAY);
        }
    }

    /// Runs one transaction attempt; an interrupt seen before commit rolls it back.
    fn attempt<T>(
        &self,
        connection: &mut Connection,
        behavior: TransactionBehavior,
        epoch: u64,
        operation: &mut impl FnMut(&Transaction<'_>) -> Result<T, SqliteStoreError>,
    ) -> Result<T, SqliteStoreError> {
        let tx = connection.transaction_with_behavior(behavior).map_err(db_error)?;
        let value = operation(&tx)?;
        if self.interrupted_since(epoch) {
            return Err(SqliteStoreError::Interrupted("interrupted before commit".to_string()));
        }
        tx.commit().map_err(db_error)?;
        Ok(value)
    }

    /// Returns true when [`SqliteKeeperStore::interrupt`] ran after `epoch` was read.
    fn interrupted_since(&self, epoch: u64) -> bool {
        self.cancel_epoch.load(Ordering::Acquire) != epoch
    }
}

impl KeeperStore for SqliteKeeperStore {
    fn registries(&self) -> Result<Vec<KeeperRegistry>, StoreError> {
        self.load_registries().map_err(StoreError::from)
    }

    fn registry_by_contract_address(
        &self,
        contract_address: &Address,
    ) -> Result<KeeperRegistry, StoreError> {
        let encoded = encode_address(contract_address);
        self.transact(TransactionBehavior::Deferred, |tx| {
            find_registry(tx, "contract_address", &encoded)
        })?
        .ok_or_else(|| StoreError::NotFound(format!("no registry at {contract_address}")))
    }

    fn registry_for_job(&self, job_id: JobId) -> Result<KeeperRegistry, StoreError> {
        Ok(self.transact(TransactionBehavior::Deferred, |tx| registry_for_job(tx, job_id))?)
    }

    fn upsert_registry(&self, spec: RegistrySpec) -> Result<KeeperRegistry, StoreError> {
        self.save_registry(&spec).map_err(StoreError::from)
    }

    fn delete_registry_for_job(&self, job_id: JobId) -> Result<bool, StoreError> {
        Ok(self.transact(TransactionBehavior::Immediate, |tx| {
            let deleted = tx
                .execute("DELETE FROM keeper_registries WHERE job_id = ?1", params![job_id.get()])
                .map_err(db_error)?;
            Ok(deleted > 0)
        })?)
    }

    fn upsert_upkeep(&self, spec: UpkeepSpec) -> Result<UpkeepRegistration, StoreError> {
        self.save_upkeep(&spec).map_err(StoreError::from)
    }

    fn upkeep(
        &self,
        registry_id: RegistryId,
        upkeep_id: UpkeepId,
    ) -> Result<Option<UpkeepRegistration>, StoreError> {
        let upkeep_id = sql_int(upkeep_id.get(), "upkeep_id")?;
        Ok(self.transact(TransactionBehavior::Deferred, |tx| {
            find_upkeep(tx, registry_id.get(), upkeep_id)
        })?)
    }

    fn all_upkeep_ids_for_registry(
        &self,
        registry_id: RegistryId,
    ) -> Result<Vec<UpkeepId>, StoreError> {
        self.load_upkeep_ids(registry_id).map_err(StoreError::from)
    }

    fn batch_delete_upkeeps_for_job(
        &self,
        job_id: JobId,
        upkeep_ids: &[UpkeepId],
    ) -> Result<u64, StoreError> {
        self.remove_upkeeps(job_id, upkeep_ids).map_err(StoreError::from)
    }

    fn set_last_run_info(
        &self,
        job_id: JobId,
        upkeep_id: UpkeepId,
        block_height: u64,
        keeper_address: &Address,
    ) -> Result<LastRunUpdate, StoreError> {
        self.record_last_run(job_id, upkeep_id, block_height, keeper_address)
            .map_err(StoreError::from)
    }

    fn registry_snapshot(
        &self,
        contract_address: &Address,
    ) -> Result<RegistrySnapshot, StoreError> {
        self.load_snapshot(contract_address).map_err(StoreError::from)
    }
}

impl SqliteKeeperStore {
    /// Loads every registry ordered by row ID.
    fn load_registries(&self) -> Result<Vec<KeeperRegistry>, SqliteStoreError> {
        let rows = self.transact(TransactionBehavior::Deferred, |tx| {
            let mut statement = tx
                .prepare(&format!("SELECT {REGISTRY_COLUMNS} FROM keeper_registries ORDER BY id"))
                .map_err(db_error)?;
            statement
                .query_map(params![], RegistryRow::from_row)
                .map_err(db_error)?
                .collect::<Result<Vec<_>, _>>()
                .map_err(db_error)
        })?;
        rows.into_iter().map(RegistryRow::into_registry).collect()
    }

    /// Creates or updates a registry keyed by contract address.
    fn save_registry(&self, spec: &RegistrySpec) -> Result<KeeperRegistry, SqliteStoreError> {
        spec.validate().map_err(|err| SqliteStoreError::Validation(err.to_string()))?;
        let contract_address = encode_address(&spec.contract_address);
        let from_address = encode_address(&spec.from_address);
        let keepers_json = encode_keepers(&spec.keepers)?;
        let block_count_per_turn = sql_int(spec.block_count_per_turn, "block_count_per_turn")?;
        let now = unix_millis();
        let registry = self.transact(TransactionBehavior::Immediate, |tx| {
            let bound: Option<String> = tx
                .query_row(
                    "SELECT contract_address FROM keeper_registries WHERE job_id = ?1",
                    params![spec.job_id.get()],
                    |row| row.get(0),
                )
                .optional()
                .map_err(db_error)?;
            if let Some(bound) = bound
                && bound != contract_address
            {
                return Err(SqliteStoreError::Validation(format!(
                    "job {} is already bound to registry {bound}",
                    spec.job_id
                )));
            }
            tx.execute(
                "INSERT INTO keeper_registries (job_id, contract_address, from_address, \
                 keeper_index, num_keepers, block_count_per_turn, keepers_json, created_at, \
                 updated_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8) \
                 ON CONFLICT(contract_address) DO UPDATE SET job_id = excluded.job_id, \
                 from_address = excluded.from_address, keeper_index = excluded.keeper_index, \
                 num_keepers = excluded.num_keepers, block_count_per_turn = \
                 excluded.block_count_per_turn, keepers_json = excluded.keepers_json, \
                 updated_at = excluded.updated_at",
                params![
                    spec.job_id.get(),
                    contract_address,
                    from_address,
                    spec.keeper_index,
                    spec.num_keepers,
                    block_count_per_turn,
                    keepers_json,
                    now
                ],
            )
            .map_err(db_error)?;
            find_registry(tx, "contract_address", &contract_address)?.ok_or_else(|| {
                SqliteStoreError::Corrupt(format!("registry {contract_address} vanished on upsert"))
            })
        })?;
        info!(
            registry_id = registry.id.get(),
            job_id = registry.job_id.get(),
            contract_address = %registry.contract_address,
            "Keeper registry stored"
        );
        Ok(registry)
    }

    /// Inserts an upkeep or refreshes its descriptive fields.
    fn save_upkeep(&self, spec: &UpkeepSpec) -> Result<UpkeepRegistration, SqliteStoreError> {
        let upkeep_id = sql_int(spec.upkeep_id.get(), "upkeep_id")?;
        let last_run = sql_int(spec.last_run_block_height, "last_run_block_height")?;
        let now = unix_millis();
        self.transact(TransactionBehavior::Immediate, |tx| {
            let registry_exists = tx
                .query_row(
                    "SELECT 1 FROM keeper_registries WHERE id = ?1",
                    params![spec.registry_id.get()],
                    |_| Ok(()),
                )
                .optional()
                .map_err(db_error)?
                .is_some();
            if !registry_exists {
                return Err(SqliteStoreError::NotFound(format!(
                    "no registry with id {}",
                    spec.registry_id
                )));
            }
            tx.execute(
                "INSERT INTO upkeep_registrations (registry_id, upkeep_id, execute_gas, \
                 check_data, positioning_constant, last_run_block_height, last_keeper_index, \
                 created_at, updated_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8) \
                 ON CONFLICT(registry_id, upkeep_id) DO UPDATE SET execute_gas = \
                 excluded.execute_gas, check_data = excluded.check_data, positioning_constant = \
                 excluded.positioning_constant, updated_at = excluded.updated_at",
                params![
                    spec.registry_id.get(),
                    upkeep_id,
                    spec.execute_gas,
                    spec.check_data,
                    spec.positioning_constant,
                    last_run,
                    spec.last_keeper_index,
                    now
                ],
            )
            .map_err(db_error)?;
            find_upkeep(tx, spec.registry_id.get(), upkeep_id)?.ok_or_else(|| {
                SqliteStoreError::Corrupt(format!("upkeep {} vanished on upsert", spec.upkeep_id))
            })
        })
    }

    /// Lists a registry's upkeep IDs in ascending order.
    fn load_upkeep_ids(&self, registry_id: RegistryId) -> Result<Vec<UpkeepId>, SqliteStoreError> {
        let raw = self.transact(TransactionBehavior::Deferred, |tx| {
            let mut statement = tx
                .prepare(
                    "SELECT upkeep_id FROM upkeep_registrations WHERE registry_id = ?1 ORDER BY \
                     upkeep_id",
                )
                .map_err(db_error)?;
            statement
                .query_map(params![registry_id.get()], |row| row.get::<_, i64>(0))
                .map_err(db_error)?
                .collect::<Result<Vec<_>, _>>()
                .map_err(db_error)
        })?;
        raw.into_iter()
            .map(|value| column_u64(value, "upkeep_id").map(UpkeepId::new))
            .collect()
    }

    /// Deletes the listed upkeeps of a job's registry in one transaction.
    fn remove_upkeeps(
        &self,
        job_id: JobId,
        upkeep_ids: &[UpkeepId],
    ) -> Result<u64, SqliteStoreError> {
        let deleted = self.transact(TransactionBehavior::Immediate, |tx| {
            let registry = registry_for_job(tx, job_id)?;
            let mut statement = tx
                .prepare("DELETE FROM upkeep_registrations WHERE registry_id = ?1 AND upkeep_id = ?2")
                .map_err(db_error)?;
            let mut deleted = 0_u64;
            for upkeep_id in upkeep_ids {
                let Ok(upkeep_id) = i64::try_from(upkeep_id.get()) else {
                    continue;
                };
                let changed =
                    statement.execute(params![registry.id.get(), upkeep_id]).map_err(db_error)?;
                deleted += u64::try_from(changed).unwrap_or(0);
            }
            Ok(deleted)
        })?;
        debug!(job_id = job_id.get(), deleted, "Upkeeps removed from sqlite store");
        Ok(deleted)
    }

    /// Applies a last-run report as a compare-and-set on the stored height.
    fn record_last_run(
        &self,
        job_id: JobId,
        upkeep_id: UpkeepId,
        block_height: u64,
        keeper_address: &Address,
    ) -> Result<LastRunUpdate, SqliteStoreError> {
        let sql_upkeep_id = sql_int(upkeep_id.get(), "upkeep_id")?;
        let sql_height = sql_int(block_height, "block_height")?;
        let now = unix_millis();
        self.transact(TransactionBehavior::Immediate, |tx| {
            let registry = registry_for_job(tx, job_id)?;
            let keeper_index = registry.keeper_index_for(keeper_address).ok_or_else(|| {
                SqliteStoreError::NotFound(format!(
                    "{keeper_address} is not a keeper of job {job_id}"
                ))
            })?;
            let changed = tx
                .execute(
                    "UPDATE upkeep_registrations SET last_run_block_height = ?1, \
                     last_keeper_index = ?2, updated_at = ?3 WHERE registry_id = ?4 AND \
                     upkeep_id = ?5 AND last_run_block_height < ?1",
                    params![sql_height, keeper_index, now, registry.id.get(), sql_upkeep_id],
                )
                .map_err(db_error)?;
            if changed > 0 {
                return Ok(LastRunUpdate::Recorded);
            }
            let exists = tx
                .query_row(
                    "SELECT 1 FROM upkeep_registrations WHERE registry_id = ?1 AND upkeep_id = ?2",
                    params![registry.id.get(), sql_upkeep_id],
                    |_| Ok(()),
                )
                .optional()
                .map_err(db_error)?
                .is_some();
            if exists {
                Ok(LastRunUpdate::Stale)
            } else {
                Err(SqliteStoreError::NotFound(format!("no upkeep {upkeep_id} for job {job_id}")))
            }
        })
    }

    /// Reads a registry and its upkeeps in one transaction.
    fn load_snapshot(
        &self,
        contract_address: &Address,
    ) -> Result<RegistrySnapshot, SqliteStoreError> {
        let encoded = encode_address(contract_address);
        let (registry, rows) = self.transact(TransactionBehavior::Deferred, |tx| {
            let registry = find_registry(tx, "contract_address", &encoded)?.ok_or_else(|| {
                SqliteStoreError::NotFound(format!("no registry at {contract_address}"))
            })?;
            let mut statement = tx
                .prepare(&format!(
                    "SELECT {UPKEEP_COLUMNS} FROM upkeep_registrations WHERE registry_id = ?1 \
                     ORDER BY upkeep_id"
                ))
                .map_err(db_error)?;
            let rows = statement
                .query_map(params![registry.id.get()], UpkeepRow::from_row)
                .map_err(db_error)?
                .collect::<Result<Vec<_>, _>>()
                .map_err(db_error)?;
            Ok((registry, rows))
        })?;
        let upkeeps = rows.into_iter().map(UpkeepRow::into_upkeep).collect::<Result<Vec<_>, _>>()?;
        Ok(RegistrySnapshot {
            registry,
            upkeeps,
        })
    }
}

// ============================================================================
// SECTION: Rows
// ============================================================================

/// Raw registry row as stored.
struct RegistryRow {
    /// Row ID.
    id: i64,
    /// Owning job.
    job_id: i64,
    /// Hex contract address.
    contract_address: String,
    /// Hex from address.
    from_address: String,
    /// Keeper index.
    keeper_index: i64,
    /// Keeper count.
    num_keepers: i64,
    /// Turn length.
    block_count_per_turn: i64,
    /// JSON array of hex keeper addresses.
    keepers_json: String,
    /// Creation time.
    created_at: i64,
}

impl RegistryRow {
    /// Reads a row selected with [`REGISTRY_COLUMNS`].
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            job_id: row.get(1)?,
            contract_address: row.get(2)?,
            from_address: row.get(3)?,
            keeper_index: row.get(4)?,
            num_keepers: row.get(5)?,
            block_count_per_turn: row.get(6)?,
            keepers_json: row.get(7)?,
            created_at: row.get(8)?,
        })
    }

    /// Converts the row into a model record, rejecting out-of-range values.
    fn into_registry(self) -> Result<KeeperRegistry, SqliteStoreError> {
        let keepers: Vec<String> = serde_json::from_str(&self.keepers_json)
            .map_err(|err| SqliteStoreError::Corrupt(format!("keepers_json: {err}")))?;
        let keepers =
            keepers.iter().map(|keeper| decode_address(keeper)).collect::<Result<Vec<_>, _>>()?;
        Ok(KeeperRegistry {
            id: RegistryId::new(self.id),
            job_id: JobId::new(self.job_id),
            contract_address: decode_address(&self.contract_address)?,
            from_address: decode_address(&self.from_address)?,
            keeper_index: column_u32(self.keeper_index, "keeper_index")?,
            num_keepers: column_u32(self.num_keepers, "num_keepers")?,
            block_count_per_turn: column_u64(self.block_count_per_turn, "block_count_per_turn")?,
            keepers,
            created_at: self.created_at,
        })
    }
}

/// Raw upkeep row as stored.
struct UpkeepRow {
    /// Row ID.
    id: i64,
    /// Owning registry.
    registry_id: i64,
    /// On-chain upkeep ID.
    upkeep_id: i64,
    /// Gas limit.
    execute_gas: i64,
    /// Opaque payload.
    check_data: Vec<u8>,
    /// Ordering input.
    positioning_constant: i64,
    /// Last-run height.
    last_run_block_height: i64,
    /// Last keeper index.
    last_keeper_index: Option<i64>,
    /// Creation time.
    created_at: i64,
}

impl UpkeepRow {
    /// Reads a row selected with [`UPKEEP_COLUMNS`].
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            registry_id: row.get(1)?,
            upkeep_id: row.get(2)?,
            execute_gas: row.get(3)?,
            check_data: row.get(4)?,
            positioning_constant: row.get(5)?,
            last_run_block_height: row.get(6)?,
            last_keeper_index: row.get(7)?,
            created_at: row.get(8)?,
        })
    }

    /// Converts the row into a model record, rejecting out-of-range values.
    fn into_upkeep(self) -> Result<UpkeepRegistration, SqliteStoreError> {
        let positioning_constant = i32::try_from(self.positioning_constant).map_err(|_| {
            SqliteStoreError::Corrupt(format!(
                "positioning_constant out of range: {}",
                self.positioning_constant
            ))
        })?;
        let last_keeper_index = self
            .last_keeper_index
            .map(|value| column_u32(value, "last_keeper_index"))
            .transpose()?;
        Ok(UpkeepRegistration {
            id: self.id,
            registry_id: RegistryId::new(self.registry_id),
            upkeep_id: UpkeepId::new(column_u64(self.upkeep_id, "upkeep_id")?),
            execute_gas: column_u32(self.execute_gas, "execute_gas")?,
            check_data: self.check_data,
            positioning_constant,
            last_run_block_height: column_u64(
                self.last_run_block_height,
                "last_run_block_height",
            )?,
            last_keeper_index,
            created_at: self.created_at,
        })
    }
}

// ============================================================================
// SECTION: Queries
// ============================================================================

/// Loads one registry matching `column = value`.
fn find_registry(
    connection: &Connection,
    column: &str,
    value: &dyn ToSql,
) -> Result<Option<KeeperRegistry>, SqliteStoreError> {
    connection
        .query_row(
            &format!("SELECT {REGISTRY_COLUMNS} FROM keeper_registries WHERE {column} = ?1"),
            params![value],
            RegistryRow::from_row,
        )
        .optional()
        .map_err(db_error)?
        .map(RegistryRow::into_registry)
        .transpose()
}

/// Loads the registry bound to a job.
fn registry_for_job(
    connection: &Connection,
    job_id: JobId,
) -> Result<KeeperRegistry, SqliteStoreError> {
    find_registry(connection, "job_id", &job_id.get())?
        .ok_or_else(|| SqliteStoreError::NotFound(format!("no registry for job {job_id}")))
}

/// Loads one upkeep by owning registry and upkeep ID.
fn find_upkeep(
    connection: &Connection,
    registry_id: i64,
    upkeep_id: i64,
) -> Result<Option<UpkeepRegistration>, SqliteStoreError> {
    connection
        .query_row(
            &format!(
                "SELECT {UPKEEP_COLUMNS} FROM upkeep_registrations WHERE registry_id = ?1 AND \
                 upkeep_id = ?2"
            ),
            params![registry_id, upkeep_id],
            UpkeepRow::from_row,
        )
        .optional()
        .map_err(db_error)?
        .map(UpkeepRow::into_upkeep)
        .transpose()
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Rejects empty and directory paths, then creates the parent directory.
fn prepare_store_path(path: &Path) -> Result<(), SqliteStoreError> {
    if path.as_os_str().is_empty() {
        return Err(SqliteStoreError::Invalid("store path must not be empty".to_string()));
    }
    if path.is_dir() {
        return Err(SqliteStoreError::Invalid("store path is a directory".to_string()));
    }
    match path.parent() {
        Some(parent) => {
            std::fs::create_dir_all(parent).map_err(|err| SqliteStoreError::Io(err.to_string()))
        }
        None => Ok(()),
    }
}

/// Opens a connection and applies the configured pragmas.
///
/// `SQLite` waits out contention itself only until the schema is ready;
/// [`SqliteKeeperStore::new`] then hands waiting over to the store.
fn open_connection(config: &SqliteStoreConfig) -> Result<Connection, SqliteStoreError> {
    let connection = Connection::open(&config.path).map_err(db_error)?;
    let setup_timeout = config.busy_timeout_ms.min(MAX_SQLITE_BUSY_TIMEOUT_MS);
    connection.busy_timeout(Duration::from_millis(setup_timeout)).map_err(db_error)?;
    connection
        .execute_batch(&format!(
            "PRAGMA foreign_keys = ON; PRAGMA journal_mode = {}; PRAGMA synchronous = {};",
            config.journal_mode.pragma_value(),
            config.sync_mode.pragma_value()
        ))
        .map_err(db_error)?;
    Ok(connection)
}

/// Initializes the `SQLite` schema or validates the existing version.
fn initialize_schema(connection: &mut Connection) -> Result<(), SqliteStoreError> {
    let tx = connection.transaction().map_err(db_error)?;
    tx.execute_batch("CREATE TABLE IF NOT EXISTS store_meta (version INTEGER NOT NULL);")
        .map_err(db_error)?;
    let version: Option<i64> = tx
        .query_row("SELECT version FROM store_meta LIMIT 1", params![], |row| row.get(0))
        .optional()
        .map_err(db_error)?;
    match version {
        None => {
            tx.execute("INSERT INTO store_meta (version) VALUES (?1)", params![SCHEMA_VERSION])
                .map_err(db_error)?;
            tx.execute_batch(
                "CREATE TABLE IF NOT EXISTS keeper_registries (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    job_id INTEGER NOT NULL UNIQUE,
                    contract_address TEXT NOT NULL UNIQUE,
                    from_address TEXT NOT NULL,
                    keeper_index INTEGER NOT NULL CHECK (keeper_index >= 0),
                    num_keepers INTEGER NOT NULL CHECK (num_keepers > 0),
                    block_count_per_turn INTEGER NOT NULL CHECK (block_count_per_turn > 0),
                    keepers_json TEXT NOT NULL,
                    created_at INTEGER NOT NULL,
                    updated_at INTEGER NOT NULL
                );
                CREATE TABLE IF NOT EXISTS upkeep_registrations (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    registry_id INTEGER NOT NULL,
                    upkeep_id INTEGER NOT NULL CHECK (upkeep_id >= 0),
                    execute_gas INTEGER NOT NULL,
                    check_data BLOB NOT NULL,
                    positioning_constant INTEGER NOT NULL,
                    last_run_block_height INTEGER NOT NULL DEFAULT 0,
                    last_keeper_index INTEGER,
                    created_at INTEGER NOT NULL,
                    updated_at INTEGER NOT NULL,
                    UNIQUE (registry_id, upkeep_id),
                    FOREIGN KEY (registry_id) REFERENCES keeper_registries(id) ON DELETE CASCADE
                );",
            )
            .map_err(db_error)?;
        }
        Some(value) if value == SCHEMA_VERSION => {}
        Some(value) => {
            return Err(SqliteStoreError::VersionMismatch(format!(
                "unsupported schema version: {value}"
            )));
        }
    }
    tx.commit().map_err(db_error)?;
    Ok(())
}

/// Encodes an address as lowercase `0x`-prefixed hex.
fn encode_address(address: &Address) -> String {
    hex::encode_prefixed(address)
}

/// Decodes a stored address.
fn decode_address(value: &str) -> Result<Address, SqliteStoreError> {
    value
        .parse::<Address>()
        .map_err(|err| SqliteStoreError::Corrupt(format!("invalid stored address {value}: {err}")))
}

/// Encodes the keeper set as a JSON array of hex addresses.
fn encode_keepers(keepers: &[Address]) -> Result<String, SqliteStoreError> {
    let encoded: Vec<String> = keepers.iter().map(encode_address).collect();
    serde_json::to_string(&encoded).map_err(|err| SqliteStoreError::Invalid(err.to_string()))
}

/// Converts an unsigned input to a storable integer.
fn sql_int(value: u64, field: &str) -> Result<i64, SqliteStoreError> {
    i64::try_from(value).map_err(|_| {
        SqliteStoreError::Validation(format!("{field} {value} exceeds the storable range"))
    })
}

/// Reads a stored integer as `u64`.
fn column_u64(value: i64, column: &str) -> Result<u64, SqliteStoreError> {
    u64::try_from(value)
        .map_err(|_| SqliteStoreError::Corrupt(format!("{column} out of range: {value}")))
}

/// Reads a stored integer as `u32`.
fn column_u32(value: i64, column: &str) -> Result<u32, SqliteStoreError> {
    u32::try_from(value)
        .map_err(|_| SqliteStoreError::Corrupt(format!("{column} out of range: {value}")))
}

/// Returns the current unix epoch in milliseconds.
fn unix_millis() -> i64 {
    let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default();
    i64::try_from(now.as_millis()).unwrap_or(i64::MAX)
}
