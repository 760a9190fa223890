// crates/keeper-core/src/interfaces/mod.rs
// ============================================================================
// Module: Keeper Interfaces
// Description: Backend-agnostic persistence interface for registries and upkeeps.
// Purpose: Define the store contract consumed by the eligibility gateway and job layer.
// Dependencies: crate::core, thiserror
// ============================================================================

//! ## Overview
//! [`KeeperStore`] is the single writer path for keeper bookkeeping. Backends
//! must make every write atomic per affected row or set, reject malformed
//! input before writing, and surface storage failures without retrying.

// ============================================================================
// SECTION: Imports
// ============================================================================

use thiserror::Error;

use crate::core::Address;
use crate::core::JobId;
use crate::core::KeeperRegistry;
use crate::core::RegistryId;
use crate::core::RegistrySpec;
use crate::core::RegistryValidationError;
use crate::core::UpkeepId;
use crate::core::UpkeepRegistration;
use crate::core::UpkeepSpec;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Keeper store errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// Input rejected before any write.
    #[error("keeper store validation error: {0}")]
    Validation(String),
    /// Lookup matched no row.
    #[error("keeper store not found: {0}")]
    NotFound(String),
    /// Lock contention or busy timeout expired.
    #[error("keeper store busy: {0}")]
    Busy(String),
    /// Caller aborted the in-flight call.
    #[error("keeper store call interrupted: {0}")]
    Interrupted(String),
    /// Store I/O error.
    #[error("keeper store io error: {0}")]
    Io(String),
    /// Stored data violates model invariants.
    #[error("keeper store corruption: {0}")]
    Corrupt(String),
    /// Store schema version is incompatible.
    #[error("keeper store version mismatch: {0}")]
    VersionMismatch(String),
    /// Store configuration is invalid.
    #[error("keeper store invalid configuration: {0}")]
    Invalid(String),
    /// Store reported an error.
    #[error("keeper store error: {0}")]
    Store(String),
}

impl StoreError {
    /// Returns true when the caller may retry the same call unchanged.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Busy(_) | Self::Interrupted(_))
    }
}

impl From<RegistryValidationError> for StoreError {
    fn from(err: RegistryValidationError) -> Self {
        Self::Validation(err.to_string())
    }
}

// ============================================================================
// SECTION: Store Results
// ============================================================================

/// Outcome of a last-run report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LastRunUpdate {
    /// The report advanced the stored height and keeper index.
    Recorded,
    /// The report did not advance the stored height; nothing changed.
    Stale,
}

/// Registry and its upkeeps read as one consistent view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistrySnapshot {
    /// Registry record.
    pub registry: KeeperRegistry,
    /// Upkeeps owned by the registry.
    pub upkeeps: Vec<UpkeepRegistration>,
}

// ============================================================================
// SECTION: Keeper Store
// ============================================================================

/// Durable store for keeper registries and upkeep registrations.
pub trait KeeperStore: Send + Sync {
    /// Lists every registry, in no particular order.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when reading fails.
    fn registries(&self) -> Result<Vec<KeeperRegistry>, StoreError>;

    /// Loads the registry with the given contract address.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] when no registry matches.
    fn registry_by_contract_address(
        &self,
        contract_address: &Address,
    ) -> Result<KeeperRegistry, StoreError>;

    /// Loads the registry bound to a job.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] when the job has no registry.
    fn registry_for_job(&self, job_id: JobId) -> Result<KeeperRegistry, StoreError>;

    /// Creates or updates a registry keyed by contract address.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Validation`] when `spec` is malformed or the
    /// job is already bound to another contract address.
    fn upsert_registry(&self, spec: RegistrySpec) -> Result<KeeperRegistry, StoreError>;

    /// Deletes a job's registry and all of its upkeeps. Returns false when
    /// the job had no registry.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the delete fails.
    fn delete_registry_for_job(&self, job_id: JobId) -> Result<bool, StoreError>;

    /// Inserts an upkeep or updates its descriptive fields, preserving the
    /// stored last-run bookkeeping of an existing row.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] when the owning registry is absent.
    fn upsert_upkeep(&self, spec: UpkeepSpec) -> Result<UpkeepRegistration, StoreError>;

    /// Loads one upkeep, if present.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when reading fails.
    fn upkeep(
        &self,
        registry_id: RegistryId,
        upkeep_id: UpkeepId,
    ) -> Result<Option<UpkeepRegistration>, StoreError>;

    /// Lists a registry's upkeep IDs in ascending order.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when reading fails.
    fn all_upkeep_ids_for_registry(
        &self,
        registry_id: RegistryId,
    ) -> Result<Vec<UpkeepId>, StoreError>;

    /// Deletes the listed upkeeps of a job's registry in one atomic step and
    /// returns how many rows were removed. Absent IDs are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] when the job has no registry.
    fn batch_delete_upkeeps_for_job(
        &self,
        job_id: JobId,
        upkeep_ids: &[UpkeepId],
    ) -> Result<u64, StoreError>;

    /// Records a perform report when `block_height` exceeds the stored height.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] when the job, the upkeep, or the
    /// keeper address is unknown.
    fn set_last_run_info(
        &self,
        job_id: JobId,
        upkeep_id: UpkeepId,
        block_height: u64,
        keeper_address: &Address,
    ) -> Result<LastRunUpdate, StoreError>;

    /// Reads a registry and its upkeeps as one consistent view.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] when no registry matches.
    fn registry_snapshot(&self, contract_address: &Address)
    -> Result<RegistrySnapshot, StoreError>;
}
