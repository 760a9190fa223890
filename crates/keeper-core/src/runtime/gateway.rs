// crates/keeper-core/src/runtime/gateway.rs
// ============================================================================
// Module: Keeper Gateway
// Description: Operation surface consumed by the keeper job layer.
// Purpose: Serialize eligibility per registry and trace store writes.
// Dependencies: crate::{core, interfaces}, tracing
// ============================================================================

//! ## Overview
//! [`KeeperGateway`] wraps a [`KeeperStore`] and exposes the operations the
//! job layer calls each block. Eligibility for one contract address is
//! computed under a per-registry lock so two invocations never compute over
//! interleaved snapshots; different registries proceed in parallel. Locks of
//! unknown or deleted registries are dropped. Store errors are returned
//! unchanged and never retried here.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;

use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::core::Address;
use crate::core::JobId;
use crate::core::KeeperRegistry;
use crate::core::RegistryId;
use crate::core::RegistrySpec;
use crate::core::UpkeepId;
use crate::core::UpkeepRegistration;
use crate::core::UpkeepSpec;
use crate::interfaces::KeeperStore;
use crate::interfaces::LastRunUpdate;
use crate::interfaces::StoreError;
use crate::runtime::eligibility;
use crate::runtime::eligibility::EligibilityRequest;

// ============================================================================
// SECTION: Gateway
// ============================================================================

/// Eligibility locks keyed by contract address.
type RegistryLocks = BTreeMap<Address, Arc<Mutex<()>>>;

/// Keeper operation surface backed by a [`KeeperStore`].
#[derive(Debug)]
pub struct KeeperGateway<S> {
    /// Backing store.
    store: S,
    /// Per-contract-address eligibility locks.
    registry_locks: Mutex<RegistryLocks>,
}

impl<S: KeeperStore> KeeperGateway<S> {
    /// Creates a gateway over `store`.
    #[must_use]
    pub const fn new(store: S) -> Self {
        Self {
            store,
            registry_locks: Mutex::new(BTreeMap::new()),
        }
    }

    /// Returns the backing store.
    #[must_use]
    pub const fn store(&self) -> &S {
        &self.store
    }

    /// Lists every registry.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when reading fails.
    pub fn registries(&self) -> Result<Vec<KeeperRegistry>, StoreError> {
        self.store.registries()
    }

    /// Loads the registry at `contract_address`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] when no registry matches.
    pub fn registry_by_contract_address(
        &self,
        contract_address: &Address,
    ) -> Result<KeeperRegistry, StoreError> {
        self.store.registry_by_contract_address(contract_address)
    }

    /// Loads the registry bound to `job_id`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] when the job has no registry.
    pub fn registry_for_job(&self, job_id: JobId) -> Result<KeeperRegistry, StoreError> {
        self.store.registry_for_job(job_id)
    }

    /// Creates or updates a registry after validating it.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Validation`] when `spec` is rejected.
    pub fn upsert_registry(&self, spec: RegistrySpec) -> Result<KeeperRegistry, StoreError> {
        let registry = self.store.upsert_registry(spec)?;
        info!(
            job_id = registry.job_id.get(),
            contract_address = %registry.contract_address,
            keeper_index = registry.keeper_index,
            num_keepers = registry.num_keepers,
            block_count_per_turn = registry.block_count_per_turn,
            "Keeper registry upserted"
        );
        Ok(registry)
    }

    /// Tears down a job's registry and upkeeps.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the delete fails.
    pub fn delete_registry_for_job(&self, job_id: JobId) -> Result<bool, StoreError> {
        let contract_address = match self.store.registry_for_job(job_id) {
            Ok(registry) => Some(registry.contract_address),
            Err(StoreError::NotFound(_)) => None,
            Err(err) => return Err(err),
        };
        let deleted = self.store.delete_registry_for_job(job_id)?;
        if let Some(contract_address) = contract_address {
            self.forget_registry_lock(&contract_address)?;
        }
        info!(job_id = job_id.get(), deleted, "Keeper job registry removed");
        Ok(deleted)
    }

    /// Inserts or refreshes an upkeep registration.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] when the owning registry is absent.
    pub fn upsert_upkeep(&self, spec: UpkeepSpec) -> Result<UpkeepRegistration, StoreError> {
        self.store.upsert_upkeep(spec)
    }

    /// Loads one upkeep.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when reading fails.
    pub fn upkeep(
        &self,
        registry_id: RegistryId,
        upkeep_id: UpkeepId,
    ) -> Result<Option<UpkeepRegistration>, StoreError> {
        self.store.upkeep(registry_id, upkeep_id)
    }

    /// Lists a registry's upkeep IDs in ascending order.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when reading fails.
    pub fn all_upkeep_ids_for_registry(
        &self,
        registry_id: RegistryId,
    ) -> Result<Vec<UpkeepId>, StoreError> {
        self.store.all_upkeep_ids_for_registry(registry_id)
    }

    /// Deletes cancelled upkeeps of a job atomically.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] when the job has no registry.
    pub fn batch_delete_upkeeps_for_job(
        &self,
        job_id: JobId,
        upkeep_ids: &[UpkeepId],
    ) -> Result<u64, StoreError> {
        let deleted = self.store.batch_delete_upkeeps_for_job(job_id, upkeep_ids)?;
        debug!(
            job_id = job_id.get(),
            requested = upkeep_ids.len(),
            deleted,
            "Upkeeps deleted for job"
        );
        Ok(deleted)
    }

    /// Computes the upkeeps this node should check for `contract_address`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] when no registry matches, and
    /// [`StoreError::Corrupt`] when the stored turn configuration is unusable.
    pub fn eligible_upkeeps(
        &self,
        contract_address: &Address,
        request: &EligibilityRequest,
    ) -> Result<Vec<UpkeepRegistration>, StoreError> {
        let lock = self.registry_lock(contract_address)?;
        let _serialized = lock
            .lock()
            .map_err(|_| StoreError::Store("registry eligibility lock poisoned".to_string()))?;
        let snapshot = match self.store.registry_snapshot(contract_address) {
            Ok(snapshot) => snapshot,
            Err(err @ StoreError::NotFound(_)) => {
                self.forget_registry_lock(contract_address)?;
                return Err(err);
            }
            Err(err) => return Err(err),
        };
        let total = snapshot.upkeeps.len();
        let eligible =
            eligibility::eligible_upkeeps(&snapshot.registry, snapshot.upkeeps, request)
                .map_err(|err| {
                    StoreError::Corrupt(format!("registry {contract_address}: {err}"))
                })?;
        debug!(
            contract_address = %contract_address,
            block_height = request.block_height,
            keeper_index = snapshot.registry.keeper_index,
            total,
            eligible = eligible.len(),
            "Eligible upkeeps computed"
        );
        Ok(eligible)
    }

    /// Records a perform report for an upkeep.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] when the job, upkeep, or keeper
    /// address is unknown.
    pub fn set_last_run_info(
        &self,
        job_id: JobId,
        upkeep_id: UpkeepId,
        block_height: u64,
        keeper_address: &Address,
    ) -> Result<LastRunUpdate, StoreError> {
        match self.store.set_last_run_info(job_id, upkeep_id, block_height, keeper_address) {
            Ok(LastRunUpdate::Stale) => {
                debug!(
                    job_id = job_id.get(),
                    upkeep_id = upkeep_id.get(),
                    block_height,
                    "Stale last run report ignored"
                );
                Ok(LastRunUpdate::Stale)
            }
            Ok(update) => Ok(update),
            Err(err @ StoreError::NotFound(_)) => {
                warn!(
                    job_id = job_id.get(),
                    upkeep_id = upkeep_id.get(),
                    keeper_address = %keeper_address,
                    error = %err,
                    "Last run report rejected"
                );
                Err(err)
            }
            Err(err) => Err(err),
        }
    }

    /// Returns how many contract addresses currently hold an eligibility lock.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Store`] when the lock table is poisoned.
    pub fn registry_lock_count(&self) -> Result<usize, StoreError> {
        Ok(self.lock_table()?.len())
    }

    /// Returns the eligibility lock for one contract address.
    fn registry_lock(&self, contract_address: &Address) -> Result<Arc<Mutex<()>>, StoreError> {
        let mut locks = self.lock_table()?;
        Ok(Arc::clone(locks.entry(*contract_address).or_default()))
    }

    /// Drops the eligibility lock of a registry that no longer exists.
    fn forget_registry_lock(&self, contract_address: &Address) -> Result<(), StoreError> {
        self.lock_table()?.remove(contract_address);
        Ok(())
    }

    /// Locks the per-address lock table.
    fn lock_table(&self) -> Result<MutexGuard<'_, RegistryLocks>, StoreError> {
        self.registry_locks
            .lock()
            .map_err(|_| StoreError::Store("registry lock table poisoned".to_string()))
    }
}
