// crates/keeper-core/src/runtime/store.rs
// ============================================================================
// Module: Keeper In-Memory Store
// Description: Mutex-guarded in-memory keeper store for tests and embedders.
// Purpose: Provide a deterministic store implementation without external deps.
// Dependencies: crate::core, crate::interfaces
// ============================================================================

//! ## Overview
//! This module provides an in-memory implementation of [`KeeperStore`]. Each
//! call holds a single mutex for its whole duration, so every operation is
//! atomic. It is not durable and not intended for production use.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;

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
use crate::interfaces::RegistrySnapshot;
use crate::interfaces::StoreError;

// ============================================================================
// SECTION: In-Memory Store
// ============================================================================

/// Tables and ID counters guarded by the store mutex.
#[derive(Debug, Default)]
struct Tables {
    /// Last assigned registry row ID.
    last_registry_id: i64,
    /// Last assigned upkeep row ID.
    last_upkeep_id: i64,
    /// Registries keyed by row ID.
    registries: BTreeMap<RegistryId, KeeperRegistry>,
    /// Upkeeps keyed by owning registry and upkeep ID.
    upkeeps: BTreeMap<(RegistryId, UpkeepId), UpkeepRegistration>,
}

impl Tables {
    /// Finds a registry by contract address.
    fn by_contract(&self, contract_address: &Address) -> Option<&KeeperRegistry> {
        self.registries.values().find(|registry| registry.contract_address == *contract_address)
    }

    /// Finds a registry by owning job.
    fn by_job(&self, job_id: JobId) -> Result<&KeeperRegistry, StoreError> {
        self.registries
            .values()
            .find(|registry| registry.job_id == job_id)
            .ok_or_else(|| StoreError::NotFound(format!("no registry for job {job_id}")))
    }

    /// Returns a registry's upkeeps in ascending upkeep ID order.
    fn upkeeps_of(&self, registry_id: RegistryId) -> impl Iterator<Item = &UpkeepRegistration> {
        self.upkeeps
            .range((registry_id, UpkeepId::new(0)) ..= (registry_id, UpkeepId::new(u64::MAX)))
            .map(|(_, upkeep)| upkeep)
    }
}

/// In-memory keeper store for tests and examples.
#[derive(Debug, Default, Clone)]
pub struct InMemoryKeeperStore {
    /// Tables protected by a mutex.
    tables: Arc<Mutex<Tables>>,
}

impl InMemoryKeeperStore {
    /// Creates an empty in-memory keeper store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Locks the tables, mapping poisoning to a store error.
    fn lock(&self) -> Result<MutexGuard<'_, Tables>, StoreError> {
        self.tables
            .lock()
            .map_err(|_| StoreError::Store("keeper store mutex poisoned".to_string()))
    }
}

impl KeeperStore for InMemoryKeeperStore {
    fn registries(&self) -> Result<Vec<KeeperRegistry>, StoreError> {
        Ok(self.lock()?.registries.values().cloned().collect())
    }

    fn registry_by_contract_address(
        &self,
        contract_address: &Address,
    ) -> Result<KeeperRegistry, StoreError> {
        self.lock()?
            .by_contract(contract_address)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("no registry at {contract_address}")))
    }

    fn registry_for_job(&self, job_id: JobId) -> Result<KeeperRegistry, StoreError> {
        self.lock()?.by_job(job_id).cloned()
    }

    fn upsert_registry(&self, spec: RegistrySpec) -> Result<KeeperRegistry, StoreError> {
        spec.validate()?;
        let mut tables = self.lock()?;
        if let Ok(bound) = tables.by_job(spec.job_id)
            && bound.contract_address != spec.contract_address
        {
            return Err(StoreError::Validation(format!(
                "job {} is already bound to registry {}",
                spec.job_id, bound.contract_address
            )));
        }
        let existing = tables.by_contract(&spec.contract_address).map(|r| (r.id, r.created_at));
        let (id, created_at) = if let Some(found) = existing {
            found
        } else {
            tables.last_registry_id += 1;
            (RegistryId::new(tables.last_registry_id), unix_millis())
        };
        let registry = KeeperRegistry::from_spec(id, spec, created_at);
        tables.registries.insert(id, registry.clone());
        Ok(registry)
    }

    fn delete_registry_for_job(&self, job_id: JobId) -> Result<bool, StoreError> {
        let mut tables = self.lock()?;
        let Ok(registry_id) = tables.by_job(job_id).map(|registry| registry.id) else {
            return Ok(false);
        };
        tables.registries.remove(&registry_id);
        tables.upkeeps.retain(|(owner, _), _| *owner != registry_id);
        Ok(true)
    }

    fn upsert_upkeep(&self, spec: UpkeepSpec) -> Result<UpkeepRegistration, StoreError> {
        let mut tables = self.lock()?;
        if !tables.registries.contains_key(&spec.registry_id) {
            return Err(StoreError::NotFound(format!("no registry with id {}", spec.registry_id)));
        }
        let key = (spec.registry_id, spec.upkeep_id);
        if let Some(existing) = tables.upkeeps.get_mut(&key) {
            existing.execute_gas = spec.execute_gas;
            existing.check_data = spec.check_data;
            existing.positioning_constant = spec.positioning_constant;
            return Ok(existing.clone());
        }
        tables.last_upkeep_id += 1;
        let upkeep = UpkeepRegistration::from_spec(tables.last_upkeep_id, spec, unix_millis());
        tables.upkeeps.insert(key, upkeep.clone());
        Ok(upkeep)
    }

    fn upkeep(
        &self,
        registry_id: RegistryId,
        upkeep_id: UpkeepId,
    ) -> Result<Option<UpkeepRegistration>, StoreError> {
        Ok(self.lock()?.upkeeps.get(&(registry_id, upkeep_id)).cloned())
    }

    fn all_upkeep_ids_for_registry(
        &self,
        registry_id: RegistryId,
    ) -> Result<Vec<UpkeepId>, StoreError> {
        Ok(self.lock()?.upkeeps_of(registry_id).map(|upkeep| upkeep.upkeep_id).collect())
    }

    fn batch_delete_upkeeps_for_job(
        &self,
        job_id: JobId,
        upkeep_ids: &[UpkeepId],
    ) -> Result<u64, StoreError> {
        let mut tables = self.lock()?;
        let registry_id = tables.by_job(job_id)?.id;
        let mut deleted = 0_u64;
        for upkeep_id in upkeep_ids {
            if tables.upkeeps.remove(&(registry_id, *upkeep_id)).is_some() {
                deleted += 1;
            }
        }
        Ok(deleted)
    }

    fn set_last_run_info(
        &self,
        job_id: JobId,
        upkeep_id: UpkeepId,
        block_height: u64,
        keeper_address: &Address,
    ) -> Result<LastRunUpdate, StoreError> {
        let mut tables = self.lock()?;
        let registry = tables.by_job(job_id)?;
        let registry_id = registry.id;
        let keeper_index = registry.keeper_index_for(keeper_address).ok_or_else(|| {
            StoreError::NotFound(format!("{keeper_address} is not a keeper of job {job_id}"))
        })?;
        let upkeep = tables.upkeeps.get_mut(&(registry_id, upkeep_id)).ok_or_else(|| {
            StoreError::NotFound(format!("no upkeep {upkeep_id} for job {job_id}"))
        })?;
        if block_height <= upkeep.last_run_block_height {
            return Ok(LastRunUpdate::Stale);
        }
        upkeep.last_run_block_height = block_height;
        upkeep.last_keeper_index = Some(keeper_index);
        Ok(LastRunUpdate::Recorded)
    }

    fn registry_snapshot(
        &self,
        contract_address: &Address,
    ) -> Result<RegistrySnapshot, StoreError> {
        let tables = self.lock()?;
        let registry = tables
            .by_contract(contract_address)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("no registry at {contract_address}")))?;
        let upkeeps = tables.upkeeps_of(registry.id).cloned().collect();
        Ok(RegistrySnapshot {
            registry,
            upkeeps,
        })
    }
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Returns the current unix timestamp in milliseconds.
fn unix_millis() -> i64 {
    let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default();
    i64::try_from(now.as_millis()).unwrap_or(i64::MAX)
}
