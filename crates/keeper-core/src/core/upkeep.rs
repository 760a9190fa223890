// crates/keeper-core/src/core/upkeep.rs
// ============================================================================
// Module: Upkeep Registration Model
// Description: Monitored upkeep jobs and their last-execution bookkeeping.
// Purpose: Provide write-side and stored shapes for upkeep registrations.
// Dependencies: serde
// ============================================================================

//! ## Overview
//! An upkeep is one monitored automation job registered under a keeper
//! registry. `last_run_block_height` only ever moves forward; stores enforce
//! that with a conditional update, never with application-side reads.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;

use crate::core::identifiers::RegistryId;
use crate::core::identifiers::UpkeepId;

// ============================================================================
// SECTION: Upkeep Types
// ============================================================================

/// Upkeep registration as observed on-chain, prior to persistence.
///
/// `last_run_block_height` and `last_keeper_index` seed a newly inserted row
/// only; re-observing an existing registration preserves the stored values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpkeepSpec {
    /// Owning registry.
    pub registry_id: RegistryId,
    /// On-chain upkeep identifier.
    pub upkeep_id: UpkeepId,
    /// Gas limit forwarded to the execution pipeline.
    pub execute_gas: u32,
    /// Opaque payload forwarded to the execution pipeline.
    pub check_data: Vec<u8>,
    /// Stable per-upkeep ordering input.
    pub positioning_constant: i32,
    /// Initial last-run height for new rows.
    #[serde(default)]
    pub last_run_block_height: u64,
    /// Initial last keeper index for new rows.
    #[serde(default)]
    pub last_keeper_index: Option<u32>,
}

impl UpkeepSpec {
    /// Creates a never-run upkeep spec.
    #[must_use]
    pub fn new(
        registry_id: RegistryId,
        upkeep_id: UpkeepId,
        execute_gas: u32,
        check_data: Vec<u8>,
    ) -> Self {
        Self {
            registry_id,
            upkeep_id,
            execute_gas,
            check_data,
            positioning_constant: 0,
            last_run_block_height: 0,
            last_keeper_index: None,
        }
    }
}

/// Stored upkeep registration.
///
/// # Invariants
/// - `last_run_block_height` never decreases over the row's lifetime.
/// - `last_keeper_index` is `None` until the upkeep is first performed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpkeepRegistration {
    /// Store-assigned row identifier.
    pub id: i64,
    /// Owning registry.
    pub registry_id: RegistryId,
    /// On-chain upkeep identifier.
    pub upkeep_id: UpkeepId,
    /// Gas limit forwarded to the execution pipeline.
    pub execute_gas: u32,
    /// Opaque payload forwarded to the execution pipeline.
    pub check_data: Vec<u8>,
    /// Stable per-upkeep ordering input.
    pub positioning_constant: i32,
    /// Height of the last recorded perform.
    pub last_run_block_height: u64,
    /// Keeper index that last performed this upkeep.
    pub last_keeper_index: Option<u32>,
    /// Creation time in unix milliseconds.
    pub created_at: i64,
}

impl UpkeepRegistration {
    /// Builds a stored record from `spec`, taking the initial bookkeeping as given.
    #[must_use]
    pub fn from_spec(id: i64, spec: UpkeepSpec, created_at: i64) -> Self {
        Self {
            id,
            registry_id: spec.registry_id,
            upkeep_id: spec.upkeep_id,
            execute_gas: spec.execute_gas,
            check_data: spec.check_data,
            positioning_constant: spec.positioning_constant,
            last_run_block_height: spec.last_run_block_height,
            last_keeper_index: spec.last_keeper_index,
            created_at,
        }
    }
}
