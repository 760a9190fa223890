// crates/keeper-core/src/core/registry.rs
// ============================================================================
// Module: Keeper Registry Model
// Description: Registry configuration and this node's position in its keeper set.
// Purpose: Carry keeper identity explicitly instead of as process-wide state.
// Dependencies: alloy-primitives, serde, thiserror
// ============================================================================

//! ## Overview
//! A keeper registry is an on-chain contract grouping upkeeps and keeper
//! operators. The stored record captures this node's `keeper_index` among
//! `num_keepers` operators as of the last chain sync, plus the turn length.
//! [`RegistrySpec`] is the write-side shape and is validated before any write;
//! [`KeeperRegistry`] is the stored record handed to the eligibility engine.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeSet;

use alloy_primitives::Address;
use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

use crate::core::identifiers::JobId;
use crate::core::identifiers::RegistryId;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Registry configuration rejected before reaching storage.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryValidationError {
    /// `num_keepers` was zero.
    #[error("num_keepers must be greater than zero")]
    NoKeepers,
    /// `block_count_per_turn` was zero.
    #[error("block_count_per_turn must be greater than zero")]
    EmptyTurn,
    /// `keeper_index` is outside `0 .. num_keepers`.
    #[error("keeper_index {keeper_index} out of range for {num_keepers} keepers")]
    IndexOutOfRange {
        /// Offending keeper index.
        keeper_index: u32,
        /// Configured keeper count.
        num_keepers: u32,
    },
    /// Keeper set length disagrees with `num_keepers`.
    #[error("keeper set has {actual} entries but num_keepers is {expected}")]
    KeeperSetLength {
        /// Configured keeper count.
        expected: u32,
        /// Number of addresses supplied.
        actual: usize,
    },
    /// The same address appears twice in the keeper set.
    #[error("keeper set contains duplicate address {0}")]
    DuplicateKeeper(Address),
    /// `from_address` does not sit at `keeper_index` in the keeper set.
    #[error("from_address {from_address} is not keeper {keeper_index} in the keeper set")]
    FromAddressMismatch {
        /// This node's transacting address.
        from_address: Address,
        /// This node's configured index.
        keeper_index: u32,
    },
}

// ============================================================================
// SECTION: Registry Types
// ============================================================================

/// Registry configuration as observed on-chain, prior to persistence.
///
/// # Invariants
/// - Enforced by [`RegistrySpec::validate`], which stores call before writing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrySpec {
    /// Job that owns this registry.
    pub job_id: JobId,
    /// Registry contract address (unique lookup key).
    pub contract_address: Address,
    /// Address this node transacts as.
    pub from_address: Address,
    /// This node's 0-based rank in the keeper set.
    pub keeper_index: u32,
    /// Total keepers registered.
    pub num_keepers: u32,
    /// Blocks spanned by each turn.
    pub block_count_per_turn: u64,
    /// Keeper addresses ordered by keeper index; empty before the first sync.
    #[serde(default)]
    pub keepers: Vec<Address>,
}

impl RegistrySpec {
    /// Validates turn configuration and keeper-set consistency.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryValidationError`] describing the first violated rule.
    pub fn validate(&self) -> Result<(), RegistryValidationError> {
        if self.num_keepers == 0 {
            return Err(RegistryValidationError::NoKeepers);
        }
        if self.block_count_per_turn == 0 {
            return Err(RegistryValidationError::EmptyTurn);
        }
        if self.keeper_index >= self.num_keepers {
            return Err(RegistryValidationError::IndexOutOfRange {
                keeper_index: self.keeper_index,
                num_keepers: self.num_keepers,
            });
        }
        if self.keepers.is_empty() {
            return Ok(());
        }
        if self.keepers.len() != self.num_keepers as usize {
            return Err(RegistryValidationError::KeeperSetLength {
                expected: self.num_keepers,
                actual: self.keepers.len(),
            });
        }
        let mut seen = BTreeSet::new();
        for keeper in &self.keepers {
            if !seen.insert(*keeper) {
                return Err(RegistryValidationError::DuplicateKeeper(*keeper));
            }
        }
        if self.keepers.get(self.keeper_index as usize) != Some(&self.from_address) {
            return Err(RegistryValidationError::FromAddressMismatch {
                from_address: self.from_address,
                keeper_index: self.keeper_index,
            });
        }
        Ok(())
    }
}

/// Stored keeper registry record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeeperRegistry {
    /// Store-assigned identifier.
    pub id: RegistryId,
    /// Job that owns this registry.
    pub job_id: JobId,
    /// Registry contract address.
    pub contract_address: Address,
    /// Address this node transacts as.
    pub from_address: Address,
    /// This node's 0-based rank in the keeper set.
    pub keeper_index: u32,
    /// Total keepers registered.
    pub num_keepers: u32,
    /// Blocks spanned by each turn.
    pub block_count_per_turn: u64,
    /// Keeper addresses ordered by keeper index.
    pub keepers: Vec<Address>,
    /// Creation time in unix milliseconds.
    pub created_at: i64,
}

impl KeeperRegistry {
    /// Builds a stored record from a validated spec.
    #[must_use]
    pub fn from_spec(id: RegistryId, spec: RegistrySpec, created_at: i64) -> Self {
        Self {
            id,
            job_id: spec.job_id,
            contract_address: spec.contract_address,
            from_address: spec.from_address,
            keeper_index: spec.keeper_index,
            num_keepers: spec.num_keepers,
            block_count_per_turn: spec.block_count_per_turn,
            keepers: spec.keepers,
            created_at,
        }
    }

    /// Resolves a keeper address to its index in this registry's keeper set.
    ///
    /// Falls back to `keeper_index` for `from_address` when the keeper set has
    /// not been synced yet.
    #[must_use]
    pub fn keeper_index_for(&self, address: &Address) -> Option<u32> {
        if let Some(position) = self.keepers.iter().position(|keeper| keeper == address) {
            return u32::try_from(position).ok();
        }
        if self.keepers.is_empty() && *address == self.from_address {
            return Some(self.keeper_index);
        }
        None
    }
}
