// crates/keeper-core/src/core/identifiers.rs
// ============================================================================
// Module: Keeper Identifiers
// Description: Strongly typed numeric identifiers for registries, jobs, and upkeeps.
// Purpose: Keep row IDs, job IDs, and on-chain upkeep IDs from being mixed up.
// Dependencies: serde
// ============================================================================

//! ## Overview
//! Identifiers are thin numeric wrappers. `RegistryId` is assigned by the
//! store, `JobId` by the job layer that owns a registry, and `UpkeepId` by the
//! registry contract on-chain. All three serialize as bare numbers.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;

use serde::Deserialize;
use serde::Serialize;

// ============================================================================
// SECTION: Identifier Types
// ============================================================================

/// Store-assigned keeper registry identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RegistryId(i64);

impl RegistryId {
    /// Creates a registry identifier from a raw row ID.
    #[must_use]
    pub const fn new(id: i64) -> Self {
        Self(id)
    }

    /// Returns the raw row ID.
    #[must_use]
    pub const fn get(self) -> i64 {
        self.0
    }
}

impl fmt::Display for RegistryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Identifier of the keeper job that owns exactly one registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(i64);

impl JobId {
    /// Creates a job identifier.
    #[must_use]
    pub const fn new(id: i64) -> Self {
        Self(id)
    }

    /// Returns the raw job ID.
    #[must_use]
    pub const fn get(self) -> i64 {
        self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// On-chain upkeep identifier, unique within its registry.
///
/// # Invariants
/// - Values above `i64::MAX` cannot be persisted by SQL backends and are
///   rejected there as validation errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UpkeepId(u64);

impl UpkeepId {
    /// Creates an upkeep identifier.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw upkeep ID.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }

    /// Returns the big-endian byte encoding used for hashing.
    #[must_use]
    pub const fn to_be_bytes(self) -> [u8; 8] {
        self.0.to_be_bytes()
    }
}

impl fmt::Display for UpkeepId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<u64> for UpkeepId {
    fn from(value: u64) -> Self {
        Self::new(value)
    }
}
