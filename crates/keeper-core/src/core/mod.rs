// crates/keeper-core/src/core/mod.rs
// ============================================================================
// Module: Keeper Core Types
// Description: Registry, upkeep, identifier, and seed types.
// Purpose: Provide stable, serializable types shared by stores and the engine.
// Dependencies: alloy-primitives, serde
// ============================================================================

//! ## Overview
//! Core types describe keeper registries, the upkeeps registered under them,
//! and the block-derived randomness that drives turn assignment. Stores own
//! these records; the eligibility engine only reads snapshots of them.

// ============================================================================
// SECTION: Submodules
// ============================================================================

pub mod identifiers;
pub mod registry;
pub mod seed;
pub mod upkeep;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use alloy_primitives::Address;
pub use alloy_primitives::B256;
pub use identifiers::JobId;
pub use identifiers::RegistryId;
pub use identifiers::UpkeepId;
pub use registry::KeeperRegistry;
pub use registry::RegistrySpec;
pub use registry::RegistryValidationError;
pub use seed::SeedError;
pub use seed::TurnSeed;
pub use upkeep::UpkeepRegistration;
pub use upkeep::UpkeepSpec;
