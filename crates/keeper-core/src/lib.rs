// crates/keeper-core/src/lib.rs
// ============================================================================
// Module: Keeper Core Library
// Description: Public API surface for the keeper turn-taking core.
// Purpose: Expose data model, persistence interfaces, and the eligibility engine.
// Dependencies: crate::{core, interfaces, runtime}
// ============================================================================

//! ## Overview
//! Keeper core decides, independently on each redundant keeper node, which
//! upkeeps that node should check at a given block. The decision is a pure
//! function of shared on-chain state and a block-derived seed, so every node
//! and any external observer computes the same assignment without talking to
//! each other. Persistence is reached through the [`KeeperStore`] interface.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod core;
pub mod interfaces;
pub mod runtime;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use crate::core::*;

pub use interfaces::KeeperStore;
pub use interfaces::LastRunUpdate;
pub use interfaces::RegistrySnapshot;
pub use interfaces::StoreError;
pub use runtime::EligibilityRequest;
pub use runtime::InMemoryKeeperStore;
pub use runtime::KeeperGateway;
pub use runtime::eligible_upkeeps;
