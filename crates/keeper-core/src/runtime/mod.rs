// crates/keeper-core/src/runtime/mod.rs
// ============================================================================
// Module: Keeper Runtime
// Description: Eligibility calculator, gateway, and in-memory store.
// Purpose: Turn shared registry state into per-block work for this keeper.
// Dependencies: crate::{core, interfaces}
// ============================================================================

//! ## Overview
//! Runtime modules hold the pure eligibility calculator and the gateway that
//! feeds it consistent registry snapshots. Every caller goes through the same
//! calculator so all keepers agree on assignment.

// ============================================================================
// SECTION: Submodules
// ============================================================================

pub mod eligibility;
pub mod gateway;
pub mod store;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use eligibility::EligibilityRequest;
pub use eligibility::assigned_keeper;
pub use eligibility::buddy_index;
pub use eligibility::eligible_upkeeps;
pub use eligibility::turn_number;
pub use gateway::KeeperGateway;
pub use store::InMemoryKeeperStore;
