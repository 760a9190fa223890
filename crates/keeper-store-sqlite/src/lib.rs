// crates/keeper-store-sqlite/src/lib.rs
// ============================================================================
// Module: Keeper SQLite Store
// Description: Durable KeeperStore backend using SQLite.
// Purpose: Provide production persistence for keeper registries and upkeeps.
// Dependencies: keeper-core, rusqlite
// ============================================================================

//! ## Overview
//! This crate provides a SQLite-backed [`KeeperStore`](keeper_core::KeeperStore)
//! implementation. Registries and upkeeps live in two tables linked by a
//! cascading foreign key; last-run reports are applied as a single
//! compare-and-set `UPDATE`, so concurrent reporters can never regress a
//! stored height.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod store;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use store::SqliteKeeperStore;
pub use store::SqliteStoreConfig;
pub use store::SqliteStoreError;
pub use store::SqliteStoreMode;
pub use store::SqliteSyncMode;
