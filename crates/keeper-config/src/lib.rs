// crates/keeper-config/src/lib.rs
// ============================================================================
// Module: Keeper Config Library
// Description: Keeper configuration model, validation, and example.
// Purpose: Single source of truth for keeper.toml semantics.
// Dependencies: keeper-core, keeper-store-sqlite, serde, toml
// ============================================================================

//! ## Overview
//! `keeper-config` defines the configuration model for the keeper store and
//! eligibility defaults. Loading is strict and fail-closed: unknown keys,
//! oversized files, and out-of-range values are rejected before any store is
//! opened.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod config;
pub mod examples;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use config::*;
pub use examples::config_toml_example;
