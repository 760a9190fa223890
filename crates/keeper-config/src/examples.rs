// crates/keeper-config/src/examples.rs
// ============================================================================
// Module: Config Examples
// Description: Canonical example configuration payload.
// Purpose: Deterministic example for docs and tooling.
// Dependencies: std
// ============================================================================

//! ## Overview
//! Canonical example `keeper.toml`. It is kept loadable by the config tests.

/// Returns a canonical example `keeper.toml` configuration.
#[must_use]
pub fn config_toml_example() -> String {
    String::from(
        r#"[store]
path = "keeper.db"
journal_mode = "wal"
sync_mode = "full"
busy_timeout_ms = 5000

[eligibility]
grace_period_blocks = 100
"#,
    )
}
