// crates/keeper-config/src/config.rs
// ============================================================================
// Module: Keeper Configuration
// Description: Configuration loading and validation for the keeper store.
// Purpose: Provide strict, fail-closed config parsing with hard limits.
// Dependencies: keeper-core, keeper-store-sqlite, serde, toml, tracing
// ============================================================================

//! ## Overview
//! Configuration is loaded from a TOML file resolved from an explicit path,
//! the `KEEPER_CONFIG` environment variable, or `keeper.toml`, in that order.
//! Files are size-capped and must be UTF-8. Validation rejects values that
//! would make the store unbounded or the grace window meaningless.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::env;
use std::fs;
use std::path::Path;
use std::path::PathBuf;

use keeper_core::EligibilityRequest;
use keeper_core::TurnSeed;
use keeper_store_sqlite::SqliteKeeperStore;
use keeper_store_sqlite::SqliteStoreConfig;
use keeper_store_sqlite::SqliteStoreError;
use keeper_store_sqlite::SqliteStoreMode;
use keeper_store_sqlite::SqliteSyncMode;
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Default configuration filename when no path is specified.
const DEFAULT_CONFIG_NAME: &str = "keeper.toml";
/// Environment variable used to override the config path.
pub const CONFIG_ENV_VAR: &str = "KEEPER_CONFIG";
/// Maximum configuration file size in bytes.
pub const MAX_CONFIG_FILE_SIZE: usize = 1024 * 1024;
/// Default busy timeout for store calls (ms).
const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;
/// Default self-skip grace period in blocks.
pub const DEFAULT_GRACE_PERIOD_BLOCKS: u64 = 100;
/// Upper bound on the self-skip grace period in blocks.
pub const MAX_GRACE_PERIOD_BLOCKS: u64 = 100_000;

// ============================================================================
// SECTION: Config Model
// ============================================================================

/// Keeper configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct KeeperConfig {
    /// Persistence configuration.
    pub store: StoreConfig,
    /// Eligibility defaults.
    #[serde(default)]
    pub eligibility: EligibilityConfig,
}

impl KeeperConfig {
    /// Loads configuration from disk using the default resolution rules.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when loading or validation fails.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let resolved = resolve_path(path);
        let bytes = fs::read(&resolved).map_err(|err| ConfigError::Io(err.to_string()))?;
        if bytes.len() > MAX_CONFIG_FILE_SIZE {
            return Err(ConfigError::Invalid("config file exceeds size limit".to_string()));
        }
        let content = std::str::from_utf8(&bytes)
            .map_err(|_| ConfigError::Invalid("config file must be utf-8".to_string()))?;
        let config = Self::from_toml(content)?;
        debug!(path = %resolved.display(), "Keeper config loaded");
        Ok(config)
    }

    /// Parses and validates configuration from TOML text.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when parsing or validation fails.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self =
            toml::from_str(content).map_err(|err| ConfigError::Parse(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when configuration is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.store.validate()?;
        self.eligibility.validate()
    }

    /// Returns the `SQLite` store configuration.
    #[must_use]
    pub fn store_config(&self) -> SqliteStoreConfig {
        SqliteStoreConfig {
            path: self.store.path.clone(),
            busy_timeout_ms: self.store.busy_timeout_ms,
            journal_mode: self.store.journal_mode,
            sync_mode: self.store.sync_mode,
        }
    }

    /// Opens the configured keeper store.
    ///
    /// # Errors
    ///
    /// Returns [`SqliteStoreError`] when the store cannot be opened.
    pub fn open_store(&self) -> Result<SqliteKeeperStore, SqliteStoreError> {
        SqliteKeeperStore::new(self.store_config())
    }

    /// Builds an eligibility request using the configured grace period.
    #[must_use]
    pub const fn eligibility_request(&self, block_height: u64, seed: TurnSeed) -> EligibilityRequest {
        EligibilityRequest::new(block_height, self.eligibility.grace_period_blocks, seed)
    }
}

/// Store configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StoreConfig {
    /// `SQLite` database path.
    pub path: PathBuf,
    /// Busy timeout in milliseconds; bounds every storage call.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
    /// `SQLite` journal mode.
    #[serde(default)]
    pub journal_mode: SqliteStoreMode,
    /// `SQLite` synchronous mode.
    #[serde(default)]
    pub sync_mode: SqliteSyncMode,
}

impl StoreConfig {
    /// Validates store configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.path.to_string_lossy().trim().is_empty() {
            return Err(ConfigError::Invalid("store.path must be non-empty".to_string()));
        }
        if self.busy_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "store.busy_timeout_ms must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Eligibility defaults.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EligibilityConfig {
    /// Blocks before a keeper may reclaim work it performed itself.
    #[serde(default = "default_grace_period_blocks")]
    pub grace_period_blocks: u64,
}

impl Default for EligibilityConfig {
    fn default() -> Self {
        Self {
            grace_period_blocks: DEFAULT_GRACE_PERIOD_BLOCKS,
        }
    }
}

impl EligibilityConfig {
    /// Validates eligibility defaults.
    fn validate(self) -> Result<(), ConfigError> {
        if self.grace_period_blocks == 0 {
            return Err(ConfigError::Invalid(
                "eligibility.grace_period_blocks must be greater than zero".to_string(),
            ));
        }
        if self.grace_period_blocks > MAX_GRACE_PERIOD_BLOCKS {
            return Err(ConfigError::Invalid(format!(
                "eligibility.grace_period_blocks must not exceed {MAX_GRACE_PERIOD_BLOCKS}"
            )));
        }
        Ok(())
    }
}

/// Returns the default busy timeout.
const fn default_busy_timeout_ms() -> u64 {
    DEFAULT_BUSY_TIMEOUT_MS
}

/// Returns the default grace period.
const fn default_grace_period_blocks() -> u64 {
    DEFAULT_GRACE_PERIOD_BLOCKS
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// I/O failure while reading configuration.
    #[error("config io error: {0}")]
    Io(String),
    /// TOML parsing error.
    #[error("config parse error: {0}")]
    Parse(String),
    /// Invalid configuration data.
    #[error("invalid config: {0}")]
    Invalid(String),
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Resolves the config path from an explicit argument or environment defaults.
fn resolve_path(path: Option<&Path>) -> PathBuf {
    path.map(Path::to_path_buf)
        .or_else(|| env::var_os(CONFIG_ENV_VAR).map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_NAME))
}
