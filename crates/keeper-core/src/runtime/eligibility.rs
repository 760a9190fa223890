// crates/keeper-core/src/runtime/eligibility.rs
// ============================================================================
// Module: Eligibility Calculator
// Description: Deterministic turn assignment, self-skip, and buddy coverage.
// Purpose: Decide which upkeeps this keeper checks at a block without coordination.
// Dependencies: crate::core, sha2
// ============================================================================

//! ## Overview
//! Every keeper in a registry runs the same pure function over the same
//! shared inputs: registry configuration, upkeep history, block height, and a
//! block-derived seed. Assignment hashes `(turn, upkeep_id, seed)` with SHA-256
//! so it cannot be predicted before the block hash exists but is reproducible
//! by anyone afterwards.
//!
//! Rules, per upkeep, for the keeper at index `K`:
//! - primary: the assigned index equals `K`;
//! - self-skip: a primary match is dropped when `K` performed the upkeep less
//!   than `grace_period_blocks` blocks ago;
//! - buddy coverage: with an even keeper count, the upkeep is also eligible
//!   when `K`'s buddy performed it last, regardless of self-skip.
//!
//! Survivors are ordered by a seed-keyed hash so different blocks yield
//! different orderings over the same set.

// ============================================================================
// SECTION: Imports
// ============================================================================

use sha2::Digest;
use sha2::Sha256;

use crate::core::KeeperRegistry;
use crate::core::RegistryValidationError;
use crate::core::TurnSeed;
use crate::core::UpkeepId;
use crate::core::UpkeepRegistration;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Domain separator for turn assignment hashes.
const ASSIGN_DOMAIN: &[u8] = b"keeper-turn/assign";
/// Domain separator for output ordering hashes.
const ORDER_DOMAIN: &[u8] = b"keeper-turn/order";

// ============================================================================
// SECTION: Request
// ============================================================================

/// Per-block eligibility inputs supplied by the job layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EligibilityRequest {
    /// Current block height.
    pub block_height: u64,
    /// Minimum blocks before a keeper reclaims its own work; zero disables self-skip.
    pub grace_period_blocks: u64,
    /// Block-derived randomness.
    pub seed: TurnSeed,
}

impl EligibilityRequest {
    /// Creates an eligibility request.
    #[must_use]
    pub const fn new(block_height: u64, grace_period_blocks: u64, seed: TurnSeed) -> Self {
        Self {
            block_height,
            grace_period_blocks,
            seed,
        }
    }
}

// ============================================================================
// SECTION: Assignment
// ============================================================================

/// Returns the turn containing `block_height`, or `None` for a zero turn length.
#[must_use]
pub const fn turn_number(block_height: u64, block_count_per_turn: u64) -> Option<u64> {
    block_height.checked_div(block_count_per_turn)
}

/// Returns the keeper index assigned to an upkeep for a turn.
#[must_use]
pub fn assigned_keeper(turn: u64, upkeep_id: UpkeepId, seed: &TurnSeed, num_keepers: u32) -> u32 {
    let mut hasher = Sha256::new();
    hasher.update(ASSIGN_DOMAIN);
    hasher.update(turn.to_be_bytes());
    hasher.update(upkeep_id.to_be_bytes());
    hasher.update(seed.as_bytes());
    let digest = hasher.finalize();
    let prefix = digest.first_chunk::<8>().copied().unwrap_or_default();
    let slot = u64::from_be_bytes(prefix) % u64::from(num_keepers.max(1));
    u32::try_from(slot).unwrap_or(0)
}

/// Returns the buddy of `keeper_index`, or `None` when the keeper count is odd.
///
/// Pairs `i` with `(i + n/2) mod n`, which is symmetric and covers every index.
#[must_use]
pub const fn buddy_index(keeper_index: u32, num_keepers: u32) -> Option<u32> {
    if num_keepers == 0 || num_keepers % 2 != 0 || keeper_index >= num_keepers {
        return None;
    }
    let half = num_keepers / 2;
    if keeper_index < half { Some(keeper_index + half) } else { Some(keeper_index - half) }
}

// ============================================================================
// SECTION: Calculator
// ============================================================================

/// Computes the ordered upkeeps `registry`'s keeper should check now.
///
/// Upkeeps belonging to other registries are ignored.
///
/// # Errors
///
/// Returns [`RegistryValidationError`] when the registry's turn configuration
/// is unusable.
pub fn eligible_upkeeps(
    registry: &KeeperRegistry,
    upkeeps: Vec<UpkeepRegistration>,
    request: &EligibilityRequest,
) -> Result<Vec<UpkeepRegistration>, RegistryValidationError> {
    check_keeper_config(registry)?;
    let turn = turn_number(request.block_height, registry.block_count_per_turn)
        .ok_or(RegistryValidationError::EmptyTurn)?;
    let buddy = buddy_index(registry.keeper_index, registry.num_keepers);

    let mut eligible: Vec<([u8; 32], UpkeepRegistration)> = upkeeps
        .into_iter()
        .filter(|upkeep| upkeep.registry_id == registry.id)
        .filter(|upkeep| is_eligible(registry, upkeep, request, turn, buddy))
        .map(|upkeep| (order_key(&request.seed, upkeep.upkeep_id), upkeep))
        .collect();
    eligible.sort_by(|(left_key, left), (right_key, right)| {
        left_key
            .cmp(right_key)
            .then(left.positioning_constant.cmp(&right.positioning_constant))
            .then(left.upkeep_id.cmp(&right.upkeep_id))
    });
    Ok(eligible.into_iter().map(|(_, upkeep)| upkeep).collect())
}

/// Rejects registries whose keeper configuration cannot drive assignment.
const fn check_keeper_config(registry: &KeeperRegistry) -> Result<(), RegistryValidationError> {
    if registry.num_keepers == 0 {
        return Err(RegistryValidationError::NoKeepers);
    }
    if registry.keeper_index >= registry.num_keepers {
        return Err(RegistryValidationError::IndexOutOfRange {
            keeper_index: registry.keeper_index,
            num_keepers: registry.num_keepers,
        });
    }
    Ok(())
}

/// Applies buddy coverage, primary assignment, and self-skip to one upkeep.
fn is_eligible(
    registry: &KeeperRegistry,
    upkeep: &UpkeepRegistration,
    request: &EligibilityRequest,
    turn: u64,
    buddy: Option<u32>,
) -> bool {
    if buddy.is_some() && upkeep.last_keeper_index == buddy {
        return true;
    }
    if assigned_keeper(turn, upkeep.upkeep_id, &request.seed, registry.num_keepers)
        != registry.keeper_index
    {
        return false;
    }
    !within_own_grace(registry.keeper_index, upkeep, request)
}

/// Returns true when `keeper_index` performed the upkeep inside the grace window.
const fn within_own_grace(
    keeper_index: u32,
    upkeep: &UpkeepRegistration,
    request: &EligibilityRequest,
) -> bool {
    let Some(last_keeper) = upkeep.last_keeper_index else {
        return false;
    };
    if last_keeper != keeper_index || request.grace_period_blocks == 0 {
        return false;
    }
    request.block_height.saturating_sub(upkeep.last_run_block_height) < request.grace_period_blocks
}

/// Seed-keyed ordering hash for an upkeep.
fn order_key(seed: &TurnSeed, upkeep_id: UpkeepId) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(ORDER_DOMAIN);
    hasher.update(seed.as_bytes());
    hasher.update(upkeep_id.to_be_bytes());
    hasher.finalize().into()
}
