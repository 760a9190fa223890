// crates/keeper-core/src/core/seed.rs
// ============================================================================
// Module: Turn Seed
// Description: Block-derived randomness used for turn assignment and ordering.
// Purpose: Normalize arbitrary-precision seeds so every representation agrees.
// Dependencies: alloy-primitives, thiserror
// ============================================================================

//! ## Overview
//! The job layer derives the seed from a recent block hash and may hand it
//! over as a binary digit string of arbitrary length, as raw bytes, or as the
//! hash itself. All forms normalize to minimal big-endian bytes (leading zero
//! bytes stripped), so `"0011"`, `"11"`, and `[0x00, 0x03]` are the same seed
//! and hash identically on every node.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;
use std::str::FromStr;

use alloy_primitives::B256;
use alloy_primitives::hex;
use thiserror::Error;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Seed parsing errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SeedError {
    /// The binary string was empty.
    #[error("turn seed must not be empty")]
    Empty,
    /// The binary string contained a character other than `0` or `1`.
    #[error("turn seed has invalid binary digit '{digit}' at position {position}")]
    InvalidDigit {
        /// Byte offset of the offending character.
        position: usize,
        /// Offending character.
        digit: char,
    },
}

// ============================================================================
// SECTION: Turn Seed
// ============================================================================

/// Arbitrary-precision seed, stored as minimal big-endian bytes.
///
/// # Invariants
/// - The first byte, if any, is non-zero. The zero seed is the empty vector.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct TurnSeed(Vec<u8>);

impl TurnSeed {
    /// Parses a big-endian binary digit string such as `"1011"`.
    ///
    /// # Errors
    ///
    /// Returns [`SeedError`] when the string is empty or contains non-binary digits.
    pub fn from_binary_str(bits: &str) -> Result<Self, SeedError> {
        if bits.is_empty() {
            return Err(SeedError::Empty);
        }
        if let Some((position, digit)) =
            bits.char_indices().find(|(_, digit)| *digit != '0' && *digit != '1')
        {
            return Err(SeedError::InvalidDigit {
                position,
                digit,
            });
        }
        let significant = bits.trim_start_matches('0');
        let mut bytes = Vec::with_capacity(significant.len().div_ceil(8));
        let mut filled = (8 - significant.len() % 8) % 8;
        let mut current = 0_u8;
        for digit in significant.bytes() {
            current = (current << 1) | (digit - b'0');
            filled += 1;
            if filled == 8 {
                bytes.push(current);
                current = 0;
                filled = 0;
            }
        }
        Ok(Self(bytes))
    }

    /// Builds a seed from big-endian bytes.
    #[must_use]
    pub fn from_bytes(bytes: &[u8]) -> Self {
        let start = bytes.iter().position(|byte| *byte != 0).unwrap_or(bytes.len());
        Self(bytes[start ..].to_vec())
    }

    /// Builds a seed from a block hash.
    #[must_use]
    pub fn from_block_hash(hash: B256) -> Self {
        Self::from_bytes(hash.as_slice())
    }

    /// Returns the normalized big-endian bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Returns true for the zero seed.
    #[must_use]
    pub fn is_zero(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromStr for TurnSeed {
    type Err = SeedError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::from_binary_str(value)
    }
}

impl From<B256> for TurnSeed {
    fn from(hash: B256) -> Self {
        Self::from_block_hash(hash)
    }
}

impl fmt::Display for TurnSeed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode_prefixed(&self.0))
    }
}
