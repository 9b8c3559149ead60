//! Shared types for the PUNTER engine.
//!
//! These types form the data model used across all modules.
//! They are designed to be stable so that strategy, risk, and engine
//! modules can depend on them without circular references.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// Direction
// ---------------------------------------------------------------------------

/// Wager direction / round outcome: the game resolves every round to
/// either "big" (1) or "small" (0).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    Big,
    Small,
}

impl Direction {
    /// The opposite direction.
    pub fn opposite(&self) -> Self {
        match self {
            Direction::Big => Direction::Small,
            Direction::Small => Direction::Big,
        }
    }

    /// Binary encoding used by the outcome history (big = 1, small = 0).
    pub fn bit(&self) -> u8 {
        match self {
            Direction::Big => 1,
            Direction::Small => 0,
        }
    }

    /// Decode from the binary history encoding. Any non-zero value is "big".
    pub fn from_bit(bit: u8) -> Self {
        if bit == 0 {
            Direction::Small
        } else {
            Direction::Big
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Big => write!(f, "big"),
            Direction::Small => write!(f, "small"),
        }
    }
}

impl std::str::FromStr for Direction {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "big" | "b" | "1" => Ok(Direction::Big),
            "small" | "s" | "0" => Ok(Direction::Small),
            _ => Err(anyhow::anyhow!("Unknown direction: {s}")),
        }
    }
}

// ---------------------------------------------------------------------------
// Wager ledger types
// ---------------------------------------------------------------------------

/// Result attached to a ledger entry. Transitions `Pending -> Win|Lose`
/// exactly once; the reconciler refuses to resolve an entry twice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WagerResult {
    Pending,
    Win,
    Lose,
}

impl WagerResult {
    pub fn is_settled(&self) -> bool {
        !matches!(self, WagerResult::Pending)
    }
}

impl fmt::Display for WagerResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WagerResult::Pending => write!(f, "pending"),
            WagerResult::Win => write!(f, "win"),
            WagerResult::Lose => write!(f, "lose"),
        }
    }
}

/// The single outstanding wager for an account. Created when a stake is
/// placed, consumed exactly once by the settlement reconciler. Absence
/// means "not currently staked".
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingWager {
    pub id: String,
    /// Position within the current martingale run (1-based).
    pub sequence: u32,
    pub direction: Direction,
    pub stake: i64,
    pub placed_at: DateTime<Utc>,
}

impl fmt::Display for PendingWager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] #{} {} stake={}",
            self.id, self.sequence, self.direction, self.stake,
        )
    }
}

/// Append-only historical record of one placed wager.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WagerLogEntry {
    pub id: String,
    pub sequence: u32,
    pub direction: Direction,
    pub stake: i64,
    pub result: WagerResult,
    pub profit: i64,
}

impl WagerLogEntry {
    pub fn pending(id: String, sequence: u32, direction: Direction, stake: i64) -> Self {
        Self {
            id,
            sequence,
            direction,
            stake,
            result: WagerResult::Pending,
            profit: 0,
        }
    }
}

// ---------------------------------------------------------------------------
// Stake preset
// ---------------------------------------------------------------------------

/// Martingale progression parameters for an account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StakePreset {
    /// Stake for the first wager of a run, in currency units.
    pub initial_stake: i64,
    /// Hard cap on consecutive losses: a wager that would be the
    /// `lose_stop + 1`-th of a losing run is never placed.
    pub lose_stop: u32,
    /// Step multipliers for loss depths 1, 2, 3 and 4+.
    pub multipliers: [f64; 4],
}

impl Default for StakePreset {
    fn default() -> Self {
        Self {
            initial_stake: 500,
            lose_stop: 13,
            multipliers: [3.0, 2.1, 2.1, 2.05],
        }
    }
}

impl StakePreset {
    /// Multiplier for a given loss depth (1-based, saturating at 4).
    pub fn multiplier_for_depth(&self, depth: u32) -> f64 {
        match depth {
            0 | 1 => self.multipliers[0],
            2 => self.multipliers[1],
            3 => self.multipliers[2],
            _ => self.multipliers[3],
        }
    }
}

impl fmt::Display for StakePreset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "init={} stop={} steps={}/{}/{}/{}",
            self.initial_stake,
            self.lose_stop,
            self.multipliers[0],
            self.multipliers[1],
            self.multipliers[2],
            self.multipliers[3],
        )
    }
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Domain-specific error types for PUNTER.
///
/// None of these may terminate the process: model failures degrade to the
/// statistical fallback, stale controls are relocated, duplicates are
/// dropped, and configuration errors are fatal for one account only.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("Model unavailable ({model}): {message}")]
    ModelUnavailable { model: String, message: String },

    #[error("Stale stake control: {0}")]
    StaleControl(String),

    #[error("Duplicate settlement event: {event_id}")]
    DuplicateSettlement { event_id: i64 },

    #[error("Insufficient funds: need {needed}, have {available}")]
    InsufficientFunds { needed: i64, available: i64 },

    #[error("Configuration error: {0}")]
    InvalidConfiguration(String),

    #[error("Malformed loss-streak range: {0}")]
    MalformedStateRange(String),

    #[error("Storage error: {0}")]
    Storage(String),
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
