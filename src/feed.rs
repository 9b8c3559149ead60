//! Typed game-feed events.
//!
//! The chat transport is an external collaborator: whatever it looks like
//! on the wire, it is adapted into the `GameEvent` enum before it reaches
//! an account pipeline. Round-opened prompts embed a trailing run of
//! `0`/`1` tokens with the table's recent history; `decode_history_suffix`
//! recovers it so the pipeline can backfill its local outcome history.

use serde::{Deserialize, Serialize};

use crate::types::{Direction, StakePreset};

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

/// Reference to a still-active round prompt, used to target stake controls.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptRef {
    pub channel: String,
    pub message_id: i64,
}

/// A new round is open for staking.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoundOpened {
    pub prompt: PromptRef,
    /// Raw prompt text; may carry an embedded history suffix.
    pub text: String,
    /// Whether the prompt still exposes stake controls.
    pub has_stake_controls: bool,
}

/// A round has been settled by the game.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoundSettled {
    pub value: i64,
    pub label: Direction,
    /// Transport-level id used for duplicate-delivery detection.
    pub event_id: i64,
}

/// Direct operator interventions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum OperatorCommand {
    Pause,
    Resume,
    SetFund(i64),
    SetPreset(StakePreset),
    SetWarningThreshold(u32),
}

/// Everything an account pipeline can receive.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum GameEvent {
    RoundOpened(RoundOpened),
    RoundSettled(RoundSettled),
    Operator(OperatorCommand),
}

// ---------------------------------------------------------------------------
// History decoder
// ---------------------------------------------------------------------------

/// Extract the trailing run of standalone `0`/`1` tokens from a round
/// prompt, oldest first.
///
/// Returns `None` when the text carries no history suffix; the caller
/// keeps its existing history in that case. Tokens are whitespace-split,
/// so digits inside larger numbers ("10", "round 2041") never leak in.
pub fn decode_history_suffix(text: &str) -> Option<Vec<u8>> {
    let mut run: Vec<u8> = Vec::new();
    for token in text.split_whitespace().rev() {
        match token {
            "0" => run.push(0),
            "1" => run.push(1),
            _ => break,
        }
    }
    if run.is_empty() {
        return None;
    }
    run.reverse();
    Some(run)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
