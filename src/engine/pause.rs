//! Pause/resume state machine.
//!
//! Owns the account's activity state and countdown bookkeeping. Both the
//! bet-placement path and the settlement path consult it; nothing else
//! mutates it.
//!
//! Countdown semantics: `begin_countdown(n)` stores `remaining = n + 1`
//! because the first decrement happens on the very next bet opportunity,
//! before any real round has elapsed. The account therefore sits out
//! exactly `n` live rounds and resumes on the opportunity that drives
//! `remaining` to zero.

use serde::{Deserialize, Serialize};

/// Why the account is hard-stopped. Clearing requires operator action
/// (raising the cap, adding funds) followed by an explicit resume.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HardStopReason {
    CapReached,
    FundsExhausted,
}

impl std::fmt::Display for HardStopReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HardStopReason::CapReached => write!(f, "progression cap reached"),
            HardStopReason::FundsExhausted => write!(f, "funds exhausted"),
        }
    }
}

/// The account's activity state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PauseState {
    Active,
    /// Operator pause; only an explicit resume leaves this state.
    ManualPaused,
    /// Timed suspension for a fixed number of upcoming rounds.
    CountdownPaused {
        reason: String,
        total_rounds: u32,
        /// Rounds still to sit out (includes the deliberate extra one
        /// consumed by the first decrement).
        remaining: u32,
        /// Last remaining value announced via the countdown notice, so a
        /// refresh is emitted only when the number changes.
        last_notified: Option<u32>,
    },
    HardStopped { reason: HardStopReason },
}

/// Outcome of consulting the machine at a bet opportunity.
#[derive(Debug, Clone, PartialEq)]
pub enum Gate {
    /// Betting may proceed.
    Proceed,
    /// Sitting out a countdown round; `remaining` is the post-decrement
    /// count for the countdown notice.
    SkipCountdown {
        reason: String,
        total_rounds: u32,
        remaining: u32,
    },
    /// Manual pause or hard stop; nothing to do this round.
    SkipHold,
    /// The countdown just completed; betting resumes with this round.
    Resumed,
}

impl Default for PauseState {
    fn default() -> Self {
        PauseState::Active
    }
}

impl PauseState {
    pub fn is_active(&self) -> bool {
        matches!(self, PauseState::Active)
    }

    pub fn is_paused(&self) -> bool {
        !self.is_active()
    }

    /// Enter a countdown pause for `rounds` live rounds. A longer countdown
    /// already in progress is never shortened.
    pub fn begin_countdown(&mut self, reason: impl Into<String>, rounds: u32) {
        let rounds = rounds.max(1);
        let new_remaining = rounds + 1;
        if let PauseState::CountdownPaused { remaining, .. } = self {
            if *remaining >= new_remaining {
                return;
            }
        }
        *self = PauseState::CountdownPaused {
            reason: reason.into(),
            total_rounds: rounds,
            remaining: new_remaining,
            last_notified: None,
        };
    }

    /// Operator pause. Takes effect immediately, dropping any countdown,
    /// so a countdown that would have expired can never auto-resume past
    /// an operator's explicit request.
    pub fn manual_pause(&mut self) {
        *self = PauseState::ManualPaused;
    }

    /// Explicit operator resume from any paused state.
    pub fn resume(&mut self) {
        *self = PauseState::Active;
    }

    /// Hard stop: progression cap reached or funds exhausted.
    pub fn hard_stop(&mut self, reason: HardStopReason) {
        *self = PauseState::HardStopped { reason };
    }

    /// Consult and advance the machine at a bet opportunity.
    pub fn on_bet_opportunity(&mut self) -> Gate {
        match self {
            PauseState::Active => Gate::Proceed,
            PauseState::ManualPaused | PauseState::HardStopped { .. } => Gate::SkipHold,
            PauseState::CountdownPaused {
                reason,
                total_rounds,
                remaining,
                ..
            } => {
                *remaining -= 1;
                if *remaining == 0 {
                    *self = PauseState::Active;
                    Gate::Resumed
                } else {
                    Gate::SkipCountdown {
                        reason: reason.clone(),
                        total_rounds: *total_rounds,
                        remaining: *remaining,
                    }
                }
            }
        }
    }

    /// Record that the countdown notice was refreshed for `remaining`.
    /// Returns `true` when the caller should actually emit the notice
    /// (i.e. the number changed since the last refresh).
    pub fn note_countdown_refresh(&mut self, value: u32) -> bool {
        if let PauseState::CountdownPaused { last_notified, .. } = self {
            if *last_notified == Some(value) {
                return false;
            }
            *last_notified = Some(value);
            true
        } else {
            false
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
