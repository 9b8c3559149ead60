//! Per-account mutable state.
//!
//! `RuntimeCounters` is the explicit, strongly-typed replacement for the
//! control variables every component reads and writes: streaks, totals,
//! fund balance, progression base, risk-cycle bookkeeping and one-shot
//! notification latches. `AccountState` bundles the counters with the
//! outcome history and the wager ledger. One account owns exactly one
//! `AccountState`; it is never shared across accounts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::engine::pause::PauseState;
use crate::risk::RiskCycleState;
use crate::types::{Direction, PendingWager, StakePreset, WagerLogEntry, WagerResult};

/// Outcome history is bounded; the oldest entries are trimmed.
pub const HISTORY_CAP: usize = 2000;

/// Wager ledger is bounded the same way.
pub const LEDGER_CAP: usize = 5000;

// ---------------------------------------------------------------------------
// Loss-streak tracking
// ---------------------------------------------------------------------------

/// Snapshot taken at the first loss of a streak, for the "streak ended"
/// summary once a win arrives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LossStreakStart {
    pub round: u32,
    pub seq: u32,
    /// Fund balance before the first losing stake was deducted.
    pub fund_before: i64,
}

// ---------------------------------------------------------------------------
// Runtime counters
// ---------------------------------------------------------------------------

/// The account's mutable control state. Persisted after each transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeCounters {
    // Progression
    pub preset: StakePreset,
    /// Base stake the next multiplier applies to (the last placed stake).
    pub stake_base: i64,
    /// Consecutive wagers in the current run.
    pub sequence_count: u32,
    pub win_count: u32,
    pub loss_count: u32,

    // Totals
    pub total_placed: u64,
    pub total_wins: u64,
    pub earnings: i64,
    /// Profit accumulated in the current session (reset by target pauses).
    pub session_profit: i64,
    /// Wagering fund balance.
    pub fund: i64,

    // Targets
    pub profit_target: i64,
    pub profit_pause_rounds: u32,
    pub explode_cap: u32,
    pub explode_pause_rounds: u32,
    pub explode_count: u32,
    /// Loss streak length that triggers the warning notification.
    pub warning_threshold: u32,

    // Loss-streak reporting
    pub lose_notify_pending: bool,
    pub loss_streak_start: Option<LossStreakStart>,

    // One-shot notification latches
    pub fund_pause_notified: bool,
    pub cap_stop_notified: bool,

    // Activity state
    pub pause: PauseState,

    // Risk-cycle bookkeeping
    pub risk: RiskCycleState,

    // Settlement idempotency
    pub last_settlement_id: i64,

    // Wager-id bookkeeping (round index resets daily)
    pub current_round: u32,
    pub current_seq: u32,
    pub last_reset_date: String,

    // Prediction audit
    pub last_predict_info: String,
    pub model_id: String,

    // Periodic digest bookkeeping
    pub stats_last_report_total: u64,
    pub risk_summary_last_total: u64,
}

impl RuntimeCounters {
    pub fn new(fund: i64, preset: StakePreset, model_id: String) -> Self {
        Self {
            stake_base: preset.initial_stake,
            preset,
            sequence_count: 0,
            win_count: 0,
            loss_count: 0,
            total_placed: 0,
            total_wins: 0,
            earnings: 0,
            session_profit: 0,
            fund,
            profit_target: 1_000_000,
            profit_pause_rounds: 5,
            explode_cap: 5,
            explode_pause_rounds: 3,
            explode_count: 0,
            warning_threshold: 3,
            lose_notify_pending: false,
            loss_streak_start: None,
            fund_pause_notified: false,
            cap_stop_notified: false,
            pause: PauseState::Active,
            risk: RiskCycleState::default(),
            last_settlement_id: 0,
            current_round: 1,
            current_seq: 1,
            last_reset_date: String::new(),
            last_predict_info: String::new(),
            model_id,
            stats_last_report_total: 0,
            risk_summary_last_total: 0,
        }
    }

    /// Whether the fund can cover a stake. Mirrors the placement gate:
    /// the balance must be positive and at least the stake.
    pub fn fund_available(&self, stake: i64) -> bool {
        self.fund > 0 && self.fund >= stake
    }

    /// Overall win rate across all settled wagers, as a percentage.
    pub fn win_rate(&self) -> f64 {
        if self.total_placed == 0 {
            0.0
        } else {
            self.total_wins as f64 / self.total_placed as f64 * 100.0
        }
    }

    /// Apply a settled result to the streak and money counters.
    pub fn record_result(&mut self, won: bool, profit: i64) {
        self.fund += profit;
        self.earnings += profit;
        self.session_profit += profit;
        if won {
            self.total_wins += 1;
            self.win_count += 1;
            self.loss_count = 0;
        } else {
            self.win_count = 0;
            self.loss_count += 1;
        }
    }

    /// Reset the martingale progression (after a win, a busted ladder or a
    /// target pause).
    pub fn reset_progression(&mut self) {
        self.sequence_count = 0;
        self.stake_base = self.preset.initial_stake;
    }

    /// Reset the session counters when a profit/loss-target pause fires.
    pub fn reset_session(&mut self) {
        self.explode_count = 0;
        self.session_profit = 0;
        self.loss_count = 0;
        self.win_count = 0;
        self.reset_progression();
        self.clear_loss_tracking();
    }

    /// Drop any pending loss-streak reporting state.
    pub fn clear_loss_tracking(&mut self) {
        self.lose_notify_pending = false;
        self.loss_streak_start = None;
    }

    /// Generate the id for the next wager, resetting round/sequence on a
    /// new calendar day.
    pub fn next_wager_id(&mut self, now: DateTime<Utc>) -> String {
        let date = now.format("%Y%m%d").to_string();
        if date != self.last_reset_date {
            self.current_round = 1;
            self.current_seq = 1;
            self.last_reset_date = date.clone();
        }
        format!("{}_{}_{}", date, self.current_round, self.current_seq)
    }
}

// ---------------------------------------------------------------------------
// Account state
// ---------------------------------------------------------------------------

/// Everything one account's pipeline reads and writes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountState {
    /// Binary round outcomes, oldest first (big = 1, small = 0).
    pub history: Vec<u8>,
    /// Directions predicted for placed wagers, for accuracy monitoring.
    pub predictions: Vec<u8>,
    pub ledger: Vec<WagerLogEntry>,
    pub pending: Option<PendingWager>,
    pub counters: RuntimeCounters,
}

impl AccountState {
    pub fn new(fund: i64, preset: StakePreset, model_id: String) -> Self {
        Self {
            history: Vec::new(),
            predictions: Vec::new(),
            ledger: Vec::new(),
            pending: None,
            counters: RuntimeCounters::new(fund, preset, model_id),
        }
    }

    /// Append an observed round outcome, trimming the oldest past the cap.
    pub fn push_outcome(&mut self, bit: u8) {
        self.history.push(if bit == 0 { 0 } else { 1 });
        if self.history.len() > HISTORY_CAP {
            let excess = self.history.len() - HISTORY_CAP;
            self.history.drain(..excess);
        }
    }

    /// Replace local history with a decoded feed suffix, but only when the
    /// feed knows at least as much as we do. A shorter or failed decode
    /// keeps the existing history.
    pub fn backfill_history(&mut self, decoded: Vec<u8>) {
        if decoded.len() < self.history.len() {
            debug!(
                local = self.history.len(),
                decoded = decoded.len(),
                "History suffix shorter than local history, keeping local"
            );
            return;
        }
        let mut fresh = decoded;
        if fresh.len() > HISTORY_CAP {
            let excess = fresh.len() - HISTORY_CAP;
            fresh.drain(..excess);
        }
        self.history = fresh;
    }

    /// Record a placed wager: ledger entry, pending marker, counters.
    pub fn record_placed(&mut self, direction: Direction, stake: i64, now: DateTime<Utc>) {
        let c = &mut self.counters;
        c.sequence_count += 1;
        c.total_placed += 1;
        c.stake_base = stake;
        let id = c.next_wager_id(now);
        let sequence = c.sequence_count;
        c.current_seq += 1;

        self.predictions.push(direction.bit());
        if self.predictions.len() > HISTORY_CAP {
            let excess = self.predictions.len() - HISTORY_CAP;
            self.predictions.drain(..excess);
        }

        self.ledger
            .push(WagerLogEntry::pending(id.clone(), sequence, direction, stake));
        if self.ledger.len() > LEDGER_CAP {
            let excess = self.ledger.len() - LEDGER_CAP;
            self.ledger.drain(..excess);
        }

        self.pending = Some(PendingWager {
            id,
            sequence,
            direction,
            stake,
            placed_at: now,
        });
    }

    /// Resolve the tail ledger entry exactly once. Returns `false` when the
    /// tail is already settled (defensive short-circuit for replayed
    /// settlements that survived the id check).
    pub fn resolve_tail(&mut self, result: WagerResult, profit: i64) -> bool {
        match self.ledger.last_mut() {
            Some(entry) if !entry.result.is_settled() => {
                entry.result = result;
                entry.profit = profit;
                true
            }
            _ => false,
        }
    }

    /// Count of settled wagers in the ledger.
    pub fn settled_count(&self) -> usize {
        self.ledger.iter().filter(|e| e.result.is_settled()).count()
    }

    /// The most recent `window` settled outcomes (win = 1, lose = 0),
    /// oldest first.
    pub fn settled_outcomes(&self, window: usize) -> Vec<u8> {
        if window == 0 {
            return Vec::new();
        }
        let mut outcomes: Vec<u8> = Vec::with_capacity(window);
        for entry in self.ledger.iter().rev() {
            match entry.result {
                WagerResult::Win => outcomes.push(1),
                WagerResult::Lose => outcomes.push(0),
                WagerResult::Pending => continue,
            }
            if outcomes.len() >= window {
                break;
            }
        }
        outcomes.reverse();
        outcomes
    }

    /// Round/sequence position of the wager being settled, parsed from the
    /// tail ledger id with a counter-based fallback.
    pub fn settle_position(&self) -> (u32, u32) {
        if let Some(entry) = self.ledger.last() {
            let parts: Vec<&str> = entry.id.split('_').collect();
            if parts.len() == 3 {
                if let (Ok(round), Ok(seq)) = (parts[1].parse(), parts[2].parse()) {
                    return (round, seq);
                }
            }
        }
        let c = &self.counters;
        (c.current_round, c.current_seq.saturating_sub(1).max(1))
    }

    /// Sum of losses across the current streak's ledger entries plus the
    /// just-lost stake, for the lose-streak warning.
    pub fn streak_loss_total(&self, current_stake: i64) -> i64 {
        let streak = self.counters.loss_count as usize;
        let mut total = current_stake;
        if streak > 1 {
            // The tail entry is the current loss; walk the ones before it.
            let upto = self.ledger.len().saturating_sub(1);
            let from = upto.saturating_sub(streak - 1);
            for entry in &self.ledger[from..upto] {
                if entry.profit < 0 {
                    total += entry.profit.abs();
                }
            }
        }
        total
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
