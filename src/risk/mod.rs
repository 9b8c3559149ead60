//! Automatic risk-pause controller.
//!
//! Two independent tiers evaluated against settled-wager snapshots:
//!
//! - **Base tier**: rolling win rate over the last 40 settled wagers, with
//!   two-evaluation hysteresis on both trigger and recovery, and a
//!   cumulative pause budget per un-recovered cycle.
//! - **Deep tier**: loss-streak milestones every 3 consecutive losses,
//!   each firing at most once per streak, independent of the base budget.
//!
//! A snapshot is identified by the settled-wager count; the controller is
//! never run twice against the same snapshot.

pub mod duration;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::state::AccountState;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct RiskConfig {
    /// Settled wagers the base tier looks back over.
    pub window: usize,
    /// Base tier triggers at `wins <= base_trigger_wins` (15/40 = 37.5%).
    pub base_trigger_wins: usize,
    /// Consecutive triggering evaluations required before pausing.
    pub base_hits_needed: u32,
    /// Recovery requires `wins >= recovery_wins` (19/40 = 47.5%).
    pub recovery_wins: usize,
    /// Consecutive recovery evaluations required to reset the cycle.
    pub recovery_passes_needed: u32,
    /// Per-pause ceiling for the base tier.
    pub base_pause_cap: u32,
    /// Cumulative pause budget within one un-recovered cycle.
    pub budget_rounds: u32,
    /// Deep tier fires at exact multiples of this loss streak.
    pub deep_interval: u32,
    /// Pause ceiling at the first milestone (loss 3).
    pub deep_first_cap: u32,
    /// Pause ceiling at later milestones. Deeper streaks pause less:
    /// committed capital makes over-pausing waste recovery time.
    pub deep_later_cap: u32,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            window: 40,
            base_trigger_wins: 15,
            base_hits_needed: 2,
            recovery_wins: 19,
            recovery_passes_needed: 2,
            base_pause_cap: 10,
            budget_rounds: 10,
            deep_interval: 3,
            deep_first_cap: 5,
            deep_later_cap: 3,
        }
    }
}

// ---------------------------------------------------------------------------
// Persistent cycle state
// ---------------------------------------------------------------------------

/// Risk bookkeeping persisted inside `RuntimeCounters`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskCycleState {
    /// A base-tier cycle is open (triggered and not yet recovered).
    pub cycle_active: bool,
    /// Pause rounds consumed from the budget in this cycle.
    pub acc_pause_rounds: u32,
    /// Settled count the controller last acted on (-1 = never).
    pub snapshot_count: i64,
    pub base_hit_streak: u32,
    pub recovery_passes: u32,
    /// Deep milestones already fired during the current loss streak.
    pub triggered_milestones: Vec<u32>,
    /// Per-reporting-block counters for the periodic risk summary.
    pub block_hits: u32,
    pub block_rounds: u32,
}

impl Default for RiskCycleState {
    fn default() -> Self {
        Self {
            cycle_active: false,
            acc_pause_rounds: 0,
            snapshot_count: -1,
            base_hit_streak: 0,
            recovery_passes: 0,
            triggered_milestones: Vec::new(),
            block_hits: 0,
            block_rounds: 0,
        }
    }
}

// ---------------------------------------------------------------------------
// Evaluation snapshot
// ---------------------------------------------------------------------------

/// Result of evaluating the tiers against one settled-count snapshot.
#[derive(Debug, Clone)]
pub struct RiskSnapshot {
    pub wins: usize,
    pub total: usize,
    pub win_rate: f64,
    pub loss_count: u32,
    pub next_sequence: u32,
    pub base_window_ready: bool,
    pub base_trigger: bool,
    pub recovery_hit: bool,
    /// Milestone and its pause ceiling, when the deep tier is due.
    pub deep_milestone: Option<DeepMilestone>,
    pub reasons: Vec<String>,
    /// Tail of the settled outcomes, for the duration prompt.
    pub recent_outcomes: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeepMilestone {
    pub milestone: u32,
    pub cap: u32,
}

/// What the base tier wants to do at a triggering snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BaseDecision {
    NotTriggered,
    /// Budget spent: log and keep betting.
    BudgetExhausted,
    /// Pause, bounded by the tier cap and the remaining budget.
    Pause { cap: u32 },
}

// ---------------------------------------------------------------------------
// Controller
// ---------------------------------------------------------------------------

pub struct RiskController {
    config: RiskConfig,
}

impl RiskController {
    pub fn new(config: RiskConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RiskConfig {
        &self.config
    }

    /// Whether this settled-count snapshot was already acted on.
    pub fn should_skip_snapshot(&self, cycle: &RiskCycleState, settled_count: usize) -> bool {
        cycle.snapshot_count == settled_count as i64
    }

    /// Evaluate both tiers against the current ledger.
    pub fn evaluate(&self, state: &AccountState, next_sequence: u32) -> RiskSnapshot {
        let outcomes = state.settled_outcomes(self.config.window);
        let total = outcomes.len();
        let wins = outcomes.iter().filter(|&&o| o == 1).count();
        let win_rate = if total > 0 {
            wins as f64 / total as f64
        } else {
            0.0
        };
        let loss_count = state.counters.loss_count;
        let base_window_ready = total >= self.config.window;
        let base_trigger = base_window_ready && wins <= self.config.base_trigger_wins;
        let recovery_hit = base_window_ready && wins >= self.config.recovery_wins;

        let lose_stop = state.counters.preset.lose_stop.max(1);
        let mut deep_milestone = None;
        if loss_count >= self.config.deep_interval && loss_count < lose_stop {
            let milestone = (loss_count / self.config.deep_interval) * self.config.deep_interval;
            if milestone > 0
                && !state
                    .counters
                    .risk
                    .triggered_milestones
                    .contains(&milestone)
            {
                let cap = if milestone == self.config.deep_interval {
                    self.config.deep_first_cap
                } else {
                    self.config.deep_later_cap
                };
                deep_milestone = Some(DeepMilestone { milestone, cap });
            }
        }

        let mut reasons = Vec::new();
        if base_trigger {
            reasons.push(format!(
                "win rate over last {} settled at or below {:.1}%",
                self.config.window,
                self.config.base_trigger_wins as f64 / self.config.window as f64 * 100.0,
            ));
        }
        if let Some(deep) = deep_milestone {
            reasons.push(format!(
                "loss streak hit the {}-loss milestone",
                deep.milestone
            ));
        }

        let tail_start = outcomes.len().saturating_sub(20);
        RiskSnapshot {
            wins,
            total,
            win_rate,
            loss_count,
            next_sequence,
            base_window_ready,
            base_trigger,
            recovery_hit,
            deep_milestone,
            reasons,
            recent_outcomes: outcomes[tail_start..].to_vec(),
        }
    }

    /// Advance the hysteresis streaks for a freshly evaluated snapshot and
    /// mark it consumed, so repeated bet opportunities without a new
    /// settlement never double-count an evaluation.
    pub fn update_streaks(
        &self,
        cycle: &mut RiskCycleState,
        snapshot: &RiskSnapshot,
        settled_count: usize,
    ) {
        cycle.snapshot_count = settled_count as i64;
        if snapshot.base_trigger {
            cycle.base_hit_streak += 1;
        } else {
            cycle.base_hit_streak = 0;
        }

        if snapshot.recovery_hit && cycle.cycle_active {
            cycle.recovery_passes += 1;
        } else {
            cycle.recovery_passes = 0;
        }
    }

    /// Reset the cycle when recovery has held long enough. Returns `true`
    /// when a reset happened.
    pub fn try_recover(&self, cycle: &mut RiskCycleState) -> bool {
        if !cycle.cycle_active || cycle.recovery_passes < self.config.recovery_passes_needed {
            return false;
        }
        cycle.cycle_active = false;
        cycle.acc_pause_rounds = 0;
        cycle.snapshot_count = -1;
        cycle.recovery_passes = 0;
        cycle.base_hit_streak = 0;
        info!("Risk cycle recovered, pause budget reset");
        true
    }

    /// Decide what the base tier does at this snapshot.
    pub fn base_decision(&self, cycle: &RiskCycleState, snapshot: &RiskSnapshot) -> BaseDecision {
        if !snapshot.base_trigger || cycle.base_hit_streak < self.config.base_hits_needed {
            return BaseDecision::NotTriggered;
        }
        let remaining = self
            .config
            .budget_rounds
            .saturating_sub(cycle.acc_pause_rounds);
        if remaining == 0 {
            BaseDecision::BudgetExhausted
        } else {
            BaseDecision::Pause {
                cap: self.config.base_pause_cap.min(remaining).max(1),
            }
        }
    }

    /// Record a committed base-tier pause.
    pub fn commit_base_pause(
        &self,
        cycle: &mut RiskCycleState,
        rounds: u32,
        settled_count: usize,
    ) {
        cycle.cycle_active = true;
        cycle.acc_pause_rounds += rounds;
        cycle.snapshot_count = settled_count as i64;
        cycle.block_hits += 1;
        cycle.block_rounds += rounds;
    }

    /// Record a budget-exhausted trigger (no pause, betting continues).
    pub fn mark_budget_exhausted(&self, cycle: &mut RiskCycleState, settled_count: usize) {
        cycle.cycle_active = true;
        cycle.snapshot_count = settled_count as i64;
    }

    /// Record a committed deep-tier pause.
    pub fn commit_deep_pause(
        &self,
        cycle: &mut RiskCycleState,
        milestone: u32,
        rounds: u32,
        settled_count: usize,
    ) {
        if !cycle.triggered_milestones.contains(&milestone) {
            cycle.triggered_milestones.push(milestone);
            cycle.triggered_milestones.sort_unstable();
        }
        cycle.snapshot_count = settled_count as i64;
        cycle.block_hits += 1;
        cycle.block_rounds += rounds;
    }

    /// A win ends the loss streak; the milestone set starts over.
    pub fn clear_milestones(&self, cycle: &mut RiskCycleState) {
        cycle.triggered_milestones.clear();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Direction, StakePreset, WagerResult};
    use chrono::Utc;

    fn controller() -> RiskController {
        RiskController::new(RiskConfig::default())
    }

    /// Build a state with `wins` wins in the last `total` settled wagers
    /// (losses last, so the loss streak matches the trailing losses).
    fn state_with_record(wins: usize, total: usize) -> AccountState {
        let mut state = AccountState::new(10_000_000, StakePreset::default(), "m".into());
        for i in 0..total {
            state.record_placed(Direction::Big, 500, Utc::now());
            let won = i < wins;
            state.resolve_tail(
                if won { WagerResult::Win } else { WagerResult::Lose },
                if won { 495 } else { -500 },
            );
            state.counters.record_result(won, if won { 495 } else { -500 });
            state.pending = None;
        }
        state
    }

    // -- Evaluation --

    #[test]
    fn test_window_not_ready_below_forty() {
        let state = state_with_record(5, 39);
        let snapshot = controller().evaluate(&state, 1);
        assert!(!snapshot.base_window_ready);
        assert!(!snapshot.base_trigger);
        assert!(!snapshot.recovery_hit);
    }

    #[test]
    fn test_base_trigger_at_fifteen_of_forty() {
        let state = state_with_record(15, 40);
        let snapshot = controller().evaluate(&state, 1);
        assert!(snapshot.base_window_ready);
        assert!(snapshot.base_trigger);
        assert_eq!(snapshot.wins, 15);
    }

    #[test]
    fn test_base_not_triggered_at_sixteen_wins() {
        let state = state_with_record(16, 40);
        let snapshot = controller().evaluate(&state, 1);
        assert!(!snapshot.base_trigger);
    }

    #[test]
    fn test_recovery_hit_at_nineteen_wins() {
        let state = state_with_record(19, 40);
        let snapshot = controller().evaluate(&state, 1);
        assert!(snapshot.recovery_hit);
    }

    #[test]
    fn test_deep_milestone_at_multiples_of_three() {
        let mut state = state_with_record(10, 40);
        state.counters.loss_count = 3;
        let snapshot = controller().evaluate(&state, 1);
        let deep = snapshot.deep_milestone.expect("milestone due");
        assert_eq!(deep.milestone, 3);
        assert_eq!(deep.cap, 5); // first milestone gets the higher ceiling

        state.counters.loss_count = 6;
        let deep = controller().evaluate(&state, 1).deep_milestone.unwrap();
        assert_eq!(deep.milestone, 6);
        assert_eq!(deep.cap, 3); // later milestones pause less

        state.counters.loss_count = 4;
        // Milestone 3 for a 4-deep streak — still the same milestone value.
        let deep = controller().evaluate(&state, 1).deep_milestone.unwrap();
        assert_eq!(deep.milestone, 3);
    }

    #[test]
    fn test_deep_milestone_not_repeated_within_streak() {
        let mut state = state_with_record(10, 40);
        state.counters.loss_count = 3;
        state.counters.risk.triggered_milestones = vec![3];
        assert!(controller().evaluate(&state, 1).deep_milestone.is_none());
    }

    #[test]
    fn test_deep_milestone_suppressed_at_lose_stop() {
        let mut state = state_with_record(10, 40);
        state.counters.preset.lose_stop = 6;
        state.counters.loss_count = 6;
        assert!(controller().evaluate(&state, 1).deep_milestone.is_none());
    }

    #[test]
    fn test_no_deep_milestone_below_interval() {
        let mut state = state_with_record(10, 40);
        state.counters.loss_count = 2;
        assert!(controller().evaluate(&state, 1).deep_milestone.is_none());
    }

    // -- Hysteresis --

    #[test]
    fn test_base_pause_requires_two_consecutive_hits() {
        let ctl = controller();
        let state = state_with_record(15, 40);
        let snapshot = ctl.evaluate(&state, 1);
        let mut cycle = RiskCycleState::default();

        ctl.update_streaks(&mut cycle, &snapshot, 40);
        assert_eq!(ctl.base_decision(&cycle, &snapshot), BaseDecision::NotTriggered);

        ctl.update_streaks(&mut cycle, &snapshot, 41);
        assert!(matches!(
            ctl.base_decision(&cycle, &snapshot),
            BaseDecision::Pause { .. }
        ));
    }

    #[test]
    fn test_update_streaks_marks_snapshot_consumed() {
        let ctl = controller();
        let snapshot = ctl.evaluate(&state_with_record(15, 40), 1);
        let mut cycle = RiskCycleState::default();
        assert!(!ctl.should_skip_snapshot(&cycle, 40));
        ctl.update_streaks(&mut cycle, &snapshot, 40);
        assert!(ctl.should_skip_snapshot(&cycle, 40));
        assert!(!ctl.should_skip_snapshot(&cycle, 41));
    }

    #[test]
    fn test_hit_streak_resets_on_clean_snapshot() {
        let ctl = controller();
        let bad = ctl.evaluate(&state_with_record(15, 40), 1);
        let good = ctl.evaluate(&state_with_record(20, 40), 1);
        let mut cycle = RiskCycleState::default();
        ctl.update_streaks(&mut cycle, &bad, 40);
        ctl.update_streaks(&mut cycle, &good, 41);
        ctl.update_streaks(&mut cycle, &bad, 42);
        assert_eq!(cycle.base_hit_streak, 1);
    }

    #[test]
    fn test_recovery_needs_active_cycle_and_two_passes() {
        let ctl = controller();
        let good = ctl.evaluate(&state_with_record(20, 40), 1);
        let mut cycle = RiskCycleState::default();

        // Without an active cycle, recovery passes don't accumulate.
        ctl.update_streaks(&mut cycle, &good, 40);
        assert_eq!(cycle.recovery_passes, 0);

        cycle.cycle_active = true;
        cycle.acc_pause_rounds = 6;
        ctl.update_streaks(&mut cycle, &good, 41);
        assert!(!ctl.try_recover(&mut cycle));
        ctl.update_streaks(&mut cycle, &good, 42);
        assert!(ctl.try_recover(&mut cycle));
        assert!(!cycle.cycle_active);
        assert_eq!(cycle.acc_pause_rounds, 0);
        assert_eq!(cycle.snapshot_count, -1);
    }

    // -- Budget --

    #[test]
    fn test_budget_never_exceeded() {
        let ctl = controller();
        let state = state_with_record(15, 40);
        let snapshot = ctl.evaluate(&state, 1);
        let mut cycle = RiskCycleState::default();
        cycle.base_hit_streak = 2;

        let mut committed = 0;
        loop {
            match ctl.base_decision(&cycle, &snapshot) {
                BaseDecision::Pause { cap } => {
                    ctl.commit_base_pause(&mut cycle, cap, committed as usize);
                    committed += cap;
                }
                BaseDecision::BudgetExhausted => break,
                BaseDecision::NotTriggered => panic!("streak should keep it triggered"),
            }
        }
        assert_eq!(cycle.acc_pause_rounds, 10);
        assert!(committed <= 10);
    }

    #[test]
    fn test_budget_remaining_caps_pause() {
        let ctl = controller();
        let snapshot = ctl.evaluate(&state_with_record(15, 40), 1);
        let mut cycle = RiskCycleState::default();
        cycle.base_hit_streak = 2;
        cycle.acc_pause_rounds = 8;
        match ctl.base_decision(&cycle, &snapshot) {
            BaseDecision::Pause { cap } => assert_eq!(cap, 2),
            other => panic!("unexpected decision: {other:?}"),
        }
    }

    // -- Snapshot guard --

    #[test]
    fn test_snapshot_guard() {
        let ctl = controller();
        let mut cycle = RiskCycleState::default();
        assert!(!ctl.should_skip_snapshot(&cycle, 0));
        ctl.commit_base_pause(&mut cycle, 2, 40);
        assert!(ctl.should_skip_snapshot(&cycle, 40));
        assert!(!ctl.should_skip_snapshot(&cycle, 41));
    }

    // -- Milestones --

    #[test]
    fn test_commit_deep_pause_records_milestone() {
        let ctl = controller();
        let mut cycle = RiskCycleState::default();
        ctl.commit_deep_pause(&mut cycle, 3, 4, 41);
        assert_eq!(cycle.triggered_milestones, vec![3]);
        assert_eq!(cycle.snapshot_count, 41);
        ctl.commit_deep_pause(&mut cycle, 6, 2, 44);
        assert_eq!(cycle.triggered_milestones, vec![3, 6]);
        ctl.clear_milestones(&mut cycle);
        assert!(cycle.triggered_milestones.is_empty());
    }

    #[test]
    fn test_cycle_state_serialization_roundtrip() {
        let mut cycle = RiskCycleState::default();
        cycle.triggered_milestones = vec![3, 6];
        cycle.acc_pause_rounds = 7;
        let json = serde_json::to_string(&cycle).unwrap();
        let parsed: RiskCycleState = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, cycle);
    }
}
