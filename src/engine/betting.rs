//! Round-opened path: pause gate, history backfill, base-tier risk
//! check, stake sizing, fund gate, prediction, placement.

use anyhow::Result;
use chrono::Utc;
use tracing::{debug, info, warn};

use super::pause::{Gate, HardStopReason};
use super::{AccountPipeline, NoticeSlot};
use crate::feed::{decode_history_suffix, RoundOpened};
use crate::notify::MessageKind;
use crate::platform::{self, PlaceError};
use crate::predictor;
use crate::risk::duration::{self, RiskTier};
use crate::risk::{BaseDecision, RiskSnapshot};
use crate::state::AccountState;
use crate::strategy::features;

/// Text of the renewable countdown notice.
pub(crate) fn countdown_notice_text(reason: &str, total_rounds: u32, remaining: u32) -> String {
    let elapsed = total_rounds.saturating_sub(remaining);
    format!(
        "Pause countdown\nreason: {reason}\nrounds remaining: {remaining}\nprogress: {elapsed}/{total_rounds}\nbetting resumes automatically when the countdown ends",
    )
}

fn base_pause_text(
    snapshot: &RiskSnapshot,
    suggestion: &duration::PauseSuggestion,
    rounds: u32,
    hit_streak: u32,
    budget_used: u32,
    budget_total: u32,
) -> String {
    let reasons = if snapshot.reasons.is_empty() {
        "window volatility".to_string()
    } else {
        snapshot.reasons.join("; ")
    };
    format!(
        "Automatic risk pause\ntier: base\ntrigger: {reasons}\nlast {} settled: {}/{} ({:.1}%)\nnext planned wager: #{}\nsuggested rounds: {} ({})\npausing {} rounds (hit streak {}, budget {}/{})\nrationale: {}\naction: progression preserved, betting resumes after the pause",
        snapshot.total,
        snapshot.wins,
        snapshot.total,
        snapshot.win_rate * 100.0,
        snapshot.next_sequence,
        suggestion.rounds,
        if suggestion.from_model { "model" } else { "fallback" },
        rounds,
        hit_streak,
        budget_used,
        budget_total,
        suggestion.reason,
    )
}

/// Handle one bet opportunity.
pub(crate) async fn process_round_opened(
    p: &AccountPipeline,
    state: &mut AccountState,
    event: &RoundOpened,
) -> Result<()> {
    // Pause gate: consulting the machine IS the bet opportunity.
    match state.counters.pause.on_bet_opportunity() {
        Gate::SkipHold => {
            p.clear_notice(NoticeSlot::Countdown).await;
            debug!(account = %p.settings.name, state = ?state.counters.pause, "Paused, skipping round");
            p.persist(state);
            return Ok(());
        }
        Gate::SkipCountdown {
            reason,
            total_rounds,
            remaining,
        } => {
            if state.counters.pause.note_countdown_refresh(remaining) {
                let text = countdown_notice_text(&reason, total_rounds, remaining);
                p.refresh_notice(NoticeSlot::Countdown, MessageKind::Info, &text)
                    .await;
            }
            info!(account = %p.settings.name, remaining, "Countdown pause, skipping round");
            p.persist(state);
            return Ok(());
        }
        Gate::Resumed => {
            p.clear_notice(NoticeSlot::Countdown).await;
            p.notifier
                .notify(
                    MessageKind::Resume,
                    "Pause finished; betting resumes with this round",
                )
                .await;
            p.persist(state);
        }
        Gate::Proceed => {}
    }

    // Backfill the outcome history from the prompt's embedded suffix.
    if let Some(decoded) = decode_history_suffix(&event.text) {
        state.backfill_history(decoded);
    }

    // Base-tier risk check, once per settled-count snapshot.
    let next_sequence = state.counters.sequence_count + 1;
    let settled_count = state.settled_count();
    if !p
        .risk
        .should_skip_snapshot(&state.counters.risk, settled_count)
    {
        let snapshot = p.risk.evaluate(state, next_sequence);
        p.risk
            .update_streaks(&mut state.counters.risk, &snapshot, settled_count);
        if p.risk.try_recover(&mut state.counters.risk) {
            p.notifier
                .notify(
                    MessageKind::Info,
                    "Risk cycle recovered: win rate held above the recovery line, pause budget reset",
                )
                .await;
        }

        match p.risk.base_decision(&state.counters.risk, &snapshot) {
            BaseDecision::NotTriggered => {}
            BaseDecision::BudgetExhausted => {
                p.risk
                    .mark_budget_exhausted(&mut state.counters.risk, settled_count);
                p.notifier
                    .notify(
                        MessageKind::Warning,
                        &format!(
                            "Base risk pause budget exhausted ({} rounds this cycle); betting continues while recovery is awaited",
                            p.risk.config().budget_rounds,
                        ),
                    )
                    .await;
                p.persist(state);
            }
            BaseDecision::Pause { cap } => {
                let suggestion = duration::resolve_pause_rounds(
                    p.gateway.as_ref(),
                    &state.counters.model_id,
                    RiskTier::Base,
                    &snapshot,
                    cap,
                )
                .await;
                let rounds = suggestion.rounds.clamp(1, cap);
                p.risk
                    .commit_base_pause(&mut state.counters.risk, rounds, settled_count);
                state.counters.pause.begin_countdown("base risk pause", rounds);

                let text = base_pause_text(
                    &snapshot,
                    &suggestion,
                    rounds,
                    state.counters.risk.base_hit_streak,
                    state.counters.risk.acc_pause_rounds,
                    p.risk.config().budget_rounds,
                );
                p.refresh_notice(NoticeSlot::RiskPause, MessageKind::RiskPause, &text)
                    .await;
                p.persist(state);
                info!(
                    account = %p.settings.name,
                    wins = snapshot.wins,
                    total = snapshot.total,
                    rounds,
                    "Base-tier risk pause triggered"
                );
                return Ok(());
            }
        }
    }

    // Stake sizing. Zero is the hard-stop control signal.
    let stake = p.sizer.stake(&state.counters);
    if stake == 0 {
        if !state.counters.cap_stop_notified {
            p.notifier
                .notify(
                    MessageKind::Warning,
                    &format!(
                        "Progression cap reached: the preset allows at most {} consecutive wagers. Betting stopped until the preset changes and the account is resumed.",
                        state.counters.preset.lose_stop,
                    ),
                )
                .await;
            state.counters.cap_stop_notified = true;
        }
        state.counters.pause.hard_stop(HardStopReason::CapReached);
        state.counters.clear_loss_tracking();
        p.persist(state);
        return Ok(());
    }
    state.counters.cap_stop_notified = false;

    // Fund gate.
    if !state.counters.fund_available(stake) {
        if !state.counters.fund_pause_notified {
            p.notifier
                .notify(
                    MessageKind::Warning,
                    &format!(
                        "Insufficient funds for the next stake: need {stake}, have {}. Betting stopped until funds are added and the account is resumed.",
                        state.counters.fund.max(0),
                    ),
                )
                .await;
            state.counters.fund_pause_notified = true;
        }
        state.counters.pause.hard_stop(HardStopReason::FundsExhausted);
        state.counters.clear_loss_tracking();
        p.persist(state);
        return Ok(());
    }
    state.counters.fund_pause_notified = false;

    if !event.has_stake_controls {
        debug!(account = %p.settings.name, "Prompt has no stake controls, skipping round");
        return Ok(());
    }

    // Prediction (internal timeout, never fails).
    let (prediction, audit) = p
        .predictor
        .predict(
            p.gateway.as_ref(),
            &state.counters.model_id,
            &state.history,
            state.counters.loss_count,
            state.counters.earnings,
            next_sequence,
        )
        .await;

    let gap = features::trend_gap(&state.history, p.settings.predictor.gap_window);
    let tag = features::pattern_features(&state.history).tag;
    state.counters.last_predict_info = predictor::summary_line(&prediction, &gap, tag);
    if let Err(e) = storage_append(p, &audit) {
        warn!(account = %p.settings.name, error = %e, "Failed to append decisions log");
    }

    // Decompose the stake into control activations and place it.
    let Some(combination) = platform::decompose_stake(stake, &p.settings.control_denominations)
    else {
        warn!(
            account = %p.settings.name,
            stake,
            "No control combination for stake, skipping round"
        );
        return Ok(());
    };

    match platform::place_stake(p.placer.as_ref(), &event.prompt, &combination).await {
        Ok(()) => {}
        Err(PlaceError::StaleTarget(detail)) => {
            // Abandoned for this round only; the account stays active.
            warn!(account = %p.settings.name, detail = %detail, "Stake target stale, round skipped");
            p.notifier
                .notify(
                    MessageKind::Warning,
                    "Round window went stale before the stake was placed; skipped this round.",
                )
                .await;
            return Ok(());
        }
        Err(PlaceError::Other(detail)) => {
            p.notifier
                .notify(
                    MessageKind::Error,
                    &format!("Stake placement failed: {detail}"),
                )
                .await;
            return Ok(());
        }
    }

    state.record_placed(prediction.direction, stake, Utc::now());

    let (streak_len, streak_dir) = features::current_streak(&state.history);
    let report = format!(
        "Stake placed\ndirection: {}\namount: {}\nrun: wager #{}\ncurrent {} streak: {}",
        prediction.direction, stake, state.counters.sequence_count, streak_dir, streak_len,
    );
    if let Some(id) = p.notifier.notify(MessageKind::Info, &report).await {
        p.revoke_later(id, p.settings.bet_report_ttl);
    }

    info!(
        account = %p.settings.name,
        direction = %prediction.direction,
        stake,
        sequence = state.counters.sequence_count,
        "Wager placed"
    );

    p.persist(state);
    Ok(())
}

fn storage_append(p: &AccountPipeline, audit: &crate::predictor::AuditRecord) -> Result<()> {
    crate::storage::append_decision(&p.settings.decisions_path, audit)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
