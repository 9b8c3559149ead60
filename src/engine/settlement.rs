//! Settlement reconciler.
//!
//! Matches an incoming settlement to the single outstanding wager,
//! updates the ledger and counters, drives streak warnings and the
//! streak-ended summary, triggers the deep risk tier immediately on a
//! loss, and applies the fund and profit/loss-target gates. Duplicate
//! deliveries are discarded by event id; a defensive re-check refuses to
//! resolve an already-settled ledger entry.

use anyhow::Result;
use tracing::{debug, info, warn};

use super::pause::HardStopReason;
use super::{AccountPipeline, NoticeSlot};
use crate::feed::RoundSettled;
use crate::notify::MessageKind;
use crate::risk::duration::{self, RiskTier};
use crate::state::{AccountState, LossStreakStart};
use crate::strategy::features;
use crate::types::WagerResult;

/// Net payout of a winning wager after the platform's 1% rake.
pub fn win_profit(stake: i64) -> i64 {
    stake * 99 / 100
}

/// A recorded streak range is sane when the start does not come after
/// the end.
fn is_valid_loss_range(start: (u32, u32), end: (u32, u32)) -> bool {
    start.0 < end.0 || (start.0 == end.0 && start.1 <= end.1)
}

struct LoseEndPayload {
    start: (u32, u32),
    end: (u32, u32),
    loss_count: u32,
    continuous_count: u32,
    net_profit: i64,
}

// ---------------------------------------------------------------------------
// Reconciliation
// ---------------------------------------------------------------------------

pub(crate) async fn process_settlement(
    p: &AccountPipeline,
    state: &mut AccountState,
    event: &RoundSettled,
) -> Result<()> {
    // Duplicate delivery: discard silently.
    if event.event_id != 0 && event.event_id == state.counters.last_settlement_id {
        debug!(
            account = %p.settings.name,
            event_id = event.event_id,
            "Duplicate settlement, discarded"
        );
        return Ok(());
    }
    if event.event_id != 0 {
        state.counters.last_settlement_id = event.event_id;
    }

    // The feed is observed continuously for statistics, staked or not.
    state.push_outcome(event.label.bit());
    info!(
        account = %p.settings.name,
        result = %event.label,
        value = event.value,
        history_len = state.history.len(),
        "Outcome recorded"
    );

    // Rolling prediction accuracy, every 10 observed rounds.
    if state.history.len() >= 10 && state.history.len() % 10 == 0 && state.predictions.len() >= 10
    {
        let hits = state.history[state.history.len() - 10..]
            .iter()
            .zip(&state.predictions[state.predictions.len() - 10..])
            .filter(|(h, p)| h == p)
            .count();
        info!(
            account = %p.settings.name,
            accuracy = format!("{}%", hits * 10),
            "Prediction accuracy over last 10 rounds"
        );
    }

    let mut lose_end: Option<LoseEndPayload> = None;

    // Settle the outstanding wager, if any.
    if let Some(wager) = state.pending.clone() {
        // A wager is resolved exactly once. If the tail entry is already
        // settled the pending marker is stale: drop it and stop.
        if state
            .ledger
            .last()
            .map(|e| e.result.is_settled())
            .unwrap_or(false)
        {
            warn!(
                account = %p.settings.name,
                wager = %wager.id,
                "Tail ledger entry already settled, clearing stale pending marker"
            );
            state.pending = None;
            p.persist(state);
            return Ok(());
        }

        let won = wager.direction == event.label;
        let profit = if won {
            win_profit(wager.stake)
        } else {
            -wager.stake
        };
        let old_loss_count = state.counters.loss_count;
        let position = state.settle_position();

        state.counters.record_result(won, profit);
        state.resolve_tail(
            if won { WagerResult::Win } else { WagerResult::Lose },
            profit,
        );
        state.pending = None;

        if won {
            // A win ends the loss streak; milestones start over.
            p.risk.clear_milestones(&mut state.counters.risk);
        } else {
            if state.counters.loss_count == 1 {
                // New streak: forget the previous streak's milestones and
                // any leftover reporting state before snapshotting.
                p.risk.clear_milestones(&mut state.counters.risk);
                state.counters.clear_loss_tracking();
                state.counters.loss_streak_start = Some(LossStreakStart {
                    round: position.0,
                    seq: position.1,
                    fund_before: state.counters.fund + wager.stake,
                });
            }

            if state.counters.loss_count >= state.counters.warning_threshold {
                state.counters.lose_notify_pending = true;
                let total_losses = state.streak_loss_total(wager.stake);
                let text = format!(
                    "{}-loss streak warning\nround {} wager {}\nrun: wager #{}\ndirection: {}\nstake: {}\ncumulative loss this streak: {}\nfund remaining: {}",
                    state.counters.loss_count,
                    position.0,
                    position.1,
                    state.counters.sequence_count,
                    wager.direction,
                    wager.stake,
                    total_losses,
                    state.counters.fund.max(0),
                );
                warn!(
                    account = %p.settings.name,
                    loss_count = state.counters.loss_count,
                    total_losses,
                    "Loss streak warning"
                );
                p.refresh_notice(NoticeSlot::LoseStreak, MessageKind::LoseStreak, &text)
                    .await;
            }
        }

        // Streak-ended summary, validated against the recorded range.
        if won && state.counters.lose_notify_pending {
            let start = state.counters.loss_streak_start.clone();
            match start {
                Some(start)
                    if old_loss_count >= state.counters.warning_threshold
                        && old_loss_count > 0
                        && is_valid_loss_range((start.round, start.seq), position) =>
                {
                    lose_end = Some(LoseEndPayload {
                        start: (start.round, start.seq),
                        end: position,
                        loss_count: old_loss_count,
                        continuous_count: state.counters.sequence_count.max(old_loss_count + 1),
                        net_profit: state.counters.fund - start.fund_before,
                    });
                }
                _ => {
                    // Stale or inverted range: suppress rather than emit
                    // wrong numbers.
                    warn!(
                        account = %p.settings.name,
                        old_loss_count,
                        start = ?state.counters.loss_streak_start,
                        end = ?position,
                        "Malformed loss-streak range, summary suppressed"
                    );
                }
            }
            state.counters.clear_loss_tracking();
        } else if won {
            state.counters.clear_loss_tracking();
        }

        let result_text = if won { "win" } else { "lose" };
        let settled_amount = if won { win_profit(wager.stake) } else { wager.stake };
        let notice = format!(
            "Wager {} settled: {}\nrun: wager #{}\ndirection: {}\nstake: {}\nresult: {} {}\noutcome: {}\nbasis: {}",
            wager.id,
            result_text,
            state.counters.sequence_count,
            wager.direction,
            wager.stake,
            result_text,
            settled_amount,
            event.label,
            state.counters.last_predict_info,
        );
        p.notifier.notify(MessageKind::Settle, &notice).await;
        info!(
            account = %p.settings.name,
            wager = %wager.id,
            result = result_text,
            profit,
            fund = state.counters.fund,
            "Wager settled"
        );

        p.persist(state);

        // Deep tier fires here, on the settled loss count, so the pause
        // is communicated as soon as the triggering loss is known.
        if !won {
            let next_sequence = state.counters.sequence_count + 1;
            let settled_count = state.settled_count();
            let snapshot = p.risk.evaluate(state, next_sequence);
            if let Some(deep) = snapshot.deep_milestone {
                let suggestion = duration::resolve_pause_rounds(
                    p.gateway.as_ref(),
                    &state.counters.model_id,
                    RiskTier::Deep {
                        milestone: deep.milestone,
                    },
                    &snapshot,
                    deep.cap,
                )
                .await;
                let rounds = suggestion.rounds.clamp(1, deep.cap);
                p.risk.commit_deep_pause(
                    &mut state.counters.risk,
                    deep.milestone,
                    rounds,
                    settled_count,
                );
                let reason = format!("deep risk pause ({}-loss milestone)", deep.milestone);
                state.counters.pause.begin_countdown(&reason, rounds);

                let text = format!(
                    "Automatic risk pause\ntier: deep ({}-loss milestone)\nlast {} settled: {}/{} ({:.1}%)\nnext planned wager: #{}\nsuggested rounds: {} ({})\npausing {} rounds (tier cap {}, base budget untouched)\nrationale: {}\naction: progression preserved, watching the table",
                    deep.milestone,
                    snapshot.total,
                    snapshot.wins,
                    snapshot.total,
                    snapshot.win_rate * 100.0,
                    next_sequence,
                    suggestion.rounds,
                    if suggestion.from_model { "model" } else { "fallback" },
                    rounds,
                    deep.cap,
                    suggestion.reason,
                );
                p.refresh_notice(NoticeSlot::RiskPause, MessageKind::RiskPause, &text)
                    .await;
                info!(
                    account = %p.settings.name,
                    milestone = deep.milestone,
                    rounds,
                    "Deep-tier risk pause triggered at settlement"
                );
                p.persist(state);
            }
        }

        // Progression reset: a win or a busted ladder starts over. The
        // bust also counts one explode event toward loss protection.
        if won || state.counters.loss_count >= state.counters.preset.lose_stop {
            if !won {
                state.counters.explode_count += 1;
                warn!(
                    account = %p.settings.name,
                    explode_count = state.counters.explode_count,
                    "Progression busted at the loss cap"
                );
            }
            state.counters.reset_progression();
        }
    }

    // Fund gates, on the post-settlement balance.
    if state.counters.fund <= 0 {
        if !state.counters.fund_pause_notified {
            p.notifier
                .notify(
                    MessageKind::Warning,
                    &format!(
                        "Fund exhausted, betting stopped\nremaining: {}\nadd funds and resume to continue",
                        state.counters.fund.max(0),
                    ),
                )
                .await;
            state.counters.fund_pause_notified = true;
        }
        state
            .counters
            .pause
            .hard_stop(HardStopReason::FundsExhausted);
    } else {
        let next_stake = p.sizer.stake(&state.counters);
        if next_stake > 0 && !state.counters.fund_available(next_stake) {
            if !state.counters.fund_pause_notified {
                p.notifier
                    .notify(
                        MessageKind::Warning,
                        &format!(
                            "Insufficient funds for the next stake, betting stopped\nneed: {next_stake}\nremaining: {}\nadd funds and resume to continue",
                            state.counters.fund,
                        ),
                    )
                    .await;
                state.counters.fund_pause_notified = true;
            }
            state
                .counters
                .pause
                .hard_stop(HardStopReason::FundsExhausted);
        } else {
            state.counters.fund_pause_notified = false;
        }
    }

    // Profit-target / loss-protection gates.
    let explode_hit = state.counters.explode_count >= state.counters.explode_cap.max(1);
    let profit_hit = state.counters.session_profit >= state.counters.profit_target;
    if explode_hit || profit_hit {
        let (kind, reason, rounds) = if profit_hit {
            let prefix = format!(
                "{}_{}_",
                state.counters.last_reset_date, state.counters.current_round
            );
            let round_bets = state
                .ledger
                .iter()
                .filter(|e| e.id.starts_with(&prefix))
                .count();
            p.notifier
                .notify(
                    MessageKind::Win,
                    &format!(
                        "Session target reached\nround {} closed with profit {}\nwagers this round: {}",
                        state.counters.current_round, state.counters.session_profit, round_bets,
                    ),
                )
                .await;
            state.counters.current_round += 1;
            state.counters.current_seq = 1;
            (
                MessageKind::Win,
                "profit target pause",
                state.counters.profit_pause_rounds,
            )
        } else {
            p.notifier
                .notify(
                    MessageKind::Explode,
                    &format!(
                        "Loss protection tripped\nbusted ladders this session: {}\nsession result: {}",
                        state.counters.explode_count, state.counters.session_profit,
                    ),
                )
                .await;
            (
                MessageKind::Explode,
                "loss protection pause",
                state.counters.explode_pause_rounds,
            )
        };
        let rounds = rounds.max(1);
        state.counters.pause.begin_countdown(reason, rounds);
        state.counters.reset_session();
        let text = super::betting::countdown_notice_text(reason, rounds, rounds);
        p.refresh_notice(NoticeSlot::Countdown, MessageKind::Info, &text)
            .await;
        info!(account = %p.settings.name, kind = ?kind, rounds, "Target pause applied");
        p.persist(state);
    }

    // Streak-ended summary goes out after the ledger is fully written so
    // it never races the settlement notice.
    if let Some(payload) = lose_end {
        let range = if payload.start.0 == payload.end.0 {
            format!(
                "round {} wager {} through wager {}",
                payload.start.0, payload.start.1, payload.end.1
            )
        } else {
            format!(
                "round {} wager {} through round {} wager {}",
                payload.start.0, payload.start.1, payload.end.0, payload.end.1
            )
        };
        let text = format!(
            "{}-loss streak ended\n{}\nrun length: {} wagers\nstreak losses: {}\nnet result over the streak: {}\nfund remaining: {}",
            payload.loss_count,
            range,
            payload.continuous_count,
            payload.loss_count,
            payload.net_profit,
            state.counters.fund.max(0),
        );
        p.clear_notice(NoticeSlot::LoseStreak).await;
        p.notifier.notify(MessageKind::LoseEnd, &text).await;
        info!(
            account = %p.settings.name,
            loss_count = payload.loss_count,
            net_profit = payload.net_profit,
            "Loss streak ended"
        );
    }

    // Periodic streak digest, withdrawn after its TTL.
    let total = state.counters.total_placed;
    if total > 0
        && p.settings.stats_interval > 0
        && total % p.settings.stats_interval == 0
        && total != state.counters.stats_last_report_total
        && state.history.len() > 5
    {
        let digest = build_stats_digest(state);
        state.counters.stats_last_report_total = total;
        if let Some(id) = p.notifier.notify(MessageKind::Info, &digest).await {
            p.revoke_later(id, p.settings.stats_ttl);
        }
    }

    // Risk-pause block summary every `summary_interval` placed wagers.
    if total > 0
        && p.settings.summary_interval > 0
        && total % p.settings.summary_interval == 0
        && total != state.counters.risk_summary_last_total
    {
        let text = build_risk_summary(state, p.settings.summary_interval);
        p.notifier.notify(MessageKind::RiskSummary, &text).await;
        state.counters.risk_summary_last_total = total;
        state.counters.risk.block_hits = 0;
        state.counters.risk.block_rounds = 0;
    }

    // Refresh the dashboard.
    let dashboard = build_dashboard(state);
    p.refresh_notice(NoticeSlot::Dashboard, MessageKind::Dashboard, &dashboard)
        .await;

    p.persist(state);
    Ok(())
}

// ---------------------------------------------------------------------------
// Report builders
// ---------------------------------------------------------------------------

/// Operator dashboard, refreshed after every settlement.
pub fn build_dashboard(state: &AccountState) -> String {
    let c = &state.counters;

    // Last 40 outcomes, newest first, rows of ten.
    let recent: Vec<u8> = state.history.iter().rev().take(40).copied().collect();
    let mut grid = String::new();
    for row in recent.chunks(10) {
        let line: Vec<String> = row.iter().map(|b| b.to_string()).collect();
        grid.push_str(&line.join(" "));
        grid.push('\n');
    }

    let mut text = format!(
        "Recent 40 outcomes (newest first; 1 = big, 0 = small)\n{grid}\nStrategy\nmodel: {}\npreset: {}\nstop after {} consecutive wagers\nloss protection: {} busts pause {} rounds\n",
        c.model_id, c.preset, c.preset.lose_stop, c.explode_cap, c.explode_pause_rounds,
    );
    text.push_str(&format!(
        "\nFunds\nfund: {}\nprofit target: {} (pause {} rounds)\nsession profit: {}\ntotal earnings: {}\n",
        c.fund.max(0),
        c.profit_target,
        c.profit_pause_rounds,
        c.session_profit,
        c.earnings,
    ));
    if c.total_placed > 0 {
        text.push_str(&format!(
            "\nRecord\nwagers: {}\nwin rate: {:.2}%\nstate: {:?}\n",
            c.total_placed,
            c.win_rate(),
            c.pause,
        ));
    }
    text
}

/// Streak statistics over nested windows.
pub fn build_stats_digest(state: &AccountState) -> String {
    let windows = [1000usize, 500, 200, 100];
    let mut text = String::from("Streak statistics (window: length x count)\n");

    for window in windows {
        let start = state.history.len().saturating_sub(window);
        let (big, small) = features::consecutive_runs(&state.history[start..]);
        let ledger_start = state.ledger.len().saturating_sub(window);
        let losses = features::loss_streak_histogram(&state.ledger[ledger_start..]);

        let fmt = |map: &std::collections::BTreeMap<usize, u32>| -> String {
            if map.is_empty() {
                "-".to_string()
            } else {
                map.iter()
                    .rev()
                    .map(|(len, count)| format!("{len}x{count}"))
                    .collect::<Vec<_>>()
                    .join(" ")
            }
        };

        text.push_str(&format!(
            "last {window}: big runs {} | small runs {} | loss runs {}\n",
            fmt(&big),
            fmt(&small),
            fmt(&losses),
        ));
    }
    text
}

/// Risk-pause block summary for the priority channel.
fn build_risk_summary(state: &AccountState, interval: u64) -> String {
    let c = &state.counters;
    let block_end = c.total_placed;
    let block_start = block_end.saturating_sub(interval - 1).max(1);
    format!(
        "Risk-pause summary (every {} wagers)\nblock: wagers {} - {}\npause triggers: {}\nrounds paused: {}\noverall win rate: {:.2}% ({}/{})\ntotal earnings: {}\nfund: {}",
        interval,
        block_start,
        block_end,
        c.risk.block_hits,
        c.risk.block_rounds,
        c.win_rate(),
        c.total_wins,
        c.total_placed,
        c.earnings,
        c.fund.max(0),
    )
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Direction, StakePreset};
    use chrono::Utc;

    #[test]
    fn test_win_profit_floors_rake() {
        assert_eq!(win_profit(1000), 990);
        assert_eq!(win_profit(500), 495);
        assert_eq!(win_profit(1500), 1485);
        // 99% of 333 is 329.67; the payout floors.
        assert_eq!(win_profit(333), 329);
    }

    #[test]
    fn test_loss_range_validation() {
        assert!(is_valid_loss_range((1, 3), (1, 7)));
        assert!(is_valid_loss_range((1, 3), (2, 1)));
        assert!(is_valid_loss_range((1, 3), (1, 3)));
        assert!(!is_valid_loss_range((2, 1), (1, 9)));
        assert!(!is_valid_loss_range((1, 5), (1, 4)));
    }

    fn sample_state() -> AccountState {
        let mut state = AccountState::new(2_000_000, StakePreset::default(), "m".into());
        for bit in [1u8, 0, 0, 1, 1, 1, 0] {
            state.push_outcome(bit);
        }
        state
    }

    #[test]
    fn test_dashboard_mentions_fund_and_preset() {
        let state = sample_state();
        let text = build_dashboard(&state);
        assert!(text.contains("fund: 2000000"));
        assert!(text.contains("init=500"));
        assert!(text.contains("Recent 40 outcomes"));
    }

    #[test]
    fn test_dashboard_hides_record_before_first_wager() {
        let state = sample_state();
        assert!(!build_dashboard(&state).contains("win rate"));
    }

    #[test]
    fn test_dashboard_shows_record_after_wagers() {
        let mut state = sample_state();
        state.counters.total_placed = 4;
        state.counters.total_wins = 3;
        let text = build_dashboard(&state);
        assert!(text.contains("wagers: 4"));
        assert!(text.contains("win rate: 75.00%"));
    }

    #[test]
    fn test_stats_digest_counts_runs() {
        let mut state = sample_state();
        state.record_placed(Direction::Big, 500, Utc::now());
        state.resolve_tail(WagerResult::Lose, -500);
        state.pending = None;
        let digest = build_stats_digest(&state);
        assert!(digest.contains("last 100:"));
        // History tail is 1 1 1 -> a big run of length 3 exists somewhere.
        assert!(digest.contains("big runs"));
        assert!(digest.contains("loss runs 1x1"));
    }

    #[test]
    fn test_risk_summary_block_bounds() {
        let mut state = sample_state();
        state.counters.total_placed = 200;
        state.counters.total_wins = 90;
        state.counters.risk.block_hits = 3;
        state.counters.risk.block_rounds = 7;
        let text = build_risk_summary(&state, 100);
        assert!(text.contains("wagers 101 - 200"));
        assert!(text.contains("pause triggers: 3"));
        assert!(text.contains("rounds paused: 7"));
    }
}
