//! Core engine — per-account event pipelines.
//!
//! One `AccountPipeline` per account owns that account's state behind a
//! mutex: the bet-placement and settlement entry points serialise on it,
//! so a "round opened" and a "round settled" delivered nearly
//! simultaneously can never mutate the counters concurrently. Accounts
//! are fully independent; no lock spans two of them.

pub mod betting;
pub mod commands;
pub mod pause;
pub mod settlement;

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::error;

use crate::feed::GameEvent;
use crate::llm::ModelGateway;
use crate::notify::{MessageKind, NoticeId, Notifier};
use crate::platform::StakePlacer;
use crate::predictor::{Predictor, PredictorConfig};
use crate::risk::{RiskConfig, RiskController};
use crate::state::AccountState;
use crate::storage;
use crate::strategy::sizing::{BetSizer, SizingConfig};

// ---------------------------------------------------------------------------
// Settings
// ---------------------------------------------------------------------------

/// Per-account wiring and tunables.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub name: String,
    pub state_path: PathBuf,
    pub decisions_path: PathBuf,
    /// Stake-control denominations available on round prompts.
    pub control_denominations: Vec<i64>,
    pub sizing: SizingConfig,
    pub predictor: PredictorConfig,
    pub risk: RiskConfig,
    /// Bet reports are withdrawn after this long.
    pub bet_report_ttl: std::time::Duration,
    /// Streak digests are withdrawn after this long.
    pub stats_ttl: std::time::Duration,
    /// Placed-wager interval between streak digests.
    pub stats_interval: u64,
    /// Placed-wager interval between risk-pause summaries.
    pub summary_interval: u64,
}

impl PipelineSettings {
    pub fn new(name: impl Into<String>, state_path: PathBuf, decisions_path: PathBuf) -> Self {
        Self {
            name: name.into(),
            state_path,
            decisions_path,
            control_denominations: crate::platform::DEFAULT_CONTROL_DENOMINATIONS.to_vec(),
            sizing: SizingConfig::default(),
            predictor: PredictorConfig::default(),
            risk: RiskConfig::default(),
            bet_report_ttl: std::time::Duration::from_secs(100),
            stats_ttl: std::time::Duration::from_secs(600),
            stats_interval: 10,
            summary_interval: 100,
        }
    }
}

// ---------------------------------------------------------------------------
// Refreshable notices
// ---------------------------------------------------------------------------

/// Console slots that keep only their latest notice: refreshing revokes
/// the previous one instead of stacking duplicates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum NoticeSlot {
    Countdown,
    RiskPause,
    LoseStreak,
    Dashboard,
}

#[derive(Default)]
struct NoticeHandles {
    countdown: Option<NoticeId>,
    risk_pause: Option<NoticeId>,
    lose_streak: Option<NoticeId>,
    dashboard: Option<NoticeId>,
}

impl NoticeHandles {
    fn take(&mut self, slot: NoticeSlot) -> Option<NoticeId> {
        match slot {
            NoticeSlot::Countdown => self.countdown.take(),
            NoticeSlot::RiskPause => self.risk_pause.take(),
            NoticeSlot::LoseStreak => self.lose_streak.take(),
            NoticeSlot::Dashboard => self.dashboard.take(),
        }
    }

    fn set(&mut self, slot: NoticeSlot, id: Option<NoticeId>) {
        match slot {
            NoticeSlot::Countdown => self.countdown = id,
            NoticeSlot::RiskPause => self.risk_pause = id,
            NoticeSlot::LoseStreak => self.lose_streak = id,
            NoticeSlot::Dashboard => self.dashboard = id,
        }
    }
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

pub struct AccountPipeline {
    pub(crate) settings: PipelineSettings,
    state: Mutex<AccountState>,
    pub(crate) gateway: Arc<dyn ModelGateway>,
    pub(crate) placer: Arc<dyn StakePlacer>,
    pub(crate) notifier: Arc<dyn Notifier>,
    pub(crate) sizer: BetSizer,
    pub(crate) predictor: Predictor,
    pub(crate) risk: RiskController,
    notices: std::sync::Mutex<NoticeHandles>,
}

impl AccountPipeline {
    pub fn new(
        settings: PipelineSettings,
        state: AccountState,
        gateway: Arc<dyn ModelGateway>,
        placer: Arc<dyn StakePlacer>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let sizer = BetSizer::new(settings.sizing.clone());
        let predictor = Predictor::new(settings.predictor.clone());
        let risk = RiskController::new(settings.risk.clone());
        Self {
            settings,
            state: Mutex::new(state),
            gateway,
            placer,
            notifier,
            sizer,
            predictor,
            risk,
            notices: std::sync::Mutex::new(NoticeHandles::default()),
        }
    }

    /// Single entry point for this account's events. The state lock makes
    /// the whole handler a critical section; no error escapes it.
    pub async fn handle(&self, event: GameEvent) {
        let mut state = self.state.lock().await;
        match event {
            GameEvent::RoundOpened(opened) => {
                if let Err(e) = betting::process_round_opened(self, &mut state, &opened).await {
                    error!(account = %self.settings.name, error = %e, "Bet path failed");
                    self.notifier
                        .notify(MessageKind::Error, &format!("bet path error: {e}"))
                        .await;
                }
            }
            GameEvent::RoundSettled(settled) => {
                if let Err(e) = settlement::process_settlement(self, &mut state, &settled).await {
                    error!(account = %self.settings.name, error = %e, "Settlement failed");
                    self.notifier
                        .notify(MessageKind::Error, &format!("settlement error: {e}"))
                        .await;
                }
            }
            GameEvent::Operator(command) => {
                commands::process_command(self, &mut state, command).await;
            }
        }
    }

    /// Clone of the current state, for inspection and tests.
    pub async fn snapshot(&self) -> AccountState {
        self.state.lock().await.clone()
    }

    /// Fire-and-forget persistence after an observable mutation.
    pub(crate) fn persist(&self, state: &AccountState) {
        if let Err(e) = storage::save_state(state, &self.settings.state_path) {
            error!(account = %self.settings.name, error = %e, "Failed to save state");
        }
    }

    /// Replace the notice in a slot: revoke the previous one, deliver the
    /// new text, remember the handle.
    pub(crate) async fn refresh_notice(&self, slot: NoticeSlot, kind: MessageKind, text: &str) {
        let old = self.notices.lock().unwrap().take(slot);
        if let Some(id) = old {
            self.notifier.revoke(id).await;
        }
        let new = self.notifier.notify(kind, text).await;
        self.notices.lock().unwrap().set(slot, new);
    }

    /// Withdraw whatever notice currently occupies a slot.
    pub(crate) async fn clear_notice(&self, slot: NoticeSlot) {
        let old = self.notices.lock().unwrap().take(slot);
        if let Some(id) = old {
            self.notifier.revoke(id).await;
        }
    }

    /// Schedule withdrawal of a transient notice. Scoped to the process
    /// lifetime; not required to complete before shutdown.
    pub(crate) fn revoke_later(&self, id: NoticeId, ttl: std::time::Duration) {
        let notifier = Arc::clone(&self.notifier);
        tokio::spawn(async move {
            tokio::time::sleep(ttl).await;
            notifier.revoke(id).await;
        });
    }
}
