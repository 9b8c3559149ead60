//! Operator commands.
//!
//! Each command maps to a direct counters mutation plus a state-machine
//! transition. Commands never fail: an unusable argument is reported and
//! the state is left untouched.

use tracing::{info, warn};

use super::{AccountPipeline, NoticeSlot};
use crate::feed::OperatorCommand;
use crate::notify::MessageKind;
use crate::state::AccountState;
use crate::strategy::projection;

pub(crate) async fn process_command(
    p: &AccountPipeline,
    state: &mut AccountState,
    command: OperatorCommand,
) {
    match command {
        OperatorCommand::Pause => {
            state.counters.pause.manual_pause();
            p.clear_notice(NoticeSlot::Countdown).await;
            info!(account = %p.settings.name, "Manual pause");
            p.notifier
                .notify(
                    MessageKind::Pause,
                    "Betting paused. Observation continues; resume to bet again.",
                )
                .await;
        }

        OperatorCommand::Resume => {
            state.counters.pause.resume();
            p.clear_notice(NoticeSlot::Countdown).await;
            info!(account = %p.settings.name, "Manual resume");
            p.notifier
                .notify(
                    MessageKind::Resume,
                    "Betting resumed; staking starts with the next round.",
                )
                .await;
        }

        OperatorCommand::SetFund(amount) => {
            if amount <= 0 {
                warn!(account = %p.settings.name, amount, "Rejected non-positive fund");
                p.notifier
                    .notify(
                        MessageKind::Warning,
                        &format!("Fund must be positive, got {amount}. Unchanged."),
                    )
                    .await;
                return;
            }
            state.counters.fund = amount;
            // Fresh funds re-arm the insufficient-funds notice.
            state.counters.fund_pause_notified = false;
            info!(account = %p.settings.name, fund = amount, "Fund set");
            p.notifier
                .notify(
                    MessageKind::Info,
                    &format!("Fund set to {amount}. Resume to continue betting if stopped."),
                )
                .await;
        }

        OperatorCommand::SetPreset(preset) => {
            if preset.initial_stake <= 0
                || preset.lose_stop == 0
                || preset.multipliers.iter().any(|&m| m <= 0.0)
            {
                warn!(account = %p.settings.name, preset = %preset, "Rejected invalid preset");
                p.notifier
                    .notify(
                        MessageKind::Warning,
                        &format!("Preset rejected ({preset}): stakes and multipliers must be positive."),
                    )
                    .await;
                return;
            }
            let projection = projection::project(&preset);
            state.counters.preset = preset.clone();
            state.counters.reset_progression();
            // A new cap re-arms the cap-reached notice.
            state.counters.cap_stop_notified = false;
            info!(account = %p.settings.name, preset = %preset, "Preset applied");
            p.notifier
                .notify(
                    MessageKind::Info,
                    &projection::summarise(&preset, &projection),
                )
                .await;
        }

        OperatorCommand::SetWarningThreshold(n) => {
            let threshold = n.max(1);
            state.counters.warning_threshold = threshold;
            info!(account = %p.settings.name, threshold, "Warning threshold set");
            p.notifier
                .notify(
                    MessageKind::Info,
                    &format!("Loss-streak warning now fires at {threshold} consecutive losses."),
                )
                .await;
        }
    }

    p.persist(state);
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::pause::PauseState;
    use crate::engine::PipelineSettings;
    use crate::llm::{ChatMessage, ModelGateway, ModelReply};
    use crate::notify::{Notifier, NoticeId};
    use crate::platform::PaperPlacer;
    use crate::types::StakePreset;
    use async_trait::async_trait;
    use std::path::PathBuf;
    use std::sync::{Arc, Mutex};

    struct FailingGateway;

    #[async_trait]
    impl ModelGateway for FailingGateway {
        async fn call(
            &self,
            _model_id: &str,
            _messages: &[ChatMessage],
            _temperature: f64,
            _max_tokens: u32,
        ) -> ModelReply {
            ModelReply::failure("no model under test")
        }
    }

    #[derive(Default)]
    struct RecordingNotifier {
        messages: Mutex<Vec<(MessageKind, String)>>,
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn notify(&self, kind: MessageKind, text: &str) -> Option<NoticeId> {
            self.messages.lock().unwrap().push((kind, text.to_string()));
            None
        }

        async fn revoke(&self, _id: NoticeId) {}
    }

    fn temp_path(suffix: &str) -> PathBuf {
        let mut p = std::env::temp_dir();
        p.push(format!("punter_cmd_test_{}_{suffix}", uuid::Uuid::new_v4()));
        p
    }

    fn pipeline_with_fund(fund: i64) -> (AccountPipeline, Arc<RecordingNotifier>) {
        let notifier = Arc::new(RecordingNotifier::default());
        let settings = PipelineSettings::new(
            "acct-test",
            temp_path("state.json"),
            temp_path("decisions.log"),
        );
        let state = AccountState::new(fund, StakePreset::default(), "m".into());
        let p = AccountPipeline::new(
            settings,
            state,
            Arc::new(FailingGateway),
            Arc::new(PaperPlacer),
            notifier.clone(),
        );
        (p, notifier)
    }

    fn pipeline() -> (AccountPipeline, Arc<RecordingNotifier>) {
        pipeline_with_fund(2_000_000)
    }

    fn texts(notifier: &RecordingNotifier) -> Vec<String> {
        notifier
            .messages
            .lock()
            .unwrap()
            .iter()
            .map(|(_, t)| t.clone())
            .collect()
    }

    #[tokio::test]
    async fn test_pause_and_resume() {
        let (p, _) = pipeline();
        p.handle(crate::feed::GameEvent::Operator(OperatorCommand::Pause))
            .await;
        assert_eq!(p.snapshot().await.counters.pause, PauseState::ManualPaused);

        p.handle(crate::feed::GameEvent::Operator(OperatorCommand::Resume))
            .await;
        assert!(p.snapshot().await.counters.pause.is_active());
    }

    #[tokio::test]
    async fn test_set_fund_clears_insufficient_funds_latch() {
        // Fund too small for the initial stake: the first bet opportunity
        // hard-stops the account and arms the one-shot notice.
        let (p, notifier) = pipeline_with_fund(100);
        p.handle(crate::feed::GameEvent::RoundOpened(crate::feed::RoundOpened {
            prompt: crate::feed::PromptRef {
                channel: "table-main".into(),
                message_id: 1,
            },
            text: "round open".into(),
            has_stake_controls: true,
        }))
        .await;
        let state = p.snapshot().await;
        assert!(state.counters.fund_pause_notified);
        assert!(state.counters.pause.is_paused());

        p.handle(crate::feed::GameEvent::Operator(OperatorCommand::SetFund(
            5_000,
        )))
        .await;
        let state = p.snapshot().await;
        assert_eq!(state.counters.fund, 5_000);
        assert!(!state.counters.fund_pause_notified);
        // The fund command does not resume by itself.
        assert!(state.counters.pause.is_paused());
        assert!(texts(&notifier).iter().any(|t| t.contains("Fund set to 5000")));
    }

    #[tokio::test]
    async fn test_set_fund_rejects_non_positive() {
        let (p, notifier) = pipeline();
        p.handle(crate::feed::GameEvent::Operator(OperatorCommand::SetFund(0)))
            .await;
        assert_eq!(p.snapshot().await.counters.fund, 2_000_000);
        assert!(texts(&notifier).iter().any(|t| t.contains("must be positive")));
    }

    #[tokio::test]
    async fn test_set_preset_resets_progression_and_reports_ladder() {
        let (p, notifier) = pipeline();
        let preset = StakePreset {
            initial_stake: 1_000,
            lose_stop: 6,
            multipliers: [3.0, 2.1, 2.1, 2.05],
        };
        p.handle(crate::feed::GameEvent::Operator(OperatorCommand::SetPreset(
            preset.clone(),
        )))
        .await;
        let state = p.snapshot().await;
        assert_eq!(state.counters.preset, preset);
        assert_eq!(state.counters.stake_base, 1_000);
        assert_eq!(state.counters.sequence_count, 0);
        assert!(!state.counters.cap_stop_notified);
        assert!(texts(&notifier).iter().any(|t| t.contains("ladder ends at step 6")));
    }

    #[tokio::test]
    async fn test_set_preset_rejects_invalid() {
        let (p, notifier) = pipeline();
        let bad = StakePreset {
            initial_stake: 0,
            ..Default::default()
        };
        p.handle(crate::feed::GameEvent::Operator(OperatorCommand::SetPreset(
            bad,
        )))
        .await;
        // Default preset survives.
        assert_eq!(p.snapshot().await.counters.preset.initial_stake, 500);
        assert!(texts(&notifier).iter().any(|t| t.contains("Preset rejected")));
    }

    #[tokio::test]
    async fn test_set_warning_threshold_clamps_to_one() {
        let (p, _) = pipeline();
        p.handle(crate::feed::GameEvent::Operator(
            OperatorCommand::SetWarningThreshold(0),
        ))
        .await;
        assert_eq!(p.snapshot().await.counters.warning_threshold, 1);

        p.handle(crate::feed::GameEvent::Operator(
            OperatorCommand::SetWarningThreshold(5),
        ))
        .await;
        assert_eq!(p.snapshot().await.counters.warning_threshold, 5);
    }
}
