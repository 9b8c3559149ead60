//! Pause-duration resolution.
//!
//! For either tier, the controller first asks the model for a suggested
//! round count bounded to `[1, max_pause]`, with a short timeout. Any
//! failure (timeout, malformed reply, missing model) falls back to a
//! deterministic table keyed by tier and win-rate/loss-depth band. The
//! failure is logged and never surfaces to the operator.

use tracing::{debug, warn};

use super::RiskSnapshot;
use crate::llm::{ChatMessage, ModelGateway, ModelReply};

/// Pause suggestions run on a tighter budget than direction predictions:
/// a stalled suggestion would hold up the settlement path.
pub const SUGGESTION_TIMEOUT: std::time::Duration = std::time::Duration::from_millis(3_500);

const SUGGESTION_MAX_TOKENS: u32 = 120;

/// Which tier is asking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RiskTier {
    Base,
    Deep { milestone: u32 },
}

impl std::fmt::Display for RiskTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RiskTier::Base => write!(f, "base"),
            RiskTier::Deep { milestone } => write!(f, "deep ({milestone}-loss milestone)"),
        }
    }
}

/// Resolved pause duration with its provenance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PauseSuggestion {
    pub rounds: u32,
    pub reason: String,
    pub from_model: bool,
}

/// Deterministic fallback table.
pub fn fallback_rounds(tier: RiskTier, snapshot: &RiskSnapshot, max_pause: u32) -> u32 {
    let max_pause = max_pause.max(1);
    if snapshot.total == 0 {
        return 1;
    }

    let base = match tier {
        RiskTier::Deep { .. } => {
            if snapshot.loss_count >= 6 {
                2
            } else {
                3
            }
        }
        RiskTier::Base => {
            if snapshot.win_rate <= 0.30 {
                4
            } else if snapshot.win_rate <= 0.35 {
                3
            } else {
                2
            }
        }
    };
    base.clamp(1, max_pause)
}

/// Lenient parse of the model's `{"pause_rounds": n, "reason": "..."}`
/// reply. Tolerates wrapping prose and numeric strings.
pub fn parse_rounds_reply(text: &str, max_pause: u32) -> Option<(u32, String)> {
    if text.is_empty() {
        return None;
    }
    let max_pause = max_pause.max(1);

    let mut candidates: Vec<String> = vec![text.trim().to_string()];
    if let (Some(start), Some(end)) = (text.find('{'), text.rfind('}')) {
        if end > start {
            candidates.push(text[start..=end].trim().to_string());
        }
    }

    for candidate in candidates {
        let Ok(value) = serde_json::from_str::<serde_json::Value>(&candidate) else {
            continue;
        };
        if !value.is_object() {
            continue;
        }
        let raw = value
            .get("pause_rounds")
            .or_else(|| value.get("pause"))
            .or_else(|| value.get("rounds"))?;
        let rounds = match raw {
            serde_json::Value::Number(n) => n.as_f64().map(|f| f as i64),
            serde_json::Value::String(s) => s.trim().parse::<f64>().ok().map(|f| f as i64),
            _ => None,
        }?;
        let rounds = rounds.clamp(1, max_pause as i64) as u32;
        let reason = value
            .get("reason")
            .and_then(|r| r.as_str())
            .unwrap_or("")
            .trim()
            .to_string();
        return Some((rounds, reason));
    }

    None
}

fn build_prompt(tier: RiskTier, snapshot: &RiskSnapshot, max_pause: u32) -> String {
    let tail: String = snapshot
        .recent_outcomes
        .iter()
        .rev()
        .take(12)
        .rev()
        .map(|&o| if o == 1 { '1' } else { '0' })
        .collect();
    let tail = if tail.is_empty() { "NA".to_string() } else { tail };

    format!(
        "You are a risk controller deciding only how many rounds to pause. \
         Output JSON only.\n\n\
         Tier: {}\n\
         Win rate over last {} settled: {}/{} ({:.1}%)\n\
         Current loss streak: {}\n\
         Next planned wager: #{}\n\
         Last 12 settled (win 1 / lose 0): {}\n\n\
         Suggest a pause between 1 and {}.\n\
         Format: {{\"pause_rounds\": integer 1-{}, \"reason\": \"under 20 words\"}}",
        tier,
        snapshot.total,
        snapshot.wins,
        snapshot.total,
        snapshot.win_rate * 100.0,
        snapshot.loss_count,
        snapshot.next_sequence,
        tail,
        max_pause,
        max_pause,
    )
}

/// Ask the model for a pause duration, falling back to the table on any
/// failure. The result is always within `[1, max_pause]`.
pub async fn resolve_pause_rounds(
    gateway: &dyn ModelGateway,
    model_id: &str,
    tier: RiskTier,
    snapshot: &RiskSnapshot,
    max_pause: u32,
) -> PauseSuggestion {
    let max_pause = max_pause.max(1);
    let fallback = PauseSuggestion {
        rounds: fallback_rounds(tier, snapshot, max_pause),
        reason: "model unavailable, statistical fallback".into(),
        from_model: false,
    };

    if model_id.is_empty() {
        return fallback;
    }

    let messages = vec![
        ChatMessage::system(
            "You are a wagering risk engine. Return JSON only, no explanations.",
        ),
        ChatMessage::user(build_prompt(tier, snapshot, max_pause)),
    ];

    let reply = tokio::time::timeout(
        SUGGESTION_TIMEOUT,
        gateway.call(model_id, &messages, 0.0, SUGGESTION_MAX_TOKENS),
    )
    .await;

    match reply {
        Ok(ModelReply::Success { content }) => match parse_rounds_reply(&content, max_pause) {
            Some((rounds, reason)) => {
                debug!(%tier, rounds, "Model pause suggestion accepted");
                PauseSuggestion {
                    rounds,
                    reason: if reason.is_empty() {
                        "model suggestion".into()
                    } else {
                        reason
                    },
                    from_model: true,
                }
            }
            None => {
                warn!(%tier, "Pause suggestion unparseable, using fallback table");
                fallback
            }
        },
        Ok(ModelReply::Failure { error }) => {
            warn!(%tier, error = %error, "Pause suggestion failed, using fallback table");
            fallback
        }
        Err(_) => {
            warn!(%tier, timeout = ?SUGGESTION_TIMEOUT, "Pause suggestion timed out, using fallback table");
            fallback
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    fn snapshot(wins: usize, total: usize, loss_count: u32) -> RiskSnapshot {
        RiskSnapshot {
            wins,
            total,
            win_rate: if total > 0 {
                wins as f64 / total as f64
            } else {
                0.0
            },
            loss_count,
            next_sequence: 5,
            base_window_ready: total >= 40,
            base_trigger: false,
            recovery_hit: false,
            deep_milestone: None,
            reasons: vec![],
            recent_outcomes: vec![1, 0, 0, 1, 0],
        }
    }

    struct ScriptedGateway {
        reply: ModelReply,
        delay: Option<std::time::Duration>,
    }

    #[async_trait]
    impl ModelGateway for ScriptedGateway {
        async fn call(
            &self,
            _model_id: &str,
            _messages: &[ChatMessage],
            _temperature: f64,
            _max_tokens: u32,
        ) -> ModelReply {
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            self.reply.clone()
        }
    }

    // -- Fallback table --

    #[test]
    fn test_fallback_base_bands() {
        assert_eq!(fallback_rounds(RiskTier::Base, &snapshot(12, 40, 0), 10), 4);
        assert_eq!(fallback_rounds(RiskTier::Base, &snapshot(14, 40, 0), 10), 3);
        assert_eq!(fallback_rounds(RiskTier::Base, &snapshot(15, 40, 0), 10), 2);
    }

    #[test]
    fn test_fallback_deep_by_depth() {
        let tier = RiskTier::Deep { milestone: 3 };
        assert_eq!(fallback_rounds(tier, &snapshot(10, 40, 3), 5), 3);
        let tier = RiskTier::Deep { milestone: 6 };
        assert_eq!(fallback_rounds(tier, &snapshot(10, 40, 6), 3), 2);
    }

    #[test]
    fn test_fallback_clamped_to_cap() {
        assert_eq!(fallback_rounds(RiskTier::Base, &snapshot(10, 40, 0), 2), 2);
        assert_eq!(fallback_rounds(RiskTier::Base, &snapshot(10, 40, 0), 0), 1);
    }

    #[test]
    fn test_fallback_empty_window() {
        assert_eq!(fallback_rounds(RiskTier::Base, &snapshot(0, 0, 0), 10), 1);
    }

    // -- Reply parsing --

    #[test]
    fn test_parse_standard_reply() {
        let (rounds, reason) =
            parse_rounds_reply("{\"pause_rounds\": 3, \"reason\": \"cold table\"}", 10).unwrap();
        assert_eq!(rounds, 3);
        assert_eq!(reason, "cold table");
    }

    #[test]
    fn test_parse_wrapped_reply() {
        let text = "Sure, here you go: {\"pause_rounds\": 4, \"reason\": \"poor window\"} hope that helps";
        let (rounds, _) = parse_rounds_reply(text, 10).unwrap();
        assert_eq!(rounds, 4);
    }

    #[test]
    fn test_parse_alternate_keys_and_string_numbers() {
        assert_eq!(parse_rounds_reply("{\"pause\": 2}", 10).unwrap().0, 2);
        assert_eq!(parse_rounds_reply("{\"rounds\": \"5\"}", 10).unwrap().0, 5);
    }

    #[test]
    fn test_parse_clamps_to_bounds() {
        assert_eq!(parse_rounds_reply("{\"pause_rounds\": 99}", 5).unwrap().0, 5);
        assert_eq!(parse_rounds_reply("{\"pause_rounds\": 0}", 5).unwrap().0, 1);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(parse_rounds_reply("no idea", 5).is_none());
        assert!(parse_rounds_reply("", 5).is_none());
        assert!(parse_rounds_reply("{\"something\": 3}", 5).is_none());
    }

    // -- Resolution --

    #[tokio::test]
    async fn test_resolve_uses_model_suggestion() {
        let gateway = ScriptedGateway {
            reply: ModelReply::success("{\"pause_rounds\": 3, \"reason\": \"wait it out\"}"),
            delay: None,
        };
        let s = resolve_pause_rounds(&gateway, "m", RiskTier::Base, &snapshot(14, 40, 0), 10).await;
        assert_eq!(s.rounds, 3);
        assert!(s.from_model);
        assert_eq!(s.reason, "wait it out");
    }

    #[tokio::test]
    async fn test_resolve_falls_back_on_failure() {
        let gateway = ScriptedGateway {
            reply: ModelReply::failure("503"),
            delay: None,
        };
        let s = resolve_pause_rounds(&gateway, "m", RiskTier::Base, &snapshot(12, 40, 0), 10).await;
        assert_eq!(s.rounds, 4);
        assert!(!s.from_model);
    }

    #[tokio::test]
    async fn test_resolve_falls_back_on_unparseable() {
        let gateway = ScriptedGateway {
            reply: ModelReply::success("I think pausing is wise"),
            delay: None,
        };
        let s = resolve_pause_rounds(
            &gateway,
            "m",
            RiskTier::Deep { milestone: 3 },
            &snapshot(10, 40, 3),
            5,
        )
        .await;
        assert_eq!(s.rounds, 3);
        assert!(!s.from_model);
    }

    #[tokio::test]
    async fn test_resolve_missing_model_goes_straight_to_fallback() {
        let gateway = ScriptedGateway {
            reply: ModelReply::success("{\"pause_rounds\": 5}"),
            delay: None,
        };
        let s = resolve_pause_rounds(&gateway, "", RiskTier::Base, &snapshot(12, 40, 0), 10).await;
        assert!(!s.from_model);
    }

    #[tokio::test]
    async fn test_resolution_always_within_bounds() {
        let gateway = ScriptedGateway {
            reply: ModelReply::success("{\"pause_rounds\": 40}"),
            delay: None,
        };
        let s = resolve_pause_rounds(
            &gateway,
            "m",
            RiskTier::Deep { milestone: 3 },
            &snapshot(10, 40, 3),
            5,
        )
        .await;
        assert!(s.rounds >= 1 && s.rounds <= 5);
    }
}
