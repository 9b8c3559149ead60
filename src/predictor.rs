//! Direction predictor.
//!
//! history -> features -> external model call -> statistical fallback.
//! The predictor always produces a direction: model timeouts, transport
//! failures and unparseable replies all degrade to the regression target
//! with the fallback reason recorded. There is no abstain output.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use tracing::{debug, info, warn};

use crate::llm::{ChatMessage, ModelGateway, ModelReply};
use crate::strategy::features::{self, PatternTag, TrendGap};
use crate::types::Direction;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct PredictorConfig {
    /// Caller-side budget for one direction prediction.
    pub timeout: std::time::Duration,
    pub temperature: f64,
    pub max_tokens: u32,
    /// Window the trend gap and regression target are computed over.
    pub gap_window: usize,
}

impl Default for PredictorConfig {
    fn default() -> Self {
        Self {
            timeout: std::time::Duration::from_secs(8),
            temperature: 0.1,
            max_tokens: 500,
            gap_window: 100,
        }
    }
}

// ---------------------------------------------------------------------------
// Output types
// ---------------------------------------------------------------------------

/// Where the final direction came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum PredictionSource {
    Model,
    Fallback { reason: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct Prediction {
    pub direction: Direction,
    /// Self-reported confidence, 0-100.
    pub confidence: u8,
    pub reason: String,
    pub source: PredictionSource,
}

/// Audit trail for one prediction: inputs, output and model id, appended
/// to the account's decisions log for later inspection.
#[derive(Debug, Clone, Serialize)]
pub struct AuditRecord {
    pub timestamp: DateTime<Utc>,
    pub sequence: u32,
    pub model_id: String,
    pub input: serde_json::Value,
    pub output: serde_json::Value,
}

/// One-line human-readable summary for the dashboard / settlement notice.
pub fn summary_line(prediction: &Prediction, gap: &TrendGap, tag: PatternTag) -> String {
    let origin = match &prediction.source {
        PredictionSource::Model => "model",
        PredictionSource::Fallback { .. } => "statistical fallback",
    };
    format!(
        "{}/{} | {} | conf:{}% | gap:{:+} | regression:{}",
        origin, tag, prediction.reason, prediction.confidence, gap.gap, gap.regression_target,
    )
}

// ---------------------------------------------------------------------------
// Reply parsing
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct ParsedReply {
    pub direction: Direction,
    pub confidence: u8,
    pub reason: String,
}

/// Lenient parse of a model reply.
///
/// Tolerates code fences and surrounding prose by extracting the first
/// balanced-looking object (first `{` to last `}`). A direction outside
/// 0/1 is coerced to `default`; a reply that cannot be parsed at all
/// falls back entirely.
pub fn parse_reply(text: &str, default: Direction) -> ParsedReply {
    let mut cleaned = text.replace("```json", "").replace("```", "");
    let trimmed = cleaned.trim_start();
    if trimmed.len() >= 4 && trimmed[..4].eq_ignore_ascii_case("json") {
        cleaned = trimmed[4..].to_string();
    }
    let cleaned = match (cleaned.find('{'), cleaned.rfind('}')) {
        (Some(start), Some(end)) if end > start => cleaned[start..=end].to_string(),
        _ => cleaned,
    };

    let value: serde_json::Value = match serde_json::from_str(&cleaned) {
        Ok(v) => v,
        Err(e) => {
            return ParsedReply {
                direction: default,
                confidence: 50,
                reason: format!("parse fallback: {e}"),
            };
        }
    };

    let raw_direction = value.get("direction").or_else(|| value.get("prediction"));
    let direction = match raw_direction {
        Some(serde_json::Value::Number(n)) => match n.as_i64() {
            Some(0) => Direction::Small,
            Some(1) => Direction::Big,
            _ => default,
        },
        Some(serde_json::Value::String(s)) => {
            let upper = s.trim().to_uppercase();
            if matches!(upper.as_str(), "1" | "B" | "BIG") {
                Direction::Big
            } else {
                Direction::Small
            }
        }
        _ => default,
    };

    let confidence = value
        .get("confidence")
        .and_then(|c| c.as_f64())
        .map(|c| c.clamp(0.0, 100.0) as u8)
        .unwrap_or(50);

    let reason = value
        .get("reason")
        .or_else(|| value.get("logic"))
        .and_then(|r| r.as_str())
        .unwrap_or("model analysis")
        .to_string();

    ParsedReply {
        direction,
        confidence,
        reason,
    }
}

// ---------------------------------------------------------------------------
// Predictor
// ---------------------------------------------------------------------------

pub struct Predictor {
    config: PredictorConfig,
}

impl Predictor {
    pub fn new(config: PredictorConfig) -> Self {
        Self { config }
    }

    /// Build the bounded feature payload shipped to the model.
    pub fn build_payload(
        &self,
        history: &[u8],
        loss_count: u32,
        earnings: i64,
        gap: &TrendGap,
    ) -> serde_json::Value {
        let long_window = self.config.gap_window.min(history.len());
        let long_ratio = if long_window > 0 {
            history[history.len() - long_window..]
                .iter()
                .map(|&b| b as usize)
                .sum::<usize>() as f64
                / long_window as f64
        } else {
            0.5
        };
        let pattern = features::pattern_features(history);
        let pressure = if loss_count > 2 {
            "Pattern_Breaking"
        } else {
            "Stability"
        };

        json!({
            "current_status": {
                "martingale_step": loss_count + 1,
                "total_profit_to_date": earnings,
                "pressure_tag": pressure,
            },
            "history_views": {
                "short_term_20": features::window_string(history, 20),
                "medium_term_50": features::window_string(history, 50),
                "long_term_ratio": long_ratio,
                "big_count": gap.big_count,
                "small_count": gap.small_count,
            },
            "pattern_analysis": {
                "tag": pattern.tag.to_string(),
                "tail_streak_len": pattern.tail_streak_len,
                "tail_streak_bit": pattern.tail_streak_bit,
                "gap": format!("{:+}", gap.gap),
            },
        })
    }

    /// Build the instruction prompt around a payload.
    pub fn build_prompt(&self, payload: &serde_json::Value, loss_count: u32) -> String {
        let views = &payload["history_views"];
        let pattern = &payload["pattern_analysis"];
        format!(
            "[Instruction]\n\
             You are a quantitative trader calling the next binary round. Abstaining is \
             not an option: never suggest waiting or skipping.\n\n\
             [Reasoning Flow]\n\
             1. Trend following: is there an active streak worth riding, and how strong \
             is the resistance to reversal?\n\
             2. Mean reversion: given the long-window imbalance, where is the pressure \
             for the underrepresented side to reappear?\n\
             3. Sequence match: does the recent tail resemble a recurring pattern?\n\n\
             [Data Evidence]\n\
             short window (20): {}\n\
             medium window (50): {}\n\
             long window big-ratio: {}\n\
             pattern: {} (tail streak {})\n\
             big-side gap: {} (positive = big is short)\n\
             progression step: {} under pressure\n\n\
             [Response Format]\n\
             Reply with exactly one JSON object and nothing else:\n\
             {{\"reason\": \"evidence in under 50 words\", \"confidence\": 1-100, \
             \"direction\": 0 or 1}}\n\
             direction 1 means big, 0 means small. You must choose one.",
            views["short_term_20"].as_str().unwrap_or(""),
            views["medium_term_50"].as_str().unwrap_or(""),
            views["long_term_ratio"],
            pattern["tag"].as_str().unwrap_or(""),
            pattern["tail_streak_len"],
            pattern["gap"].as_str().unwrap_or("+0"),
            loss_count + 1,
        )
    }

    /// Produce a direction for the next round. Never fails.
    pub async fn predict(
        &self,
        gateway: &dyn ModelGateway,
        model_id: &str,
        history: &[u8],
        loss_count: u32,
        earnings: i64,
        sequence: u32,
    ) -> (Prediction, AuditRecord) {
        let gap = features::trend_gap(history, self.config.gap_window);
        let fallback_direction = gap.regression_target;
        let payload = self.build_payload(history, loss_count, earnings, &gap);
        let prompt = self.build_prompt(&payload, loss_count);
        let messages = vec![
            ChatMessage::system(
                "You are a quantitative trader. Output pure JSON only, no explanatory \
                 text, and never refuse to pick a direction.",
            ),
            ChatMessage::user(prompt),
        ];

        debug!(
            model = model_id,
            gap = gap.gap,
            loss_count,
            "Requesting direction prediction"
        );

        let reply = tokio::time::timeout(
            self.config.timeout,
            gateway.call(
                model_id,
                &messages,
                self.config.temperature,
                self.config.max_tokens,
            ),
        )
        .await;

        let prediction = match reply {
            Ok(ModelReply::Success { content }) => {
                let parsed = parse_reply(&content, fallback_direction);
                Prediction {
                    direction: parsed.direction,
                    confidence: parsed.confidence,
                    reason: parsed.reason,
                    source: PredictionSource::Model,
                }
            }
            Ok(ModelReply::Failure { error }) => {
                warn!(model = model_id, error = %error, "Model call failed, using regression target");
                Prediction {
                    direction: fallback_direction,
                    confidence: 50,
                    reason: "statistical regression fallback".into(),
                    source: PredictionSource::Fallback {
                        reason: format!("model error: {error}"),
                    },
                }
            }
            Err(_) => {
                warn!(model = model_id, timeout = ?self.config.timeout, "Prediction timed out, using regression target");
                Prediction {
                    direction: fallback_direction,
                    confidence: 50,
                    reason: "statistical regression fallback".into(),
                    source: PredictionSource::Fallback {
                        reason: "prediction timed out".into(),
                    },
                }
            }
        };

        info!(
            direction = %prediction.direction,
            confidence = prediction.confidence,
            source = ?prediction.source,
            "Prediction complete"
        );

        let audit = AuditRecord {
            timestamp: Utc::now(),
            sequence,
            model_id: model_id.to_string(),
            input: payload,
            output: serde_json::to_value(&prediction).unwrap_or_default(),
        };

        (prediction, audit)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

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

    // -- parse_reply --

    #[test]
    fn test_parse_plain_json() {
        let parsed = parse_reply(
            "{\"direction\": 1, \"confidence\": 80, \"reason\": \"streak\"}",
            Direction::Small,
        );
        assert_eq!(parsed.direction, Direction::Big);
        assert_eq!(parsed.confidence, 80);
        assert_eq!(parsed.reason, "streak");
    }

    #[test]
    fn test_parse_fenced_json_with_prose() {
        let text = "Here is my call:\n```json\n{\"direction\": 0, \"confidence\": 65, \
                    \"reason\": \"reversion\"}\n```\nGood luck.";
        let parsed = parse_reply(text, Direction::Big);
        assert_eq!(parsed.direction, Direction::Small);
        assert_eq!(parsed.confidence, 65);
    }

    #[test]
    fn test_parse_string_direction() {
        let parsed = parse_reply("{\"direction\": \"BIG\"}", Direction::Small);
        assert_eq!(parsed.direction, Direction::Big);
        let parsed = parse_reply("{\"direction\": \"small\"}", Direction::Big);
        assert_eq!(parsed.direction, Direction::Small);
    }

    #[test]
    fn test_parse_legacy_prediction_key() {
        let parsed = parse_reply("{\"prediction\": 1, \"logic\": \"gap\"}", Direction::Small);
        assert_eq!(parsed.direction, Direction::Big);
        assert_eq!(parsed.reason, "gap");
    }

    #[test]
    fn test_parse_out_of_range_direction_coerced() {
        let parsed = parse_reply("{\"direction\": 7}", Direction::Small);
        assert_eq!(parsed.direction, Direction::Small);
    }

    #[test]
    fn test_parse_confidence_clamped_and_defaulted() {
        let parsed = parse_reply("{\"direction\": 1, \"confidence\": 250}", Direction::Small);
        assert_eq!(parsed.confidence, 100);
        let parsed = parse_reply("{\"direction\": 1}", Direction::Small);
        assert_eq!(parsed.confidence, 50);
    }

    #[test]
    fn test_parse_garbage_falls_back() {
        let parsed = parse_reply("cannot decide, too risky", Direction::Big);
        assert_eq!(parsed.direction, Direction::Big);
        assert_eq!(parsed.confidence, 50);
        assert!(parsed.reason.contains("parse fallback"));
    }

    // -- payload / prompt --

    #[test]
    fn test_payload_contains_feature_views() {
        let predictor = Predictor::new(PredictorConfig::default());
        let history = vec![1, 0, 0, 0, 1, 1, 0, 0];
        let gap = features::trend_gap(&history, 100);
        let payload = predictor.build_payload(&history, 3, -2500, &gap);
        assert_eq!(payload["current_status"]["martingale_step"], 4);
        assert_eq!(
            payload["current_status"]["pressure_tag"],
            "Pattern_Breaking"
        );
        assert_eq!(payload["history_views"]["short_term_20"], "10001100");
        assert_eq!(payload["history_views"]["big_count"], 3);
    }

    #[test]
    fn test_prompt_embeds_evidence_and_format() {
        let predictor = Predictor::new(PredictorConfig::default());
        let history = vec![1, 0, 1, 0, 1, 0];
        let gap = features::trend_gap(&history, 100);
        let payload = predictor.build_payload(&history, 0, 0, &gap);
        let prompt = predictor.build_prompt(&payload, 0);
        assert!(prompt.contains("101010"));
        assert!(prompt.contains("\"direction\": 0 or 1"));
        assert!(prompt.contains("progression step: 1"));
    }

    // -- predict --

    #[tokio::test]
    async fn test_predict_uses_model_reply() {
        let gateway = ScriptedGateway {
            reply: ModelReply::success(
                "{\"direction\": 1, \"confidence\": 72, \"reason\": \"dragon\"}",
            ),
            delay: None,
        };
        let predictor = Predictor::new(PredictorConfig::default());
        let (prediction, audit) = predictor
            .predict(&gateway, "test-model", &[0, 0, 0, 1], 0, 0, 1)
            .await;
        assert_eq!(prediction.direction, Direction::Big);
        assert_eq!(prediction.confidence, 72);
        assert_eq!(prediction.source, PredictionSource::Model);
        assert_eq!(audit.model_id, "test-model");
    }

    #[tokio::test]
    async fn test_predict_falls_back_on_gateway_failure() {
        let gateway = ScriptedGateway {
            reply: ModelReply::failure("upstream 503"),
            delay: None,
        };
        let predictor = Predictor::new(PredictorConfig::default());
        // History short of big: regression target is big.
        let (prediction, _) = predictor
            .predict(&gateway, "test-model", &[0, 0, 0, 1], 2, 0, 1)
            .await;
        assert_eq!(prediction.direction, Direction::Big);
        assert_eq!(prediction.confidence, 50);
        match prediction.source {
            PredictionSource::Fallback { reason } => assert!(reason.contains("upstream 503")),
            other => panic!("unexpected source: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_predict_falls_back_on_timeout() {
        let gateway = ScriptedGateway {
            reply: ModelReply::success("{\"direction\": 1}"),
            delay: Some(std::time::Duration::from_millis(200)),
        };
        let predictor = Predictor::new(PredictorConfig {
            timeout: std::time::Duration::from_millis(10),
            ..Default::default()
        });
        let (prediction, _) = predictor
            .predict(&gateway, "test-model", &[1, 1, 1, 0], 0, 0, 1)
            .await;
        // Regression target: big overrepresented, so small.
        assert_eq!(prediction.direction, Direction::Small);
        assert_eq!(prediction.confidence, 50);
        match prediction.source {
            PredictionSource::Fallback { reason } => assert!(reason.contains("timed out")),
            other => panic!("unexpected source: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_predict_empty_history_still_returns_direction() {
        let gateway = ScriptedGateway {
            reply: ModelReply::failure("no model"),
            delay: None,
        };
        let predictor = Predictor::new(PredictorConfig::default());
        let (prediction, _) = predictor
            .predict(&gateway, "test-model", &[], 0, 0, 1)
            .await;
        // Never abstains, even with nothing to go on.
        assert!(matches!(
            prediction.direction,
            Direction::Big | Direction::Small
        ));
    }

    #[test]
    fn test_summary_line_mentions_source_and_gap() {
        let gap = features::trend_gap(&[0, 0, 0, 1], 100);
        let prediction = Prediction {
            direction: Direction::Big,
            confidence: 60,
            reason: "reversion".into(),
            source: PredictionSource::Model,
        };
        let line = summary_line(&prediction, &gap, PatternTag::ChaosSwitch);
        assert!(line.contains("model/"));
        assert!(line.contains("conf:60%"));
        assert!(line.contains("regression:big"));
    }
}
