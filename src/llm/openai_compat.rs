//! Generic OpenAI-compatible chat-completions gateway.
//!
//! A single configured endpoint speaking the `/chat/completions` wire
//! shape. This is the default `ModelGateway` for deployments that point
//! the engine at one provider; multi-provider fallback chains stay in the
//! external gateway service.

use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use tracing::{debug, warn};

use super::{ChatMessage, ModelGateway, ModelReply};

/// Hard ceiling on a single HTTP round-trip. Per-call-site timeouts in the
/// engine are shorter; this only guards the client itself.
const HTTP_TIMEOUT_SECS: u64 = 60;

#[derive(Debug, Serialize)]
struct CompletionsRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f64,
    max_tokens: u32,
}

pub struct OpenAiCompatGateway {
    http: Client,
    endpoint: String,
    api_key: SecretString,
}

impl OpenAiCompatGateway {
    pub fn new(endpoint: String, api_key: SecretString) -> anyhow::Result<Self> {
        let http = Client::builder()
            .timeout(std::time::Duration::from_secs(HTTP_TIMEOUT_SECS))
            .build()?;
        Ok(Self {
            http,
            endpoint,
            api_key,
        })
    }

    /// Pull the assistant text out of a completions response body.
    fn extract_content(body: &serde_json::Value) -> Result<String, String> {
        if let Some(error) = body.get("error") {
            let message = error
                .get("message")
                .and_then(|m| m.as_str())
                .unwrap_or("unknown API error");
            return Err(message.to_string());
        }

        body.get("choices")
            .and_then(|c| c.get(0))
            .and_then(|c| c.get("message"))
            .and_then(|m| m.get("content"))
            .and_then(|c| c.as_str())
            .map(|s| s.to_string())
            .ok_or_else(|| "response has no choices[0].message.content".to_string())
    }
}

#[async_trait]
impl ModelGateway for OpenAiCompatGateway {
    async fn call(
        &self,
        model_id: &str,
        messages: &[ChatMessage],
        temperature: f64,
        max_tokens: u32,
    ) -> ModelReply {
        let request = CompletionsRequest {
            model: model_id,
            messages,
            temperature,
            max_tokens,
        };

        debug!(model = model_id, endpoint = %self.endpoint, "Gateway call");

        let response = self
            .http
            .post(&self.endpoint)
            .bearer_auth(self.api_key.expose_secret())
            .json(&request)
            .send()
            .await;

        let response = match response {
            Ok(r) => r,
            Err(e) => {
                warn!(model = model_id, error = %e, "Gateway request failed");
                return ModelReply::failure(format!("request error: {e}"));
            }
        };

        let status = response.status();
        let body: serde_json::Value = match response.json().await {
            Ok(b) => b,
            Err(e) => {
                return ModelReply::failure(format!("HTTP {status}: unreadable body: {e}"));
            }
        };

        if !status.is_success() {
            let detail = Self::extract_content(&body)
                .err()
                .unwrap_or_else(|| body.to_string());
            return ModelReply::failure(format!("HTTP {status}: {detail}"));
        }

        match Self::extract_content(&body) {
            Ok(content) => ModelReply::success(content),
            Err(e) => ModelReply::failure(e),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_extract_content_standard_body() {
        let body = json!({
            "choices": [
                {"message": {"role": "assistant", "content": "{\"direction\": 1}"}}
            ]
        });
        assert_eq!(
            OpenAiCompatGateway::extract_content(&body).unwrap(),
            "{\"direction\": 1}"
        );
    }

    #[test]
    fn test_extract_content_api_error() {
        let body = json!({"error": {"message": "invalid api key"}});
        let err = OpenAiCompatGateway::extract_content(&body).unwrap_err();
        assert!(err.contains("invalid api key"));
    }

    #[test]
    fn test_extract_content_missing_choices() {
        let body = json!({"id": "x"});
        assert!(OpenAiCompatGateway::extract_content(&body).is_err());
    }

    #[test]
    fn test_request_serialization_shape() {
        let messages = vec![ChatMessage::system("s"), ChatMessage::user("u")];
        let request = CompletionsRequest {
            model: "some-model",
            messages: &messages,
            temperature: 0.1,
            max_tokens: 500,
        };
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["model"], "some-model");
        assert_eq!(value["messages"][1]["content"], "u");
        assert_eq!(value["max_tokens"], 500);
    }

    #[test]
    fn test_gateway_construction() {
        let gw = OpenAiCompatGateway::new(
            "https://example.invalid/v1/chat/completions".into(),
            SecretString::new("k".into()),
        );
        assert!(gw.is_ok());
    }
}
