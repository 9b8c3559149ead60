//! Model gateway integration.
//!
//! The engine depends only on the `ModelGateway` contract: one call, one
//! explicit success-or-failure reply. Provider routing, fallback ordering
//! and key rotation live behind the gateway, not here. Callers wrap every
//! invocation in their own `tokio::time::timeout` — the gateway is never
//! allowed to stall an account pipeline.

pub mod openai_compat;

use async_trait::async_trait;
use serde::Serialize;

/// One chat message in a gateway request.
#[derive(Debug, Clone, Serialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".into(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".into(),
            content: content.into(),
        }
    }
}

/// Explicit result of a gateway call. Failures are values, not panics or
/// exceptions: the predictor and risk controller branch on this.
#[derive(Debug, Clone)]
pub enum ModelReply {
    Success { content: String },
    Failure { error: String },
}

impl ModelReply {
    pub fn success(content: impl Into<String>) -> Self {
        ModelReply::Success {
            content: content.into(),
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        ModelReply::Failure {
            error: error.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ModelReply::Success { .. })
    }

    pub fn content(&self) -> Option<&str> {
        match self {
            ModelReply::Success { content } => Some(content),
            ModelReply::Failure { .. } => None,
        }
    }
}

/// Abstraction over the external model gateway.
#[async_trait]
pub trait ModelGateway: Send + Sync {
    /// Invoke a model. Implementations must return `ModelReply::Failure`
    /// for every error condition rather than propagating it.
    async fn call(
        &self,
        model_id: &str,
        messages: &[ChatMessage],
        temperature: f64,
        max_tokens: u32,
    ) -> ModelReply;
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
