//! Webhook push notifier.
//!
//! Posts priority-class messages to a configured webhook endpoint with
//! the account name prefixed, and mirrors everything to the structured
//! log. Delivery is best-effort with a short timeout; failures are logged
//! and swallowed.

use async_trait::async_trait;
use reqwest::Client;
use tracing::{debug, info, warn};

use super::{channels_for, ChannelClass, MessageKind, Notifier, NoticeId};

const PUSH_TIMEOUT_SECS: u64 = 5;

pub struct WebhookNotifier {
    http: Client,
    url: String,
    account_name: String,
}

impl WebhookNotifier {
    pub fn new(url: String, account_name: String) -> anyhow::Result<Self> {
        let http = Client::builder()
            .timeout(std::time::Duration::from_secs(PUSH_TIMEOUT_SECS))
            .build()?;
        Ok(Self {
            http,
            url,
            account_name,
        })
    }

    /// Priority messages always carry the account prefix so pushes from
    /// several accounts stay distinguishable on one channel.
    fn with_account_prefix(&self, text: &str) -> String {
        format!("[account: {}]\n{}", self.account_name, text)
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, kind: MessageKind, text: &str) -> Option<NoticeId> {
        info!(kind = ?kind, account = %self.account_name, message = %text, "notice");

        if !channels_for(kind).contains(&ChannelClass::Priority) {
            return None;
        }

        let payload = serde_json::json!({
            "title": format!("wager bot {} notice", self.account_name),
            "body": self.with_account_prefix(text),
        });

        match self.http.post(&self.url).json(&payload).send().await {
            Ok(response) if response.status().is_success() => {}
            Ok(response) => {
                warn!(status = %response.status(), "Webhook push rejected");
            }
            Err(e) => {
                warn!(error = %e, "Webhook push failed");
            }
        }
        None
    }

    async fn revoke(&self, id: NoticeId) {
        // Webhook pushes cannot be withdrawn.
        debug!(id = id.0, "webhook revoke (no-op)");
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
