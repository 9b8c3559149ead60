//! Notification sink.
//!
//! Best-effort, fire-and-forget messaging to the operator. Message kinds
//! route to channel classes via a fixed table; the fan-out machinery
//! behind each class (chat windows, push services) is external. Failures
//! are logged and never block engine logic.

pub mod webhook;

use async_trait::async_trait;
use tracing::{debug, info};

// ---------------------------------------------------------------------------
// Channels and routing
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelClass {
    /// The account's operator console.
    Admin,
    /// High-signal push channel (wins, streak alerts, summaries).
    Priority,
}

/// Every message the engine can emit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    Win,
    Explode,
    LoseStreak,
    LoseEnd,
    RiskPause,
    RiskSummary,
    Pause,
    Resume,
    Settle,
    Dashboard,
    Info,
    Warning,
    Error,
}

/// Channel classes a message kind is delivered to.
pub fn channels_for(kind: MessageKind) -> &'static [ChannelClass] {
    use ChannelClass::*;
    use MessageKind::*;
    match kind {
        Win | Explode | LoseStreak | LoseEnd | RiskSummary | Error => &[Admin, Priority],
        RiskPause | Pause | Resume | Settle | Dashboard | Info | Warning => &[Admin],
    }
}

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// Handle to a delivered notice, for later revocation (refreshing
/// countdown notices, expiring transient digests). Sinks that cannot
/// revoke return `None` from `notify`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NoticeId(pub u64);

#[async_trait]
pub trait Notifier: Send + Sync {
    /// Deliver a message. Must not fail: implementations log transport
    /// errors and return.
    async fn notify(&self, kind: MessageKind, text: &str) -> Option<NoticeId>;

    /// Withdraw a previously delivered notice, best-effort.
    async fn revoke(&self, id: NoticeId);
}

// ---------------------------------------------------------------------------
// Log notifier
// ---------------------------------------------------------------------------

/// Sink that writes everything to the structured log. The default when no
/// push channel is configured, and handy under test.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, kind: MessageKind, text: &str) -> Option<NoticeId> {
        info!(kind = ?kind, channels = ?channels_for(kind), message = %text, "notice");
        None
    }

    async fn revoke(&self, id: NoticeId) {
        debug!(id = id.0, "notice revoke (no-op)");
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_kinds_fan_out_to_both_channels() {
        for kind in [
            MessageKind::Win,
            MessageKind::Explode,
            MessageKind::LoseStreak,
            MessageKind::LoseEnd,
            MessageKind::RiskSummary,
            MessageKind::Error,
        ] {
            assert_eq!(
                channels_for(kind),
                &[ChannelClass::Admin, ChannelClass::Priority],
                "{kind:?}"
            );
        }
    }

    #[test]
    fn test_console_only_kinds() {
        for kind in [
            MessageKind::RiskPause,
            MessageKind::Pause,
            MessageKind::Resume,
            MessageKind::Settle,
            MessageKind::Dashboard,
            MessageKind::Info,
            MessageKind::Warning,
        ] {
            assert_eq!(channels_for(kind), &[ChannelClass::Admin], "{kind:?}");
        }
    }

    #[tokio::test]
    async fn test_log_notifier_never_fails() {
        let sink = LogNotifier;
        assert!(sink.notify(MessageKind::Info, "hello").await.is_none());
        sink.revoke(NoticeId(7)).await;
    }
}
