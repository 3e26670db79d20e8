//! Notification dispatch.
//!
//! Alerts leave the server through the [`Notifier`] trait. The production
//! implementation talks to the Telegram bot API; deployments without a
//! bot token fall back to [`LogNotifier`], and tests use [`MockNotifier`].
//! Dispatch failures are the caller's to log; they must never abort
//! report ingestion.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::json;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("notification request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("telegram api rejected the message: {0}")]
    Api(String),
}

/// Outbound alert channel.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send_alert(&self, chat_id: i64, text: &str) -> Result<(), NotifyError>;
}

// ════════════════════════════════════════════════════════════════════════════
// TELEGRAM
// ════════════════════════════════════════════════════════════════════════════

/// Telegram bot API client.
///
/// Uses the plain `sendMessage` method. The API base is overridable so
/// tests can point it at a wiremock stub.
pub struct TelegramNotifier {
    bot_token: String,
    api_base: String,
    http: reqwest::Client,
}

impl TelegramNotifier {
    pub fn new(bot_token: impl Into<String>) -> TelegramNotifier {
        TelegramNotifier {
            bot_token: bot_token.into(),
            api_base: "https://api.telegram.org".to_string(),
            http: reqwest::Client::new(),
        }
    }

    pub fn with_api_base(mut self, api_base: impl Into<String>) -> TelegramNotifier {
        let mut base = api_base.into();
        while base.ends_with('/') {
            base.pop();
        }
        self.api_base = base;
        self
    }
}

#[derive(Debug, serde::Deserialize)]
struct TelegramResponse {
    ok: bool,
    #[serde(default)]
    description: Option<String>,
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn send_alert(&self, chat_id: i64, text: &str) -> Result<(), NotifyError> {
        let url = format!("{}/bot{}/sendMessage", self.api_base, self.bot_token);
        let resp = self
            .http
            .post(&url)
            .json(&json!({ "chat_id": chat_id, "text": text }))
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(NotifyError::Api(format!("http status {}", status)));
        }
        let body: TelegramResponse = resp.json().await.map_err(NotifyError::Http)?;
        if !body.ok {
            return Err(NotifyError::Api(
                body.description.unwrap_or_else(|| "unknown error".to_string()),
            ));
        }
        Ok(())
    }
}

// ════════════════════════════════════════════════════════════════════════════
// LOG-ONLY FALLBACK
// ════════════════════════════════════════════════════════════════════════════

/// Used when no bot token is configured: alerts land in the server log
/// and nowhere else.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send_alert(&self, chat_id: i64, text: &str) -> Result<(), NotifyError> {
        info!(chat_id, text, "notification (log only)");
        Ok(())
    }
}

// ════════════════════════════════════════════════════════════════════════════
// MOCK
// ════════════════════════════════════════════════════════════════════════════

/// Records every message for assertions; optionally fails every send.
#[derive(Default)]
pub struct MockNotifier {
    sent: Mutex<Vec<(i64, String)>>,
    fail: bool,
}

impl MockNotifier {
    pub fn new() -> MockNotifier {
        MockNotifier::default()
    }

    pub fn failing() -> MockNotifier {
        MockNotifier {
            sent: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    pub fn sent(&self) -> Vec<(i64, String)> {
        self.sent.lock().clone()
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().len()
    }
}

#[async_trait]
impl Notifier for MockNotifier {
    async fn send_alert(&self, chat_id: i64, text: &str) -> Result<(), NotifyError> {
        if self.fail {
            return Err(NotifyError::Api("mock failure".to_string()));
        }
        self.sent.lock().push((chat_id, text.to_string()));
        Ok(())
    }
}

/// Convenience for handler construction: a shareable notifier handle.
pub type SharedNotifier = Arc<dyn Notifier>;

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_records_messages() {
        let mock = MockNotifier::new();
        mock.send_alert(42, "hello").await.expect("sent");
        mock.send_alert(42, "again").await.expect("sent");
        assert_eq!(mock.sent_count(), 2);
        assert_eq!(mock.sent()[0], (42, "hello".to_string()));
    }

    #[tokio::test]
    async fn test_failing_mock_errors_without_recording() {
        let mock = MockNotifier::failing();
        assert!(mock.send_alert(42, "hello").await.is_err());
        assert_eq!(mock.sent_count(), 0);
    }

    #[tokio::test]
    async fn test_log_notifier_always_succeeds() {
        assert!(LogNotifier.send_alert(1, "x").await.is_ok());
    }
}
