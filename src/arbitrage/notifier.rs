//! Outbound delivery of formatted spread messages. `Notifier` is the only
//! seam this crate has onto delivery; the Telegram Bot API details behind
//! it are treated as an opaque collaborator.

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;

use crate::error::CoreError;

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, message: &str) -> Result<()>;
}

const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

pub struct TelegramNotifier {
    http: reqwest::Client,
    url: String,
    chat_id: String,
}

impl TelegramNotifier {
    pub fn new(bot_token: &str, chat_id: &str) -> Self {
        Self {
            http: reqwest::Client::builder()
                .timeout(REQUEST_TIMEOUT)
                .build()
                .expect("reqwest client builds with a plain timeout"),
            url: format!("https://api.telegram.org/bot{bot_token}/sendMessage"),
            chat_id: chat_id.to_string(),
        }
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn send(&self, message: &str) -> Result<()> {
        let resp = self
            .http
            .post(&self.url)
            .form(&[
                ("chat_id", self.chat_id.as_str()),
                ("text", message),
                ("parse_mode", "HTML"),
            ])
            .send()
            .await
            .map_err(|e| CoreError::Network(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(CoreError::Sink(format!("telegram returned {status}: {body}")).into());
        }
        Ok(())
    }
}

/// Used when no Telegram token is configured; delivery is a no-op instead of
/// a startup failure, since notification is a Non-goal collaborator.
pub struct NullNotifier;

#[async_trait]
impl Notifier for NullNotifier {
    async fn send(&self, _message: &str) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
pub struct InMemoryNotifier {
    pub sent: parking_lot::Mutex<Vec<String>>,
}

#[cfg(test)]
impl InMemoryNotifier {
    pub fn new() -> Self {
        Self {
            sent: parking_lot::Mutex::new(Vec::new()),
        }
    }
}

#[cfg(test)]
#[async_trait]
impl Notifier for InMemoryNotifier {
    async fn send(&self, message: &str) -> Result<()> {
        self.sent.lock().push(message.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn null_notifier_always_succeeds() {
        assert!(NullNotifier.send("hello").await.is_ok());
    }

    #[tokio::test]
    async fn in_memory_notifier_records_messages() {
        let n = InMemoryNotifier::new();
        n.send("a").await.unwrap();
        n.send("b").await.unwrap();
        assert_eq!(n.sent.lock().as_slice(), ["a".to_string(), "b".to_string()]);
    }
}
