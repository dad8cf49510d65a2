//! Outbound notification channel.
//!
//! Senders only report success or failure; nothing is tracked after a send.

use crate::error::NotifyError;
use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::info;
use url::Url;

/// One message to one recipient.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notification {
    pub recipient: String,
    #[serde(flatten)]
    pub content: NotificationContent,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NotificationContent {
    /// Fully rendered message
    Simple {
        subject: String,
        html_body: String,
        text_body: String,
    },
    /// Named template rendered by the relay
    Templated {
        template: String,
        params: BTreeMap<String, serde_json::Value>,
    },
}

/// Send capability used by the alert pass.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, notification: &Notification) -> Result<(), NotifyError>;

    /// Whether a successful `send` means the message reached the recipient.
    /// Alerts are only deleted after a delivered send.
    fn delivers(&self) -> bool {
        true
    }
}

/// A recipient address hashed for logging.
#[derive(Debug, Clone, Hash, Eq, PartialEq)]
pub struct RecipientKey(String);

impl RecipientKey {
    /// Hashes a (case-insensitive) address, keeping the first 16 bytes.
    pub fn from_address(address: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(address.trim().to_lowercase().as_bytes());
        let result = hasher.finalize();
        Self(hex::encode(&result[..16]))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for RecipientKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}...", &self.0[..8.min(self.0.len())])
    }
}

mod hex {
    pub fn encode(bytes: &[u8]) -> String {
        bytes.iter().map(|b| format!("{:02x}", b)).collect()
    }
}

/// Body posted to the mail relay.
#[derive(Serialize)]
struct RelayMessage<'a> {
    from: &'a str,
    #[serde(flatten)]
    notification: &'a Notification,
}

/// Delivers notifications by POSTing them as JSON to a mail relay.
pub struct HttpMailer {
    client: Client,
    relay_url: Url,
    from: String,
}

impl HttpMailer {
    pub fn new(relay_url: &str, from: &str, timeout: Duration) -> Result<Self, NotifyError> {
        let relay_url = Url::parse(relay_url).map_err(|e| NotifyError::Transport {
            message: format!("Invalid relay URL {}: {}", relay_url, e),
        })?;
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(timeout)
            .build()?;

        Ok(Self {
            client,
            relay_url,
            from: from.to_string(),
        })
    }
}

#[async_trait]
impl Notifier for HttpMailer {
    async fn send(&self, notification: &Notification) -> Result<(), NotifyError> {
        let body = RelayMessage {
            from: &self.from,
            notification,
        };

        let response = self
            .client
            .post(self.relay_url.clone())
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(NotifyError::Rejected {
                status: status.as_u16(),
                message: message.chars().take(200).collect(),
            });
        }

        info!(
            recipient = %RecipientKey::from_address(&notification.recipient),
            "Notification accepted by relay"
        );
        Ok(())
    }
}

/// Logs notifications instead of sending them. Nothing is delivered, so the
/// alert pass keeps every rule it logs.
#[derive(Debug, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, notification: &Notification) -> Result<(), NotifyError> {
        let subject = match &notification.content {
            NotificationContent::Simple { subject, .. } => subject.as_str(),
            NotificationContent::Templated { template, .. } => template.as_str(),
        };
        info!(
            recipient = %RecipientKey::from_address(&notification.recipient),
            subject,
            "Notification (no relay configured, not sent)"
        );
        Ok(())
    }

    fn delivers(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recipient_key_hides_address() {
        let key = RecipientKey::from_address("Bucky@Wisc.edu ");
        assert_eq!(key, RecipientKey::from_address("bucky@wisc.edu"));
        assert_eq!(key.as_str().len(), 32);
        assert!(!key.to_string().contains("bucky"));
        assert!(key.to_string().ends_with("..."));
    }

    #[test]
    fn test_relay_body_is_flat() {
        let notification = Notification {
            recipient: "bucky@wisc.edu".to_string(),
            content: NotificationContent::Templated {
                template: "seat-alert".to_string(),
                params: BTreeMap::from([("open_seats".to_string(), serde_json::json!(3))]),
            },
        };
        let body = serde_json::to_value(RelayMessage {
            from: "alerts@enrollalert.com",
            notification: &notification,
        })
        .unwrap();

        assert_eq!(body["from"], "alerts@enrollalert.com");
        assert_eq!(body["recipient"], "bucky@wisc.edu");
        assert_eq!(body["kind"], "templated");
        assert_eq!(body["params"]["open_seats"], 3);
    }

    #[tokio::test]
    async fn test_log_notifier_always_succeeds() {
        let notification = Notification {
            recipient: "bucky@wisc.edu".to_string(),
            content: NotificationContent::Simple {
                subject: "Course Alert".to_string(),
                html_body: String::new(),
                text_body: String::new(),
            },
        };
        assert!(LogNotifier.send(&notification).await.is_ok());
        assert!(!LogNotifier.delivers());
    }

    #[test]
    fn test_bad_relay_url() {
        assert!(matches!(
            HttpMailer::new("relay", "a@b.c", Duration::from_secs(1)),
            Err(NotifyError::Transport { .. })
        ));
    }
}
