//! Per-recipient newsletter dispatch.
//!
//! Delivery goes through the Resend HTTP API behind a small [`Transport`]
//! trait. One recipient's failure never blocks the rest; the caller gets a
//! report with every recipient's outcome and only marks articles sent when
//! at least one delivery succeeded.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use tracing::{error, info};

use crate::composer::UNSUBSCRIBE_PLACEHOLDER;

#[derive(Debug, Clone)]
pub struct EmailMessage {
    pub from: String,
    pub to: String,
    pub subject: String,
    pub body: String,
}

#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, message: &EmailMessage) -> Result<()>;
}

const RESEND_API_URL: &str = "https://api.resend.com/emails";

#[derive(Serialize)]
struct ResendRequest<'a> {
    from: &'a str,
    to: [&'a str; 1],
    subject: &'a str,
    text: &'a str,
}

pub struct ResendTransport {
    client: Client,
    api_key: String,
}

impl ResendTransport {
    pub fn new(api_key: String) -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self { client, api_key })
    }
}

#[async_trait]
impl Transport for ResendTransport {
    async fn send(&self, message: &EmailMessage) -> Result<()> {
        let request = ResendRequest {
            from: &message.from,
            to: [message.to.as_str()],
            subject: &message.subject,
            text: &message.body,
        };

        let response = self
            .client
            .post(RESEND_API_URL)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .context("Failed to send request to Resend API")?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| String::from("unknown error"));
            anyhow::bail!("Resend API error: {} - {}", status, error_text);
        }

        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct DeliveryOutcome {
    pub recipient: String,
    /// None on success, the error text on failure.
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct DispatchReport {
    pub sent: usize,
    pub failed: usize,
    pub outcomes: Vec<DeliveryOutcome>,
}

impl DispatchReport {
    pub fn any_sent(&self) -> bool {
        self.sent > 0
    }
}

/// Build the personalized unsubscribe link for one recipient.
pub fn unsubscribe_url(base_url: &str, recipient: &str) -> String {
    format!(
        "{}/unsubscribe?email={}",
        base_url.trim_end_matches('/'),
        urlencoding::encode(recipient)
    )
}

/// Send the edition to every recipient, substituting the unsubscribe
/// placeholder per recipient before send. Failures are recorded and the
/// loop continues.
pub async fn dispatch(
    transport: &dyn Transport,
    from: &str,
    subject: &str,
    body: &str,
    recipients: &[String],
    base_url: &str,
) -> DispatchReport {
    let mut report = DispatchReport::default();

    for recipient in recipients {
        let personalized = body.replace(UNSUBSCRIBE_PLACEHOLDER, &unsubscribe_url(base_url, recipient));
        let message = EmailMessage {
            from: from.to_string(),
            to: recipient.clone(),
            subject: subject.to_string(),
            body: personalized,
        };

        match transport.send(&message).await {
            Ok(()) => {
                info!("Newsletter sent to {recipient}");
                report.sent += 1;
                report.outcomes.push(DeliveryOutcome {
                    recipient: recipient.clone(),
                    error: None,
                });
            }
            Err(e) => {
                error!("Failed to send newsletter to {recipient}: {e:#}");
                report.failed += 1;
                report.outcomes.push(DeliveryOutcome {
                    recipient: recipient.clone(),
                    error: Some(format!("{e:#}")),
                });
            }
        }
    }

    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Test transport that fails for configured recipients and records
    /// every message it was asked to deliver.
    struct FlakyTransport {
        fail_for: Vec<String>,
        delivered: Mutex<Vec<EmailMessage>>,
    }

    impl FlakyTransport {
        fn new(fail_for: &[&str]) -> Self {
            Self {
                fail_for: fail_for.iter().map(|s| s.to_string()).collect(),
                delivered: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl Transport for FlakyTransport {
        async fn send(&self, message: &EmailMessage) -> Result<()> {
            if self.fail_for.contains(&message.to) {
                anyhow::bail!("mailbox unavailable");
            }
            self.delivered.lock().unwrap().push(message.clone());
            Ok(())
        }
    }

    fn recipients(n: usize) -> Vec<String> {
        (1..=n).map(|i| format!("user{i}@example.com")).collect()
    }

    #[tokio::test]
    async fn test_one_failure_does_not_block_the_rest() {
        let transport = FlakyTransport::new(&["user3@example.com"]);
        let report = dispatch(
            &transport,
            "news@example.com",
            "Subject",
            "Body",
            &recipients(5),
            "https://example.com",
        )
        .await;

        assert_eq!(report.sent, 4);
        assert_eq!(report.failed, 1);
        assert!(report.any_sent());

        // All five recipients have an individually recorded outcome.
        assert_eq!(report.outcomes.len(), 5);
        for outcome in &report.outcomes {
            if outcome.recipient == "user3@example.com" {
                assert!(outcome.error.is_some());
            } else {
                assert!(outcome.error.is_none());
            }
        }
    }

    #[tokio::test]
    async fn test_placeholder_substituted_per_recipient() {
        let transport = FlakyTransport::new(&[]);
        let body = format!("Hello!\nUnsubscribe: {UNSUBSCRIBE_PLACEHOLDER}\n");
        dispatch(
            &transport,
            "news@example.com",
            "Subject",
            &body,
            &recipients(2),
            "https://example.com/",
        )
        .await;

        let delivered = transport.delivered.lock().unwrap();
        assert_eq!(delivered.len(), 2);
        assert!(delivered[0]
            .body
            .contains("https://example.com/unsubscribe?email=user1%40example.com"));
        assert!(delivered[1]
            .body
            .contains("https://example.com/unsubscribe?email=user2%40example.com"));
        for message in delivered.iter() {
            assert!(!message.body.contains(UNSUBSCRIBE_PLACEHOLDER));
        }
    }

    #[tokio::test]
    async fn test_no_recipients_reports_nothing_sent() {
        let transport = FlakyTransport::new(&[]);
        let report = dispatch(&transport, "f@e.com", "S", "B", &[], "https://e.com").await;
        assert!(!report.any_sent());
        assert_eq!(report.failed, 0);
    }

    #[test]
    fn test_unsubscribe_url_encodes_the_address() {
        let url = unsubscribe_url("https://example.com", "a+b@example.com");
        assert_eq!(url, "https://example.com/unsubscribe?email=a%2Bb%40example.com");
    }
}
