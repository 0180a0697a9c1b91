//! Webhook notifier -- JSON POST per notification.
//!
//! Status mapping: 2xx is delivered, 408/429/5xx are retryable, any other
//! 4xx is permanent. Transport errors count as retryable.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::json;

use crate::model::{Delivery, Reminder};
use crate::notify::{Notifier, NotifyOutcome};

pub struct WebhookNotifier {
    client: Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            url: url.into(),
        }
    }

    async fn post(&self, body: serde_json::Value) -> NotifyOutcome {
        let resp = match self.client.post(&self.url).json(&body).send().await {
            Ok(resp) => resp,
            Err(e) => {
                return NotifyOutcome::Retryable {
                    error: format!("webhook request failed: {e}"),
                }
            }
        };

        let status = resp.status();
        if status.is_success() {
            // Take the endpoint's message id when it returns one.
            let message_ref = resp
                .json::<serde_json::Value>()
                .await
                .ok()
                .and_then(|v| v.get("id").and_then(|id| id.as_str().map(String::from)));
            return NotifyOutcome::Delivered { message_ref };
        }

        let error = format!("webhook returned HTTP {status}");
        if status == StatusCode::REQUEST_TIMEOUT
            || status == StatusCode::TOO_MANY_REQUESTS
            || status.is_server_error()
        {
            NotifyOutcome::Retryable { error }
        } else {
            NotifyOutcome::Permanent { error }
        }
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn send(&self, reminder: &Reminder, recipient: &str) -> NotifyOutcome {
        self.post(json!({
            "kind": "reminder",
            "reminder_id": reminder.id,
            "recipient": recipient,
            "title": reminder.title,
            "body": reminder.body,
        }))
        .await
    }

    async fn send_escalation(
        &self,
        reminder: &Reminder,
        original: &Delivery,
        level: u32,
        targets: &[String],
    ) -> Vec<(String, NotifyOutcome)> {
        let mut results = Vec::with_capacity(targets.len());
        for target in targets {
            let outcome = self
                .post(json!({
                    "kind": "escalation",
                    "reminder_id": reminder.id,
                    "recipient": target,
                    "title": reminder.title,
                    "body": reminder.body,
                    "escalation_level": level,
                    "original_delivery_id": original.id,
                }))
                .await;
            results.push((target.clone(), outcome));
        }
        results
    }
}
