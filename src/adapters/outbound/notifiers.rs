//! Notifiers
//!
//! `LogNotifier` writes events to the log; `WebhookNotifier` also posts
//! them as JSON to an HTTP endpoint without waiting for the answer.

use crate::domain::ports::Notifier;
use crate::domain::value_objects::Severity;
use serde::Serialize;

pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, event: &str, severity: Severity, message: &str) {
        match severity {
            Severity::Info => tracing::info!("[{}] {}", event, message),
            Severity::Warning => tracing::warn!("[{}] {}", event, message),
            Severity::Alert => tracing::error!("[{}] {}", event, message),
        }
    }
}

#[derive(Debug, Serialize)]
struct WebhookPayload<'a> {
    cluster: &'a str,
    event: &'a str,
    severity: Severity,
    message: &'a str,
}

pub struct WebhookNotifier {
    url: String,
    cluster: String,
    client: reqwest::Client,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>, cluster: impl Into<String>, client: reqwest::Client) -> Self {
        Self {
            url: url.into(),
            cluster: cluster.into(),
            client,
        }
    }
}

impl Notifier for WebhookNotifier {
    fn notify(&self, event: &str, severity: Severity, message: &str) {
        LogNotifier.notify(event, severity, message);

        let request = self.client.post(&self.url).json(&WebhookPayload {
            cluster: &self.cluster,
            event,
            severity,
            message,
        });
        let url = self.url.clone();
        tokio::spawn(async move {
            match request.send().await {
                Ok(response) if !response.status().is_success() => {
                    tracing::warn!("webhook {} answered {}", url, response.status())
                }
                Ok(_) => {}
                Err(e) => tracing::warn!("webhook {} failed: {}", url, e),
            }
        });
    }
}
