//! Audit lifecycle notifications.
//!
//! Delivery is best-effort: callers log a failed send and carry on.

use async_trait::async_trait;
use serde::Serialize;

use crate::audit::{DiscoveryData, PainPointsData, QualificationData};
use crate::error::NotifyError;

/// Something worth telling the sales side about.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum AuditEvent {
    #[serde(rename_all = "camelCase")]
    Started {
        session_id: String,
        email: String,
        thread_id: String,
        resumed: bool,
    },
    #[serde(rename_all = "camelCase")]
    Completed {
        session_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        email: Option<String>,
        discovery: Option<DiscoveryData>,
        pain_points: Option<PainPointsData>,
        qualification: Option<QualificationData>,
    },
}

impl AuditEvent {
    pub fn session_id(&self) -> &str {
        match self {
            Self::Started { session_id, .. } | Self::Completed { session_id, .. } => session_id,
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            Self::Started { .. } => "started",
            Self::Completed { .. } => "completed",
        }
    }
}

#[async_trait]
pub trait Notifier: Send + Sync {
    fn name(&self) -> &str;

    async fn send(&self, event: &AuditEvent) -> Result<(), NotifyError>;
}

/// Writes events to the log. Used when no webhook is configured.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    fn name(&self) -> &str {
        "log"
    }

    async fn send(&self, event: &AuditEvent) -> Result<(), NotifyError> {
        tracing::info!(
            event = event.kind(),
            session_id = event.session_id(),
            "Audit event"
        );
        Ok(())
    }
}

/// POSTs each event as JSON to a fixed URL.
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
        }
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    fn name(&self) -> &str {
        "webhook"
    }

    async fn send(&self, event: &AuditEvent) -> Result<(), NotifyError> {
        let resp = self
            .client
            .post(&self.url)
            .json(event)
            .send()
            .await
            .map_err(|e| NotifyError::SendFailed {
                name: "webhook".into(),
                reason: e.to_string(),
            })?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(NotifyError::SendFailed {
                name: "webhook".into(),
                reason: format!("HTTP {status}: {body}"),
            });
        }

        tracing::debug!(
            event = event.kind(),
            session_id = event.session_id(),
            "Webhook notified"
        );
        Ok(())
    }
}

/// Send and swallow the error after logging it.
pub async fn notify_best_effort(notifier: &dyn Notifier, event: &AuditEvent) {
    if let Err(e) = notifier.send(event).await {
        tracing::warn!(
            notifier = notifier.name(),
            session_id = event.session_id(),
            error = %e,
            "Failed to deliver audit notification"
        );
    }
}
