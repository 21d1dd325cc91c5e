//! Operator alerts for terminal sync failures
//!
//! Delivery is best-effort: a failing notifier is logged and never changes
//! the outcome it reports.

use crate::config::NotifierConfig;
use crate::model::SyncOutcome;
use async_trait::async_trait;
use errors::BridgeResult;
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, warn};

/// Tracing target carrying operator alerts
pub const ALERT_TARGET: &str = "sync_alert";

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("Alert delivery failed: {0}")]
    Delivery(String),

    #[error("Alert rejected with HTTP {0}")]
    Rejected(u16),
}

#[async_trait]
pub trait Notifier: Send + Sync + 'static {
    async fn notify(&self, outcome: &SyncOutcome) -> Result<(), NotifyError>;
}

/// Writes alerts to the `sync_alert` log target
#[derive(Debug, Default, Clone)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, outcome: &SyncOutcome) -> Result<(), NotifyError> {
        error!(
            target: ALERT_TARGET,
            entity = %outcome.entity_key,
            direction = %outcome.direction,
            attempts = outcome.attempt_count,
            kind = ?outcome.error_kind,
            "Sync failed terminally: {}",
            outcome.error_detail.as_deref().unwrap_or("no detail")
        );
        Ok(())
    }
}

/// POSTs the outcome as JSON to an operator webhook, after logging it
pub struct WebhookNotifier {
    http: Client,
    url: String,
    log: LogNotifier,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>, timeout: Duration) -> BridgeResult<Self> {
        let http = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            url: url.into(),
            log: LogNotifier,
        })
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, outcome: &SyncOutcome) -> Result<(), NotifyError> {
        self.log.notify(outcome).await?;

        let response = self
            .http
            .post(&self.url)
            .json(outcome)
            .send()
            .await
            .map_err(|e| NotifyError::Delivery(e.to_string()))?;
        if !response.status().is_success() {
            return Err(NotifyError::Rejected(response.status().as_u16()));
        }
        Ok(())
    }
}

/// Build the notifier selected by configuration
pub fn from_config(config: &NotifierConfig) -> BridgeResult<Arc<dyn Notifier>> {
    match &config.webhook_url {
        Some(url) => Ok(Arc::new(WebhookNotifier::new(
            url.trim(),
            Duration::from_secs(config.timeout_secs),
        )?)),
        None => Ok(Arc::new(LogNotifier)),
    }
}

/// Deliver an alert, logging instead of propagating any failure
pub async fn notify_best_effort(notifier: &dyn Notifier, outcome: &SyncOutcome) {
    if let Err(e) = notifier.notify(outcome).await {
        warn!(
            "Alert for {} {} not delivered: {}",
            outcome.direction, outcome.entity_key, e
        );
    }
}
