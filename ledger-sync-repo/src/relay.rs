//! Event relay: delivers outbox events to an HTTP endpoint.
//!
//! Delivery is at-least-once. An event is marked `COMPLETED` only after the
//! endpoint answered with a success status; anything else marks it `FAILED`
//! with the reason, and it is tried again once the retry backoff has passed,
//! up to `OutboxEvent::MAX_ATTEMPTS` attempts.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use ledger_sync_types::{DeliveryStatus, EventOutbox, OutboxEvent, RepoError};
use tokio::sync::watch;
use tokio::time::sleep;
use tracing::{debug, error, info, instrument, warn};

use crate::security::{SIGNATURE_HEADER, sign_payload};

const BATCH_SIZE: i64 = 10;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_secs(30);

/// Counts from one relay pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayReport {
    pub delivered: usize,
    pub failed: usize,
}

pub struct EventRelay<O: EventOutbox> {
    outbox: Arc<O>,
    client: reqwest::Client,
    target_url: String,
    secret: Option<String>,
    poll_interval: Duration,
    retry_backoff: chrono::Duration,
}

fn to_chrono(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or_else(|_| chrono::Duration::days(365))
}

impl<O: EventOutbox> EventRelay<O> {
    pub fn new(outbox: Arc<O>, target_url: String) -> Self {
        Self {
            outbox,
            client: reqwest::Client::builder()
                .timeout(REQUEST_TIMEOUT)
                .build()
                .unwrap_or_default(),
            target_url,
            secret: None,
            poll_interval: Duration::from_secs(1),
            retry_backoff: to_chrono(DEFAULT_RETRY_BACKOFF),
        }
    }

    /// Replaces the default HTTP client (10s timeout).
    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    /// Signs every request body with this secret.
    pub fn with_secret(mut self, secret: impl Into<String>) -> Self {
        self.secret = Some(secret.into());
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Minimum wait between two attempts at the same failed event.
    pub fn with_retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = to_chrono(backoff);
        self
    }

    /// Polls the outbox until `shutdown` flips to `true` or its sender is dropped.
    #[instrument(skip(self, shutdown))]
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!("Starting event relay sending to {}", self.target_url);
        loop {
            if let Err(e) = self.relay_pending().await {
                error!("Failed to fetch pending events: {}", e);
            }

            tokio::select! {
                _ = sleep(self.poll_interval) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Event relay stopped");
                        return;
                    }
                }
            }
        }
    }

    /// Delivers due events until the outbox has none left.
    pub async fn drain(&self) -> Result<RelayReport, RepoError> {
        let mut total = RelayReport::default();
        loop {
            let report = self.relay_pending().await?;
            if report.delivered + report.failed == 0 {
                return Ok(total);
            }
            total.delivered += report.delivered;
            total.failed += report.failed;
        }
    }

    /// One pass over at most one batch of due events.
    pub async fn relay_pending(&self) -> Result<RelayReport, RepoError> {
        let retry_cutoff = Utc::now() - self.retry_backoff;
        let events = self.outbox.pending_events(BATCH_SIZE, retry_cutoff).await?;
        let mut report = RelayReport::default();
        if events.is_empty() {
            return Ok(report);
        }

        debug!("Processing {} pending events", events.len());
        for event in events {
            match self.process_event(event).await? {
                DeliveryStatus::Completed => report.delivered += 1,
                _ => report.failed += 1,
            }
        }
        Ok(report)
    }

    #[instrument(skip(self, event), fields(event_id = %event.id, event_type = %event.event_type))]
    async fn process_event(&self, event: OutboxEvent) -> Result<DeliveryStatus, RepoError> {
        let (status, last_error) = match self.deliver(&event).await {
            Ok(()) => (DeliveryStatus::Completed, None),
            Err(reason) => {
                if event.attempts + 1 >= OutboxEvent::MAX_ATTEMPTS {
                    error!(attempts = event.attempts + 1, "Giving up on event: {}", reason);
                } else {
                    warn!(attempt = event.attempts + 1, "Event delivery failed: {}", reason);
                }
                (DeliveryStatus::Failed, Some(reason))
            }
        };

        self.outbox.mark_event(event.id, status, last_error).await?;
        Ok(status)
    }

    async fn deliver(&self, event: &OutboxEvent) -> Result<(), String> {
        let body = serde_json::to_vec(&event.payload).map_err(|e| e.to_string())?;

        let mut request = self
            .client
            .post(&self.target_url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .header("X-Event-Type", event.event_type.as_str());

        if let Some(secret) = &self.secret {
            let signature = sign_payload(&body, secret).map_err(|e| e.to_string())?;
            request = request.header(SIGNATURE_HEADER, signature);
        }

        let resp = request.body(body).send().await.map_err(|e| e.to_string())?;
        if resp.status().is_success() {
            Ok(())
        } else {
            Err(format!("HTTP {}", resp.status()))
        }
    }
}
