//! Event publisher - delivers boss events to the HP ingestion API.
//!
//! Every event becomes exactly one [`PublishResult`], in input order. Events
//! are grouped into batches of `batch_size` for flush cadence only; each
//! event is still its own request.
//!
//! # Retry policy
//!
//! ```text
//! outcome                  | action
//! -------------------------|----------------------------------------------
//! transport error          | retry, then fail with status 0
//! 429 / 5xx                | retry, then fail with last status
//! anything else            | terminal (2xx success, other 4xx rejected)
//! ```
//!
//! A publisher makes at most `retry_max + 1` attempts per event and sleeps
//! `retry_backoff_seconds * 2^(attempt-1)` plus 0.1-0.5s of jitter between
//! attempts. The sleep holds up the caller: a slow API slows ingestion down
//! instead of letting work pile up. A delay too large to represent as a
//! [`Duration`] saturates to [`MAX_BACKOFF`].
//!
//! # Example
//!
//! ```rust,ignore
//! use bossfeed::config::PublisherConfig;
//! use bossfeed::publisher::Publisher;
//!
//! let publisher = Publisher::new(PublisherConfig::default());
//! let results = publisher.publish(events).await;
//! publisher.close();
//! ```

use crate::config::PublisherConfig;
use crate::event::{round_pct, BossEvent, EventType};
use crate::transport::{HttpTransport, Transport, TransportError, TransportResponse};
use rand::Rng;
use serde::Serialize;
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// Ingestion endpoint path
pub const INGEST_PATH: &str = "/api/create-hp-report";

/// Upper bound for a single backoff wait
pub const MAX_BACKOFF: Duration = Duration::MAX;

/// Jitter added to every backoff delay, in seconds
const JITTER_SECS: std::ops::Range<f64> = 0.1..0.5;

/// Terminal delivery failures for a single event.
#[derive(Error, Debug)]
pub enum DeliveryError {
    /// No response was received
    #[error("{0}")]
    Transport(#[from] TransportError),

    /// The API answered with a non-retryable error status
    #[error("{body}")]
    Rejected { status: u16, body: String },

    /// The API kept answering 429/5xx until attempts ran out
    #[error("server error after {attempts} attempts")]
    Exhausted { status: u16, attempts: u32 },

    /// The payload could not be encoded
    #[error("failed to encode payload: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Outcome of publishing one event.
#[derive(Debug)]
pub struct PublishResult {
    pub event: BossEvent,

    /// HTTP status of the last response; 0 for dry-run or when no response arrived
    pub status_code: u16,

    /// Response body, when it decoded to a JSON object
    pub response_body: Option<Map<String, Value>>,

    pub error: Option<DeliveryError>,

    /// Requests sent for this event (0 for dry-run)
    pub attempts: u32,
}

impl PublishResult {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    /// Accepted by the API, or a dry-run.
    pub fn is_delivered(&self) -> bool {
        self.error.is_none() && (self.status_code == 0 || (200..300).contains(&self.status_code))
    }
}

/// JSON body of an HP report.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HpReport<'a> {
    pub monster_id: i64,
    pub hp_pct: f64,
    pub line: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instance_id: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub map_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub boss_name: Option<&'a str>,
    pub event_type: EventType,
    pub timestamp_ms: i64,
}

impl<'a> From<&'a BossEvent> for HpReport<'a> {
    fn from(event: &'a BossEvent) -> Self {
        Self {
            monster_id: event.monster_id,
            hp_pct: round_pct(event.hp_pct),
            // channel 0 (or unknown) reports as line 1
            line: event.channel.filter(|c| *c != 0).unwrap_or(1),
            instance_id: event.instance_id.as_deref().filter(|s| !s.is_empty()),
            map_id: event.map_id,
            boss_name: event.boss_name.as_deref().filter(|s| !s.is_empty()),
            event_type: event.event_type,
            timestamp_ms: event.timestamp_ms,
        }
    }
}

enum TransportHandle {
    /// Created and released by the publisher
    Owned(HttpTransport),
    /// Injected by the caller, never released here
    Shared(Arc<dyn Transport>),
}

impl TransportHandle {
    fn get(&self) -> &dyn Transport {
        match self {
            TransportHandle::Owned(transport) => transport as &dyn Transport,
            TransportHandle::Shared(transport) => transport.as_ref(),
        }
    }
}

/// Publishes [`BossEvent`]s with retries and backoff.
pub struct Publisher {
    config: PublisherConfig,
    transport: TransportHandle,
    /// Fixed for the publisher's lifetime
    headers: Vec<(String, String)>,
}

impl Publisher {
    /// Create a publisher that owns an HTTP transport for `config.base_url`.
    pub fn new(config: PublisherConfig) -> Self {
        let transport = HttpTransport::new(&config.base_url)
            .with_timeout(Duration::from_millis(config.timeout_ms));
        Self::build(config, TransportHandle::Owned(transport))
    }

    /// Create a publisher over an injected transport.
    ///
    /// The transport is left untouched by [`Publisher::close`].
    pub fn with_transport(config: PublisherConfig, transport: Arc<dyn Transport>) -> Self {
        Self::build(config, TransportHandle::Shared(transport))
    }

    fn build(config: PublisherConfig, transport: TransportHandle) -> Self {
        let mut headers = vec![("Content-Type".to_string(), "application/json".to_string())];
        if let Some(api_key) = config.api_key.as_deref().filter(|k| !k.is_empty()) {
            headers.push(("X-API-Key".to_string(), api_key.to_string()));
        }
        headers.extend(config.header_strings());

        Self {
            config,
            transport,
            headers,
        }
    }

    pub fn config(&self) -> &PublisherConfig {
        &self.config
    }

    /// Headers attached to every request.
    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    /// Release the transport if this publisher owns it.
    pub fn close(self) {
        match self.transport {
            TransportHandle::Owned(transport) => {
                debug!(base_url = %transport.base_url(), "Closing owned HTTP transport");
                drop(transport);
            }
            TransportHandle::Shared(_) => {
                debug!("Leaving injected transport open");
            }
        }
    }

    /// Publish events in order, one result per event.
    pub async fn publish(&self, events: impl IntoIterator<Item = BossEvent>) -> Vec<PublishResult> {
        let batch_size = self.config.batch_size.max(1);
        let mut events = events.into_iter().peekable();
        let mut results = Vec::new();

        while events.peek().is_some() {
            let batch: Vec<BossEvent> = events.by_ref().take(batch_size).collect();
            results.extend(self.flush(batch).await);
        }

        results
    }

    async fn flush(&self, batch: Vec<BossEvent>) -> Vec<PublishResult> {
        debug!(size = batch.len(), dry_run = self.config.dry_run, "Flushing batch");

        let mut results = Vec::with_capacity(batch.len());
        for event in batch {
            results.push(self.deliver(event).await);
        }
        results
    }

    async fn deliver(&self, event: BossEvent) -> PublishResult {
        let payload = match serde_json::to_value(HpReport::from(&event)) {
            Ok(payload) => payload,
            Err(e) => {
                error!(monster_id = event.monster_id, error = %e, "Failed to encode HP report");
                return PublishResult {
                    event,
                    status_code: 0,
                    response_body: None,
                    error: Some(DeliveryError::Encode(e)),
                    attempts: 0,
                };
            }
        };

        if self.config.dry_run {
            info!(payload = %payload, "DRY-RUN would POST {}", INGEST_PATH);
            return PublishResult {
                event,
                status_code: 0,
                response_body: None,
                error: None,
                attempts: 0,
            };
        }

        let transport = self.transport.get();
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;

            match transport.post_json(INGEST_PATH, &self.headers, &payload).await {
                Err(e) => {
                    warn!(
                        monster_id = event.monster_id,
                        attempt,
                        error = %e,
                        "HP report request failed"
                    );
                    if attempt > self.config.retry_max {
                        error!(
                            monster_id = event.monster_id,
                            attempts = attempt,
                            "Giving up on HP report"
                        );
                        return PublishResult {
                            event,
                            status_code: 0,
                            response_body: None,
                            error: Some(DeliveryError::Transport(e)),
                            attempts: attempt,
                        };
                    }
                }
                Ok(response) if is_retryable(response.status) => {
                    if attempt > self.config.retry_max {
                        error!(
                            monster_id = event.monster_id,
                            status = response.status,
                            attempts = attempt,
                            "HP report retries exhausted"
                        );
                        return PublishResult {
                            event,
                            status_code: response.status,
                            response_body: decode_object(&response.body),
                            error: Some(DeliveryError::Exhausted {
                                status: response.status,
                                attempts: attempt,
                            }),
                            attempts: attempt,
                        };
                    }
                    warn!(
                        monster_id = event.monster_id,
                        status = response.status,
                        attempt,
                        "Server responded with {}, retrying",
                        response.status
                    );
                }
                Ok(response) => return self.finish(event, response, attempt),
            }

            let delay = self.backoff_delay(attempt);
            debug!(attempt, delay_ms = delay.as_millis() as u64, "Backing off");
            tokio::time::sleep(delay).await;
        }
    }

    fn finish(&self, event: BossEvent, response: TransportResponse, attempts: u32) -> PublishResult {
        let response_body = decode_object(&response.body);
        let status_code = response.status;

        let error = if response.is_success() {
            info!(
                monster_id = event.monster_id,
                event_type = %event.event_type,
                hp_pct = event.hp_pct,
                status = status_code,
                "HP report delivered"
            );
            None
        } else {
            error!(
                monster_id = event.monster_id,
                event_type = %event.event_type,
                status = status_code,
                body = %response.body,
                "HP report rejected"
            );
            Some(DeliveryError::Rejected {
                status: status_code,
                body: response.body,
            })
        };

        PublishResult {
            event,
            status_code,
            response_body,
            error,
            attempts,
        }
    }

    /// Delay before the attempt after `attempt`.
    fn backoff_delay(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let base = self.config.retry_backoff_seconds * 2f64.powi(exponent);
        let jitter = rand::rng().random_range(JITTER_SECS);
        Duration::try_from_secs_f64(base + jitter).unwrap_or(MAX_BACKOFF)
    }
}

fn is_retryable(status: u16) -> bool {
    status == 429 || status >= 500
}

fn decode_object(body: &str) -> Option<Map<String, Value>> {
    match serde_json::from_str(body) {
        Ok(Value::Object(map)) => Some(map),
        _ => None,
    }
}
