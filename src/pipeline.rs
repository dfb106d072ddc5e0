//! The relay loop: source → tracker → publisher.
//!
//! Messages are handled strictly one at a time. Each message's events are
//! fully delivered (including backoff waits) before the next message is
//! pulled, so a slow API slows ingestion instead of queueing work.

use crate::event::DecodedMessage;
use crate::metrics::RunMetrics;
use crate::publisher::{PublishResult, Publisher};
use crate::shutdown::ShutdownSignal;
use crate::source::{MessageSource, SourceError};
use crate::tracker::EncounterTracker;
use tracing::{debug, info, warn};

/// Owns the tracker and publisher for one run and keeps its counters.
pub struct Relay {
    tracker: EncounterTracker,
    publisher: Publisher,
    metrics: RunMetrics,
}

impl Relay {
    pub fn new(tracker: EncounterTracker, publisher: Publisher) -> Self {
        Self {
            tracker,
            publisher,
            metrics: RunMetrics::new(),
        }
    }

    pub fn metrics(&self) -> RunMetrics {
        self.metrics
    }

    pub fn tracker(&self) -> &EncounterTracker {
        &self.tracker
    }

    /// Process a single message and deliver whatever events it produces.
    pub async fn handle(&mut self, message: &DecodedMessage) -> Vec<PublishResult> {
        self.metrics.decoded += 1;

        let events = self.tracker.process(message);
        if events.is_empty() {
            return Vec::new();
        }
        self.metrics.events += events.len() as u64;

        let results = self.publisher.publish(events).await;
        for result in &results {
            if result.is_delivered() {
                self.metrics.posted += 1;
            } else if let Some(err) = &result.error {
                debug!(
                    monster_id = result.event.monster_id,
                    event_type = %result.event.event_type,
                    status = result.status_code,
                    attempts = result.attempts,
                    error = %err,
                    "Event not delivered"
                );
            }
        }

        results
    }

    /// Drain `source` until it is exhausted or shutdown is requested.
    ///
    /// Shutdown is only observed between messages; an event already being
    /// delivered runs to completion. On a source error the counters so far
    /// remain available through [`Relay::metrics`].
    pub async fn run<S>(
        &mut self,
        source: &mut S,
        shutdown: &ShutdownSignal,
    ) -> Result<RunMetrics, SourceError>
    where
        S: MessageSource + ?Sized,
    {
        info!("Relay started");

        loop {
            if shutdown.is_shutdown() {
                info!("Shutdown requested, stopping relay");
                break;
            }

            let next = tokio::select! {
                biased;
                _ = shutdown.recv() => {
                    info!("Shutdown requested while waiting for input");
                    break;
                }
                next = source.next_message() => next,
            };

            let message = match next {
                Ok(Some(message)) => message,
                Ok(None) => {
                    debug!("Source exhausted");
                    break;
                }
                Err(e) => {
                    warn!(error = %e, decoded = self.metrics.decoded, "Source failed, stopping relay");
                    return Err(e);
                }
            };

            self.handle(&message).await;
        }

        info!(
            decoded = self.metrics.decoded,
            events = self.metrics.events,
            posted = self.metrics.posted,
            "Relay finished"
        );

        Ok(self.metrics)
    }

    /// Release the publisher and return the final counters.
    pub fn close(self) -> RunMetrics {
        self.publisher.close();
        self.metrics
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::config::PublisherConfig;
    use crate::event::EventType;
    use crate::source::VecSource;
    use crate::tracker::BossNames;
    use crate::transport::{Transport, TransportError, TransportResponse};
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct StatusTransport {
        status: u16,
        calls: AtomicUsize,
    }

    impl StatusTransport {
        fn new(status: u16) -> Arc<Self> {
            Arc::new(Self {
                status,
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl Transport for StatusTransport {
        async fn post_json(
            &self,
            _path: &str,
            _headers: &[(String, String)],
            body: &Value,
        ) -> Result<TransportResponse, TransportError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(TransportResponse::new(self.status, body.to_string()))
        }
    }

    fn tracker() -> EncounterTracker {
        EncounterTracker::new(BossNames::from_iter([(80006, "Golden Juggernaut".to_string())]))
            .with_clock(Arc::new(FixedClock::new(1_000)))
    }

    fn reading(hp: f64) -> DecodedMessage {
        DecodedMessage::new(
            46,
            "SyncNearEntities",
            json!({"entities": [{"monster_id": 80006, "hp_pct": hp, "channel": 3}]}),
        )
    }

    fn relay(status: u16, dry_run: bool) -> (Relay, Arc<StatusTransport>) {
        let transport = StatusTransport::new(status);
        let config = PublisherConfig {
            base_url: "http://testserver".to_string(),
            retry_max: 0,
            dry_run,
            ..PublisherConfig::default()
        };
        let publisher = Publisher::with_transport(config, transport.clone());
        (Relay::new(tracker(), publisher), transport)
    }

    #[tokio::test]
    async fn test_handle_counts_events_and_posts() {
        let (mut relay, transport) = relay(200, false);

        let results = relay.handle(&reading(99.9)).await;
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].event.event_type, EventType::Start);

        assert!(relay.handle(&reading(99.8)).await.is_empty());
        let results = relay.handle(&reading(0.0)).await;
        assert_eq!(results.len(), 2);

        let metrics = relay.metrics();
        assert_eq!(metrics.decoded, 3);
        assert_eq!(metrics.events, 3);
        assert_eq!(metrics.posted, 3);
        assert_eq!(metrics.frames, 0);
        assert_eq!(transport.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_rejected_events_are_not_posted() {
        let (mut relay, _transport) = relay(403, false);

        relay.handle(&reading(99.9)).await;

        let metrics = relay.metrics();
        assert_eq!(metrics.events, 1);
        assert_eq!(metrics.posted, 0);
    }

    #[tokio::test]
    async fn test_dry_run_counts_as_posted() {
        let (mut relay, transport) = relay(500, true);

        relay.handle(&reading(99.9)).await;

        assert_eq!(relay.metrics().posted, 1);
        assert_eq!(transport.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_run_drains_source() {
        let (mut relay, _transport) = relay(200, false);
        let mut source = VecSource::new(vec![
            reading(99.9),
            DecodedMessage::new(1, "Noise", json!({"unrelated": true})),
            reading(80.0),
        ]);

        let metrics = relay.run(&mut source, &ShutdownSignal::new()).await.unwrap();

        assert_eq!(metrics.decoded, 3);
        assert_eq!(metrics.events, 2);
        assert_eq!(metrics.posted, 2);
        assert_eq!(relay.tracker().state(80006).unwrap().last_hp_pct, 80.0);
        assert_eq!(relay.close(), metrics);
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let (mut relay, _transport) = relay(200, false);
        let mut source = VecSource::new(vec![reading(99.9), reading(50.0)]);
        let shutdown = ShutdownSignal::new();
        shutdown.trigger();

        let metrics = relay.run(&mut source, &shutdown).await.unwrap();

        assert_eq!(metrics.decoded, 0);
        assert_eq!(metrics.events, 0);
    }
}
