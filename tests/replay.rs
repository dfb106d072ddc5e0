//! End-to-end replay of a capture through the relay into the mock API.

use bossfeed::config::PublisherConfig;
use bossfeed::metrics::RunMetrics;
use bossfeed::mock_ingest::{self, AppState};
use bossfeed::pipeline::Relay;
use bossfeed::publisher::Publisher;
use bossfeed::shutdown::ShutdownSignal;
use bossfeed::source::{ReplaySource, SourceError};
use bossfeed::tracker::EncounterTracker;
use std::net::SocketAddr;
use std::path::PathBuf;

const SAMPLE: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/samples/single_boss.jsonl");
const MAPPING: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/data/boss_mapping.json");

async fn spawn_mock() -> (SocketAddr, AppState) {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let state = AppState::new();

    let server_state = state.clone();
    tokio::spawn(async move {
        mock_ingest::serve(listener, server_state).await.unwrap();
    });

    (addr, state)
}

fn temp_path(name: &str) -> PathBuf {
    std::env::temp_dir().join(format!("bossfeed-replay-{}-{}", name, std::process::id()))
}

fn relay(config: PublisherConfig) -> Relay {
    let tracker = EncounterTracker::from_mapping_file(MAPPING).unwrap();
    Relay::new(tracker, Publisher::new(config))
}

#[tokio::test]
async fn test_replay_to_mock_writes_metrics() {
    let (addr, state) = spawn_mock().await;
    let metrics_path = temp_path("metrics.json");

    let mut relay = relay(PublisherConfig {
        base_url: format!("http://{}", addr),
        ..PublisherConfig::default()
    });
    let mut source = ReplaySource::open(SAMPLE).await.unwrap();

    relay.run(&mut source, &ShutdownSignal::new()).await.unwrap();
    let metrics = relay.close();
    metrics.write_to(&metrics_path).unwrap();

    // 100.0 is idle, start at 99.8, ticks at 75, 40 and 0, then end
    assert_eq!(
        metrics,
        RunMetrics {
            decoded: 6,
            events: 5,
            frames: 0,
            posted: 5,
        }
    );
    assert_eq!(state.metrics.accepted(), 5);

    let written: RunMetrics =
        serde_json::from_str(&std::fs::read_to_string(&metrics_path).unwrap()).unwrap();
    assert_eq!(written, metrics);

    std::fs::remove_file(metrics_path).ok();
}

#[tokio::test]
async fn test_dry_run_replay_posts_nothing() {
    let (addr, state) = spawn_mock().await;

    let mut relay = relay(PublisherConfig {
        base_url: format!("http://{}", addr),
        dry_run: true,
        ..PublisherConfig::default()
    });
    let mut source = ReplaySource::open(SAMPLE).await.unwrap();

    let metrics = relay.run(&mut source, &ShutdownSignal::new()).await.unwrap();

    assert_eq!(metrics.events, 5);
    assert_eq!(metrics.posted, 5);
    assert_eq!(state.metrics.accepted(), 0);
}

#[tokio::test]
async fn test_malformed_capture_keeps_partial_metrics() {
    let (addr, _state) = spawn_mock().await;
    let capture = temp_path("broken.jsonl");
    std::fs::write(
        &capture,
        "{\"data\": {\"entities\": [{\"monster_id\": 80006, \"hp_pct\": 99.9}]}}\n{oops\n",
    )
    .unwrap();

    let mut relay = relay(PublisherConfig {
        base_url: format!("http://{}", addr),
        ..PublisherConfig::default()
    });
    let mut source = ReplaySource::open(&capture).await.unwrap();

    let result = relay.run(&mut source, &ShutdownSignal::new()).await;

    assert!(matches!(result, Err(SourceError::Malformed { line: 2, .. })));
    let metrics = relay.close();
    assert_eq!(metrics.decoded, 1);
    assert_eq!(metrics.posted, 1);

    std::fs::remove_file(capture).ok();
}
