//! Mock HP ingestion API for offline validation.
//!
//! Accepts the same `POST /api/create-hp-report` contract as the real
//! service, validates each report and echoes it back. `X-API-Key` values
//! starting with `deny` are rejected with 403, which makes it easy to
//! exercise the publisher's terminal-failure path.

use axum::{
    extract::{rejection::JsonRejection, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

/// Path the publisher posts to
pub const HP_REPORT_PATH: &str = "/api/create-hp-report";

/// Server counters
#[derive(Debug)]
pub struct MockMetrics {
    reports_accepted: AtomicU64,
    reports_rejected: AtomicU64,
    start_time: Instant,
}

impl MockMetrics {
    fn new() -> Self {
        Self {
            reports_accepted: AtomicU64::new(0),
            reports_rejected: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    pub fn accepted(&self) -> u64 {
        self.reports_accepted.load(Ordering::Relaxed)
    }

    pub fn rejected(&self) -> u64 {
        self.reports_rejected.load(Ordering::Relaxed)
    }

    fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

#[derive(Debug, Clone)]
pub struct AppState {
    pub metrics: Arc<MockMetrics>,
}

impl AppState {
    pub fn new() -> Self {
        Self {
            metrics: Arc::new(MockMetrics::new()),
        }
    }
}

impl Default for AppState {
    fn default() -> Self {
        Self::new()
    }
}

/// An HP report as accepted by the ingestion API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HpReportRecord {
    pub monster_id: i64,
    pub hp_pct: f64,
    pub line: i64,
    #[serde(default)]
    pub instance_id: Option<String>,
    #[serde(default)]
    pub map_id: Option<i64>,
    #[serde(default)]
    pub boss_name: Option<String>,
    #[serde(default)]
    pub event_type: Option<String>,
    #[serde(default)]
    pub timestamp_ms: Option<i64>,
}

impl HpReportRecord {
    /// Check field ranges and tidy `boss_name`; returns every violation.
    pub fn validate(mut self) -> Result<Self, Vec<String>> {
        let mut errors = Vec::new();

        if self.monster_id < 1 {
            errors.push("monster_id must be >= 1".to_string());
        }
        if !(0.0..=100.0).contains(&self.hp_pct) {
            errors.push("hp_pct must be between 0 and 100".to_string());
        }
        if !(1..=1000).contains(&self.line) {
            errors.push("line must be between 1 and 1000".to_string());
        }
        if self.map_id.is_some_and(|map_id| map_id < 0) {
            errors.push("map_id must be >= 0".to_string());
        }
        if let Some(event_type) = &self.event_type {
            if !matches!(event_type.as_str(), "start" | "tick" | "end") {
                errors.push(format!("event_type '{}' must be start, tick or end", event_type));
            }
        }
        if self.timestamp_ms.is_some_and(|ts| ts < 0) {
            errors.push("timestamp_ms must be >= 0".to_string());
        }

        if !errors.is_empty() {
            return Err(errors);
        }

        self.boss_name = self
            .boss_name
            .map(|name| name.trim().to_string())
            .filter(|name| !name.is_empty());

        Ok(self)
    }
}

/// Build the mock application.
pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(get_metrics))
        .route(HP_REPORT_PATH, post(create_hp_report))
        .with_state(state)
}

/// Serve the mock on an already-bound listener until the future is dropped.
pub async fn serve(listener: TcpListener, state: AppState) -> std::io::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        info!("Mock ingestion API listening on {}", addr);
    }
    axum::serve(listener, app(state)).await
}

async fn health_check() -> Json<Value> {
    Json(json!({ "status": "ok", "timestamp": Utc::now().to_rfc3339() }))
}

async fn get_metrics(State(state): State<AppState>) -> Json<Value> {
    let uptime = state.metrics.uptime_seconds();

    Json(json!({
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_seconds": uptime,
        "reports": {
            "accepted": state.metrics.accepted(),
            "rejected": state.metrics.rejected(),
        },
        "status": "running"
    }))
}

async fn create_hp_report(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<HpReportRecord>, JsonRejection>,
) -> Response {
    let request_id = headers
        .get("X-Request-ID")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    let report = match payload {
        Ok(Json(report)) => report.validate(),
        Err(rejection) => Err(vec![rejection.body_text()]),
    };

    let report = match report {
        Ok(report) => report,
        Err(errors) => {
            state.metrics.reports_rejected.fetch_add(1, Ordering::Relaxed);
            debug!(request_id = %request_id, errors = ?errors, "Invalid HP report");
            return (
                StatusCode::UNPROCESSABLE_ENTITY,
                Json(json!({ "detail": errors })),
            )
                .into_response();
        }
    };

    let api_key = headers.get("X-API-Key").and_then(|v| v.to_str().ok());
    if api_key.is_some_and(|key| key.starts_with("deny")) {
        state.metrics.reports_rejected.fetch_add(1, Ordering::Relaxed);
        warn!(request_id = %request_id, "Invalid API key attempt");
        return (
            StatusCode::FORBIDDEN,
            Json(json!({ "detail": "Invalid API key" })),
        )
            .into_response();
    }

    state.metrics.reports_accepted.fetch_add(1, Ordering::Relaxed);
    info!(
        request_id = %request_id,
        monster_id = report.monster_id,
        hp_pct = report.hp_pct,
        event_type = ?report.event_type,
        "Received HP report"
    );

    (
        StatusCode::OK,
        Json(json!({ "success": true, "data": report })),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> HpReportRecord {
        HpReportRecord {
            monster_id: 80006,
            hp_pct: 42.5,
            line: 1,
            instance_id: None,
            map_id: Some(0),
            boss_name: Some("  Golden Juggernaut ".to_string()),
            event_type: Some("tick".to_string()),
            timestamp_ms: Some(1_000),
        }
    }

    #[test]
    fn test_valid_report_trims_name() {
        let report = record().validate().unwrap();
        assert_eq!(report.boss_name.as_deref(), Some("Golden Juggernaut"));
    }

    #[test]
    fn test_blank_name_becomes_none() {
        let report = HpReportRecord {
            boss_name: Some("   ".to_string()),
            ..record()
        };
        assert!(report.validate().unwrap().boss_name.is_none());
    }

    #[test]
    fn test_range_violations_are_collected() {
        let report = HpReportRecord {
            monster_id: 0,
            hp_pct: 100.5,
            line: 1001,
            map_id: Some(-1),
            event_type: Some("heal".to_string()),
            timestamp_ms: Some(-5),
            ..record()
        };
        let errors = report.validate().unwrap_err();
        assert_eq!(errors.len(), 6);
    }

    #[test]
    fn test_null_report_serializes_missing_fields() {
        let report = HpReportRecord {
            instance_id: None,
            map_id: None,
            boss_name: None,
            event_type: None,
            timestamp_ms: None,
            ..record()
        };
        let value = serde_json::to_value(report).unwrap();
        assert_eq!(value["instance_id"], Value::Null);
        assert_eq!(value["line"], json!(1));
    }
}
