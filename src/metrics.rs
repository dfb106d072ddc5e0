//! Run counters written to the metrics file when a run ends.

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum MetricsError {
    #[error("failed to encode metrics: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("failed to write metrics: {0}")]
    Write(#[from] std::io::Error),
}

/// Counters for a single run.
///
/// Fields are declared in alphabetical order so the written file has
/// sorted keys.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunMetrics {
    /// Messages consumed from the source
    pub decoded: u64,
    /// Boss events emitted by the tracker
    pub events: u64,
    /// Capture frames parsed; always 0 when replaying decoded messages
    pub frames: u64,
    /// Events delivered with a 2xx response or skipped by dry-run
    pub posted: u64,
}

impl RunMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Write as pretty-printed JSON, replacing any previous file.
    pub fn write_to(&self, path: impl AsRef<Path>) -> Result<(), MetricsError> {
        let path = path.as_ref();
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;

        info!(
            path = %path.display(),
            decoded = self.decoded,
            events = self.events,
            posted = self.posted,
            "Metrics written"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_sorted_pretty_json() {
        let path = std::env::temp_dir().join(format!("bossfeed-metrics-{}.json", std::process::id()));
        let metrics = RunMetrics {
            decoded: 3,
            events: 2,
            frames: 0,
            posted: 1,
        };

        metrics.write_to(&path).unwrap();

        let written = std::fs::read_to_string(&path).unwrap();
        assert_eq!(
            written,
            "{\n  \"decoded\": 3,\n  \"events\": 2,\n  \"frames\": 0,\n  \"posted\": 1\n}"
        );
        let parsed: RunMetrics = serde_json::from_str(&written).unwrap();
        assert_eq!(parsed, metrics);

        std::fs::remove_file(path).ok();
    }

    #[test]
    fn test_write_to_missing_directory_fails() {
        let result = RunMetrics::new().write_to("/nonexistent/dir/metrics.json");
        assert!(matches!(result, Err(MetricsError::Write(_))));
    }
}
