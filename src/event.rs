//! Core event types for Bossfeed.
//!
//! A [`DecodedMessage`] is what the upstream protocol decoder hands us. The
//! tracker turns those into [`BossEvent`]s, which the publisher delivers to
//! the ingestion API.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// A structured game-state message produced by the external decoder.
///
/// # Example
///
/// ```json
/// {
///   "method_id": 46,
///   "message_type": "SyncToMeDeltaInfo",
///   "data": {
///     "timestamp_ms": 1710000000000,
///     "entities": [{"monster_id": 80006, "hp_pct": 75.0}]
///   }
/// }
/// ```
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct DecodedMessage {
    /// RPC method identifier of the frame this message came from
    #[serde(default)]
    pub method_id: i64,

    /// Decoder's name for the message type
    #[serde(default = "default_message_type")]
    pub message_type: String,

    /// Arbitrary nested payload
    #[serde(default = "empty_object")]
    pub data: Value,
}

fn default_message_type() -> String {
    "mock".to_string()
}

fn empty_object() -> Value {
    Value::Object(serde_json::Map::new())
}

impl DecodedMessage {
    /// Create a new message
    pub fn new(method_id: i64, message_type: impl Into<String>, data: Value) -> Self {
        Self {
            method_id,
            message_type: message_type.into(),
            data,
        }
    }
}

/// Lifecycle stage of an encounter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventType {
    Start,
    Tick,
    End,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Start => "start",
            EventType::Tick => "tick",
            EventType::End => "end",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A boss encounter event derived from successive HP readings.
///
/// `hp_pct` is always within `[0, 100]` and rounded to two decimals.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BossEvent {
    pub event_type: EventType,
    pub monster_id: i64,
    pub boss_name: Option<String>,
    pub hp_pct: f64,
    pub timestamp_ms: i64,
    pub channel: Option<i64>,
    pub map_id: Option<i64>,
    pub instance_id: Option<String>,
}

impl BossEvent {
    /// Create an event with no encounter metadata attached
    pub fn new(event_type: EventType, monster_id: i64, hp_pct: f64, timestamp_ms: i64) -> Self {
        Self {
            event_type,
            monster_id,
            boss_name: None,
            hp_pct: round_pct(hp_pct),
            timestamp_ms,
            channel: None,
            map_id: None,
            instance_id: None,
        }
    }

    pub fn with_boss_name(mut self, name: impl Into<String>) -> Self {
        self.boss_name = Some(name.into());
        self
    }

    pub fn with_channel(mut self, channel: i64) -> Self {
        self.channel = Some(channel);
        self
    }

    pub fn with_map_id(mut self, map_id: i64) -> Self {
        self.map_id = Some(map_id);
        self
    }

    pub fn with_instance_id(mut self, instance_id: impl Into<String>) -> Self {
        self.instance_id = Some(instance_id.into());
        self
    }
}

/// Round an HP percentage to two decimals.
pub fn round_pct(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
