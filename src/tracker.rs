//! Encounter state tracking.
//!
//! The [`EncounterTracker`] keeps one [`EncounterState`] per monster id and
//! derives `start`/`tick`/`end` events from successive HP readings.
//!
//! # Transitions
//!
//! ```text
//! reading hp, state s                        | emits
//! -------------------------------------------|---------------------------
//! !s.active && hp < 100                      | start(hp)
//! s.active && hp > s.last_hp + 5             | end(s.last_hp), start(hp)
//! !s.active && hp >= 100                     | nothing (idle)
//! then, if s.active && |hp - s.last_hp| >= t | tick(hp)
//! then, if s.active && hp <= 0               | end(0)
//! ```
//!
//! States are never evicted: a long-running process accumulates one entry
//! per monster id ever seen until [`EncounterTracker::reset`] is called.

use crate::clock::{Clock, SystemClock};
use crate::event::{round_pct, BossEvent, DecodedMessage, EventType};
use crate::normalize::{normalize_entities, resolve_timestamp, NormalizedEntity};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

/// Default minimum HP change (in percentage points) that produces a tick.
pub const DEFAULT_TICK_THRESHOLD: f64 = 0.5;

/// Upward HP jump while active that is read as a fresh encounter.
const RESET_JUMP_PCT: f64 = 5.0;

/// Errors raised while constructing a tracker.
#[derive(Error, Debug)]
pub enum TrackerError {
    #[error("boss mapping not found: {}", .0.display())]
    MappingNotFound(PathBuf),

    #[error("failed to read boss mapping {}: {source}", .path.display())]
    MappingRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse boss mapping: {0}")]
    MappingParse(#[from] serde_json::Error),

    #[error("boss mapping key '{0}' is not an integer monster id")]
    InvalidMonsterId(String),
}

/// Static monster id -> display name lookup.
#[derive(Debug, Clone, Default)]
pub struct BossNames {
    names: HashMap<i64, String>,
}

impl BossNames {
    /// Parse a JSON object of `{"<monster_id>": "<name>"}`.
    pub fn from_json_str(json: &str) -> Result<Self, TrackerError> {
        let raw: HashMap<String, String> = serde_json::from_str(json)?;
        let names = raw
            .into_iter()
            .map(|(key, name)| {
                key.trim()
                    .parse::<i64>()
                    .map(|id| (id, name))
                    .map_err(|_| TrackerError::InvalidMonsterId(key))
            })
            .collect::<Result<HashMap<_, _>, _>>()?;

        Ok(Self { names })
    }

    /// Load the lookup table from a JSON file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, TrackerError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(TrackerError::MappingNotFound(path.to_path_buf()));
        }

        let content = fs::read_to_string(path).map_err(|source| TrackerError::MappingRead {
            path: path.to_path_buf(),
            source,
        })?;
        let names = Self::from_json_str(&content)?;

        info!(path = %path.display(), bosses = names.len(), "Loaded boss mapping");
        Ok(names)
    }

    pub fn get(&self, monster_id: i64) -> Option<&str> {
        self.names.get(&monster_id).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

impl FromIterator<(i64, String)> for BossNames {
    fn from_iter<I: IntoIterator<Item = (i64, String)>>(iter: I) -> Self {
        Self {
            names: iter.into_iter().collect(),
        }
    }
}

/// Per-monster encounter state.
#[derive(Debug, Clone, PartialEq)]
pub struct EncounterState {
    pub monster_id: i64,
    /// Filled once, never replaced
    pub boss_name: Option<String>,
    pub last_hp_pct: f64,
    pub channel: Option<i64>,
    pub map_id: Option<i64>,
    pub instance_id: Option<String>,
    pub active: bool,
    pub last_timestamp_ms: i64,
}

impl EncounterState {
    fn new(reading: &NormalizedEntity, boss_name: Option<String>) -> Self {
        Self {
            monster_id: reading.monster_id,
            boss_name,
            last_hp_pct: 100.0,
            channel: reading.channel,
            map_id: reading.map_id,
            instance_id: reading.instance_id.clone(),
            active: false,
            last_timestamp_ms: 0,
        }
    }

    /// Merge metadata from a new reading.
    ///
    /// Zero channel/map ids do not overwrite earlier values.
    fn merge(&mut self, reading: &NormalizedEntity, boss_name: Option<String>) {
        if self.boss_name.is_none() {
            self.boss_name = boss_name;
        }
        if let Some(channel) = reading.channel.filter(|c| *c != 0) {
            self.channel = Some(channel);
        }
        if let Some(map_id) = reading.map_id.filter(|m| *m != 0) {
            self.map_id = Some(map_id);
        }
        if let Some(instance_id) = &reading.instance_id {
            self.instance_id = Some(instance_id.clone());
        }
    }

    fn record(&mut self, hp_pct: f64, timestamp_ms: i64) {
        self.last_hp_pct = hp_pct;
        self.last_timestamp_ms = timestamp_ms;
    }

    fn event(&self, event_type: EventType, hp_pct: f64, timestamp_ms: i64) -> BossEvent {
        BossEvent {
            event_type,
            monster_id: self.monster_id,
            boss_name: self.boss_name.clone(),
            hp_pct: round_pct(hp_pct),
            timestamp_ms,
            channel: self.channel,
            map_id: self.map_id,
            instance_id: self.instance_id.clone(),
        }
    }
}

/// Derives encounter lifecycle events from decoded messages.
pub struct EncounterTracker {
    names: BossNames,
    states: HashMap<i64, EncounterState>,
    tick_threshold: f64,
    clock: Arc<dyn Clock>,
}

impl EncounterTracker {
    /// Create a tracker with the default tick threshold and the system clock.
    pub fn new(names: BossNames) -> Self {
        Self {
            names,
            states: HashMap::new(),
            tick_threshold: DEFAULT_TICK_THRESHOLD,
            clock: Arc::new(SystemClock),
        }
    }

    /// Create a tracker from a boss mapping file.
    ///
    /// Fails if the file is missing or malformed.
    pub fn from_mapping_file<P: AsRef<Path>>(path: P) -> Result<Self, TrackerError> {
        Ok(Self::new(BossNames::load(path)?))
    }

    pub fn with_tick_threshold(mut self, threshold: f64) -> Self {
        self.tick_threshold = threshold;
        self
    }

    /// Use `clock` for messages that carry no timestamp
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn tick_threshold(&self) -> f64 {
        self.tick_threshold
    }

    /// Current state for a monster, if it has been seen.
    pub fn state(&self, monster_id: i64) -> Option<&EncounterState> {
        self.states.get(&monster_id)
    }

    /// Number of monsters with tracked state.
    pub fn tracked(&self) -> usize {
        self.states.len()
    }

    /// Forget all encounter state.
    pub fn reset(&mut self) {
        debug!(tracked = self.states.len(), "Resetting encounter state");
        self.states.clear();
    }

    /// Process one message and return the events it produces, in entity order.
    pub fn process(&mut self, message: &DecodedMessage) -> Vec<BossEvent> {
        let timestamp_ms = resolve_timestamp(&message.data, self.clock.as_ref());
        let readings = normalize_entities(&message.data);

        let mut events = Vec::new();
        for reading in &readings {
            let Some(hp_pct) = reading.hp_pct else {
                continue;
            };
            self.apply(reading, hp_pct, timestamp_ms, &mut events);
        }

        if !events.is_empty() {
            debug!(
                method_id = message.method_id,
                message_type = %message.message_type,
                readings = readings.len(),
                events = events.len(),
                "Derived encounter events"
            );
        }

        events
    }

    fn apply(
        &mut self,
        reading: &NormalizedEntity,
        hp_pct: f64,
        timestamp_ms: i64,
        events: &mut Vec<BossEvent>,
    ) {
        let boss_name = reading
            .boss_name
            .clone()
            .or_else(|| self.names.get(reading.monster_id).map(str::to_string));

        let state = self
            .states
            .entry(reading.monster_id)
            .or_insert_with(|| EncounterState::new(reading, boss_name.clone()));
        state.merge(reading, boss_name);

        if !state.active && hp_pct < 100.0 {
            info!(
                monster_id = state.monster_id,
                boss_name = ?state.boss_name,
                hp_pct,
                "Encounter started"
            );
            events.push(state.event(EventType::Start, hp_pct, timestamp_ms));
            state.active = true;
        } else if state.active && hp_pct > state.last_hp_pct + RESET_JUMP_PCT {
            info!(
                monster_id = state.monster_id,
                from = state.last_hp_pct,
                to = hp_pct,
                "HP jumped during encounter, restarting"
            );
            events.push(state.event(EventType::End, state.last_hp_pct, timestamp_ms));
            events.push(state.event(EventType::Start, hp_pct, timestamp_ms));
        } else if !state.active && hp_pct >= 100.0 {
            state.record(hp_pct, timestamp_ms);
            return;
        }

        if state.active && (hp_pct - state.last_hp_pct).abs() >= self.tick_threshold {
            events.push(state.event(EventType::Tick, hp_pct, timestamp_ms));
        }

        if state.active && hp_pct <= 0.0 {
            info!(
                monster_id = state.monster_id,
                boss_name = ?state.boss_name,
                "Encounter ended"
            );
            events.push(state.event(EventType::End, 0.0, timestamp_ms));
            state.active = false;
        }

        state.record(hp_pct, timestamp_ms);
    }
}
