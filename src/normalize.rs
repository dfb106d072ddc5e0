//! Entity normalization.
//!
//! Decoded payloads are heterogeneous: the same concept shows up under
//! different keys depending on which RPC produced the message. Each field is
//! resolved through an ordered rule table, first match wins.
//!
//! ```text
//! Field        | Keys tried (in order)
//! -------------|------------------------------------------------------
//! entity list  | entities, entity, updates, actors, objects
//! monster_id   | monster_id, mob_id, info.{monster_id,id}, common_info.{..}
//! boss_name    | boss_name, name, display_name
//! channel      | channel, line, channel_number
//! map_id       | map_id, map, zone_id
//! instance_id  | instance_id, instance
//! hp           | {life,hp,health}.{current,max}, life, hp_pct, hp_percent
//! timestamp    | server_time_ms, timestamp_ms, server_time, time
//! ```

use crate::clock::Clock;
use serde_json::{Map, Value};

type Record = Map<String, Value>;

/// Keys that may hold a list of entity records.
pub const ENTITY_LIST_KEYS: &[&str] = &["entities", "entity", "updates", "actors", "objects"];

/// Message-level keys that may hold the server timestamp.
pub const TIMESTAMP_KEYS: &[&str] = &["server_time_ms", "timestamp_ms", "server_time", "time"];

/// A single lookup rule: read `key` and try to extract a value from it.
struct Rule<T> {
    key: &'static str,
    extract: fn(&Value) -> Option<T>,
}

const fn rule<T>(key: &'static str, extract: fn(&Value) -> Option<T>) -> Rule<T> {
    Rule { key, extract }
}

const MONSTER_ID_RULES: &[Rule<i64>] = &[
    rule("monster_id", truthy_id),
    rule("mob_id", truthy_id),
];

/// Nested records searched when the entity has no truthy id of its own.
const INFO_KEYS: &[&str] = &["info", "common_info"];

const INFO_ID_RULES: &[Rule<i64>] = &[rule("monster_id", truthy_id), rule("id", truthy_id)];

const NAME_RULES: &[Rule<String>] = &[
    rule("boss_name", non_empty_str),
    rule("name", non_empty_str),
    rule("display_name", non_empty_str),
];

const CHANNEL_RULES: &[Rule<i64>] = &[
    rule("channel", strict_int),
    rule("line", strict_int),
    rule("channel_number", strict_int),
];

const MAP_RULES: &[Rule<i64>] = &[
    rule("map_id", strict_int),
    rule("map", strict_int),
    rule("zone_id", strict_int),
];

const INSTANCE_RULES: &[Rule<String>] = &[
    rule("instance_id", non_empty_str),
    rule("instance", non_empty_str),
];

/// Keys that may hold a `{current, max}` health record.
const HEALTH_RECORD_KEYS: &[&str] = &["life", "hp", "health"];

const CURRENT_HP_RULES: &[Rule<f64>] = &[
    rule("current", number),
    rule("current_hp", number),
    rule("hp", number),
];

const MAX_HP_RULES: &[Rule<f64>] = &[
    rule("max", truthy_number),
    rule("max_hp", truthy_number),
    rule("max_hp_value", truthy_number),
];

/// Explicit percentage fields, used when there is no health record.
const PCT_RULES: &[Rule<f64>] = &[
    rule("life", strict_number),
    rule("hp_pct", strict_number),
    rule("hp_percent", strict_number),
];

/// A canonical entity reading extracted from one candidate record.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct NormalizedEntity {
    pub monster_id: i64,
    /// Clamped to `[0, 100]`. `None` when the record carried no usable HP.
    pub hp_pct: Option<f64>,
    pub boss_name: Option<String>,
    pub channel: Option<i64>,
    pub map_id: Option<i64>,
    pub instance_id: Option<String>,
}

/// Extract every resolvable entity from a message payload, in source order.
///
/// Lists found under any of [`ENTITY_LIST_KEYS`] are concatenated in key
/// order. When none is found the payload itself is the only candidate.
/// Candidates without a resolvable integer monster id are dropped.
pub fn normalize_entities(data: &Value) -> Vec<NormalizedEntity> {
    let Some(root) = data.as_object() else {
        return Vec::new();
    };

    let mut candidates: Vec<&Value> = ENTITY_LIST_KEYS
        .iter()
        .filter_map(|key| root.get(*key).and_then(Value::as_array))
        .flatten()
        .collect();

    if candidates.is_empty() {
        candidates.push(data);
    }

    candidates
        .into_iter()
        .filter_map(Value::as_object)
        .filter_map(normalize_entity)
        .collect()
}

/// Normalize a single entity record.
pub fn normalize_entity(record: &Record) -> Option<NormalizedEntity> {
    let monster_id = match first_truthy(record, MONSTER_ID_RULES) {
        Some((rule, value)) => (rule.extract)(value),
        None => INFO_KEYS
            .iter()
            .find_map(|key| record.get(*key).filter(|v| is_truthy(v)))
            .and_then(Value::as_object)
            .and_then(|info| first_truthy(info, INFO_ID_RULES))
            .and_then(|(rule, value)| (rule.extract)(value)),
    }?;

    Some(NormalizedEntity {
        monster_id,
        hp_pct: resolve_hp_pct(record),
        boss_name: first_match(record, NAME_RULES),
        channel: first_match(record, CHANNEL_RULES),
        map_id: first_match(record, MAP_RULES),
        instance_id: first_match(record, INSTANCE_RULES),
    })
}

/// Resolve the message timestamp in milliseconds, falling back to `clock`.
pub fn resolve_timestamp(data: &Value, clock: &dyn Clock) -> i64 {
    data.as_object()
        .and_then(|root| {
            TIMESTAMP_KEYS
                .iter()
                .find_map(|key| root.get(*key).and_then(timestamp_value))
        })
        .unwrap_or_else(|| clock.now_ms())
}

fn resolve_hp_pct(record: &Record) -> Option<f64> {
    let health = HEALTH_RECORD_KEYS
        .iter()
        .find_map(|key| record.get(*key).filter(|v| is_truthy(v)));

    match health {
        Some(Value::Object(health)) => {
            let current = first_match(health, CURRENT_HP_RULES)?;
            let max = first_match(health, MAX_HP_RULES)?;
            if max <= 0.0 {
                return None;
            }
            Some(clamp_pct(current / max * 100.0))
        }
        _ => first_match(record, PCT_RULES).map(clamp_pct),
    }
}

fn first_match<T>(record: &Record, rules: &[Rule<T>]) -> Option<T> {
    rules
        .iter()
        .find_map(|rule| record.get(rule.key).and_then(rule.extract))
}

/// The first rule whose key holds a truthy value. That value decides on its
/// own: later keys are not consulted even if it fails to extract.
fn first_truthy<'a, T>(
    record: &'a Record,
    rules: &'a [Rule<T>],
) -> Option<(&'a Rule<T>, &'a Value)> {
    rules.iter().find_map(|rule| {
        record
            .get(rule.key)
            .filter(|value| is_truthy(value))
            .map(|value| (rule, value))
    })
}

fn clamp_pct(value: f64) -> f64 {
    value.clamp(0.0, 100.0)
}

/// Falsy values (null, false, 0, "", empty containers) count as absent.
fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

/// An integer id: JSON integers, integral floats, or numeric strings. Zero is absent.
fn truthy_id(value: &Value) -> Option<i64> {
    if !is_truthy(value) {
        return None;
    }
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn strict_int(value: &Value) -> Option<i64> {
    value.as_i64()
}

fn strict_number(value: &Value) -> Option<f64> {
    value.as_f64().filter(|f| f.is_finite())
}

/// A number or numeric string.
fn number(value: &Value) -> Option<f64> {
    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    parsed.filter(|f| f.is_finite())
}

fn truthy_number(value: &Value) -> Option<f64> {
    if is_truthy(value) {
        number(value)
    } else {
        None
    }
}

fn non_empty_str(value: &Value) -> Option<String> {
    value.as_str().filter(|s| !s.is_empty()).map(str::to_string)
}

/// Integers pass through, floats are truncated to whole milliseconds.
fn timestamp_value(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use serde_json::json;

    #[test]
    fn test_entities_from_list() {
        let data = json!({
            "entities": [
                {"monster_id": 1, "hp_pct": 50.0},
                {"monster_id": 2, "hp_pct": 25.0}
            ]
        });

        let entities = normalize_entities(&data);
        assert_eq!(entities.len(), 2);
        assert_eq!(entities[0].monster_id, 1);
        assert_eq!(entities[1].hp_pct, Some(25.0));
    }

    #[test]
    fn test_lists_concatenate_in_key_order() {
        let data = json!({
            "actors": [{"monster_id": 3, "hp_pct": 1}],
            "entities": [{"monster_id": 1, "hp_pct": 1}],
            "updates": [{"monster_id": 2, "hp_pct": 1}]
        });

        let ids: Vec<i64> = normalize_entities(&data).iter().map(|e| e.monster_id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[test]
    fn test_payload_is_single_candidate_without_list() {
        let data = json!({"mob_id": 42, "hp_percent": 12.5, "entities": []});

        let entities = normalize_entities(&data);
        assert_eq!(entities.len(), 1);
        assert_eq!(entities[0].monster_id, 42);
        assert_eq!(entities[0].hp_pct, Some(12.5));
    }

    #[test]
    fn test_non_object_candidates_are_skipped() {
        let data = json!({"entities": [7, "x", null, {"monster_id": 9}]});

        let entities = normalize_entities(&data);
        assert_eq!(entities.len(), 1);
        assert_eq!(entities[0].monster_id, 9);
        assert_eq!(entities[0].hp_pct, None);
    }

    #[test]
    fn test_monster_id_from_info_record() {
        let nested = json!({"info": {"id": "80006"}, "hp_pct": 10.0});
        let entity = normalize_entity(nested.as_object().unwrap()).unwrap();
        assert_eq!(entity.monster_id, 80006);

        let common = json!({"common_info": {"monster_id": 77}});
        let entity = normalize_entity(common.as_object().unwrap()).unwrap();
        assert_eq!(entity.monster_id, 77);
    }

    #[test]
    fn test_unresolvable_ids_are_dropped() {
        for record in [
            json!({"hp_pct": 50.0}),
            json!({"monster_id": "boss", "hp_pct": 50.0}),
            json!({"monster_id": 1.5, "hp_pct": 50.0}),
            json!({"monster_id": 0, "hp_pct": 50.0}),
            json!({"info": "nope"}),
        ] {
            assert!(normalize_entity(record.as_object().unwrap()).is_none(), "{record}");
        }
    }

    #[test]
    fn test_first_truthy_id_key_decides() {
        // An unparsable id does not fall through to later keys or info records.
        let record = json!({
            "monster_id": "boss",
            "mob_id": 7,
            "info": {"monster_id": 8},
            "hp_pct": 50.0
        });
        assert!(normalize_entity(record.as_object().unwrap()).is_none());

        // A falsy id does.
        let record = json!({"monster_id": 0, "mob_id": 7, "hp_pct": 50.0});
        let entity = normalize_entity(record.as_object().unwrap()).unwrap();
        assert_eq!(entity.monster_id, 7);

        let record = json!({"monster_id": "", "info": {"monster_id": null, "id": "8"}});
        let entity = normalize_entity(record.as_object().unwrap()).unwrap();
        assert_eq!(entity.monster_id, 8);

        let record = json!({"info": {"monster_id": "x", "id": 9}});
        assert!(normalize_entity(record.as_object().unwrap()).is_none());
    }

    #[test]
    fn test_hp_from_health_record() {
        let record = json!({"monster_id": 1, "life": {"current": 2500, "max": 10000}});
        let entity = normalize_entity(record.as_object().unwrap()).unwrap();
        assert_eq!(entity.hp_pct, Some(25.0));

        let record = json!({"monster_id": 1, "health": {"current_hp": "0", "max_hp": "400"}});
        let entity = normalize_entity(record.as_object().unwrap()).unwrap();
        assert_eq!(entity.hp_pct, Some(0.0));
    }

    #[test]
    fn test_hp_is_clamped() {
        let record = json!({"monster_id": 1, "hp": {"current": 150, "max": 100}});
        let entity = normalize_entity(record.as_object().unwrap()).unwrap();
        assert_eq!(entity.hp_pct, Some(100.0));

        let record = json!({"monster_id": 1, "hp_pct": -4.0});
        let entity = normalize_entity(record.as_object().unwrap()).unwrap();
        assert_eq!(entity.hp_pct, Some(0.0));
    }

    #[test]
    fn test_bad_max_yields_no_hp() {
        for health in [
            json!({"current": 10}),
            json!({"current": 10, "max": 0}),
            json!({"current": 10, "max": -5}),
            json!({"current": 10, "max": "lots"}),
            json!({"max": 100}),
        ] {
            let record = json!({"monster_id": 1, "life": health});
            let entity = normalize_entity(record.as_object().unwrap()).unwrap();
            assert_eq!(entity.hp_pct, None, "{record}");
        }
    }

    #[test]
    fn test_numeric_life_beats_explicit_pct() {
        let record = json!({"monster_id": 1, "life": 40, "hp_pct": 90.0});
        let entity = normalize_entity(record.as_object().unwrap()).unwrap();
        assert_eq!(entity.hp_pct, Some(40.0));
    }

    #[test]
    fn test_metadata_first_match_wins() {
        let record = json!({
            "monster_id": 1,
            "name": "Fallback",
            "display_name": "Other",
            "line": 3,
            "channel_number": 9,
            "zone_id": 12,
            "channel": "not-an-int",
            "instance": "abc"
        });
        let entity = normalize_entity(record.as_object().unwrap()).unwrap();

        assert_eq!(entity.boss_name.as_deref(), Some("Fallback"));
        assert_eq!(entity.channel, Some(3));
        assert_eq!(entity.map_id, Some(12));
        assert_eq!(entity.instance_id.as_deref(), Some("abc"));
    }

    #[test]
    fn test_timestamp_resolution() {
        let clock = FixedClock::new(999);

        assert_eq!(resolve_timestamp(&json!({"server_time_ms": 1234}), &clock), 1234);
        assert_eq!(resolve_timestamp(&json!({"time": 1500.9}), &clock), 1500);
        assert_eq!(
            resolve_timestamp(&json!({"timestamp_ms": "soon", "server_time": 7}), &clock),
            7
        );
        assert_eq!(resolve_timestamp(&json!({}), &clock), 999);
        assert_eq!(resolve_timestamp(&json!([1, 2]), &clock), 999);
    }
}
