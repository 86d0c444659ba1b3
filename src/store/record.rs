//! Config records and the rules for merging and persisting them.

use serde_json::{Map, Value};

/// A config record: string keys mapped to scalar or structured values.
pub type Record = Map<String, Value>;

/// Marker requesting a destructive update.
pub const FORCE: &str = "FORCE";
/// Marker requesting a deep merge of map-valued keys.
pub const NESTED: &str = "NESTED";

/// Keys starting with this character are transient and never written to disk.
pub const RESERVED_PREFIX: char = '_';

pub const CONTROL_KEYS: [&str; 2] = [FORCE, NESTED];

/// How an update payload is applied to the current record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeMode {
    Plain,
    Nested,
    Destructive,
}

impl MergeMode {
    /// FORCE wins over NESTED when both are set.
    pub fn of(payload: &Record) -> Self {
        if payload.get(FORCE).is_some_and(is_truthy) {
            Self::Destructive
        } else if payload.get(NESTED).is_some_and(is_truthy) {
            Self::Nested
        } else {
            Self::Plain
        }
    }
}

pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

/// Drops the FORCE/NESTED markers.
pub fn strip_control(mut payload: Record) -> Record {
    for key in CONTROL_KEYS {
        payload.remove(key);
    }
    payload
}

/// Returns the subset of `record` that may be written to disk.
pub fn persistent(record: &Record, denied: &[String]) -> Record {
    record
        .iter()
        .filter(|(key, _)| {
            !key.starts_with(RESERVED_PREFIX)
                && !CONTROL_KEYS.contains(&key.as_str())
                && !denied.iter().any(|d| d == *key)
        })
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect()
}

/// Recursively merges `update` into `target`.
///
/// A map value merges into an existing map, replaces a non-map value, and is
/// inserted as-is when the key is absent. Every other value overwrites.
pub fn merge_nested(target: &mut Record, update: Record) {
    for (key, value) in update {
        match value {
            Value::Object(inner) => match target.get_mut(&key) {
                Some(Value::Object(existing)) => merge_nested(existing, inner),
                Some(slot) => {
                    let mut fresh = Record::new();
                    merge_nested(&mut fresh, inner);
                    *slot = Value::Object(fresh);
                }
                None => {
                    target.insert(key, Value::Object(inner));
                }
            },
            other => {
                target.insert(key, other);
            }
        }
    }
}

/// Applies `payload` to `current` according to its markers and returns the result.
pub fn apply(current: &Record, essentials: &Record, payload: Record) -> Record {
    let mode = MergeMode::of(&payload);
    let payload = strip_control(payload);
    match mode {
        MergeMode::Destructive => {
            let mut fresh = essentials.clone();
            fresh.extend(payload);
            fresh
        }
        MergeMode::Nested => {
            let mut merged = current.clone();
            merge_nested(&mut merged, payload);
            merged
        }
        MergeMode::Plain => {
            let mut merged = current.clone();
            merged.extend(payload);
            merged
        }
    }
}

/// Keys of `essentials` absent from `record`.
pub fn missing_keys<'a>(record: &Record, essentials: &'a Record) -> Vec<&'a str> {
    essentials
        .keys()
        .filter(|key| !record.contains_key(*key))
        .map(String::as_str)
        .collect()
}

/// `record` reduced to `keys`, in the record's own order.
pub fn select(record: &Record, keys: &[String]) -> Record {
    record
        .iter()
        .filter(|(key, _)| keys.iter().any(|k| k == *key))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect()
}

/// Entries of `update` absent from `current` or holding a different value there.
pub fn delta(current: &Record, update: &Record) -> Record {
    update
        .iter()
        .filter(|(key, value)| current.get(*key) != Some(*value))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect()
}
