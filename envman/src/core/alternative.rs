//! Alternative values: the per-variable history buckets and their invariants.
//!
//! A bucket is a most-recent-first list of at most [`MAX_ALTERNATIVES`]
//! entries, unique by `value`. Everything here is pure; persistence lives in
//! [`crate::io::alternatives`].

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::core::scope::Scope;

/// Upper bound on entries kept per `(scope, name)` bucket.
pub const MAX_ALTERNATIVES: usize = 20;

/// One remembered value for a variable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Alternative {
    pub value: String,
    #[serde(default)]
    pub note: String,
    /// Milliseconds since the Unix epoch. Absent on entries migrated from bare strings.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub added_at: Option<i64>,
    /// Fields written by other tools, carried through untouched.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Alternative {
    pub fn new(value: impl Into<String>, note: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            note: note.into(),
            added_at: None,
            extra: Map::new(),
        }
    }

    pub fn added_at(mut self, millis: i64) -> Self {
        self.added_at = Some(millis);
        self
    }
}

/// Root of the persisted alternatives blob.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AlternativesRoot {
    #[serde(default)]
    pub system: BTreeMap<String, Vec<Alternative>>,
    #[serde(default)]
    pub user: BTreeMap<String, Vec<Alternative>>,
}

impl AlternativesRoot {
    pub fn scope(&self, scope: Scope) -> &BTreeMap<String, Vec<Alternative>> {
        match scope {
            Scope::System => &self.system,
            Scope::User => &self.user,
        }
    }

    pub fn scope_mut(&mut self, scope: Scope) -> &mut BTreeMap<String, Vec<Alternative>> {
        match scope {
            Scope::System => &mut self.system,
            Scope::User => &mut self.user,
        }
    }

    pub fn bucket_count(&self) -> usize {
        self.system.len() + self.user.len()
    }
}

/// Insert `value` at the front of `bucket`, or promote the existing entry.
///
/// A promoted entry keeps its `added_at`; its note is replaced only by a
/// non-empty `note`. Returns whether the bucket changed.
pub fn promote_or_insert(bucket: &mut Vec<Alternative>, value: &str, note: &str, now_ms: i64) -> bool {
    match bucket.iter().position(|item| item.value == value) {
        Some(index) => {
            let note_changes = !note.is_empty() && bucket[index].note != note;
            if index == 0 && !note_changes {
                return false;
            }
            let mut item = bucket.remove(index);
            if note_changes {
                item.note = note.to_string();
            }
            bucket.insert(0, item);
        }
        None => {
            bucket.insert(0, Alternative::new(value, note).added_at(now_ms));
            bucket.truncate(MAX_ALTERNATIVES);
        }
    }
    true
}

/// Normalize one loosely-typed list element.
///
/// Bare strings become `{value, note: ""}`, objects carrying `value` are kept,
/// anything else is stringified.
pub fn normalize_entry(entry: &Value) -> Alternative {
    match entry {
        Value::String(value) => Alternative::new(value.clone(), ""),
        Value::Object(map) if map.contains_key("value") => from_object(map),
        other => Alternative::new(js_string(other), ""),
    }
}

fn from_object(map: &Map<String, Value>) -> Alternative {
    let mut extra = map.clone();
    let value = match extra.remove("value") {
        Some(Value::String(value)) => value,
        Some(other) => js_string(&other),
        None => String::new(),
    };
    let note = match extra.remove("note") {
        Some(Value::String(note)) => note,
        Some(Value::Null) | None => String::new(),
        Some(other) => js_string(&other),
    };
    let added_at = match extra.remove("addedAt") {
        Some(raw) => match raw.as_i64().or_else(|| raw.as_f64().map(|f| f as i64)) {
            Some(millis) => Some(millis),
            None => {
                extra.insert("addedAt".to_string(), raw);
                None
            }
        },
        None => None,
    };
    Alternative {
        value,
        note,
        added_at,
        extra,
    }
}

/// Stringify a JSON value the way a loosely-typed host would.
fn js_string(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => match n.as_f64() {
            Some(f) if f.fract() == 0.0 && f.abs() < 1e15 => format!("{}", f as i64),
            _ => n.to_string(),
        },
        Value::String(s) => s.clone(),
        Value::Array(items) => items
            .iter()
            .map(|item| match item {
                Value::Null => String::new(),
                other => js_string(other),
            })
            .collect::<Vec<_>>()
            .join(","),
        Value::Object(_) => "[object Object]".to_string(),
    }
}

/// Normalize a list; `None` when `list` is not an array or is empty.
///
/// Duplicate values keep their first (most recent) occurrence and the result
/// is capped at [`MAX_ALTERNATIVES`].
pub fn normalize_list(list: &Value) -> Option<Vec<Alternative>> {
    let items = list.as_array()?;
    if items.is_empty() {
        return None;
    }
    let mut seen = HashSet::new();
    let mut bucket: Vec<Alternative> = items
        .iter()
        .map(normalize_entry)
        .filter(|item| seen.insert(item.value.clone()))
        .collect();
    bucket.truncate(MAX_ALTERNATIVES);
    Some(bucket)
}

/// Normalize a whole blob (current or legacy shape) into an [`AlternativesRoot`].
///
/// Non-object scopes become empty, non-array buckets and blank names are
/// dropped. Pure: the same blob always yields the same root.
pub fn normalize_root(blob: &Value) -> AlternativesRoot {
    let mut root = AlternativesRoot::default();
    for scope in Scope::ALL {
        let Some(buckets) = blob.get(scope.as_str()).and_then(Value::as_object) else {
            continue;
        };
        let target = root.scope_mut(scope);
        for (name, list) in buckets {
            if name.trim().is_empty() || !list.is_array() {
                continue;
            }
            target.insert(name.clone(), normalize_list(list).unwrap_or_default());
        }
    }
    root
}
