//! Row change events pushed by the realtime feed
//!
//! Realtime payloads arrive in several shapes depending on the transport
//! (`event` / `eventType` / `type`, `new` / `record`, `old` / `old_record`).
//! Everything is normalised into [`ChangeEvent`] before it reaches a reducer.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

/// Kind of row change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeOp {
    Insert,
    Update,
    Delete,
}

impl ChangeOp {
    /// Parses an event name case-insensitively (`insert`, `INSERT`, ...)
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_ascii_uppercase().as_str() {
            "INSERT" => Some(ChangeOp::Insert),
            "UPDATE" => Some(ChangeOp::Update),
            "DELETE" => Some(ChangeOp::Delete),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeOp::Insert => "INSERT",
            ChangeOp::Update => "UPDATE",
            ChangeOp::Delete => "DELETE",
        }
    }
}

/// Event filter used when subscribing (`*` matches every op)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EventKind {
    #[default]
    All,
    Only(ChangeOp),
}

impl EventKind {
    pub fn matches(&self, op: ChangeOp) -> bool {
        match self {
            EventKind::All => true,
            EventKind::Only(o) => *o == op,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::All => "*",
            EventKind::Only(op) => op.as_str(),
        }
    }
}

/// A single row change for a subscribed table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub table: String,
    pub op: ChangeOp,
    /// Row after the change (INSERT / UPDATE)
    #[serde(default)]
    pub new: Option<Value>,
    /// Row before the change; for DELETE this may only carry the key columns
    #[serde(default)]
    pub old: Option<Value>,
}

impl ChangeEvent {
    pub fn insert(table: impl Into<String>, row: Value) -> Self {
        Self {
            table: table.into(),
            op: ChangeOp::Insert,
            new: Some(row),
            old: None,
        }
    }

    pub fn update(table: impl Into<String>, row: Value, old: Option<Value>) -> Self {
        Self {
            table: table.into(),
            op: ChangeOp::Update,
            new: Some(row),
            old,
        }
    }

    pub fn delete(table: impl Into<String>, old: Value) -> Self {
        Self {
            table: table.into(),
            op: ChangeOp::Delete,
            new: None,
            old: Some(old),
        }
    }

    /// Normalises a raw realtime payload.
    ///
    /// `table` is used when the payload itself does not name the table.
    /// Returns `None` for payloads without a recognisable op, and for
    /// INSERT/UPDATE without a row or DELETE without an old row.
    pub fn from_payload(table: &str, payload: &Value) -> Option<Self> {
        let name = ["event", "eventType", "type"]
            .iter()
            .find_map(|k| payload.get(*k).and_then(Value::as_str))?;
        let op = ChangeOp::parse(name)?;

        let pick = |keys: &[&str]| {
            keys.iter()
                .find_map(|k| payload.get(*k))
                .filter(|v| v.is_object())
                .cloned()
        };
        let new = pick(&["new", "record"]);
        // an empty `old` object is what the feed sends when replica identity is not full
        let old = pick(&["old", "old_record"]).filter(|v| {
            v.as_object().map(|m| !m.is_empty()).unwrap_or(false)
        });

        let table = payload
            .get("table")
            .and_then(Value::as_str)
            .unwrap_or(table)
            .to_string();

        match op {
            ChangeOp::Insert | ChangeOp::Update if new.is_none() => {
                debug!("[Event] {} payload without row, dropped", op.as_str());
                None
            }
            ChangeOp::Delete if old.is_none() => {
                debug!("[Event] DELETE payload without old row, dropped");
                None
            }
            _ => Some(Self { table, op, new, old }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn normalises_event_type_and_record_aliases() {
        let payload = json!({
            "eventType": "update",
            "record": {"id": "a", "name": "x"},
            "old_record": {"id": "a"}
        });
        let ev = ChangeEvent::from_payload("communities", &payload).unwrap();
        assert_eq!(ev.op, ChangeOp::Update);
        assert_eq!(ev.table, "communities");
        assert_eq!(ev.new.unwrap()["name"], "x");
        assert_eq!(ev.old.unwrap()["id"], "a");
    }

    #[test]
    fn delete_without_old_row_is_dropped() {
        let payload = json!({"type": "DELETE", "old_record": {}});
        assert!(ChangeEvent::from_payload("t", &payload).is_none());
    }

    #[test]
    fn unknown_event_name_is_dropped() {
        let payload = json!({"event": "TRUNCATE", "new": {"id": "a"}});
        assert!(ChangeEvent::from_payload("t", &payload).is_none());
    }

    #[test]
    fn event_kind_matching() {
        assert!(EventKind::All.matches(ChangeOp::Delete));
        assert!(EventKind::Only(ChangeOp::Insert).matches(ChangeOp::Insert));
        assert!(!EventKind::Only(ChangeOp::Insert).matches(ChangeOp::Update));
    }
}
