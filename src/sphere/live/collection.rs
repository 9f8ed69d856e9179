//! Keyed collection and change-event reducer
//!
//! One generic "keyed collection + event merge" used by every live view.
//! Each view only supplies a key extractor (through [`Row`]) and an optional
//! filter predicate. Merging is id-keyed, so duplicate or out-of-order
//! delivery of the same event converges to the same state.

use crate::sphere::live::event::{ChangeEvent, ChangeOp};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

/// A remote-store row that can live in a [`KeyedCollection`]
pub trait Row: Clone + Send + Sync + Serialize + DeserializeOwned + 'static {
    /// Stable key of this row
    fn row_key(&self) -> String;

    /// Extracts the key from a raw (possibly partial) row.
    ///
    /// DELETE events often only carry the primary key columns, so this must
    /// not require a fully decodable row.
    fn key_of(value: &Value) -> Option<String> {
        match value.get("id")? {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }
}

/// Predicate deciding whether a row belongs in a view
pub type ViewFilter<T> = Arc<dyn Fn(&T) -> bool + Send + Sync>;

/// Ordering kept by a sorted view
pub type ViewOrder<T> = Arc<dyn Fn(&T, &T) -> Ordering + Send + Sync>;

/// Where newly seen rows are placed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InsertAt {
    /// Newest first (lists sorted by `created_at desc`)
    #[default]
    Front,
    /// Oldest first (chat transcripts)
    Back,
}

/// Outcome of folding one event into the collection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Applied {
    Inserted(String),
    Replaced(String),
    Removed(String),
    Ignored,
}

impl Applied {
    pub fn changed(&self) -> bool {
        !matches!(self, Applied::Ignored)
    }
}

/// Ordered, key-unique local projection of a remote table
pub struct KeyedCollection<T: Row> {
    rows: Vec<T>,
    filter: Option<ViewFilter<T>>,
    insert_at: InsertAt,
    order: Option<ViewOrder<T>>,
    capacity: Option<usize>,
    /// Keys pushed out by the capacity since the last `take_evicted`
    evicted: Vec<String>,
}

impl<T: Row> fmt::Debug for KeyedCollection<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyedCollection")
            .field("len", &self.rows.len())
            .field("filtered", &self.filter.is_some())
            .field("insert_at", &self.insert_at)
            .field("sorted", &self.order.is_some())
            .field("capacity", &self.capacity)
            .finish()
    }
}

impl<T: Row> Default for KeyedCollection<T> {
    fn default() -> Self {
        Self::new(InsertAt::Front)
    }
}

impl<T: Row> KeyedCollection<T> {
    pub fn new(insert_at: InsertAt) -> Self {
        Self {
            rows: Vec::new(),
            filter: None,
            insert_at,
            order: None,
            capacity: None,
            evicted: Vec::new(),
        }
    }

    pub fn with_filter(mut self, filter: ViewFilter<T>) -> Self {
        self.set_filter(filter);
        self
    }

    pub fn set_filter(&mut self, filter: ViewFilter<T>) {
        self.filter = Some(filter);
    }

    /// Keeps rows sorted by `order` instead of by arrival
    pub fn set_order(&mut self, order: ViewOrder<T>) {
        self.order = Some(order);
    }

    /// Keeps at most `capacity` rows; the ones sorting last are dropped
    pub fn set_capacity(&mut self, capacity: usize) {
        self.capacity = Some(capacity);
    }

    /// Keys dropped by the capacity since the last call
    pub fn take_evicted(&mut self) -> Vec<String> {
        std::mem::take(&mut self.evicted)
    }

    pub fn rows(&self) -> &[T] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&T> {
        self.rows.iter().find(|r| r.row_key() == key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.position(key).is_some()
    }

    fn position(&self, key: &str) -> Option<usize> {
        self.rows.iter().position(|r| r.row_key() == key)
    }

    fn admits(&self, row: &T) -> bool {
        self.filter.as_ref().map(|f| f(row)).unwrap_or(true)
    }

    /// Replaces the whole projection (initial load / refresh).
    ///
    /// Rows rejected by the filter are dropped and duplicate keys collapse
    /// to their first occurrence, so the key-uniqueness invariant holds even
    /// when the remote read returns duplicates.
    pub fn reset(&mut self, rows: Vec<T>) {
        let mut seen = std::collections::HashSet::new();
        self.rows = rows
            .into_iter()
            .filter(|r| self.admits(r))
            .filter(|r| seen.insert(r.row_key()))
            .collect();
        if let Some(order) = &self.order {
            self.rows.sort_by(|a, b| order(a, b));
        }
        if let Some(capacity) = self.capacity {
            self.rows.truncate(capacity);
        }
        self.evicted.clear();
    }

    /// Re-sorts and trims after a single-row change; returns whether `key`
    /// is still held
    fn settle(&mut self, key: &str) -> bool {
        if let Some(order) = &self.order {
            self.rows.sort_by(|a, b| order(a, b));
        }
        if let Some(capacity) = self.capacity {
            if self.rows.len() > capacity {
                for dropped in self.rows.split_off(capacity) {
                    let dropped = dropped.row_key();
                    if dropped != key {
                        self.evicted.push(dropped);
                    }
                }
            }
        }
        self.contains(key)
    }

    /// Inserts or replaces a row in place.
    ///
    /// Used for authoritative rows returned by a mutation; the remote echo
    /// of the same row later replaces it again without duplication.
    pub fn upsert(&mut self, row: T) -> Applied {
        let key = row.row_key();
        if !self.admits(&row) {
            return self.remove(&key);
        }
        match self.position(&key) {
            Some(idx) => {
                self.rows[idx] = row;
                if self.settle(&key) {
                    Applied::Replaced(key)
                } else {
                    Applied::Removed(key)
                }
            }
            None => {
                match self.insert_at {
                    InsertAt::Front => self.rows.insert(0, row),
                    InsertAt::Back => self.rows.push(row),
                }
                // a row sorting past the cap never enters the view
                if self.settle(&key) {
                    Applied::Inserted(key)
                } else {
                    Applied::Ignored
                }
            }
        }
    }

    pub fn remove(&mut self, key: &str) -> Applied {
        match self.position(key) {
            Some(idx) => {
                self.rows.remove(idx);
                Applied::Removed(key.to_string())
            }
            None => Applied::Ignored,
        }
    }

    /// Folds one change event into the projection.
    ///
    /// - INSERT: add unless the key is already present (then replace in place).
    /// - UPDATE: replace, or add when the key is unknown (out-of-order delivery).
    /// - DELETE: remove by key.
    ///
    /// A row that fails the view filter is treated as a DELETE, so an UPDATE
    /// flipping a filtered field away removes the row and a later UPDATE
    /// restoring it adds it back.
    pub fn apply(&mut self, event: &ChangeEvent) -> Applied {
        match event.op {
            ChangeOp::Insert | ChangeOp::Update => {
                let Some(raw) = event.new.as_ref() else {
                    return Applied::Ignored;
                };
                match serde_json::from_value::<T>(raw.clone()) {
                    Ok(row) => self.upsert(row),
                    Err(e) => {
                        warn!(
                            "[Reducer] {} row on {} could not be decoded: {}",
                            event.op.as_str(),
                            event.table,
                            e
                        );
                        // still honour the key so a stale entry does not linger
                        match T::key_of(raw) {
                            Some(key) if event.op == ChangeOp::Update => self.remove(&key),
                            _ => Applied::Ignored,
                        }
                    }
                }
            }
            ChangeOp::Delete => {
                let key = event
                    .old
                    .as_ref()
                    .and_then(T::key_of)
                    .or_else(|| event.new.as_ref().and_then(T::key_of));
                match key {
                    Some(key) => self.remove(&key),
                    None => {
                        debug!("[Reducer] DELETE on {} without key", event.table);
                        Applied::Ignored
                    }
                }
            }
        }
    }
}
