//! Fetch-and-cache loader
//!
//! One remote read per mount. The first load of a mount falls back to an
//! empty collection on failure; a refresh keeps whatever the view already
//! shows.

use crate::sphere::backend::{Query, RemoteStore};
use crate::sphere::live::collection::Row;
use anyhow::{Context, Result};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Which load this is within a mount
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadKind {
    Initial,
    Refresh,
}

#[derive(Clone)]
pub struct Loader {
    store: Arc<dyn RemoteStore>,
}

impl Loader {
    pub fn new(store: Arc<dyn RemoteStore>) -> Self {
        Self { store }
    }

    /// Performs the read and decodes rows; a missing body is an empty result.
    ///
    /// Rows that fail to decode are skipped with a warning rather than
    /// failing the whole read.
    pub async fn fetch<T: Row>(&self, query: &Query) -> Result<Vec<T>> {
        let rows = self
            .store
            .select(query)
            .await
            .with_context(|| format!("failed to load {}", query.table))?
            .unwrap_or_default();
        debug!("[Loader] {} returned {} row(s)", query.table, rows.len());
        Ok(decode_rows(&query.table, rows))
    }

    /// Fetches and applies the failure policy.
    ///
    /// Returns the rows to install, or `None` when the current state must be
    /// left as it is.
    pub async fn load<T: Row>(&self, query: &Query, kind: LoadKind) -> Option<Vec<T>> {
        match self.fetch(query).await {
            Ok(rows) => Some(rows),
            Err(e) => match kind {
                LoadKind::Initial => {
                    error!("[Loader] initial load of {} failed: {:#}", query.table, e);
                    Some(Vec::new())
                }
                LoadKind::Refresh => {
                    warn!("[Loader] refresh of {} failed, keeping stale rows: {:#}", query.table, e);
                    None
                }
            },
        }
    }
}

pub(crate) fn decode_rows<T: Row>(table: &str, rows: Vec<Value>) -> Vec<T> {
    rows.into_iter()
        .filter_map(|raw| match serde_json::from_value::<T>(raw) {
            Ok(row) => Some(row),
            Err(e) => {
                warn!("[Loader] skipping undecodable {} row: {}", table, e);
                None
            }
        })
        .collect()
}
