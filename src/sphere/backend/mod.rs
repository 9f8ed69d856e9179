//! Backend collaborators
//!
//! Identity, relational store, realtime change feed and object storage are
//! provided by a hosted backend. The SDK only talks to them through the
//! traits below; `rest` + `realtime` implement them against the hosted
//! platform and `local` implements them over SQLite.

pub mod local;
pub mod query;
pub mod realtime;
pub mod rest;

use crate::sphere::live::event::EventKind;
use crate::sphere::live::subscription::Subscription;
use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub use local::LocalBackend;
pub use query::{Condition, Filter, Order, Query};
pub use realtime::RealtimeFeed;
pub use rest::RestBackend;

/// Signed-in user as seen by the identity provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserIdentity {
    pub id: String,
    #[serde(default)]
    pub email: String,
}

/// Identity provider
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Current session user, `None` when signed out
    async fn current_user(&self) -> Option<UserIdentity>;

    async fn sign_in(&self, email: &str, password: &str) -> Result<UserIdentity>;

    async fn sign_out(&self) -> Result<()>;
}

/// Relational store with row-level CRUD
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Reads rows; `None` means the store answered without a body
    async fn select(&self, query: &Query) -> Result<Option<Vec<Value>>>;

    /// Inserts one or more rows and returns them as stored
    async fn insert(&self, table: &str, rows: Vec<Value>) -> Result<Vec<Value>>;

    /// Applies `patch` to every row matching `filter`
    async fn update(&self, table: &str, filter: &Filter, patch: Value) -> Result<Vec<Value>>;

    /// Deletes every row matching `filter` and returns the deleted rows
    async fn delete(&self, table: &str, filter: &Filter) -> Result<Vec<Value>>;

    /// Inserts or merges on the `on_conflict` column
    async fn upsert(&self, table: &str, row: Value, on_conflict: &str) -> Result<Vec<Value>>;
}

/// What a realtime subscription listens to
#[derive(Debug, Clone, PartialEq)]
pub struct Topic {
    pub table: String,
    pub event: EventKind,
    /// Optional `column=eq.value` predicate
    pub filter: Option<(String, Value)>,
}

impl Topic {
    pub fn table(table: &str) -> Self {
        Self {
            table: table.to_string(),
            event: EventKind::All,
            filter: None,
        }
    }

    pub fn event(mut self, event: EventKind) -> Self {
        self.event = event;
        self
    }

    pub fn filter_eq(mut self, column: &str, value: impl Into<Value>) -> Self {
        self.filter = Some((column.to_string(), value.into()));
        self
    }

    /// Realtime predicate string (`user_id=eq.abc`)
    pub fn filter_expr(&self) -> Option<String> {
        self.filter
            .as_ref()
            .map(|(c, v)| format!("{}=eq.{}", c, query::scalar_text(v)))
    }

    /// Whether a row touched by an event falls inside this topic's predicate
    pub fn admits(&self, row: Option<&Value>) -> bool {
        match (&self.filter, row) {
            (None, _) => true,
            (Some((col, v)), Some(row)) => Filter::new().eq(col, v.clone()).matches(row),
            (Some(_), None) => false,
        }
    }
}

/// Realtime change feed
#[async_trait]
pub trait ChangeFeed: Send + Sync {
    async fn subscribe(&self, topic: Topic) -> Result<Subscription>;
}

/// Object storage
#[async_trait]
pub trait ObjectStorage: Send + Sync {
    /// Uploads `bytes` to `bucket/path` and returns the public URL
    async fn upload(
        &self,
        bucket: &str,
        path: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<String>;
}

/// Everything a client needs from the backend
pub trait Backend: IdentityProvider + RemoteStore + ChangeFeed + ObjectStorage {}

impl<T> Backend for T where T: IdentityProvider + RemoteStore + ChangeFeed + ObjectStorage {}
