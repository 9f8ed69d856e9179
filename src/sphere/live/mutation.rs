//! Validate, send, merge
//!
//! A [`Mutator`] never pre-writes local state: input is validated locally
//! (a failure never reaches the remote store), the remote mutation is sent,
//! and only the authoritative rows it returns are merged into a view.

use crate::sphere::backend::{Filter, RemoteStore};
use crate::sphere::error::{FieldError, SphereError, SphereResult};
use crate::sphere::live::collection::Row;
use crate::sphere::live::view::LiveView;
use anyhow::Context;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, error};

/// Local input validation
pub trait Validate {
    fn validate(&self) -> Result<(), FieldError>;
}

#[derive(Clone)]
pub struct Mutator {
    store: Arc<dyn RemoteStore>,
}

impl Mutator {
    pub fn new(store: Arc<dyn RemoteStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn RemoteStore> {
        &self.store
    }

    /// Validates and inserts one draft, returning the stored row
    pub async fn create<D, T>(&self, table: &str, draft: &D, view: Option<&LiveView<T>>) -> SphereResult<T>
    where
        D: Validate + Serialize + Sync,
        T: Row,
    {
        draft.validate()?;
        let payload = serde_json::to_value(draft)
            .with_context(|| format!("failed to encode {} draft", table))?;
        let rows = self
            .store
            .insert(table, vec![payload])
            .await
            .map_err(|e| remote_failure("insert", table, e))?;
        let mut stored = decode::<T>(table, rows)?;
        let row = stored
            .pop()
            .ok_or_else(|| SphereError::Remote(anyhow::anyhow!("insert into {} returned no row", table)))?;
        if let Some(view) = view {
            view.merge(vec![row.clone()]).await;
        }
        debug!("[Mutation] created {} {}", table, row.row_key());
        Ok(row)
    }

    /// Applies a patch to the rows matching `filter`
    pub async fn update<T: Row>(
        &self,
        table: &str,
        filter: &Filter,
        patch: Value,
        view: Option<&LiveView<T>>,
    ) -> SphereResult<Vec<T>> {
        let rows = self
            .store
            .update(table, filter, patch)
            .await
            .map_err(|e| remote_failure("update", table, e))?;
        let updated = decode::<T>(table, rows)?;
        if let Some(view) = view {
            view.merge(updated.clone()).await;
        }
        Ok(updated)
    }

    /// Validates the patch before sending it
    pub async fn update_checked<P, T>(
        &self,
        table: &str,
        filter: &Filter,
        patch: &P,
        view: Option<&LiveView<T>>,
    ) -> SphereResult<Vec<T>>
    where
        P: Validate + Serialize + Sync,
        T: Row,
    {
        patch.validate()?;
        let patch = serde_json::to_value(patch)
            .with_context(|| format!("failed to encode {} patch", table))?;
        self.update(table, filter, patch, view).await
    }

    /// Deletes matching rows and returns the keys that were removed
    pub async fn delete<T: Row>(
        &self,
        table: &str,
        filter: &Filter,
        view: Option<&LiveView<T>>,
    ) -> SphereResult<Vec<String>> {
        let rows = self
            .store
            .delete(table, filter)
            .await
            .map_err(|e| remote_failure("delete", table, e))?;
        let keys: Vec<String> = rows.iter().filter_map(T::key_of).collect();
        if let Some(view) = view {
            view.discard(&keys).await;
        }
        Ok(keys)
    }
}

fn remote_failure(op: &str, table: &str, e: anyhow::Error) -> SphereError {
    error!("[Mutation] {} on {} failed: {:#}", op, table, e);
    SphereError::Remote(e.context(format!("{} on {} failed", op, table)))
}

fn decode<T: Row>(table: &str, rows: Vec<Value>) -> SphereResult<Vec<T>> {
    rows.into_iter()
        .map(|r| {
            serde_json::from_value::<T>(r)
                .with_context(|| format!("unexpected {} row from store", table))
                .map_err(SphereError::Remote)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sphere::backend::{LocalBackend, Query, Topic};
    use crate::sphere::live::collection::InsertAt;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct Note {
        id: String,
        text: String,
    }

    impl Row for Note {
        fn row_key(&self) -> String {
            self.id.clone()
        }
    }

    #[derive(Serialize)]
    struct NoteDraft {
        text: String,
    }

    impl Validate for NoteDraft {
        fn validate(&self) -> Result<(), FieldError> {
            if self.text.trim().is_empty() {
                return Err(FieldError::required("text"));
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn created_row_and_echo_collapse_to_one_entry() {
        let backend = Arc::new(LocalBackend::open("sqlite::memory:").await.unwrap());
        let view: LiveView<Note> =
            LiveView::new("notes", backend.clone(), backend.clone(), InsertAt::Front);
        view.mount(Query::table("notes"), vec![Topic::table("notes")]).await.unwrap();

        let mutator = Mutator::new(backend.clone());
        let note: Note = mutator
            .create("notes", &NoteDraft { text: "hello".into() }, Some(&view))
            .await
            .unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert_eq!(view.len().await, 1);
        assert_eq!(view.get(&note.id).await.unwrap().text, "hello");
    }

    #[tokio::test]
    async fn invalid_draft_is_rejected_locally() {
        let backend = Arc::new(LocalBackend::open("sqlite::memory:").await.unwrap());
        let mutator = Mutator::new(backend.clone());
        let err = mutator
            .create::<_, Note>("notes", &NoteDraft { text: " ".into() }, None)
            .await
            .unwrap_err();
        assert_eq!(err.field_error().unwrap().field, "text");
        let rows = backend.select(&Query::table("notes")).await.unwrap().unwrap();
        assert!(rows.is_empty());
    }

    #[tokio::test]
    async fn failed_update_leaves_view_untouched() {
        let backend = Arc::new(LocalBackend::open("sqlite::memory:").await.unwrap());
        backend.insert("notes", vec![json!({"id": "n1", "text": "a"})]).await.unwrap();
        let view: LiveView<Note> =
            LiveView::new("notes", backend.clone(), backend.clone(), InsertAt::Front);
        view.mount(Query::table("notes"), vec![]).await.unwrap();

        let mutator = Mutator::new(backend.clone());
        // an empty filter is refused by the store
        let result = mutator
            .update::<Note>("notes", &Filter::new(), json!({"text": "b"}), Some(&view))
            .await;
        assert!(matches!(result, Err(SphereError::Remote(_))));
        assert_eq!(view.get("n1").await.unwrap().text, "a");
    }
}
