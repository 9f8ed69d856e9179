//! Collaborators shared by the domain services

use crate::sphere::ai::TextGenerator;
use crate::sphere::backend::{
    Backend, ChangeFeed, IdentityProvider, ObjectStorage, Query, RemoteStore, UserIdentity,
};
use crate::sphere::error::{SphereError, SphereResult};
use crate::sphere::live::loader::decode_rows;
use crate::sphere::live::{InsertAt, LiveView, Mutator, Row};
use anyhow::Context as _;
use std::sync::Arc;
use tracing::debug;

#[derive(Clone)]
pub struct SphereContext {
    pub identity: Arc<dyn IdentityProvider>,
    pub store: Arc<dyn RemoteStore>,
    pub feed: Arc<dyn ChangeFeed>,
    pub storage: Arc<dyn ObjectStorage>,
    pub ai: TextGenerator,
}

impl SphereContext {
    /// Uses one backend for every collaborator
    pub fn from_backend<B: Backend + 'static>(backend: Arc<B>, ai: TextGenerator) -> Self {
        Self {
            identity: backend.clone(),
            store: backend.clone(),
            feed: backend.clone(),
            storage: backend,
            ai,
        }
    }

    pub fn mutator(&self) -> Mutator {
        Mutator::new(self.store.clone())
    }

    pub fn view<T: Row>(&self, name: &str, insert_at: InsertAt) -> LiveView<T> {
        LiveView::new(name, self.store.clone(), self.feed.clone(), insert_at)
    }

    /// Signed-in user, or [`SphereError::Unauthenticated`]
    pub async fn require_user(&self) -> SphereResult<UserIdentity> {
        match self.identity.current_user().await {
            Some(user) => Ok(user),
            None => {
                debug!("[Context] operation needs sign-in");
                Err(SphereError::Unauthenticated)
            }
        }
    }

    /// One read, decoded; a missing body is an empty list
    pub async fn fetch<T: Row>(&self, query: &Query) -> SphereResult<Vec<T>> {
        let rows = self
            .store
            .select(query)
            .await
            .with_context(|| format!("failed to read {}", query.table))?
            .unwrap_or_default();
        Ok(decode_rows(&query.table, rows))
    }

    pub async fn fetch_one<T: Row>(&self, query: Query) -> SphereResult<Option<T>> {
        Ok(self.fetch(&query.limit(1)).await?.into_iter().next())
    }
}
