//! Friend requests
//!
//! Requests are one-directional `pending` rows; nothing here turns a request
//! into `accepted` or writes the reverse row.

use crate::sphere::backend::{Filter, Query, Topic};
use crate::sphere::context::SphereContext;
use crate::sphere::error::{FieldError, SphereError, SphereResult};
use crate::sphere::friend::models::{Friend, FriendStatus, NewFriendRequest, FRIENDS};
use crate::sphere::live::{InsertAt, LiveView, ViewListener};
use crate::sphere::profile::{Profile, PROFILES};
use std::sync::Arc;
use tracing::info;

#[derive(Clone)]
pub struct FriendService {
    ctx: SphereContext,
}

impl FriendService {
    pub fn new(ctx: SphereContext) -> Self {
        Self { ctx }
    }

    /// Sends a request to the user with `username`
    pub async fn send_request(&self, username: &str, view: Option<&LiveView<Friend>>) -> SphereResult<Friend> {
        let username = username.trim();
        if username.is_empty() {
            return Err(FieldError::required("username").into());
        }
        let me = self.ctx.require_user().await?;
        let target = self
            .ctx
            .fetch_one::<Profile>(Query::table(PROFILES).eq("username", username))
            .await?
            .ok_or_else(|| SphereError::rejected(format!("user {} not found", username)))?;

        let existing = self
            .ctx
            .fetch_one::<Friend>(
                Query::table(FRIENDS)
                    .eq("user_id", me.id.clone())
                    .eq("friend_id", target.id.clone()),
            )
            .await?;
        if let Some(existing) = existing {
            return Err(SphereError::rejected(format!(
                "already {:?} with {}",
                existing.status, username
            )));
        }

        let request: Friend = self
            .ctx
            .mutator()
            .create(
                FRIENDS,
                &NewFriendRequest {
                    user_id: &me.id,
                    friend_id: &target.id,
                    status: FriendStatus::Pending,
                },
                view,
            )
            .await?;
        info!("[Friend] 🤝 request sent to {}", username);
        Ok(request)
    }

    /// Removes the signed-in user's row for `friend_id`
    pub async fn remove(&self, friend_id: &str, view: Option<&LiveView<Friend>>) -> SphereResult<bool> {
        let me = self.ctx.require_user().await?;
        let removed = self
            .ctx
            .mutator()
            .delete::<Friend>(
                FRIENDS,
                &Filter::new().eq("user_id", me.id).eq("friend_id", friend_id),
                view,
            )
            .await?;
        Ok(!removed.is_empty())
    }

    pub async fn accepted(&self) -> SphereResult<Vec<Friend>> {
        let me = self.ctx.require_user().await?;
        self.ctx
            .fetch(
                &Query::table(FRIENDS)
                    .eq("user_id", me.id)
                    .eq("status", "accepted"),
            )
            .await
    }

    /// Every row the signed-in user owns, any status
    pub async fn all(&self) -> SphereResult<Vec<Friend>> {
        let me = self.ctx.require_user().await?;
        self.ctx.fetch(&Query::table(FRIENDS).eq("user_id", me.id)).await
    }

    /// Live list of the signed-in user's accepted friends
    pub async fn live(&self, listener: Arc<dyn ViewListener<Friend>>) -> SphereResult<LiveView<Friend>> {
        let me = self.ctx.require_user().await?;
        let owner = me.id.clone();
        let view = self
            .ctx
            .view::<Friend>("friends", InsertAt::Back)
            .with_filter(Arc::new(move |f: &Friend| {
                f.user_id == owner && f.status == FriendStatus::Accepted
            }))
            .with_listener(listener);
        view.mount(
            Query::table(FRIENDS).eq("user_id", me.id.clone()).eq("status", "accepted"),
            vec![Topic::table(FRIENDS).filter_eq("user_id", me.id)],
        )
        .await?;
        Ok(view)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sphere::ai::TextGenerator;
    use crate::sphere::backend::{IdentityProvider, LocalBackend, RemoteStore};
    use crate::sphere::live::EmptyViewListener;
    use crate::sphere::profile::ProfileService;
    use serde_json::json;
    use std::time::Duration;

    #[tokio::test]
    async fn request_lookup_and_remove() {
        let backend = Arc::new(LocalBackend::open("sqlite::memory:").await.unwrap());
        let ctx = SphereContext::from_backend(backend.clone(), TextGenerator::new(None));
        let profiles = ProfileService::new(ctx.clone());
        let service = FriendService::new(ctx);

        let bo = backend.sign_in("bo@example.com", "pw").await.unwrap();
        profiles.load_or_create().await.unwrap();
        backend.sign_in("ana@example.com", "pw").await.unwrap();
        profiles.load_or_create().await.unwrap();

        assert!(matches!(
            service.send_request("nobody", None).await,
            Err(SphereError::Rejected(_))
        ));
        assert!(service.send_request("ana", None).await.is_err());

        let view = service.live(Arc::new(EmptyViewListener)).await.unwrap();
        let request = service.send_request("bo", None).await.unwrap();
        assert_eq!(request.friend_id, bo.id);
        assert_eq!(request.status, FriendStatus::Pending);
        assert!(service.send_request("bo", None).await.is_err());
        assert!(service.accepted().await.unwrap().is_empty());

        // acceptance happens outside this client
        backend
            .update(
                FRIENDS,
                &Filter::new().eq("friend_id", bo.id.clone()),
                json!({ "status": "accepted" }),
            )
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(view.len().await, 1);

        assert!(service.remove(&bo.id, Some(&view)).await.unwrap());
        assert!(view.is_empty().await);
        assert!(service.all().await.unwrap().is_empty());
    }
}
