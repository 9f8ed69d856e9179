//! Notification drawer: latest items, unread count, mark read

use crate::sphere::backend::{Filter, Query, Topic};
use crate::sphere::context::SphereContext;
use crate::sphere::error::SphereResult;
use crate::sphere::live::{InsertAt, LiveView, ViewListener};
use crate::sphere::notification::models::{
    unread_count, NewNotification, Notification, LATEST_LIMIT, NOTIFICATIONS,
};
use serde_json::json;
use std::sync::Arc;
use tracing::debug;

#[derive(Clone)]
pub struct NotificationService {
    ctx: SphereContext,
}

impl NotificationService {
    pub fn new(ctx: SphereContext) -> Self {
        Self { ctx }
    }

    fn latest_query(user_id: &str) -> Query {
        Query::table(NOTIFICATIONS)
            .eq("user_id", user_id)
            .order("created_at", false)
            .limit(LATEST_LIMIT)
    }

    /// The signed-in user's latest notifications, newest first
    pub async fn latest(&self) -> SphereResult<Vec<Notification>> {
        let user = self.ctx.require_user().await?;
        self.ctx.fetch(&Self::latest_query(&user.id)).await
    }

    pub async fn unread_count(&self) -> SphereResult<usize> {
        let user = self.ctx.require_user().await?;
        let unread: Vec<Notification> = self
            .ctx
            .fetch(
                &Query::table(NOTIFICATIONS)
                    .eq("user_id", user.id)
                    .eq("is_read", false),
            )
            .await?;
        Ok(unread.len())
    }

    /// Live drawer scoped to the signed-in user.
    ///
    /// Holds the latest [`LATEST_LIMIT`] rows newest first; rows written
    /// later for older notifications (bulk mark-read) never push newer ones out.
    pub async fn live(
        &self,
        listener: Arc<dyn ViewListener<Notification>>,
    ) -> SphereResult<LiveView<Notification>> {
        let user = self.ctx.require_user().await?;
        let owner = user.id.clone();
        let view = self
            .ctx
            .view::<Notification>("notifications", InsertAt::Front)
            .with_filter(Arc::new(move |n: &Notification| n.user_id == owner))
            .with_order(Arc::new(|a: &Notification, b: &Notification| b.created_at.cmp(&a.created_at)))
            .with_capacity(LATEST_LIMIT)
            .with_listener(listener);
        view.mount(
            Self::latest_query(&user.id),
            vec![Topic::table(NOTIFICATIONS).filter_eq("user_id", user.id.clone())],
        )
        .await?;
        Ok(view)
    }

    /// First items of a live drawer and its unread count
    pub async fn drawer(view: &LiveView<Notification>) -> (Vec<Notification>, usize) {
        let mut items = view.snapshot().await;
        items.truncate(LATEST_LIMIT);
        let unread = unread_count(&items);
        (items, unread)
    }

    pub async fn mark_read(
        &self,
        notification_id: &str,
        view: Option<&LiveView<Notification>>,
    ) -> SphereResult<()> {
        self.ctx
            .mutator()
            .update(
                NOTIFICATIONS,
                &Filter::new().eq("id", notification_id),
                json!({ "is_read": true }),
                view,
            )
            .await?;
        Ok(())
    }

    /// Marks every unread notification of the signed-in user; returns how many
    pub async fn mark_all_read(&self, view: Option<&LiveView<Notification>>) -> SphereResult<usize> {
        let user = self.ctx.require_user().await?;
        let updated = self
            .ctx
            .mutator()
            .update(
                NOTIFICATIONS,
                &Filter::new().eq("user_id", user.id).eq("is_read", false),
                json!({ "is_read": true }),
                view,
            )
            .await?;
        debug!("[Notification] marked {} read", updated.len());
        Ok(updated.len())
    }

    /// Sends a notification to `user_id`
    pub async fn push(&self, user_id: &str, kind: &str, title: &str) -> SphereResult<Notification> {
        self.ctx
            .mutator()
            .create::<_, Notification>(
                NOTIFICATIONS,
                &NewNotification {
                    user_id,
                    kind,
                    title,
                    is_read: false,
                },
                None,
            )
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sphere::ai::TextGenerator;
    use crate::sphere::backend::{IdentityProvider, LocalBackend, RemoteStore};
    use crate::sphere::live::EmptyViewListener;
    use serde_json::Value;
    use std::time::Duration;

    async fn setup() -> (NotificationService, Arc<LocalBackend>, String) {
        let backend = Arc::new(LocalBackend::open("sqlite::memory:").await.unwrap());
        let me = backend.sign_in("ana@example.com", "pw").await.unwrap();
        let service = NotificationService::new(SphereContext::from_backend(
            backend.clone(),
            TextGenerator::new(None),
        ));
        (service, backend, me.id)
    }

    /// `count` unread rows n0..n{count-1}, one second apart, oldest first
    async fn seed(backend: &LocalBackend, user_id: &str, count: usize) {
        let rows: Vec<Value> = (0..count)
            .map(|i| {
                json!({
                    "user_id": user_id,
                    "type": "info",
                    "title": format!("n{}", i),
                    "is_read": false,
                    "created_at": format!("2026-01-01T00:00:{:02}.000000Z", i),
                })
            })
            .collect();
        backend.insert(NOTIFICATIONS, rows).await.unwrap();
    }

    fn titles(items: &[Notification]) -> Vec<String> {
        items.iter().map(|n| n.title.clone()).collect()
    }

    fn expected(range: impl DoubleEndedIterator<Item = usize>) -> Vec<String> {
        range.rev().map(|i| format!("n{}", i)).collect()
    }

    #[tokio::test]
    async fn drawer_tracks_unread_and_mark_all() {
        let backend = Arc::new(LocalBackend::open("sqlite::memory:").await.unwrap());
        let me = backend.sign_in("ana@example.com", "pw").await.unwrap();
        let service = NotificationService::new(SphereContext::from_backend(
            backend.clone(),
            TextGenerator::new(None),
        ));

        for i in 0..12 {
            service.push(&me.id, "info", &format!("n{}", i)).await.unwrap();
        }
        service.push("someone-else", "info", "not mine").await.unwrap();

        assert_eq!(service.latest().await.unwrap().len(), LATEST_LIMIT);
        assert_eq!(service.unread_count().await.unwrap(), 12);

        let view = service.live(Arc::new(EmptyViewListener)).await.unwrap();
        let (items, unread) = NotificationService::drawer(&view).await;
        assert_eq!(items.len(), LATEST_LIMIT);
        assert_eq!(unread, LATEST_LIMIT);

        service.mark_read(&items[0].id, Some(&view)).await.unwrap();
        assert_eq!(service.unread_count().await.unwrap(), 11);

        assert_eq!(service.mark_all_read(Some(&view)).await.unwrap(), 11);
        tokio::time::sleep(Duration::from_millis(50)).await;
        let (_, unread) = NotificationService::drawer(&view).await;
        assert_eq!(unread, 0);
    }

    #[tokio::test]
    async fn drawer_keeps_newest_order_after_mark_all_read() {
        let (service, backend, me) = setup().await;
        seed(&backend, &me, 12).await;

        let view = service.live(Arc::new(EmptyViewListener)).await.unwrap();
        let (items, _) = NotificationService::drawer(&view).await;
        assert_eq!(titles(&items), expected(2..12));

        assert_eq!(service.mark_all_read(Some(&view)).await.unwrap(), 12);
        tokio::time::sleep(Duration::from_millis(50)).await;

        let (items, unread) = NotificationService::drawer(&view).await;
        assert_eq!(titles(&items), expected(2..12));
        assert_eq!(unread, 0);
        assert_eq!(view.len().await, LATEST_LIMIT);
    }

    #[tokio::test]
    async fn live_drawer_skips_other_users_and_stays_capped() {
        let (service, backend, me) = setup().await;
        seed(&backend, &me, LATEST_LIMIT).await;
        let view = service.live(Arc::new(EmptyViewListener)).await.unwrap();
        let oldest = view.snapshot().await.last().map(|n| n.id.clone()).unwrap();

        service.push("someone-else", "info", "not mine").await.unwrap();
        service.push(&me, "info", "fresh").await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let (items, unread) = NotificationService::drawer(&view).await;
        assert_eq!(items.len(), LATEST_LIMIT);
        assert_eq!(items[0].title, "fresh");
        assert_eq!(items[LATEST_LIMIT - 1].title, "n1");
        assert!(items.iter().all(|n| n.user_id == me));
        assert_eq!(unread, LATEST_LIMIT);
        assert!(view.get(&oldest).await.is_none());
    }
}
