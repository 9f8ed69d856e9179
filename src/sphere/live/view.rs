//! Live views
//!
//! A [`LiveView`] keeps a [`KeyedCollection`] in step with a remote table:
//! it loads once per mount, then opens one subscription per topic and folds
//! every event through the reducer. Unmounting (or remounting with new
//! parameters) closes the previous subscriptions before anything new opens,
//! and results that arrive for an older mount are dropped.

use crate::sphere::backend::{ChangeFeed, Query, RemoteStore, Topic};
use crate::sphere::live::collection::{Applied, InsertAt, KeyedCollection, Row, ViewFilter, ViewOrder};
use crate::sphere::live::event::ChangeEvent;
use crate::sphere::live::listener::{EmptyViewListener, ViewListener};
use crate::sphere::live::loader::{LoadKind, Loader};
use crate::sphere::live::subscription::{MountEpoch, SubscriptionGuard};
use anyhow::Result;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

struct Mounted {
    query: Query,
    guards: Vec<SubscriptionGuard>,
    pumps: Vec<JoinHandle<()>>,
}

impl Mounted {
    fn close(&mut self) {
        for guard in &mut self.guards {
            guard.close();
        }
        for pump in &self.pumps {
            pump.abort();
        }
    }
}

/// Local projection of one remote table, live while mounted
pub struct LiveView<T: Row> {
    name: String,
    loader: Loader,
    feed: Arc<dyn ChangeFeed>,
    state: Arc<Mutex<KeyedCollection<T>>>,
    listener: Arc<dyn ViewListener<T>>,
    epoch: MountEpoch,
    mounted: Mutex<Option<Mounted>>,
}

impl<T: Row> LiveView<T> {
    pub fn new(
        name: impl Into<String>,
        store: Arc<dyn RemoteStore>,
        feed: Arc<dyn ChangeFeed>,
        insert_at: InsertAt,
    ) -> Self {
        Self {
            name: name.into(),
            loader: Loader::new(store),
            feed,
            state: Arc::new(Mutex::new(KeyedCollection::new(insert_at))),
            listener: Arc::new(EmptyViewListener),
            epoch: MountEpoch::new(),
            mounted: Mutex::new(None),
        }
    }

    /// Restricts the view to rows passing `filter`
    pub fn with_filter(self, filter: ViewFilter<T>) -> Self {
        self.configure(|state| state.set_filter(filter))
    }

    /// Keeps rows sorted by `order` (mount, events and merges alike)
    pub fn with_order(self, order: ViewOrder<T>) -> Self {
        self.configure(|state| state.set_order(order))
    }

    /// Holds at most `capacity` rows, dropping the ones sorting last
    pub fn with_capacity(self, capacity: usize) -> Self {
        self.configure(|state| state.set_capacity(capacity))
    }

    fn configure(self, f: impl FnOnce(&mut KeyedCollection<T>)) -> Self {
        match self.state.try_lock() {
            Ok(mut state) => f(&mut state),
            Err(_) => warn!("[LiveView] {} is busy, configuration ignored", self.name),
        }
        self
    }

    pub fn with_listener(mut self, listener: Arc<dyn ViewListener<T>>) -> Self {
        self.listener = listener;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_mounted(&self) -> bool {
        self.epoch.is_mounted()
    }

    /// Current rows, in view order
    pub async fn snapshot(&self) -> Vec<T> {
        self.state.lock().await.rows().to_vec()
    }

    pub async fn get(&self, key: &str) -> Option<T> {
        self.state.lock().await.get(key).cloned()
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.state.lock().await.is_empty()
    }

    /// Mounts the view: load, then subscribe to every topic.
    ///
    /// An existing mount is closed first. Returns `false` when this mount was
    /// superseded (or unmounted) while loading; nothing is applied then.
    pub async fn mount(&self, query: Query, topics: Vec<Topic>) -> Result<bool> {
        let mut slot = self.mounted.lock().await;
        if let Some(mut previous) = slot.take() {
            debug!("[LiveView] {} closing previous mount", self.name);
            previous.close();
        }

        let epoch = self.epoch.begin();
        info!("[LiveView] 📥 mounting {} (epoch {})", self.name, epoch);

        let rows = self.loader.load::<T>(&query, LoadKind::Initial).await;
        if !self.epoch.is_current(epoch) {
            debug!("[LiveView] {} load for epoch {} arrived late, dropped", self.name, epoch);
            return Ok(false);
        }
        if let Some(rows) = rows {
            self.install(rows).await;
        }

        let mut mounted = Mounted {
            query,
            guards: Vec::with_capacity(topics.len()),
            pumps: Vec::with_capacity(topics.len()),
        };
        for topic in topics {
            let subscription = match self.feed.subscribe(topic).await {
                Ok(s) => s,
                Err(e) => {
                    mounted.close();
                    self.epoch.end();
                    return Err(e);
                }
            };
            let (events, guard) = subscription.into_parts();
            if !self.epoch.is_current(epoch) {
                let mut guard = guard;
                guard.close();
                mounted.close();
                return Ok(false);
            }
            mounted.pumps.push(self.spawn_pump(epoch, events));
            mounted.guards.push(guard);
        }

        *slot = Some(mounted);
        Ok(true)
    }

    /// Closes every subscription of the current mount; idempotent
    pub async fn unmount(&self) {
        // ending the epoch first makes an in-flight mount discard its result
        self.epoch.end();
        let mut slot = self.mounted.lock().await;
        if let Some(mut mounted) = slot.take() {
            info!(
                "[LiveView] 📤 unmounting {} ({} subscription(s))",
                self.name,
                mounted.guards.len()
            );
            mounted.close();
        }
    }

    /// Re-reads the mounted query; a failure keeps the rows already shown
    pub async fn refresh(&self) -> bool {
        let slot = self.mounted.lock().await;
        let Some(mounted) = slot.as_ref() else {
            warn!("[LiveView] refresh on unmounted {}", self.name);
            return false;
        };
        match self.loader.load::<T>(&mounted.query, LoadKind::Refresh).await {
            Some(rows) => {
                self.install(rows).await;
                true
            }
            None => false,
        }
    }

    /// Merges authoritative rows returned by a mutation
    pub async fn merge(&self, rows: Vec<T>) {
        for row in rows {
            let applied = self.state.lock().await.upsert(row);
            notify(&self.state, self.listener.as_ref(), applied).await;
        }
    }

    /// Drops rows by key (confirmed deletes)
    pub async fn discard(&self, keys: &[String]) {
        for key in keys {
            let applied = self.state.lock().await.remove(key);
            notify(&self.state, self.listener.as_ref(), applied).await;
        }
    }

    async fn install(&self, rows: Vec<T>) {
        let snapshot = {
            let mut state = self.state.lock().await;
            state.reset(rows);
            state.rows().to_vec()
        };
        debug!("[LiveView] {} holds {} row(s)", self.name, snapshot.len());
        self.listener.on_view_reset(snapshot).await;
    }

    fn spawn_pump(&self, epoch: u64, mut events: mpsc::UnboundedReceiver<ChangeEvent>) -> JoinHandle<()> {
        let state = self.state.clone();
        let listener = self.listener.clone();
        let mount = self.epoch.clone();
        let name = self.name.clone();
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                if !mount.is_current(epoch) {
                    debug!("[LiveView] {} event after unmount ignored", name);
                    break;
                }
                let applied = state.lock().await.apply(&event);
                debug!("[LiveView] {} {} -> {:?}", name, event.op.as_str(), applied);
                notify(&state, listener.as_ref(), applied).await;
            }
        })
    }
}

async fn notify<T: Row>(
    state: &Mutex<KeyedCollection<T>>,
    listener: &dyn ViewListener<T>,
    applied: Applied,
) {
    let evicted = state.lock().await.take_evicted();
    for key in evicted {
        listener.on_row_removed(key).await;
    }
    match applied {
        Applied::Inserted(key) | Applied::Replaced(key) => {
            let row = state.lock().await.get(&key).cloned();
            if let Some(row) = row {
                listener.on_row_upserted(row).await;
            }
        }
        Applied::Removed(key) => listener.on_row_removed(key).await,
        Applied::Ignored => {}
    }
}

impl<T: Row> Drop for LiveView<T> {
    fn drop(&mut self) {
        self.epoch.end();
        if let Some(mounted) = self.mounted.get_mut().as_mut() {
            mounted.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sphere::backend::LocalBackend;
    use async_trait::async_trait;
    use serde::{Deserialize, Serialize};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct Action {
        id: String,
        status: String,
    }

    impl Row for Action {
        fn row_key(&self) -> String {
            self.id.clone()
        }
    }

    #[derive(Default)]
    struct Counting {
        upserts: AtomicUsize,
        removals: AtomicUsize,
    }

    #[async_trait]
    impl ViewListener<Action> for Counting {
        async fn on_view_reset(&self, _rows: Vec<Action>) {}

        async fn on_row_upserted(&self, _row: Action) {
            self.upserts.fetch_add(1, Ordering::SeqCst);
        }

        async fn on_row_removed(&self, _key: String) {
            self.removals.fetch_add(1, Ordering::SeqCst);
        }
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    #[tokio::test]
    async fn remount_closes_before_reopening() {
        let backend = Arc::new(LocalBackend::open("sqlite::memory:").await.unwrap());
        let counting = Arc::new(Counting::default());
        let view: LiveView<Action> =
            LiveView::new("actions", backend.clone(), backend.clone(), InsertAt::Front)
                .with_listener(counting.clone());

        let topic = Topic::table("climate_actions");
        view.mount(Query::table("climate_actions"), vec![topic.clone()]).await.unwrap();
        assert_eq!(backend.active_subscriptions("climate_actions"), 1);

        view.mount(Query::table("climate_actions"), vec![topic]).await.unwrap();
        assert_eq!(backend.active_subscriptions("climate_actions"), 1);

        backend
            .insert("climate_actions", vec![json!({"status": "active"})])
            .await
            .unwrap();
        settle().await;
        assert_eq!(view.len().await, 1);
        assert_eq!(counting.upserts.load(Ordering::SeqCst), 1);

        view.unmount().await;
        assert_eq!(backend.active_subscriptions("climate_actions"), 0);
        view.unmount().await;
        assert_eq!(backend.active_subscriptions("climate_actions"), 0);
    }

    #[tokio::test]
    async fn one_subscription_per_table_closed_independently() {
        let backend = Arc::new(LocalBackend::open("sqlite::memory:").await.unwrap());
        let actions: LiveView<Action> =
            LiveView::new("actions", backend.clone(), backend.clone(), InsertAt::Front);
        let projects: LiveView<Action> =
            LiveView::new("projects", backend.clone(), backend.clone(), InsertAt::Front);
        actions
            .mount(Query::table("climate_actions"), vec![Topic::table("climate_actions")])
            .await
            .unwrap();
        projects
            .mount(Query::table("projects"), vec![Topic::table("projects")])
            .await
            .unwrap();

        actions.unmount().await;
        assert_eq!(backend.active_subscriptions("climate_actions"), 0);
        assert_eq!(backend.active_subscriptions("projects"), 1);
        drop(projects);
        assert_eq!(backend.active_subscriptions("projects"), 0);
    }

    #[tokio::test]
    async fn status_flip_leaves_and_reenters_active_view() {
        let backend = Arc::new(LocalBackend::open("sqlite::memory:").await.unwrap());
        let view: LiveView<Action> =
            LiveView::new("active", backend.clone(), backend.clone(), InsertAt::Front)
                .with_filter(Arc::new(|a: &Action| a.status == "active"));
        let created = backend
            .insert("climate_actions", vec![json!({"status": "active"})])
            .await
            .unwrap();
        let id = created[0]["id"].as_str().unwrap().to_string();

        view.mount(Query::table("climate_actions"), vec![Topic::table("climate_actions")])
            .await
            .unwrap();
        assert_eq!(view.len().await, 1);

        let by_id = crate::sphere::backend::Filter::new().eq("id", id.clone());
        backend
            .update("climate_actions", &by_id, json!({"status": "completed"}))
            .await
            .unwrap();
        settle().await;
        assert!(view.is_empty().await);

        backend
            .update("climate_actions", &by_id, json!({"status": "active"}))
            .await
            .unwrap();
        settle().await;
        assert!(view.get(&id).await.is_some());
    }

    #[tokio::test]
    async fn refresh_on_unmounted_view_is_refused() {
        let backend = Arc::new(LocalBackend::open("sqlite::memory:").await.unwrap());
        let view: LiveView<Action> =
            LiveView::new("actions", backend.clone(), backend.clone(), InsertAt::Front);
        assert!(!view.refresh().await);
    }
}
