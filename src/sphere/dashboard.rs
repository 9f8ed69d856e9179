//! Dashboard quick stats
//!
//! Counts of non-demo communities, non-demo climate actions and projects.
//! The live variant keeps one keyed view per table, so an UPDATE never
//! counts a row twice.

use crate::sphere::action::{ClimateAction, CLIMATE_ACTIONS};
use crate::sphere::backend::{Query, Topic};
use crate::sphere::community::{Community, COMMUNITIES};
use crate::sphere::context::SphereContext;
use crate::sphere::error::SphereResult;
use crate::sphere::live::{InsertAt, LiveView, Row, ViewListener};
use crate::sphere::project::{Project, PROJECTS};
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QuickStats {
    pub communities: usize,
    pub actions: usize,
    pub projects: usize,
}

/// Receives the counts after every change
#[async_trait]
pub trait StatsListener: Send + Sync {
    async fn on_stats_changed(&self, stats: QuickStats);
}

pub struct EmptyStatsListener;

#[async_trait]
impl StatsListener for EmptyStatsListener {
    async fn on_stats_changed(&self, _stats: QuickStats) {}
}

#[derive(Debug, Clone, Copy)]
enum Tile {
    Communities,
    Actions,
    Projects,
}

/// Keys currently shown per tile
#[derive(Default)]
struct Tally {
    communities: HashSet<String>,
    actions: HashSet<String>,
    projects: HashSet<String>,
}

impl Tally {
    fn keys(&mut self, tile: Tile) -> &mut HashSet<String> {
        match tile {
            Tile::Communities => &mut self.communities,
            Tile::Actions => &mut self.actions,
            Tile::Projects => &mut self.projects,
        }
    }

    fn stats(&self) -> QuickStats {
        QuickStats {
            communities: self.communities.len(),
            actions: self.actions.len(),
            projects: self.projects.len(),
        }
    }
}

struct TileCounter {
    tile: Tile,
    tally: Arc<Mutex<Tally>>,
    listener: Arc<dyn StatsListener>,
}

impl TileCounter {
    async fn update(&self, change: impl FnOnce(&mut HashSet<String>) + Send) {
        let stats = {
            let mut tally = self.tally.lock().await;
            change(tally.keys(self.tile));
            tally.stats()
        };
        debug!("[Dashboard] {:?} -> {:?}", self.tile, stats);
        self.listener.on_stats_changed(stats).await;
    }
}

#[async_trait]
impl<T: Row> ViewListener<T> for TileCounter {
    async fn on_view_reset(&self, rows: Vec<T>) {
        let keys: HashSet<String> = rows.iter().map(|r| r.row_key()).collect();
        self.update(move |shown| *shown = keys).await;
    }

    async fn on_row_upserted(&self, row: T) {
        let key = row.row_key();
        self.update(move |shown| {
            shown.insert(key);
        })
        .await;
    }

    async fn on_row_removed(&self, key: String) {
        self.update(move |shown| {
            shown.remove(&key);
        })
        .await;
    }
}

/// Mounted quick stats
pub struct LiveStats {
    tally: Arc<Mutex<Tally>>,
    communities: LiveView<Community>,
    actions: LiveView<ClimateAction>,
    projects: LiveView<Project>,
}

impl LiveStats {
    pub async fn stats(&self) -> QuickStats {
        self.tally.lock().await.stats()
    }

    pub async fn unmount(&self) {
        self.communities.unmount().await;
        self.actions.unmount().await;
        self.projects.unmount().await;
    }
}

#[derive(Clone)]
pub struct DashboardService {
    ctx: SphereContext,
}

impl DashboardService {
    pub fn new(ctx: SphereContext) -> Self {
        Self { ctx }
    }

    /// One read of the three counts
    pub async fn quick_stats(&self) -> SphereResult<QuickStats> {
        let communities: Vec<Community> = self
            .ctx
            .fetch(&Query::table(COMMUNITIES).eq("is_demo", false))
            .await?;
        let actions: Vec<ClimateAction> = self
            .ctx
            .fetch(&Query::table(CLIMATE_ACTIONS).eq("is_demo", false))
            .await?;
        let projects: Vec<Project> = self.ctx.fetch(&Query::table(PROJECTS)).await?;
        Ok(QuickStats {
            communities: communities.len(),
            actions: actions.len(),
            projects: projects.len(),
        })
    }

    /// Quick stats kept current by the change feed
    pub async fn live(&self, listener: Arc<dyn StatsListener>) -> SphereResult<LiveStats> {
        let tally = Arc::new(Mutex::new(Tally::default()));
        let counter = |tile| {
            Arc::new(TileCounter {
                tile,
                tally: tally.clone(),
                listener: listener.clone(),
            })
        };

        let communities = self
            .ctx
            .view::<Community>("dashboard_communities", InsertAt::Front)
            .with_filter(Arc::new(|c: &Community| !c.is_demo))
            .with_listener(counter(Tile::Communities));
        communities
            .mount(
                Query::table(COMMUNITIES).eq("is_demo", false),
                vec![Topic::table(COMMUNITIES)],
            )
            .await?;

        let actions = self
            .ctx
            .view::<ClimateAction>("dashboard_actions", InsertAt::Front)
            .with_filter(Arc::new(|a: &ClimateAction| !a.is_demo))
            .with_listener(counter(Tile::Actions));
        actions
            .mount(
                Query::table(CLIMATE_ACTIONS).eq("is_demo", false),
                vec![Topic::table(CLIMATE_ACTIONS)],
            )
            .await?;

        let projects = self
            .ctx
            .view::<Project>("dashboard_projects", InsertAt::Front)
            .with_listener(counter(Tile::Projects));
        projects
            .mount(Query::table(PROJECTS), vec![Topic::table(PROJECTS)])
            .await?;

        Ok(LiveStats {
            tally,
            communities,
            actions,
            projects,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sphere::action::{ActionService, NewClimateAction};
    use crate::sphere::ai::TextGenerator;
    use crate::sphere::backend::{IdentityProvider, LocalBackend};
    use crate::sphere::seed::seed_demo_data;
    use std::time::Duration;

    #[derive(Default)]
    struct Latest(Mutex<Option<QuickStats>>);

    #[async_trait]
    impl StatsListener for Latest {
        async fn on_stats_changed(&self, stats: QuickStats) {
            *self.0.lock().await = Some(stats);
        }
    }

    #[tokio::test]
    async fn counts_skip_demo_rows_and_follow_changes() {
        let backend = Arc::new(LocalBackend::open("sqlite::memory:").await.unwrap());
        backend.sign_in("ana@example.com", "pw").await.unwrap();
        let ctx = SphereContext::from_backend(backend.clone(), TextGenerator::new(None));
        let dashboard = DashboardService::new(ctx.clone());
        let actions = ActionService::new(ctx.clone());

        seed_demo_data(&ctx).await.unwrap();
        assert_eq!(dashboard.quick_stats().await.unwrap(), QuickStats::default());

        let latest = Arc::new(Latest::default());
        let live = dashboard.live(latest.clone()).await.unwrap();
        assert_eq!(live.stats().await, QuickStats::default());

        let action = actions
            .create(
                &NewClimateAction {
                    title: "Community compost".into(),
                    ..NewClimateAction::default()
                },
                None,
            )
            .await
            .unwrap();
        // an update of the same row is still one action
        actions.set_status(&action.id, "completed", None).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let expected = QuickStats {
            actions: 1,
            ..QuickStats::default()
        };
        assert_eq!(live.stats().await, expected);
        assert_eq!(*latest.0.lock().await, Some(expected));
        assert_eq!(dashboard.quick_stats().await.unwrap(), expected);

        actions.delete(&action.id, None).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(live.stats().await, QuickStats::default());

        live.unmount().await;
        assert_eq!(backend.active_subscriptions(CLIMATE_ACTIONS), 0);
    }
}
