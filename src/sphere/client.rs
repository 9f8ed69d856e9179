//! Client facade
//!
//! Picks a backend from [`SphereConfig`] and hands every domain service the
//! same [`SphereContext`].

use crate::sphere::action::ActionService;
use crate::sphere::ai::TextGenerator;
use crate::sphere::analytics;
use crate::sphere::backend::{LocalBackend, RestBackend, UserIdentity};
use crate::sphere::chat::ChatService;
use crate::sphere::community::CommunityService;
use crate::sphere::config::SphereConfig;
use crate::sphere::context::SphereContext;
use crate::sphere::dashboard::DashboardService;
use crate::sphere::error::SphereResult;
use crate::sphere::export::ExportData;
use crate::sphere::friend::FriendService;
use crate::sphere::notification::NotificationService;
use crate::sphere::profile::ProfileService;
use crate::sphere::project::ProjectService;
use crate::sphere::seed::{seed_demo_data, SeedReport};
use crate::sphere::support::SupportService;
use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::info;

#[derive(Clone)]
pub struct SphereClient {
    ctx: SphereContext,
    pub communities: CommunityService,
    pub actions: ActionService,
    pub projects: ProjectService,
    pub chat: ChatService,
    pub friends: FriendService,
    pub notifications: NotificationService,
    pub profiles: ProfileService,
    pub dashboard: DashboardService,
    pub support: SupportService,
}

impl SphereClient {
    /// Connects to the hosted backend, or opens the local store
    pub async fn connect(config: &SphereConfig) -> Result<Self> {
        let ai = TextGenerator::new(config.ai_key.clone());
        let ctx = match &config.hosted {
            Some(hosted) => {
                info!("[Client] 🌐 hosted backend {}", hosted.url);
                let backend = RestBackend::new(&hosted.url, &hosted.anon_key)
                    .context("failed to create hosted backend client")?;
                SphereContext::from_backend(Arc::new(backend), ai)
            }
            None => {
                info!("[Client] 💾 local backend {}", config.db_url);
                let backend = LocalBackend::open(&config.db_url)
                    .await
                    .context("failed to open local backend")?;
                SphereContext::from_backend(Arc::new(backend), ai)
            }
        };
        Ok(Self::from_context(ctx))
    }

    pub fn from_context(ctx: SphereContext) -> Self {
        Self {
            communities: CommunityService::new(ctx.clone()),
            actions: ActionService::new(ctx.clone()),
            projects: ProjectService::new(ctx.clone()),
            chat: ChatService::new(ctx.clone()),
            friends: FriendService::new(ctx.clone()),
            notifications: NotificationService::new(ctx.clone()),
            profiles: ProfileService::new(ctx.clone()),
            dashboard: DashboardService::new(ctx.clone()),
            support: SupportService::new(ctx.clone()),
            ctx,
        }
    }

    pub fn context(&self) -> &SphereContext {
        &self.ctx
    }

    pub async fn sign_in(&self, email: &str, password: &str) -> Result<UserIdentity> {
        let user = self.ctx.identity.sign_in(email, password).await?;
        info!("[Client] ✅ signed in as {}", user.id);
        Ok(user)
    }

    pub async fn sign_out(&self) -> Result<()> {
        self.ctx.identity.sign_out().await
    }

    pub async fn current_user(&self) -> Option<UserIdentity> {
        self.ctx.identity.current_user().await
    }

    /// Impact report over live, non-demo data
    pub async fn report(&self) -> SphereResult<ExportData> {
        analytics::load_report(&self.ctx).await
    }

    pub async fn seed_demo_data(&self) -> SphereResult<SeedReport> {
        seed_demo_data(&self.ctx).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sphere::action::NewClimateAction;
    use crate::sphere::export::{export, ExportFormat};
    use std::sync::Once;

    static INIT_LOGGER: Once = Once::new();

    fn init_test_logger() {
        INIT_LOGGER.call_once(|| {
            use tracing_subscriber::prelude::*;
            use tracing_subscriber::EnvFilter;

            // crate debug on, sqlx and HTTP noise off
            let filter_layer = EnvFilter::new("info,civicsphere_sdk_core=debug,sqlx=warn,reqwest=info");
            let fmt_layer = tracing_subscriber::fmt::layer()
                .with_file(true)
                .with_line_number(true)
                .with_target(false)
                .with_test_writer();

            let _ = tracing_subscriber::registry()
                .with(filter_layer)
                .with(fmt_layer)
                .try_init();
        });
    }

    #[tokio::test]
    async fn local_config_runs_end_to_end() {
        init_test_logger();
        let client = SphereClient::connect(&SphereConfig::local("sqlite::memory:"))
            .await
            .unwrap();
        assert!(client.current_user().await.is_none());
        client.sign_in("ana@example.com", "pw").await.unwrap();

        client
            .actions
            .create(
                &NewClimateAction {
                    title: "Bike to work".into(),
                    location_name: Some("Berlin, Germany".into()),
                    latitude: 52.5,
                    longitude: 13.4,
                    impact_co2_saved: 240.0,
                    ..NewClimateAction::default()
                },
                None,
            )
            .await
            .unwrap();
        client.seed_demo_data().await.unwrap();

        let report = client.report().await.unwrap();
        assert_eq!(report.total_impact.co2_reduction, 240.0);
        assert_eq!(report.total_impact.participants, 12);
        assert_eq!(report.regional.len(), 1);

        let artifact = export(&report, ExportFormat::Csv, "civicsphere-report").unwrap();
        let csv = String::from_utf8(artifact.bytes).unwrap();
        assert!(csv.contains("Total CO2 Reduction,240"));
    }
}
