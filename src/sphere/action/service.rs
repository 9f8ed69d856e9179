//! Climate actions and the active map view

use crate::sphere::action::models::{
    ClimateAction, ClimateActionInsert, NewClimateAction, CLIMATE_ACTIONS, STATUS_ACTIVE,
};
use crate::sphere::backend::{Filter, Query, Topic};
use crate::sphere::community::{Community, COMMUNITIES};
use crate::sphere::context::SphereContext;
use crate::sphere::error::{SphereError, SphereResult};
use crate::sphere::live::{InsertAt, LiveView, Validate, ViewListener};
use serde_json::json;
use std::sync::Arc;
use tracing::info;

#[derive(Clone)]
pub struct ActionService {
    ctx: SphereContext,
}

impl ActionService {
    pub fn new(ctx: SphereContext) -> Self {
        Self { ctx }
    }

    fn active_query() -> Query {
        Query::table(CLIMATE_ACTIONS)
            .eq("status", STATUS_ACTIVE)
            .eq("is_demo", false)
            .order("created_at", false)
    }

    /// Active, non-demo actions, newest first
    pub async fn list_active(&self) -> SphereResult<Vec<ClimateAction>> {
        self.ctx.fetch(&Self::active_query()).await
    }

    /// Every action, demo rows included
    pub async fn list_all(&self) -> SphereResult<Vec<ClimateAction>> {
        self.ctx
            .fetch(&Query::table(CLIMATE_ACTIONS).order("created_at", false))
            .await
    }

    /// Live map points. An action whose status leaves `active` disappears
    /// and comes back when it is reactivated.
    pub async fn active_map_view(
        &self,
        listener: Arc<dyn ViewListener<ClimateAction>>,
    ) -> anyhow::Result<LiveView<ClimateAction>> {
        let view = self
            .ctx
            .view::<ClimateAction>("climate_actions", InsertAt::Front)
            .with_filter(Arc::new(|a: &ClimateAction| a.is_live()))
            .with_listener(listener);
        view.mount(Self::active_query(), vec![Topic::table(CLIMATE_ACTIONS)])
            .await?;
        Ok(view)
    }

    /// Logs a new action for the signed-in user
    pub async fn create(
        &self,
        draft: &NewClimateAction,
        view: Option<&LiveView<ClimateAction>>,
    ) -> SphereResult<ClimateAction> {
        draft.validate()?;
        let user = self.ctx.require_user().await?;
        if let Some(community_id) = draft.community_id.as_deref() {
            let exists = self
                .ctx
                .fetch_one::<Community>(Query::table(COMMUNITIES).eq("id", community_id))
                .await?
                .is_some();
            if !exists {
                return Err(SphereError::rejected(format!(
                    "community {} does not exist",
                    community_id
                )));
            }
        }

        let action: ClimateAction = self
            .ctx
            .mutator()
            .create(
                CLIMATE_ACTIONS,
                &ClimateActionInsert {
                    draft,
                    creator_id: &user.id,
                    status: STATUS_ACTIVE,
                    is_demo: false,
                },
                view,
            )
            .await?;
        info!(
            "[Action] 🌱 {} at ({:.4}, {:.4}) saves {} kg",
            action.title, action.latitude, action.longitude, action.impact_co2_saved
        );
        Ok(action)
    }

    pub async fn set_status(
        &self,
        action_id: &str,
        status: &str,
        view: Option<&LiveView<ClimateAction>>,
    ) -> SphereResult<ClimateAction> {
        crate::sphere::validation::require("status", status)?;
        self.ctx
            .mutator()
            .update(
                CLIMATE_ACTIONS,
                &Filter::new().eq("id", action_id),
                json!({ "status": status }),
                view,
            )
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| SphereError::rejected(format!("climate action {} not found", action_id)))
    }

    pub async fn delete(&self, action_id: &str, view: Option<&LiveView<ClimateAction>>) -> SphereResult<bool> {
        let removed = self
            .ctx
            .mutator()
            .delete::<ClimateAction>(CLIMATE_ACTIONS, &Filter::new().eq("id", action_id), view)
            .await?;
        Ok(!removed.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sphere::action::ActionType;
    use crate::sphere::ai::TextGenerator;
    use crate::sphere::backend::{IdentityProvider, LocalBackend};
    use crate::sphere::live::EmptyViewListener;
    use std::time::Duration;

    async fn setup() -> (ActionService, Arc<LocalBackend>) {
        let backend = Arc::new(LocalBackend::open("sqlite::memory:").await.unwrap());
        backend.sign_in("ana@example.com", "pw").await.unwrap();
        let ctx = SphereContext::from_backend(backend.clone(), TextGenerator::new(None));
        (ActionService::new(ctx), backend)
    }

    fn draft(title: &str) -> NewClimateAction {
        NewClimateAction {
            title: title.into(),
            action_type: ActionType::Reforestation,
            latitude: -6.2,
            longitude: 106.8,
            impact_co2_saved: 500.0,
            ..NewClimateAction::default()
        }
    }

    #[tokio::test]
    async fn map_view_follows_status() {
        let (service, _) = setup().await;
        let view = service.active_map_view(Arc::new(EmptyViewListener)).await.unwrap();
        let action = service.create(&draft("Mangrove planting"), Some(&view)).await.unwrap();
        assert_eq!(action.status, STATUS_ACTIVE);
        assert_eq!(view.len().await, 1);

        service.set_status(&action.id, "completed", None).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(view.is_empty().await);

        service.set_status(&action.id, STATUS_ACTIVE, None).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(view.len().await, 1);
        assert_eq!(service.list_active().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn unknown_community_is_rejected() {
        let (service, _) = setup().await;
        let err = service
            .create(
                &NewClimateAction {
                    community_id: Some("missing".into()),
                    ..draft("Bike lane")
                },
                None,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, SphereError::Rejected(_)));
        assert!(service.list_all().await.unwrap().is_empty());
    }
}
