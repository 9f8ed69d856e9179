//! Community projects with CO2 targets

use crate::sphere::backend::{Filter, Query, Topic};
use crate::sphere::community::{Community, COMMUNITIES};
use crate::sphere::context::SphereContext;
use crate::sphere::error::{SphereError, SphereResult};
use crate::sphere::live::{InsertAt, LiveView, Validate, ViewListener};
use crate::sphere::project::models::{NewProject, Project, ProjectInsert, ProjectStatus, PROJECTS};
use crate::sphere::validation::check_non_negative;
use serde_json::json;
use std::sync::Arc;
use tracing::info;

#[derive(Clone)]
pub struct ProjectService {
    ctx: SphereContext,
}

impl ProjectService {
    pub fn new(ctx: SphereContext) -> Self {
        Self { ctx }
    }

    fn query(community_id: Option<&str>) -> Query {
        let mut query = Query::table(PROJECTS).order("created_at", false);
        if let Some(id) = community_id {
            query = query.eq("community_id", id);
        }
        query
    }

    /// Projects newest first, optionally of one community
    pub async fn list(&self, community_id: Option<&str>) -> SphereResult<Vec<Project>> {
        self.ctx.fetch(&Self::query(community_id)).await
    }

    pub async fn live(
        &self,
        community_id: Option<&str>,
        listener: Arc<dyn ViewListener<Project>>,
    ) -> anyhow::Result<LiveView<Project>> {
        let mut topic = Topic::table(PROJECTS);
        let mut view = self.ctx.view::<Project>("projects", InsertAt::Front);
        if let Some(id) = community_id {
            topic = topic.filter_eq("community_id", id);
            let owner = id.to_string();
            view = view.with_filter(Arc::new(move |p: &Project| p.community_id == owner));
        }
        let view = view.with_listener(listener);
        view.mount(Self::query(community_id), vec![topic]).await?;
        Ok(view)
    }

    pub async fn create(&self, draft: &NewProject, view: Option<&LiveView<Project>>) -> SphereResult<Project> {
        draft.validate()?;
        let user = self.ctx.require_user().await?;
        let community_id = draft.community_id.as_deref().unwrap_or_default();
        if self
            .ctx
            .fetch_one::<Community>(Query::table(COMMUNITIES).eq("id", community_id))
            .await?
            .is_none()
        {
            return Err(SphereError::rejected(format!("community {} does not exist", community_id)));
        }

        let project: Project = self
            .ctx
            .mutator()
            .create(
                PROJECTS,
                &ProjectInsert {
                    draft,
                    creator_id: &user.id,
                    actual_co2_reduction: 0.0,
                },
                view,
            )
            .await?;
        info!("[Project] 📋 created {} in {}", project.title, project.community_id);
        Ok(project)
    }

    /// Records the reduction achieved so far
    pub async fn update_progress(
        &self,
        project_id: &str,
        actual_co2_reduction: f64,
        view: Option<&LiveView<Project>>,
    ) -> SphereResult<Project> {
        check_non_negative("actual_co2_reduction", actual_co2_reduction)?;
        self.patch(project_id, json!({ "actual_co2_reduction": actual_co2_reduction }), view)
            .await
    }

    pub async fn set_status(
        &self,
        project_id: &str,
        status: ProjectStatus,
        view: Option<&LiveView<Project>>,
    ) -> SphereResult<Project> {
        self.patch(project_id, json!({ "status": status }), view).await
    }

    async fn patch(
        &self,
        project_id: &str,
        patch: serde_json::Value,
        view: Option<&LiveView<Project>>,
    ) -> SphereResult<Project> {
        self.ctx
            .mutator()
            .update(PROJECTS, &Filter::new().eq("id", project_id), patch, view)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| SphereError::rejected(format!("project {} not found", project_id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sphere::ai::TextGenerator;
    use crate::sphere::backend::{IdentityProvider, LocalBackend};
    use crate::sphere::community::{CommunityService, NewCommunity};
    use crate::sphere::live::EmptyViewListener;
    use crate::sphere::project::{arrange, ProjectSort, StatusFilter};

    #[tokio::test]
    async fn create_and_track_progress() {
        let backend = Arc::new(LocalBackend::open("sqlite::memory:").await.unwrap());
        backend.sign_in("ana@example.com", "pw").await.unwrap();
        let ctx = SphereContext::from_backend(backend, TextGenerator::new(None));
        let community = CommunityService::new(ctx.clone())
            .create(&NewCommunity::named("Solar Circle"), None)
            .await
            .unwrap();
        let service = ProjectService::new(ctx);
        let view = service
            .live(Some(&community.id), Arc::new(EmptyViewListener))
            .await
            .unwrap();

        let project = service
            .create(
                &NewProject {
                    title: "Rooftop panels".into(),
                    community_id: Some(community.id.clone()),
                    target_co2_reduction: 400.0,
                    ..NewProject::default()
                },
                Some(&view),
            )
            .await
            .unwrap();
        assert_eq!(project.status, ProjectStatus::Planning);
        assert_eq!(view.len().await, 1);

        let updated = service.update_progress(&project.id, 100.0, Some(&view)).await.unwrap();
        assert_eq!(updated.progress_percent(), 25);
        service.set_status(&project.id, ProjectStatus::Active, Some(&view)).await.unwrap();

        let arranged = arrange(
            &view.snapshot().await,
            StatusFilter::Only(ProjectStatus::Active),
            ProjectSort::Progress,
        );
        assert_eq!(arranged.len(), 1);
        assert!(service.update_progress(&project.id, -5.0, None).await.is_err());
    }

    #[tokio::test]
    async fn missing_community_is_rejected_before_insert() {
        let backend = Arc::new(LocalBackend::open("sqlite::memory:").await.unwrap());
        backend.sign_in("ana@example.com", "pw").await.unwrap();
        let service = ProjectService::new(SphereContext::from_backend(backend, TextGenerator::new(None)));
        let draft = NewProject {
            title: "Ghost".into(),
            community_id: Some("nope".into()),
            ..NewProject::default()
        };
        assert!(matches!(service.create(&draft, None).await, Err(SphereError::Rejected(_))));
        assert!(service.list(None).await.unwrap().is_empty());
    }
}
