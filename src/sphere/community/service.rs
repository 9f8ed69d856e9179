//! Community service
//!
//! Create / join / leave plus join-request moderation. Creating a community
//! writes two rows (the community and the creator's admin membership); if the
//! second write fails the first is deleted again. `member_count` is
//! recomputed from the membership table after every membership change rather
//! than incremented, so concurrent joins cannot make it drift.

use crate::sphere::backend::{Filter, Query, Topic};
use crate::sphere::community::models::{
    Community, CommunityInsert, CommunityMember, JoinOutcome, JoinRequest, MemberRole,
    NewCommunity, RequestStatus, Visibility, COMMUNITIES, JOIN_REQUESTS, MEMBERS,
};
use crate::sphere::context::SphereContext;
use crate::sphere::error::{SphereError, SphereResult};
use crate::sphere::live::{InsertAt, LiveView, Validate, ViewListener};
use crate::sphere::notification::NotificationService;
use anyhow::Context as _;
use serde_json::json;
use std::sync::Arc;
use tracing::{error, info, warn};

#[derive(Clone)]
pub struct CommunityService {
    ctx: SphereContext,
}

impl CommunityService {
    pub fn new(ctx: SphereContext) -> Self {
        Self { ctx }
    }

    /// All communities, newest first
    pub async fn list(&self) -> SphereResult<Vec<Community>> {
        self.ctx
            .fetch(&Query::table(COMMUNITIES).order("created_at", false))
            .await
    }

    pub async fn get(&self, community_id: &str) -> SphereResult<Option<Community>> {
        self.ctx
            .fetch_one(Query::table(COMMUNITIES).eq("id", community_id))
            .await
    }

    /// Mounted live list of every community
    pub async fn live(&self, listener: Arc<dyn ViewListener<Community>>) -> anyhow::Result<LiveView<Community>> {
        let view = self
            .ctx
            .view::<Community>("communities", InsertAt::Front)
            .with_listener(listener);
        view.mount(
            Query::table(COMMUNITIES).order("created_at", false),
            vec![Topic::table(COMMUNITIES)],
        )
        .await?;
        Ok(view)
    }

    /// Creates a community with the caller as its admin.
    ///
    /// Validation runs before anything is sent. When the membership write
    /// fails the community row is deleted again and the membership error is
    /// returned.
    pub async fn create(
        &self,
        draft: &NewCommunity,
        view: Option<&LiveView<Community>>,
    ) -> SphereResult<Community> {
        draft.validate()?;
        let user = self.ctx.require_user().await?;
        let mutator = self.ctx.mutator();

        let insert = CommunityInsert {
            draft,
            creator_id: &user.id,
            member_count: 1,
            is_demo: false,
        };
        let community: Community = mutator.create(COMMUNITIES, &insert, view).await?;

        let membership = self
            .ctx
            .store
            .insert(
                MEMBERS,
                vec![json!({
                    "community_id": community.id,
                    "user_id": user.id,
                    "role": MemberRole::Admin,
                })],
            )
            .await;

        if let Err(e) = membership {
            error!(
                "[Community] admin membership for {} failed, deleting community: {:#}",
                community.id, e
            );
            let by_id = Filter::new().eq("id", community.id.clone());
            if let Err(undo) = mutator.delete::<Community>(COMMUNITIES, &by_id, view).await {
                error!("[Community] compensating delete of {} failed: {}", community.id, undo);
            }
            return Err(SphereError::Remote(e.context("failed to add creator as admin")));
        }

        info!("[Community] ✅ created {} ({})", community.name, community.id);
        Ok(community)
    }

    /// Joins directly, files a join request, or refuses, by visibility
    pub async fn join(&self, community_id: &str) -> SphereResult<JoinOutcome> {
        let user = self.ctx.require_user().await?;
        let community = self
            .get(community_id)
            .await?
            .ok_or_else(|| SphereError::rejected(format!("community {} not found", community_id)))?;

        if self.membership(community_id, &user.id).await?.is_some() {
            return Ok(JoinOutcome::AlreadyMember);
        }

        match community.visibility {
            Visibility::Closed => Err(SphereError::rejected(format!(
                "{} is closed to new members",
                community.name
            ))),
            Visibility::Request => {
                let pending = self
                    .ctx
                    .fetch_one::<JoinRequest>(
                        Query::table(JOIN_REQUESTS)
                            .eq("community_id", community_id)
                            .eq("user_id", user.id.clone())
                            .eq("status", "pending"),
                    )
                    .await?;
                if let Some(existing) = pending {
                    return Ok(JoinOutcome::Requested(existing));
                }
                let request: JoinRequest = self
                    .ctx
                    .mutator()
                    .create(
                        JOIN_REQUESTS,
                        &NewJoinRequest {
                            community_id,
                            user_id: &user.id,
                        },
                        None,
                    )
                    .await?;
                info!("[Community] 📝 join request {} for {}", request.id, community.name);
                Ok(JoinOutcome::Requested(request))
            }
            Visibility::Public => {
                let member = self.add_member(community_id, &user.id, MemberRole::Member).await?;
                info!("[Community] 👋 {} joined {}", user.id, community.name);
                Ok(JoinOutcome::Joined(member))
            }
        }
    }

    pub async fn leave(&self, community_id: &str) -> SphereResult<bool> {
        let user = self.ctx.require_user().await?;
        self.remove_member(community_id, &user.id).await
    }

    /// Removes a member; returns whether a membership existed
    pub async fn remove_member(&self, community_id: &str, user_id: &str) -> SphereResult<bool> {
        let filter = Filter::new()
            .eq("community_id", community_id)
            .eq("user_id", user_id);
        let removed = self
            .ctx
            .mutator()
            .delete::<CommunityMember>(MEMBERS, &filter, None)
            .await?;
        if !removed.is_empty() {
            self.reconcile_member_count(community_id).await?;
        }
        Ok(!removed.is_empty())
    }

    pub async fn members(&self, community_id: &str) -> SphereResult<Vec<CommunityMember>> {
        self.ctx
            .fetch(&Query::table(MEMBERS).eq("community_id", community_id))
            .await
    }

    pub async fn membership(&self, community_id: &str, user_id: &str) -> SphereResult<Option<CommunityMember>> {
        self.ctx
            .fetch_one(
                Query::table(MEMBERS)
                    .eq("community_id", community_id)
                    .eq("user_id", user_id),
            )
            .await
    }

    /// Join requests, newest first; all communities when `community_id` is `None`
    pub async fn join_requests(&self, community_id: Option<&str>) -> SphereResult<Vec<JoinRequest>> {
        let mut query = Query::table(JOIN_REQUESTS).order("created_at", false);
        if let Some(id) = community_id {
            query = query.eq("community_id", id);
        }
        self.ctx.fetch(&query).await
    }

    /// Approves a pending request: adds the member, marks the request, and
    /// notifies the requester
    pub async fn approve(&self, request_id: &str) -> SphereResult<JoinRequest> {
        let request = self.pending_request(request_id).await?;
        if let Err(e) = self
            .add_member(&request.community_id, &request.user_id, MemberRole::Member)
            .await
        {
            // already a member through another path; the request is still closed
            if self.membership(&request.community_id, &request.user_id).await?.is_none() {
                return Err(e);
            }
            warn!("[Community] requester already a member: {}", e);
        }
        let updated = self.set_request_status(request_id, RequestStatus::Approved).await?;

        let notifications = NotificationService::new(self.ctx.clone());
        if let Err(e) = notifications
            .push(&request.user_id, "join_approved", "Your join request was approved")
            .await
        {
            warn!("[Community] approval notification not sent: {}", e);
        }
        Ok(updated)
    }

    pub async fn reject(&self, request_id: &str) -> SphereResult<JoinRequest> {
        self.pending_request(request_id).await?;
        self.set_request_status(request_id, RequestStatus::Rejected).await
    }

    /// Recounts members and stores the result on the community row
    pub async fn reconcile_member_count(&self, community_id: &str) -> SphereResult<i64> {
        let count = self.members(community_id).await?.len() as i64;
        self.ctx
            .store
            .update(
                COMMUNITIES,
                &Filter::new().eq("id", community_id),
                json!({ "member_count": count }),
            )
            .await
            .with_context(|| format!("failed to update member_count of {}", community_id))?;
        Ok(count)
    }

    async fn add_member(&self, community_id: &str, user_id: &str, role: MemberRole) -> SphereResult<CommunityMember> {
        let rows = self
            .ctx
            .store
            .insert(
                MEMBERS,
                vec![json!({
                    "community_id": community_id,
                    "user_id": user_id,
                    "role": role,
                })],
            )
            .await
            .context("failed to add member")?;
        let member = rows
            .into_iter()
            .next()
            .map(serde_json::from_value::<CommunityMember>)
            .transpose()
            .context("unexpected membership row")?
            .ok_or_else(|| SphereError::Remote(anyhow::anyhow!("membership insert returned no row")))?;
        if let Err(e) = self.reconcile_member_count(community_id).await {
            warn!("[Community] member_count of {} not reconciled: {}", community_id, e);
        }
        Ok(member)
    }

    async fn pending_request(&self, request_id: &str) -> SphereResult<JoinRequest> {
        let request = self
            .ctx
            .fetch_one::<JoinRequest>(Query::table(JOIN_REQUESTS).eq("id", request_id))
            .await?
            .ok_or_else(|| SphereError::rejected(format!("join request {} not found", request_id)))?;
        if request.status != RequestStatus::Pending {
            return Err(SphereError::rejected(format!(
                "join request {} is already {:?}",
                request_id, request.status
            )));
        }
        Ok(request)
    }

    async fn set_request_status(&self, request_id: &str, status: RequestStatus) -> SphereResult<JoinRequest> {
        self.ctx
            .mutator()
            .update::<JoinRequest>(
                JOIN_REQUESTS,
                &Filter::new().eq("id", request_id),
                json!({ "status": status }),
                None,
            )
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| SphereError::rejected(format!("join request {} not found", request_id)))
    }
}

#[derive(serde::Serialize)]
struct NewJoinRequest<'a> {
    community_id: &'a str,
    user_id: &'a str,
}

impl Validate for NewJoinRequest<'_> {
    fn validate(&self) -> Result<(), crate::sphere::error::FieldError> {
        crate::sphere::validation::require("community_id", self.community_id)
    }
}
