//! Support tickets
//!
//! Anyone may file a ticket; the signed-in user, if any, is attached.

use crate::sphere::context::SphereContext;
use crate::sphere::error::{FieldError, SphereResult};
use crate::sphere::live::{Row, Validate};
use crate::sphere::validation::{check_url, require};
use serde::{Deserialize, Serialize};
use tracing::info;

pub const SUPPORT_TICKETS: &str = "support_tickets";

pub const STATUS_OPEN: &str = "open";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SupportTicket {
    pub id: String,
    #[serde(default)]
    pub user_id: Option<String>,
    pub message: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub user_agent: Option<String>,
    #[serde(default)]
    pub error_stack: Option<String>,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub created_at: Option<String>,
}

impl Row for SupportTicket {
    fn row_key(&self) -> String {
        self.id.clone()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NewTicket {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_stack: Option<String>,
}

impl NewTicket {
    /// Ticket prefilled with the details of a failure
    pub fn diagnostic(
        url: Option<&str>,
        user_agent: Option<&str>,
        error: Option<&str>,
        stack: Option<&str>,
    ) -> Self {
        let message = format!(
            "Automatically detected issue\nURL: {}\nUser-Agent: {}\nMessage: {}\nStack: {}",
            url.unwrap_or("-"),
            user_agent.unwrap_or("-"),
            error.unwrap_or("-"),
            stack.unwrap_or("-"),
        );
        Self {
            message,
            url: url.map(Into::into),
            user_agent: user_agent.map(Into::into),
            error_stack: stack.map(Into::into),
        }
    }
}

impl Validate for NewTicket {
    fn validate(&self) -> Result<(), FieldError> {
        require("message", &self.message)?;
        check_url("url", self.url.as_deref())
    }
}

#[derive(Debug, Serialize)]
struct TicketInsert<'a> {
    #[serde(flatten)]
    draft: &'a NewTicket,
    user_id: Option<&'a str>,
    status: &'a str,
}

impl Validate for TicketInsert<'_> {
    fn validate(&self) -> Result<(), FieldError> {
        self.draft.validate()
    }
}

#[derive(Clone)]
pub struct SupportService {
    ctx: SphereContext,
}

impl SupportService {
    pub fn new(ctx: SphereContext) -> Self {
        Self { ctx }
    }

    /// Files a ticket with status `open`
    pub async fn submit_ticket(&self, draft: &NewTicket) -> SphereResult<SupportTicket> {
        draft.validate()?;
        let user = self.ctx.identity.current_user().await;
        let ticket: SupportTicket = self
            .ctx
            .mutator()
            .create(
                SUPPORT_TICKETS,
                &TicketInsert {
                    draft,
                    user_id: user.as_ref().map(|u| u.id.as_str()),
                    status: STATUS_OPEN,
                },
                None,
            )
            .await?;
        info!("[Support] 🎫 ticket {} filed", ticket.id);
        Ok(ticket)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sphere::ai::TextGenerator;
    use crate::sphere::backend::{IdentityProvider, LocalBackend};
    use std::sync::Arc;

    #[tokio::test]
    async fn tickets_are_validated_and_filed_open() {
        let backend = Arc::new(LocalBackend::open("sqlite::memory:").await.unwrap());
        let support = SupportService::new(SphereContext::from_backend(backend.clone(), TextGenerator::new(None)));

        let err = support.submit_ticket(&NewTicket::default()).await.unwrap_err();
        assert_eq!(err.field_error().unwrap().field, "message");

        let bad_url = NewTicket {
            message: "map is blank".into(),
            url: Some("not a url".into()),
            ..NewTicket::default()
        };
        assert_eq!(support.submit_ticket(&bad_url).await.unwrap_err().field_error().unwrap().field, "url");

        let anonymous = support
            .submit_ticket(&NewTicket {
                message: "map is blank".into(),
                ..NewTicket::default()
            })
            .await
            .unwrap();
        assert_eq!(anonymous.status, STATUS_OPEN);
        assert!(anonymous.user_id.is_none());

        let me = backend.sign_in("ana@example.com", "pw").await.unwrap();
        let draft = NewTicket::diagnostic(
            Some("https://civicsphere.app/map"),
            Some("cli"),
            Some("boom"),
            None,
        );
        assert!(draft.message.contains("Message: boom\nStack: -"));
        let ticket = support.submit_ticket(&draft).await.unwrap();
        assert_eq!(ticket.user_id.as_deref(), Some(me.id.as_str()));
        assert_eq!(ticket.url.as_deref(), Some("https://civicsphere.app/map"));
    }
}
