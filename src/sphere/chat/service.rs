//! Chat: history, live rooms and sending
//!
//! `send` clears the composer only after the insert is confirmed, so a
//! failed send leaves the user's text in place. In the assistant room the
//! reply is generated after the user's message is stored and saved as an
//! `is_ai` message; a missing or failed reply never fails the send.

use crate::sphere::backend::Query;
use crate::sphere::chat::models::{assistant_prompt, Composer, Message, Scope, SendOutcome, MESSAGES};
use crate::sphere::context::SphereContext;
use crate::sphere::error::{FieldError, SphereError, SphereResult};
use crate::sphere::live::{InsertAt, LiveView, ViewListener};
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Clone)]
pub struct ChatService {
    ctx: SphereContext,
}

impl ChatService {
    pub fn new(ctx: SphereContext) -> Self {
        Self { ctx }
    }

    fn history_query(scope: &Scope) -> Query {
        Query::table(MESSAGES)
            .filter(scope.history_filter())
            .order("created_at", true)
    }

    /// Messages of `scope`, oldest first
    pub async fn history(&self, scope: &Scope) -> SphereResult<Vec<Message>> {
        let rows: Vec<Message> = self.ctx.fetch(&Self::history_query(scope)).await?;
        Ok(rows.into_iter().filter(|m| scope.contains(m)).collect())
    }

    /// Live conversation; new messages are appended
    pub async fn open(
        &self,
        scope: &Scope,
        listener: Arc<dyn ViewListener<Message>>,
    ) -> SphereResult<LiveView<Message>> {
        if let Scope::Direct(a, b) = scope {
            let user = self.ctx.require_user().await?;
            if user.id != *a && user.id != *b {
                return Err(SphereError::rejected("not a participant of this conversation"));
            }
        }
        let owned = scope.clone();
        let view = self
            .ctx
            .view::<Message>("messages", InsertAt::Back)
            .with_filter(Arc::new(move |m: &Message| owned.contains(m)))
            .with_listener(listener);
        view.mount(Self::history_query(scope), scope.topics()).await?;
        Ok(view)
    }

    pub async fn send(
        &self,
        scope: &Scope,
        composer: &mut Composer,
        view: Option<&LiveView<Message>>,
    ) -> SphereResult<SendOutcome> {
        let text = composer.text().to_string();
        if text.is_empty() {
            return Err(FieldError::required("text").into());
        }
        let user = self.ctx.require_user().await?;
        if let Scope::Direct(a, b) = scope {
            if user.id != *a && user.id != *b {
                return Err(SphereError::rejected("not a participant of this conversation"));
            }
        }

        let message: Message = self
            .ctx
            .mutator()
            .create(MESSAGES, &scope.draft(Some(&user.id), &text, false), view)
            .await?;
        composer.clear();
        debug!("[Chat] sent {} to {:?}", message.id, scope);

        let ai_reply = if scope.is_ai_room() {
            self.assistant_reply(scope, &text, view).await
        } else {
            None
        };
        Ok(SendOutcome { message, ai_reply })
    }

    async fn assistant_reply(&self, scope: &Scope, text: &str, view: Option<&LiveView<Message>>) -> Option<Message> {
        let reply = self.ctx.ai.generate(&assistant_prompt(text)).await?;
        match self
            .ctx
            .mutator()
            .create::<_, Message>(MESSAGES, &scope.draft(None, &reply, true), view)
            .await
        {
            Ok(message) => {
                info!("[Chat] 🤖 assistant replied ({} chars)", reply.len());
                Some(message)
            }
            Err(e) => {
                warn!("[Chat] assistant reply not saved: {}", e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sphere::ai::TextGenerator;
    use crate::sphere::backend::{IdentityProvider, LocalBackend};
    use crate::sphere::chat::models::{AI_ROOM, COMMUNITY_ROOM};
    use crate::sphere::live::EmptyViewListener;
    use std::time::Duration;

    async fn setup(ai: TextGenerator) -> (ChatService, Arc<LocalBackend>) {
        let backend = Arc::new(LocalBackend::open("sqlite::memory:").await.unwrap());
        let ctx = SphereContext::from_backend(backend.clone(), ai);
        (ChatService::new(ctx), backend)
    }

    #[tokio::test]
    async fn composer_survives_a_refused_send() {
        let (service, _) = setup(TextGenerator::new(None)).await;
        let mut composer = Composer::new("hello");
        let err = service
            .send(&Scope::room(COMMUNITY_ROOM), &mut composer, None)
            .await
            .unwrap_err();
        assert!(matches!(err, SphereError::Unauthenticated));
        assert_eq!(composer.input, "hello");

        let mut blank = Composer::new("   ");
        let err = service.send(&Scope::room(COMMUNITY_ROOM), &mut blank, None).await.unwrap_err();
        assert_eq!(err.field_error().unwrap().field, "text");
    }

    #[tokio::test]
    async fn direct_conversation_is_private_to_the_pair() {
        let (service, backend) = setup(TextGenerator::new(None)).await;
        let bo = backend.sign_in("bo@example.com", "pw").await.unwrap();
        let ana = backend.sign_in("ana@example.com", "pw").await.unwrap();
        let pair = Scope::direct(&ana.id, &bo.id);

        let view = service.open(&pair, Arc::new(EmptyViewListener)).await.unwrap();
        let mut composer = Composer::new("hi bo");
        let outcome = service.send(&pair, &mut composer, Some(&view)).await.unwrap();
        assert!(composer.input.is_empty());
        assert_eq!(outcome.message.recipient_id.as_deref(), Some(bo.id.as_str()));
        assert!(outcome.ai_reply.is_none());

        // ana posting in a room must not leak into the direct view
        service
            .send(&Scope::room(COMMUNITY_ROOM), &mut Composer::new("hello all"), None)
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(view.len().await, 1);
        assert_eq!(service.history(&pair).await.unwrap().len(), 1);

        let carl = backend.sign_in("carl@example.com", "pw").await.unwrap();
        assert_ne!(carl.id, ana.id);
        assert!(matches!(
            service.open(&pair, Arc::new(EmptyViewListener)).await,
            Err(SphereError::Rejected(_))
        ));
    }

    #[tokio::test]
    async fn assistant_room_without_key_sends_without_reply() {
        let (service, backend) = setup(TextGenerator::new(None)).await;
        backend.sign_in("ana@example.com", "pw").await.unwrap();
        let outcome = service
            .send(&Scope::room(AI_ROOM), &mut Composer::new("how do I compost?"), None)
            .await
            .unwrap();
        assert!(outcome.ai_reply.is_none());
        assert_eq!(service.history(&Scope::room(AI_ROOM)).await.unwrap().len(), 1);
    }
}
