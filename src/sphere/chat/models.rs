//! Message rows and their addressing scope

use crate::sphere::backend::{Filter, Topic};
use crate::sphere::error::FieldError;
use crate::sphere::live::{Row, Validate};
use crate::sphere::validation::require;
use serde::{Deserialize, Serialize};

pub const MESSAGES: &str = "messages";

/// Room where the AI assistant answers
pub const AI_ROOM: &str = "civicai";

/// Shared room of the chat page
pub const COMMUNITY_ROOM: &str = "community-chat";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub text: String,
    #[serde(default)]
    pub sender_id: Option<String>,
    #[serde(default)]
    pub recipient_id: Option<String>,
    #[serde(default)]
    pub room_id: Option<String>,
    #[serde(default)]
    pub community_id: Option<String>,
    #[serde(default)]
    pub is_ai: bool,
    #[serde(default)]
    pub created_at: Option<String>,
}

impl Message {
    /// Scope the row is addressed to, `None` when it is ambiguous
    pub fn scope(&self) -> Option<Scope> {
        match (
            self.room_id.as_deref(),
            self.community_id.as_deref(),
            self.sender_id.as_deref(),
            self.recipient_id.as_deref(),
        ) {
            (Some(room), None, _, None) => Some(Scope::Room(room.to_string())),
            (None, Some(community), _, None) => Some(Scope::Community(community.to_string())),
            (None, None, Some(a), Some(b)) => Some(Scope::direct(a, b)),
            _ => None,
        }
    }
}

impl Row for Message {
    fn row_key(&self) -> String {
        self.id.clone()
    }
}

/// Where a message is addressed: exactly one of a named room, a direct pair,
/// or a community
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Scope {
    Room(String),
    /// Participants kept sorted so `(a, b)` and `(b, a)` are the same scope
    Direct(String, String),
    Community(String),
}

impl Scope {
    pub fn room(name: &str) -> Self {
        Scope::Room(name.to_string())
    }

    pub fn direct(a: &str, b: &str) -> Self {
        if a <= b {
            Scope::Direct(a.to_string(), b.to_string())
        } else {
            Scope::Direct(b.to_string(), a.to_string())
        }
    }

    pub fn community(id: &str) -> Self {
        Scope::Community(id.to_string())
    }

    pub fn is_ai_room(&self) -> bool {
        matches!(self, Scope::Room(name) if name == AI_ROOM)
    }

    pub fn contains(&self, message: &Message) -> bool {
        message.scope().as_ref() == Some(self)
    }

    /// Store filter for the history read. For a direct pair this reads
    /// everything either participant sent; [`Scope::contains`] narrows it.
    pub fn history_filter(&self) -> Filter {
        match self {
            Scope::Room(name) => Filter::new().eq("room_id", name.as_str()),
            Scope::Community(id) => Filter::new().eq("community_id", id.as_str()),
            Scope::Direct(a, b) => Filter::new().any_eq(vec![
                ("sender_id", a.as_str().into()),
                ("sender_id", b.as_str().into()),
            ]),
        }
    }

    /// Realtime topics; one per participant for a direct pair
    pub fn topics(&self) -> Vec<Topic> {
        match self {
            Scope::Room(name) => vec![Topic::table(MESSAGES).filter_eq("room_id", name.as_str())],
            Scope::Community(id) => vec![Topic::table(MESSAGES).filter_eq("community_id", id.as_str())],
            Scope::Direct(a, b) => vec![
                Topic::table(MESSAGES).filter_eq("sender_id", a.as_str()),
                Topic::table(MESSAGES).filter_eq("sender_id", b.as_str()),
            ],
        }
    }

    /// Row for a message sent by `sender_id` into this scope
    pub(crate) fn draft<'a>(&'a self, sender_id: Option<&'a str>, text: &'a str, is_ai: bool) -> NewMessage<'a> {
        let mut draft = NewMessage {
            text,
            sender_id,
            recipient_id: None,
            room_id: None,
            community_id: None,
            is_ai,
        };
        match self {
            Scope::Room(name) => draft.room_id = Some(name.as_str()),
            Scope::Community(id) => draft.community_id = Some(id.as_str()),
            Scope::Direct(a, b) => {
                let sender = sender_id.unwrap_or_default();
                draft.recipient_id = Some(if sender == a.as_str() { b.as_str() } else { a.as_str() });
            }
        }
        draft
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct NewMessage<'a> {
    pub text: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sender_id: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recipient_id: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub room_id: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub community_id: Option<&'a str>,
    pub is_ai: bool,
}

impl Validate for NewMessage<'_> {
    fn validate(&self) -> Result<(), FieldError> {
        require("text", self.text)?;
        if self.recipient_id.is_some() && self.sender_id.is_none() {
            return Err(FieldError::new("sender_id", "direct messages need a sender"));
        }
        Ok(())
    }
}

/// Pending input of a chat box; cleared only once the message is stored
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Composer {
    pub input: String,
}

impl Composer {
    pub fn new(input: impl Into<String>) -> Self {
        Self { input: input.into() }
    }

    pub fn text(&self) -> &str {
        self.input.trim()
    }

    pub fn clear(&mut self) {
        self.input.clear();
    }
}

/// Result of a send: the stored message and the assistant's reply, if any
#[derive(Debug, Clone, PartialEq)]
pub struct SendOutcome {
    pub message: Message,
    pub ai_reply: Option<Message>,
}

/// Prompt sent to the assistant for a user message
pub fn assistant_prompt(text: &str) -> String {
    format!("User: {}\nAssistant:", text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn message(v: serde_json::Value) -> Message {
        serde_json::from_value(v).unwrap()
    }

    #[test]
    fn scope_resolves_exactly_one_addressing_mode() {
        let room = message(json!({"id": "1", "text": "hi", "room_id": "civicai", "sender_id": "u1"}));
        assert_eq!(room.scope(), Some(Scope::room(AI_ROOM)));
        assert!(room.scope().unwrap().is_ai_room());

        let direct = message(json!({"id": "2", "text": "hi", "sender_id": "u2", "recipient_id": "u1"}));
        assert_eq!(direct.scope(), Some(Scope::direct("u1", "u2")));

        let ambiguous = message(json!({"id": "3", "text": "hi", "room_id": "x", "community_id": "c"}));
        assert_eq!(ambiguous.scope(), None);
    }

    #[test]
    fn direct_draft_addresses_the_other_participant() {
        let scope = Scope::direct("zoe", "ana");
        let draft = scope.draft(Some("zoe"), "hey", false);
        assert_eq!(draft.recipient_id, Some("ana"));
        assert!(draft.room_id.is_none());

        let orphan = scope.draft(None, "hey", false);
        assert_eq!(orphan.validate().unwrap_err().field, "sender_id");
    }

    #[test]
    fn composer_trims() {
        let composer = Composer::new("  hello \n");
        assert_eq!(composer.text(), "hello");
        assert_eq!(assistant_prompt("hi"), "User: hi\nAssistant:");
    }
}
