//! Chat rooms, direct conversations and community threads

pub mod models;
pub mod service;

pub use models::{assistant_prompt, Composer, Message, Scope, SendOutcome, AI_ROOM, COMMUNITY_ROOM, MESSAGES};
pub use service::ChatService;
