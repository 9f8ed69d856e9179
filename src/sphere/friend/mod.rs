//! Friend requests and the friends list

pub mod models;
pub mod service;

pub use models::{Friend, FriendStatus, FRIENDS};
pub use service::FriendService;
