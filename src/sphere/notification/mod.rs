//! User notifications

pub mod models;
pub mod service;

pub use models::{unread_count, Notification, LATEST_LIMIT, NOTIFICATIONS};
pub use service::NotificationService;
