use crate::sphere::error::FieldError;
use crate::sphere::live::{Row, Validate};
use crate::sphere::validation::require;
use serde::{Deserialize, Serialize};

pub const NOTIFICATIONS: &str = "notifications";

/// Size of the notification drawer
pub const LATEST_LIMIT: usize = 10;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub id: String,
    pub user_id: String,
    #[serde(rename = "type", default)]
    pub kind: String,
    pub title: String,
    #[serde(default)]
    pub is_read: bool,
    #[serde(default)]
    pub created_at: Option<String>,
}

impl Row for Notification {
    fn row_key(&self) -> String {
        self.id.clone()
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct NewNotification<'a> {
    pub user_id: &'a str,
    #[serde(rename = "type")]
    pub kind: &'a str,
    pub title: &'a str,
    pub is_read: bool,
}

impl Validate for NewNotification<'_> {
    fn validate(&self) -> Result<(), FieldError> {
        require("user_id", self.user_id)?;
        require("title", self.title)
    }
}

pub fn unread_count(items: &[Notification]) -> usize {
    items.iter().filter(|n| !n.is_read).count()
}
