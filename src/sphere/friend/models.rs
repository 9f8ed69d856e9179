use crate::sphere::error::FieldError;
use crate::sphere::live::{Row, Validate};
use crate::sphere::validation::require;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const FRIENDS: &str = "friends";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FriendStatus {
    #[default]
    Pending,
    Accepted,
    Blocked,
}

/// One direction of a friendship; `(user_id, friend_id)` is unique
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Friend {
    #[serde(default)]
    pub id: Option<String>,
    pub user_id: String,
    pub friend_id: String,
    #[serde(default)]
    pub status: FriendStatus,
    #[serde(default)]
    pub created_at: Option<String>,
}

impl Row for Friend {
    fn row_key(&self) -> String {
        format!("{}:{}", self.user_id, self.friend_id)
    }

    fn key_of(value: &Value) -> Option<String> {
        let user = value.get("user_id")?.as_str()?;
        let friend = value.get("friend_id")?.as_str()?;
        Some(format!("{}:{}", user, friend))
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct NewFriendRequest<'a> {
    pub user_id: &'a str,
    pub friend_id: &'a str,
    pub status: FriendStatus,
}

impl Validate for NewFriendRequest<'_> {
    fn validate(&self) -> Result<(), FieldError> {
        require("friend_id", self.friend_id)?;
        if self.user_id == self.friend_id {
            return Err(FieldError::new("username", "you cannot befriend yourself"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn key_is_the_directed_pair() {
        let row = json!({"id": "9", "user_id": "a", "friend_id": "b", "status": "accepted"});
        let friend: Friend = serde_json::from_value(row.clone()).unwrap();
        assert_eq!(friend.row_key(), "a:b");
        assert_eq!(Friend::key_of(&row).as_deref(), Some("a:b"));
        assert_eq!(friend.status, FriendStatus::Accepted);
    }

    #[test]
    fn self_request_is_invalid() {
        let draft = NewFriendRequest {
            user_id: "a",
            friend_id: "a",
            status: FriendStatus::Pending,
        };
        assert_eq!(draft.validate().unwrap_err().field, "username");
    }
}
