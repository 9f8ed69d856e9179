//! Community rows and drafts

use crate::sphere::error::FieldError;
use crate::sphere::live::{Row, Validate};
use crate::sphere::validation::{check_coordinates, require};
use serde::{Deserialize, Serialize};

pub const COMMUNITIES: &str = "communities";
pub const MEMBERS: &str = "community_members";
pub const JOIN_REQUESTS: &str = "community_join_requests";

/// Who may join
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    /// Anyone can join directly
    #[default]
    Public,
    /// Joining creates a request an admin approves
    Request,
    /// No new members
    Closed,
}

impl Visibility {
    pub fn parse(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "public" => Some(Visibility::Public),
            "request" => Some(Visibility::Request),
            "closed" => Some(Visibility::Closed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Community {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub location_name: Option<String>,
    #[serde(default)]
    pub latitude: Option<f64>,
    #[serde(default)]
    pub longitude: Option<f64>,
    /// Denormalized; reconciled from the membership table
    #[serde(default)]
    pub member_count: i64,
    #[serde(default)]
    pub visibility: Visibility,
    #[serde(default)]
    pub creator_id: Option<String>,
    #[serde(default)]
    pub is_demo: bool,
    #[serde(default)]
    pub created_at: Option<String>,
}

impl Row for Community {
    fn row_key(&self) -> String {
        self.id.clone()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemberRole {
    Admin,
    Moderator,
    #[default]
    Member,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommunityMember {
    pub id: String,
    pub community_id: String,
    pub user_id: String,
    #[serde(default)]
    pub role: MemberRole,
    #[serde(default)]
    pub contribution_points: i64,
    #[serde(default)]
    pub created_at: Option<String>,
}

impl Row for CommunityMember {
    fn row_key(&self) -> String {
        self.id.clone()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestStatus {
    #[default]
    Pending,
    Approved,
    Rejected,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JoinRequest {
    pub id: String,
    pub community_id: String,
    pub user_id: String,
    #[serde(default)]
    pub status: RequestStatus,
    #[serde(default)]
    pub created_at: Option<String>,
}

impl Row for JoinRequest {
    fn row_key(&self) -> String {
        self.id.clone()
    }
}

/// User input for a new community
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NewCommunity {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latitude: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub longitude: Option<f64>,
    #[serde(default)]
    pub visibility: Visibility,
}

impl NewCommunity {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }
}

impl Validate for NewCommunity {
    fn validate(&self) -> Result<(), FieldError> {
        require("name", &self.name)?;
        if let (Some(lat), Some(lng)) = (self.latitude, self.longitude) {
            check_coordinates(lat, lng)?;
        }
        Ok(())
    }
}

/// Row sent on create: the draft plus server-side ownership fields
#[derive(Debug, Serialize)]
pub(crate) struct CommunityInsert<'a> {
    #[serde(flatten)]
    pub draft: &'a NewCommunity,
    pub creator_id: &'a str,
    pub member_count: i64,
    pub is_demo: bool,
}

impl Validate for CommunityInsert<'_> {
    fn validate(&self) -> Result<(), FieldError> {
        self.draft.validate()
    }
}

/// Outcome of a join attempt
#[derive(Debug, Clone, PartialEq)]
pub enum JoinOutcome {
    Joined(CommunityMember),
    Requested(JoinRequest),
    AlreadyMember,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CommunitySort {
    /// Newest first
    #[default]
    Recent,
    /// Most members first
    Members,
    Name,
}

impl CommunitySort {
    pub fn parse(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "recent" => Some(CommunitySort::Recent),
            "members" => Some(CommunitySort::Members),
            "name" => Some(CommunitySort::Name),
            _ => None,
        }
    }
}

/// Case-insensitive search on name and description, then sort
pub fn search_and_sort(communities: &[Community], term: &str, sort: CommunitySort) -> Vec<Community> {
    let needle = term.trim().to_lowercase();
    let mut found: Vec<Community> = communities
        .iter()
        .filter(|c| {
            needle.is_empty()
                || c.name.to_lowercase().contains(&needle)
                || c.description
                    .as_deref()
                    .map(|d| d.to_lowercase().contains(&needle))
                    .unwrap_or(false)
        })
        .cloned()
        .collect();

    match sort {
        CommunitySort::Recent => found.sort_by(|a, b| b.created_at.cmp(&a.created_at)),
        CommunitySort::Members => found.sort_by(|a, b| b.member_count.cmp(&a.member_count)),
        CommunitySort::Name => found.sort_by(|a, b| a.name.to_lowercase().cmp(&b.name.to_lowercase())),
    }
    found
}

#[cfg(test)]
mod tests {
    use super::*;

    fn community(name: &str, description: &str, members: i64, created_at: &str) -> Community {
        Community {
            id: name.to_lowercase(),
            name: name.into(),
            description: Some(description.into()),
            location_name: None,
            latitude: None,
            longitude: None,
            member_count: members,
            visibility: Visibility::Public,
            creator_id: None,
            is_demo: false,
            created_at: Some(created_at.into()),
        }
    }

    #[test]
    fn search_matches_name_or_description() {
        let all = vec![
            community("Solar Circle", "rooftop panels", 3, "2026-01-01"),
            community("Tree Friends", "urban SOLAR gardens", 9, "2026-02-01"),
            community("Bike Club", "commuting", 5, "2026-03-01"),
        ];
        let by_members = search_and_sort(&all, "solar", CommunitySort::Members);
        let names: Vec<_> = by_members.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["Tree Friends", "Solar Circle"]);

        let recent = search_and_sort(&all, "", CommunitySort::Recent);
        assert_eq!(recent[0].name, "Bike Club");
    }

    #[test]
    fn blank_name_fails_validation() {
        let err = NewCommunity::named("   ").validate().unwrap_err();
        assert_eq!(err.field, "name");
    }

    #[test]
    fn visibility_wire_names() {
        assert_eq!(serde_json::to_value(Visibility::Request).unwrap(), "request");
        assert_eq!(Visibility::parse("CLOSED"), Some(Visibility::Closed));
    }
}
