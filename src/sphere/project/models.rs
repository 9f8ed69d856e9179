use crate::sphere::error::FieldError;
use crate::sphere::live::{Row, Validate};
use crate::sphere::validation::{check_non_negative, require, require_id};
use serde::{Deserialize, Serialize};

pub const PROJECTS: &str = "projects";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProjectStatus {
    #[default]
    Planning,
    Active,
    Completed,
}

impl ProjectStatus {
    pub fn parse(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "planning" => Some(ProjectStatus::Planning),
            "active" => Some(ProjectStatus::Active),
            "completed" => Some(ProjectStatus::Completed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    pub community_id: String,
    #[serde(default)]
    pub status: ProjectStatus,
    #[serde(default)]
    pub start_date: Option<String>,
    #[serde(default)]
    pub end_date: Option<String>,
    #[serde(default)]
    pub target_co2_reduction: f64,
    #[serde(default)]
    pub actual_co2_reduction: f64,
    #[serde(default)]
    pub creator_id: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
}

impl Project {
    /// actual / target, 0 without a target
    pub fn progress(&self) -> f64 {
        if self.target_co2_reduction > 0.0 {
            self.actual_co2_reduction / self.target_co2_reduction
        } else {
            0.0
        }
    }

    /// Rounded progress percentage for display
    pub fn progress_percent(&self) -> u32 {
        (self.progress() * 100.0).round().max(0.0) as u32
    }
}

impl Row for Project {
    fn row_key(&self) -> String {
        self.id.clone()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NewProject {
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub community_id: Option<String>,
    #[serde(default)]
    pub status: ProjectStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_date: Option<String>,
    #[serde(default)]
    pub target_co2_reduction: f64,
}

impl Validate for NewProject {
    fn validate(&self) -> Result<(), FieldError> {
        require("title", &self.title)?;
        require_id("community_id", self.community_id.as_deref())?;
        check_non_negative("target_co2_reduction", self.target_co2_reduction)
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct ProjectInsert<'a> {
    #[serde(flatten)]
    pub draft: &'a NewProject,
    pub creator_id: &'a str,
    pub actual_co2_reduction: f64,
}

impl Validate for ProjectInsert<'_> {
    fn validate(&self) -> Result<(), FieldError> {
        self.draft.validate()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StatusFilter {
    #[default]
    All,
    Only(ProjectStatus),
}

impl StatusFilter {
    pub fn parse(name: &str) -> Option<Self> {
        if name.eq_ignore_ascii_case("all") {
            return Some(StatusFilter::All);
        }
        ProjectStatus::parse(name).map(StatusFilter::Only)
    }

    pub fn admits(&self, project: &Project) -> bool {
        match self {
            StatusFilter::All => true,
            StatusFilter::Only(status) => project.status == *status,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProjectSort {
    #[default]
    Recent,
    /// Largest actual reduction first
    Impact,
    Progress,
}

impl ProjectSort {
    pub fn parse(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "recent" => Some(ProjectSort::Recent),
            "impact" => Some(ProjectSort::Impact),
            "progress" => Some(ProjectSort::Progress),
            _ => None,
        }
    }
}

/// Filters by status, then sorts
pub fn arrange(projects: &[Project], filter: StatusFilter, sort: ProjectSort) -> Vec<Project> {
    let mut out: Vec<Project> = projects.iter().filter(|p| filter.admits(p)).cloned().collect();
    match sort {
        ProjectSort::Recent => out.sort_by(|a, b| b.created_at.cmp(&a.created_at)),
        ProjectSort::Impact => out.sort_by(|a, b| b.actual_co2_reduction.total_cmp(&a.actual_co2_reduction)),
        ProjectSort::Progress => out.sort_by(|a, b| b.progress().total_cmp(&a.progress())),
    }
    out
}

/// Per-status counts shown next to the filter tabs
pub fn count_by_status(projects: &[Project], status: ProjectStatus) -> usize {
    projects.iter().filter(|p| p.status == status).count()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn project(id: &str, status: ProjectStatus, target: f64, actual: f64, created_at: &str) -> Project {
        Project {
            id: id.into(),
            title: id.into(),
            description: None,
            community_id: "c1".into(),
            status,
            start_date: None,
            end_date: None,
            target_co2_reduction: target,
            actual_co2_reduction: actual,
            creator_id: None,
            created_at: Some(created_at.into()),
        }
    }

    #[test]
    fn progress_without_target_is_zero() {
        assert_eq!(project("a", ProjectStatus::Active, 0.0, 50.0, "x").progress(), 0.0);
        assert_eq!(project("b", ProjectStatus::Active, 200.0, 50.0, "x").progress_percent(), 25);
    }

    #[test]
    fn arrange_filters_then_sorts() {
        let all = vec![
            project("a", ProjectStatus::Active, 100.0, 90.0, "2026-01-01"),
            project("b", ProjectStatus::Active, 1000.0, 200.0, "2026-02-01"),
            project("c", ProjectStatus::Completed, 10.0, 10.0, "2026-03-01"),
        ];
        let ids = |v: Vec<Project>| v.into_iter().map(|p| p.id).collect::<Vec<_>>();

        assert_eq!(ids(arrange(&all, StatusFilter::All, ProjectSort::Recent)), vec!["c", "b", "a"]);
        assert_eq!(
            ids(arrange(&all, StatusFilter::Only(ProjectStatus::Active), ProjectSort::Impact)),
            vec!["b", "a"]
        );
        assert_eq!(
            ids(arrange(&all, StatusFilter::Only(ProjectStatus::Active), ProjectSort::Progress)),
            vec!["a", "b"]
        );
        assert_eq!(count_by_status(&all, ProjectStatus::Planning), 0);
    }

    #[test]
    fn draft_needs_title_and_community() {
        let mut draft = NewProject {
            title: "Solar roofs".into(),
            ..NewProject::default()
        };
        assert_eq!(draft.validate().unwrap_err().field, "community_id");
        draft.community_id = Some("c1".into());
        assert!(draft.validate().is_ok());
        assert_eq!(StatusFilter::parse("ALL"), Some(StatusFilter::All));
    }
}
