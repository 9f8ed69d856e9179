use crate::sphere::error::FieldError;
use crate::sphere::live::{Row, Validate};
use crate::sphere::validation::{check_coordinates, check_non_negative, require};
use serde::{Deserialize, Serialize};

pub const CLIMATE_ACTIONS: &str = "climate_actions";

pub const STATUS_ACTIVE: &str = "active";

/// Kind of climate action. Names outside the known set are kept verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ActionType {
    #[default]
    Renewable,
    Reforestation,
    Waste,
    Transportation,
    Agriculture,
    Other(String),
}

impl ActionType {
    /// One of the known kinds, case-insensitive
    pub fn parse(name: &str) -> Option<Self> {
        match ActionType::from(name.trim().to_string()) {
            ActionType::Other(_) => None,
            known => Some(known),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            ActionType::Renewable => "renewable",
            ActionType::Reforestation => "reforestation",
            ActionType::Waste => "waste",
            ActionType::Transportation => "transportation",
            ActionType::Agriculture => "agriculture",
            ActionType::Other(name) => name,
        }
    }
}

impl From<String> for ActionType {
    fn from(name: String) -> Self {
        match name.to_ascii_lowercase().as_str() {
            "renewable" => ActionType::Renewable,
            "reforestation" => ActionType::Reforestation,
            "waste" => ActionType::Waste,
            "transportation" => ActionType::Transportation,
            "agriculture" => ActionType::Agriculture,
            _ => ActionType::Other(name),
        }
    }
}

impl From<ActionType> for String {
    fn from(kind: ActionType) -> Self {
        match kind {
            ActionType::Other(name) => name,
            known => known.as_str().to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClimateAction {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub action_type: ActionType,
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default)]
    pub location_name: Option<String>,
    #[serde(default)]
    pub impact_co2_saved: f64,
    #[serde(default = "default_status")]
    pub status: String,
    #[serde(default)]
    pub creator_id: Option<String>,
    #[serde(default)]
    pub community_id: Option<String>,
    #[serde(default)]
    pub is_demo: bool,
    #[serde(default)]
    pub created_at: Option<String>,
}

fn default_status() -> String {
    STATUS_ACTIVE.to_string()
}

impl ClimateAction {
    /// Shown on the map: active and not demo data
    pub fn is_live(&self) -> bool {
        self.status == STATUS_ACTIVE && !self.is_demo
    }
}

impl Row for ClimateAction {
    fn row_key(&self) -> String {
        self.id.clone()
    }
}

/// User input for a new climate action
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NewClimateAction {
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub action_type: ActionType,
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location_name: Option<String>,
    #[serde(default)]
    pub impact_co2_saved: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub community_id: Option<String>,
}

impl Validate for NewClimateAction {
    fn validate(&self) -> Result<(), FieldError> {
        require("title", &self.title)?;
        check_coordinates(self.latitude, self.longitude)?;
        check_non_negative("impact_co2_saved", self.impact_co2_saved)
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct ClimateActionInsert<'a> {
    #[serde(flatten)]
    pub draft: &'a NewClimateAction,
    pub creator_id: &'a str,
    pub status: &'a str,
    pub is_demo: bool,
}

impl Validate for ClimateActionInsert<'_> {
    fn validate(&self) -> Result<(), FieldError> {
        self.draft.validate()
    }
}
