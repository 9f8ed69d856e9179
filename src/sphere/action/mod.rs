//! Climate actions logged on the map

pub mod models;
pub mod service;

pub use models::{ActionType, ClimateAction, NewClimateAction, CLIMATE_ACTIONS, STATUS_ACTIVE};
pub use service::ActionService;
