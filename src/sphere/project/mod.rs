//! Projects

pub mod models;
pub mod service;

pub use models::{
    arrange, count_by_status, NewProject, Project, ProjectSort, ProjectStatus, StatusFilter, PROJECTS,
};
pub use service::ProjectService;
