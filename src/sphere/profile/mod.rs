//! User profiles

pub mod models;
pub mod service;

pub use models::{check_language, CustomLink, Profile, AVATAR_BUCKET, PROFILES, SUPPORTED_LANGUAGES};
pub use service::ProfileService;
