//! Errors surfaced at the mutation boundary
//!
//! Backends and services work with `anyhow::Result` internally; user-facing
//! operations map failures into [`SphereError`] so callers can tell a local
//! validation message apart from a remote failure.

use thiserror::Error;

/// Field-level validation failure, shown next to the offending input
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{field}: {message}")]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn required(field: &str) -> Self {
        Self::new(field, format!("{} is required", field))
    }
}

#[derive(Debug, Error)]
pub enum SphereError {
    /// Blocked locally, the remote store was never contacted
    #[error("validation failed: {0}")]
    Validation(#[from] FieldError),

    /// The operation needs a signed-in user
    #[error("sign-in required")]
    Unauthenticated,

    /// The operation is not allowed in the current state (closed community, ...)
    #[error("{0}")]
    Rejected(String),

    #[error("remote call failed: {0:#}")]
    Remote(#[from] anyhow::Error),
}

impl SphereError {
    pub fn rejected(reason: impl Into<String>) -> Self {
        SphereError::Rejected(reason.into())
    }

    /// Field error, if this is a validation failure
    pub fn field_error(&self) -> Option<&FieldError> {
        match self {
            SphereError::Validation(e) => Some(e),
            _ => None,
        }
    }
}

pub type SphereResult<T> = std::result::Result<T, SphereError>;
