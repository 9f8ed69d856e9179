//! Client configuration
//!
//! Read from the environment. A missing generative-text key only disables
//! that feature; a missing backend URL selects the local SQLite backend.

use std::env;
use tracing::warn;

pub const ENV_BACKEND_URL: &str = "SUPABASE_URL";
pub const ENV_ANON_KEY: &str = "SUPABASE_ANON_KEY";
pub const ENV_AI_KEY: &str = "GEMINI_API_KEY";
pub const ENV_DB_URL: &str = "CIVICSPHERE_DB_URL";

pub const DEFAULT_DB_URL: &str = "sqlite://civicsphere.db?mode=rwc";

/// Hosted backend endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostedBackend {
    pub url: String,
    pub anon_key: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SphereConfig {
    /// `None` runs against the local store at `db_url`
    pub hosted: Option<HostedBackend>,
    /// Local SQLite URL, e.g. `sqlite://civicsphere.db?mode=rwc`
    pub db_url: String,
    pub ai_key: Option<String>,
}

impl Default for SphereConfig {
    fn default() -> Self {
        Self {
            hosted: None,
            db_url: DEFAULT_DB_URL.to_string(),
            ai_key: None,
        }
    }
}

impl SphereConfig {
    /// Local-only configuration
    pub fn local(db_url: impl Into<String>) -> Self {
        Self {
            db_url: db_url.into(),
            ..Self::default()
        }
    }

    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the configuration from any key lookup
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let hosted = match (get(ENV_BACKEND_URL), get(ENV_ANON_KEY)) {
            (Some(url), Some(anon_key)) => Some(HostedBackend { url, anon_key }),
            (Some(_), None) => {
                warn!("[Config] {} set without {}; using the local store", ENV_BACKEND_URL, ENV_ANON_KEY);
                None
            }
            _ => None,
        };

        Self {
            hosted,
            db_url: get(ENV_DB_URL).unwrap_or_else(|| DEFAULT_DB_URL.to_string()),
            ai_key: get(ENV_AI_KEY),
        }
    }

    pub fn with_ai_key(mut self, key: impl Into<String>) -> Self {
        self.ai_key = Some(key.into());
        self
    }
}
