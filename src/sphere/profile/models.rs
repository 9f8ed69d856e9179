use crate::sphere::error::FieldError;
use crate::sphere::live::{Row, Validate};
use crate::sphere::validation::{check_url, require};
use serde::{Deserialize, Serialize};

pub const PROFILES: &str = "profiles";

/// Storage bucket for avatars
pub const AVATAR_BUCKET: &str = "avatars";

/// Longest avatar edge after resizing
pub const AVATAR_MAX_EDGE: u32 = 512;

pub const DEFAULT_LANGUAGE: &str = "en";

/// Interface languages a profile can select
pub const SUPPORTED_LANGUAGES: &[&str] = &["en", "id"];

/// Normalised language code, or a field error for an unsupported one
pub fn check_language(code: &str) -> Result<String, FieldError> {
    let code = code.trim().to_ascii_lowercase();
    if SUPPORTED_LANGUAGES.contains(&code.as_str()) {
        Ok(code)
    } else {
        Err(FieldError::new(
            "language",
            format!("unsupported language, use one of: {}", SUPPORTED_LANGUAGES.join(", ")),
        ))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomLink {
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub id: String,
    pub username: String,
    #[serde(default)]
    pub bio: Option<String>,
    #[serde(default)]
    pub portfolio_url: Option<String>,
    #[serde(default)]
    pub linkedin_url: Option<String>,
    #[serde(default)]
    pub instagram_url: Option<String>,
    #[serde(default)]
    pub whatsapp: Option<String>,
    #[serde(default)]
    pub custom_links: Vec<CustomLink>,
    #[serde(default)]
    pub avatar_url: Option<String>,
    #[serde(default = "default_language")]
    pub language: String,
}

fn default_language() -> String {
    DEFAULT_LANGUAGE.to_string()
}

impl Profile {
    /// Profile for a user that has none yet; username from the email prefix
    pub fn default_for(id: &str, email: &str) -> Self {
        let prefix = email.split('@').next().unwrap_or_default().trim();
        Self {
            id: id.to_string(),
            username: if prefix.is_empty() { "user".to_string() } else { prefix.to_string() },
            bio: None,
            portfolio_url: None,
            linkedin_url: None,
            instagram_url: None,
            whatsapp: None,
            custom_links: Vec::new(),
            avatar_url: None,
            language: default_language(),
        }
    }
}

impl Row for Profile {
    fn row_key(&self) -> String {
        self.id.clone()
    }
}

impl Validate for Profile {
    fn validate(&self) -> Result<(), FieldError> {
        require("username", &self.username)?;
        check_url("portfolio_url", self.portfolio_url.as_deref())?;
        check_url("linkedin_url", self.linkedin_url.as_deref())?;
        check_url("instagram_url", self.instagram_url.as_deref())?;
        for link in &self.custom_links {
            check_url("custom_links", Some(&link.url))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_username_is_email_prefix() {
        let p = Profile::default_for("u1", "ana.s@example.com");
        assert_eq!(p.username, "ana.s");
        assert_eq!(p.language, DEFAULT_LANGUAGE);
        assert_eq!(Profile::default_for("u2", "").username, "user");
    }

    #[test]
    fn every_link_is_checked() {
        let mut p = Profile::default_for("u1", "ana@example.com");
        p.portfolio_url = Some(String::new());
        assert!(p.validate().is_ok());
        p.linkedin_url = Some("linkedin".into());
        assert_eq!(p.validate().unwrap_err().field, "linkedin_url");
        p.linkedin_url = None;
        p.custom_links.push(CustomLink {
            label: "Blog".into(),
            url: "not a url".into(),
        });
        assert_eq!(p.validate().unwrap_err().field, "custom_links");
    }
}
