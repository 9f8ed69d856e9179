//! Input checks shared by the domain drafts

use crate::sphere::error::FieldError;
use reqwest::Url;

/// Schemes accepted for profile links
const LINK_SCHEMES: &[&str] = &["http", "https", "mailto", "tel"];

/// Empty input is valid (the field is optional); otherwise it must parse as
/// an absolute URL with an http, https, mailto or tel scheme.
pub fn is_valid_url(value: &str) -> bool {
    if value.is_empty() {
        return true;
    }
    match Url::parse(value) {
        Ok(url) => LINK_SCHEMES.contains(&url.scheme()),
        Err(_) => false,
    }
}

/// Optional link field
pub fn check_url(field: &str, value: Option<&str>) -> Result<(), FieldError> {
    let value = value.unwrap_or_default();
    if is_valid_url(value) {
        Ok(())
    } else {
        Err(FieldError::new(
            field,
            "check URL format (must be http/https)",
        ))
    }
}

/// Non-blank text field
pub fn require(field: &str, value: &str) -> Result<(), FieldError> {
    if value.trim().is_empty() {
        Err(FieldError::required(field))
    } else {
        Ok(())
    }
}

pub fn require_id(field: &str, value: Option<&str>) -> Result<(), FieldError> {
    require(field, value.unwrap_or_default())
}

pub fn check_coordinates(latitude: f64, longitude: f64) -> Result<(), FieldError> {
    if !(-90.0..=90.0).contains(&latitude) {
        return Err(FieldError::new("latitude", "latitude must be between -90 and 90"));
    }
    if !(-180.0..=180.0).contains(&longitude) {
        return Err(FieldError::new("longitude", "longitude must be between -180 and 180"));
    }
    Ok(())
}

pub fn check_non_negative(field: &str, value: f64) -> Result<(), FieldError> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(FieldError::new(field, format!("{} must not be negative", field)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_rules() {
        assert!(is_valid_url(""));
        assert!(is_valid_url("http://x.com"));
        assert!(is_valid_url("https://example.com/path"));
        assert!(is_valid_url("mailto:hi@example.com"));
        assert!(is_valid_url("tel:+62123"));
        assert!(!is_valid_url("not-a-url"));
        assert!(!is_valid_url("ftp://example.com"));
    }

    #[test]
    fn coordinates_are_bounded() {
        assert!(check_coordinates(-6.2, 106.8).is_ok());
        assert_eq!(check_coordinates(91.0, 0.0).unwrap_err().field, "latitude");
        assert_eq!(check_coordinates(0.0, -181.0).unwrap_err().field, "longitude");
    }

    #[test]
    fn blank_is_missing() {
        assert_eq!(require("name", "  ").unwrap_err(), FieldError::required("name"));
        assert!(require_id("community_id", None).is_err());
    }
}
