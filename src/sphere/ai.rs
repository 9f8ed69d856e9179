//! Generative-text assist
//!
//! Thin client for the Gemini `generateContent` endpoint. The feature is
//! optional: without an API key, or on any failure, [`TextGenerator::generate`]
//! returns `None` and callers fall back to manual input.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{error, warn};

const DEFAULT_ENDPOINT: &str = "https://generativelanguage.googleapis.com/v1beta";
const MODEL: &str = "models/gemini-2.5-flash";

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    pub temperature: f32,
    pub max_output_tokens: u32,
    pub top_p: f32,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            max_output_tokens: 256,
            top_p: 0.95,
        }
    }
}

#[derive(Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Serialize)]
struct Content<'a> {
    parts: Vec<Part<'a>>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest<'a> {
    contents: Vec<Content<'a>>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Debug, Deserialize)]
struct CandidatePart {
    text: Option<String>,
}

/// Optional text completion
#[derive(Clone)]
pub struct TextGenerator {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
    config: GenerationConfig,
}

impl TextGenerator {
    /// A generator with no key is valid; it is simply disabled
    pub fn new(api_key: Option<String>) -> Self {
        let api_key = api_key.filter(|k| !k.trim().is_empty());
        if api_key.is_none() {
            warn!("[AI] GEMINI_API_KEY not set; text generation disabled");
        }
        Self {
            client: reqwest::Client::new(),
            endpoint: DEFAULT_ENDPOINT.to_string(),
            api_key,
            config: GenerationConfig::default(),
        }
    }

    /// Points the generator at another base URL (proxies, tests)
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into().trim_end_matches('/').to_string();
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.api_key.is_some()
    }

    /// Generated text, or `None` when unavailable
    pub async fn generate(&self, prompt: &str) -> Option<String> {
        let key = self.api_key.as_deref()?;
        match self.request(key, prompt).await {
            Ok(Some(text)) => Some(text),
            Ok(None) => {
                warn!("[AI] no text in response");
                None
            }
            Err(e) => {
                error!("[AI] generate failed: {:#}", e);
                None
            }
        }
    }

    async fn request(&self, key: &str, prompt: &str) -> Result<Option<String>> {
        let url = format!("{}/{}:generateContent", self.endpoint, MODEL);
        let body = GenerateRequest {
            contents: vec![Content {
                parts: vec![Part { text: prompt }],
            }],
            generation_config: self.config,
        };
        let response = self
            .client
            .post(&url)
            .query(&[("key", key)])
            .json(&body)
            .send()
            .await
            .context("generateContent request failed")?;

        let status = response.status();
        if !status.is_success() {
            return Err(anyhow::anyhow!("HTTP error {}", status));
        }
        let parsed: GenerateResponse = response
            .json()
            .await
            .context("failed to decode generateContent response")?;
        Ok(first_text(parsed))
    }
}

fn first_text(response: GenerateResponse) -> Option<String> {
    response
        .candidates
        .into_iter()
        .next()?
        .content?
        .parts
        .into_iter()
        .next()?
        .text
        .filter(|t| !t.is_empty())
}

/// Prompt for a short professional bio
pub fn bio_prompt(username: &str, portfolio: Option<&str>, linkedin: Option<&str>) -> String {
    format!(
        "Write a short professional bio (2-3 sentences) for a user named {} who works in a climate action community. Include portfolio: {} and LinkedIn: {}.",
        username,
        portfolio.filter(|s| !s.is_empty()).unwrap_or("none"),
        linkedin.filter(|s| !s.is_empty()).unwrap_or("none"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn missing_key_disables_generation() {
        let generator = TextGenerator::new(Some("  ".into()));
        assert!(!generator.is_enabled());
        assert_eq!(generator.generate("hello").await, None);
    }

    #[tokio::test]
    async fn unreachable_endpoint_yields_none() {
        let generator =
            TextGenerator::new(Some("k".into())).with_endpoint("http://127.0.0.1:9");
        assert_eq!(generator.generate("hello").await, None);
    }

    #[test]
    fn request_body_shape() {
        let body = GenerateRequest {
            contents: vec![Content { parts: vec![Part { text: "hi" }] }],
            generation_config: GenerationConfig::default(),
        };
        let v = serde_json::to_value(&body).unwrap();
        assert_eq!(v["contents"][0]["parts"][0]["text"], "hi");
        assert_eq!(v["generationConfig"]["maxOutputTokens"], 256);
    }

    #[test]
    fn extracts_first_candidate_text() {
        let parsed: GenerateResponse = serde_json::from_value(json!({
            "candidates": [{"content": {"parts": [{"text": "answer"}]}}]
        }))
        .unwrap();
        assert_eq!(first_text(parsed).as_deref(), Some("answer"));
        let empty: GenerateResponse = serde_json::from_value(json!({})).unwrap();
        assert_eq!(first_text(empty), None);
    }
}
