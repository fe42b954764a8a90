//! LLM client abstraction
//!
//! Structured JSON generation against the Gemini REST API with an optional
//! document-scoped context cache, plus tolerant parsing of the JSON the
//! model actually returns.

mod cache;
mod repair;

pub use cache::CacheService;
pub use repair::{fix_json_response, parse_json_with_repair};

use crate::errors::{AppError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// A single generation request
#[derive(Debug, Clone)]
pub struct GenerateRequest {
    pub prompt: String,
    /// Opaque cache handle from `CacheService::create`
    pub cached_content: Option<String>,
    pub temperature: f32,
    /// Request `application/json` output
    pub json: bool,
}

impl GenerateRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            cached_content: None,
            temperature: 0.0,
            json: false,
        }
    }

    pub fn json(mut self) -> Self {
        self.json = true;
        self
    }

    pub fn with_cache(mut self, handle: Option<String>) -> Self {
        self.cached_content = handle;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }
}

/// Text generation seam; implemented by the Gemini client and by scripted
/// generators in tests.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, request: &GenerateRequest) -> Result<String>;
}

// ============================================================================
// Gemini wire types
// ============================================================================

#[derive(Serialize)]
struct GeminiRequest {
    contents: Vec<Content>,
    #[serde(rename = "generationConfig")]
    generation_config: GenerationConfig,
    #[serde(rename = "cachedContent", skip_serializing_if = "Option::is_none")]
    cached_content: Option<String>,
}

#[derive(Serialize, Deserialize)]
struct Content {
    parts: Vec<Part>,
}

#[derive(Serialize, Deserialize)]
struct Part {
    text: String,
}

#[derive(Serialize)]
struct GenerationConfig {
    temperature: f32,
    #[serde(rename = "responseMimeType", skip_serializing_if = "Option::is_none")]
    response_mime_type: Option<String>,
}

#[derive(Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Content,
}

/// Gemini REST client. Keys are per-request BYOK and arrive through the
/// constructor; there is no process-wide default key.
pub struct GeminiClient {
    http: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl GeminiClient {
    pub fn new(api_key: String) -> Self {
        Self::with_model(api_key, "gemini-2.0-flash".to_string())
    }

    pub fn with_model(api_key: String, model: String) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .expect("Failed to create HTTP client");

        Self {
            http,
            api_key,
            model,
            base_url: "https://generativelanguage.googleapis.com/v1beta".to_string(),
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Cache-expiry responses must be distinguishable so callers can fall
    /// back to the non-cached path.
    fn classify_error(status: reqwest::StatusCode, body: &str, cached: bool) -> AppError {
        let cache_signal = body.contains("CachedContent")
            || body.contains("cachedContent")
            || body.contains("cached content");

        if cached && (cache_signal || status == reqwest::StatusCode::FORBIDDEN || status == reqwest::StatusCode::NOT_FOUND)
        {
            AppError::LlmCacheInvalid {
                message: format!("{}: {}", status, body),
            }
        } else {
            AppError::Llm {
                message: format!("API error {}: {}", status, body),
            }
        }
    }
}

#[async_trait]
impl TextGenerator for GeminiClient {
    async fn generate(&self, request: &GenerateRequest) -> Result<String> {
        let url = format!(
            "{}/models/{}:generateContent?key={}",
            self.base_url, self.model, self.api_key
        );

        let body = GeminiRequest {
            contents: vec![Content {
                parts: vec![Part {
                    text: request.prompt.clone(),
                }],
            }],
            generation_config: GenerationConfig {
                temperature: request.temperature,
                response_mime_type: request.json.then(|| "application/json".to_string()),
            },
            cached_content: request.cached_content.clone(),
        };

        let response = self
            .http
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| AppError::Llm {
                message: format!("Request failed: {}", e),
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(Self::classify_error(
                status,
                &text,
                request.cached_content.is_some(),
            ));
        }

        let parsed: GeminiResponse = response.json().await.map_err(|e| AppError::Llm {
            message: format!("Failed to parse response: {}", e),
        })?;

        let text = parsed
            .candidates
            .into_iter()
            .next()
            .map(|c| {
                c.content
                    .parts
                    .into_iter()
                    .map(|p| p.text)
                    .collect::<Vec<_>>()
                    .join("")
            })
            .unwrap_or_default();

        if text.is_empty() {
            return Err(AppError::Llm {
                message: "Empty completion".to_string(),
            });
        }

        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_error_classification() {
        let err = GeminiClient::classify_error(
            reqwest::StatusCode::BAD_REQUEST,
            "CachedContent not found or expired",
            true,
        );
        assert!(matches!(err, AppError::LlmCacheInvalid { .. }));

        // same body without an active cache handle is a plain LLM error
        let err = GeminiClient::classify_error(
            reqwest::StatusCode::BAD_REQUEST,
            "CachedContent not found or expired",
            false,
        );
        assert!(matches!(err, AppError::Llm { .. }));
    }

    #[test]
    fn test_request_builder() {
        let req = GenerateRequest::new("hello")
            .json()
            .with_cache(Some("cachedContents/x".into()))
            .with_temperature(0.2);

        assert!(req.json);
        assert_eq!(req.cached_content.as_deref(), Some("cachedContents/x"));
        assert!((req.temperature - 0.2).abs() < f32::EPSILON);
    }
}
