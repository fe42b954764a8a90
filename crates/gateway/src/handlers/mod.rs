//! API request handlers

pub mod export;
pub mod graph;
pub mod health;
pub mod ingest;
pub mod jobs;
pub mod projects;

use axum::http::HeaderMap;
use graphvault_common::errors::{AppError, Result};
use uuid::Uuid;

/// BYOK context extracted from request headers
#[derive(Debug, Clone, Default)]
pub struct UserContext {
    pub user_id: Option<String>,
    pub gemini_key: Option<String>,
    pub openai_key: Option<String>,
}

impl UserContext {
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let get = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .filter(|v| !v.is_empty())
                .map(String::from)
        };

        Self {
            user_id: get("x-user-id"),
            gemini_key: get("x-gemini-api-key"),
            openai_key: get("x-openai-api-key"),
        }
    }

    /// The LLM key is mandatory on endpoints that spend tokens
    pub fn require_gemini_key(&self) -> Result<String> {
        self.gemini_key.clone().ok_or_else(|| AppError::MissingField {
            field: "X-Gemini-API-Key".to_string(),
        })
    }

    pub fn user_uuid(&self) -> Option<Uuid> {
        self.user_id.as_deref().and_then(|u| u.parse().ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_user_context_from_headers() {
        let mut headers = HeaderMap::new();
        headers.insert("x-gemini-api-key", HeaderValue::from_static("gk"));
        headers.insert("x-user-id", HeaderValue::from_static("u1"));

        let ctx = UserContext::from_headers(&headers);
        assert_eq!(ctx.gemini_key.as_deref(), Some("gk"));
        assert_eq!(ctx.user_id.as_deref(), Some("u1"));
        assert!(ctx.openai_key.is_none());
        assert!(ctx.require_gemini_key().is_ok());
    }

    #[test]
    fn test_missing_gemini_key_rejected() {
        let ctx = UserContext::from_headers(&HeaderMap::new());
        assert!(ctx.require_gemini_key().is_err());
    }
}
