//! Embedding service abstraction
//!
//! Provides a unified interface for multiple embedding providers:
//! - OpenAI (text-embedding-3-small, primary when a key is supplied)
//! - Gemini (text-embedding-004 at 1536 dimensions, fallback)
//! - Mock (deterministic, for tests)
//!
//! Every text has newlines replaced by spaces before it is sent, and batch
//! output order always matches input order.

use crate::errors::{AppError, Result};
use crate::EMBEDDING_DIMENSION;
use async_trait::async_trait;
use backoff::ExponentialBackoff;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Trait for embedding generation
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Generate embedding for a single text
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Generate embeddings for multiple texts (batch)
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Get the model name
    fn model_name(&self) -> &str;

    /// Get the embedding dimension
    fn dimension(&self) -> usize;
}

fn clean_text(text: &str) -> String {
    text.replace('\n', " ")
}

fn retry_policy() -> ExponentialBackoff {
    ExponentialBackoff {
        initial_interval: Duration::from_millis(200),
        max_elapsed_time: Some(Duration::from_secs(20)),
        ..Default::default()
    }
}

// ============================================================================
// OpenAI
// ============================================================================

/// OpenAI embedding client
pub struct OpenAiEmbedder {
    client: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
}

#[derive(Serialize)]
struct OpenAiRequest {
    input: Vec<String>,
    model: String,
}

#[derive(Deserialize)]
struct OpenAiResponse {
    data: Vec<OpenAiEmbedding>,
}

#[derive(Deserialize)]
struct OpenAiEmbedding {
    embedding: Vec<f32>,
}

impl OpenAiEmbedder {
    pub fn new(api_key: String) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .expect("Failed to create HTTP client");

        Self {
            client,
            api_key,
            model: "text-embedding-3-small".to_string(),
            base_url: "https://api.openai.com/v1".to_string(),
        }
    }

    async fn make_request(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let url = format!("{}/embeddings", self.base_url);

        let request = OpenAiRequest {
            input: texts.to_vec(),
            model: self.model.clone(),
        };

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| AppError::Embedding {
                message: format!("Request failed: {}", e),
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::Embedding {
                message: format!("API error {}: {}", status, body),
            });
        }

        let result: OpenAiResponse = response.json().await.map_err(|e| AppError::Embedding {
            message: format!("Failed to parse response: {}", e),
        })?;

        Ok(result.data.into_iter().map(|e| e.embedding).collect())
    }

    async fn request_with_retry(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        backoff::future::retry(retry_policy(), || async {
            self.make_request(texts).await.map_err(|e| {
                tracing::warn!(error = %e, "Embedding request failed, retrying");
                backoff::Error::transient(e)
            })
        })
        .await
    }
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let embeddings = self.request_with_retry(&[clean_text(text)]).await?;
        embeddings
            .into_iter()
            .next()
            .ok_or_else(|| AppError::Embedding {
                message: "Empty response".to_string(),
            })
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        // provider limit per request
        const BATCH_SIZE: usize = 100;

        let cleaned: Vec<String> = texts.iter().map(|t| clean_text(t)).collect();
        let mut all_embeddings = Vec::with_capacity(texts.len());

        for chunk in cleaned.chunks(BATCH_SIZE) {
            let embeddings = self.request_with_retry(chunk).await?;
            all_embeddings.extend(embeddings);
        }

        Ok(all_embeddings)
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn dimension(&self) -> usize {
        EMBEDDING_DIMENSION
    }
}

// ============================================================================
// Gemini
// ============================================================================

/// Gemini embedding client pinned to the shared 1536-dimension output
pub struct GeminiEmbedder {
    client: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
}

#[derive(Serialize)]
struct GeminiEmbedRequest {
    requests: Vec<GeminiEmbedItem>,
}

#[derive(Serialize)]
struct GeminiEmbedItem {
    model: String,
    content: GeminiContent,
    #[serde(rename = "outputDimensionality")]
    output_dimensionality: usize,
}

#[derive(Serialize)]
struct GeminiContent {
    parts: Vec<GeminiPart>,
}

#[derive(Serialize)]
struct GeminiPart {
    text: String,
}

#[derive(Deserialize)]
struct GeminiEmbedResponse {
    embeddings: Vec<GeminiEmbedding>,
}

#[derive(Deserialize)]
struct GeminiEmbedding {
    values: Vec<f32>,
}

impl GeminiEmbedder {
    pub fn new(api_key: String) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .expect("Failed to create HTTP client");

        Self {
            client,
            api_key,
            model: "text-embedding-004".to_string(),
            base_url: "https://generativelanguage.googleapis.com/v1beta".to_string(),
        }
    }

    async fn make_request(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let url = format!(
            "{}/models/{}:batchEmbedContents?key={}",
            self.base_url, self.model, self.api_key
        );

        let request = GeminiEmbedRequest {
            requests: texts
                .iter()
                .map(|t| GeminiEmbedItem {
                    model: format!("models/{}", self.model),
                    content: GeminiContent {
                        parts: vec![GeminiPart { text: t.clone() }],
                    },
                    output_dimensionality: EMBEDDING_DIMENSION,
                })
                .collect(),
        };

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| AppError::Embedding {
                message: format!("Request failed: {}", e),
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::Embedding {
                message: format!("API error {}: {}", status, body),
            });
        }

        let result: GeminiEmbedResponse =
            response.json().await.map_err(|e| AppError::Embedding {
                message: format!("Failed to parse response: {}", e),
            })?;

        Ok(result.embeddings.into_iter().map(|e| e.values).collect())
    }

    async fn request_with_retry(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        backoff::future::retry(retry_policy(), || async {
            self.make_request(texts).await.map_err(|e| {
                tracing::warn!(error = %e, "Embedding request failed, retrying");
                backoff::Error::transient(e)
            })
        })
        .await
    }
}

#[async_trait]
impl Embedder for GeminiEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let embeddings = self.request_with_retry(&[clean_text(text)]).await?;
        embeddings
            .into_iter()
            .next()
            .ok_or_else(|| AppError::Embedding {
                message: "Empty response".to_string(),
            })
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        const BATCH_SIZE: usize = 100;

        let cleaned: Vec<String> = texts.iter().map(|t| clean_text(t)).collect();
        let mut all_embeddings = Vec::with_capacity(texts.len());

        for chunk in cleaned.chunks(BATCH_SIZE) {
            let embeddings = self.request_with_retry(chunk).await?;
            all_embeddings.extend(embeddings);
        }

        Ok(all_embeddings)
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn dimension(&self) -> usize {
        EMBEDDING_DIMENSION
    }
}

// ============================================================================
// Mock
// ============================================================================

/// Mock embedder for testing. Vectors are derived deterministically from
/// the input text so `embed` and `embed_batch` always agree; fixtures can
/// pin exact vectors for similarity-sensitive tests.
pub struct MockEmbedder {
    dimension: usize,
    fixtures: HashMap<String, Vec<f32>>,
}

impl MockEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            fixtures: HashMap::new(),
        }
    }

    /// Pin exact vectors for specific texts
    pub fn with_fixtures(dimension: usize, fixtures: HashMap<String, Vec<f32>>) -> Self {
        Self { dimension, fixtures }
    }

    fn derive(&self, text: &str) -> Vec<f32> {
        if let Some(v) = self.fixtures.get(text) {
            return v.clone();
        }

        use rand::{Rng, SeedableRng};

        // FNV-1a over the text seeds the generator
        let mut hash: u64 = 0xcbf29ce484222325;
        for byte in text.as_bytes() {
            hash ^= u64::from(*byte);
            hash = hash.wrapping_mul(0x100000001b3);
        }

        let mut rng = rand::rngs::StdRng::seed_from_u64(hash);
        (0..self.dimension).map(|_| rng.gen::<f32>() - 0.5).collect()
    }
}

#[async_trait]
impl Embedder for MockEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        Ok(self.derive(&clean_text(text)))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.derive(&clean_text(t))).collect())
    }

    fn model_name(&self) -> &str {
        "mock-embedding"
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

/// Create an embedder from BYOK keys. OpenAI wins when both are supplied;
/// no key at all is a configuration error (strict BYOK).
pub fn embedder_from_keys(
    gemini_key: Option<&str>,
    openai_key: Option<&str>,
) -> Result<Arc<dyn Embedder>> {
    if let Some(key) = openai_key {
        tracing::info!("Initialized OpenAI embedding service (BYOK)");
        return Ok(Arc::new(OpenAiEmbedder::new(key.to_string())));
    }

    if let Some(key) = gemini_key {
        tracing::info!("Initialized Gemini embedding service (BYOK)");
        return Ok(Arc::new(GeminiEmbedder::new(key.to_string())));
    }

    Err(AppError::Configuration {
        message: "No API key provided for embedding service. Strict BYOK is enabled.".to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_embedder_dimension() {
        let embedder = MockEmbedder::new(1536);
        let embedding = embedder.embed("test text").await.unwrap();
        assert_eq!(embedding.len(), 1536);
    }

    #[tokio::test]
    async fn test_batch_matches_single() {
        let embedder = MockEmbedder::new(64);
        let texts = vec![
            "neural network".to_string(),
            "backpropagation".to_string(),
            "gradient descent".to_string(),
        ];

        let batch = embedder.embed_batch(&texts).await.unwrap();
        assert_eq!(batch.len(), 3);

        for (i, text) in texts.iter().enumerate() {
            let single = embedder.embed(text).await.unwrap();
            assert_eq!(batch[i], single, "batch[{}] must equal embed(texts[{}])", i, i);
        }
    }

    #[tokio::test]
    async fn test_newlines_replaced_before_embedding() {
        let embedder = MockEmbedder::new(32);
        let with_newlines = embedder.embed("a\nb\nc").await.unwrap();
        let with_spaces = embedder.embed("a b c").await.unwrap();
        assert_eq!(with_newlines, with_spaces);
    }

    #[tokio::test]
    async fn test_fixtures_override_derivation() {
        let mut fixtures = HashMap::new();
        fixtures.insert("known".to_string(), vec![1.0, 0.0]);

        let embedder = MockEmbedder::with_fixtures(2, fixtures);
        assert_eq!(embedder.embed("known").await.unwrap(), vec![1.0, 0.0]);
    }

    #[test]
    fn test_strict_byok() {
        assert!(embedder_from_keys(None, None).is_err());
        assert!(embedder_from_keys(Some("gk"), None).is_ok());
        // openai preferred when both present
        let embedder = embedder_from_keys(Some("gk"), Some("ok")).unwrap();
        assert_eq!(embedder.model_name(), "text-embedding-3-small");
    }
}
