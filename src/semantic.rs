//! Semantic backend implementations.
//!
//! Concrete [`SemanticBackend`]s for the matcher's semantic pass:
//! - **[`OpenAIBackend`]**: calls the OpenAI embeddings API with retry and backoff.
//! - **[`OllamaBackend`]**: calls a local Ollama instance's `/api/embed` endpoint.
//! - **`LocalBackend`**: runs fastembed models in-process (feature
//!   `local-embeddings-fastembed`), optionally with a reranker model used
//!   as the entailment scorer.
//!
//! # Provider Selection
//!
//! Use [`create_backend`] to instantiate the backend named by
//! `semantic.provider`. `"disabled"` yields `None`, which makes the matcher
//! skip semantic queries entirely.
//!
//! # Retry Strategy
//!
//! The HTTP backends retry transient errors inside a single evaluation:
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors → retry
//! - Backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)
//!
//! Once retries are exhausted the error surfaces as a
//! [`MatchBackendError`] and the detail worker reschedules the item.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;

use catalog_watch_core::embedding::SemanticBackend;
use catalog_watch_core::error::MatchBackendError;

use crate::config::SemanticConfig;

const OPENAI_URL: &str = "https://api.openai.com";
const OLLAMA_URL: &str = "http://localhost:11434";

/// Create the [`SemanticBackend`] selected by configuration.
///
/// | Config Value | Backend |
/// |-------------|----------|
/// | `"disabled"` | `None` |
/// | `"openai"` | [`OpenAIBackend`] |
/// | `"ollama"` | [`OllamaBackend`] |
/// | `"local"` | `LocalBackend` (needs `--features local-embeddings-fastembed`) |
pub fn create_backend(config: &SemanticConfig) -> Result<Option<Arc<dyn SemanticBackend>>> {
    match config.provider.as_str() {
        "disabled" => Ok(None),
        "openai" => Ok(Some(Arc::new(OpenAIBackend::new(config)?))),
        "ollama" => Ok(Some(Arc::new(OllamaBackend::new(config)?))),
        #[cfg(feature = "local-embeddings-fastembed")]
        "local" => Ok(Some(Arc::new(local::LocalBackend::new(config)?))),
        #[cfg(not(feature = "local-embeddings-fastembed"))]
        "local" => bail!("Local semantic provider requires --features local-embeddings-fastembed"),
        other => bail!("Unknown semantic provider: {}", other),
    }
}

fn http_client(config: &SemanticConfig) -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .timeout(Duration::from_secs(config.timeout_secs))
        .build()?)
}

/// POST `body` to `url`, retrying 429/5xx and network errors.
async fn post_with_retry(
    client: &reqwest::Client,
    url: &str,
    bearer: Option<&str>,
    body: &serde_json::Value,
    max_retries: u32,
    label: &str,
) -> Result<serde_json::Value, MatchBackendError> {
    let mut last_err = None;

    for attempt in 0..=max_retries {
        if attempt > 0 {
            // Exponential backoff: 1s, 2s, 4s, 8s, ...
            let delay = Duration::from_secs(1 << (attempt - 1).min(5));
            tokio::time::sleep(delay).await;
        }

        let mut request = client.post(url).json(body);
        if let Some(token) = bearer {
            request = request.bearer_auth(token);
        }

        match request.send().await {
            Ok(response) => {
                let status = response.status();

                if status.is_success() {
                    return response.json().await.map_err(|e| {
                        MatchBackendError::InvalidResponse(format!("{} body: {}", label, e))
                    });
                }

                let body_text = response.text().await.unwrap_or_default();
                let err =
                    MatchBackendError::Request(format!("{} API error {}: {}", label, status, body_text));

                // Rate limited or server error, retry
                if status.as_u16() == 429 || status.is_server_error() {
                    last_err = Some(err);
                    continue;
                }
                return Err(err);
            }
            Err(e) => {
                last_err = Some(MatchBackendError::Request(format!(
                    "{} connection error ({}): {}",
                    label, url, e
                )));
                continue;
            }
        }
    }

    Err(last_err
        .unwrap_or_else(|| MatchBackendError::Request(format!("{} failed after retries", label))))
}

fn json_vector(value: &serde_json::Value, label: &str) -> Result<Vec<f32>, MatchBackendError> {
    value
        .as_array()
        .ok_or_else(|| {
            MatchBackendError::InvalidResponse(format!("{}: embedding is not an array", label))
        })?
        .iter()
        .map(|v| {
            v.as_f64().map(|f| f as f32).ok_or_else(|| {
                MatchBackendError::InvalidResponse(format!("{}: non-numeric component", label))
            })
        })
        .collect()
}

// ============ OpenAI Backend ============

/// Backend using the OpenAI embeddings API.
///
/// Requires the `OPENAI_API_KEY` environment variable. `semantic.url`
/// overrides the API base for OpenAI-compatible servers.
pub struct OpenAIBackend {
    model: String,
    base_url: String,
    api_key: String,
    max_retries: u32,
    client: reqwest::Client,
}

impl OpenAIBackend {
    pub fn new(config: &SemanticConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("semantic.model required for OpenAI provider"))?;

        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow::anyhow!("OPENAI_API_KEY environment variable not set"))?;

        Ok(Self {
            model,
            base_url: config
                .url
                .clone()
                .unwrap_or_else(|| OPENAI_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            api_key,
            max_retries: config.max_retries,
            client: http_client(config)?,
        })
    }
}

#[async_trait]
impl SemanticBackend for OpenAIBackend {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, MatchBackendError> {
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });
        let json = post_with_retry(
            &self.client,
            &format!("{}/v1/embeddings", self.base_url),
            Some(&self.api_key),
            &body,
            self.max_retries,
            "OpenAI",
        )
        .await?;
        parse_openai_response(&json)
    }
}

/// Extract `data[].embedding`, ordered by `data[].index` when present.
fn parse_openai_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>, MatchBackendError> {
    let data = json.get("data").and_then(|d| d.as_array()).ok_or_else(|| {
        MatchBackendError::InvalidResponse("OpenAI response missing data array".into())
    })?;

    let mut indexed = Vec::with_capacity(data.len());
    for (position, item) in data.iter().enumerate() {
        let embedding = item.get("embedding").ok_or_else(|| {
            MatchBackendError::InvalidResponse("OpenAI response missing embedding".into())
        })?;
        let index = item
            .get("index")
            .and_then(|i| i.as_u64())
            .map(|i| i as usize)
            .unwrap_or(position);
        indexed.push((index, json_vector(embedding, "OpenAI")?));
    }

    indexed.sort_by_key(|(index, _)| *index);
    Ok(indexed.into_iter().map(|(_, v)| v).collect())
}

// ============ Ollama Backend ============

/// Backend using a local Ollama instance.
///
/// Calls `POST /api/embed` on the configured URL (default
/// `http://localhost:11434`). Requires an embedding model to be pulled,
/// e.g. `ollama pull nomic-embed-text`.
pub struct OllamaBackend {
    model: String,
    url: String,
    max_retries: u32,
    client: reqwest::Client,
}

impl OllamaBackend {
    pub fn new(config: &SemanticConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("semantic.model required for Ollama provider"))?;
        let url = config
            .url
            .clone()
            .unwrap_or_else(|| OLLAMA_URL.to_string())
            .trim_end_matches('/')
            .to_string();

        Ok(Self {
            model,
            url,
            max_retries: config.max_retries,
            client: http_client(config)?,
        })
    }
}

#[async_trait]
impl SemanticBackend for OllamaBackend {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, MatchBackendError> {
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });
        let json = post_with_retry(
            &self.client,
            &format!("{}/api/embed", self.url),
            None,
            &body,
            self.max_retries,
            "Ollama",
        )
        .await?;
        parse_ollama_response(&json)
    }
}

fn parse_ollama_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>, MatchBackendError> {
    json.get("embeddings")
        .and_then(|e| e.as_array())
        .ok_or_else(|| {
            MatchBackendError::InvalidResponse("Ollama response missing embeddings array".into())
        })?
        .iter()
        .map(|embedding| json_vector(embedding, "Ollama"))
        .collect()
}

// ============ Local Backend (fastembed) ============

#[cfg(feature = "local-embeddings-fastembed")]
mod local {
    use std::sync::{Arc, Mutex};

    use anyhow::{bail, Result};
    use async_trait::async_trait;

    use catalog_watch_core::embedding::SemanticBackend;
    use catalog_watch_core::error::MatchBackendError;

    use crate::config::SemanticConfig;

    /// In-process embeddings and reranker-based entailment.
    ///
    /// Models are downloaded on first use from Hugging Face and cached;
    /// after that no network calls are made. Both models are loaded
    /// lazily and kept for the life of the process.
    pub struct LocalBackend {
        model_name: String,
        embedding_model: fastembed::EmbeddingModel,
        reranker_model: Option<fastembed::RerankerModel>,
        embedder: Arc<Mutex<Option<fastembed::TextEmbedding>>>,
        reranker: Arc<Mutex<Option<fastembed::TextRerank>>>,
    }

    impl LocalBackend {
        pub fn new(config: &SemanticConfig) -> Result<Self> {
            let model_name = config
                .model
                .clone()
                .unwrap_or_else(|| "multilingual-e5-small".to_string());
            let embedding_model = config_to_fastembed_model(&model_name)?;
            let reranker_model = if config.entailment {
                Some(config_to_reranker_model(
                    config
                        .entailment_model
                        .as_deref()
                        .unwrap_or("bge-reranker-v2-m3"),
                )?)
            } else {
                None
            };

            Ok(Self {
                model_name,
                embedding_model,
                reranker_model,
                embedder: Arc::new(Mutex::new(None)),
                reranker: Arc::new(Mutex::new(None)),
            })
        }
    }

    fn config_to_fastembed_model(name: &str) -> Result<fastembed::EmbeddingModel> {
        match name {
            "all-minilm-l6-v2" => Ok(fastembed::EmbeddingModel::AllMiniLML6V2),
            "bge-small-en-v1.5" => Ok(fastembed::EmbeddingModel::BGESmallENV15),
            "bge-base-en-v1.5" => Ok(fastembed::EmbeddingModel::BGEBaseENV15),
            "multilingual-e5-small" => Ok(fastembed::EmbeddingModel::MultilingualE5Small),
            "multilingual-e5-base" => Ok(fastembed::EmbeddingModel::MultilingualE5Base),
            "multilingual-e5-large" => Ok(fastembed::EmbeddingModel::MultilingualE5Large),
            "paraphrase-multilingual-mpnet-base-v2" => {
                Ok(fastembed::EmbeddingModel::ParaphraseMLMpnetBaseV2)
            }
            other => bail!(
                "Unknown local embedding model: '{}'. Supported models: \
                 all-minilm-l6-v2, bge-small-en-v1.5, bge-base-en-v1.5, \
                 multilingual-e5-small, multilingual-e5-base, multilingual-e5-large, \
                 paraphrase-multilingual-mpnet-base-v2",
                other
            ),
        }
    }

    fn config_to_reranker_model(name: &str) -> Result<fastembed::RerankerModel> {
        match name {
            "bge-reranker-base" => Ok(fastembed::RerankerModel::BGERerankerBase),
            "bge-reranker-v2-m3" => Ok(fastembed::RerankerModel::BGERerankerV2M3),
            "jina-reranker-v2-base-multilingual" => {
                Ok(fastembed::RerankerModel::JINARerankerV2BaseMultiligual)
            }
            other => bail!(
                "Unknown entailment model: '{}'. Supported models: \
                 bge-reranker-base, bge-reranker-v2-m3, jina-reranker-v2-base-multilingual",
                other
            ),
        }
    }

    fn sigmoid(x: f32) -> f32 {
        1.0 / (1.0 + (-x).exp())
    }

    #[async_trait]
    impl SemanticBackend for LocalBackend {
        fn model_name(&self) -> &str {
            &self.model_name
        }

        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, MatchBackendError> {
            let slot = Arc::clone(&self.embedder);
            let model = self.embedding_model.clone();
            let texts = texts.to_vec();

            tokio::task::spawn_blocking(move || {
                let mut guard = slot
                    .lock()
                    .map_err(|_| MatchBackendError::Request("embedder lock poisoned".into()))?;
                if guard.is_none() {
                    let loaded = fastembed::TextEmbedding::try_new(fastembed::InitOptions::new(model))
                        .map_err(|e| {
                            MatchBackendError::Request(format!(
                                "Failed to initialize local embedding model: {}",
                                e
                            ))
                        })?;
                    *guard = Some(loaded);
                }
                let embedder = guard
                    .as_mut()
                    .ok_or_else(|| MatchBackendError::Request("embedder not loaded".into()))?;
                embedder
                    .embed(texts, None)
                    .map_err(|e| MatchBackendError::Request(format!("Local embedding failed: {}", e)))
            })
            .await
            .map_err(|e| MatchBackendError::Request(format!("embedding task failed: {}", e)))?
        }

        async fn entails(
            &self,
            premise: &str,
            hypothesis: &str,
        ) -> Result<Option<f32>, MatchBackendError> {
            let Some(model) = self.reranker_model.clone() else {
                return Ok(None);
            };
            let slot = Arc::clone(&self.reranker);
            let premise = premise.to_string();
            let hypothesis = hypothesis.to_string();

            tokio::task::spawn_blocking(move || {
                let mut guard = slot
                    .lock()
                    .map_err(|_| MatchBackendError::Request("reranker lock poisoned".into()))?;
                if guard.is_none() {
                    let loaded =
                        fastembed::TextRerank::try_new(fastembed::RerankInitOptions::new(model))
                            .map_err(|e| {
                                MatchBackendError::Request(format!(
                                    "Failed to initialize entailment model: {}",
                                    e
                                ))
                            })?;
                    *guard = Some(loaded);
                }
                let reranker = guard
                    .as_mut()
                    .ok_or_else(|| MatchBackendError::Request("reranker not loaded".into()))?;
                let results = reranker
                    .rerank(hypothesis.as_str(), vec![premise.as_str()], false, None)
                    .map_err(|e| MatchBackendError::Request(format!("Entailment failed: {}", e)))?;
                let score = results.first().map(|r| r.score).ok_or_else(|| {
                    MatchBackendError::InvalidResponse("reranker returned no scores".into())
                })?;
                Ok(Some(sigmoid(score)))
            })
            .await
            .map_err(|e| MatchBackendError::Request(format!("entailment task failed: {}", e)))?
        }
    }
}
