//! Embedding provider backed by a local Ollama server.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;

use super::{estimate_tokens, EmbeddingProvider, ModelInfo};
use crate::core::config::EmbeddingConfig;
use crate::core::errors::RagError;
use crate::types::EmbeddingResult;

#[derive(Clone)]
pub struct OllamaEmbedder {
    base_url: String,
    config: EmbeddingConfig,
    client: Client,
    probe_client: Client,
}

impl OllamaEmbedder {
    pub fn new(config: EmbeddingConfig) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .unwrap_or_default();
        let probe_client = Client::builder()
            .timeout(Duration::from_secs(config.probe_timeout_secs))
            .build()
            .unwrap_or_default();

        Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            config,
            client,
            probe_client,
        }
    }
}

#[derive(Deserialize)]
struct EmbedResponse {
    embedding: Vec<f32>,
}

#[derive(Deserialize)]
struct TagsResponse {
    models: Vec<TagModel>,
}

#[derive(Deserialize)]
struct TagModel {
    name: String,
}

#[async_trait]
impl EmbeddingProvider for OllamaEmbedder {
    async fn embed(&self, text: &str) -> Result<Option<Vec<f32>>, RagError> {
        let url = format!("{}/api/embeddings", self.base_url);
        let body = json!({
            "model": self.config.model,
            "prompt": text,
        });

        let res = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| RagError::EmbeddingUnavailable(e.to_string()))?;

        if !res.status().is_success() {
            let status = res.status();
            let detail = res.text().await.unwrap_or_default();
            return Err(RagError::EmbeddingUnavailable(format!(
                "embedding request failed ({status}): {detail}"
            )));
        }

        let payload: EmbedResponse = res
            .json()
            .await
            .map_err(|e| RagError::EmbeddingUnavailable(e.to_string()))?;

        if payload.embedding.is_empty() {
            Ok(None)
        } else {
            Ok(Some(payload.embedding))
        }
    }

    /// One request per text; Ollama's embeddings endpoint has no native
    /// batch mode. Output order matches input order.
    async fn embed_batch(&self, texts: &[String]) -> Result<EmbeddingResult, RagError> {
        let mut embeddings = Vec::with_capacity(texts.len());
        let mut token_count = 0;

        for text in texts {
            let embedding = self.embed(text).await?.ok_or_else(|| {
                RagError::EmbeddingUnavailable("service returned an empty vector".to_string())
            })?;
            token_count += estimate_tokens(text);
            embeddings.push(embedding);
        }

        Ok(EmbeddingResult {
            embeddings,
            token_count,
            model_id: self.config.model.clone(),
        })
    }

    async fn is_available(&self) -> bool {
        let url = format!("{}/api/tags", self.base_url);
        let res = match self.probe_client.get(&url).send().await {
            Ok(res) if res.status().is_success() => res,
            _ => return false,
        };

        match res.json::<TagsResponse>().await {
            Ok(tags) => tags.models.iter().any(|m| {
                // Tags come back as "model:variant".
                m.name == self.config.model
                    || m.name.split(':').next() == Some(self.config.model.as_str())
            }),
            Err(_) => false,
        }
    }

    fn model_info(&self) -> ModelInfo {
        ModelInfo {
            name: self.config.model.clone(),
            dimension: self.config.dimension,
            max_tokens: self.config.max_tokens,
        }
    }
}
