//! Generator backed by a local Ollama chat endpoint.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;

use super::provider::{ChatMessage, GenerationOptions, GenerationResponse, TextGenerator};
use crate::core::config::GenerationConfig;
use crate::core::errors::RagError;

#[derive(Clone)]
pub struct OllamaGenerator {
    base_url: String,
    config: GenerationConfig,
    client: Client,
}

impl OllamaGenerator {
    pub fn new(config: GenerationConfig) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .unwrap_or_default();

        Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            config,
            client,
        }
    }
}

#[derive(Deserialize)]
struct ChatResponse {
    message: ChatResponseMessage,
    #[serde(default)]
    eval_count: Option<usize>,
}

#[derive(Deserialize)]
struct ChatResponseMessage {
    content: String,
}

#[async_trait]
impl TextGenerator for OllamaGenerator {
    async fn generate(
        &self,
        messages: &[ChatMessage],
        options: &GenerationOptions,
    ) -> Result<GenerationResponse, RagError> {
        let url = format!("{}/api/chat", self.base_url);
        let body = json!({
            "model": self.config.model,
            "messages": messages,
            "stream": false,
            "options": {
                "temperature": options.temperature,
                "num_predict": options.max_tokens,
            },
        });

        let res = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| RagError::Generation(e.to_string()))?;

        if !res.status().is_success() {
            let status = res.status();
            let detail = res.text().await.unwrap_or_default();
            return Err(RagError::Generation(format!(
                "chat request failed ({status}): {detail}"
            )));
        }

        let payload: ChatResponse = res
            .json()
            .await
            .map_err(|e| RagError::Generation(e.to_string()))?;

        Ok(GenerationResponse {
            content: payload.message.content,
            tokens_used: payload.eval_count.unwrap_or(0),
        })
    }

    async fn is_available(&self) -> bool {
        let url = format!("{}/api/tags", self.base_url);
        let probe = Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .unwrap_or_default();

        match probe.get(&url).send().await {
            Ok(res) => res.status().is_success(),
            Err(_) => false,
        }
    }
}
