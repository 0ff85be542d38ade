// ── HTTP embedding provider ────────────────────────────────────────────────
//
// Calls Ollama or OpenAI-compatible embedding APIs. Tries the Ollama
// `/api/embed` endpoint first, then falls back to `/v1/embeddings`.
// Status classification: 408/429/5xx are transient (retried by the flush
// machinery), anything else surfaces as permanent.

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};

use crate::atoms::config::EmbeddingConfig;
use crate::atoms::error::{MemoryError, MemoryResult};

use super::{Embedded, EmbeddedBatch, EmbeddingProvider, TokenUsage};

pub struct HttpEmbeddingProvider {
    client: Client,
    base_url: String,
    model: String,
}

impl HttpEmbeddingProvider {
    pub fn new(config: &EmbeddingConfig) -> MemoryResult<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_millis(config.timeout_ms))
            .build()?;
        Ok(HttpEmbeddingProvider {
            client,
            base_url: config.provider_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
        })
    }

    fn classify_status(status: reqwest::StatusCode, body: &str) -> MemoryError {
        let transient = status.as_u16() == 408 || status.as_u16() == 429 || status.is_server_error();
        let message = format!("provider returned {status} — {body}");
        MemoryError::Provider { transient, message }
    }

    /// Ollama batch endpoint: POST /api/embed { model, input: [texts] }
    /// → { embeddings: [[f32…]…], prompt_eval_count }
    async fn embed_ollama(&self, texts: &[String]) -> MemoryResult<EmbeddedBatch> {
        let url = format!("{}/api/embed", self.base_url);
        let body = json!({ "model": self.model, "input": texts });

        let resp = self.client.post(&url).json(&body).send().await?;
        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(Self::classify_status(status, &text));
        }

        let v: Value = resp
            .json()
            .await
            .map_err(|e| MemoryError::provider_permanent(format!("bad Ollama response: {e}")))?;
        let embeddings = v["embeddings"]
            .as_array()
            .ok_or_else(|| MemoryError::provider_permanent("no 'embeddings' array in Ollama response"))?;

        let vectors: Vec<Vec<f32>> = embeddings
            .iter()
            .map(|e| {
                e.as_array()
                    .map(|arr| arr.iter().filter_map(|x| x.as_f64().map(|f| f as f32)).collect())
                    .unwrap_or_default()
            })
            .collect();
        let usage = TokenUsage { prompt_tokens: v["prompt_eval_count"].as_u64().unwrap_or(0) };
        Ok(EmbeddedBatch { vectors, usage })
    }

    /// OpenAI-compatible batch endpoint: POST /v1/embeddings { model, input }
    /// → { data: [{ embedding }…], usage: { prompt_tokens } }
    async fn embed_openai(&self, texts: &[String]) -> MemoryResult<EmbeddedBatch> {
        let url = format!("{}/v1/embeddings", self.base_url);
        let body = json!({ "model": self.model, "input": texts });

        let resp = self.client.post(&url).json(&body).send().await?;
        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(Self::classify_status(status, &text));
        }

        let v: Value = resp
            .json()
            .await
            .map_err(|e| MemoryError::provider_permanent(format!("bad OpenAI response: {e}")))?;
        let data = v["data"]
            .as_array()
            .ok_or_else(|| MemoryError::provider_permanent("no 'data' array in OpenAI response"))?;

        let vectors: Vec<Vec<f32>> = data
            .iter()
            .map(|d| {
                d["embedding"]
                    .as_array()
                    .map(|arr| arr.iter().filter_map(|x| x.as_f64().map(|f| f as f32)).collect())
                    .unwrap_or_default()
            })
            .collect();
        let usage = TokenUsage {
            prompt_tokens: v["usage"]["prompt_tokens"].as_u64().unwrap_or(0),
        };
        Ok(EmbeddedBatch { vectors, usage })
    }
}

#[async_trait]
impl EmbeddingProvider for HttpEmbeddingProvider {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn embed(&self, text: &str) -> MemoryResult<Embedded> {
        let texts = [text.to_string()];
        let batch = self.embed_batch(&texts).await?;
        let vector = batch
            .vectors
            .into_iter()
            .next()
            .ok_or_else(|| MemoryError::provider_permanent("provider returned no embedding"))?;
        Ok(Embedded { vector, usage: batch.usage })
    }

    async fn embed_batch(&self, texts: &[String]) -> MemoryResult<EmbeddedBatch> {
        if texts.is_empty() {
            return Ok(EmbeddedBatch { vectors: Vec::new(), usage: TokenUsage::default() });
        }

        // Ollama format first; an endpoint-shaped failure (404 route) or a
        // mismatched vector count falls through to the OpenAI-compatible
        // endpoint.
        match self.embed_ollama(texts).await {
            Ok(batch) if batch.vectors.len() == texts.len() => return Ok(batch),
            Ok(_) => {}
            Err(e) if e.is_transient() => return Err(e),
            Err(_) => {}
        }

        let batch = self.embed_openai(texts).await?;
        if batch.vectors.len() != texts.len() {
            return Err(MemoryError::provider_permanent(
                "provider returned a mismatched embedding count",
            ));
        }
        Ok(batch)
    }
}
