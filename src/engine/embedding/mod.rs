// ── Embedding module ───────────────────────────────────────────────────────
//
// Module layout:
//   mod.rs   — provider capability trait + retry helper
//   http.rs  — HTTP provider (Ollama + OpenAI-compatible endpoints)
//   queue.rs — deferred, batched, crash-idempotent flush pipeline

mod http;
mod queue;

pub use http::HttpEmbeddingProvider;
pub use queue::{EmbeddingQueue, FlushReport};

use async_trait::async_trait;
use log::warn;

use crate::atoms::config::EmbeddingConfig;
use crate::atoms::error::{MemoryError, MemoryResult};

/// Token accounting reported by the provider.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
}

/// A single embedded text.
#[derive(Debug, Clone)]
pub struct Embedded {
    pub vector: Vec<f32>,
    pub usage: TokenUsage,
}

/// A batch of embedded texts, in input order.
#[derive(Debug, Clone)]
pub struct EmbeddedBatch {
    pub vectors: Vec<Vec<f32>>,
    pub usage: TokenUsage,
}

/// The embedding capability object. The engine is generic over any
/// implementation; swap it at construction.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    fn model_name(&self) -> &str;

    async fn embed(&self, text: &str) -> MemoryResult<Embedded>;

    async fn embed_batch(&self, texts: &[String]) -> MemoryResult<EmbeddedBatch>;
}

/// Run `op` with exponential backoff on transient failures. Permanent
/// failures surface immediately; exhausted retries surface the last error.
pub(crate) async fn with_retries<T, F, Fut>(config: &EmbeddingConfig, mut op: F) -> MemoryResult<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = MemoryResult<T>>,
{
    let mut delay_ms = config.retry_delay_ms.max(1);
    let mut last_err: Option<MemoryError> = None;

    for attempt in 0..=config.max_retries {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && attempt < config.max_retries => {
                warn!(
                    "[embed] transient provider failure (attempt {}/{}): {e} — retrying in {delay_ms} ms",
                    attempt + 1,
                    config.max_retries
                );
                tokio::time::sleep(std::time::Duration::from_millis(delay_ms)).await;
                delay_ms = delay_ms.saturating_mul(2);
                last_err = Some(e);
            }
            Err(e) => return Err(e),
        }
    }
    Err(last_err.unwrap_or_else(|| MemoryError::provider_transient("retries exhausted")))
}
