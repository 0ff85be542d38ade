// mnemograph — provenance-tracked semantic memory engine.
//
// Durable textual entries with dense vector embeddings, a provenance DAG
// with propagated confidence (L-Scores), a typed causal hypergraph with
// TTL expiry, and a query planner that fuses vector similarity with
// symbolic filters into calibrated rankings.
//
// The engine is the unit of lifecycle: construct one per data directory
// with `MemoryEngine::open`, hand it any `EmbeddingProvider`, and every
// public operation is awaitable.
//
//   let provider = Arc::new(HttpEmbeddingProvider::new(&config.embedding)?);
//   let engine = MemoryEngine::open(config, provider).await?;
//   let receipt = engine.store("the deploy failed", StoreOptions::new()).await?;
//   let hits = engine.query("what went wrong?", QueryOptions::default()).await?;

pub mod atoms;
pub mod engine;

pub use atoms::config::{
    CausalConfig, EmbeddingConfig, EngineConfig, HnswConfig, LScoreConfig, QueryConfig,
};
pub use atoms::error::{MemoryError, MemoryResult};
pub use atoms::types::{
    CausalPath, CausalRelation, CompressionTier, Direction, EngineStats, Entry, EntryFilters,
    EntrySource, FailureRecord, LineageNode, MatchType, PendingStats, QueryHit, QueryOptions,
    RelationType, ShadowReport, StoreOptions, StoreReceipt, TagMode, TraversalResult,
};
pub use engine::embedding::{
    Embedded, EmbeddedBatch, EmbeddingProvider, FlushReport, HttpEmbeddingProvider, TokenUsage,
};
pub use engine::store::EntryStore;
pub use engine::vector::VectorIndex;
pub use engine::MemoryEngine;
