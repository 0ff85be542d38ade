// ── Atoms: Engine Configuration ────────────────────────────────────────────
// All knobs in one serializable struct. The engine instance is the unit of
// lifecycle: two engines with different `data_dir`s are fully independent,
// and nothing here is ever read from ambient process state.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Root of the on-disk layout (database, index file, lock file, journal).
    pub data_dir: PathBuf,
    /// Required dimension D for every embedding.
    pub vector_dims: usize,
    pub hnsw: HnswConfig,
    pub embedding: EmbeddingConfig,
    pub lscore: LScoreConfig,
    pub query: QueryConfig,
    pub causal: CausalConfig,
    /// Pending-embedding backlog above which `store` returns a warning.
    pub pending_soft_cap: usize,
}

impl EngineConfig {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            vector_dims: 768,
            hnsw: HnswConfig::default(),
            embedding: EmbeddingConfig::default(),
            lscore: LScoreConfig::default(),
            query: QueryConfig::default(),
            causal: CausalConfig::default(),
            pending_soft_cap: 256,
        }
    }

    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("memory.db")
    }

    pub fn index_path(&self) -> PathBuf {
        self.data_dir.join("vectors.index")
    }

    pub fn lock_path(&self) -> PathBuf {
        self.data_dir.join("engine.lock")
    }

    pub fn journal_path(&self) -> PathBuf {
        self.data_dir.join("sessions.jsonl")
    }
}

/// Proximity-graph tuning. `m` is the per-node connection cap,
/// `ef_construction`/`ef_search` the build/query beam widths.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HnswConfig {
    pub m: usize,
    pub ef_construction: usize,
    pub ef_search: usize,
    pub max_elements: usize,
    /// Level-sampling RNG seed. Fixed by default so index builds are
    /// reproducible across restarts.
    pub seed: u64,
}

impl Default for HnswConfig {
    fn default() -> Self {
        Self {
            m: 16,
            ef_construction: 200,
            ef_search: 64,
            max_elements: 1_000_000,
            seed: 0x6d6e_656d_6f67,
        }
    }
}

/// External embedding provider contract.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// Base URL of the provider (Ollama or OpenAI-compatible).
    pub provider_url: String,
    pub model: String,
    pub batch_size: usize,
    pub timeout_ms: u64,
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    /// Periodic flush interval while anything is pending.
    pub flush_interval_ms: u64,
    /// Queue size that triggers an immediate flush.
    pub flush_threshold: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider_url: "http://localhost:11434".into(),
            model: "nomic-embed-text".into(),
            batch_size: 32,
            timeout_ms: 30_000,
            max_retries: 3,
            retry_delay_ms: 500,
            flush_interval_ms: 30_000,
            flush_threshold: 64,
        }
    }
}

/// Provenance gating.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LScoreConfig {
    /// Per-generation decay in (0,1].
    pub depth_decay: f64,
    pub threshold: f64,
    /// When true, below-threshold inserts fail; when false they are stored
    /// and marked low-confidence.
    pub enforce: bool,
}

impl Default for LScoreConfig {
    fn default() -> Self {
        Self { depth_decay: 0.9, threshold: 0.3, enforce: false }
    }
}

/// Ranking fusion. `alpha` weighs vector similarity, `beta` the L-Score;
/// they are normalized to sum to 1 at engine construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryConfig {
    pub alpha: f64,
    pub beta: f64,
    pub min_score_default: f64,
    /// Lineage depth cap for `trace` and `include_provenance`.
    pub trace_depth: u32,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self { alpha: 0.7, beta: 0.3, min_score_default: 0.0, trace_depth: 5 }
    }
}

/// Causal-edge expiry semantics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CausalConfig {
    /// Applied when `link` is called without an explicit TTL. None = edges
    /// never expire by default.
    pub default_ttl_ms: Option<i64>,
    pub sweep_interval_ms: u64,
}

impl Default for CausalConfig {
    fn default() -> Self {
        Self { default_ttl_ms: None, sweep_interval_ms: 60_000 }
    }
}
