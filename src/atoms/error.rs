// ── Atoms: Error Types ─────────────────────────────────────────────────────
// Single canonical error enum for the engine, built with `thiserror`.
//
// Design rules:
//   • Variants follow the engine's failure taxonomy (storage, index,
//     provenance, provider, lifecycle) rather than per-module buckets.
//   • The `#[from]` attribute wires std/external error conversions.
//   • No variant carries secret material (API keys, raw provider payloads).

use thiserror::Error;

// ── Primary error enum ─────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum MemoryError {
    /// Vector dimension mismatch at ingestion or query time.
    #[error("dimension mismatch: expected {expected}, got {got}")]
    Dimension { expected: usize, got: usize },

    /// SQLite / rusqlite failure.
    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    /// Filesystem or OS-level I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization / deserialization failure.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Vector count would exceed the configured capacity.
    #[error("vector index full: capacity {capacity}")]
    IndexFull { capacity: usize },

    /// Referenced entry id is not present in the store.
    #[error("unknown entry: {0}")]
    UnknownEntry(String),

    /// A declared parent id is not present in the store.
    #[error("unknown parent: {0}")]
    UnknownParent(String),

    /// Computed L-Score fell below the enforcement threshold.
    #[error("provenance threshold: L-Score {score:.3} below threshold {threshold:.3}")]
    ProvenanceThreshold { score: f64, threshold: f64 },

    /// Proposed provenance edge would close a cycle.
    #[error("provenance cycle: {parent} -> {child}")]
    Cycle { parent: String, child: String },

    /// Embedding provider failure. `transient` failures are retried by the
    /// flush machinery; permanent ones surface to the caller as-is.
    #[error("embedding provider error (transient={transient}): {message}")]
    Provider { transient: bool, message: String },

    /// Operation exceeded its deadline.
    #[error("timed out after {0} ms")]
    Timeout(u64),

    /// Data directory is already locked by another engine instance.
    #[error("data directory locked: {0}")]
    Lock(String),

    /// Relation or option validation failure (bad strength, bad enum value…).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

// ── Convenience constructors ───────────────────────────────────────────────

impl MemoryError {
    /// Provider error that the flush machinery should retry.
    pub fn provider_transient(message: impl Into<String>) -> Self {
        Self::Provider { transient: true, message: message.into() }
    }

    /// Provider error that must surface immediately.
    pub fn provider_permanent(message: impl Into<String>) -> Self {
        Self::Provider { transient: false, message: message.into() }
    }

    /// Whether the flush machinery may retry this error.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Provider { transient: true, .. } | Self::Timeout(_))
    }
}

impl From<reqwest::Error> for MemoryError {
    fn from(e: reqwest::Error) -> Self {
        // Connection-level and timeout failures are worth retrying; anything
        // else (TLS, malformed URL, decode) is a configuration problem.
        let transient = e.is_timeout() || e.is_connect() || e.is_request();
        Self::Provider { transient, message: e.to_string() }
    }
}

// ── Convenience alias ──────────────────────────────────────────────────────

/// All engine operations return this type.
pub type MemoryResult<T> = Result<T, MemoryError>;
