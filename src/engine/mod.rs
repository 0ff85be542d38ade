// ── Memory Engine facade ───────────────────────────────────────────────────
//
// Public API, lifecycle, auto-flush policy, statistics, checkpointing.
// The engine instance is the unit of lifecycle: it owns the store, the
// vector index, the embedding queue, the data-dir lock, and its background
// tasks. Two engines pointing at different data directories are fully
// independent; nothing lives in ambient process state.
//
// Module layout:
//   store/      — SQLite rows (entries, tags, provenance, causal, pending)
//   vector/     — HNSW proximity graph + persistence
//   embedding/  — provider trait, HTTP client, deferred flush queue
//   provenance  — L-Score computation, cycle checks, lineage traversal
//   causal      — hyperedge link/traverse/paths/sweep
//   query       — the ranking planner
//   shadow      — contradiction probe
//   lock        — data-dir exclusivity

pub(crate) mod causal;
pub mod embedding;
mod lock;
pub(crate) mod provenance;
pub(crate) mod query;
pub(crate) mod shadow;
pub mod store;
pub mod vector;

use std::collections::HashSet;
use std::io::Write;
use std::sync::Arc;

use log::{info, warn};
use parking_lot::Mutex;
use uuid::Uuid;

use crate::atoms::config::EngineConfig;
use crate::atoms::error::MemoryResult;
use crate::atoms::types::{
    CausalPath, CausalRelation, CompressionTier, Direction, EngineStats, Entry, FailureRecord,
    LineageNode, PendingStats, QueryHit, QueryOptions, RelationType, ShadowReport, StoreOptions,
    StoreReceipt,
};
use embedding::{EmbeddingProvider, EmbeddingQueue, FlushReport};
use lock::LockFile;
use store::EntryStore;
use vector::{load_index, save_index, VectorIndex};

// ── Time helpers ───────────────────────────────────────────────────────────

pub(crate) fn now_iso() -> String {
    chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

pub(crate) fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

// ── Shared internals ───────────────────────────────────────────────────────

pub(crate) struct EngineInner {
    pub(crate) config: EngineConfig,
    /// Normalized ranking weights (alpha + beta = 1).
    pub(crate) alpha: f64,
    pub(crate) beta: f64,
    pub(crate) store: Arc<EntryStore>,
    pub(crate) index: Arc<Mutex<VectorIndex>>,
    pub(crate) queue: Arc<EmbeddingQueue>,
    pub(crate) provider: Arc<dyn EmbeddingProvider>,
    /// Serializes captured-sessions journal appends.
    journal: Mutex<()>,
    lock: Mutex<LockFile>,
}

/// Provenance-tracked semantic memory engine.
pub struct MemoryEngine {
    inner: Arc<EngineInner>,
    tasks: Vec<tokio::task::JoinHandle<()>>,
}

impl std::fmt::Debug for MemoryEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryEngine").finish_non_exhaustive()
    }
}

impl MemoryEngine {
    // ── Lifecycle ──────────────────────────────────────────────────────

    /// Open (or create) the engine over `config.data_dir`, loading the
    /// vector index from disk or rebuilding it from entry rows.
    pub async fn open(
        config: EngineConfig,
        provider: Arc<dyn EmbeddingProvider>,
    ) -> MemoryResult<Self> {
        std::fs::create_dir_all(&config.data_dir)?;
        let lock = LockFile::acquire(config.lock_path())?;
        let store = Arc::new(EntryStore::open(&config.db_path())?);

        let (alpha, beta) = normalize_weights(config.query.alpha, config.query.beta);
        let index = build_index(&config, &store)?;
        let index = Arc::new(Mutex::new(index));

        let queue = Arc::new(EmbeddingQueue::new(
            Arc::clone(&store),
            Arc::clone(&index),
            Arc::clone(&provider),
            config.embedding.clone(),
            config.index_path(),
        ));

        let inner = Arc::new(EngineInner {
            alpha,
            beta,
            store,
            index,
            queue,
            provider,
            journal: Mutex::new(()),
            lock: Mutex::new(lock),
            config,
        });

        let tasks = spawn_background_tasks(&inner);
        info!(
            "[engine] open: {} entr(ies), {} vector(s) indexed",
            inner.store.count_entries()?,
            inner.index.lock().len()
        );
        Ok(MemoryEngine { inner, tasks })
    }

    /// Flush, checkpoint, stop background tasks, and release the data-dir
    /// lock. Best-effort on the flush: a dead provider never blocks close.
    pub async fn close(mut self) -> MemoryResult<()> {
        for task in self.tasks.drain(..) {
            task.abort();
        }
        let deadline = self.inner.config.embedding.timeout_ms;
        if let Err(e) = self.inner.queue.flush_with_deadline(deadline).await {
            warn!("[engine] close-time flush incomplete: {e}");
        }
        self.checkpoint().await?;
        self.inner.lock.lock().release();
        info!("[engine] closed");
        Ok(())
    }

    // ── Core operations ────────────────────────────────────────────────

    /// Validate provenance, write the entry (with tags, edges, and its
    /// pending-embedding record) atomically, and hand back the committed
    /// entry plus a backlog warning when the queue is past its soft cap.
    pub async fn store(&self, content: &str, options: StoreOptions) -> MemoryResult<StoreReceipt> {
        let inner = &self.inner;
        let importance = options.importance.clamp(0.0, 1.0);

        let (depth, lscore) = provenance::compute_aggregates(
            &inner.store,
            &options.parents,
            importance,
            &inner.config.lscore,
        )?;
        provenance::enforce_threshold(lscore, &inner.config.lscore)?;

        let id = Uuid::new_v4().to_string();
        provenance::check_edges(&inner.store, &options.parents, &id)?;

        let mut tags = options.tags;
        tags.sort();
        tags.dedup();

        let mut entry = Entry {
            id,
            content: content.to_string(),
            source: options.source,
            importance,
            created_at: now_iso(),
            session_id: options.session_id,
            agent_id: options.agent_id,
            context: options.context,
            tags,
            label: 0,
            pending_embedding: true,
            tier: CompressionTier::Hot,
            quality: 0.0,
            quality_updates: 0,
            access_count: 0,
            depth,
            confidence: options.confidence.clamp(0.0, 1.0),
            relevance: options.relevance.clamp(0.0, 1.0),
            lscore,
        };
        entry.label = inner.store.insert_entry(&entry, &options.parents)?;

        if lscore < inner.config.lscore.threshold {
            info!(
                "[engine] stored low-confidence entry {} (L-Score {lscore:.3})",
                &entry.id[..8]
            );
        }

        // Queue-size flush trigger; fire-and-forget so `store` never blocks
        // on the provider.
        if inner.queue.over_threshold() {
            let queue = Arc::clone(&inner.queue);
            tokio::spawn(async move {
                queue.flush().await.ok();
            });
        }

        let pending = inner.store.pending_count()?;
        let backlog_warning = (pending > inner.config.pending_soft_cap).then(|| {
            format!(
                "pending embedding backlog {pending} exceeds soft cap {}",
                inner.config.pending_soft_cap
            )
        });

        Ok(StoreReceipt { entry, backlog_warning })
    }

    /// Hybrid semantic+symbolic retrieval, ranked by composite score.
    pub async fn query(&self, text: &str, opts: QueryOptions) -> MemoryResult<Vec<QueryHit>> {
        query::run_query(&self.inner, text, &opts).await
    }

    /// Surface entries refuting `claim` and score its credibility.
    pub async fn shadow_query(&self, claim: &str, opts: QueryOptions) -> MemoryResult<ShadowReport> {
        shadow::shadow_query(&self.inner, claim, &opts).await
    }

    /// Point lookup. Bumps access counters best-effort.
    pub async fn get(&self, id: &str) -> MemoryResult<Option<Entry>> {
        let entry = self.inner.store.get_entry(id)?;
        if entry.is_some() {
            self.inner.store.record_access(id).ok();
        }
        Ok(entry)
    }

    /// Delete an entry and everything that references it: tags, provenance
    /// edges, causal endpoints, pending record, vector label. Idempotent.
    pub async fn delete(&self, id: &str) -> MemoryResult<bool> {
        let Some(label) = self.inner.store.delete_entry(id)? else {
            return Ok(false);
        };
        self.inner.index.lock().remove(label);
        info!("[engine] deleted entry {id} (label {label})");
        Ok(true)
    }

    /// Lineage tree for `id`, capped at `depth` (configured default).
    pub async fn trace(&self, id: &str, depth: Option<u32>) -> MemoryResult<LineageNode> {
        let depth = depth.unwrap_or(self.inner.config.query.trace_depth);
        provenance::trace(&self.inner.store, id, depth)
    }

    // ── Causal hypergraph ──────────────────────────────────────────────

    #[allow(clippy::too_many_arguments)]
    pub async fn link(
        &self,
        sources: &[String],
        targets: &[String],
        relation_type: RelationType,
        strength: f64,
        ttl_ms: Option<i64>,
        metadata: Option<serde_json::Value>,
    ) -> MemoryResult<CausalRelation> {
        causal::link(
            &self.inner.store,
            sources,
            targets,
            relation_type,
            strength,
            ttl_ms,
            metadata,
            &self.inner.config.causal,
        )
    }

    pub async fn traverse(
        &self,
        start_ids: &[String],
        direction: Direction,
        max_depth: u32,
        type_filter: Option<RelationType>,
    ) -> MemoryResult<crate::atoms::types::TraversalResult> {
        causal::traverse(&self.inner.store, start_ids, direction, max_depth, type_filter)
    }

    pub async fn paths(
        &self,
        a: &str,
        b: &str,
        type_filter: Option<RelationType>,
        max_depth: u32,
    ) -> MemoryResult<Vec<CausalPath>> {
        causal::paths(&self.inner.store, a, b, type_filter, max_depth)
    }

    /// Sweep expired hyperedges now; returns the swept count. Also runs
    /// periodically in the background.
    pub async fn cleanup_expired(&self) -> MemoryResult<usize> {
        causal::cleanup_expired(&self.inner.store)
    }

    // ── Embedding queue ────────────────────────────────────────────────

    /// Force a flush of pending embeddings. External completion hooks
    /// (subtask/task done) call this.
    pub async fn flush_embeddings(&self) -> MemoryResult<FlushReport> {
        self.inner.queue.flush().await
    }

    pub async fn pending_stats(&self) -> MemoryResult<PendingStats> {
        self.inner.queue.pending_stats()
    }

    // ── Maintenance & observability ────────────────────────────────────

    pub async fn update_tier(&self, id: &str, tier: CompressionTier) -> MemoryResult<()> {
        self.inner.store.update_tier(id, tier)
    }

    /// Fold a learning-quality observation into the entry's running mean.
    pub async fn record_quality(&self, id: &str, score: f64) -> MemoryResult<()> {
        self.inner.store.record_quality(id, score.clamp(0.0, 1.0))
    }

    pub async fn recent_failures(&self, limit: usize) -> MemoryResult<Vec<FailureRecord>> {
        self.inner.store.recent_failures(limit)
    }

    pub async fn stats(&self) -> MemoryResult<EngineStats> {
        let store = &self.inner.store;
        let (causal_relations, live_causal_relations) = store.count_relations()?;
        Ok(EngineStats {
            entries: store.count_entries()?,
            tags: store.count_tags()?,
            provenance_edges: store.count_provenance_edges()?,
            causal_relations,
            live_causal_relations,
            indexed_vectors: self.inner.index.lock().len(),
            pending_embeddings: store.pending_count()?,
            per_source: store.counts_by_source()?,
            top_tags: store.top_tags(10)?,
        })
    }

    /// Persist the vector index and truncate the WAL.
    pub async fn checkpoint(&self) -> MemoryResult<()> {
        {
            let index = self.inner.index.lock();
            save_index(&index, &self.inner.config.index_path())?;
        }
        self.inner.store.checkpoint()?;
        Ok(())
    }

    /// Append an event to the captured-sessions journal (JSON lines).
    pub async fn journal_event(&self, kind: &str, payload: serde_json::Value) -> MemoryResult<()> {
        let line = serde_json::to_string(&serde_json::json!({
            "ts": now_iso(),
            "kind": kind,
            "payload": payload,
        }))?;
        let _guard = self.inner.journal.lock();
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.inner.config.journal_path())?;
        writeln!(file, "{line}")?;
        Ok(())
    }
}

impl Drop for MemoryEngine {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

// ── Construction helpers ───────────────────────────────────────────────────

fn normalize_weights(alpha: f64, beta: f64) -> (f64, f64) {
    let sum = alpha + beta;
    if !(sum.is_finite()) || sum <= 0.0 || alpha < 0.0 || beta < 0.0 {
        warn!("[engine] invalid ranking weights alpha={alpha} beta={beta} — using 0.7/0.3");
        return (0.7, 0.3);
    }
    (alpha / sum, beta / sum)
}

/// Load the index file, or rebuild from entry rows. Either way, reconcile
/// against the store: stale labels are evicted, missing embedded rows are
/// re-inserted.
fn build_index(config: &EngineConfig, store: &EntryStore) -> MemoryResult<VectorIndex> {
    let mut index = match load_index(&config.index_path(), config.vector_dims, config.hnsw.clone())? {
        Some(index) => index,
        None => VectorIndex::new(config.vector_dims, config.hnsw.clone()),
    };

    let embedded = store.embedded_vectors()?;
    let store_labels: HashSet<u64> = embedded.iter().map(|(l, _)| *l).collect();

    for label in index.labels() {
        if !store_labels.contains(&label) {
            index.remove(label);
        }
    }
    let mut restored = 0usize;
    for (label, vector) in embedded {
        if !index.contains(label) {
            match index.add(label, vector) {
                Ok(()) => restored += 1,
                Err(e) => {
                    warn!("[engine] could not restore vector for label {label}: {e}");
                    store.log_failure("index-rebuild", None, &format!("label {label}: {e}")).ok();
                }
            }
        }
    }
    if restored > 0 {
        info!("[engine] restored {restored} vector(s) from entry rows");
    }
    Ok(index)
}

fn spawn_background_tasks(inner: &Arc<EngineInner>) -> Vec<tokio::task::JoinHandle<()>> {
    let mut tasks = Vec::new();

    // Periodic flush while anything is pending.
    let flush_inner = Arc::clone(inner);
    let flush_every = std::time::Duration::from_millis(
        inner.config.embedding.flush_interval_ms.max(100),
    );
    tasks.push(tokio::spawn(async move {
        let mut ticker = tokio::time::interval(flush_every);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let pending = flush_inner.store.pending_count().unwrap_or(0);
            if pending > 0 {
                flush_inner.queue.flush().await.ok();
            }
        }
    }));

    // Periodic expired-edge sweep.
    let sweep_inner = Arc::clone(inner);
    let sweep_every = std::time::Duration::from_millis(
        inner.config.causal.sweep_interval_ms.max(100),
    );
    tasks.push(tokio::spawn(async move {
        let mut ticker = tokio::time::interval(sweep_every);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            causal::cleanup_expired(&sweep_inner.store).ok();
        }
    }));

    tasks
}

// Re-exported for errors that callers may want to match on.
pub use crate::atoms::error::MemoryError as Error;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn weights_normalize_to_one() {
        let (a, b) = normalize_weights(0.7, 0.3);
        assert!((a + b - 1.0).abs() < 1e-12);
        let (a, b) = normalize_weights(1.4, 0.6);
        assert!((a - 0.7).abs() < 1e-12);
        assert!((b - 0.3).abs() < 1e-12);
    }

    #[test]
    fn bad_weights_fall_back_to_defaults() {
        let (a, b) = normalize_weights(0.0, 0.0);
        assert!((a - 0.7).abs() < 1e-12);
        assert!((b - 0.3).abs() < 1e-12);
        let (a, b) = normalize_weights(-1.0, 0.5);
        assert!((a - 0.7).abs() < 1e-12);
        assert!((b - 0.3).abs() < 1e-12);
    }
}
