// ── Deferred embedding queue ───────────────────────────────────────────────
//
// Decouples `store` latency from the remote provider. Pending records live
// in the database (written in the same transaction as the entry row), so a
// killed flush leaves them intact for the next run.
//
// Flush is serialized through a tokio Mutex: a flush triggered while
// another is in flight awaits the guard, then finds the drained queue and
// returns immediately instead of recursing.

use std::path::PathBuf;
use std::sync::Arc;

use log::{info, warn};
use parking_lot::Mutex;

use crate::atoms::config::EmbeddingConfig;
use crate::atoms::error::{MemoryError, MemoryResult};
use crate::atoms::types::PendingStats;
use crate::engine::store::EntryStore;
use crate::engine::vector::{save_index, VectorIndex};

use super::{with_retries, EmbeddingProvider};

/// Outcome of one flush pass.
#[derive(Debug, Clone, Default)]
pub struct FlushReport {
    /// Entries whose vectors landed in the index.
    pub embedded: usize,
    /// Entries whose batches exhausted retries; still pending.
    pub failed: Vec<String>,
    /// Entries whose vectors were rejected (zero vector); dropped from the
    /// queue and left tag-only.
    pub rejected: Vec<String>,
}

pub struct EmbeddingQueue {
    store: Arc<EntryStore>,
    index: Arc<Mutex<VectorIndex>>,
    provider: Arc<dyn EmbeddingProvider>,
    config: EmbeddingConfig,
    index_path: PathBuf,
    flush_lock: tokio::sync::Mutex<()>,
}

impl EmbeddingQueue {
    pub fn new(
        store: Arc<EntryStore>,
        index: Arc<Mutex<VectorIndex>>,
        provider: Arc<dyn EmbeddingProvider>,
        config: EmbeddingConfig,
        index_path: PathBuf,
    ) -> Self {
        Self {
            store,
            index,
            provider,
            config,
            index_path,
            flush_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn pending_stats(&self) -> MemoryResult<PendingStats> {
        Ok(PendingStats {
            pending_count: self.store.pending_count()?,
            oldest_pending_age_ms: self.store.oldest_pending_age_ms(crate::engine::now_ms())?,
        })
    }

    /// True when the queue has grown past the immediate-flush threshold.
    pub fn over_threshold(&self) -> bool {
        self.store
            .pending_count()
            .map(|n| n >= self.config.flush_threshold)
            .unwrap_or(false)
    }

    /// Flush with a deadline. Callers that must not stall (the query
    /// planner) bound their wait here.
    pub async fn flush_with_deadline(&self, deadline_ms: u64) -> MemoryResult<FlushReport> {
        match tokio::time::timeout(
            std::time::Duration::from_millis(deadline_ms),
            self.flush(),
        )
        .await
        {
            Ok(report) => report,
            Err(_) => Err(MemoryError::Timeout(deadline_ms)),
        }
    }

    /// Consume all pending records: batch, embed, insert into the index,
    /// persist the index, clear the drained records.
    pub async fn flush(&self) -> MemoryResult<FlushReport> {
        let _guard = self.flush_lock.lock().await;

        let pending = self.store.list_pending()?;
        if pending.is_empty() {
            return Ok(FlushReport::default());
        }
        info!("[embed] flushing {} pending embeddings", pending.len());

        let mut report = FlushReport::default();
        let mut done: Vec<String> = Vec::new();

        for batch in pending.chunks(self.config.batch_size.max(1)) {
            let texts: Vec<String> = batch.iter().map(|r| r.content.clone()).collect();
            let result = with_retries(&self.config, || {
                let provider = Arc::clone(&self.provider);
                let texts = texts.clone();
                async move { provider.embed_batch(&texts).await }
            })
            .await;

            let vectors = match result {
                Ok(embedded) if embedded.vectors.len() == batch.len() => embedded.vectors,
                Ok(embedded) => {
                    warn!(
                        "[embed] provider returned {} vectors for {} texts — keeping batch pending",
                        embedded.vectors.len(),
                        batch.len()
                    );
                    report.failed.extend(batch.iter().map(|r| r.entry_id.clone()));
                    continue;
                }
                Err(e) => {
                    warn!("[embed] batch of {} failed: {e} — keeping records pending", batch.len());
                    for record in batch {
                        self.store
                            .log_failure("embed-batch", Some(&record.entry_id), &e.to_string())
                            .ok();
                        report.failed.push(record.entry_id.clone());
                    }
                    continue;
                }
            };

            for (record, vector) in batch.iter().zip(vectors.into_iter()) {
                let added = {
                    let mut index = self.index.lock();
                    index.add(record.label, vector.clone())
                };
                match added {
                    Ok(()) => {
                        self.store.mark_embedded(&record.entry_id, &vector)?;
                        done.push(record.entry_id.clone());
                        report.embedded += 1;
                    }
                    Err(e @ MemoryError::InvalidArgument(_)) => {
                        // A zero vector can never be indexed; drop the record
                        // so the entry stays reachable through tag queries.
                        warn!("[embed] vector for {} rejected: {e}", record.entry_id);
                        self.store
                            .log_failure("embed-reject", Some(&record.entry_id), &e.to_string())
                            .ok();
                        done.push(record.entry_id.clone());
                        report.rejected.push(record.entry_id.clone());
                    }
                    Err(e) => {
                        // Dimension/capacity problems may clear up after a
                        // config fix or deletes; keep the record pending.
                        warn!("[embed] could not index {}: {e}", record.entry_id);
                        self.store
                            .log_failure("embed-index", Some(&record.entry_id), &e.to_string())
                            .ok();
                        report.failed.push(record.entry_id.clone());
                    }
                }
            }
        }

        if !done.is_empty() {
            self.store.remove_pending(&done)?;
            let index = self.index.lock();
            save_index(&index, &self.index_path)?;
        }

        info!(
            "[embed] flush complete: {} embedded, {} failed, {} rejected",
            report.embedded,
            report.failed.len(),
            report.rejected.len()
        );
        Ok(report)
    }
}
