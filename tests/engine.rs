// End-to-end tests over a real data directory with a deterministic
// in-process embedding provider.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

use mnemograph::{
    Direction, EmbeddedBatch, Embedded, EmbeddingProvider, EngineConfig, EntryFilters,
    EntrySource, MatchType, MemoryEngine, MemoryError, MemoryResult, QueryOptions, RelationType,
    StoreOptions, TagMode, TokenUsage,
};

// ── Deterministic mock provider ────────────────────────────────────────────

/// Bag-of-words hash embedding: identical texts map to identical vectors,
/// empty text maps to the zero vector (which the index rejects).
struct MockProvider {
    dims: usize,
    calls: AtomicUsize,
}

impl MockProvider {
    fn new(dims: usize) -> Self {
        Self { dims, calls: AtomicUsize::new(0) }
    }

    fn embed_text(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; self.dims];
        for token in text.split_whitespace() {
            let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
            for byte in token.to_lowercase().bytes() {
                hash ^= byte as u64;
                hash = hash.wrapping_mul(0x1000_0000_01b3);
            }
            v[(hash % self.dims as u64) as usize] += 1.0;
            v[((hash >> 17) % self.dims as u64) as usize] += 0.5;
        }
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 1e-8 {
            for x in v.iter_mut() {
                *x /= norm;
            }
        }
        v
    }
}

#[async_trait]
impl EmbeddingProvider for MockProvider {
    fn model_name(&self) -> &str {
        "mock-hash-embed"
    }

    async fn embed(&self, text: &str) -> MemoryResult<Embedded> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(Embedded { vector: self.embed_text(text), usage: TokenUsage::default() })
    }

    async fn embed_batch(&self, texts: &[String]) -> MemoryResult<EmbeddedBatch> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(EmbeddedBatch {
            vectors: texts.iter().map(|t| self.embed_text(t)).collect(),
            usage: TokenUsage::default(),
        })
    }
}

/// A provider that always fails, for backlog behavior.
struct DownProvider;

#[async_trait]
impl EmbeddingProvider for DownProvider {
    fn model_name(&self) -> &str {
        "down"
    }

    async fn embed(&self, _text: &str) -> MemoryResult<Embedded> {
        Err(MemoryError::provider_transient("connection refused"))
    }

    async fn embed_batch(&self, _texts: &[String]) -> MemoryResult<EmbeddedBatch> {
        Err(MemoryError::provider_transient("connection refused"))
    }
}

// ── Helpers ────────────────────────────────────────────────────────────────

const DIMS: usize = 32;

fn test_config(dir: &std::path::Path) -> EngineConfig {
    let mut config = EngineConfig::new(dir);
    config.vector_dims = DIMS;
    config.embedding.retry_delay_ms = 1;
    config.embedding.max_retries = 1;
    config
}

async fn open_engine(dir: &std::path::Path) -> MemoryEngine {
    MemoryEngine::open(test_config(dir), Arc::new(MockProvider::new(DIMS)))
        .await
        .expect("engine open")
}

fn tagged(tags: &[&str]) -> StoreOptions {
    let mut opts = StoreOptions::new();
    opts.tags = tags.iter().map(|t| t.to_string()).collect();
    opts
}

// ── Scenario: store and query roots ────────────────────────────────────────

#[tokio::test]
async fn store_and_query_roots() {
    let dir = tempfile::tempdir().unwrap();
    let engine = open_engine(dir.path()).await;

    for content in ["alpha", "beta", "gamma"] {
        engine.store(content, tagged(&["t0"])).await.unwrap();
    }

    let hits = engine
        .query("alpha", QueryOptions { top_k: 1, ..Default::default() })
        .await
        .unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].entry.content, "alpha");
    assert_eq!(hits[0].match_type, MatchType::Vector);
    assert!(hits[0].similarity > 0.9, "similarity {}", hits[0].similarity);
}

// ── Scenario: provenance threshold enforcement ─────────────────────────────

#[tokio::test]
async fn provenance_threshold_gates_deep_lineage() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(dir.path());
    config.lscore.depth_decay = 0.9;
    config.lscore.threshold = 0.5;
    config.lscore.enforce = true;
    let engine = MemoryEngine::open(config, Arc::new(MockProvider::new(DIMS))).await.unwrap();

    let mut opts = StoreOptions::new();
    opts.importance = 0.8;
    let root = engine.store("root observation", opts).await.unwrap().entry;
    assert!((root.lscore - 0.8).abs() < 1e-9);

    let mut opts = StoreOptions::new();
    opts.importance = 0.9;
    opts.parents = vec![root.id.clone()];
    let child = engine.store("first inference", opts).await.unwrap().entry;
    assert!((child.lscore - 0.648).abs() < 1e-9);

    let mut opts = StoreOptions::new();
    opts.importance = 0.9;
    opts.parents = vec![child.id.clone()];
    let grandchild = engine.store("second inference", opts).await.unwrap().entry;
    assert!(grandchild.lscore > 0.5 && grandchild.lscore < 0.53);

    let mut opts = StoreOptions::new();
    opts.importance = 0.9;
    opts.parents = vec![grandchild.id.clone()];
    let before = engine.stats().await.unwrap().entries;
    let err = engine.store("third inference", opts).await.unwrap_err();
    assert!(matches!(err, MemoryError::ProvenanceThreshold { .. }));
    assert_eq!(engine.stats().await.unwrap().entries, before, "rejected store must write nothing");

    // L(child) never exceeds min parent L-Score.
    assert!(child.lscore <= root.lscore);
    assert!(grandchild.lscore <= child.lscore);
}

#[tokio::test]
async fn unknown_parent_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let engine = open_engine(dir.path()).await;
    let mut opts = StoreOptions::new();
    opts.parents = vec!["no-such-id".into()];
    let err = engine.store("orphan", opts).await.unwrap_err();
    assert!(matches!(err, MemoryError::UnknownParent(_)));
}

// ── Scenario: causal TTL expiry ────────────────────────────────────────────

#[tokio::test]
async fn causal_ttl_expiry() {
    let dir = tempfile::tempdir().unwrap();
    let engine = open_engine(dir.path()).await;

    let a = engine.store("switch flipped", StoreOptions::new()).await.unwrap().entry;
    let b = engine.store("light turned on", StoreOptions::new()).await.unwrap().entry;

    engine
        .link(
            &[a.id.clone()],
            &[b.id.clone()],
            RelationType::Triggers,
            0.7,
            Some(100),
            None,
        )
        .await
        .unwrap();

    let walk = engine
        .traverse(&[a.id.clone()], Direction::Forward, 3, None)
        .await
        .unwrap();
    assert_eq!(walk.reached, vec![b.id.clone()]);
    assert!((walk.path_strengths[&b.id] - 0.7).abs() < 1e-9);

    tokio::time::sleep(std::time::Duration::from_millis(200)).await;

    let walk = engine
        .traverse(&[a.id.clone()], Direction::Forward, 3, None)
        .await
        .unwrap();
    assert!(walk.reached.is_empty(), "expired edges must be invisible");

    assert_eq!(engine.cleanup_expired().await.unwrap(), 1);
}

#[tokio::test]
async fn traverse_directions_and_paths() {
    let dir = tempfile::tempdir().unwrap();
    let engine = open_engine(dir.path()).await;

    let a = engine.store("deploy started", StoreOptions::new()).await.unwrap().entry;
    let b = engine.store("cache invalidated", StoreOptions::new()).await.unwrap().entry;
    let c = engine.store("latency spiked", StoreOptions::new()).await.unwrap().entry;

    engine
        .link(&[a.id.clone()], &[b.id.clone()], RelationType::Causes, 0.8, None, None)
        .await
        .unwrap();
    engine
        .link(&[b.id.clone()], &[c.id.clone()], RelationType::Causes, 0.5, None, None)
        .await
        .unwrap();

    let forward = engine
        .traverse(&[a.id.clone()], Direction::Forward, 5, None)
        .await
        .unwrap();
    assert_eq!(forward.reached.len(), 2);
    assert!((forward.path_strengths[&c.id] - 0.4).abs() < 1e-9);

    let backward = engine
        .traverse(&[c.id.clone()], Direction::Backward, 5, None)
        .await
        .unwrap();
    assert_eq!(backward.reached.len(), 2);

    let depth_limited = engine
        .traverse(&[a.id.clone()], Direction::Forward, 1, None)
        .await
        .unwrap();
    assert_eq!(depth_limited.reached, vec![b.id.clone()]);

    let type_filtered = engine
        .traverse(&[a.id.clone()], Direction::Forward, 5, Some(RelationType::Prevents))
        .await
        .unwrap();
    assert!(type_filtered.reached.is_empty());

    let paths = engine.paths(&a.id, &c.id, None, 5).await.unwrap();
    assert_eq!(paths.len(), 1);
    assert_eq!(paths[0].nodes.len(), 3);
    assert!((paths[0].total_strength - 0.4).abs() < 1e-9);
}

#[tokio::test]
async fn link_validation() {
    let dir = tempfile::tempdir().unwrap();
    let engine = open_engine(dir.path()).await;
    let a = engine.store("something", StoreOptions::new()).await.unwrap().entry;

    let err = engine
        .link(&[a.id.clone()], &["ghost".into()], RelationType::Causes, 0.5, None, None)
        .await
        .unwrap_err();
    assert!(matches!(err, MemoryError::UnknownEntry(_)));

    let err = engine
        .link(&[a.id.clone()], &[a.id.clone()], RelationType::Causes, 1.5, None, None)
        .await
        .unwrap_err();
    assert!(matches!(err, MemoryError::InvalidArgument(_)));
}

// ── Scenario: tag-only fallback ────────────────────────────────────────────

#[tokio::test]
async fn tag_only_fallback_for_unembeddable_entries() {
    let dir = tempfile::tempdir().unwrap();
    let engine = open_engine(dir.path()).await;

    // Empty content → zero vector → rejected at the index.
    let x = engine.store("", tagged(&["rare"])).await.unwrap().entry;
    engine.store("ordinary filler entry", tagged(&["common"])).await.unwrap();

    let mut opts = QueryOptions::default();
    opts.filters.tags = vec!["rare".into()];
    let hits = engine.query("anything", opts).await.unwrap();

    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].entry.id, x.id);
    assert_eq!(hits[0].match_type, MatchType::TagOnly);
    assert_eq!(hits[0].similarity, 0.0);

    // The rejected record does not linger in the queue.
    assert_eq!(engine.pending_stats().await.unwrap().pending_count, 0);
}

// ── Scenario: hybrid ranking ───────────────────────────────────────────────

#[tokio::test]
async fn provenance_weight_breaks_near_ties() {
    let dir = tempfile::tempdir().unwrap();
    let engine = open_engine(dir.path()).await;

    // Identical content → identical embeddings; only the L-Score differs.
    let mut opts = StoreOptions::new();
    opts.importance = 0.9;
    let p = engine.store("the database migration completed", opts).await.unwrap().entry;

    let mut opts = StoreOptions::new();
    opts.importance = 0.4;
    let q = engine.store("the database migration completed", opts).await.unwrap().entry;

    let hits = engine
        .query("the database migration completed", QueryOptions { top_k: 2, ..Default::default() })
        .await
        .unwrap();
    assert_eq!(hits.len(), 2);
    assert_eq!(hits[0].entry.id, p.id, "higher L-Score must outrank");
    assert_eq!(hits[1].entry.id, q.id);
    assert!(hits[0].score > hits[1].score);
}

// ── Query contract: bounds, ordering, filters ──────────────────────────────

#[tokio::test]
async fn query_respects_top_k_min_score_and_order() {
    let dir = tempfile::tempdir().unwrap();
    let engine = open_engine(dir.path()).await;

    for i in 0..12 {
        let mut opts = tagged(&["corpus"]);
        opts.importance = 0.1 + 0.05 * i as f64;
        engine
            .store(&format!("fact number {i} about the system"), opts)
            .await
            .unwrap();
    }

    let hits = engine
        .query(
            "fact about the system",
            QueryOptions { top_k: 5, min_score: Some(0.1), ..Default::default() },
        )
        .await
        .unwrap();

    assert!(hits.len() <= 5);
    for window in hits.windows(2) {
        assert!(window[0].score >= window[1].score, "scores must be non-increasing");
    }
    for hit in &hits {
        assert!(hit.score >= 0.1);
    }
}

#[tokio::test]
async fn filters_constrain_results() {
    let dir = tempfile::tempdir().unwrap();
    let engine = open_engine(dir.path()).await;

    let mut opts = tagged(&["ops"]);
    opts.source = EntrySource::ToolOutput;
    opts.session_id = Some("s-1".into());
    engine.store("disk usage at ninety percent", opts).await.unwrap();

    let mut opts = tagged(&["ops", "alert"]);
    opts.source = EntrySource::UserInput;
    opts.session_id = Some("s-2".into());
    engine.store("disk usage alarm raised by operator", opts).await.unwrap();

    let mut query_opts = QueryOptions::default();
    query_opts.filters = EntryFilters {
        sources: vec![EntrySource::UserInput],
        tags: vec!["ops".into(), "alert".into()],
        tag_mode: TagMode::All,
        session_id: Some("s-2".into()),
        ..Default::default()
    };
    let hits = engine.query("disk usage", query_opts).await.unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].entry.source, EntrySource::UserInput);
}

// ── Round trips, labels, deletes ───────────────────────────────────────────

#[tokio::test]
async fn store_get_round_trip_preserves_fields() {
    let dir = tempfile::tempdir().unwrap();
    let engine = open_engine(dir.path()).await;

    let mut opts = tagged(&["b", "a"]);
    opts.source = EntrySource::External;
    opts.importance = 0.75;
    opts.context = HashMap::from([("origin".to_string(), "rss".to_string())]);
    let stored = engine.store("headline of the day", opts).await.unwrap().entry;

    let fetched = engine.get(&stored.id).await.unwrap().unwrap();
    assert_eq!(fetched.content, "headline of the day");
    assert_eq!(fetched.source, EntrySource::External);
    assert!((fetched.importance - 0.75).abs() < 1e-9);
    assert_eq!(fetched.tags, vec!["a".to_string(), "b".to_string()]);
    assert_eq!(fetched.context.get("origin").map(String::as_str), Some("rss"));
    assert_eq!(fetched.label, stored.label);
}

#[tokio::test]
async fn labels_are_monotonic_in_store_order() {
    let dir = tempfile::tempdir().unwrap();
    let engine = open_engine(dir.path()).await;
    let a = engine.store("first", StoreOptions::new()).await.unwrap().entry;
    let b = engine.store("second", StoreOptions::new()).await.unwrap().entry;
    let c = engine.store("third", StoreOptions::new()).await.unwrap().entry;
    assert!(a.label < b.label && b.label < c.label);
}

#[tokio::test]
async fn delete_cascades_everywhere() {
    let dir = tempfile::tempdir().unwrap();
    let engine = open_engine(dir.path()).await;

    let parent = engine.store("parent fact", tagged(&["keep"])).await.unwrap().entry;
    let mut opts = tagged(&["gone"]);
    opts.parents = vec![parent.id.clone()];
    let victim = engine.store("doomed fact", opts).await.unwrap().entry;
    engine
        .link(&[parent.id.clone()], &[victim.id.clone()], RelationType::Enables, 0.6, None, None)
        .await
        .unwrap();

    assert!(engine.delete(&victim.id).await.unwrap());
    // Idempotent.
    assert!(!engine.delete(&victim.id).await.unwrap());

    assert!(engine.get(&victim.id).await.unwrap().is_none());
    let stats = engine.stats().await.unwrap();
    assert_eq!(stats.entries, 1);
    assert_eq!(stats.provenance_edges, 0);
    assert_eq!(stats.causal_relations, 0, "relation with an emptied endpoint set must go");

    // The tag index no longer knows the entry.
    let mut opts = QueryOptions::default();
    opts.filters.tags = vec!["gone".into()];
    assert!(engine.query("doomed", opts).await.unwrap().is_empty());

    // Traversal from the parent reaches nothing.
    let walk = engine
        .traverse(&[parent.id.clone()], Direction::Forward, 3, None)
        .await
        .unwrap();
    assert!(walk.reached.is_empty());
}

// ── Provenance trace ───────────────────────────────────────────────────────

#[tokio::test]
async fn trace_returns_lineage_tree() {
    let dir = tempfile::tempdir().unwrap();
    let engine = open_engine(dir.path()).await;

    let root = engine.store("observed the outage", StoreOptions::new()).await.unwrap().entry;
    let mut opts = StoreOptions::new();
    opts.parents = vec![root.id.clone()];
    let leaf = engine.store("deduced the root cause", opts).await.unwrap().entry;

    let tree = engine.trace(&leaf.id, None).await.unwrap();
    assert_eq!(tree.id, leaf.id);
    assert_eq!(tree.depth, 1);
    assert_eq!(tree.parents.len(), 1);
    assert_eq!(tree.parents[0].id, root.id);
    assert!(tree.lscore <= tree.parents[0].lscore);

    let err = engine.trace("missing", None).await.unwrap_err();
    assert!(matches!(err, MemoryError::UnknownEntry(_)));
}

#[tokio::test]
async fn query_can_attach_provenance() {
    let dir = tempfile::tempdir().unwrap();
    let engine = open_engine(dir.path()).await;

    let root = engine.store("sensor reading high", StoreOptions::new()).await.unwrap().entry;
    let mut opts = StoreOptions::new();
    opts.parents = vec![root.id.clone()];
    engine.store("sensor reading trend rising", opts).await.unwrap();

    let hits = engine
        .query(
            "sensor reading trend rising",
            QueryOptions { top_k: 1, include_provenance: true, ..Default::default() },
        )
        .await
        .unwrap();
    let lineage = hits[0].lineage.as_ref().expect("lineage attached");
    assert_eq!(lineage.parents.len(), 1);
}

// ── Shadow query ───────────────────────────────────────────────────────────

#[tokio::test]
async fn shadow_query_finds_refutations() {
    let dir = tempfile::tempdir().unwrap();
    let engine = open_engine(dir.path()).await;

    let mut opts = StoreOptions::new();
    opts.source = EntrySource::ToolOutput;
    opts.importance = 0.9;
    engine
        .store("the backup job did not run last night", opts)
        .await
        .unwrap();
    engine.store("weather was sunny", StoreOptions::new()).await.unwrap();

    let report = engine
        .shadow_query("the backup job ran last night", QueryOptions::default())
        .await
        .unwrap();
    assert_eq!(report.contradictions.len(), 1);
    assert!(report.credibility < 1.0);
    assert!((0.0..=1.0).contains(&report.credibility));
}

#[tokio::test]
async fn shadow_query_without_refutations_keeps_full_credibility() {
    let dir = tempfile::tempdir().unwrap();
    let engine = open_engine(dir.path()).await;
    engine.store("weather was sunny", StoreOptions::new()).await.unwrap();
    engine.store("lunch was pasta", StoreOptions::new()).await.unwrap();

    let clean = engine
        .shadow_query("the weather was sunny", QueryOptions::default())
        .await
        .unwrap();
    assert!(clean.contradictions.is_empty());
    assert!((clean.credibility - 1.0).abs() < 1e-9);
}

// ── Embedding queue behavior ───────────────────────────────────────────────

#[tokio::test]
async fn pending_stats_and_explicit_flush() {
    let dir = tempfile::tempdir().unwrap();
    let engine = open_engine(dir.path()).await;

    engine.store("to be embedded later", StoreOptions::new()).await.unwrap();
    let pending = engine.pending_stats().await.unwrap();
    assert_eq!(pending.pending_count, 1);
    assert!(pending.oldest_pending_age_ms.is_some());

    let report = engine.flush_embeddings().await.unwrap();
    assert_eq!(report.embedded, 1);
    assert!(report.failed.is_empty());
    assert_eq!(engine.pending_stats().await.unwrap().pending_count, 0);

    // Flushing an empty queue is a no-op.
    let report = engine.flush_embeddings().await.unwrap();
    assert_eq!(report.embedded, 0);
}

#[tokio::test]
async fn failed_batches_stay_pending_and_never_fail_store() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(dir.path());
    config.pending_soft_cap = 1;
    let engine = MemoryEngine::open(config, Arc::new(DownProvider)).await.unwrap();

    let first = engine.store("unreachable provider one", StoreOptions::new()).await.unwrap();
    assert!(first.backlog_warning.is_none());
    let second = engine.store("unreachable provider two", StoreOptions::new()).await.unwrap();
    assert!(second.backlog_warning.is_some(), "soft cap exceeded must warn");

    let report = engine.flush_embeddings().await.unwrap();
    assert_eq!(report.embedded, 0);
    assert_eq!(report.failed.len(), 2);
    assert_eq!(engine.pending_stats().await.unwrap().pending_count, 2);

    // Entries are tag-visible immediately despite the dead provider.
    let fetched = engine.get(&first.entry.id).await.unwrap().unwrap();
    assert!(fetched.pending_embedding);

    let failures = engine.recent_failures(10).await.unwrap();
    assert!(!failures.is_empty());
}

// ── Tier & quality counters ────────────────────────────────────────────────

#[tokio::test]
async fn tier_and_quality_updates() {
    let dir = tempfile::tempdir().unwrap();
    let engine = open_engine(dir.path()).await;
    let entry = engine.store("long lived fact", StoreOptions::new()).await.unwrap().entry;

    engine.update_tier(&entry.id, mnemograph::CompressionTier::Cool).await.unwrap();
    engine.record_quality(&entry.id, 0.8).await.unwrap();
    engine.record_quality(&entry.id, 0.4).await.unwrap();

    let fetched = engine.get(&entry.id).await.unwrap().unwrap();
    assert_eq!(fetched.tier, mnemograph::CompressionTier::Cool);
    assert_eq!(fetched.quality_updates, 2);
    assert!((fetched.quality - 0.6).abs() < 1e-9);

    let err = engine.update_tier("ghost", mnemograph::CompressionTier::Cold).await.unwrap_err();
    assert!(matches!(err, MemoryError::UnknownEntry(_)));
}

// ── Lock file ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn second_engine_on_same_dir_is_locked_out() {
    let dir = tempfile::tempdir().unwrap();
    let engine = open_engine(dir.path()).await;

    let err = MemoryEngine::open(test_config(dir.path()), Arc::new(MockProvider::new(DIMS)))
        .await
        .unwrap_err();
    assert!(matches!(err, MemoryError::Lock(_)));

    engine.close().await.unwrap();
    let reopened = open_engine(dir.path()).await;
    reopened.close().await.unwrap();
}

// ── Persistence & recovery ─────────────────────────────────────────────────

#[tokio::test]
async fn restart_preserves_entries_and_rankings() {
    let dir = tempfile::tempdir().unwrap();
    let engine = open_engine(dir.path()).await;

    for i in 0..100 {
        engine
            .store(&format!("note {i} about subsystem {}", i % 7), StoreOptions::new())
            .await
            .unwrap();
    }
    engine.flush_embeddings().await.unwrap();

    let before: Vec<String> = engine
        .query("note 42 about subsystem 0", QueryOptions { top_k: 5, ..Default::default() })
        .await
        .unwrap()
        .into_iter()
        .map(|h| h.entry.id)
        .collect();
    engine.close().await.unwrap();

    let engine = open_engine(dir.path()).await;
    let stats = engine.stats().await.unwrap();
    assert_eq!(stats.entries, 100);
    assert_eq!(stats.indexed_vectors, 100);

    let after: Vec<String> = engine
        .query("note 42 about subsystem 0", QueryOptions { top_k: 5, ..Default::default() })
        .await
        .unwrap()
        .into_iter()
        .map(|h| h.entry.id)
        .collect();
    assert_eq!(before, after, "rankings must survive a restart");
    engine.close().await.unwrap();
}

#[tokio::test]
async fn corrupt_index_file_rebuilds_from_entry_rows() {
    let dir = tempfile::tempdir().unwrap();
    let engine = open_engine(dir.path()).await;
    for i in 0..10 {
        engine.store(&format!("resilient fact {i}"), StoreOptions::new()).await.unwrap();
    }
    engine.flush_embeddings().await.unwrap();
    let config = test_config(dir.path());
    engine.close().await.unwrap();

    std::fs::write(config.index_path(), b"garbage, not an index").unwrap();

    let engine = open_engine(dir.path()).await;
    assert_eq!(engine.stats().await.unwrap().indexed_vectors, 10);
    let hits = engine
        .query("resilient fact 3", QueryOptions { top_k: 1, ..Default::default() })
        .await
        .unwrap();
    assert_eq!(hits[0].entry.content, "resilient fact 3");
    engine.close().await.unwrap();
}

// ── Journal ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn journal_appends_json_lines() {
    let dir = tempfile::tempdir().unwrap();
    let engine = open_engine(dir.path()).await;
    engine
        .journal_event("capture", serde_json::json!({"session": "s-9"}))
        .await
        .unwrap();
    engine
        .journal_event("capture", serde_json::json!({"session": "s-10"}))
        .await
        .unwrap();

    let config = test_config(dir.path());
    let text = std::fs::read_to_string(config.journal_path()).unwrap();
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines.len(), 2);
    for line in lines {
        let v: serde_json::Value = serde_json::from_str(line).unwrap();
        assert_eq!(v["kind"], "capture");
    }
}
