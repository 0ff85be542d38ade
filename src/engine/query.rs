// ── Query planner: vector hits × tag filters × provenance fusion ───────────
//
// Pipeline: force a bounded flush of pending embeddings → embed the query →
// over-fetch vector candidates → resolve and filter against entry metadata →
// augment from a tag scan when short → composite-score, sort, truncate →
// label match types → optionally attach lineage.

use std::sync::Arc;

use log::{info, warn};

use crate::atoms::error::MemoryResult;
use crate::atoms::types::{Entry, EntryFilters, MatchType, QueryHit, QueryOptions, TagMode};
use crate::engine::embedding::with_retries;
use crate::engine::{provenance, EngineInner};

/// Over-fetch factor for vector candidates, headroom for filter drop-outs.
const OVERFETCH: usize = 4;

pub(crate) async fn run_query(
    inner: &Arc<EngineInner>,
    text: &str,
    opts: &QueryOptions,
) -> MemoryResult<Vec<QueryHit>> {
    // ── Step 1: make queued embeddings visible, within a bounded wait ──
    if inner.store.pending_count()? > 0 {
        let deadline = inner.config.embedding.timeout_ms.saturating_mul(2);
        if let Err(e) = inner.queue.flush_with_deadline(deadline).await {
            // Pending entries stay tag-visible; continue with the warm index.
            warn!("[query] pre-query flush incomplete: {e}");
        }
    }

    // ── Step 2: embed the query ────────────────────────────────────────
    let provider = Arc::clone(&inner.provider);
    let owned = text.to_string();
    let embedded = with_retries(&inner.config.embedding, || {
        let provider = Arc::clone(&provider);
        let text = owned.clone();
        async move { provider.embed(&text).await }
    })
    .await?;

    // ── Step 3: vector candidates ──────────────────────────────────────
    let fetch = (opts.top_k.saturating_mul(OVERFETCH)).max(inner.config.hnsw.ef_search);
    let vector_hits = {
        let mut index = inner.index.lock();
        index.search(&embedded.vector, fetch)?
    };

    // ── Step 4: resolve labels, apply the filter bundle ────────────────
    let mut hits: Vec<QueryHit> = Vec::new();
    for (label, similarity) in vector_hits {
        let Some(entry) = inner.store.entry_by_label(label)? else {
            continue;
        };
        if !passes_filters(&entry, &opts.filters) {
            continue;
        }
        hits.push(scored_hit(inner, entry, similarity as f64, false));
    }

    // ── Step 5: tag-only augmentation when short ───────────────────────
    if hits.len() < opts.top_k {
        for entry in inner.store.by_filters(&opts.filters)? {
            if hits.iter().any(|h| h.entry.id == entry.id) {
                continue;
            }
            hits.push(scored_hit(inner, entry, 0.0, true));
            if hits.len() >= opts.top_k.saturating_mul(OVERFETCH) {
                break;
            }
        }
    }

    // ── Step 6: composite-score floor ──────────────────────────────────
    let min_score = opts.min_score.unwrap_or(inner.config.query.min_score_default);
    hits.retain(|h| h.score >= min_score);

    // ── Step 7: total order, then truncate ─────────────────────────────
    hits.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| {
                b.entry
                    .importance
                    .partial_cmp(&a.entry.importance)
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .then_with(|| a.entry.created_at.cmp(&b.entry.created_at))
            .then_with(|| a.entry.id.cmp(&b.entry.id))
    });
    hits.truncate(opts.top_k);

    // ── Step 9: lineage + access bookkeeping ───────────────────────────
    if opts.include_provenance {
        let depth = opts.trace_depth.unwrap_or(inner.config.query.trace_depth);
        for hit in &mut hits {
            hit.lineage = provenance::trace(&inner.store, &hit.entry.id, depth).ok();
        }
    }
    for hit in &hits {
        inner.store.record_access(&hit.entry.id).ok();
    }

    info!("[query] {} result(s) for '{}'", hits.len(), &text[..text.len().min(60)]);
    Ok(hits)
}

/// Build a scored hit and label how it matched. A vector hit is `Vector`
/// when the similarity term clearly dominates (≥ 2× the provenance term),
/// `Hybrid` when both contribute. Augmented entries are `TagOnly` while
/// their embedding is still pending, `Pattern` once they carry one.
fn scored_hit(inner: &EngineInner, entry: Entry, similarity: f64, augmented: bool) -> QueryHit {
    let score = inner.alpha * similarity + inner.beta * entry.lscore;
    let match_type = if augmented || similarity <= 0.0 {
        if entry.pending_embedding {
            MatchType::TagOnly
        } else {
            MatchType::Pattern
        }
    } else if inner.alpha * similarity >= 2.0 * inner.beta * entry.lscore {
        MatchType::Vector
    } else {
        MatchType::Hybrid
    };
    QueryHit { entry, similarity, score, match_type, lineage: None }
}

/// In-memory counterpart of the store's composite filter.
pub(crate) fn passes_filters(entry: &Entry, filters: &EntryFilters) -> bool {
    if !filters.sources.is_empty() && !filters.sources.contains(&entry.source) {
        return false;
    }
    if !filters.tags.is_empty() {
        let matched = match filters.tag_mode {
            TagMode::Any => filters.tags.iter().any(|t| entry.tags.contains(t)),
            TagMode::All => filters.tags.iter().all(|t| entry.tags.contains(t)),
        };
        if !matched {
            return false;
        }
    }
    if let Some(ref after) = filters.created_after {
        if entry.created_at.as_str() < after.as_str() {
            return false;
        }
    }
    if let Some(ref before) = filters.created_before {
        if entry.created_at.as_str() > before.as_str() {
            return false;
        }
    }
    if let Some(min) = filters.min_importance {
        if entry.importance < min {
            return false;
        }
    }
    if let Some(ref session) = filters.session_id {
        if entry.session_id.as_deref() != Some(session.as_str()) {
            return false;
        }
    }
    if let Some(ref agent) = filters.agent_id {
        if entry.agent_id.as_deref() != Some(agent.as_str()) {
            return false;
        }
    }
    true
}
