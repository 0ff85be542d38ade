// ── Provenance: DAG aggregates, L-Score, lineage traversal ────────────────
//
// The L-Score is the scalar confidence propagated along the provenance DAG:
//
//     L(e) = min(1, importance(e) · decay^depth(e) · Π L(parent))
//
// with the empty product equal to 1, so roots keep their base confidence.
// Depth is the length of the longest path from any root. Both are computed
// once at insert and cached on the entry row.

use std::collections::HashSet;

use crate::atoms::config::LScoreConfig;
use crate::atoms::error::{MemoryError, MemoryResult};
use crate::atoms::types::LineageNode;
use crate::engine::store::EntryStore;

/// Depth and L-Score for a new entry with the given parents.
/// Fails with `UnknownParent` when a parent id is not stored.
pub(crate) fn compute_aggregates(
    store: &EntryStore,
    parents: &[String],
    importance: f64,
    config: &LScoreConfig,
) -> MemoryResult<(u32, f64)> {
    if parents.is_empty() {
        return Ok((0, importance.min(1.0)));
    }

    let found = store.provenance_aggregates(parents)?;
    for parent in parents {
        if !found.iter().any(|(id, _, _)| id == parent) {
            return Err(MemoryError::UnknownParent(parent.clone()));
        }
    }

    let depth = found.iter().map(|(_, d, _)| *d).max().unwrap_or(0) + 1;
    let parent_product: f64 = found.iter().map(|(_, _, l)| *l).product();
    let lscore = (importance * config.depth_decay.powi(depth as i32) * parent_product).min(1.0);
    Ok((depth, lscore))
}

/// Enforce the threshold policy on a freshly computed L-Score.
pub(crate) fn enforce_threshold(lscore: f64, config: &LScoreConfig) -> MemoryResult<()> {
    if config.enforce && lscore < config.threshold {
        return Err(MemoryError::ProvenanceThreshold { score: lscore, threshold: config.threshold });
    }
    Ok(())
}

/// Whether installing `parent → child` would close a cycle, i.e. whether
/// `child` is already an ancestor of `parent`.
pub(crate) fn would_close_cycle(
    store: &EntryStore,
    parent: &str,
    child: &str,
) -> MemoryResult<bool> {
    if parent == child {
        return Ok(true);
    }
    let mut seen: HashSet<String> = HashSet::new();
    let mut frontier = vec![parent.to_string()];
    while let Some(current) = frontier.pop() {
        if !seen.insert(current.clone()) {
            continue;
        }
        for ancestor in store.parents_of(&current)? {
            if ancestor == child {
                return Ok(true);
            }
            frontier.push(ancestor);
        }
    }
    Ok(false)
}

/// Reject any parent edge that would close a cycle.
pub(crate) fn check_edges(store: &EntryStore, parents: &[String], child: &str) -> MemoryResult<()> {
    for parent in parents {
        if would_close_cycle(store, parent, child)? {
            return Err(MemoryError::Cycle { parent: parent.clone(), child: child.to_string() });
        }
    }
    Ok(())
}

/// Lineage tree for `id`: the entry and its parents recursively, each node
/// labeled with confidence, relevance, depth, and L-Score. `max_depth`
/// bounds the recursion.
pub(crate) fn trace(store: &EntryStore, id: &str, max_depth: u32) -> MemoryResult<LineageNode> {
    let entry = store
        .get_entry(id)?
        .ok_or_else(|| MemoryError::UnknownEntry(id.to_string()))?;

    let parents = if max_depth == 0 {
        Vec::new()
    } else {
        let mut nodes = Vec::new();
        for parent_id in store.parents_of(id)? {
            nodes.push(trace(store, &parent_id, max_depth - 1)?);
        }
        nodes
    };

    Ok(LineageNode {
        id: entry.id,
        content: entry.content,
        depth: entry.depth,
        confidence: entry.confidence,
        relevance: entry.relevance,
        lscore: entry.lscore,
        parents,
    })
}
