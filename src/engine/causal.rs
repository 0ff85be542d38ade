// ── Causal hypergraph: link, traverse, paths, expiry ───────────────────────
//
// Typed many-to-many relations between entries, each with a strength and
// an optional TTL. Liveness is enforced at read time in the store queries,
// so the periodic sweep only reclaims rows — it never affects visibility.

use std::collections::{HashMap, HashSet, VecDeque};

use log::info;
use uuid::Uuid;

use crate::atoms::config::CausalConfig;
use crate::atoms::error::{MemoryError, MemoryResult};
use crate::atoms::types::{CausalPath, CausalRelation, Direction, RelationType, TraversalResult};
use crate::engine::store::EntryStore;

/// Create a hyperedge. Every endpoint must exist; strength must be in [0,1].
pub(crate) fn link(
    store: &EntryStore,
    sources: &[String],
    targets: &[String],
    relation_type: RelationType,
    strength: f64,
    ttl_ms: Option<i64>,
    metadata: Option<serde_json::Value>,
    config: &CausalConfig,
) -> MemoryResult<CausalRelation> {
    if sources.is_empty() || targets.is_empty() {
        return Err(MemoryError::InvalidArgument(
            "causal relation needs at least one source and one target".into(),
        ));
    }
    if !(0.0..=1.0).contains(&strength) {
        return Err(MemoryError::InvalidArgument(format!(
            "strength {strength} outside [0,1]"
        )));
    }

    let now_ms = crate::engine::now_ms();
    let ttl = ttl_ms.or(config.default_ttl_ms);
    let relation = CausalRelation {
        id: Uuid::new_v4().to_string(),
        relation_type,
        sources: sources.to_vec(),
        targets: targets.to_vec(),
        strength,
        created_at_ms: now_ms,
        expires_at_ms: ttl.map(|t| now_ms + t),
        metadata,
    };
    store.insert_relation(&relation)?;
    info!(
        "[causal] linked {} source(s) --[{} {:.2}]--> {} target(s)",
        sources.len(),
        relation_type.as_str(),
        strength,
        targets.len()
    );
    Ok(relation)
}

/// Neighbor ids of `frontier` reachable through one live hyperedge step.
fn step(
    store: &EntryStore,
    frontier: &[String],
    direction: Direction,
    now_ms: i64,
    type_filter: Option<RelationType>,
) -> MemoryResult<Vec<(CausalRelation, Vec<String>)>> {
    let mut hops: Vec<(CausalRelation, Vec<String>)> = Vec::new();

    if matches!(direction, Direction::Forward | Direction::Both) {
        for rel in store.relations_from(frontier, now_ms, type_filter)? {
            let next = rel.targets.clone();
            hops.push((rel, next));
        }
    }
    if matches!(direction, Direction::Backward | Direction::Both) {
        for rel in store.relations_into(frontier, now_ms, type_filter)? {
            let next = rel.sources.clone();
            hops.push((rel, next));
        }
    }
    Ok(hops)
}

/// Breadth-first walk through live hyperedges. Dedupes nodes, stops at
/// `max_depth`, and records the strongest discovered path product per
/// reached entry.
pub(crate) fn traverse(
    store: &EntryStore,
    start_ids: &[String],
    direction: Direction,
    max_depth: u32,
    type_filter: Option<RelationType>,
) -> MemoryResult<TraversalResult> {
    for id in start_ids {
        if !store.entry_exists(id)? {
            return Err(MemoryError::UnknownEntry(id.clone()));
        }
    }

    let now_ms = crate::engine::now_ms();
    let mut result = TraversalResult::default();
    let mut seen_edges: HashSet<String> = HashSet::new();
    let mut visited: HashSet<String> = start_ids.iter().cloned().collect();
    let mut strengths: HashMap<String, f64> =
        start_ids.iter().map(|id| (id.clone(), 1.0)).collect();

    let mut frontier: Vec<String> = start_ids.to_vec();
    let mut depth = 0;

    while !frontier.is_empty() && depth < max_depth {
        let mut next_frontier: Vec<String> = Vec::new();

        for (rel, next_ids) in step(store, &frontier, direction, now_ms, type_filter)? {
            // The strongest path into any of the edge's own endpoints on
            // this side of the walk.
            let side = match direction {
                Direction::Forward => &rel.sources,
                Direction::Backward => &rel.targets,
                Direction::Both => {
                    if rel.sources.iter().any(|s| frontier.contains(s)) {
                        &rel.sources
                    } else {
                        &rel.targets
                    }
                }
            };
            let incoming = side
                .iter()
                .filter_map(|id| strengths.get(id).copied())
                .fold(0.0_f64, f64::max);
            if incoming == 0.0 {
                continue;
            }

            if seen_edges.insert(rel.id.clone()) {
                result.edges.push(rel.id.clone());
            }

            for id in next_ids {
                let product = incoming * rel.strength;
                let best = strengths.entry(id.clone()).or_insert(0.0);
                if product > *best {
                    *best = product;
                }
                if visited.insert(id.clone()) {
                    result.reached.push(id.clone());
                    next_frontier.push(id);
                }
            }
        }

        frontier = next_frontier;
        depth += 1;
    }

    for id in &result.reached {
        if let Some(&s) = strengths.get(id) {
            result.path_strengths.insert(id.clone(), s);
        }
    }
    Ok(result)
}

/// Enumerate acyclic live paths from `a` to `b` (following source→target),
/// up to `max_depth` hyperedge hops.
pub(crate) fn paths(
    store: &EntryStore,
    a: &str,
    b: &str,
    type_filter: Option<RelationType>,
    max_depth: u32,
) -> MemoryResult<Vec<CausalPath>> {
    for id in [a, b] {
        if !store.entry_exists(id)? {
            return Err(MemoryError::UnknownEntry(id.to_string()));
        }
    }

    let now_ms = crate::engine::now_ms();
    let mut found: Vec<CausalPath> = Vec::new();

    // Iterative DFS over (node path, edge path, strength).
    let mut stack: VecDeque<(Vec<String>, Vec<String>, f64)> = VecDeque::new();
    stack.push_back((vec![a.to_string()], Vec::new(), 1.0));

    while let Some((node_path, edge_path, strength)) = stack.pop_back() {
        if edge_path.len() as u32 >= max_depth {
            continue;
        }
        let current = node_path
            .last()
            .cloned()
            .unwrap_or_else(|| a.to_string());

        for rel in store.relations_from(&[current], now_ms, type_filter)? {
            let hop_strength = strength * rel.strength;
            for target in &rel.targets {
                if node_path.contains(target) {
                    continue;
                }
                let mut nodes = node_path.clone();
                nodes.push(target.clone());
                let mut edges = edge_path.clone();
                edges.push(rel.id.clone());

                if target == b {
                    found.push(CausalPath {
                        nodes,
                        edges,
                        total_strength: hop_strength,
                    });
                } else {
                    stack.push_back((nodes, edges, hop_strength));
                }
            }
        }
    }

    found.sort_by(|x, y| {
        y.total_strength
            .partial_cmp(&x.total_strength)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| x.nodes.len().cmp(&y.nodes.len()))
    });
    Ok(found)
}

/// Remove hyperedges whose expiry has passed. Returns the swept count.
pub(crate) fn cleanup_expired(store: &EntryStore) -> MemoryResult<usize> {
    let swept = store.sweep_expired_relations(crate::engine::now_ms())?;
    if swept > 0 {
        info!("[causal] swept {swept} expired relation(s)");
    }
    Ok(swept)
}
