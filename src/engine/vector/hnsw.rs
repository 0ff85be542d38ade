// ── Vector Index: multi-layer proximity graph ──────────────────────────────
//
// HNSW-style approximate nearest-neighbor search over unit-norm vectors
// with cosine distance. Labels are dense u64 ids assigned by the entry
// store; the index never sees entry ids.
//
// A full label→vector mirror is maintained alongside the graph. If a graph
// operation hits an inconsistency the index flips to a degraded state and
// serves exact brute-force scans from the mirror; the next mutation
// rebuilds the graph before touching it.

use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, HashMap, HashSet};

use log::{info, warn};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::atoms::config::HnswConfig;
use crate::atoms::error::{MemoryError, MemoryResult};

use super::math::{cosine_distance, dot, renormalize};

/// Hard cap on sampled levels.
const MAX_LEVEL: usize = 16;

/// Internal marker for a graph inconsistency (dangling neighbor, missing
/// entry point). Never surfaces to callers — it triggers the fallback path.
#[derive(Debug, Clone, Copy)]
pub(crate) struct GraphBroken;

#[derive(Debug, Clone)]
pub(crate) struct Node {
    pub level: usize,
    /// One adjacency list per layer, index 0 = base layer.
    pub neighbors: Vec<Vec<u64>>,
}

/// Search candidate ordered by distance, ties broken by label so heap
/// behavior is deterministic.
#[derive(Debug, PartialEq)]
struct Candidate {
    dist: f32,
    label: u64,
}

impl Eq for Candidate {}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> Ordering {
        self.dist
            .partial_cmp(&other.dist)
            .unwrap_or(Ordering::Equal)
            .then_with(|| self.label.cmp(&other.label))
    }
}

pub struct VectorIndex {
    dims: usize,
    config: HnswConfig,
    entry_point: Option<u64>,
    top_level: usize,
    nodes: HashMap<u64, Node>,
    /// Complete label→vector mirror; the brute-force path reads only this.
    vectors: HashMap<u64, Vec<f32>>,
    rng: StdRng,
    /// Level-sampling factor 1/ln(M).
    m_l: f64,
    degraded: bool,
}

impl VectorIndex {
    pub fn new(dims: usize, config: HnswConfig) -> Self {
        let m_l = 1.0 / (config.m.max(2) as f64).ln();
        let rng = StdRng::seed_from_u64(config.seed);
        Self {
            dims,
            config,
            entry_point: None,
            top_level: 0,
            nodes: HashMap::new(),
            vectors: HashMap::new(),
            rng,
            m_l,
            degraded: false,
        }
    }

    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }

    pub fn contains(&self, label: u64) -> bool {
        self.vectors.contains_key(&label)
    }

    pub fn dims(&self) -> usize {
        self.dims
    }

    /// Every label currently held in the mirror.
    pub fn labels(&self) -> Vec<u64> {
        self.vectors.keys().copied().collect()
    }

    pub(crate) fn is_degraded(&self) -> bool {
        self.degraded
    }

    // ── Insertion ──────────────────────────────────────────────────────

    /// Insert a vector under `label`. The vector is renormalized to unit
    /// length; re-adding an existing label replaces its vector.
    pub fn add(&mut self, label: u64, mut vector: Vec<f32>) -> MemoryResult<()> {
        if vector.len() != self.dims {
            return Err(MemoryError::Dimension { expected: self.dims, got: vector.len() });
        }
        if renormalize(&mut vector).is_none() {
            return Err(MemoryError::InvalidArgument(
                "zero vector cannot be indexed".into(),
            ));
        }
        if !self.vectors.contains_key(&label) && self.vectors.len() >= self.config.max_elements {
            return Err(MemoryError::IndexFull { capacity: self.config.max_elements });
        }

        if self.vectors.contains_key(&label) {
            self.remove(label);
        }
        self.vectors.insert(label, vector.clone());

        // A mutation while degraded rebuilds the hot path first; the rebuild
        // re-inserts every mirrored vector including this one.
        if self.degraded {
            self.rebuild();
            return Ok(());
        }

        if self.graph_insert(label, &vector).is_err() {
            warn!("[vector] graph insert failed for label {label} — falling back to brute-force scans");
            self.degraded = true;
        }
        Ok(())
    }

    fn graph_insert(&mut self, label: u64, vector: &[f32]) -> Result<(), GraphBroken> {
        let level = self.sample_level();
        self.nodes.insert(
            label,
            Node { level, neighbors: vec![Vec::new(); level + 1] },
        );

        let Some(ep) = self.entry_point else {
            self.entry_point = Some(label);
            self.top_level = level;
            return Ok(());
        };

        // Greedy descent through the layers above the new node's level,
        // keeping the single closest node.
        let mut current = ep;
        let mut layer = self.top_level;
        while layer > level {
            current = self.greedy_closest(vector, current, layer)?;
            layer -= 1;
        }

        // Beam search + bidirectional linking from min(level, top) down to 0.
        let mut entry_points = vec![current];
        for layer in (0..=level.min(self.top_level)).rev() {
            let candidates =
                self.search_layer(vector, &entry_points, self.config.ef_construction, layer)?;
            let selected: Vec<u64> =
                candidates.iter().take(self.config.m).map(|c| c.label).collect();

            for &n in &selected {
                self.nodes
                    .get_mut(&label)
                    .ok_or(GraphBroken)?
                    .neighbors[layer]
                    .push(n);
                let neighbor = self.nodes.get_mut(&n).ok_or(GraphBroken)?;
                if let Some(list) = neighbor.neighbors.get_mut(layer) {
                    list.push(label);
                }
            }
            for &n in &selected {
                let count = self
                    .nodes
                    .get(&n)
                    .ok_or(GraphBroken)?
                    .neighbors
                    .get(layer)
                    .map_or(0, Vec::len);
                if count > 2 * self.config.m {
                    self.prune(n, layer)?;
                }
            }

            if !candidates.is_empty() {
                entry_points = candidates.iter().map(|c| c.label).collect();
            }
        }

        if level > self.top_level {
            self.top_level = level;
            self.entry_point = Some(label);
        }
        Ok(())
    }

    /// Sample a node level from the exponential distribution with factor
    /// m_L = 1/ln(M), clamped to MAX_LEVEL.
    fn sample_level(&mut self) -> usize {
        let u: f64 = self.rng.gen::<f64>();
        let u = u.max(f64::MIN_POSITIVE);
        ((-u.ln() * self.m_l).floor() as usize).min(MAX_LEVEL)
    }

    /// Trim an overfull adjacency list back to the M closest neighbors.
    fn prune(&mut self, label: u64, layer: usize) -> Result<(), GraphBroken> {
        let vector = self.vectors.get(&label).ok_or(GraphBroken)?.clone();
        let list = self
            .nodes
            .get(&label)
            .ok_or(GraphBroken)?
            .neighbors
            .get(layer)
            .ok_or(GraphBroken)?
            .clone();

        let mut scored: Vec<(f32, u64)> = Vec::with_capacity(list.len());
        for n in list {
            let v = self.vectors.get(&n).ok_or(GraphBroken)?;
            scored.push((cosine_distance(&vector, v), n));
        }
        scored.sort_by(|a, b| {
            a.0.partial_cmp(&b.0)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.1.cmp(&b.1))
        });
        scored.truncate(self.config.m);

        self.nodes.get_mut(&label).ok_or(GraphBroken)?.neighbors[layer] =
            scored.into_iter().map(|(_, n)| n).collect();
        Ok(())
    }

    // ── Search ─────────────────────────────────────────────────────────

    /// Return up to `k` labels with similarity = 1 − cosine distance,
    /// closest first. A zero query vector yields no results.
    pub fn search(&mut self, query: &[f32], k: usize) -> MemoryResult<Vec<(u64, f32)>> {
        if query.len() != self.dims {
            return Err(MemoryError::Dimension { expected: self.dims, got: query.len() });
        }
        let mut q = query.to_vec();
        if renormalize(&mut q).is_none() {
            return Ok(Vec::new());
        }
        if self.vectors.is_empty() || k == 0 {
            return Ok(Vec::new());
        }

        if !self.degraded {
            match self.graph_search(&q, k) {
                Ok(hits) => return Ok(hits),
                Err(GraphBroken) => {
                    warn!("[vector] graph search hit an inconsistency — serving brute-force results");
                    self.degraded = true;
                }
            }
        }
        Ok(self.brute_force(&q, k))
    }

    fn graph_search(&self, q: &[f32], k: usize) -> Result<Vec<(u64, f32)>, GraphBroken> {
        let ep = self.entry_point.ok_or(GraphBroken)?;
        let mut current = ep;
        for layer in (1..=self.top_level).rev() {
            current = self.greedy_closest(q, current, layer)?;
        }
        let ef = self.config.ef_search.max(k);
        let found = self.search_layer(q, &[current], ef, 0)?;
        Ok(found
            .into_iter()
            .take(k)
            .map(|c| (c.label, 1.0 - c.dist))
            .collect())
    }

    /// Exact scan over the mirror. O(n), always complete.
    fn brute_force(&self, q: &[f32], k: usize) -> Vec<(u64, f32)> {
        let mut scored: Vec<(u64, f32)> =
            self.vectors.iter().map(|(&l, v)| (l, dot(q, v))).collect();
        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        scored.truncate(k);
        scored
    }

    /// Greedy hill-climb on one layer, keeping the single closest node.
    fn greedy_closest(&self, q: &[f32], start: u64, layer: usize) -> Result<u64, GraphBroken> {
        let mut current = start;
        let mut current_dist =
            cosine_distance(q, self.vectors.get(&current).ok_or(GraphBroken)?);
        loop {
            let node = self.nodes.get(&current).ok_or(GraphBroken)?;
            let mut improved = false;
            for &n in node.neighbors.get(layer).into_iter().flatten() {
                let v = self.vectors.get(&n).ok_or(GraphBroken)?;
                let d = cosine_distance(q, v);
                if d < current_dist {
                    current = n;
                    current_dist = d;
                    improved = true;
                }
            }
            if !improved {
                return Ok(current);
            }
        }
    }

    /// Best-first beam search on one layer. Returns up to `ef` candidates
    /// sorted ascending by distance. Terminates when the closest unexplored
    /// candidate is worse than the worst kept result.
    fn search_layer(
        &self,
        q: &[f32],
        entry_points: &[u64],
        ef: usize,
        layer: usize,
    ) -> Result<Vec<Candidate>, GraphBroken> {
        let ef = ef.max(1);
        let mut visited: HashSet<u64> = HashSet::new();
        let mut frontier: BinaryHeap<Reverse<Candidate>> = BinaryHeap::new();
        let mut results: BinaryHeap<Candidate> = BinaryHeap::new();

        for &ep in entry_points {
            if visited.insert(ep) {
                let d = cosine_distance(q, self.vectors.get(&ep).ok_or(GraphBroken)?);
                frontier.push(Reverse(Candidate { dist: d, label: ep }));
                results.push(Candidate { dist: d, label: ep });
                if results.len() > ef {
                    results.pop();
                }
            }
        }

        while let Some(Reverse(closest)) = frontier.pop() {
            let worst = results.peek().map_or(f32::INFINITY, |c| c.dist);
            if results.len() >= ef && closest.dist > worst {
                break;
            }
            let node = self.nodes.get(&closest.label).ok_or(GraphBroken)?;
            for &n in node.neighbors.get(layer).into_iter().flatten() {
                if !visited.insert(n) {
                    continue;
                }
                let d = cosine_distance(q, self.vectors.get(&n).ok_or(GraphBroken)?);
                let worst = results.peek().map_or(f32::INFINITY, |c| c.dist);
                if results.len() < ef || d < worst {
                    frontier.push(Reverse(Candidate { dist: d, label: n }));
                    results.push(Candidate { dist: d, label: n });
                    if results.len() > ef {
                        results.pop();
                    }
                }
            }
        }

        Ok(results.into_sorted_vec())
    }

    // ── Deletion ───────────────────────────────────────────────────────

    /// Remove `label` and scrub it from every adjacency list. Picks a new
    /// entry point when the current one is removed. Returns whether the
    /// label was present.
    pub fn remove(&mut self, label: u64) -> bool {
        let present = self.vectors.remove(&label).is_some();
        self.nodes.remove(&label);
        if !present {
            return false;
        }

        for node in self.nodes.values_mut() {
            for list in node.neighbors.iter_mut() {
                list.retain(|&n| n != label);
            }
        }

        if self.entry_point == Some(label) {
            // Highest remaining level wins; ties go to the smallest label.
            let mut best: Option<(u64, usize)> = None;
            for (&l, node) in &self.nodes {
                match best {
                    None => best = Some((l, node.level)),
                    Some((bl, blevel)) => {
                        if node.level > blevel || (node.level == blevel && l < bl) {
                            best = Some((l, node.level));
                        }
                    }
                }
            }
            self.entry_point = best.map(|(l, _)| l);
            self.top_level = best.map_or(0, |(_, level)| level);
        }
        true
    }

    // ── Rebuild ────────────────────────────────────────────────────────

    /// Rebuild the graph from the mirror. Clears the degraded flag unless
    /// the rebuild itself fails (which leaves brute-force serving intact).
    pub(crate) fn rebuild(&mut self) {
        info!("[vector] rebuilding proximity graph over {} vectors", self.vectors.len());
        self.nodes.clear();
        self.entry_point = None;
        self.top_level = 0;
        self.degraded = false;

        let mut labels: Vec<u64> = self.vectors.keys().copied().collect();
        labels.sort_unstable();
        for label in labels {
            let Some(vector) = self.vectors.get(&label).cloned() else { continue };
            if self.graph_insert(label, &vector).is_err() {
                warn!("[vector] rebuild failed at label {label} — staying on brute-force scans");
                self.degraded = true;
                return;
            }
        }
    }

    // ── Persistence plumbing (used by persist.rs) ──────────────────────

    pub(crate) fn config(&self) -> &HnswConfig {
        &self.config
    }

    pub(crate) fn entry_point(&self) -> Option<u64> {
        self.entry_point
    }

    pub(crate) fn top_level(&self) -> usize {
        self.top_level
    }

    pub(crate) fn node(&self, label: u64) -> Option<&Node> {
        self.nodes.get(&label)
    }

    pub(crate) fn vectors(&self) -> &HashMap<u64, Vec<f32>> {
        &self.vectors
    }

    /// Restore internal state verbatim from a persisted snapshot.
    pub(crate) fn restore(
        dims: usize,
        config: HnswConfig,
        entry_point: Option<u64>,
        top_level: usize,
        nodes: HashMap<u64, Node>,
        vectors: HashMap<u64, Vec<f32>>,
        degraded: bool,
    ) -> Self {
        let m_l = 1.0 / (config.m.max(2) as f64).ln();
        let rng = StdRng::seed_from_u64(config.seed);
        Self { dims, config, entry_point, top_level, nodes, vectors, rng, m_l, degraded }
    }
}

// ═════════════════════════════════════════════════════════════════════════
// Tests
// ═════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;

    fn small_config() -> HnswConfig {
        HnswConfig { m: 8, ef_construction: 64, ef_search: 32, max_elements: 10_000, seed: 7 }
    }

    fn unit(v: Vec<f32>) -> Vec<f32> {
        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        v.into_iter().map(|x| x / norm).collect()
    }

    /// Deterministic pseudo-random unit vector.
    fn pseudo_vector(dims: usize, seed: u64) -> Vec<f32> {
        let mut state = seed.wrapping_mul(0x9E37_79B9_7F4A_7C15).wrapping_add(1);
        let mut v = Vec::with_capacity(dims);
        for _ in 0..dims {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            v.push((state >> 11) as f32 / (1u64 << 53) as f32 - 0.5);
        }
        unit(v)
    }

    #[test]
    fn rejects_wrong_dimension() {
        let mut idx = VectorIndex::new(4, small_config());
        let err = idx.add(1, vec![1.0, 0.0]).unwrap_err();
        assert!(matches!(err, MemoryError::Dimension { expected: 4, got: 2 }));
    }

    #[test]
    fn rejects_zero_vector() {
        let mut idx = VectorIndex::new(4, small_config());
        assert!(idx.add(1, vec![0.0; 4]).is_err());
    }

    #[test]
    fn enforces_capacity() {
        let mut cfg = small_config();
        cfg.max_elements = 2;
        let mut idx = VectorIndex::new(3, cfg);
        idx.add(1, vec![1.0, 0.0, 0.0]).unwrap();
        idx.add(2, vec![0.0, 1.0, 0.0]).unwrap();
        let err = idx.add(3, vec![0.0, 0.0, 1.0]).unwrap_err();
        assert!(matches!(err, MemoryError::IndexFull { capacity: 2 }));
    }

    #[test]
    fn exact_match_is_top_hit() {
        let mut idx = VectorIndex::new(16, small_config());
        for i in 0..200u64 {
            idx.add(i, pseudo_vector(16, i + 1)).unwrap();
        }
        let probe = pseudo_vector(16, 42 + 1);
        let hits = idx.search(&probe, 1).unwrap();
        assert_eq!(hits[0].0, 42);
        assert!(hits[0].1 > 0.999);
    }

    #[test]
    fn search_returns_at_most_k() {
        let mut idx = VectorIndex::new(8, small_config());
        for i in 0..50u64 {
            idx.add(i, pseudo_vector(8, i + 1)).unwrap();
        }
        assert_eq!(idx.search(&pseudo_vector(8, 3), 5).unwrap().len(), 5);
    }

    #[test]
    fn recall_against_brute_force() {
        let cfg = HnswConfig { m: 12, ef_construction: 128, ef_search: 64, max_elements: 10_000, seed: 7 };
        let mut idx = VectorIndex::new(24, cfg);
        let n = 2_000u64;
        for i in 0..n {
            idx.add(i, pseudo_vector(24, i + 1)).unwrap();
        }
        let mut agree = 0usize;
        let queries = 100u64;
        for qi in 0..queries {
            let q = pseudo_vector(24, 1_000_000 + qi);
            let graph_top = idx.search(&q, 1).unwrap()[0].0;
            let brute_top = idx.brute_force(&q, 1)[0].0;
            if graph_top == brute_top {
                agree += 1;
            }
        }
        assert!(agree >= 95, "top-1 agreement too low: {agree}/{queries}");
    }

    #[test]
    fn delete_scrubs_adjacency_and_repicks_entry_point() {
        let mut idx = VectorIndex::new(8, small_config());
        for i in 0..30u64 {
            idx.add(i, pseudo_vector(8, i + 1)).unwrap();
        }
        let ep = idx.entry_point().unwrap();
        assert!(idx.remove(ep));
        assert!(idx.entry_point().is_some());
        assert_ne!(idx.entry_point(), Some(ep));
        for (&l, node) in &idx.nodes {
            assert_ne!(l, ep);
            for list in &node.neighbors {
                assert!(!list.contains(&ep), "dangling edge to removed label");
            }
        }
        // Searches still work after the removal.
        let hits = idx.search(&pseudo_vector(8, 5), 3).unwrap();
        assert_eq!(hits.len(), 3);
    }

    #[test]
    fn removing_last_node_empties_index() {
        let mut idx = VectorIndex::new(4, small_config());
        idx.add(9, vec![1.0, 0.0, 0.0, 0.0]).unwrap();
        assert!(idx.remove(9));
        assert!(idx.is_empty());
        assert_eq!(idx.entry_point(), None);
        assert!(idx.search(&[1.0, 0.0, 0.0, 0.0], 3).unwrap().is_empty());
    }

    #[test]
    fn readd_replaces_vector() {
        let mut idx = VectorIndex::new(3, small_config());
        idx.add(1, vec![1.0, 0.0, 0.0]).unwrap();
        idx.add(1, vec![0.0, 1.0, 0.0]).unwrap();
        assert_eq!(idx.len(), 1);
        let hits = idx.search(&[0.0, 1.0, 0.0], 1).unwrap();
        assert!(hits[0].1 > 0.999);
    }

    #[test]
    fn degraded_mode_serves_complete_results_and_rebuilds() {
        let mut idx = VectorIndex::new(8, small_config());
        for i in 0..40u64 {
            idx.add(i, pseudo_vector(8, i + 1)).unwrap();
        }
        idx.degraded = true;
        let hits = idx.search(&pseudo_vector(8, 12 + 1), 1).unwrap();
        assert_eq!(hits[0].0, 12);

        // The next mutation must rebuild the hot path.
        idx.add(100, pseudo_vector(8, 500)).unwrap();
        assert!(!idx.is_degraded());
        let hits = idx.search(&pseudo_vector(8, 500), 1).unwrap();
        assert_eq!(hits[0].0, 100);
    }

    #[test]
    fn renormalizes_non_unit_input() {
        let mut idx = VectorIndex::new(3, small_config());
        idx.add(1, vec![10.0, 0.0, 0.0]).unwrap();
        let stored = idx.vectors().get(&1).unwrap();
        let norm: f32 = stored.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }
}
