// ── Vector Index: single-file persistence ──────────────────────────────────
//
// The index serializes to one JSON file: a `type` discriminator, the
// config, entry point, top level, and one record per node. An empty or
// unparseable file is treated as "rebuild from entry rows" by the caller,
// never as a fatal error.

use std::collections::HashMap;
use std::path::Path;

use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::atoms::config::HnswConfig;
use crate::atoms::error::MemoryResult;

use super::hnsw::{Node, VectorIndex};

const FILE_TYPE_HNSW: &str = "hnsw";
const FILE_TYPE_BRUTE: &str = "brute-force";

#[derive(Debug, Serialize, Deserialize)]
struct IndexFile {
    #[serde(rename = "type")]
    file_type: String,
    dims: usize,
    config: HnswConfig,
    entry_point: Option<u64>,
    top_level: usize,
    nodes: Vec<NodeRecord>,
}

#[derive(Debug, Serialize, Deserialize)]
struct NodeRecord {
    label: u64,
    vector: Vec<f32>,
    level: usize,
    #[serde(default)]
    neighbors: Vec<Vec<u64>>,
}

/// Serialize the index to `path`, atomically (write-then-rename).
pub fn save(index: &VectorIndex, path: &Path) -> MemoryResult<()> {
    let degraded = index.is_degraded();
    let mut nodes = Vec::with_capacity(index.vectors().len());
    for (&label, vector) in index.vectors() {
        let (level, neighbors) = if degraded {
            (0, Vec::new())
        } else {
            match index.node(label) {
                Some(n) => (n.level, n.neighbors.clone()),
                None => (0, Vec::new()),
            }
        };
        nodes.push(NodeRecord { label, vector: vector.clone(), level, neighbors });
    }
    nodes.sort_by_key(|n| n.label);

    let file = IndexFile {
        file_type: if degraded { FILE_TYPE_BRUTE } else { FILE_TYPE_HNSW }.into(),
        dims: index.dims(),
        config: index.config().clone(),
        entry_point: if degraded { None } else { index.entry_point() },
        top_level: if degraded { 0 } else { index.top_level() },
        nodes,
    };

    let tmp = path.with_extension("index.tmp");
    std::fs::write(&tmp, serde_json::to_vec(&file)?)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

/// Load the index from `path`. Returns `Ok(None)` when the file is missing,
/// empty, unparseable, or incompatible with the expected dimension — the
/// caller then rebuilds from the entry store.
pub fn load(path: &Path, expected_dims: usize, config: HnswConfig) -> MemoryResult<Option<VectorIndex>> {
    let bytes = match std::fs::read(path) {
        Ok(b) => b,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    if bytes.is_empty() {
        return Ok(None);
    }

    let file: IndexFile = match serde_json::from_slice(&bytes) {
        Ok(f) => f,
        Err(e) => {
            warn!("[vector] index file unparseable ({e}) — will rebuild from entry rows");
            return Ok(None);
        }
    };

    if file.dims != expected_dims {
        warn!(
            "[vector] index file dimension {} does not match configured {} — will rebuild",
            file.dims, expected_dims
        );
        return Ok(None);
    }

    match file.file_type.as_str() {
        FILE_TYPE_HNSW => {
            let mut nodes = HashMap::with_capacity(file.nodes.len());
            let mut vectors = HashMap::with_capacity(file.nodes.len());
            for rec in file.nodes {
                vectors.insert(rec.label, rec.vector);
                nodes.insert(rec.label, Node { level: rec.level, neighbors: rec.neighbors });
            }
            info!("[vector] loaded {} vectors from index file", vectors.len());
            Ok(Some(VectorIndex::restore(
                expected_dims,
                config,
                file.entry_point,
                file.top_level,
                nodes,
                vectors,
                false,
            )))
        }
        FILE_TYPE_BRUTE => {
            // Graph was not persisted; restore the mirror and rebuild.
            let mut vectors = HashMap::with_capacity(file.nodes.len());
            for rec in file.nodes {
                vectors.insert(rec.label, rec.vector);
            }
            info!("[vector] loaded {} vectors from brute-force snapshot — rebuilding graph", vectors.len());
            let mut index = VectorIndex::restore(
                expected_dims,
                config,
                None,
                0,
                HashMap::new(),
                vectors,
                true,
            );
            index.rebuild();
            Ok(Some(index))
        }
        other => {
            warn!("[vector] unknown index file type '{other}' — will rebuild from entry rows");
            Ok(None)
        }
    }
}
