// ── Atoms: Core Types ──────────────────────────────────────────────────────
// Pure data types for the memory engine (no logic, no DB access, no I/O).
//
// Follows the project pattern: structs in atoms/, impls in engine/.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::atoms::error::{MemoryError, MemoryResult};

// ═══════════════════════════════════════════════════════════════════════════
// SECTION 1: Entries
// ═══════════════════════════════════════════════════════════════════════════

/// Where an entry came from. Closed set — unknown strings are rejected at
/// the API boundary rather than stored verbatim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EntrySource {
    UserInput,
    AgentInference,
    ToolOutput,
    System,
    External,
}

impl EntrySource {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntrySource::UserInput => "user-input",
            EntrySource::AgentInference => "agent-inference",
            EntrySource::ToolOutput => "tool-output",
            EntrySource::System => "system",
            EntrySource::External => "external",
        }
    }

    pub fn parse(s: &str) -> MemoryResult<Self> {
        match s {
            "user-input" => Ok(EntrySource::UserInput),
            "agent-inference" => Ok(EntrySource::AgentInference),
            "tool-output" => Ok(EntrySource::ToolOutput),
            "system" => Ok(EntrySource::System),
            "external" => Ok(EntrySource::External),
            other => Err(MemoryError::InvalidArgument(format!("unknown source: {other}"))),
        }
    }
}

impl Default for EntrySource {
    fn default() -> Self {
        EntrySource::AgentInference
    }
}

/// Compression tier — how aggressively the entry's content may be compacted
/// by external maintenance. The engine only ever updates the tier marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionTier {
    Hot,
    Warm,
    Cool,
    Cold,
    Frozen,
}

impl CompressionTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            CompressionTier::Hot => "hot",
            CompressionTier::Warm => "warm",
            CompressionTier::Cool => "cool",
            CompressionTier::Cold => "cold",
            CompressionTier::Frozen => "frozen",
        }
    }

    pub fn parse(s: &str) -> MemoryResult<Self> {
        match s {
            "hot" => Ok(CompressionTier::Hot),
            "warm" => Ok(CompressionTier::Warm),
            "cool" => Ok(CompressionTier::Cool),
            "cold" => Ok(CompressionTier::Cold),
            "frozen" => Ok(CompressionTier::Frozen),
            other => Err(MemoryError::InvalidArgument(format!("unknown tier: {other}"))),
        }
    }
}

impl Default for CompressionTier {
    fn default() -> Self {
        CompressionTier::Hot
    }
}

/// A stored entry. Content is immutable once created; counters, tier, and
/// quality are updated by engine-internal operations only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entry {
    /// Globally unique opaque id (UUID v4 at creation).
    pub id: String,
    /// Raw text content.
    pub content: String,
    pub source: EntrySource,
    /// Importance in [0,1].
    pub importance: f64,
    /// RFC 3339 UTC creation timestamp.
    pub created_at: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    /// Free-form key→value context.
    #[serde(default)]
    pub context: HashMap<String, String>,
    /// Tag set; keys unique, order irrelevant.
    #[serde(default)]
    pub tags: Vec<String>,
    /// Dense integer label naming this entry inside the vector index.
    /// Monotonically allocated, never reused within a data directory.
    pub label: u64,
    /// True until the deferred embedding pipeline has flushed this entry
    /// into the vector index.
    pub pending_embedding: bool,
    pub tier: CompressionTier,
    /// Learning-quality running mean and its update count.
    pub quality: f64,
    pub quality_updates: u64,
    pub access_count: u64,
    // ── Provenance aggregates (cached at insert) ──
    /// Longest path from any root (0 for roots).
    pub depth: u32,
    /// Confidence in [0,1].
    pub confidence: f64,
    /// Relevance in [0,1].
    pub relevance: f64,
    /// Derived L-Score, see the provenance module.
    pub lscore: f64,
}

/// Options accepted by `MemoryEngine::store`.
#[derive(Debug, Clone, Default)]
pub struct StoreOptions {
    pub tags: Vec<String>,
    pub source: EntrySource,
    /// Importance in [0,1]; clamped at the boundary.
    pub importance: f64,
    /// Parent entry ids; each must exist.
    pub parents: Vec<String>,
    pub confidence: f64,
    pub relevance: f64,
    pub session_id: Option<String>,
    pub agent_id: Option<String>,
    pub context: HashMap<String, String>,
}

impl StoreOptions {
    pub fn new() -> Self {
        Self {
            importance: 0.5,
            confidence: 1.0,
            relevance: 1.0,
            ..Default::default()
        }
    }
}

/// What `store` returns: the committed entry plus a back-pressure hint.
#[derive(Debug, Clone)]
pub struct StoreReceipt {
    pub entry: Entry,
    /// Set when the pending-embedding backlog exceeded the configured soft
    /// cap at store time. The store itself never blocks on queue depth.
    pub backlog_warning: Option<String>,
}

// ═══════════════════════════════════════════════════════════════════════════
// SECTION 2: Filters & Queries
// ═══════════════════════════════════════════════════════════════════════════

/// Tag match mode for composite filters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TagMode {
    Any,
    All,
}

impl Default for TagMode {
    fn default() -> Self {
        TagMode::Any
    }
}

/// Composite metadata filter bundle, applied by the entry store and the
/// query planner.
#[derive(Debug, Clone, Default)]
pub struct EntryFilters {
    pub sources: Vec<EntrySource>,
    pub tags: Vec<String>,
    pub tag_mode: TagMode,
    /// Inclusive RFC 3339 bounds.
    pub created_after: Option<String>,
    pub created_before: Option<String>,
    pub min_importance: Option<f64>,
    pub session_id: Option<String>,
    pub agent_id: Option<String>,
}

impl EntryFilters {
    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
            && self.tags.is_empty()
            && self.created_after.is_none()
            && self.created_before.is_none()
            && self.min_importance.is_none()
            && self.session_id.is_none()
            && self.agent_id.is_none()
    }
}

/// Options accepted by `MemoryEngine::query` and `shadow_query`.
#[derive(Debug, Clone)]
pub struct QueryOptions {
    pub top_k: usize,
    /// Minimum composite score; defaults to the configured floor when None.
    pub min_score: Option<f64>,
    pub filters: EntryFilters,
    pub include_provenance: bool,
    /// Lineage depth cap when `include_provenance` is set; defaults to the
    /// configured trace depth.
    pub trace_depth: Option<u32>,
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self {
            top_k: 10,
            min_score: None,
            filters: EntryFilters::default(),
            include_provenance: false,
            trace_depth: None,
        }
    }
}

/// How a query result was matched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MatchType {
    /// Vector similarity dominated the composite score.
    Vector,
    /// Only a symbolic (tag/provenance) path contributed.
    Pattern,
    /// Both vector and provenance contributed materially.
    Hybrid,
    /// Tag-scan augmentation for entries with no embedding yet.
    TagOnly,
}

/// One ranked query result.
#[derive(Debug, Clone)]
pub struct QueryHit {
    pub entry: Entry,
    /// Cosine similarity in [0,1]; 0 for tag-only hits.
    pub similarity: f64,
    /// α·similarity + β·L-Score.
    pub score: f64,
    pub match_type: MatchType,
    /// Lineage tree, attached when `include_provenance` was requested.
    pub lineage: Option<LineageNode>,
}

/// Shadow-query outcome: contradicting entries plus a credibility estimate
/// for the probed claim.
#[derive(Debug, Clone)]
pub struct ShadowReport {
    /// 1 − max refutation strength, clamped to [0,1].
    pub credibility: f64,
    pub contradictions: Vec<QueryHit>,
}

// ═══════════════════════════════════════════════════════════════════════════
// SECTION 3: Provenance
// ═══════════════════════════════════════════════════════════════════════════

/// One node of a lineage tree returned by `trace`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LineageNode {
    pub id: String,
    pub content: String,
    pub depth: u32,
    pub confidence: f64,
    pub relevance: f64,
    pub lscore: f64,
    /// Parents, recursively, capped at the trace depth.
    pub parents: Vec<LineageNode>,
}

// ═══════════════════════════════════════════════════════════════════════════
// SECTION 4: Causal Hypergraph
// ═══════════════════════════════════════════════════════════════════════════

/// Typed relation between sets of entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RelationType {
    Causes,
    Enables,
    Prevents,
    Correlates,
    Precedes,
    Triggers,
}

impl RelationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RelationType::Causes => "causes",
            RelationType::Enables => "enables",
            RelationType::Prevents => "prevents",
            RelationType::Correlates => "correlates",
            RelationType::Precedes => "precedes",
            RelationType::Triggers => "triggers",
        }
    }

    pub fn parse(s: &str) -> MemoryResult<Self> {
        match s {
            "causes" => Ok(RelationType::Causes),
            "enables" => Ok(RelationType::Enables),
            "prevents" => Ok(RelationType::Prevents),
            "correlates" => Ok(RelationType::Correlates),
            "precedes" => Ok(RelationType::Precedes),
            "triggers" => Ok(RelationType::Triggers),
            other => Err(MemoryError::InvalidArgument(format!("unknown relation type: {other}"))),
        }
    }
}

/// A causal hyperedge: many sources, many targets, strength, optional TTL.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CausalRelation {
    pub id: String,
    pub relation_type: RelationType,
    pub sources: Vec<String>,
    pub targets: Vec<String>,
    /// Strength in [0,1].
    pub strength: f64,
    /// Millisecond epoch.
    pub created_at_ms: i64,
    /// Millisecond epoch; None = never expires.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at_ms: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

impl CausalRelation {
    /// Live iff expiry is unset or strictly in the future.
    pub fn is_live(&self, now_ms: i64) -> bool {
        self.expires_at_ms.map_or(true, |exp| exp > now_ms)
    }
}

/// Traversal direction through hyperedges.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Forward,
    Backward,
    Both,
}

/// Result of a breadth-first causal traversal.
#[derive(Debug, Clone, Default)]
pub struct TraversalResult {
    /// Entry ids reached (start nodes excluded), deduplicated.
    pub reached: Vec<String>,
    /// Ids of hyperedges traversed, in visit order.
    pub edges: Vec<String>,
    /// Per reached entry: product of edge strengths along the discovery path.
    pub path_strengths: HashMap<String, f64>,
}

/// One acyclic path between two entries.
#[derive(Debug, Clone)]
pub struct CausalPath {
    /// Entry ids from start to end, inclusive.
    pub nodes: Vec<String>,
    /// Hyperedge ids in order.
    pub edges: Vec<String>,
    /// Product of edge strengths.
    pub total_strength: f64,
}

// ═══════════════════════════════════════════════════════════════════════════
// SECTION 5: Statistics & Observability
// ═══════════════════════════════════════════════════════════════════════════

/// Engine-wide statistics snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineStats {
    pub entries: usize,
    pub tags: usize,
    pub provenance_edges: usize,
    pub causal_relations: usize,
    pub live_causal_relations: usize,
    pub indexed_vectors: usize,
    pub pending_embeddings: usize,
    pub per_source: Vec<(String, usize)>,
    /// Most frequent tags, descending.
    pub top_tags: Vec<(String, usize)>,
}

/// Embedding-queue back-pressure signal.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PendingStats {
    pub pending_count: usize,
    /// Age of the oldest pending record, milliseconds. None when empty.
    pub oldest_pending_age_ms: Option<i64>,
}

/// A failure-log row (exhausted embedding batches, index rebuilds…).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailureRecord {
    pub operation: String,
    pub entry_id: Option<String>,
    pub detail: String,
    pub created_at: String,
}
