// ── Entry Store: Database Schema ───────────────────────────────────────────
//
// Tables:
//   entries            — one row per stored entry, provenance aggregates cached
//   tags               — (entry_id, tag) pairs, unique per entry
//   provenance_edges   — parent→child DAG edges
//   causal_relations   — hyperedge rows (type, strength, expiry, metadata)
//   causal_sources     — relation→source-entry join
//   causal_targets     — relation→target-entry join
//   pending_embeddings — deferred embedding queue, survives crashes
//   failure_log        — append-only record of exhausted batches / rebuilds
//   meta               — key/value store (monotonic label counter)
//
// All statements are idempotent (CREATE IF NOT EXISTS).

use rusqlite::Connection;

use crate::atoms::error::MemoryResult;

pub(crate) fn run_migrations(conn: &Connection) -> MemoryResult<()> {
    conn.execute_batch(SCHEMA)?;
    Ok(())
}

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS entries (
        id TEXT PRIMARY KEY,
        content TEXT NOT NULL,
        source TEXT NOT NULL DEFAULT 'agent-inference',
        importance REAL NOT NULL DEFAULT 0.5,
        created_at TEXT NOT NULL,
        session_id TEXT,
        agent_id TEXT,
        context_json TEXT NOT NULL DEFAULT '{}',

        -- Vector index addressing. The embedding BLOB (f32 little-endian)
        -- is the durable copy the index file can be rebuilt from.
        label INTEGER NOT NULL UNIQUE,
        pending_embedding INTEGER NOT NULL DEFAULT 1,
        embedding BLOB,

        -- Engine-maintained counters
        tier TEXT NOT NULL DEFAULT 'hot',
        quality REAL NOT NULL DEFAULT 0.0,
        quality_updates INTEGER NOT NULL DEFAULT 0,
        access_count INTEGER NOT NULL DEFAULT 0,
        last_accessed_at TEXT,

        -- Provenance aggregates (cached at insert)
        depth INTEGER NOT NULL DEFAULT 0,
        confidence REAL NOT NULL DEFAULT 1.0,
        relevance REAL NOT NULL DEFAULT 1.0,
        lscore REAL NOT NULL DEFAULT 1.0
    );

    CREATE INDEX IF NOT EXISTS idx_entries_label ON entries(label);
    CREATE INDEX IF NOT EXISTS idx_entries_source ON entries(source);
    CREATE INDEX IF NOT EXISTS idx_entries_session ON entries(session_id);
    CREATE INDEX IF NOT EXISTS idx_entries_agent ON entries(agent_id);
    CREATE INDEX IF NOT EXISTS idx_entries_created ON entries(created_at);

    CREATE TABLE IF NOT EXISTS tags (
        entry_id TEXT NOT NULL,
        tag TEXT NOT NULL,
        PRIMARY KEY (entry_id, tag)
    );

    CREATE INDEX IF NOT EXISTS idx_tags_tag ON tags(tag);

    CREATE TABLE IF NOT EXISTS provenance_edges (
        parent_id TEXT NOT NULL,
        child_id TEXT NOT NULL,
        PRIMARY KEY (parent_id, child_id)
    );

    CREATE INDEX IF NOT EXISTS idx_prov_child ON provenance_edges(child_id);
    CREATE INDEX IF NOT EXISTS idx_prov_parent ON provenance_edges(parent_id);

    CREATE TABLE IF NOT EXISTS causal_relations (
        id TEXT PRIMARY KEY,
        relation_type TEXT NOT NULL,
        strength REAL NOT NULL,
        created_at_ms INTEGER NOT NULL,
        expires_at_ms INTEGER,
        metadata_json TEXT
    );

    CREATE INDEX IF NOT EXISTS idx_causal_expiry ON causal_relations(expires_at_ms);
    CREATE INDEX IF NOT EXISTS idx_causal_type ON causal_relations(relation_type);

    CREATE TABLE IF NOT EXISTS causal_sources (
        relation_id TEXT NOT NULL,
        entry_id TEXT NOT NULL,
        PRIMARY KEY (relation_id, entry_id)
    );

    CREATE INDEX IF NOT EXISTS idx_causal_sources_entry ON causal_sources(entry_id);

    CREATE TABLE IF NOT EXISTS causal_targets (
        relation_id TEXT NOT NULL,
        entry_id TEXT NOT NULL,
        PRIMARY KEY (relation_id, entry_id)
    );

    CREATE INDEX IF NOT EXISTS idx_causal_targets_entry ON causal_targets(entry_id);

    CREATE TABLE IF NOT EXISTS pending_embeddings (
        entry_id TEXT PRIMARY KEY,
        label INTEGER NOT NULL,
        content TEXT NOT NULL,
        enqueued_at_ms INTEGER NOT NULL
    );

    CREATE TABLE IF NOT EXISTS failure_log (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        operation TEXT NOT NULL,
        entry_id TEXT,
        detail TEXT NOT NULL,
        created_at TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS meta (
        key TEXT PRIMARY KEY,
        value TEXT NOT NULL
    );
";
