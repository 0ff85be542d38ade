// ── Entry Store: entry CRUD, filters, label allocation ─────────────────────

use rusqlite::{params, Connection, OptionalExtension};

use crate::atoms::error::{MemoryError, MemoryResult};
use crate::atoms::types::{CompressionTier, Entry, EntryFilters, EntrySource, TagMode};
use crate::engine::vector::math::{bytes_to_f32_vec, f32_vec_to_bytes};

use super::EntryStore;

impl Entry {
    /// Map a full entries row (see SELECT_COLUMNS) to an Entry. Tags are
    /// loaded separately.
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        let source: String = row.get(2)?;
        let context_json: String = row.get(7)?;
        let tier: String = row.get(10)?;
        Ok(Entry {
            id: row.get(0)?,
            content: row.get(1)?,
            source: EntrySource::parse(&source).unwrap_or_default(),
            importance: row.get(3)?,
            created_at: row.get(4)?,
            session_id: row.get(5)?,
            agent_id: row.get(6)?,
            context: serde_json::from_str(&context_json).unwrap_or_default(),
            label: row.get::<_, i64>(8)? as u64,
            pending_embedding: row.get::<_, i64>(9)? != 0,
            tier: CompressionTier::parse(&tier).unwrap_or_default(),
            quality: row.get(11)?,
            quality_updates: row.get::<_, i64>(12)? as u64,
            access_count: row.get::<_, i64>(13)? as u64,
            depth: row.get::<_, i64>(14)? as u32,
            confidence: row.get(15)?,
            relevance: row.get(16)?,
            lscore: row.get(17)?,
            tags: Vec::new(),
        })
    }
}

const SELECT_COLUMNS: &str = "id, content, source, importance, created_at, session_id, \
     agent_id, context_json, label, pending_embedding, tier, quality, quality_updates, \
     access_count, depth, confidence, relevance, lscore";

fn load_tags(conn: &Connection, entry_id: &str) -> MemoryResult<Vec<String>> {
    let mut stmt = conn.prepare("SELECT tag FROM tags WHERE entry_id = ?1 ORDER BY tag")?;
    let tags = stmt
        .query_map(params![entry_id], |row| row.get::<_, String>(0))?
        .filter_map(|r| r.ok())
        .collect();
    Ok(tags)
}

impl EntryStore {
    // ── Insert ─────────────────────────────────────────────────────────

    /// Write the entry row, its tags, its provenance edges, and its
    /// pending-embedding record in one transaction. Allocates and returns
    /// the entry's label. Parents must already exist.
    pub fn insert_entry(&self, entry: &Entry, parents: &[String]) -> MemoryResult<u64> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;

        for parent in parents {
            let known: bool = tx.query_row(
                "SELECT COUNT(*) > 0 FROM entries WHERE id = ?1",
                params![parent],
                |r| r.get(0),
            )?;
            if !known {
                return Err(MemoryError::UnknownParent(parent.clone()));
            }
        }

        // Monotonic label allocation, persisted with the same transaction.
        let next: i64 = tx
            .query_row(
                "SELECT value FROM meta WHERE key = 'next_label'",
                [],
                |r| r.get::<_, String>(0),
            )
            .optional()?
            .and_then(|v| v.parse().ok())
            .unwrap_or(0);
        tx.execute(
            "INSERT INTO meta (key, value) VALUES ('next_label', ?1)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![(next + 1).to_string()],
        )?;
        let label = next as u64;

        let context_json = serde_json::to_string(&entry.context)?;
        tx.execute(
            "INSERT INTO entries (id, content, source, importance, created_at, session_id,
                 agent_id, context_json, label, pending_embedding, tier, quality,
                 quality_updates, access_count, depth, confidence, relevance, lscore)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, 1, ?10, 0.0, 0, 0, ?11, ?12, ?13, ?14)",
            params![
                entry.id,
                entry.content,
                entry.source.as_str(),
                entry.importance,
                entry.created_at,
                entry.session_id,
                entry.agent_id,
                context_json,
                label as i64,
                entry.tier.as_str(),
                entry.depth as i64,
                entry.confidence,
                entry.relevance,
                entry.lscore,
            ],
        )?;

        for tag in &entry.tags {
            tx.execute(
                "INSERT OR IGNORE INTO tags (entry_id, tag) VALUES (?1, ?2)",
                params![entry.id, tag],
            )?;
        }

        for parent in parents {
            tx.execute(
                "INSERT OR IGNORE INTO provenance_edges (parent_id, child_id) VALUES (?1, ?2)",
                params![parent, entry.id],
            )?;
        }

        tx.execute(
            "INSERT INTO pending_embeddings (entry_id, label, content, enqueued_at_ms)
             VALUES (?1, ?2, ?3, ?4)",
            params![entry.id, label as i64, entry.content, crate::engine::now_ms()],
        )?;

        tx.commit()?;
        Ok(label)
    }

    // ── Lookup ─────────────────────────────────────────────────────────

    pub fn get_entry(&self, id: &str) -> MemoryResult<Option<Entry>> {
        let conn = self.lock();
        let row = conn
            .query_row(
                &format!("SELECT {SELECT_COLUMNS} FROM entries WHERE id = ?1"),
                params![id],
                Entry::from_row,
            )
            .optional()?;
        match row {
            Some(mut entry) => {
                entry.tags = load_tags(&conn, &entry.id)?;
                Ok(Some(entry))
            }
            None => Ok(None),
        }
    }

    pub fn entry_by_label(&self, label: u64) -> MemoryResult<Option<Entry>> {
        let conn = self.lock();
        let row = conn
            .query_row(
                &format!("SELECT {SELECT_COLUMNS} FROM entries WHERE label = ?1"),
                params![label as i64],
                Entry::from_row,
            )
            .optional()?;
        match row {
            Some(mut entry) => {
                entry.tags = load_tags(&conn, &entry.id)?;
                Ok(Some(entry))
            }
            None => Ok(None),
        }
    }

    pub fn entry_exists(&self, id: &str) -> MemoryResult<bool> {
        let conn = self.lock();
        let known: bool = conn.query_row(
            "SELECT COUNT(*) > 0 FROM entries WHERE id = ?1",
            params![id],
            |r| r.get(0),
        )?;
        Ok(known)
    }

    // ── Delete (cascading, idempotent) ─────────────────────────────────

    /// Remove the entry and every dependent row. Returns the entry's label
    /// when it existed, so the caller can evict the vector.
    pub fn delete_entry(&self, id: &str) -> MemoryResult<Option<u64>> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;

        let label: Option<i64> = tx
            .query_row("SELECT label FROM entries WHERE id = ?1", params![id], |r| r.get(0))
            .optional()?;
        let Some(label) = label else {
            return Ok(None);
        };

        tx.execute("DELETE FROM tags WHERE entry_id = ?1", params![id])?;
        tx.execute(
            "DELETE FROM provenance_edges WHERE parent_id = ?1 OR child_id = ?1",
            params![id],
        )?;
        tx.execute("DELETE FROM causal_sources WHERE entry_id = ?1", params![id])?;
        tx.execute("DELETE FROM causal_targets WHERE entry_id = ?1", params![id])?;
        // Relations left with an empty endpoint set are no longer meaningful.
        tx.execute(
            "DELETE FROM causal_relations WHERE id NOT IN (SELECT relation_id FROM causal_sources)
                OR id NOT IN (SELECT relation_id FROM causal_targets)",
            [],
        )?;
        tx.execute("DELETE FROM pending_embeddings WHERE entry_id = ?1", params![id])?;
        tx.execute("DELETE FROM entries WHERE id = ?1", params![id])?;

        tx.commit()?;
        Ok(Some(label as u64))
    }

    // ── Counter / tier updates ─────────────────────────────────────────

    /// Update the compression tier marker; content is never touched.
    pub fn update_tier(&self, id: &str, tier: CompressionTier) -> MemoryResult<()> {
        let conn = self.lock();
        let changed = conn.execute(
            "UPDATE entries SET tier = ?2 WHERE id = ?1",
            params![id, tier.as_str()],
        )?;
        if changed == 0 {
            return Err(MemoryError::UnknownEntry(id.to_string()));
        }
        Ok(())
    }

    /// Bump access counters. Best-effort; callers ignore the result.
    pub fn record_access(&self, id: &str) -> MemoryResult<()> {
        let conn = self.lock();
        conn.execute(
            "UPDATE entries SET access_count = access_count + 1, last_accessed_at = ?2
             WHERE id = ?1",
            params![id, crate::engine::now_iso()],
        )?;
        Ok(())
    }

    /// Fold a new observation into the running learning-quality mean.
    pub fn record_quality(&self, id: &str, score: f64) -> MemoryResult<()> {
        let conn = self.lock();
        let changed = conn.execute(
            "UPDATE entries SET
                 quality = (quality * quality_updates + ?2) / (quality_updates + 1),
                 quality_updates = quality_updates + 1
             WHERE id = ?1",
            params![id, score],
        )?;
        if changed == 0 {
            return Err(MemoryError::UnknownEntry(id.to_string()));
        }
        Ok(())
    }

    /// Persist a flushed embedding and clear the pending flag.
    pub fn mark_embedded(&self, id: &str, vector: &[f32]) -> MemoryResult<()> {
        let conn = self.lock();
        conn.execute(
            "UPDATE entries SET pending_embedding = 0, embedding = ?2 WHERE id = ?1",
            params![id, f32_vec_to_bytes(vector)],
        )?;
        Ok(())
    }

    // ── Filters & scans ────────────────────────────────────────────────

    /// Composite filter scan, insertion (label) order.
    pub fn by_filters(&self, filters: &EntryFilters) -> MemoryResult<Vec<Entry>> {
        let (clause, values) = build_filter_clause(filters);
        let sql = format!(
            "SELECT {SELECT_COLUMNS} FROM entries e WHERE {clause} ORDER BY e.label ASC"
        );

        let conn = self.lock();
        let mut stmt = conn.prepare(&sql)?;
        let mut entries: Vec<Entry> = stmt
            .query_map(rusqlite::params_from_iter(values), Entry::from_row)?
            .filter_map(|r| r.ok())
            .collect();
        for entry in &mut entries {
            entry.tags = load_tags(&conn, &entry.id)?;
        }
        Ok(entries)
    }

    /// Every entry with a durable embedding, for index rebuilds.
    pub fn embedded_vectors(&self) -> MemoryResult<Vec<(u64, Vec<f32>)>> {
        let conn = self.lock();
        let mut stmt =
            conn.prepare("SELECT label, embedding FROM entries WHERE embedding IS NOT NULL")?;
        let rows = stmt
            .query_map([], |row| {
                let label: i64 = row.get(0)?;
                let blob: Vec<u8> = row.get(1)?;
                Ok((label as u64, bytes_to_f32_vec(&blob)))
            })?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    }

    pub fn count_entries(&self) -> MemoryResult<usize> {
        let conn = self.lock();
        let n: i64 = conn.query_row("SELECT COUNT(*) FROM entries", [], |r| r.get(0))?;
        Ok(n as usize)
    }

    pub fn counts_by_source(&self) -> MemoryResult<Vec<(String, usize)>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT source, COUNT(*) FROM entries GROUP BY source ORDER BY COUNT(*) DESC",
        )?;
        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as usize)))?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    }
}

/// Build a WHERE clause + positional values for a composite filter.
fn build_filter_clause(filters: &EntryFilters) -> (String, Vec<rusqlite::types::Value>) {
    use rusqlite::types::Value;

    let mut conditions: Vec<String> = Vec::new();
    let mut values: Vec<Value> = Vec::new();
    let mut idx = 0usize;
    let mut next = |values: &mut Vec<Value>, v: Value| {
        values.push(v);
        idx += 1;
        format!("?{idx}")
    };

    if !filters.sources.is_empty() {
        let placeholders: Vec<String> = filters
            .sources
            .iter()
            .map(|s| next(&mut values, Value::Text(s.as_str().to_string())))
            .collect();
        conditions.push(format!("e.source IN ({})", placeholders.join(", ")));
    }

    if !filters.tags.is_empty() {
        let placeholders: Vec<String> = filters
            .tags
            .iter()
            .map(|t| next(&mut values, Value::Text(t.clone())))
            .collect();
        let in_list = placeholders.join(", ");
        match filters.tag_mode {
            TagMode::Any => conditions.push(format!(
                "EXISTS (SELECT 1 FROM tags t WHERE t.entry_id = e.id AND t.tag IN ({in_list}))"
            )),
            TagMode::All => conditions.push(format!(
                "(SELECT COUNT(DISTINCT t.tag) FROM tags t WHERE t.entry_id = e.id AND t.tag IN ({in_list})) = {}",
                filters.tags.len()
            )),
        }
    }

    if let Some(ref after) = filters.created_after {
        let p = next(&mut values, Value::Text(after.clone()));
        conditions.push(format!("e.created_at >= {p}"));
    }
    if let Some(ref before) = filters.created_before {
        let p = next(&mut values, Value::Text(before.clone()));
        conditions.push(format!("e.created_at <= {p}"));
    }
    if let Some(min) = filters.min_importance {
        let p = next(&mut values, Value::Real(min));
        conditions.push(format!("e.importance >= {p}"));
    }
    if let Some(ref session) = filters.session_id {
        let p = next(&mut values, Value::Text(session.clone()));
        conditions.push(format!("e.session_id = {p}"));
    }
    if let Some(ref agent) = filters.agent_id {
        let p = next(&mut values, Value::Text(agent.clone()));
        conditions.push(format!("e.agent_id = {p}"));
    }

    if conditions.is_empty() {
        ("1=1".to_string(), values)
    } else {
        (conditions.join(" AND "), values)
    }
}
