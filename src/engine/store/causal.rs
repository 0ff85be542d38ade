// ── Entry Store: causal hyperedge rows ─────────────────────────────────────
//
// A relation row plus two join tables (sources, targets). Liveness is
// always enforced in the query: expired rows are invisible to reads even
// before the sweep removes them.

use rusqlite::types::Value;
use rusqlite::{params, Connection, OptionalExtension};

use crate::atoms::error::{MemoryError, MemoryResult};
use crate::atoms::types::{CausalRelation, RelationType};

use super::EntryStore;

fn load_endpoints(conn: &Connection, table: &str, relation_id: &str) -> MemoryResult<Vec<String>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT entry_id FROM {table} WHERE relation_id = ?1 ORDER BY entry_id"
    ))?;
    let ids = stmt
        .query_map(params![relation_id], |row| row.get::<_, String>(0))?
        .filter_map(|r| r.ok())
        .collect();
    Ok(ids)
}

fn load_relation(conn: &Connection, id: &str) -> MemoryResult<Option<CausalRelation>> {
    let row = conn
        .query_row(
            "SELECT id, relation_type, strength, created_at_ms, expires_at_ms, metadata_json
             FROM causal_relations WHERE id = ?1",
            params![id],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, f64>(2)?,
                    row.get::<_, i64>(3)?,
                    row.get::<_, Option<i64>>(4)?,
                    row.get::<_, Option<String>>(5)?,
                ))
            },
        )
        .optional()?;

    let Some((id, type_str, strength, created_at_ms, expires_at_ms, metadata_json)) = row else {
        return Ok(None);
    };
    Ok(Some(CausalRelation {
        sources: load_endpoints(conn, "causal_sources", &id)?,
        targets: load_endpoints(conn, "causal_targets", &id)?,
        relation_type: RelationType::parse(&type_str)?,
        id,
        strength,
        created_at_ms,
        expires_at_ms,
        metadata: metadata_json.and_then(|s| serde_json::from_str(&s).ok()),
    }))
}

impl EntryStore {
    /// Insert the relation row and both endpoint sets in one transaction.
    /// Every endpoint must name a stored entry.
    pub fn insert_relation(&self, relation: &CausalRelation) -> MemoryResult<()> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;

        for endpoint in relation.sources.iter().chain(relation.targets.iter()) {
            let known: bool = tx.query_row(
                "SELECT COUNT(*) > 0 FROM entries WHERE id = ?1",
                params![endpoint],
                |r| r.get(0),
            )?;
            if !known {
                return Err(MemoryError::UnknownEntry(endpoint.clone()));
            }
        }

        let metadata_json = relation
            .metadata
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        tx.execute(
            "INSERT INTO causal_relations (id, relation_type, strength, created_at_ms,
                 expires_at_ms, metadata_json)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                relation.id,
                relation.relation_type.as_str(),
                relation.strength,
                relation.created_at_ms,
                relation.expires_at_ms,
                metadata_json,
            ],
        )?;
        for src in &relation.sources {
            tx.execute(
                "INSERT OR IGNORE INTO causal_sources (relation_id, entry_id) VALUES (?1, ?2)",
                params![relation.id, src],
            )?;
        }
        for tgt in &relation.targets {
            tx.execute(
                "INSERT OR IGNORE INTO causal_targets (relation_id, entry_id) VALUES (?1, ?2)",
                params![relation.id, tgt],
            )?;
        }

        tx.commit()?;
        Ok(())
    }

    pub fn get_relation(&self, id: &str) -> MemoryResult<Option<CausalRelation>> {
        let conn = self.lock();
        load_relation(&conn, id)
    }

    /// Live relations with at least one of `entry_ids` in the given
    /// endpoint table ("causal_sources" for forward steps,
    /// "causal_targets" for backward steps).
    fn live_relations_touching(
        &self,
        table: &str,
        entry_ids: &[String],
        now_ms: i64,
        type_filter: Option<RelationType>,
    ) -> MemoryResult<Vec<CausalRelation>> {
        if entry_ids.is_empty() {
            return Ok(Vec::new());
        }
        let mut values: Vec<Value> = Vec::new();
        let placeholders: Vec<String> = entry_ids
            .iter()
            .map(|id| {
                values.push(Value::Text(id.clone()));
                format!("?{}", values.len())
            })
            .collect();
        values.push(Value::Integer(now_ms));
        let now_p = format!("?{}", values.len());

        let mut sql = format!(
            "SELECT r.id FROM causal_relations r
             JOIN {table} j ON j.relation_id = r.id
             WHERE j.entry_id IN ({})
               AND (r.expires_at_ms IS NULL OR r.expires_at_ms > {now_p})",
            placeholders.join(", ")
        );
        if let Some(t) = type_filter {
            values.push(Value::Text(t.as_str().to_string()));
            sql.push_str(&format!(" AND r.relation_type = ?{}", values.len()));
        }
        sql.push_str(" GROUP BY r.id ORDER BY MIN(r.created_at_ms) ASC, r.id ASC");

        let conn = self.lock();
        let mut stmt = conn.prepare(&sql)?;
        let ids: Vec<String> = stmt
            .query_map(rusqlite::params_from_iter(values), |row| row.get::<_, String>(0))?
            .filter_map(|r| r.ok())
            .collect();

        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(rel) = load_relation(&conn, &id)? {
                out.push(rel);
            }
        }
        Ok(out)
    }

    pub fn relations_from(
        &self,
        entry_ids: &[String],
        now_ms: i64,
        type_filter: Option<RelationType>,
    ) -> MemoryResult<Vec<CausalRelation>> {
        self.live_relations_touching("causal_sources", entry_ids, now_ms, type_filter)
    }

    pub fn relations_into(
        &self,
        entry_ids: &[String],
        now_ms: i64,
        type_filter: Option<RelationType>,
    ) -> MemoryResult<Vec<CausalRelation>> {
        self.live_relations_touching("causal_targets", entry_ids, now_ms, type_filter)
    }

    /// Remove relations whose expiry has passed. Returns the swept count.
    pub fn sweep_expired_relations(&self, now_ms: i64) -> MemoryResult<usize> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;
        let mut stmt = tx.prepare(
            "SELECT id FROM causal_relations
             WHERE expires_at_ms IS NOT NULL AND expires_at_ms <= ?1",
        )?;
        let expired: Vec<String> = stmt
            .query_map(params![now_ms], |row| row.get::<_, String>(0))?
            .filter_map(|r| r.ok())
            .collect();
        drop(stmt);

        for id in &expired {
            tx.execute("DELETE FROM causal_sources WHERE relation_id = ?1", params![id])?;
            tx.execute("DELETE FROM causal_targets WHERE relation_id = ?1", params![id])?;
            tx.execute("DELETE FROM causal_relations WHERE id = ?1", params![id])?;
        }
        tx.commit()?;
        Ok(expired.len())
    }

    pub fn count_relations(&self) -> MemoryResult<(usize, usize)> {
        let conn = self.lock();
        let total: i64 = conn.query_row("SELECT COUNT(*) FROM causal_relations", [], |r| r.get(0))?;
        let live: i64 = conn.query_row(
            "SELECT COUNT(*) FROM causal_relations
             WHERE expires_at_ms IS NULL OR expires_at_ms > ?1",
            params![crate::engine::now_ms()],
            |r| r.get(0),
        )?;
        Ok((total as usize, live as usize))
    }
}
