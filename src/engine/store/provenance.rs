// ── Entry Store: provenance DAG edge queries ───────────────────────────────

use rusqlite::params;

use crate::atoms::error::MemoryResult;

use super::EntryStore;

impl EntryStore {
    /// Direct parents of `id`.
    pub fn parents_of(&self, id: &str) -> MemoryResult<Vec<String>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT parent_id FROM provenance_edges WHERE child_id = ?1 ORDER BY parent_id",
        )?;
        let ids = stmt
            .query_map(params![id], |row| row.get::<_, String>(0))?
            .filter_map(|r| r.ok())
            .collect();
        Ok(ids)
    }

    /// Direct children of `id`.
    pub fn children_of(&self, id: &str) -> MemoryResult<Vec<String>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT child_id FROM provenance_edges WHERE parent_id = ?1 ORDER BY child_id",
        )?;
        let ids = stmt
            .query_map(params![id], |row| row.get::<_, String>(0))?
            .filter_map(|r| r.ok())
            .collect();
        Ok(ids)
    }

    /// Depth and cached L-Score for a set of would-be parents, in one pass.
    pub fn provenance_aggregates(&self, ids: &[String]) -> MemoryResult<Vec<(String, u32, f64)>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders: Vec<String> = (1..=ids.len()).map(|i| format!("?{i}")).collect();
        let sql = format!(
            "SELECT id, depth, lscore FROM entries WHERE id IN ({})",
            placeholders.join(", ")
        );
        let conn = self.lock();
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(rusqlite::params_from_iter(ids.iter()), |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, i64>(1)? as u32,
                    row.get::<_, f64>(2)?,
                ))
            })?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    }

    pub fn count_provenance_edges(&self) -> MemoryResult<usize> {
        let conn = self.lock();
        let n: i64 = conn.query_row("SELECT COUNT(*) FROM provenance_edges", [], |r| r.get(0))?;
        Ok(n as usize)
    }
}
