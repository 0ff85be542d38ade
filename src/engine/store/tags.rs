// ── Entry Store: tag index queries ─────────────────────────────────────────

use rusqlite::params;

use crate::atoms::error::MemoryResult;
use crate::atoms::types::TagMode;

use super::EntryStore;

impl EntryStore {
    /// Entry ids carrying `tags` — any one of them, or all of them.
    pub fn by_tag(&self, tags: &[String], mode: TagMode) -> MemoryResult<Vec<String>> {
        if tags.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders: Vec<String> = (1..=tags.len()).map(|i| format!("?{i}")).collect();
        let in_list = placeholders.join(", ");
        let sql = match mode {
            TagMode::Any => format!(
                "SELECT t.entry_id FROM tags t
                 JOIN entries e ON e.id = t.entry_id
                 WHERE t.tag IN ({in_list})
                 GROUP BY t.entry_id ORDER BY MIN(e.label) ASC"
            ),
            TagMode::All => format!(
                "SELECT t.entry_id FROM tags t
                 JOIN entries e ON e.id = t.entry_id
                 WHERE t.tag IN ({in_list})
                 GROUP BY t.entry_id HAVING COUNT(DISTINCT t.tag) = {}
                 ORDER BY MIN(e.label) ASC",
                tags.len()
            ),
        };

        let conn = self.lock();
        let mut stmt = conn.prepare(&sql)?;
        let ids = stmt
            .query_map(rusqlite::params_from_iter(tags.iter()), |row| row.get::<_, String>(0))?
            .filter_map(|r| r.ok())
            .collect();
        Ok(ids)
    }

    pub fn count_tags(&self) -> MemoryResult<usize> {
        let conn = self.lock();
        let n: i64 = conn.query_row("SELECT COUNT(*) FROM tags", [], |r| r.get(0))?;
        Ok(n as usize)
    }

    /// Most frequent tags, descending.
    pub fn top_tags(&self, limit: usize) -> MemoryResult<Vec<(String, usize)>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT tag, COUNT(*) FROM tags GROUP BY tag
             ORDER BY COUNT(*) DESC, tag ASC LIMIT ?1",
        )?;
        let rows = stmt
            .query_map(params![limit as i64], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as usize))
            })?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    }
}
