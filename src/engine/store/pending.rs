// ── Entry Store: deferred-embedding queue rows + failure log ───────────────
//
// Pending records are written in the same transaction as the entry row and
// removed only after their vectors land in the index, so a killed flush
// leaves everything in place for the next run.

use rusqlite::params;

use crate::atoms::error::MemoryResult;
use crate::atoms::types::FailureRecord;

use super::EntryStore;

/// One queued embedding request.
#[derive(Debug, Clone)]
pub(crate) struct PendingRecord {
    pub entry_id: String,
    pub label: u64,
    pub content: String,
    pub enqueued_at_ms: i64,
}

impl EntryStore {
    pub fn pending_count(&self) -> MemoryResult<usize> {
        let conn = self.lock();
        let n: i64 = conn.query_row("SELECT COUNT(*) FROM pending_embeddings", [], |r| r.get(0))?;
        Ok(n as usize)
    }

    pub fn oldest_pending_age_ms(&self, now_ms: i64) -> MemoryResult<Option<i64>> {
        let conn = self.lock();
        let oldest: Option<i64> = conn.query_row(
            "SELECT MIN(enqueued_at_ms) FROM pending_embeddings",
            [],
            |r| r.get(0),
        )?;
        Ok(oldest.map(|t| (now_ms - t).max(0)))
    }

    pub(crate) fn list_pending(&self) -> MemoryResult<Vec<PendingRecord>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT entry_id, label, content, enqueued_at_ms FROM pending_embeddings
             ORDER BY label ASC",
        )?;
        let records = stmt
            .query_map([], |row| {
                Ok(PendingRecord {
                    entry_id: row.get(0)?,
                    label: row.get::<_, i64>(1)? as u64,
                    content: row.get(2)?,
                    enqueued_at_ms: row.get(3)?,
                })
            })?
            .filter_map(|r| r.ok())
            .collect();
        Ok(records)
    }

    pub(crate) fn remove_pending(&self, entry_ids: &[String]) -> MemoryResult<()> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;
        for id in entry_ids {
            tx.execute("DELETE FROM pending_embeddings WHERE entry_id = ?1", params![id])?;
        }
        tx.commit()?;
        Ok(())
    }

    // ── Failure log ────────────────────────────────────────────────────

    pub fn log_failure(&self, operation: &str, entry_id: Option<&str>, detail: &str) -> MemoryResult<()> {
        let conn = self.lock();
        conn.execute(
            "INSERT INTO failure_log (operation, entry_id, detail, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![operation, entry_id, detail, crate::engine::now_iso()],
        )?;
        Ok(())
    }

    pub fn recent_failures(&self, limit: usize) -> MemoryResult<Vec<FailureRecord>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT operation, entry_id, detail, created_at FROM failure_log
             ORDER BY id DESC LIMIT ?1",
        )?;
        let rows = stmt
            .query_map(params![limit as i64], |row| {
                Ok(FailureRecord {
                    operation: row.get(0)?,
                    entry_id: row.get(1)?,
                    detail: row.get(2)?,
                    created_at: row.get(3)?,
                })
            })?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    }
}
