// ── Entry Store ────────────────────────────────────────────────────────────
// Durable keyed storage of entries, tags, provenance edges, and causal
// relations in a single SQLite database (WAL mode). The engine owns one
// connection; callers never see SQL.
//
// Module layout:
//   schema.rs     — tables and idempotent migrations
//   entries.rs    — entry CRUD, filters, label allocation
//   tags.rs       — tag index queries
//   provenance.rs — DAG edge queries
//   causal.rs     — hyperedge rows + endpoint joins + expiry sweep
//   pending.rs    — deferred-embedding queue rows + failure log

use std::path::Path;

use log::info;
use parking_lot::Mutex;
use rusqlite::Connection;

use crate::atoms::error::MemoryResult;

mod causal;
mod entries;
mod pending;
mod provenance;
mod schema;
mod tags;

/// Thread-safe single-writer database wrapper.
pub struct EntryStore {
    /// The SQLite connection, protected by a Mutex.
    conn: Mutex<Connection>,
}

impl EntryStore {
    /// Open (or create) the database at `path` and run migrations.
    pub fn open(path: &Path) -> MemoryResult<Self> {
        info!("[store] opening entry store at {}", path.display());
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;").ok();
        conn.execute_batch("PRAGMA foreign_keys=ON;").ok();
        schema::run_migrations(&conn)?;
        Ok(EntryStore { conn: Mutex::new(conn) })
    }

    /// In-memory store with the full schema, for tests.
    pub fn open_in_memory() -> MemoryResult<Self> {
        let conn = Connection::open_in_memory()?;
        schema::run_migrations(&conn)?;
        Ok(EntryStore { conn: Mutex::new(conn) })
    }

    /// Flush the WAL into the main database file.
    pub fn checkpoint(&self) -> MemoryResult<()> {
        let conn = self.conn.lock();
        conn.execute_batch("PRAGMA wal_checkpoint(TRUNCATE);")?;
        Ok(())
    }

    pub(crate) fn lock(&self) -> parking_lot::MutexGuard<'_, Connection> {
        self.conn.lock()
    }
}
