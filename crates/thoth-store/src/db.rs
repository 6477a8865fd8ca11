//! Embedded DuckDB connection and schema bootstrap

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use anyhow::{Context, Result};
use duckdb::Connection;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS source_configs (
    name TEXT PRIMARY KEY,
    kind TEXT NOT NULL,
    is_active BOOLEAN NOT NULL,
    adapter_params TEXT NOT NULL,
    schedule TEXT NOT NULL,
    filters TEXT NOT NULL,
    max_papers_per_run BIGINT,
    fan_out BOOLEAN NOT NULL
);

CREATE TABLE IF NOT EXISTS schedule_state (
    source_name TEXT PRIMARY KEY,
    last_run_at TEXT,
    next_run_at TEXT NOT NULL,
    last_run_outcome TEXT,
    last_error TEXT
);

CREATE SEQUENCE IF NOT EXISTS discovery_result_id START 1;

CREATE TABLE IF NOT EXISTS discovery_results (
    id BIGINT PRIMARY KEY DEFAULT nextval('discovery_result_id'),
    source_name TEXT NOT NULL,
    started_at TEXT NOT NULL,
    finished_at TEXT,
    candidates_fetched BIGINT NOT NULL,
    candidates_after_dedup BIGINT NOT NULL,
    candidates_after_filter BIGINT NOT NULL,
    outcome TEXT NOT NULL,
    errors_json TEXT NOT NULL
);
";

/// Shared database handle. The connection is guarded by a mutex; DuckDB
/// work here is short-lived metadata access, never bulk scans.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open (or create) the database file and bootstrap the schema.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("cannot open database {}", path.display()))?;
        Self::init(conn)
    }

    /// In-memory database for tests.
    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory().context("cannot open in-memory database")?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA)
            .context("failed to bootstrap schema")?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Lock the underlying connection.
    pub(crate) fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_bootstraps_in_memory() {
        let db = Database::open_in_memory().unwrap();
        let conn = db.conn();
        let count: i64 = conn
            .query_row("SELECT count(*) FROM source_configs", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn schema_bootstraps_on_disk_and_reopens() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("thoth.db");
        {
            let db = Database::open(&path).unwrap();
            db.conn()
                .execute(
                    "INSERT INTO schedule_state (source_name, next_run_at) VALUES (?, ?)",
                    duckdb::params!["arxiv_ml", "2026-01-01T00:00:00Z"],
                )
                .unwrap();
        }
        let db = Database::open(&path).unwrap();
        let count: i64 = db
            .conn()
            .query_row("SELECT count(*) FROM schedule_state", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }
}
