//! Discovery run audit records
//!
//! A row is opened when a run starts and completed when it finishes, so
//! a crash leaves a visible dangling row. `recover_dangling` turns those
//! into FAILED at startup; `sweep_expired` enforces retention.

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use duckdb::params;

use thoth_core::result::{DiscoveryResult, RunOutcome};

use crate::db::Database;

pub struct ResultStore {
    db: Arc<Database>,
}

/// Audit row as read back from the store (no papers; they are transient).
#[derive(Debug, Clone)]
pub struct ResultRow {
    pub id: i64,
    pub source_name: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub candidates_fetched: i64,
    pub candidates_after_dedup: i64,
    pub candidates_after_filter: i64,
    pub outcome: Option<RunOutcome>,
    pub errors_json: String,
}

impl ResultStore {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Open the audit row for a starting run. Returns the row id.
    pub fn begin_run(&self, source_name: &str, started_at: DateTime<Utc>) -> Result<i64> {
        let conn = self.db.conn();
        let mut stmt = conn.prepare(
            "INSERT INTO discovery_results
             (source_name, started_at, candidates_fetched, candidates_after_dedup,
              candidates_after_filter, outcome, errors_json)
             VALUES (?, ?, 0, 0, 0, 'running', '[]')
             RETURNING id",
        )?;
        let mut rows = stmt.query_map(
            params![source_name, started_at.to_rfc3339()],
            |row| row.get::<_, i64>(0),
        )?;
        match rows.next() {
            Some(id) => Ok(id?),
            None => anyhow::bail!("insert returned no id"),
        }
    }

    /// Complete the audit row with the run's final counters and outcome.
    pub fn finish_run(&self, id: i64, result: &DiscoveryResult) -> Result<()> {
        let errors_json = serde_json::to_string(&result.errors)?;
        self.db
            .conn()
            .execute(
                "UPDATE discovery_results
                 SET finished_at = ?, candidates_fetched = ?,
                     candidates_after_dedup = ?, candidates_after_filter = ?,
                     outcome = ?, errors_json = ?
                 WHERE id = ?",
                params![
                    result
                        .finished_at
                        .unwrap_or_else(Utc::now)
                        .to_rfc3339(),
                    result.candidates_fetched as i64,
                    result.candidates_after_dedup as i64,
                    result.candidates_after_filter as i64,
                    result.outcome.as_str(),
                    errors_json,
                    id,
                ],
            )
            .context("failed to finish run row")?;
        Ok(())
    }

    /// Mark runs that started but never finished (crash) as FAILED.
    /// Returns how many rows were recovered.
    pub fn recover_dangling(&self) -> Result<usize> {
        let n = self.db.conn().execute(
            "UPDATE discovery_results
             SET outcome = 'failed', finished_at = ?,
                 errors_json = '[{\"stage\":\"persisting\",\"message\":\"process exited mid-run\"}]'
             WHERE finished_at IS NULL",
            params![Utc::now().to_rfc3339()],
        )?;
        if n > 0 {
            log::warn!("recovered {n} dangling discovery runs as failed");
        }
        Ok(n)
    }

    /// Delete rows older than the retention window. Returns delete count.
    pub fn sweep_expired(&self, retention_days: u32) -> Result<usize> {
        let cutoff = (Utc::now() - Duration::days(i64::from(retention_days))).to_rfc3339();
        let n = self.db.conn().execute(
            "DELETE FROM discovery_results WHERE started_at < ?",
            params![cutoff],
        )?;
        if n > 0 {
            log::info!("swept {n} expired discovery results");
        }
        Ok(n)
    }

    /// Most recent runs for a source, newest first.
    pub fn recent(&self, source_name: &str, limit: usize) -> Result<Vec<ResultRow>> {
        let conn = self.db.conn();
        let mut stmt = conn.prepare(
            "SELECT id, source_name, started_at, finished_at, candidates_fetched,
                    candidates_after_dedup, candidates_after_filter, outcome, errors_json
             FROM discovery_results WHERE source_name = ?
             ORDER BY started_at DESC LIMIT ?",
        )?;
        let rows = stmt.query_map(params![source_name, limit as i64], row_to_result)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row??);
        }
        Ok(out)
    }
}

fn parse_ts(s: &str) -> std::result::Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(s).map(|t| t.with_timezone(&Utc))
}

type RowResult = std::result::Result<ResultRow, chrono::ParseError>;

fn row_to_result(row: &duckdb::Row<'_>) -> duckdb::Result<RowResult> {
    let id: i64 = row.get(0)?;
    let source_name: String = row.get(1)?;
    let started_at: String = row.get(2)?;
    let finished_at: Option<String> = row.get(3)?;
    let candidates_fetched: i64 = row.get(4)?;
    let candidates_after_dedup: i64 = row.get(5)?;
    let candidates_after_filter: i64 = row.get(6)?;
    let outcome: String = row.get(7)?;
    let errors_json: String = row.get(8)?;

    Ok((|| {
        Ok(ResultRow {
            id,
            source_name,
            started_at: parse_ts(&started_at)?,
            finished_at: finished_at.as_deref().map(parse_ts).transpose()?,
            candidates_fetched,
            candidates_after_dedup,
            candidates_after_filter,
            outcome: RunOutcome::parse(&outcome),
            errors_json,
        })
    })())
}

#[cfg(test)]
mod tests {
    use super::*;
    use thoth_core::result::{RunError, RunStage};

    fn store() -> ResultStore {
        ResultStore::new(Arc::new(Database::open_in_memory().unwrap()))
    }

    fn finished_result(source: &str, outcome: RunOutcome) -> DiscoveryResult {
        let mut r = DiscoveryResult::begin(source);
        r.finished_at = Some(Utc::now());
        r.candidates_fetched = 5;
        r.candidates_after_dedup = 4;
        r.candidates_after_filter = 3;
        r.outcome = outcome;
        r
    }

    #[test]
    fn begin_and_finish_run() {
        let store = store();
        let id = store.begin_run("arxiv_ml", Utc::now()).unwrap();

        let mut result = finished_result("arxiv_ml", RunOutcome::Success);
        result
            .errors
            .push(RunError::new(RunStage::Fetching, "HTTP 503 once"));
        store.finish_run(id, &result).unwrap();

        let rows = store.recent("arxiv_ml", 10).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].outcome, Some(RunOutcome::Success));
        assert_eq!(rows[0].candidates_fetched, 5);
        assert!(rows[0].errors_json.contains("HTTP 503 once"));
        assert!(rows[0].finished_at.is_some());
    }

    #[test]
    fn ids_are_distinct() {
        let store = store();
        let a = store.begin_run("s", Utc::now()).unwrap();
        let b = store.begin_run("s", Utc::now()).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn recover_dangling_marks_failed() {
        let store = store();
        let id = store.begin_run("arxiv_ml", Utc::now()).unwrap();
        let done = store.begin_run("arxiv_ml", Utc::now()).unwrap();
        store
            .finish_run(done, &finished_result("arxiv_ml", RunOutcome::Success))
            .unwrap();

        assert_eq!(store.recover_dangling().unwrap(), 1);
        let rows = store.recent("arxiv_ml", 10).unwrap();
        let recovered = rows.iter().find(|r| r.id == id).unwrap();
        assert_eq!(recovered.outcome, Some(RunOutcome::Failed));
        assert!(recovered.errors_json.contains("process exited mid-run"));
        // Second pass finds nothing.
        assert_eq!(store.recover_dangling().unwrap(), 0);
    }

    #[test]
    fn sweep_removes_only_expired() {
        let store = store();
        let old = store
            .begin_run("arxiv_ml", Utc::now() - Duration::days(45))
            .unwrap();
        store
            .finish_run(old, &finished_result("arxiv_ml", RunOutcome::Success))
            .unwrap();
        let fresh = store.begin_run("arxiv_ml", Utc::now()).unwrap();
        store
            .finish_run(fresh, &finished_result("arxiv_ml", RunOutcome::Success))
            .unwrap();

        assert_eq!(store.sweep_expired(30).unwrap(), 1);
        let rows = store.recent("arxiv_ml", 10).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].id, fresh);
    }
}
