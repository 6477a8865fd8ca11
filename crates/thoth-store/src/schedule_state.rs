//! Per-source schedule state rows
//!
//! Written only by the scheduler; persisted atomically after every run.

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use duckdb::params;

use thoth_core::result::{RunOutcome, ScheduleState};

use crate::db::Database;

pub struct ScheduleStateStore {
    db: Arc<Database>,
}

impl ScheduleStateStore {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    pub fn get(&self, source_name: &str) -> Result<Option<ScheduleState>> {
        let conn = self.db.conn();
        let mut stmt = conn.prepare(
            "SELECT source_name, last_run_at, next_run_at, last_run_outcome, last_error
             FROM schedule_state WHERE source_name = ?",
        )?;
        let mut rows = stmt.query_map(params![source_name], row_to_state)?;
        match rows.next() {
            Some(row) => Ok(Some(row??)),
            None => Ok(None),
        }
    }

    pub fn list(&self) -> Result<Vec<ScheduleState>> {
        let conn = self.db.conn();
        let mut stmt = conn.prepare(
            "SELECT source_name, last_run_at, next_run_at, last_run_outcome, last_error
             FROM schedule_state ORDER BY next_run_at",
        )?;
        let rows = stmt.query_map([], row_to_state)?;
        let mut states = Vec::new();
        for row in rows {
            states.push(row??);
        }
        Ok(states)
    }

    /// Insert or replace the state row for one source.
    pub fn upsert(&self, state: &ScheduleState) -> Result<()> {
        self.db
            .conn()
            .execute(
                "INSERT OR REPLACE INTO schedule_state
                 (source_name, last_run_at, next_run_at, last_run_outcome, last_error)
                 VALUES (?, ?, ?, ?, ?)",
                params![
                    state.source_name,
                    state.last_run_at.map(|t| t.to_rfc3339()),
                    state.next_run_at.to_rfc3339(),
                    state.last_run_outcome.map(|o| o.as_str()),
                    state.last_error,
                ],
            )
            .context("failed to upsert schedule state")?;
        Ok(())
    }

    pub fn delete(&self, source_name: &str) -> Result<()> {
        self.db.conn().execute(
            "DELETE FROM schedule_state WHERE source_name = ?",
            params![source_name],
        )?;
        Ok(())
    }
}

fn parse_ts(s: &str) -> std::result::Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(s).map(|t| t.with_timezone(&Utc))
}

type RowResult = std::result::Result<ScheduleState, chrono::ParseError>;

fn row_to_state(row: &duckdb::Row<'_>) -> duckdb::Result<RowResult> {
    let source_name: String = row.get(0)?;
    let last_run_at: Option<String> = row.get(1)?;
    let next_run_at: String = row.get(2)?;
    let last_run_outcome: Option<String> = row.get(3)?;
    let last_error: Option<String> = row.get(4)?;

    Ok((|| {
        Ok(ScheduleState {
            source_name,
            last_run_at: last_run_at.as_deref().map(parse_ts).transpose()?,
            next_run_at: parse_ts(&next_run_at)?,
            last_run_outcome: last_run_outcome.as_deref().and_then(RunOutcome::parse),
            last_error,
        })
    })())
}
