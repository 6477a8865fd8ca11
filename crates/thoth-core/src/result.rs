//! Run outcomes, audit records and per-source schedule state

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::paper::Paper;

/// Outcome of a discovery run (and of the last run in schedule state).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    /// No errors.
    Success,
    /// At least one adapter error, but at least one paper emitted.
    Partial,
    /// Errors and zero papers emitted.
    Failed,
    /// The scheduler decided not to run (e.g. trigger on an in-flight source).
    Skipped,
    /// The cancel signal fired mid-run.
    Cancelled,
}

impl RunOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Partial => "partial",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "success" => Some(Self::Success),
            "partial" => Some(Self::Partial),
            "failed" => Some(Self::Failed),
            "skipped" => Some(Self::Skipped),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }
}

impl std::fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pipeline stage an error was recorded at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStage {
    BuildingQuery,
    Fetching,
    Merging,
    Filtering,
    Emitting,
    Persisting,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunError {
    pub stage: RunStage,
    pub message: String,
}

impl RunError {
    pub fn new(stage: RunStage, message: impl Into<String>) -> Self {
        Self {
            stage,
            message: message.into(),
        }
    }
}

/// Audit record for one discovery run.
///
/// `papers` is transient (handed to the caller, never persisted); the
/// store keeps the counts, outcome and errors.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryResult {
    pub source_name: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub candidates_fetched: usize,
    pub candidates_after_dedup: usize,
    pub candidates_after_filter: usize,
    /// Items dropped at adapter normalization. Informational; parse
    /// errors alone never fail a run.
    #[serde(default)]
    pub parse_errors: usize,
    #[serde(skip)]
    pub papers: Vec<Paper>,
    pub outcome: RunOutcome,
    pub errors: Vec<RunError>,
}

impl DiscoveryResult {
    pub fn begin(source_name: impl Into<String>) -> Self {
        Self {
            source_name: source_name.into(),
            started_at: Utc::now(),
            finished_at: None,
            candidates_fetched: 0,
            candidates_after_dedup: 0,
            candidates_after_filter: 0,
            parse_errors: 0,
            papers: Vec::new(),
            outcome: RunOutcome::Failed,
            errors: Vec::new(),
        }
    }

    /// True when at least one adapter failed but others produced papers.
    pub fn partial(&self) -> bool {
        self.outcome == RunOutcome::Partial
    }
}

/// Per-source scheduling state, owned exclusively by the scheduler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleState {
    pub source_name: String,
    pub last_run_at: Option<DateTime<Utc>>,
    pub next_run_at: DateTime<Utc>,
    pub last_run_outcome: Option<RunOutcome>,
    pub last_error: Option<String>,
}
