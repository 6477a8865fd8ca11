//! Thoth Core - Common infrastructure for the paper discovery engine
//!
//! This crate provides the shared data model and the reusable machinery
//! (rate limiting, retry, HTTP, logging, configuration) used by the
//! adapter, browser, store and engine crates.

pub mod config;
pub mod error;
pub mod http;
pub mod logging;
pub mod paper;
pub mod query;
pub mod rate_limit;
pub mod result;
pub mod retry;
pub mod source_config;
pub mod workflow;

// Re-exports for convenience
pub use config::{AdapterSettings, BrowserSettings, CoreConfig, DiscoveryConfig, SchedulerConfig};
pub use error::DiscoveryError;
pub use http::{build_client, user_agent};
pub use logging::init_logging;
pub use paper::{
    Author, Paper, PaperIds, SourceKind, normalize_arxiv_id, normalize_doi, normalize_title,
};
pub use query::NormalizedQuery;
pub use rate_limit::RateLimiter;
pub use result::{DiscoveryResult, RunError, RunOutcome, RunStage, ScheduleState};
pub use retry::{RetryPolicy, retry_with_backoff};
pub use source_config::{
    AdapterParams, DayOfWeek, Schedule, SourceConfig, SourceFilters,
};
pub use workflow::{BrowserWorkflow, CredentialSlots, StepAction, WorkflowStep};
