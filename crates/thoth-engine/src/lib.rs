//! Thoth Engine - Discovery orchestration
//!
//! Ties the pieces together: deduplication and merge, relevance
//! filtering, the discovery manager that executes one run, and the
//! scheduler daemon that dispatches runs on cadence.

pub mod context;
pub mod filter;
pub mod manager;
pub mod merge;
pub mod schedule;
pub mod scheduler;

pub use context::CoreContext;
pub use filter::{FilterOutcome, RejectReason, apply as apply_filters};
pub use manager::DiscoveryManager;
pub use merge::merge;
pub use schedule::compute_next_run;
pub use scheduler::{NextRun, Scheduler, SchedulerStatus};
