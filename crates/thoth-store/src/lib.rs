//! Thoth Store - Persistence for the discovery engine
//!
//! DuckDB is the canonical store for source configs, schedule state and
//! run audit records; source configs are additionally mirrored to
//! human-editable JSON files which are reconciled at startup.

pub mod config_store;
pub mod db;
pub mod results;
pub mod schedule_state;

pub use config_store::ConfigStore;
pub use db::Database;
pub use results::ResultStore;
pub use schedule_state::ScheduleStateStore;
