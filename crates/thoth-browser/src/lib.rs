//! Thoth Browser - Headless-browser workflow engine
//!
//! Runs declarative step sequences (navigate/type/click/wait/extract)
//! against a bounded pool of browser contexts. Used by the browser-kind
//! adapter for sources without APIs.

pub mod driver;
pub mod engine;
pub mod pool;
pub mod session;

pub use engine::{RawRecord, WorkflowEngine, WorkflowParams, WorkflowStats};
pub use pool::{ContextGuard, ContextPool};
pub use session::{SavedCookie, SavedSession, SessionStore};
