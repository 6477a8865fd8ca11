//! Core wiring
//!
//! `CoreContext` replaces global singletons: the embedding application
//! builds one and hands each component only the slice it needs. The
//! emission channel is the sole exit for discovered papers.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::mpsc;

use thoth_adapters::{AdapterFactory, AdapterProvider};
use thoth_analyzer::CorpusReader;
use thoth_core::config::CoreConfig;
use thoth_core::paper::Paper;
use thoth_core::rate_limit::RateLimiter;
use thoth_store::{ConfigStore, Database, ResultStore, ScheduleStateStore};

use crate::manager::DiscoveryManager;
use crate::scheduler::Scheduler;

/// Fully wired discovery core.
///
/// Directory layout under `base_dir`: `thoth.db` (canonical store),
/// `sources/` (per-source JSON documents), `sessions/` (saved browser
/// sessions).
pub struct CoreContext {
    pub config: CoreConfig,
    pub limiter: Arc<RateLimiter>,
    pub configs: Arc<ConfigStore>,
    pub schedule_states: Arc<ScheduleStateStore>,
    pub results: Arc<ResultStore>,
    pub manager: Arc<DiscoveryManager>,
    pub scheduler: Scheduler,
}

impl CoreContext {
    /// Build the core. Must run inside a tokio runtime; with
    /// `scheduler.auto_start` the poll loop spawns immediately.
    ///
    /// `emitter` is the downstream half of the emission channel; the
    /// caller keeps the receiver.
    pub fn init(
        config: CoreConfig,
        base_dir: &Path,
        corpus: Arc<dyn CorpusReader>,
        emitter: mpsc::Sender<Paper>,
    ) -> Result<Self> {
        std::fs::create_dir_all(base_dir)
            .with_context(|| format!("cannot create data dir {}", base_dir.display()))?;

        let limiter = Arc::new(RateLimiter::new());
        let factory = Arc::new(
            AdapterFactory::new(config.clone(), limiter.clone(), base_dir.join("sessions"))
                .map_err(anyhow::Error::from)?,
        );

        let db = Arc::new(Database::open(&base_dir.join("thoth.db"))?);
        let configs = Arc::new(ConfigStore::new(db.clone(), &base_dir.join("sources"))?);
        let schedule_states = Arc::new(ScheduleStateStore::new(db.clone()));
        let results = Arc::new(ResultStore::new(db));

        let report = configs.reconcile()?;
        if report.imported + report.exported + report.skipped > 0 {
            log::info!(
                "config reconciliation: {} imported, {} exported, {} skipped",
                report.imported,
                report.exported,
                report.skipped
            );
        }

        let manager = Arc::new(DiscoveryManager::new(
            factory as Arc<dyn AdapterProvider>,
            results.clone(),
            corpus,
            emitter,
            config.discovery.clone(),
        ));
        let scheduler = Scheduler::new(
            config.scheduler.clone(),
            config.discovery.result_retention_days,
            configs.clone(),
            schedule_states.clone(),
            results.clone(),
            manager.clone(),
        );
        if config.scheduler.auto_start {
            scheduler.start();
        }

        Ok(Self {
            config,
            limiter,
            configs,
            schedule_states,
            results,
            manager,
            scheduler,
        })
    }
}
