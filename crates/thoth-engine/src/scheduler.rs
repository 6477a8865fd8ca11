//! Background scheduler
//!
//! A single poll loop evaluates schedule state every
//! `poll_interval_seconds` and dispatches due runs to a bounded worker
//! pool. One run per source at a time; different sources run
//! concurrently up to the pool limit. Schedule state is persisted
//! atomically after every run, giving at-least-once execution across
//! restarts.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Utc};
use tokio::sync::{Notify, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use thoth_core::config::SchedulerConfig;
use thoth_core::result::{RunOutcome, ScheduleState};
use thoth_core::source_config::SourceConfig;
use thoth_store::{ConfigStore, ResultStore, ScheduleStateStore};

use crate::manager::DiscoveryManager;
use crate::schedule::compute_next_run;

#[derive(Debug, Clone)]
pub struct NextRun {
    pub source_name: String,
    pub next_run_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct SchedulerStatus {
    pub running: bool,
    pub sources_total: usize,
    pub sources_enabled: usize,
    pub next_runs: Vec<NextRun>,
}

#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<Inner>,
}

struct Inner {
    cfg: SchedulerConfig,
    result_retention_days: u32,
    configs: Arc<ConfigStore>,
    states: Arc<ScheduleStateStore>,
    results: Arc<ResultStore>,
    manager: Arc<DiscoveryManager>,
    workers: Arc<Semaphore>,
    in_flight: Mutex<HashSet<String>>,
    kick: Notify,
    running: AtomicBool,
    cancel: Mutex<Option<CancellationToken>>,
    poll_task: Mutex<Option<JoinHandle<()>>>,
}

impl Scheduler {
    pub fn new(
        cfg: SchedulerConfig,
        result_retention_days: u32,
        configs: Arc<ConfigStore>,
        states: Arc<ScheduleStateStore>,
        results: Arc<ResultStore>,
        manager: Arc<DiscoveryManager>,
    ) -> Self {
        let workers = Arc::new(Semaphore::new(cfg.worker_pool_size.max(1)));
        Self {
            inner: Arc::new(Inner {
                cfg,
                result_retention_days,
                configs,
                states,
                results,
                manager,
                workers,
                in_flight: Mutex::new(HashSet::new()),
                kick: Notify::new(),
                running: AtomicBool::new(false),
                cancel: Mutex::new(None),
                poll_task: Mutex::new(None),
            }),
        }
    }

    /// Start the poll loop. Recovers dangling runs from a previous
    /// process first. Idempotent while running.
    pub fn start(&self) {
        if self.inner.running.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Err(e) = self.inner.results.recover_dangling() {
            log::warn!("crash recovery failed: {e}");
        }

        let cancel = CancellationToken::new();
        *self.inner.cancel.lock().unwrap() = Some(cancel.clone());

        let inner = self.inner.clone();
        let handle = tokio::spawn(async move {
            let poll = Duration::from_secs(inner.cfg.poll_interval_seconds.max(1));
            log::info!("scheduler started (poll every {poll:?})");
            loop {
                if let Err(e) = Inner::tick(&inner, &cancel) {
                    log::error!("scheduler tick failed: {e}");
                }
                tokio::select! {
                    _ = tokio::time::sleep(poll) => {}
                    _ = inner.kick.notified() => {}
                    _ = cancel.cancelled() => break,
                }
            }
            log::info!("scheduler stopped");
        });
        *self.inner.poll_task.lock().unwrap() = Some(handle);
    }

    /// Cooperative stop: cancel in-flight runs, then wait up to
    /// `timeout` for them to wind down.
    pub async fn stop(&self, timeout: Duration) {
        if !self.inner.running.swap(false, Ordering::SeqCst) {
            return;
        }
        if let Some(cancel) = self.inner.cancel.lock().unwrap().take() {
            cancel.cancel();
        }

        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let busy = !self.inner.in_flight.lock().unwrap().is_empty();
            if !busy {
                break;
            }
            if tokio::time::Instant::now() >= deadline {
                log::warn!("scheduler stop timed out with runs in flight");
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        let handle = self.inner.poll_task.lock().unwrap().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }

    /// Manually request a run. Idempotent: a trigger while a run for
    /// the source is in flight is dropped (the in-flight run satisfies
    /// it).
    pub fn trigger(&self, source_name: &str) -> Result<()> {
        if self.inner.in_flight.lock().unwrap().contains(source_name) {
            log::debug!("trigger for {source_name} dropped: run already in flight");
            return Ok(());
        }
        let config = self
            .inner
            .configs
            .get(source_name)?
            .ok_or_else(|| anyhow::anyhow!("unknown source {source_name:?}"))?;
        if !config.is_active {
            anyhow::bail!("source {source_name:?} is not active");
        }

        let mut state = self
            .inner
            .states
            .get(source_name)?
            .unwrap_or_else(|| new_state(source_name, Utc::now()));
        state.next_run_at = Utc::now();
        self.inner.states.upsert(&state)?;
        self.inner.kick.notify_waiters();
        Ok(())
    }

    pub fn status(&self) -> Result<SchedulerStatus> {
        let configs = self.inner.configs.list(false)?;
        let sources_enabled = configs
            .iter()
            .filter(|c| c.is_active && c.schedule.enabled)
            .count();
        let next_runs = self
            .inner
            .states
            .list()?
            .into_iter()
            .map(|s| NextRun {
                source_name: s.source_name,
                next_run_at: s.next_run_at,
            })
            .collect();
        Ok(SchedulerStatus {
            running: self.inner.running.load(Ordering::SeqCst),
            sources_total: configs.len(),
            sources_enabled,
            next_runs,
        })
    }
}

fn new_state(source_name: &str, next_run_at: DateTime<Utc>) -> ScheduleState {
    ScheduleState {
        source_name: source_name.to_string(),
        last_run_at: None,
        next_run_at,
        last_run_outcome: None,
        last_error: None,
    }
}

impl Inner {
    /// One schedule tick: sweep retention, dispatch every due source.
    fn tick(inner: &Arc<Inner>, cancel: &CancellationToken) -> Result<()> {
        if let Err(e) = inner.results.sweep_expired(inner.result_retention_days) {
            log::warn!("result retention sweep failed: {e}");
        }

        let now = Utc::now();
        for config in inner.configs.list(true)? {
            if !config.schedule.enabled {
                continue;
            }
            let state = inner.states.get(&config.name)?;
            let due = state
                .as_ref()
                .map(|s| s.next_run_at <= now)
                .unwrap_or(true);
            if !due {
                continue;
            }
            {
                let mut in_flight = inner.in_flight.lock().unwrap();
                if !in_flight.insert(config.name.clone()) {
                    continue;
                }
            }
            Self::dispatch(inner.clone(), config, cancel.clone());
        }
        Ok(())
    }

    /// Spawn one run. Pool admission happens inside the task so a
    /// saturated pool never blocks the poll loop.
    fn dispatch(inner: Arc<Inner>, config: SourceConfig, cancel: CancellationToken) {
        tokio::spawn(async move {
            let name = config.name.clone();

            let permit = tokio::select! {
                permit = inner.workers.clone().acquire_owned() => permit,
                _ = cancel.cancelled() => {
                    inner.in_flight.lock().unwrap().remove(&name);
                    return;
                }
            };
            let _permit = match permit {
                Ok(p) => p,
                Err(_) => {
                    inner.in_flight.lock().unwrap().remove(&name);
                    return;
                }
            };

            let run_cancel = cancel.child_token();
            let result = inner.manager.run(&config, &run_cancel).await;

            let completion = Utc::now();
            let previous = inner.states.get(&name).ok().flatten();
            let state = ScheduleState {
                source_name: name.clone(),
                last_run_at: Some(completion),
                next_run_at: compute_next_run(&config.schedule, completion, Utc::now()),
                last_run_outcome: Some(result.outcome),
                last_error: match result.outcome {
                    RunOutcome::Success => None,
                    _ => result
                        .errors
                        .last()
                        .map(|e| e.message.clone())
                        .or_else(|| previous.and_then(|p| p.last_error)),
                },
            };
            if let Err(e) = inner.states.upsert(&state) {
                log::error!("{name}: cannot persist schedule state: {e}");
            }
            inner.in_flight.lock().unwrap().remove(&name);
        });
    }
}
