//! Workflow execution over pooled browser contexts
//!
//! Each workflow runs in an isolated context acquired through the pool;
//! steps advance PENDING -> RUNNING -> SUCCEEDED|FAILED with per-step
//! retries. The browser itself launches lazily on first use.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use thoth_core::config::BrowserSettings;
use thoth_core::error::DiscoveryError;
use thoth_core::rate_limit::RateLimiter;
use thoth_core::retry::{RetryPolicy, retry_with_backoff};
use thoth_core::workflow::{BrowserWorkflow, CredentialSlots, StepAction, WorkflowStep};

use crate::driver::{self, BrowserHandle};
use crate::pool::ContextPool;
use crate::session::{SavedSession, SessionStore};

pub use crate::driver::RawRecord;

/// Per-step attempt timeout.
const STEP_TIMEOUT: Duration = Duration::from_secs(60);

/// Rate-limiter bucket pacing context creation.
const BROWSER_ENDPOINT: &str = "browser";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StepState {
    Pending,
    Running,
    Succeeded,
    Failed,
}

/// Values injected into a workflow at run time.
#[derive(Debug, Clone, Default)]
pub struct WorkflowParams {
    /// Joined keyword string for parameterized TYPE steps.
    pub query_text: String,
    /// Saved session to restore and re-save around the run.
    pub session_id: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct WorkflowStats {
    pub steps_run: usize,
    pub records_extracted: usize,
}

/// Executes browser workflows against a bounded context pool.
pub struct WorkflowEngine {
    settings: BrowserSettings,
    limiter: Arc<RateLimiter>,
    pool: ContextPool,
    sessions: SessionStore,
    browser: tokio::sync::OnceCell<BrowserHandle>,
}

impl WorkflowEngine {
    pub fn new(
        settings: BrowserSettings,
        limiter: Arc<RateLimiter>,
        sessions_dir: &std::path::Path,
    ) -> Result<Self, DiscoveryError> {
        let sessions = SessionStore::new(sessions_dir)
            .map_err(|e| DiscoveryError::Config(format!("session store: {e}")))?;
        Ok(Self {
            pool: ContextPool::new(settings.max_concurrent_contexts),
            settings,
            limiter,
            sessions,
            browser: tokio::sync::OnceCell::new(),
        })
    }

    pub fn pool(&self) -> &ContextPool {
        &self.pool
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    /// Run one workflow in a fresh pooled context, streaming extracted
    /// records to `out`. The context is released on every exit path.
    pub async fn execute(
        &self,
        workflow: &BrowserWorkflow,
        params: &WorkflowParams,
        cancel: &CancellationToken,
        out: &mpsc::Sender<RawRecord>,
    ) -> Result<WorkflowStats, DiscoveryError> {
        workflow.validate()?;
        if cancel.is_cancelled() {
            return Err(DiscoveryError::Cancelled);
        }

        if let Err(e) = self.sessions.sweep_expired(self.settings.session_max_age_days) {
            log::warn!("session sweep failed: {e}");
        }

        self.limiter.acquire(BROWSER_ENDPOINT, cancel).await?;
        let mut guard = self.pool.acquire(cancel).await?;

        let browser = self
            .browser
            .get_or_try_init(BrowserHandle::launch)
            .await?;
        let page = browser.new_context().await?;
        guard.attach(page.clone());

        let loaded_session = match &params.session_id {
            Some(id) => match self.sessions.load(id) {
                Ok(session) => session,
                Err(e) => {
                    log::warn!("cannot load session {id}: {e}");
                    None
                }
            },
            None => None,
        };
        if let Some(session) = &loaded_session {
            // Cookies carry their domain, so they restore pre-navigation;
            // localStorage needs the origin and waits for the first page.
            driver::restore_session(&page, &SavedSession {
                cookies: session.cookies.clone(),
                local_storage: Vec::new(),
                created_at: session.created_at,
            })
            .await?;
        }

        let mut states = vec![StepState::Pending; workflow.steps.len()];
        let mut stats = WorkflowStats::default();
        let mut navigated = false;
        let policy = RetryPolicy::browser_step();

        for (i, step) in workflow.steps.iter().enumerate() {
            if cancel.is_cancelled() {
                return Err(DiscoveryError::Cancelled);
            }
            states[i] = StepState::Running;
            tokio::time::sleep(driver::action_delay()).await;

            let label = format!("step {}/{} ({:?})", i + 1, workflow.steps.len(), step.action);
            let result = retry_with_backoff(&policy, &label, cancel, || {
                self.run_step(
                    &page,
                    step,
                    workflow.credentials.as_ref(),
                    params,
                    cancel,
                    out,
                    navigated,
                    &loaded_session,
                )
            })
            .await;

            match result {
                Ok(extracted) => {
                    states[i] = StepState::Succeeded;
                    stats.steps_run += 1;
                    stats.records_extracted += extracted;
                    if step.action == StepAction::Navigate {
                        navigated = true;
                    }
                }
                Err(e) => {
                    states[i] = StepState::Failed;
                    let succeeded = states
                        .iter()
                        .filter(|s| **s == StepState::Succeeded)
                        .count();
                    log::warn!(
                        "workflow aborted at {label} after {succeeded} completed steps: {e}"
                    );
                    return Err(match e {
                        DiscoveryError::Cancelled => DiscoveryError::Cancelled,
                        other => DiscoveryError::PermanentRemote {
                            status: None,
                            message: format!("{label} failed: {other}"),
                        },
                    });
                }
            }
        }
        debug_assert!(states.iter().all(|s| *s == StepState::Succeeded));

        if let Some(id) = &params.session_id {
            match driver::capture_session(&page).await {
                Ok(session) => {
                    if let Err(e) = self.sessions.save(id, &session) {
                        log::warn!("cannot save session {id}: {e}");
                    }
                }
                Err(e) => log::warn!("cannot capture session {id}: {e}"),
            }
        }

        Ok(stats)
    }

    /// One attempt of one step. Returns extracted-record count.
    #[allow(clippy::too_many_arguments)]
    async fn run_step(
        &self,
        page: &chromiumoxide::Page,
        step: &WorkflowStep,
        credentials: Option<&CredentialSlots>,
        params: &WorkflowParams,
        cancel: &CancellationToken,
        out: &mpsc::Sender<RawRecord>,
        navigated_before: bool,
        loaded_session: &Option<SavedSession>,
    ) -> Result<usize, DiscoveryError> {
        match step.action {
            StepAction::Navigate => {
                let url = step.url.as_deref().unwrap_or_default();
                tokio::time::timeout(STEP_TIMEOUT, driver::navigate(page, url))
                    .await
                    .map_err(|_| step_timeout(step))??;
                if !navigated_before {
                    self.prepare_first_page(page, credentials, params, loaded_session)
                        .await?;
                }
                Ok(0)
            }
            StepAction::Type => {
                let selector = step.selector.as_deref().unwrap_or_default();
                let text = if step.parameterized {
                    params.query_text.as_str()
                } else {
                    step.text.as_deref().unwrap_or_default()
                };
                tokio::time::timeout(STEP_TIMEOUT, driver::type_text(page, selector, text))
                    .await
                    .map_err(|_| step_timeout(step))??;
                Ok(0)
            }
            StepAction::Click => {
                let selector = step.selector.as_deref().unwrap_or_default();
                tokio::time::timeout(STEP_TIMEOUT, driver::click(page, selector))
                    .await
                    .map_err(|_| step_timeout(step))??;
                Ok(0)
            }
            StepAction::Wait => {
                match (&step.selector, step.wait_ms) {
                    (Some(selector), _) => {
                        driver::wait_for_selector(page, selector, STEP_TIMEOUT).await?;
                    }
                    (None, Some(ms)) => {
                        tokio::select! {
                            _ = tokio::time::sleep(Duration::from_millis(ms)) => {}
                            _ = cancel.cancelled() => return Err(DiscoveryError::Cancelled),
                        }
                    }
                    (None, None) => {}
                }
                Ok(0)
            }
            StepAction::Extract => {
                let selector = step.selector.as_deref().unwrap_or_default();
                let fields = step.fields.clone().unwrap_or_default();
                let records = tokio::time::timeout(STEP_TIMEOUT, driver::extract(page, selector, &fields))
                    .await
                    .map_err(|_| step_timeout(step))??;
                let n = records.len();
                for record in records {
                    tokio::select! {
                        sent = out.send(record) => {
                            if sent.is_err() {
                                // Consumer hung up; nothing left to emit to.
                                return Err(DiscoveryError::Cancelled);
                            }
                        }
                        _ = cancel.cancelled() => return Err(DiscoveryError::Cancelled),
                    }
                }
                Ok(n)
            }
        }
    }

    /// First-navigation housekeeping: storage isolation, session
    /// localStorage, credential fill.
    async fn prepare_first_page(
        &self,
        page: &chromiumoxide::Page,
        credentials: Option<&CredentialSlots>,
        params: &WorkflowParams,
        loaded_session: &Option<SavedSession>,
    ) -> Result<(), DiscoveryError> {
        match loaded_session {
            Some(session) if !session.local_storage.is_empty() => {
                driver::restore_session(page, &SavedSession {
                    cookies: Vec::new(),
                    local_storage: session.local_storage.clone(),
                    created_at: session.created_at,
                })
                .await?;
            }
            Some(_) => {}
            None => driver::clear_local_storage(page).await?,
        }

        if let (Some(slots), Some(username), Some(password)) =
            (credentials, &params.username, &params.password)
        {
            driver::type_text(page, &slots.username_selector, username).await?;
            driver::type_text(page, &slots.password_selector, password).await?;
        }
        Ok(())
    }
}

fn step_timeout(step: &WorkflowStep) -> DiscoveryError {
    DiscoveryError::TransientRemote {
        status: None,
        message: format!("{:?} step timed out after {STEP_TIMEOUT:?}", step.action),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn engine(dir: &std::path::Path) -> WorkflowEngine {
        WorkflowEngine::new(
            BrowserSettings::default(),
            Arc::new(RateLimiter::new()),
            dir,
        )
        .unwrap()
    }

    fn valid_workflow() -> BrowserWorkflow {
        let mut fields = BTreeMap::new();
        fields.insert("title".to_string(), ".title".to_string());
        BrowserWorkflow {
            steps: vec![
                WorkflowStep {
                    action: StepAction::Navigate,
                    selector: None,
                    url: Some("https://example.org".to_string()),
                    text: None,
                    fields: None,
                    parameterized: false,
                    wait_ms: None,
                },
                WorkflowStep {
                    action: StepAction::Extract,
                    selector: Some(".result".to_string()),
                    url: None,
                    text: None,
                    fields: Some(fields),
                    parameterized: false,
                    wait_ms: None,
                },
            ],
            credentials: None,
        }
    }

    #[tokio::test]
    async fn invalid_workflow_fails_before_launch() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine(dir.path());
        let (tx, _rx) = mpsc::channel(4);

        let bad = BrowserWorkflow {
            steps: vec![],
            credentials: None,
        };
        let err = engine
            .execute(&bad, &WorkflowParams::default(), &CancellationToken::new(), &tx)
            .await
            .unwrap_err();
        assert!(matches!(err, DiscoveryError::Config(_)));
    }

    #[tokio::test]
    async fn cancelled_before_start() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine(dir.path());
        let (tx, _rx) = mpsc::channel(4);

        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = engine
            .execute(&valid_workflow(), &WorkflowParams::default(), &cancel, &tx)
            .await
            .unwrap_err();
        assert!(err.is_cancelled());
    }

    #[test]
    fn pool_capacity_follows_settings() {
        let dir = tempfile::tempdir().unwrap();
        let engine = WorkflowEngine::new(
            BrowserSettings {
                max_concurrent_contexts: 2,
                ..BrowserSettings::default()
            },
            Arc::new(RateLimiter::new()),
            dir.path(),
        )
        .unwrap();
        assert_eq!(engine.pool().capacity(), 2);
    }
}
