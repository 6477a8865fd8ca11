//! Thoth Adapters - Per-provider discovery adapters
//!
//! Each adapter translates a normalized query into one provider's
//! protocol, paginates, and yields normalized papers over a channel.
//! All network calls go through the shared rate limiter and the unified
//! retry policy.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use thoth_browser::WorkflowEngine;
use thoth_core::config::CoreConfig;
use thoth_core::error::DiscoveryError;
use thoth_core::paper::{Paper, SourceKind};
use thoth_core::query::NormalizedQuery;
use thoth_core::rate_limit::RateLimiter;
use thoth_core::retry::{RetryPolicy, retry_with_backoff};
use thoth_core::source_config::{AdapterParams, SourceConfig};

pub mod arxiv;
pub mod browser;
pub mod crossref;
pub mod openalex;
pub mod pubmed;
pub mod semantic_scholar;

pub use arxiv::ArxivAdapter;
pub use browser::BrowserAdapter;
pub use crossref::CrossrefAdapter;
pub use openalex::OpenalexAdapter;
pub use pubmed::PubmedAdapter;
pub use semantic_scholar::SemanticScholarAdapter;

/// Counters an adapter reports back to the discovery manager.
#[derive(Debug, Clone, Copy, Default)]
pub struct AdapterStats {
    /// Papers pushed to the channel.
    pub fetched: usize,
    /// Items dropped at normalization.
    pub parse_errors: usize,
}

/// One provider behind a uniform capability set.
///
/// `discover` pushes papers as pages arrive; the sequence is finite and
/// not restartable. Every yielded paper carries this adapter's
/// provenance and passes `Paper::validate`.
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    fn kind(&self) -> SourceKind;

    fn rate_limit_id(&self) -> &'static str {
        self.kind().rate_limit_id()
    }

    /// Check the query is answerable before any network call.
    fn validate(&self, query: &NormalizedQuery) -> Result<(), DiscoveryError>;

    async fn discover(
        &self,
        query: &NormalizedQuery,
        max_results: usize,
        cancel: &CancellationToken,
        out: &mpsc::Sender<Paper>,
    ) -> Result<AdapterStats, DiscoveryError>;
}

/// Source of adapters for the discovery manager. The production
/// implementation is [`AdapterFactory`]; tests substitute their own.
#[async_trait]
pub trait AdapterProvider: Send + Sync {
    async fn adapter(
        &self,
        kind: SourceKind,
        source: &SourceConfig,
    ) -> Result<Box<dyn SourceAdapter>, DiscoveryError>;
}

#[async_trait]
impl AdapterProvider for AdapterFactory {
    async fn adapter(
        &self,
        kind: SourceKind,
        source: &SourceConfig,
    ) -> Result<Box<dyn SourceAdapter>, DiscoveryError> {
        self.adapter_for_kind(kind, source).await
    }
}

/// Builds adapters for source configs.
///
/// Heavy resources are lazy: the browser workflow engine (and its
/// process-level browser pool) is constructed on the first browser-kind
/// request and memoized.
pub struct AdapterFactory {
    http: reqwest::Client,
    limiter: Arc<RateLimiter>,
    retry: RetryPolicy,
    config: CoreConfig,
    sessions_dir: PathBuf,
    browser_engine: tokio::sync::OnceCell<Arc<WorkflowEngine>>,
}

impl AdapterFactory {
    pub fn new(
        config: CoreConfig,
        limiter: Arc<RateLimiter>,
        sessions_dir: PathBuf,
    ) -> Result<Self, DiscoveryError> {
        let http = thoth_core::http::build_client(config.contact_email.as_deref())?;

        // Apply configured bucket overrides up front. An API key lifts
        // PubMed to its documented keyed tier unless explicitly overridden.
        for (endpoint, settings) in &config.adapters {
            if let Some(rate) = settings.rate_limit_override {
                let (_, burst) = thoth_core::rate_limit::default_params(endpoint);
                limiter.configure(endpoint, rate, burst);
            } else if endpoint == "pubmed" && settings.api_key.is_some() {
                limiter.configure("pubmed", 10.0, 10.0);
            }
        }

        Ok(Self {
            http,
            limiter,
            retry: RetryPolicy::default(),
            config,
            sessions_dir,
            browser_engine: tokio::sync::OnceCell::new(),
        })
    }

    pub fn limiter(&self) -> Arc<RateLimiter> {
        self.limiter.clone()
    }

    /// Build the adapter for one source config.
    pub async fn adapter_for(
        &self,
        source: &SourceConfig,
    ) -> Result<Box<dyn SourceAdapter>, DiscoveryError> {
        self.adapter_for_kind(source.kind, source).await
    }

    /// Build an adapter of `kind` for `source` (fan-out runs ask for
    /// kinds other than the config's own).
    pub async fn adapter_for_kind(
        &self,
        kind: SourceKind,
        source: &SourceConfig,
    ) -> Result<Box<dyn SourceAdapter>, DiscoveryError> {
        let shared = SharedClient {
            http: self.http.clone(),
            limiter: self.limiter.clone(),
            retry: self.retry,
        };
        let params = if kind == source.kind {
            source.typed_params()?
        } else {
            // Cross-kind fan-out: defaults, the query carries the terms.
            AdapterParams::from_value(kind, &serde_json::Value::Null)?
        };
        let api_key = |id: &str| self.config.api_key(id).map(str::to_string);

        Ok(match params {
            AdapterParams::Arxiv(p) => Box::new(ArxivAdapter::new(shared, p)),
            AdapterParams::Pubmed(p) => {
                Box::new(PubmedAdapter::new(shared, p, api_key("pubmed")))
            }
            AdapterParams::Crossref(p) => {
                Box::new(CrossrefAdapter::new(shared, p, api_key("crossref")))
            }
            AdapterParams::Openalex(p) => Box::new(OpenalexAdapter::new(
                shared,
                p,
                self.config.contact_email.clone(),
            )),
            AdapterParams::SemanticScholar(p) => Box::new(SemanticScholarAdapter::new(
                shared,
                p,
                api_key("semantic_scholar"),
            )),
            AdapterParams::Browser(p) => {
                let engine = self
                    .browser_engine
                    .get_or_try_init(|| async {
                        WorkflowEngine::new(
                            self.config.browser.clone(),
                            self.limiter.clone(),
                            &self.sessions_dir,
                        )
                        .map(Arc::new)
                    })
                    .await?;
                Box::new(BrowserAdapter::new(engine.clone(), p))
            }
        })
    }
}

/// HTTP + rate limiting + retry bundle shared by the API adapters.
#[derive(Clone)]
pub(crate) struct SharedClient {
    pub http: reqwest::Client,
    pub limiter: Arc<RateLimiter>,
    pub retry: RetryPolicy,
}

impl SharedClient {
    /// Fetch one page body with rate limiting and the unified retry
    /// policy. `build` is called once per attempt.
    pub async fn fetch_page(
        &self,
        endpoint: &'static str,
        cancel: &CancellationToken,
        build: impl Fn() -> reqwest::RequestBuilder,
    ) -> Result<String, DiscoveryError> {
        retry_with_backoff(&self.retry, endpoint, cancel, || async {
            self.limiter.acquire(endpoint, cancel).await?;
            let response = build()
                .send()
                .await
                .map_err(|e| DiscoveryError::from_reqwest(&e, endpoint))?;
            let status = response.status();
            if !status.is_success() {
                let retry_after = parse_retry_after(response.headers());
                let body = response.text().await.unwrap_or_default();
                let err =
                    DiscoveryError::from_status(status.as_u16(), endpoint, truncate(&body, 200));
                if let Some(delay) = retry_after {
                    // Provider told us when to come back; wait it out
                    // before the retry loop adds its own backoff.
                    tokio::select! {
                        _ = tokio::time::sleep(delay.min(Duration::from_secs(30))) => {}
                        _ = cancel.cancelled() => return Err(DiscoveryError::Cancelled),
                    }
                }
                return Err(err);
            }
            response
                .text()
                .await
                .map_err(|e| DiscoveryError::from_reqwest(&e, endpoint))
        })
        .await
    }
}

fn parse_retry_after(headers: &reqwest::header::HeaderMap) -> Option<Duration> {
    headers
        .get(reqwest::header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        s.to_string()
    } else {
        let mut end = max;
        while !s.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}...", &s[..end])
    }
}

/// Push one paper, bailing out on cancellation or a hung-up consumer.
pub(crate) async fn send_paper(
    out: &mpsc::Sender<Paper>,
    paper: Paper,
    cancel: &CancellationToken,
) -> Result<(), DiscoveryError> {
    tokio::select! {
        sent = out.send(paper) => {
            sent.map_err(|_| DiscoveryError::Cancelled)
        }
        _ = cancel.cancelled() => Err(DiscoveryError::Cancelled),
    }
}
