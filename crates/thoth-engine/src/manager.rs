//! Discovery manager: executes one run for one source config
//!
//! INIT -> BUILDING_QUERY -> FETCHING -> MERGING -> FILTERING ->
//! EMITTING -> DONE. Single-adapter runs stream straight through the
//! filter to the emission channel; fan-out runs buffer, merge, then
//! filter and emit. Adapter failures are isolated from each other.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use thoth_adapters::AdapterProvider;
use thoth_analyzer::{CorpusContext, CorpusReader, analyze_corpus, build_query};
use thoth_core::config::DiscoveryConfig;
use thoth_core::paper::{Paper, SourceKind};
use thoth_core::result::{DiscoveryResult, RunError, RunOutcome, RunStage};
use thoth_core::source_config::SourceConfig;
use thoth_store::ResultStore;

use crate::{filter, merge};

/// Buffer between adapters and the filter/emit stage.
const PAPER_BUFFER: usize = 64;

/// Hard per-run ceiling.
const MAX_RUN_TIMEOUT: Duration = Duration::from_secs(600);

/// Per-paper allowance for the run timeout.
const PER_PAPER_TIMEOUT: Duration = Duration::from_secs(2);

pub struct DiscoveryManager {
    provider: Arc<dyn AdapterProvider>,
    results: Arc<ResultStore>,
    corpus: Arc<dyn CorpusReader>,
    emitter: mpsc::Sender<Paper>,
    defaults: DiscoveryConfig,
}

impl DiscoveryManager {
    pub fn new(
        provider: Arc<dyn AdapterProvider>,
        results: Arc<ResultStore>,
        corpus: Arc<dyn CorpusReader>,
        emitter: mpsc::Sender<Paper>,
        defaults: DiscoveryConfig,
    ) -> Self {
        Self {
            provider,
            results,
            corpus,
            emitter,
            defaults,
        }
    }

    /// Execute one discovery run, emitting accepted papers as they are
    /// produced. The result is persisted on every outcome, including
    /// cancellation.
    pub async fn run(
        &self,
        config: &SourceConfig,
        cancel: &CancellationToken,
    ) -> DiscoveryResult {
        let mut result = DiscoveryResult::begin(&config.name);
        let row_id = match self.results.begin_run(&config.name, result.started_at) {
            Ok(id) => Some(id),
            Err(e) => {
                log::warn!("{}: cannot open audit row: {e}", config.name);
                None
            }
        };

        self.execute(config, cancel, &mut result).await;
        result.finished_at = Some(Utc::now());

        if let Some(id) = row_id {
            if let Err(e) = self.results.finish_run(id, &result) {
                log::warn!("{}: cannot persist run result: {e}", config.name);
            }
        }
        log::info!(
            "{}: {} ({} fetched, {} after dedup, {} emitted, {} parse errors)",
            config.name,
            result.outcome,
            result.candidates_fetched,
            result.candidates_after_dedup,
            result.candidates_after_filter,
            result.parse_errors,
        );
        result
    }

    async fn execute(
        &self,
        config: &SourceConfig,
        cancel: &CancellationToken,
        result: &mut DiscoveryResult,
    ) {
        let corpus_ctx = match analyze_corpus(self.corpus.as_ref()) {
            Ok(ctx) => ctx,
            Err(e) => {
                // A broken corpus degrades scoring, not the whole run.
                log::warn!("{}: corpus analysis failed: {e}", config.name);
                result.errors.push(RunError::new(
                    RunStage::BuildingQuery,
                    format!("corpus analysis failed: {e}"),
                ));
                CorpusContext::default()
            }
        };

        let query = match build_query(config, &corpus_ctx) {
            Ok(q) => q,
            Err(e) => {
                result
                    .errors
                    .push(RunError::new(RunStage::BuildingQuery, e.to_string()));
                result.outcome = RunOutcome::Failed;
                return;
            }
        };

        let kinds: Vec<SourceKind> = if config.fan_out && config.kind.is_api() {
            SourceKind::ALL
                .into_iter()
                .filter(|k| k.is_api())
                .collect()
        } else {
            vec![config.kind]
        };

        let mut adapters = Vec::new();
        for kind in kinds {
            match self.provider.adapter(kind, config).await {
                Ok(adapter) => match adapter.validate(&query) {
                    Ok(()) => adapters.push((kind, adapter)),
                    Err(e) => result
                        .errors
                        .push(RunError::new(RunStage::Fetching, format!("{kind}: {e}"))),
                },
                Err(e) => result
                    .errors
                    .push(RunError::new(RunStage::Fetching, format!("{kind}: {e}"))),
            }
        }
        if adapters.is_empty() {
            result.outcome = RunOutcome::Failed;
            return;
        }

        let max_results = config.max_papers(self.defaults.default_max_articles);
        let run_timeout = MAX_RUN_TIMEOUT.min(PER_PAPER_TIMEOUT * max_results as u32);
        let threshold = config
            .filters
            .relevance_threshold
            .unwrap_or(self.defaults.default_relevance_threshold);
        let fan_out = adapters.len() > 1;
        let child = cancel.child_token();

        let phase = self.fetch_filter_emit(
            config,
            &query,
            adapters,
            max_results,
            fan_out,
            threshold,
            &corpus_ctx,
            &child,
            result,
        );
        if tokio::time::timeout(run_timeout, phase).await.is_err() {
            child.cancel();
            result.errors.push(RunError::new(
                RunStage::Fetching,
                format!("run timed out after {run_timeout:?}"),
            ));
        }

        result.outcome = if cancel.is_cancelled() {
            RunOutcome::Cancelled
        } else if result.errors.is_empty() {
            RunOutcome::Success
        } else if result.candidates_after_filter > 0 {
            RunOutcome::Partial
        } else {
            RunOutcome::Failed
        };
    }

    /// FETCHING through EMITTING under the run timeout.
    #[allow(clippy::too_many_arguments)]
    async fn fetch_filter_emit(
        &self,
        config: &SourceConfig,
        query: &thoth_core::query::NormalizedQuery,
        adapters: Vec<(SourceKind, Box<dyn thoth_adapters::SourceAdapter>)>,
        max_results: usize,
        fan_out: bool,
        threshold: f64,
        corpus_ctx: &CorpusContext,
        child: &CancellationToken,
        result: &mut DiscoveryResult,
    ) {
        let (tx, mut rx) = mpsc::channel::<Paper>(PAPER_BUFFER);

        let fetch = {
            let tx = tx;
            async move {
                let futures = adapters.into_iter().map(|(kind, adapter)| {
                    let tx = tx.clone();
                    let child = child.clone();
                    async move {
                        let outcome = adapter.discover(query, max_results, &child, &tx).await;
                        (kind, outcome)
                    }
                });
                let outcomes = futures_util::future::join_all(futures).await;
                drop(tx);
                outcomes
            }
        };

        let consume = async {
            let mut buffered = Vec::new();
            while let Some(paper) = rx.recv().await {
                result.candidates_fetched += 1;
                if fan_out {
                    buffered.push(paper);
                    continue;
                }
                result.candidates_after_dedup += 1;
                match filter::check_paper(&paper, &config.filters, threshold, corpus_ctx) {
                    None => {
                        if self.emit(paper.clone(), child).await.is_err() {
                            child.cancel();
                            break;
                        }
                        result.candidates_after_filter += 1;
                        result.papers.push(paper);
                    }
                    Some(reason) => {
                        log::debug!("{}: rejected {:?}: {reason}", config.name, paper.title);
                    }
                }
            }
            buffered
        };

        let (outcomes, buffered) = tokio::join!(fetch, consume);

        for (kind, outcome) in outcomes {
            match outcome {
                Ok(stats) => result.parse_errors += stats.parse_errors,
                Err(e) if e.is_cancelled() => {}
                Err(e) => {
                    log::warn!("{}: {kind} adapter failed: {e}", config.name);
                    result
                        .errors
                        .push(RunError::new(RunStage::Fetching, format!("{kind}: {e}")));
                }
            }
        }

        if fan_out {
            let merged = merge::merge(buffered);
            result.candidates_after_dedup = merged.len();
            let filtered = filter::apply(merged, &config.filters, threshold, corpus_ctx);
            for (paper, reason) in &filtered.rejected {
                log::debug!("{}: rejected {:?}: {reason}", config.name, paper.title);
            }
            for paper in filtered.accepted {
                if self.emit(paper.clone(), child).await.is_err() {
                    break;
                }
                result.candidates_after_filter += 1;
                result.papers.push(paper);
            }
        }
    }

    /// Hand one paper to the downstream consumer. Blocks when the
    /// consumer is slow; that backpressure is intentional.
    async fn emit(
        &self,
        paper: Paper,
        cancel: &CancellationToken,
    ) -> Result<(), thoth_core::error::DiscoveryError> {
        tokio::select! {
            sent = self.emitter.send(paper) => {
                sent.map_err(|_| thoth_core::error::DiscoveryError::Cancelled)
            }
            _ = cancel.cancelled() => Err(thoth_core::error::DiscoveryError::Cancelled),
        }
    }
}
