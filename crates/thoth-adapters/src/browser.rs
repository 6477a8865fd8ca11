//! Browser-kind adapter
//!
//! Delegates fetching to the workflow engine and normalizes the raw
//! extracted records into papers. The run's keywords are injected into
//! any TYPE step flagged as parameterized.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use thoth_browser::{RawRecord, WorkflowEngine, WorkflowParams};
use thoth_core::error::DiscoveryError;
use thoth_core::paper::{Author, Paper, SourceKind, normalize_doi};
use thoth_core::query::NormalizedQuery;
use thoth_core::source_config::BrowserParams;

use crate::{AdapterStats, SourceAdapter, send_paper};

/// Buffer between the engine's extraction and our normalization.
const RECORD_BUFFER: usize = 32;

pub struct BrowserAdapter {
    engine: Arc<WorkflowEngine>,
    params: BrowserParams,
}

impl BrowserAdapter {
    pub(crate) fn new(engine: Arc<WorkflowEngine>, params: BrowserParams) -> Self {
        Self { engine, params }
    }
}

#[async_trait]
impl SourceAdapter for BrowserAdapter {
    fn kind(&self) -> SourceKind {
        SourceKind::Browser
    }

    fn validate(&self, query: &NormalizedQuery) -> Result<(), DiscoveryError> {
        self.params.workflow.validate()?;
        if self.params.workflow.has_parameterized_input() && query.keywords.is_empty() {
            return Err(DiscoveryError::Config(
                "workflow takes a search input but the query has no keywords".to_string(),
            ));
        }
        if self.params.workflow.credentials.is_some()
            && (self.params.username.is_none() || self.params.password.is_none())
        {
            return Err(DiscoveryError::Config(
                "workflow has a credentials slot but no username/password configured"
                    .to_string(),
            ));
        }
        Ok(())
    }

    async fn discover(
        &self,
        query: &NormalizedQuery,
        max_results: usize,
        cancel: &CancellationToken,
        out: &mpsc::Sender<Paper>,
    ) -> Result<AdapterStats, DiscoveryError> {
        self.validate(query)?;

        let workflow_params = WorkflowParams {
            query_text: query.keywords.join(" "),
            session_id: self.params.session_id.clone(),
            username: self.params.username.clone(),
            password: self.params.password.clone(),
        };

        let (record_tx, mut record_rx) = mpsc::channel::<RawRecord>(RECORD_BUFFER);
        let engine = self.engine.clone();
        let workflow = self.params.workflow.clone();

        let exec = async move {
            let result = engine
                .execute(&workflow, &workflow_params, cancel, &record_tx)
                .await;
            drop(record_tx);
            result
        };

        let consume = async {
            let mut stats = AdapterStats::default();
            while let Some(record) = record_rx.recv().await {
                if stats.fetched >= max_results {
                    // Drain the channel so the engine is not blocked on a
                    // full buffer; extra records are dropped.
                    continue;
                }
                match record_to_paper(record) {
                    Ok(paper) => {
                        send_paper(out, paper, cancel).await?;
                        stats.fetched += 1;
                    }
                    Err(e) => {
                        log::debug!("browser: skipping record: {e}");
                        stats.parse_errors += 1;
                    }
                }
            }
            Ok::<AdapterStats, DiscoveryError>(stats)
        };

        let (exec_result, consume_result) = tokio::join!(exec, consume);
        let stats = consume_result?;
        match exec_result {
            Ok(_) => Ok(stats),
            // Workflow failure after some extraction still surfaces as an
            // adapter error; the manager decides between PARTIAL and FAILED.
            Err(e) => Err(e),
        }
    }
}

fn field<'a>(record: &'a RawRecord, key: &str) -> Option<&'a str> {
    record
        .get(key)
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

/// Normalize one extracted record. Recognized fields: `title`, `authors`
/// (`;`- or `,`-separated), `year`, `abstract`, `doi`, `venue`, `url`.
fn record_to_paper(record: RawRecord) -> Result<Paper, DiscoveryError> {
    let title = field(&record, "title").unwrap_or_default().to_string();
    let mut paper = Paper::new(SourceKind::Browser, title);

    if let Some(authors) = field(&record, "authors") {
        let separator = if authors.contains(';') { ';' } else { ',' };
        paper.authors = authors
            .split(separator)
            .map(str::trim)
            .filter(|a| !a.is_empty())
            .map(Author::from_full_name)
            .collect();
    }
    paper.year = field(&record, "year").and_then(|y| {
        let digits: String = y.chars().filter(char::is_ascii_digit).collect();
        digits.get(0..4).and_then(|d| d.parse().ok())
    });
    paper.abstract_text = field(&record, "abstract").map(str::to_string);
    paper.ids.doi = field(&record, "doi").and_then(normalize_doi);
    paper.venue = field(&record, "venue").map(str::to_string);
    paper.open_access_url = field(&record, "url").map(str::to_string);
    paper.validate()?;
    Ok(paper)
}
