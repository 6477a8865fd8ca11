//! CrossRef adapter (REST works API)
//!
//! Cursor-paginated JSON (`cursor=*` then `next-cursor`); date and
//! journal-article filters; always in the polite pool via the shared
//! client's User-Agent. The Plus token, when configured, goes in the
//! documented header.

use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use thoth_core::error::DiscoveryError;
use thoth_core::paper::{Author, Paper, SourceKind, normalize_doi};
use thoth_core::query::NormalizedQuery;
use thoth_core::source_config::CrossrefParams;

use crate::{AdapterStats, SharedClient, SourceAdapter, send_paper};

const ENDPOINT: &str = "crossref";
const BASE_URL: &str = "https://api.crossref.org/works";

/// Rows per page.
const PAGE_SIZE: usize = 100;

pub struct CrossrefAdapter {
    shared: SharedClient,
    params: CrossrefParams,
    api_key: Option<String>,
}

impl CrossrefAdapter {
    pub(crate) fn new(
        shared: SharedClient,
        params: CrossrefParams,
        api_key: Option<String>,
    ) -> Self {
        Self {
            shared,
            params,
            api_key,
        }
    }

    fn page_url(&self, query: &NormalizedQuery, rows: usize, cursor: &str) -> String {
        let mut terms: Vec<&str> = query.keywords.iter().map(String::as_str).collect();
        terms.extend(self.params.keywords.iter().map(String::as_str));
        let mut url = format!(
            "{BASE_URL}?query={}&rows={rows}&cursor={}",
            urlencoding::encode(&terms.join(" ")),
            urlencoding::encode(cursor)
        );

        let mut filters = Vec::new();
        if let Some(from) = query.date_from {
            filters.push(format!("from-pub-date:{from}"));
        }
        if let Some(to) = query.date_to {
            filters.push(format!("until-pub-date:{to}"));
        }
        if self.params.journal_articles_only {
            filters.push("type:journal-article".to_string());
        }
        if !filters.is_empty() {
            url.push_str("&filter=");
            url.push_str(&urlencoding::encode(&filters.join(",")));
        }
        url
    }
}

#[async_trait]
impl SourceAdapter for CrossrefAdapter {
    fn kind(&self) -> SourceKind {
        SourceKind::Crossref
    }

    fn validate(&self, query: &NormalizedQuery) -> Result<(), DiscoveryError> {
        if query.keywords.is_empty() && self.params.keywords.is_empty() {
            return Err(DiscoveryError::Config(
                "crossref query needs at least one keyword".to_string(),
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
        let mut stats = AdapterStats::default();
        let mut cursor = "*".to_string();

        'pages: while stats.fetched < max_results {
            let rows = PAGE_SIZE.min(max_results - stats.fetched);
            let url = self.page_url(query, rows, &cursor);
            let body = self
                .shared
                .fetch_page(ENDPOINT, cancel, || {
                    let mut req = self.shared.http.get(&url);
                    if let Some(token) = &self.api_key {
                        req = req.header("Crossref-Plus-API-Token", format!("Bearer {token}"));
                    }
                    req
                })
                .await?;

            let response: WorksResponse = serde_json::from_str(&body).map_err(|e| {
                DiscoveryError::PermanentRemote {
                    status: None,
                    message: format!("corrupt crossref response: {e}"),
                }
            })?;

            let items = response.message.items;
            let n_items = items.len();
            for item in items {
                match item.into_paper() {
                    Ok(paper) => {
                        send_paper(out, paper, cancel).await?;
                        stats.fetched += 1;
                        if stats.fetched >= max_results {
                            break 'pages;
                        }
                    }
                    Err(e) => {
                        log::debug!("crossref: skipping item: {e}");
                        stats.parse_errors += 1;
                    }
                }
            }

            match response.message.next_cursor {
                Some(next) if n_items == rows => cursor = next,
                _ => break,
            }
        }
        Ok(stats)
    }
}

#[derive(Debug, Deserialize)]
struct WorksResponse {
    message: WorksMessage,
}

#[derive(Debug, Deserialize)]
struct WorksMessage {
    #[serde(default)]
    items: Vec<WorkItem>,
    #[serde(default, rename = "next-cursor")]
    next_cursor: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WorkItem {
    #[serde(rename = "DOI")]
    doi: Option<String>,
    #[serde(default)]
    title: Vec<String>,
    #[serde(default)]
    author: Vec<WorkAuthor>,
    #[serde(default, rename = "abstract")]
    abstract_text: Option<String>,
    #[serde(default)]
    issued: Option<DateParts>,
    #[serde(default, rename = "container-title")]
    container_title: Vec<String>,
    #[serde(default)]
    subject: Vec<String>,
    #[serde(default, rename = "is-referenced-by-count")]
    cited_by: Option<i64>,
    #[serde(default, rename = "URL")]
    url: Option<String>,
    #[serde(default)]
    reference: Vec<WorkReference>,
}

#[derive(Debug, Deserialize)]
struct WorkAuthor {
    #[serde(default)]
    given: Option<String>,
    #[serde(default)]
    family: Option<String>,
    #[serde(default)]
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DateParts {
    #[serde(default, rename = "date-parts")]
    date_parts: Vec<Vec<Option<i64>>>,
}

#[derive(Debug, Deserialize)]
struct WorkReference {
    #[serde(default, rename = "DOI")]
    doi: Option<String>,
}

impl WorkItem {
    fn into_paper(self) -> Result<Paper, DiscoveryError> {
        let title = self.title.first().cloned().unwrap_or_default();
        let mut paper = Paper::new(SourceKind::Crossref, title.trim().to_string());
        paper.ids.doi = self.doi.as_deref().and_then(normalize_doi);
        paper.authors = self
            .author
            .into_iter()
            .filter_map(|a| match a.name {
                Some(name) => Some(Author::from_full_name(name)),
                None => {
                    if a.given.is_none() && a.family.is_none() {
                        None
                    } else {
                        Some(Author::from_parts(a.given, a.family))
                    }
                }
            })
            .collect();
        paper.abstract_text = self
            .abstract_text
            .map(|a| strip_jats(&a))
            .filter(|a| !a.is_empty());
        paper.year = self
            .issued
            .and_then(|d| d.date_parts.first().and_then(|p| p.first().copied().flatten()))
            .map(|y| y as i32);
        paper.venue = self.container_title.into_iter().next();
        paper.concepts = self.subject;
        paper.dedup_concepts();
        paper.citation_count = self.cited_by;
        paper.open_access_url = self.url;
        paper.references = self
            .reference
            .into_iter()
            .filter_map(|r| r.doi.as_deref().and_then(normalize_doi))
            .collect();
        paper.validate()?;
        Ok(paper)
    }
}

/// Strip JATS markup from CrossRef abstracts (`<jats:p>` etc.).
fn strip_jats(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut in_tag = false;
    for c in s.chars() {
        match c {
            '<' => in_tag = true,
            '>' => in_tag = false,
            c if !in_tag => out.push(c),
            _ => {}
        }
    }
    out.split_whitespace().collect::<Vec<_>>().join(" ")
}
