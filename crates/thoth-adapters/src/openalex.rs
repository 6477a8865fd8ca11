//! OpenAlex adapter (works API)
//!
//! Cursor-paginated JSON with publication-date and concept filters; the
//! `mailto` polite parameter is always sent when a contact is
//! configured. Abstracts arrive as an inverted index and are
//! reconstructed by position.

use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use thoth_core::error::DiscoveryError;
use thoth_core::paper::{Author, Paper, SourceKind, normalize_doi};
use thoth_core::query::NormalizedQuery;
use thoth_core::source_config::OpenalexParams;

use crate::{AdapterStats, SharedClient, SourceAdapter, send_paper};

const ENDPOINT: &str = "openalex";
const BASE_URL: &str = "https://api.openalex.org/works";

/// Results per page.
const PAGE_SIZE: usize = 100;

pub struct OpenalexAdapter {
    shared: SharedClient,
    params: OpenalexParams,
    contact_email: Option<String>,
}

impl OpenalexAdapter {
    pub(crate) fn new(
        shared: SharedClient,
        params: OpenalexParams,
        contact_email: Option<String>,
    ) -> Self {
        Self {
            shared,
            params,
            contact_email,
        }
    }

    fn page_url(&self, query: &NormalizedQuery, per_page: usize, cursor: &str) -> String {
        let mut terms: Vec<&str> = query.keywords.iter().map(String::as_str).collect();
        terms.extend(self.params.keywords.iter().map(String::as_str));
        let mut url = format!(
            "{BASE_URL}?search={}&per-page={per_page}&cursor={}",
            urlencoding::encode(&terms.join(" ")),
            urlencoding::encode(cursor)
        );

        let mut filters = Vec::new();
        if let Some(from) = query.date_from {
            filters.push(format!("from_publication_date:{from}"));
        }
        if let Some(to) = query.date_to {
            filters.push(format!("to_publication_date:{to}"));
        }
        let concepts: Vec<&str> = query
            .concepts
            .iter()
            .chain(self.params.concepts.iter())
            .map(String::as_str)
            .collect();
        if !concepts.is_empty() {
            filters.push(format!(
                "concepts.display_name.search:{}",
                concepts.join("|")
            ));
        }
        if !filters.is_empty() {
            url.push_str("&filter=");
            url.push_str(&urlencoding::encode(&filters.join(",")));
        }
        if let Some(email) = &self.contact_email {
            url.push_str("&mailto=");
            url.push_str(&urlencoding::encode(email));
        }
        url
    }
}

#[async_trait]
impl SourceAdapter for OpenalexAdapter {
    fn kind(&self) -> SourceKind {
        SourceKind::Openalex
    }

    fn validate(&self, query: &NormalizedQuery) -> Result<(), DiscoveryError> {
        let has_terms = !query.keywords.is_empty()
            || !query.concepts.is_empty()
            || !self.params.keywords.is_empty()
            || !self.params.concepts.is_empty();
        if !has_terms {
            return Err(DiscoveryError::Config(
                "openalex query needs keywords or concepts".to_string(),
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
            let per_page = PAGE_SIZE.min(max_results - stats.fetched);
            let url = self.page_url(query, per_page, &cursor);
            let body = self
                .shared
                .fetch_page(ENDPOINT, cancel, || self.shared.http.get(&url))
                .await?;

            let response: WorksResponse = serde_json::from_str(&body).map_err(|e| {
                DiscoveryError::PermanentRemote {
                    status: None,
                    message: format!("corrupt openalex response: {e}"),
                }
            })?;

            let n_results = response.results.len();
            for work in response.results {
                match work.into_paper() {
                    Ok(paper) => {
                        send_paper(out, paper, cancel).await?;
                        stats.fetched += 1;
                        if stats.fetched >= max_results {
                            break 'pages;
                        }
                    }
                    Err(e) => {
                        log::debug!("openalex: skipping work: {e}");
                        stats.parse_errors += 1;
                    }
                }
            }

            match response.meta.and_then(|m| m.next_cursor) {
                Some(next) if n_results == per_page => cursor = next,
                _ => break,
            }
        }
        Ok(stats)
    }
}

#[derive(Debug, Deserialize)]
struct WorksResponse {
    #[serde(default)]
    meta: Option<Meta>,
    #[serde(default)]
    results: Vec<Work>,
}

#[derive(Debug, Deserialize)]
struct Meta {
    #[serde(default)]
    next_cursor: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Work {
    id: Option<String>,
    #[serde(default)]
    doi: Option<String>,
    #[serde(default)]
    display_name: Option<String>,
    #[serde(default)]
    publication_year: Option<i32>,
    #[serde(default)]
    authorships: Vec<Authorship>,
    #[serde(default)]
    concepts: Vec<Concept>,
    #[serde(default)]
    cited_by_count: Option<i64>,
    #[serde(default)]
    abstract_inverted_index: Option<serde_json::Map<String, serde_json::Value>>,
    #[serde(default)]
    primary_location: Option<Location>,
    #[serde(default)]
    open_access: Option<OpenAccess>,
    #[serde(default)]
    referenced_works: Vec<String>,
    #[serde(default)]
    ids: Option<WorkIds>,
}

#[derive(Debug, Deserialize)]
struct Authorship {
    #[serde(default)]
    author: Option<AuthorRecord>,
}

#[derive(Debug, Deserialize)]
struct AuthorRecord {
    #[serde(default)]
    display_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Concept {
    #[serde(default)]
    display_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Location {
    #[serde(default)]
    source: Option<LocationSource>,
}

#[derive(Debug, Deserialize)]
struct LocationSource {
    #[serde(default)]
    display_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAccess {
    #[serde(default)]
    oa_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WorkIds {
    #[serde(default)]
    pmid: Option<String>,
}

/// Strip the `https://openalex.org/` prefix from an entity id.
fn short_openalex_id(id: &str) -> String {
    id.rsplit('/').next().unwrap_or(id).to_string()
}

/// Reconstruct an abstract from its inverted index (word -> positions).
fn decode_abstract(index: &serde_json::Map<String, serde_json::Value>) -> Option<String> {
    let mut pairs: Vec<(usize, &str)> = Vec::new();
    for (word, positions) in index {
        if let Some(arr) = positions.as_array() {
            for pos in arr {
                if let Some(p) = pos.as_u64() {
                    pairs.push((p as usize, word.as_str()));
                }
            }
        }
    }
    if pairs.is_empty() {
        return None;
    }
    pairs.sort_by_key(|(pos, _)| *pos);
    Some(
        pairs
            .into_iter()
            .map(|(_, w)| w)
            .collect::<Vec<_>>()
            .join(" "),
    )
}

impl Work {
    fn into_paper(self) -> Result<Paper, DiscoveryError> {
        let title = self.display_name.unwrap_or_default().trim().to_string();
        let mut paper = Paper::new(SourceKind::Openalex, title);
        paper.ids.openalex = self.id.as_deref().map(short_openalex_id);
        paper.ids.doi = self.doi.as_deref().and_then(normalize_doi);
        paper.ids.pubmed = self
            .ids
            .and_then(|ids| ids.pmid)
            .map(|p| p.rsplit('/').next().unwrap_or(p.as_str()).to_string());
        paper.year = self.publication_year;
        paper.authors = self
            .authorships
            .into_iter()
            .filter_map(|a| a.author.and_then(|r| r.display_name))
            .map(Author::from_full_name)
            .collect();
        paper.concepts = self
            .concepts
            .into_iter()
            .filter_map(|c| c.display_name)
            .collect();
        paper.dedup_concepts();
        paper.citation_count = self.cited_by_count;
        paper.abstract_text = self
            .abstract_inverted_index
            .as_ref()
            .and_then(decode_abstract);
        paper.venue = self
            .primary_location
            .and_then(|l| l.source)
            .and_then(|s| s.display_name);
        paper.open_access_url = self.open_access.and_then(|oa| oa.oa_url);
        paper.references = self
            .referenced_works
            .iter()
            .map(|w| short_openalex_id(w).to_lowercase())
            .collect();
        paper.validate()?;
        Ok(paper)
    }
}
