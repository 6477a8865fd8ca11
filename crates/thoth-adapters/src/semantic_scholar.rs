//! Semantic Scholar adapter (Graph API paper search)
//!
//! Offset/limit pagination with the provider's hard offset ceiling;
//! `externalIds` is mined for DOI/ArXiv/PubMed identifiers. The API key,
//! when configured, goes in the `x-api-key` header.

use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use thoth_core::error::DiscoveryError;
use thoth_core::paper::{Author, Paper, SourceKind, normalize_arxiv_id, normalize_doi};
use thoth_core::query::NormalizedQuery;
use thoth_core::source_config::SemanticScholarParams;

use crate::{AdapterStats, SharedClient, SourceAdapter, send_paper};

const ENDPOINT: &str = "semantic_scholar";
const BASE_URL: &str = "https://api.semanticscholar.org/graph/v1/paper/search";

/// Results per page.
const PAGE_SIZE: usize = 100;

/// The search endpoint refuses offsets past this; terminate there.
const MAX_OFFSET: usize = 1000;

const FIELDS: &str = "paperId,externalIds,title,abstract,year,venue,citationCount,\
openAccessPdf,authors,s2FieldsOfStudy";

pub struct SemanticScholarAdapter {
    shared: SharedClient,
    params: SemanticScholarParams,
    api_key: Option<String>,
}

impl SemanticScholarAdapter {
    pub(crate) fn new(
        shared: SharedClient,
        params: SemanticScholarParams,
        api_key: Option<String>,
    ) -> Self {
        Self {
            shared,
            params,
            api_key,
        }
    }

    fn page_url(&self, query: &NormalizedQuery, offset: usize, limit: usize) -> String {
        let mut terms: Vec<&str> = query.keywords.iter().map(String::as_str).collect();
        terms.extend(self.params.keywords.iter().map(String::as_str));
        let mut url = format!(
            "{BASE_URL}?query={}&offset={offset}&limit={limit}&fields={FIELDS}",
            urlencoding::encode(&terms.join(" "))
        );
        if let (Some(from), Some(to)) = (query.date_from, query.date_to) {
            url.push_str(&format!(
                "&year={}-{}",
                from.format("%Y"),
                to.format("%Y")
            ));
        }
        url
    }
}

#[async_trait]
impl SourceAdapter for SemanticScholarAdapter {
    fn kind(&self) -> SourceKind {
        SourceKind::SemanticScholar
    }

    fn validate(&self, query: &NormalizedQuery) -> Result<(), DiscoveryError> {
        if query.keywords.is_empty() && self.params.keywords.is_empty() {
            return Err(DiscoveryError::Config(
                "semantic scholar query needs at least one keyword".to_string(),
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
        let mut offset = 0usize;

        'pages: while stats.fetched < max_results && offset < MAX_OFFSET {
            let limit = PAGE_SIZE.min(max_results - stats.fetched);
            let url = self.page_url(query, offset, limit);
            let body = self
                .shared
                .fetch_page(ENDPOINT, cancel, || {
                    let mut req = self.shared.http.get(&url);
                    if let Some(key) = &self.api_key {
                        req = req.header("x-api-key", key);
                    }
                    req
                })
                .await?;

            let response: SearchResponse = serde_json::from_str(&body).map_err(|e| {
                DiscoveryError::PermanentRemote {
                    status: None,
                    message: format!("corrupt semantic scholar response: {e}"),
                }
            })?;

            if response.data.is_empty() {
                break;
            }
            for record in response.data {
                match record.into_paper() {
                    Ok(paper) => {
                        send_paper(out, paper, cancel).await?;
                        stats.fetched += 1;
                        if stats.fetched >= max_results {
                            break 'pages;
                        }
                    }
                    Err(e) => {
                        log::debug!("semantic scholar: skipping paper: {e}");
                        stats.parse_errors += 1;
                    }
                }
            }

            match response.next {
                Some(next) => offset = next as usize,
                None => break,
            }
        }
        Ok(stats)
    }
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    next: Option<i64>,
    #[serde(default)]
    data: Vec<PaperRecord>,
}

#[derive(Debug, Deserialize)]
struct PaperRecord {
    #[serde(rename = "paperId")]
    paper_id: Option<String>,
    #[serde(default, rename = "externalIds")]
    external_ids: Option<ExternalIds>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default, rename = "abstract")]
    abstract_text: Option<String>,
    #[serde(default)]
    year: Option<i32>,
    #[serde(default)]
    venue: Option<String>,
    #[serde(default, rename = "citationCount")]
    citation_count: Option<i64>,
    #[serde(default, rename = "openAccessPdf")]
    open_access_pdf: Option<OpenAccessPdf>,
    #[serde(default)]
    authors: Vec<AuthorRecord>,
    #[serde(default, rename = "s2FieldsOfStudy")]
    fields_of_study: Vec<FieldOfStudy>,
}

#[derive(Debug, Deserialize)]
struct ExternalIds {
    #[serde(default, rename = "DOI")]
    doi: Option<String>,
    #[serde(default, rename = "ArXiv")]
    arxiv: Option<String>,
    #[serde(default, rename = "PubMed")]
    pubmed: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAccessPdf {
    #[serde(default)]
    url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AuthorRecord {
    #[serde(default)]
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FieldOfStudy {
    #[serde(default)]
    category: Option<String>,
}

impl PaperRecord {
    fn into_paper(self) -> Result<Paper, DiscoveryError> {
        let title = self.title.unwrap_or_default().trim().to_string();
        let mut paper = Paper::new(SourceKind::SemanticScholar, title);
        paper.ids.semantic_scholar = self.paper_id;
        if let Some(external) = self.external_ids {
            paper.ids.doi = external.doi.as_deref().and_then(normalize_doi);
            paper.ids.arxiv = external.arxiv.as_deref().and_then(normalize_arxiv_id);
            paper.ids.pubmed = external.pubmed;
        }
        paper.abstract_text = self.abstract_text.filter(|a| !a.trim().is_empty());
        paper.year = self.year;
        paper.venue = self.venue.filter(|v| !v.trim().is_empty());
        paper.citation_count = self.citation_count;
        paper.open_access_url = self.open_access_pdf.and_then(|p| p.url);
        paper.authors = self
            .authors
            .into_iter()
            .filter_map(|a| a.name)
            .map(Author::from_full_name)
            .collect();
        paper.concepts = self
            .fields_of_study
            .into_iter()
            .filter_map(|f| f.category)
            .collect();
        paper.dedup_concepts();
        paper.validate()?;
        Ok(paper)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RESPONSE: &str = r#"{
      "total": 1234,
      "offset": 0,
      "next": 100,
      "data": [
        {
          "paperId": "5c5751d45e298cea054f32b392c12c61027d2fe7",
          "externalIds": {"DOI": "10.18653/V1/N18-3011", "ArXiv": "1805.02262"},
          "title": "Construction of the Literature Graph in Semantic Scholar",
          "abstract": "We describe a deployed scalable system.",
          "year": 2018,
          "venue": "NAACL",
          "citationCount": 453,
          "openAccessPdf": {"url": "https://aclanthology.org/N18-3011.pdf"},
          "authors": [{"authorId": "1741101", "name": "Waleed Ammar"}],
          "s2FieldsOfStudy": [
            {"category": "Computer Science", "source": "s2-fos-model"},
            {"category": "Computer Science", "source": "external"}
          ]
        },
        {
          "paperId": "0000",
          "title": null
        }
      ]
    }"#;

    #[test]
    fn response_parses_next_and_data() {
        let r: SearchResponse = serde_json::from_str(RESPONSE).unwrap();
        assert_eq!(r.next, Some(100));
        assert_eq!(r.data.len(), 2);
    }

    #[test]
    fn record_normalizes_into_paper() {
        let r: SearchResponse = serde_json::from_str(RESPONSE).unwrap();
        let paper = r.data.into_iter().next().unwrap().into_paper().unwrap();

        assert_eq!(
            paper.ids.semantic_scholar.as_deref(),
            Some("5c5751d45e298cea054f32b392c12c61027d2fe7")
        );
        assert_eq!(paper.ids.doi.as_deref(), Some("10.18653/v1/n18-3011"));
        assert_eq!(paper.ids.arxiv.as_deref(), Some("1805.02262"));
        assert_eq!(paper.year, Some(2018));
        assert_eq!(paper.venue.as_deref(), Some("NAACL"));
        assert_eq!(paper.citation_count, Some(453));
        // Duplicate field-of-study categories collapse.
        assert_eq!(paper.concepts, vec!["Computer Science"]);
        assert_eq!(paper.source, SourceKind::SemanticScholar);
    }

    #[test]
    fn untitled_record_is_rejected() {
        let r: SearchResponse = serde_json::from_str(RESPONSE).unwrap();
        assert!(r.data.into_iter().nth(1).unwrap().into_paper().is_err());
    }

    #[test]
    fn page_url_includes_year_range() {
        let shared = crate::SharedClient {
            http: reqwest::Client::new(),
            limiter: std::sync::Arc::new(thoth_core::rate_limit::RateLimiter::new()),
            retry: thoth_core::retry::RetryPolicy::default(),
        };
        let adapter = SemanticScholarAdapter::new(
            shared,
            SemanticScholarParams::default(),
            None,
        );
        let query = NormalizedQuery {
            keywords: vec!["literature graph".to_string()],
            date_from: chrono::NaiveDate::from_ymd_opt(2015, 1, 1),
            date_to: chrono::NaiveDate::from_ymd_opt(2020, 12, 31),
            ..NormalizedQuery::default()
        };
        let url = adapter.page_url(&query, 0, 100);
        assert!(url.contains("query=literature%20graph"));
        assert!(url.contains("offset=0"));
        assert!(url.contains("limit=100"));
        assert!(url.contains("year=2015-2020"));
        assert!(url.contains("fields=paperId"));
    }
}
