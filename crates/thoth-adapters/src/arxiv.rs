//! ArXiv adapter (Atom API)
//!
//! Queries `export.arxiv.org/api/query` with `cat:`/`all:` terms,
//! paginates by start index, and parses the Atom feed with a tolerant
//! streaming parser. Missing DOI and journal_ref are allowed.

use async_trait::async_trait;
use quick_xml::Reader;
use quick_xml::events::Event;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use thoth_core::error::DiscoveryError;
use thoth_core::paper::{Author, Paper, SourceKind, normalize_arxiv_id, normalize_doi};
use thoth_core::query::NormalizedQuery;
use thoth_core::source_config::ArxivParams;

use crate::{AdapterStats, SharedClient, SourceAdapter, send_paper};

const ENDPOINT: &str = "arxiv";
const BASE_URL: &str = "https://export.arxiv.org/api/query";

/// ArXiv caps feed pages at 100 entries.
const PAGE_SIZE: usize = 100;

pub struct ArxivAdapter {
    shared: SharedClient,
    params: ArxivParams,
}

impl ArxivAdapter {
    pub(crate) fn new(shared: SharedClient, params: ArxivParams) -> Self {
        Self { shared, params }
    }

    fn page_url(&self, search: &str, start: usize, page_len: usize) -> String {
        let mut url = format!(
            "{BASE_URL}?search_query={}&start={start}&max_results={page_len}",
            urlencoding::encode(search)
        );
        if let Some(sort_by) = &self.params.sort_by {
            url.push_str("&sortBy=");
            url.push_str(sort_by);
        }
        if let Some(order) = &self.params.sort_order {
            url.push_str("&sortOrder=");
            url.push_str(order);
        }
        url
    }
}

#[async_trait]
impl SourceAdapter for ArxivAdapter {
    fn kind(&self) -> SourceKind {
        SourceKind::Arxiv
    }

    fn validate(&self, query: &NormalizedQuery) -> Result<(), DiscoveryError> {
        if query.keywords.is_empty() && query.categories.is_empty() {
            return Err(DiscoveryError::Config(
                "arxiv query needs keywords or categories".to_string(),
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
        let search = build_search_query(query);
        let mut stats = AdapterStats::default();
        let mut start = 0usize;

        'pages: while stats.fetched < max_results {
            let page_len = PAGE_SIZE.min(max_results - stats.fetched);
            let url = self.page_url(&search, start, page_len);
            let body = self
                .shared
                .fetch_page(ENDPOINT, cancel, || self.shared.http.get(&url))
                .await?;

            let feed = parse_feed(&body)?;
            let n_entries = feed.entries.len();
            for entry in feed.entries {
                match entry.into_paper() {
                    Ok(paper) => {
                        send_paper(out, paper, cancel).await?;
                        stats.fetched += 1;
                        if stats.fetched >= max_results {
                            break 'pages;
                        }
                    }
                    Err(e) => {
                        log::debug!("arxiv: skipping entry: {e}");
                        stats.parse_errors += 1;
                    }
                }
            }

            start += n_entries;
            if n_entries < page_len {
                break;
            }
            if let Some(total) = feed.total_results {
                if start >= total {
                    break;
                }
            }
        }
        Ok(stats)
    }
}

/// `(all:kw OR ...) AND (cat:c OR ...)`; multi-word keywords are quoted.
fn build_search_query(query: &NormalizedQuery) -> String {
    let keywords: Vec<String> = query
        .keywords
        .iter()
        .map(|k| {
            let k = k.trim();
            if k.contains(' ') {
                format!("all:\"{k}\"")
            } else {
                format!("all:{k}")
            }
        })
        .collect();
    let categories: Vec<String> = query
        .categories
        .iter()
        .map(|c| format!("cat:{}", c.trim()))
        .collect();

    match (keywords.is_empty(), categories.is_empty()) {
        (false, false) => format!(
            "({}) AND ({})",
            keywords.join(" OR "),
            categories.join(" OR ")
        ),
        (false, true) => keywords.join(" OR "),
        (true, false) => categories.join(" OR "),
        (true, true) => String::new(),
    }
}

#[derive(Debug, Default)]
struct ArxivEntry {
    id_url: Option<String>,
    title: Option<String>,
    summary: Option<String>,
    published: Option<String>,
    authors: Vec<String>,
    categories: Vec<String>,
    doi: Option<String>,
    journal_ref: Option<String>,
    pdf_url: Option<String>,
}

impl ArxivEntry {
    fn into_paper(self) -> Result<Paper, DiscoveryError> {
        let title = normalize_ws(self.title.as_deref().unwrap_or_default());
        let mut paper = Paper::new(SourceKind::Arxiv, title);
        paper.ids.arxiv = self.id_url.as_deref().and_then(normalize_arxiv_id);
        paper.ids.doi = self.doi.as_deref().and_then(normalize_doi);
        paper.year = self
            .published
            .as_deref()
            .and_then(|p| p.get(0..4))
            .and_then(|y| y.parse().ok());
        paper.authors = self
            .authors
            .into_iter()
            .map(Author::from_full_name)
            .collect();
        paper.concepts = self.categories;
        paper.dedup_concepts();
        paper.venue = self.journal_ref.map(|j| normalize_ws(&j));
        let abstract_text = normalize_ws(self.summary.as_deref().unwrap_or_default());
        paper.abstract_text = (!abstract_text.is_empty()).then_some(abstract_text);
        paper.open_access_url = self.pdf_url.or_else(|| {
            paper
                .ids
                .arxiv
                .as_ref()
                .map(|id| format!("https://arxiv.org/abs/{id}"))
        });
        paper.validate()?;
        Ok(paper)
    }
}

fn normalize_ws(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[derive(Debug, Default)]
struct AtomFeed {
    total_results: Option<usize>,
    entries: Vec<ArxivEntry>,
}

fn permanent(e: impl std::fmt::Display) -> DiscoveryError {
    DiscoveryError::PermanentRemote {
        status: None,
        message: format!("corrupt atom feed: {e}"),
    }
}

fn parse_feed(xml: &str) -> Result<AtomFeed, DiscoveryError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut feed = AtomFeed::default();
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) if e.name().as_ref() == b"entry" => {
                feed.entries.push(parse_entry(&mut reader).map_err(permanent)?);
            }
            Ok(Event::Start(e)) if e.name().as_ref() == b"opensearch:totalResults" => {
                feed.total_results = reader
                    .read_text(e.name())
                    .ok()
                    .and_then(|t| t.trim().parse().ok());
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(permanent(e)),
            _ => {}
        }
        buf.clear();
    }
    Ok(feed)
}

fn parse_entry(reader: &mut Reader<&[u8]>) -> quick_xml::Result<ArxivEntry> {
    let mut entry = ArxivEntry::default();
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) => match e.name().as_ref() {
                b"id" => entry.id_url = Some(reader.read_text(e.name())?.into_owned()),
                b"title" => entry.title = Some(reader.read_text(e.name())?.into_owned()),
                b"summary" => entry.summary = Some(reader.read_text(e.name())?.into_owned()),
                b"published" => {
                    entry.published = Some(reader.read_text(e.name())?.into_owned())
                }
                b"author" => {
                    if let Some(name) = parse_author(reader)? {
                        entry.authors.push(name);
                    }
                }
                b"arxiv:doi" => entry.doi = Some(reader.read_text(e.name())?.into_owned()),
                b"arxiv:journal_ref" => {
                    entry.journal_ref = Some(reader.read_text(e.name())?.into_owned())
                }
                b"category" => {
                    if let Some(term) = attr_value(&e, "term")? {
                        entry.categories.push(term);
                    }
                }
                _ => {}
            },
            Event::Empty(e) => match e.name().as_ref() {
                b"category" => {
                    if let Some(term) = attr_value(&e, "term")? {
                        entry.categories.push(term);
                    }
                }
                b"link" => {
                    let is_pdf = attr_value(&e, "title")?.as_deref() == Some("pdf")
                        || attr_value(&e, "type")?.as_deref() == Some("application/pdf");
                    if is_pdf {
                        entry.pdf_url = attr_value(&e, "href")?;
                    }
                }
                _ => {}
            },
            Event::End(e) if e.name().as_ref() == b"entry" => break,
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }
    Ok(entry)
}

fn parse_author(reader: &mut Reader<&[u8]>) -> quick_xml::Result<Option<String>> {
    let mut name = None;
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) if e.name().as_ref() == b"name" => {
                name = Some(reader.read_text(e.name())?.trim().to_string());
            }
            Event::End(e) if e.name().as_ref() == b"author" => break,
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }
    Ok(name.filter(|n| !n.is_empty()))
}

fn attr_value(
    e: &quick_xml::events::BytesStart<'_>,
    name: &str,
) -> quick_xml::Result<Option<String>> {
    Ok(match e.try_get_attribute(name)? {
        Some(attr) => Some(attr.unescape_value()?.into_owned()),
        None => None,
    })
}
