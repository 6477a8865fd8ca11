//! PubMed adapter (NCBI E-utilities)
//!
//! Two-phase: E-search resolves the query to a PMID list (capped at the
//! requested maximum), then E-fetch pulls article XML in batches of 100.
//! An API key raises the effective rate to 10 req/s; the factory
//! reconfigures the bucket when one is present.

use async_trait::async_trait;
use quick_xml::Reader;
use quick_xml::events::Event;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use thoth_core::error::DiscoveryError;
use thoth_core::paper::{Author, Paper, SourceKind, normalize_doi};
use thoth_core::query::NormalizedQuery;
use thoth_core::source_config::PubmedParams;

use crate::{AdapterStats, SharedClient, SourceAdapter, send_paper};

const ENDPOINT: &str = "pubmed";
const ESEARCH_URL: &str = "https://eutils.ncbi.nlm.nih.gov/entrez/eutils/esearch.fcgi";
const EFETCH_URL: &str = "https://eutils.ncbi.nlm.nih.gov/entrez/eutils/efetch.fcgi";

/// E-fetch batch size.
const FETCH_BATCH: usize = 100;

pub struct PubmedAdapter {
    shared: SharedClient,
    params: PubmedParams,
    api_key: Option<String>,
}

impl PubmedAdapter {
    pub(crate) fn new(
        shared: SharedClient,
        params: PubmedParams,
        api_key: Option<String>,
    ) -> Self {
        Self {
            shared,
            params,
            api_key,
        }
    }

    fn esearch_url(&self, query: &NormalizedQuery, max_results: usize) -> String {
        let mut seen = std::collections::HashSet::new();
        let terms: Vec<String> = query
            .keywords
            .iter()
            .chain(self.params.keywords.iter())
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty() && seen.insert(k.to_lowercase()))
            .collect();
        let term = terms.join(" OR ");

        let mut url = format!(
            "{ESEARCH_URL}?db=pubmed&retmax={max_results}&term={}",
            urlencoding::encode(&term)
        );
        if let (Some(from), Some(to)) = (query.date_from, query.date_to) {
            url.push_str(&format!(
                "&datetype=pdat&mindate={}&maxdate={}",
                from.format("%Y/%m/%d"),
                to.format("%Y/%m/%d")
            ));
        }
        if let Some(key) = &self.api_key {
            url.push_str("&api_key=");
            url.push_str(key);
        }
        url
    }

    fn efetch_url(&self, pmids: &[String]) -> String {
        let mut url = format!(
            "{EFETCH_URL}?db=pubmed&retmode=xml&id={}",
            pmids.join(",")
        );
        if let Some(key) = &self.api_key {
            url.push_str("&api_key=");
            url.push_str(key);
        }
        url
    }
}

#[async_trait]
impl SourceAdapter for PubmedAdapter {
    fn kind(&self) -> SourceKind {
        SourceKind::Pubmed
    }

    fn validate(&self, query: &NormalizedQuery) -> Result<(), DiscoveryError> {
        if query.keywords.is_empty() && self.params.keywords.is_empty() {
            return Err(DiscoveryError::Config(
                "pubmed query needs at least one keyword".to_string(),
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

        let search_url = self.esearch_url(query, max_results);
        let body = self
            .shared
            .fetch_page(ENDPOINT, cancel, || self.shared.http.get(&search_url))
            .await?;
        let pmids = parse_esearch(&body)?;
        if pmids.is_empty() {
            return Ok(stats);
        }

        'batches: for batch in pmids.chunks(FETCH_BATCH) {
            let batch: Vec<String> = batch.to_vec();
            let fetch_url = self.efetch_url(&batch);
            let body = self
                .shared
                .fetch_page(ENDPOINT, cancel, || self.shared.http.get(&fetch_url))
                .await?;

            let parsed = parse_articles(&body)?;
            stats.parse_errors += parsed.skipped;
            for article in parsed.articles {
                match article.into_paper() {
                    Ok(paper) => {
                        send_paper(out, paper, cancel).await?;
                        stats.fetched += 1;
                        if stats.fetched >= max_results {
                            break 'batches;
                        }
                    }
                    Err(e) => {
                        log::debug!("pubmed: skipping article: {e}");
                        stats.parse_errors += 1;
                    }
                }
            }
        }
        Ok(stats)
    }
}

fn permanent(e: impl std::fmt::Display) -> DiscoveryError {
    DiscoveryError::PermanentRemote {
        status: None,
        message: format!("corrupt pubmed response: {e}"),
    }
}

/// Extract the PMID list from an E-search result.
fn parse_esearch(xml: &str) -> Result<Vec<String>, DiscoveryError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut pmids = Vec::new();
    let mut in_id_list = false;
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) if e.name().as_ref() == b"IdList" => in_id_list = true,
            Ok(Event::Start(e)) if in_id_list && e.name().as_ref() == b"Id" => {
                let id = reader.read_text(e.name()).map_err(permanent)?;
                let id = id.trim().to_string();
                if !id.is_empty() {
                    pmids.push(id);
                }
            }
            Ok(Event::End(e)) if e.name().as_ref() == b"IdList" => in_id_list = false,
            Ok(Event::Eof) => break,
            Err(e) => return Err(permanent(e)),
            _ => {}
        }
        buf.clear();
    }
    Ok(pmids)
}

#[derive(Debug, Default)]
struct PubmedArticle {
    pmid: String,
    doi: Option<String>,
    title: Option<String>,
    abstract_text: Option<String>,
    journal_title: Option<String>,
    pub_year: Option<i32>,
    authors: Vec<Author>,
    mesh_terms: Vec<String>,
    keywords: Vec<String>,
}

impl PubmedArticle {
    fn into_paper(self) -> Result<Paper, DiscoveryError> {
        let mut paper = Paper::new(
            SourceKind::Pubmed,
            self.title.unwrap_or_default().trim().to_string(),
        );
        paper.ids.pubmed = (!self.pmid.is_empty()).then_some(self.pmid);
        paper.ids.doi = self.doi.as_deref().and_then(normalize_doi);
        paper.abstract_text = self.abstract_text.filter(|a| !a.is_empty());
        paper.venue = self.journal_title;
        paper.year = self.pub_year;
        paper.authors = self.authors;
        paper.concepts = self
            .mesh_terms
            .into_iter()
            .chain(self.keywords)
            .collect();
        paper.dedup_concepts();
        paper.validate()?;
        Ok(paper)
    }
}

#[derive(Debug, Default)]
struct ParsedSet {
    articles: Vec<PubmedArticle>,
    /// Articles whose XML failed to parse.
    skipped: usize,
}

/// Parse a `PubmedArticleSet` document.
fn parse_articles(xml: &str) -> Result<ParsedSet, DiscoveryError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut set = ParsedSet::default();
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) if e.name().as_ref() == b"PubmedArticle" => {
                match parse_article(&mut reader) {
                    Ok(article) => set.articles.push(article),
                    Err(e) => {
                        log::debug!("pubmed: malformed article: {e}");
                        set.skipped += 1;
                    }
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(permanent(e)),
            _ => {}
        }
        buf.clear();
    }
    Ok(set)
}

fn parse_article(reader: &mut Reader<&[u8]>) -> quick_xml::Result<PubmedArticle> {
    let mut article = PubmedArticle::default();
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) => match e.name().as_ref() {
                b"PMID" if article.pmid.is_empty() => {
                    article.pmid = reader.read_text(e.name())?.trim().to_string();
                }
                b"ArticleTitle" => {
                    article.title = Some(read_mixed_text(reader, b"ArticleTitle")?);
                }
                b"Abstract" => {
                    article.abstract_text = Some(parse_abstract(reader)?);
                }
                b"Journal" => parse_journal(reader, &mut article)?,
                b"AuthorList" => article.authors = parse_author_list(reader)?,
                b"MeshHeadingList" => article.mesh_terms = parse_mesh_list(reader)?,
                b"KeywordList" => article.keywords = parse_keyword_list(reader)?,
                b"ArticleIdList" => parse_article_ids(reader, &mut article)?,
                b"ELocationID" => {
                    let is_doi = attr_eq(&e, "EIdType", "doi")?;
                    let value = reader.read_text(e.name())?.trim().to_string();
                    if is_doi && article.doi.is_none() {
                        article.doi = Some(value);
                    }
                }
                _ => {}
            },
            Event::End(e) if e.name().as_ref() == b"PubmedArticle" => break,
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }
    Ok(article)
}

fn parse_journal(
    reader: &mut Reader<&[u8]>,
    article: &mut PubmedArticle,
) -> quick_xml::Result<()> {
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) => match e.name().as_ref() {
                b"Title" => {
                    article.journal_title = Some(reader.read_text(e.name())?.trim().to_string());
                }
                b"Year" => article.pub_year = reader.read_text(e.name())?.trim().parse().ok(),
                b"MedlineDate" if article.pub_year.is_none() => {
                    // e.g. "2019 Jan-Feb": the leading year is enough.
                    let text = reader.read_text(e.name())?;
                    article.pub_year = text.trim().get(0..4).and_then(|y| y.parse().ok());
                }
                _ => {}
            },
            Event::End(e) if e.name().as_ref() == b"Journal" => break,
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }
    Ok(())
}

/// Labelled abstract sections are concatenated in declared order.
fn parse_abstract(reader: &mut Reader<&[u8]>) -> quick_xml::Result<String> {
    let mut parts = Vec::new();
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) if e.name().as_ref() == b"AbstractText" => {
                let text = read_mixed_text(reader, b"AbstractText")?;
                if !text.is_empty() {
                    parts.push(text);
                }
            }
            Event::End(e) if e.name().as_ref() == b"Abstract" => break,
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }
    Ok(parts.join(" "))
}

fn parse_author_list(reader: &mut Reader<&[u8]>) -> quick_xml::Result<Vec<Author>> {
    let mut authors = Vec::new();
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) if e.name().as_ref() == b"Author" => {
                if let Some(author) = parse_author(reader)? {
                    authors.push(author);
                }
            }
            Event::End(e) if e.name().as_ref() == b"AuthorList" => break,
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }
    Ok(authors)
}

fn parse_author(reader: &mut Reader<&[u8]>) -> quick_xml::Result<Option<Author>> {
    let mut last_name = None;
    let mut fore_name = None;
    let mut collective = None;
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) => match e.name().as_ref() {
                b"LastName" => last_name = Some(reader.read_text(e.name())?.trim().to_string()),
                b"ForeName" => fore_name = Some(reader.read_text(e.name())?.trim().to_string()),
                b"CollectiveName" => {
                    collective = Some(reader.read_text(e.name())?.trim().to_string());
                }
                _ => {}
            },
            Event::End(e) if e.name().as_ref() == b"Author" => break,
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }
    if let Some(name) = collective {
        return Ok((!name.is_empty()).then(|| Author::from_full_name(name)));
    }
    if last_name.is_none() && fore_name.is_none() {
        return Ok(None);
    }
    Ok(Some(Author::from_parts(fore_name, last_name)))
}

fn parse_mesh_list(reader: &mut Reader<&[u8]>) -> quick_xml::Result<Vec<String>> {
    let mut terms = Vec::new();
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) if e.name().as_ref() == b"DescriptorName" => {
                let term = reader.read_text(e.name())?.trim().to_string();
                if !term.is_empty() {
                    terms.push(term);
                }
            }
            Event::End(e) if e.name().as_ref() == b"MeshHeadingList" => break,
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }
    Ok(terms)
}

fn parse_keyword_list(reader: &mut Reader<&[u8]>) -> quick_xml::Result<Vec<String>> {
    let mut keywords = Vec::new();
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) if e.name().as_ref() == b"Keyword" => {
                let kw = read_mixed_text(reader, b"Keyword")?;
                if !kw.is_empty() {
                    keywords.push(kw);
                }
            }
            Event::End(e) if e.name().as_ref() == b"KeywordList" => break,
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }
    Ok(keywords)
}

fn parse_article_ids(
    reader: &mut Reader<&[u8]>,
    article: &mut PubmedArticle,
) -> quick_xml::Result<()> {
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) if e.name().as_ref() == b"ArticleId" => {
                let is_doi = attr_eq(&e, "IdType", "doi")?;
                let value = reader.read_text(e.name())?.trim().to_string();
                if is_doi && article.doi.is_none() && !value.is_empty() {
                    article.doi = Some(value);
                }
            }
            Event::End(e) if e.name().as_ref() == b"ArticleIdList" => break,
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }
    Ok(())
}

/// Read element text, flattening inline markup (<i>, <sub>, ...).
fn read_mixed_text(reader: &mut Reader<&[u8]>, end: &[u8]) -> quick_xml::Result<String> {
    let mut text = String::new();
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Text(t) => {
                let piece = t.unescape()?;
                if !text.is_empty() && !text.ends_with(' ') {
                    text.push(' ');
                }
                text.push_str(piece.trim());
            }
            Event::End(e) if e.name().as_ref() == end => break,
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }
    Ok(text.trim().to_string())
}

fn attr_eq(
    e: &quick_xml::events::BytesStart<'_>,
    name: &str,
    expected: &str,
) -> quick_xml::Result<bool> {
    Ok(match e.try_get_attribute(name)? {
        Some(attr) => attr.unescape_value()?.eq_ignore_ascii_case(expected),
        None => false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const ESEARCH: &str = r#"<?xml version="1.0"?>
<eSearchResult>
  <Count>2</Count>
  <RetMax>2</RetMax>
  <IdList>
    <Id>31452104</Id>
    <Id>29474671</Id>
  </IdList>
</eSearchResult>"#;

    const EFETCH: &str = r#"<?xml version="1.0"?>
<PubmedArticleSet>
  <PubmedArticle>
    <MedlineCitation>
      <PMID Version="1">31452104</PMID>
      <Article>
        <Journal>
          <Title>Nature Methods</Title>
          <JournalIssue>
            <PubDate><Year>2019</Year><Month>Aug</Month></PubDate>
          </JournalIssue>
        </Journal>
        <ArticleTitle>Deep learning for cellular image analysis</ArticleTitle>
        <Abstract>
          <AbstractText Label="BACKGROUND">Deep learning is transforming biology.</AbstractText>
          <AbstractText Label="RESULTS">We review recent advances.</AbstractText>
        </Abstract>
        <AuthorList>
          <Author>
            <LastName>Moen</LastName>
            <ForeName>Erick</ForeName>
          </Author>
          <Author>
            <CollectiveName>The Imaging Consortium</CollectiveName>
          </Author>
        </AuthorList>
        <ELocationID EIdType="doi" ValidYN="Y">10.1038/s41592-019-0403-1</ELocationID>
      </Article>
      <MeshHeadingList>
        <MeshHeading>
          <DescriptorName UI="D000077321" MajorTopicYN="Y">Deep Learning</DescriptorName>
        </MeshHeading>
      </MeshHeadingList>
      <KeywordList Owner="NOTNLM">
        <Keyword MajorTopicYN="N">segmentation</Keyword>
      </KeywordList>
    </MedlineCitation>
    <PubmedData>
      <ArticleIdList>
        <ArticleId IdType="pubmed">31452104</ArticleId>
        <ArticleId IdType="doi">10.1038/s41592-019-0403-1</ArticleId>
      </ArticleIdList>
    </PubmedData>
  </PubmedArticle>
</PubmedArticleSet>"#;

    #[test]
    fn esearch_yields_pmids() {
        let pmids = parse_esearch(ESEARCH).unwrap();
        assert_eq!(pmids, vec!["31452104", "29474671"]);
    }

    #[test]
    fn esearch_empty_id_list() {
        let pmids = parse_esearch("<eSearchResult><IdList></IdList></eSearchResult>").unwrap();
        assert!(pmids.is_empty());
    }

    #[test]
    fn efetch_parses_article() {
        let set = parse_articles(EFETCH).unwrap();
        assert_eq!(set.articles.len(), 1);
        assert_eq!(set.skipped, 0);

        let article = &set.articles[0];
        assert_eq!(article.pmid, "31452104");
        assert_eq!(
            article.title.as_deref(),
            Some("Deep learning for cellular image analysis")
        );
        assert_eq!(article.journal_title.as_deref(), Some("Nature Methods"));
        assert_eq!(article.pub_year, Some(2019));
    }

    #[test]
    fn labelled_abstract_sections_concatenate_in_order() {
        let set = parse_articles(EFETCH).unwrap();
        assert_eq!(
            set.articles[0].abstract_text.as_deref(),
            Some("Deep learning is transforming biology. We review recent advances.")
        );
    }

    #[test]
    fn nested_and_collective_authors() {
        let set = parse_articles(EFETCH).unwrap();
        let authors = &set.articles[0].authors;
        assert_eq!(authors.len(), 2);
        assert_eq!(authors[0].full_name, "Erick Moen");
        assert_eq!(authors[0].family.as_deref(), Some("Moen"));
        assert_eq!(authors[1].full_name, "The Imaging Consortium");
    }

    #[test]
    fn mesh_and_keywords_become_concepts() {
        let set = parse_articles(EFETCH).unwrap();
        let paper = set.articles.into_iter().next().unwrap().into_paper().unwrap();
        assert_eq!(paper.concepts, vec!["Deep Learning", "segmentation"]);
        assert_eq!(paper.ids.doi.as_deref(), Some("10.1038/s41592-019-0403-1"));
        assert_eq!(paper.ids.pubmed.as_deref(), Some("31452104"));
        assert_eq!(paper.source, SourceKind::Pubmed);
    }

    #[test]
    fn esearch_url_includes_terms_and_dates() {
        let shared = crate::SharedClient {
            http: reqwest::Client::new(),
            limiter: std::sync::Arc::new(thoth_core::rate_limit::RateLimiter::new()),
            retry: thoth_core::retry::RetryPolicy::default(),
        };
        let adapter = PubmedAdapter::new(
            shared,
            PubmedParams {
                keywords: vec!["crispr".to_string()],
            },
            Some("k123".to_string()),
        );
        let query = NormalizedQuery {
            keywords: vec!["gene editing".to_string()],
            date_from: chrono::NaiveDate::from_ymd_opt(2020, 1, 1),
            date_to: chrono::NaiveDate::from_ymd_opt(2021, 12, 31),
            ..NormalizedQuery::default()
        };
        let url = adapter.esearch_url(&query, 50);
        assert!(url.contains("retmax=50"));
        assert!(url.contains("gene%20editing%20OR%20crispr"));
        assert!(url.contains("mindate=2020/01/01"));
        assert!(url.contains("api_key=k123"));
    }
}
