//! Normalized paper record and identifier normalization
//!
//! Every adapter yields this record regardless of the remote shape. A paper
//! is transient within a run; ownership transfers to the downstream
//! consumer over the emission channel.

use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Serialize};

use crate::error::DiscoveryError;

/// Earliest accepted publication year.
pub const MIN_YEAR: i32 = 1900;

/// Provider a paper record came from.
///
/// Doubles as the adapter kind of a source config. The merge stage prefers
/// records by provenance, richest metadata first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Crossref,
    Openalex,
    Arxiv,
    Pubmed,
    SemanticScholar,
    Browser,
}

impl SourceKind {
    pub const ALL: [SourceKind; 6] = [
        SourceKind::Crossref,
        SourceKind::Openalex,
        SourceKind::Arxiv,
        SourceKind::Pubmed,
        SourceKind::SemanticScholar,
        SourceKind::Browser,
    ];

    /// Fixed merge priority: CROSSREF > OPENALEX > ARXIV > PUBMED >
    /// SEMANTIC_SCHOLAR > BROWSER.
    pub fn merge_priority(self) -> u8 {
        match self {
            Self::Crossref => 5,
            Self::Openalex => 4,
            Self::Arxiv => 3,
            Self::Pubmed => 2,
            Self::SemanticScholar => 1,
            Self::Browser => 0,
        }
    }

    /// Default rate-limiter endpoint id for this kind.
    pub fn rate_limit_id(self) -> &'static str {
        match self {
            Self::Crossref => "crossref",
            Self::Openalex => "openalex",
            Self::Arxiv => "arxiv",
            Self::Pubmed => "pubmed",
            Self::SemanticScholar => "semantic_scholar",
            Self::Browser => "browser",
        }
    }

    /// API-backed kinds participate in fan-out; the browser kind does not.
    pub fn is_api(self) -> bool {
        !matches!(self, Self::Browser)
    }

    pub fn as_str(self) -> &'static str {
        self.rate_limit_id()
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|k| k.as_str() == s)
    }
}

impl std::fmt::Display for SourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Canonical identifier set. Unioned across providers during merge.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PaperIds {
    pub doi: Option<String>,
    pub arxiv: Option<String>,
    pub pubmed: Option<String>,
    pub openalex: Option<String>,
    pub semantic_scholar: Option<String>,
}

impl PaperIds {
    pub fn is_empty(&self) -> bool {
        self.doi.is_none()
            && self.arxiv.is_none()
            && self.pubmed.is_none()
            && self.openalex.is_none()
            && self.semantic_scholar.is_none()
    }

    /// Fill identifiers absent here from `other`.
    pub fn union_from(&mut self, other: &PaperIds) {
        if self.doi.is_none() {
            self.doi = other.doi.clone();
        }
        if self.arxiv.is_none() {
            self.arxiv = other.arxiv.clone();
        }
        if self.pubmed.is_none() {
            self.pubmed = other.pubmed.clone();
        }
        if self.openalex.is_none() {
            self.openalex = other.openalex.clone();
        }
        if self.semantic_scholar.is_none() {
            self.semantic_scholar = other.semantic_scholar.clone();
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Author {
    pub full_name: String,
    #[serde(default)]
    pub given: Option<String>,
    #[serde(default)]
    pub family: Option<String>,
}

impl Author {
    pub fn from_full_name(name: impl Into<String>) -> Self {
        Self {
            full_name: name.into(),
            given: None,
            family: None,
        }
    }

    pub fn from_parts(given: Option<String>, family: Option<String>) -> Self {
        let full_name = match (&given, &family) {
            (Some(g), Some(f)) => format!("{g} {f}"),
            (None, Some(f)) => f.clone(),
            (Some(g), None) => g.clone(),
            (None, None) => String::new(),
        };
        Self {
            full_name,
            given,
            family,
        }
    }
}

/// Normalized paper record.
///
/// `source` is set exactly once at construction and carried through merge
/// unchanged (the group winner keeps its own provenance).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Paper {
    pub ids: PaperIds,
    pub title: String,
    pub authors: Vec<Author>,
    pub abstract_text: Option<String>,
    pub year: Option<i32>,
    pub venue: Option<String>,
    pub concepts: Vec<String>,
    /// Cited identifiers (DOIs or provider ids) when the provider exposes
    /// them; empty means unavailable.
    pub references: Vec<String>,
    pub citation_count: Option<i64>,
    pub open_access_url: Option<String>,
    pub source: SourceKind,
    pub fetched_at: DateTime<Utc>,
}

impl Paper {
    pub fn new(source: SourceKind, title: impl Into<String>) -> Self {
        Self {
            ids: PaperIds::default(),
            title: title.into(),
            authors: Vec::new(),
            abstract_text: None,
            year: None,
            venue: None,
            concepts: Vec::new(),
            references: Vec::new(),
            citation_count: None,
            open_access_url: None,
            source,
            fetched_at: Utc::now(),
        }
    }

    pub fn first_author(&self) -> Option<&str> {
        self.authors.first().map(|a| a.full_name.as_str())
    }

    /// Enforce the record invariants. Adapters drop records failing this
    /// at normalization and count them as parse errors.
    pub fn validate(&self) -> Result<(), DiscoveryError> {
        if self.title.trim().is_empty() {
            return Err(DiscoveryError::Parse("paper has an empty title".to_string()));
        }
        if let Some(year) = self.year {
            let max_year = Utc::now().year() + 1;
            if year < MIN_YEAR || year > max_year {
                return Err(DiscoveryError::Parse(format!(
                    "publication year {year} outside [{MIN_YEAR}, {max_year}]"
                )));
            }
        }
        let has_triple = self.first_author().is_some() && self.year.is_some();
        if self.ids.is_empty() && !has_triple {
            return Err(DiscoveryError::Parse(format!(
                "paper \"{}\" has no identifier and no (title, author, year) triple",
                self.title
            )));
        }
        Ok(())
    }

    /// Count populated optional fields; the merge stage prefers richer
    /// records on provenance ties.
    pub fn populated_fields(&self) -> usize {
        let mut n = 0;
        n += usize::from(!self.authors.is_empty());
        n += usize::from(self.abstract_text.is_some());
        n += usize::from(self.year.is_some());
        n += usize::from(self.venue.is_some());
        n += usize::from(!self.concepts.is_empty());
        n += usize::from(!self.references.is_empty());
        n += usize::from(self.citation_count.is_some());
        n += usize::from(self.open_access_url.is_some());
        n += [
            &self.ids.doi,
            &self.ids.arxiv,
            &self.ids.pubmed,
            &self.ids.openalex,
            &self.ids.semantic_scholar,
        ]
        .iter()
        .filter(|id| id.is_some())
        .count();
        n
    }

    /// Deduplicate concepts case-insensitively, preserving first-seen form.
    pub fn dedup_concepts(&mut self) {
        let mut seen = std::collections::HashSet::new();
        self.concepts
            .retain(|c| seen.insert(c.trim().to_lowercase()));
    }
}

/// Normalize a DOI: strip URL/`doi:` prefixes, lowercase.
pub fn normalize_doi(raw: &str) -> Option<String> {
    let mut s = raw.trim();
    for prefix in [
        "https://doi.org/",
        "http://doi.org/",
        "https://dx.doi.org/",
        "http://dx.doi.org/",
        "doi:",
    ] {
        if let Some(rest) = strip_prefix_ignore_case(s, prefix) {
            s = rest;
            break;
        }
    }
    let s = s.trim_matches('/').trim();
    if s.starts_with("10.") && s.contains('/') {
        Some(s.to_lowercase())
    } else {
        None
    }
}

fn strip_prefix_ignore_case<'a>(s: &'a str, prefix: &str) -> Option<&'a str> {
    if s.len() >= prefix.len()
        && s.is_char_boundary(prefix.len())
        && s[..prefix.len()].eq_ignore_ascii_case(prefix)
    {
        Some(&s[prefix.len()..])
    } else {
        None
    }
}

/// Normalize an ArXiv id: strip URL/`arXiv:` prefixes and any `vN`
/// version suffix, lowercase. Accepts both new-style (`1706.03762`) and
/// old-style (`cs/9901001`) ids.
pub fn normalize_arxiv_id(raw: &str) -> Option<String> {
    let mut s = raw.trim();
    if let Some(i) = s.rfind("/abs/") {
        s = &s[i + "/abs/".len()..];
    }
    if let Some(rest) = strip_prefix_ignore_case(s, "arxiv:") {
        s = rest;
    }
    let s = s.trim_matches('/').trim_end_matches(".pdf");
    if s.is_empty() {
        return None;
    }
    // Strip a trailing version suffix like v2.
    let stripped = match s.rfind('v') {
        Some(i) if i > 0 && s[i + 1..].chars().all(|c| c.is_ascii_digit()) && !s[i + 1..].is_empty() => {
            &s[..i]
        }
        _ => s,
    };
    let ok = stripped.chars().all(|c| {
        c.is_ascii_alphanumeric() || c == '.' || c == '/' || c == '-'
    }) && stripped.chars().any(|c| c.is_ascii_digit());
    if ok {
        Some(stripped.to_lowercase())
    } else {
        None
    }
}

/// Normalize a title for fuzzy matching: lowercase, punctuation stripped,
/// whitespace collapsed.
pub fn normalize_title(title: &str) -> String {
    let lowered = title.to_lowercase();
    let replaced: String = lowered
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect();
    replaced.split_whitespace().collect::<Vec<_>>().join(" ")
}
