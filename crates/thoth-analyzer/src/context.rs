//! Corpus analysis into a reusable context

use std::collections::HashMap;

use anyhow::Result;
use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};

use thoth_core::paper::normalize_doi;

/// One paper from the user's existing corpus, as exposed by the embedding
/// application. The discovery core never reads the corpus storage itself.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CorpusPaper {
    pub title: String,
    pub abstract_text: Option<String>,
    pub tags: Vec<String>,
    pub authors: Vec<String>,
    /// Identifiers (ideally DOIs) of works this paper cites.
    pub cited_ids: Vec<String>,
    pub year: Option<i32>,
}

/// Seam to the corpus owner. Implementations should return a consistent
/// snapshot per call; the analyzer is deterministic over that snapshot.
pub trait CorpusReader: Send + Sync {
    fn papers(&self) -> Result<Vec<CorpusPaper>>;
}

#[derive(Debug, Clone, Default)]
pub struct TopicStat {
    /// How many corpus papers carry this topic.
    pub count: usize,
    /// First-seen display form.
    pub display: String,
}

#[derive(Debug, Clone, Default)]
pub struct AuthorStat {
    /// How many corpus papers this author appears on.
    pub collaborations: usize,
    pub display: String,
}

/// Distilled view of the corpus: what the user reads, who they read, and
/// what those papers cite.
#[derive(Debug, Clone, Default)]
pub struct CorpusContext {
    /// Lowercased topic -> stat.
    topics: HashMap<String, TopicStat>,
    /// Lowercased author name -> stat.
    authors: HashMap<String, AuthorStat>,
    cited_ids: FxHashSet<String>,
    /// Central publication-year range (25th..75th percentile).
    recency: Option<(i32, i32)>,
}

impl CorpusContext {
    pub fn is_empty(&self) -> bool {
        self.topics.is_empty() && self.authors.is_empty() && self.cited_ids.is_empty()
    }

    pub fn has_topic(&self, topic: &str) -> bool {
        self.topics.contains_key(&topic.trim().to_lowercase())
    }

    pub fn has_author(&self, name: &str) -> bool {
        self.authors.contains_key(&name.trim().to_lowercase())
    }

    pub fn cites(&self, id: &str) -> bool {
        self.cited_ids.contains(&normalize_cited_id(id))
    }

    pub fn recency_window(&self) -> Option<(i32, i32)> {
        self.recency
    }

    pub fn topic_count(&self) -> usize {
        self.topics.len()
    }

    /// Topics by descending frequency (display form), ties alphabetical.
    pub fn top_topics(&self, limit: usize) -> Vec<String> {
        let mut ranked: Vec<&TopicStat> = self.topics.values().collect();
        ranked.sort_by(|a, b| b.count.cmp(&a.count).then(a.display.cmp(&b.display)));
        ranked.into_iter().take(limit).map(|t| t.display.clone()).collect()
    }

    /// Authors by descending collaboration count (display form).
    pub fn top_authors(&self, limit: usize) -> Vec<String> {
        let mut ranked: Vec<&AuthorStat> = self.authors.values().collect();
        ranked.sort_by(|a, b| {
            b.collaborations
                .cmp(&a.collaborations)
                .then(a.display.cmp(&b.display))
        });
        ranked
            .into_iter()
            .take(limit)
            .map(|a| a.display.clone())
            .collect()
    }
}

fn normalize_cited_id(raw: &str) -> String {
    normalize_doi(raw).unwrap_or_else(|| raw.trim().to_lowercase())
}

/// Build a [`CorpusContext`] from a corpus snapshot.
pub fn analyze_corpus(reader: &dyn CorpusReader) -> Result<CorpusContext> {
    let papers = reader.papers()?;
    let mut ctx = CorpusContext::default();
    let mut years = Vec::new();

    for paper in &papers {
        for tag in &paper.tags {
            let tag = tag.trim();
            if tag.is_empty() {
                continue;
            }
            let stat = ctx
                .topics
                .entry(tag.to_lowercase())
                .or_insert_with(|| TopicStat {
                    count: 0,
                    display: tag.to_string(),
                });
            stat.count += 1;
        }
        for author in &paper.authors {
            let author = author.trim();
            if author.is_empty() {
                continue;
            }
            let stat = ctx
                .authors
                .entry(author.to_lowercase())
                .or_insert_with(|| AuthorStat {
                    collaborations: 0,
                    display: author.to_string(),
                });
            stat.collaborations += 1;
        }
        for id in &paper.cited_ids {
            if !id.trim().is_empty() {
                ctx.cited_ids.insert(normalize_cited_id(id));
            }
        }
        if let Some(year) = paper.year {
            years.push(year);
        }
    }

    if !years.is_empty() {
        years.sort_unstable();
        let lo = years[years.len() / 4];
        let hi = years[(years.len() * 3) / 4];
        ctx.recency = Some((lo, hi));
    }

    log::debug!(
        "corpus context: {} topics, {} authors, {} cited ids from {} papers",
        ctx.topics.len(),
        ctx.authors.len(),
        ctx.cited_ids.len(),
        papers.len()
    );
    Ok(ctx)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedCorpus(Vec<CorpusPaper>);

    impl CorpusReader for FixedCorpus {
        fn papers(&self) -> Result<Vec<CorpusPaper>> {
            Ok(self.0.clone())
        }
    }

    fn sample() -> FixedCorpus {
        FixedCorpus(vec![
            CorpusPaper {
                title: "Paper A".to_string(),
                tags: vec!["Transformers".to_string(), "NLP".to_string()],
                authors: vec!["Ashish Vaswani".to_string()],
                cited_ids: vec!["10.1/ABC".to_string()],
                year: Some(2017),
                ..CorpusPaper::default()
            },
            CorpusPaper {
                title: "Paper B".to_string(),
                tags: vec!["transformers".to_string()],
                authors: vec!["Ashish Vaswani".to_string(), "Noam Shazeer".to_string()],
                cited_ids: vec!["https://doi.org/10.2/DEF".to_string()],
                year: Some(2019),
                ..CorpusPaper::default()
            },
            CorpusPaper {
                title: "Paper C".to_string(),
                tags: vec!["Graph Learning".to_string()],
                authors: vec![],
                cited_ids: vec![],
                year: Some(2021),
                ..CorpusPaper::default()
            },
        ])
    }

    #[test]
    fn topics_merge_case_insensitively() {
        let ctx = analyze_corpus(&sample()).unwrap();
        assert!(ctx.has_topic("transformers"));
        assert!(ctx.has_topic("TRANSFORMERS"));
        assert_eq!(ctx.top_topics(1), vec!["Transformers"]);
    }

    #[test]
    fn authors_count_collaborations() {
        let ctx = analyze_corpus(&sample()).unwrap();
        assert!(ctx.has_author("ashish vaswani"));
        assert_eq!(ctx.top_authors(1), vec!["Ashish Vaswani"]);
    }

    #[test]
    fn cited_ids_are_normalized() {
        let ctx = analyze_corpus(&sample()).unwrap();
        assert!(ctx.cites("10.1/abc"));
        assert!(ctx.cites("doi:10.2/def"));
        assert!(!ctx.cites("10.9/nope"));
    }

    #[test]
    fn recency_window_from_years() {
        let ctx = analyze_corpus(&sample()).unwrap();
        let (lo, hi) = ctx.recency_window().unwrap();
        assert!((2017..=2021).contains(&lo));
        assert!(lo <= hi);
    }

    #[test]
    fn empty_corpus_context() {
        let ctx = analyze_corpus(&FixedCorpus(vec![])).unwrap();
        assert!(ctx.is_empty());
        assert!(ctx.recency_window().is_none());
        assert!(ctx.top_topics(8).is_empty());
    }
}
