//! Relevance filter
//!
//! Pure: scores each paper against the corpus context and applies the
//! explicit per-source filters. Order-preserving and idempotent.

use thoth_analyzer::{CorpusContext, score_relevance};
use thoth_core::paper::Paper;
use thoth_core::source_config::SourceFilters;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    BelowThreshold,
    DateOutOfRange,
    MissingRequiredKeyword,
    BelowMinCitations,
}

impl RejectReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::BelowThreshold => "below_threshold",
            Self::DateOutOfRange => "date_out_of_range",
            Self::MissingRequiredKeyword => "missing_required_keyword",
            Self::BelowMinCitations => "below_min_citations",
        }
    }
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Default)]
pub struct FilterOutcome {
    pub accepted: Vec<Paper>,
    pub rejected: Vec<(Paper, RejectReason)>,
}

/// Check one paper. `None` means accepted.
pub fn check_paper(
    paper: &Paper,
    filters: &SourceFilters,
    threshold: f64,
    ctx: &CorpusContext,
) -> Option<RejectReason> {
    // A paper with no year cannot be disproven against a date range.
    if let Some(year) = paper.year {
        if let Some(from) = filters.date_from {
            if year < chrono::Datelike::year(&from) {
                return Some(RejectReason::DateOutOfRange);
            }
        }
        if let Some(to) = filters.date_to {
            if year > chrono::Datelike::year(&to) {
                return Some(RejectReason::DateOutOfRange);
            }
        }
    }

    if !filters.keywords.is_empty() {
        let haystack = format!(
            "{} {} {}",
            paper.title,
            paper.abstract_text.as_deref().unwrap_or_default(),
            paper.concepts.join(" ")
        )
        .to_lowercase();
        let any_hit = filters
            .keywords
            .iter()
            .any(|k| haystack.contains(&k.trim().to_lowercase()));
        if !any_hit {
            return Some(RejectReason::MissingRequiredKeyword);
        }
    }

    if let Some(min) = filters.min_citation_count {
        // An absent count is treated as zero: the minimum demands evidence.
        if paper.citation_count.unwrap_or(0) < min {
            return Some(RejectReason::BelowMinCitations);
        }
    }

    if score_relevance(paper, ctx) < threshold {
        return Some(RejectReason::BelowThreshold);
    }
    None
}

/// Partition papers into accepted and rejected-with-reason.
pub fn apply(
    papers: Vec<Paper>,
    filters: &SourceFilters,
    threshold: f64,
    ctx: &CorpusContext,
) -> FilterOutcome {
    let mut outcome = FilterOutcome::default();
    for paper in papers {
        match check_paper(&paper, filters, threshold, ctx) {
            None => outcome.accepted.push(paper),
            Some(reason) => outcome.rejected.push((paper, reason)),
        }
    }
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use chrono::NaiveDate;
    use thoth_analyzer::{CorpusPaper, CorpusReader, analyze_corpus};
    use thoth_core::paper::SourceKind;

    struct FixedCorpus(Vec<CorpusPaper>);

    impl CorpusReader for FixedCorpus {
        fn papers(&self) -> Result<Vec<CorpusPaper>> {
            Ok(self.0.clone())
        }
    }

    fn empty_ctx() -> CorpusContext {
        analyze_corpus(&FixedCorpus(vec![])).unwrap()
    }

    fn paper(title: &str) -> Paper {
        let mut p = Paper::new(SourceKind::Arxiv, title);
        p.ids.arxiv = Some("2101.00001".to_string());
        p.year = Some(2021);
        p
    }

    #[test]
    fn zero_threshold_accepts_everything() {
        let outcome = apply(
            vec![paper("A"), paper("B")],
            &SourceFilters::default(),
            0.0,
            &empty_ctx(),
        );
        assert_eq!(outcome.accepted.len(), 2);
        assert!(outcome.rejected.is_empty());
    }

    #[test]
    fn below_threshold_is_rejected_with_reason() {
        let outcome = apply(
            vec![paper("A")],
            &SourceFilters::default(),
            0.5,
            &empty_ctx(),
        );
        assert!(outcome.accepted.is_empty());
        assert_eq!(outcome.rejected[0].1, RejectReason::BelowThreshold);
    }

    #[test]
    fn date_out_of_range() {
        let filters = SourceFilters {
            date_from: NaiveDate::from_ymd_opt(2022, 1, 1),
            ..SourceFilters::default()
        };
        let outcome = apply(vec![paper("Old")], &filters, 0.0, &empty_ctx());
        assert_eq!(outcome.rejected[0].1, RejectReason::DateOutOfRange);
    }

    #[test]
    fn missing_year_passes_date_filter() {
        let filters = SourceFilters {
            date_from: NaiveDate::from_ymd_opt(2022, 1, 1),
            ..SourceFilters::default()
        };
        let mut p = paper("Undated");
        p.year = None;
        let outcome = apply(vec![p], &filters, 0.0, &empty_ctx());
        assert_eq!(outcome.accepted.len(), 1);
    }

    #[test]
    fn keyword_filter_searches_title_abstract_concepts() {
        let filters = SourceFilters {
            keywords: vec!["Transformer".to_string()],
            ..SourceFilters::default()
        };
        let mut in_abstract = paper("A");
        in_abstract.abstract_text = Some("We use a transformer model.".to_string());
        let mut in_concepts = paper("B");
        in_concepts.concepts = vec!["Transformers".to_string()];
        let miss = paper("C");

        let outcome = apply(
            vec![in_abstract, in_concepts, miss],
            &filters,
            0.0,
            &empty_ctx(),
        );
        assert_eq!(outcome.accepted.len(), 2);
        assert_eq!(outcome.rejected[0].1, RejectReason::MissingRequiredKeyword);
    }

    #[test]
    fn citation_minimum_treats_missing_as_zero() {
        let filters = SourceFilters {
            min_citation_count: Some(10),
            ..SourceFilters::default()
        };
        let mut cited = paper("Cited");
        cited.citation_count = Some(50);
        let uncited = paper("Uncited");

        let outcome = apply(vec![cited, uncited], &filters, 0.0, &empty_ctx());
        assert_eq!(outcome.accepted.len(), 1);
        assert_eq!(outcome.rejected[0].1, RejectReason::BelowMinCitations);
    }

    #[test]
    fn filter_preserves_order_and_is_idempotent() {
        let papers = vec![paper("A"), paper("B"), paper("C")];
        let once = apply(papers, &SourceFilters::default(), 0.0, &empty_ctx());
        let titles: Vec<&str> = once.accepted.iter().map(|p| p.title.as_str()).collect();
        assert_eq!(titles, vec!["A", "B", "C"]);

        let twice = apply(
            once.accepted.clone(),
            &SourceFilters::default(),
            0.0,
            &empty_ctx(),
        );
        assert_eq!(twice.accepted.len(), once.accepted.len());
        assert!(twice.rejected.is_empty());
    }

    #[test]
    fn relevant_paper_passes_real_threshold() {
        let ctx = analyze_corpus(&FixedCorpus(vec![CorpusPaper {
            title: "Seed".to_string(),
            tags: vec!["transformers".to_string()],
            ..CorpusPaper::default()
        }]))
        .unwrap();
        let mut p = paper("Candidate");
        p.concepts = vec!["Transformers".to_string()];
        // Full topic overlap with no references scores 0.7.
        let outcome = apply(vec![p], &SourceFilters::default(), 0.7, &ctx);
        assert_eq!(outcome.accepted.len(), 1);
    }
}
