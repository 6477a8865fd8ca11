//! Relevance scoring against the corpus context
//!
//! Weighted sum over [0, 1] sub-scores: topic overlap 0.4, author overlap
//! 0.3, citation overlap 0.3. When a paper exposes no references, the
//! topic weight absorbs the citation weight.

use thoth_core::paper::Paper;

use crate::context::CorpusContext;

const TOPIC_WEIGHT: f64 = 0.4;
const AUTHOR_WEIGHT: f64 = 0.3;
const CITATION_WEIGHT: f64 = 0.3;

/// Score a candidate against the corpus. Deterministic; always in [0, 1].
pub fn score_relevance(paper: &Paper, ctx: &CorpusContext) -> f64 {
    let topic_overlap = if paper.concepts.is_empty() {
        0.0
    } else {
        let matched = paper
            .concepts
            .iter()
            .filter(|c| ctx.has_topic(c))
            .count();
        matched as f64 / paper.concepts.len().max(1) as f64
    };

    let author_overlap = if paper
        .authors
        .iter()
        .any(|a| ctx.has_author(&a.full_name))
    {
        1.0
    } else {
        0.0
    };

    let score = if paper.references.is_empty() {
        // No reference data: topic absorbs the citation weight.
        (TOPIC_WEIGHT + CITATION_WEIGHT) * topic_overlap + AUTHOR_WEIGHT * author_overlap
    } else {
        let cited = paper
            .references
            .iter()
            .filter(|r| ctx.cites(r))
            .count();
        let citation_overlap = cited as f64 / paper.references.len().max(1) as f64;
        TOPIC_WEIGHT * topic_overlap
            + AUTHOR_WEIGHT * author_overlap
            + CITATION_WEIGHT * citation_overlap
    };

    score.clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use thoth_core::paper::{Author, SourceKind};

    use crate::context::{CorpusPaper, CorpusReader, analyze_corpus};

    struct FixedCorpus(Vec<CorpusPaper>);

    impl CorpusReader for FixedCorpus {
        fn papers(&self) -> Result<Vec<CorpusPaper>> {
            Ok(self.0.clone())
        }
    }

    fn ctx() -> CorpusContext {
        analyze_corpus(&FixedCorpus(vec![CorpusPaper {
            title: "Seed".to_string(),
            tags: vec!["transformers".to_string(), "attention".to_string()],
            authors: vec!["Ashish Vaswani".to_string()],
            cited_ids: vec!["10.1/abc".to_string(), "10.2/def".to_string()],
            year: Some(2017),
            ..CorpusPaper::default()
        }]))
        .unwrap()
    }

    fn candidate() -> Paper {
        let mut p = Paper::new(SourceKind::Arxiv, "Candidate");
        p.ids.arxiv = Some("2101.00001".to_string());
        p.year = Some(2021);
        p
    }

    #[test]
    fn empty_corpus_scores_zero() {
        let empty = analyze_corpus(&FixedCorpus(vec![])).unwrap();
        let mut p = candidate();
        p.concepts = vec!["transformers".to_string()];
        assert_eq!(score_relevance(&p, &empty), 0.0);
    }

    #[test]
    fn full_topic_overlap_without_references_scores_point_seven() {
        let mut p = candidate();
        p.concepts = vec!["Transformers".to_string(), "Attention".to_string()];
        let s = score_relevance(&p, &ctx());
        assert!((s - 0.7).abs() < 1e-9, "got {s}");
    }

    #[test]
    fn author_match_adds_point_three() {
        let mut p = candidate();
        p.authors.push(Author::from_full_name("Ashish Vaswani"));
        let s = score_relevance(&p, &ctx());
        assert!((s - 0.3).abs() < 1e-9, "got {s}");
    }

    #[test]
    fn citation_overlap_uses_reference_fraction() {
        let mut p = candidate();
        p.references = vec!["10.1/abc".to_string(), "10.9/other".to_string()];
        let s = score_relevance(&p, &ctx());
        // Half the references hit -> 0.3 * 0.5.
        assert!((s - 0.15).abs() < 1e-9, "got {s}");
    }

    #[test]
    fn with_references_topic_weight_is_not_absorbed() {
        let mut p = candidate();
        p.concepts = vec!["transformers".to_string()];
        p.references = vec!["10.9/other".to_string()];
        let s = score_relevance(&p, &ctx());
        assert!((s - 0.4).abs() < 1e-9, "got {s}");
    }

    #[test]
    fn perfect_candidate_scores_one() {
        let mut p = candidate();
        p.concepts = vec!["transformers".to_string()];
        p.authors.push(Author::from_full_name("ashish vaswani"));
        p.references = vec!["10.1/abc".to_string()];
        let s = score_relevance(&p, &ctx());
        assert!((s - 1.0).abs() < 1e-9, "got {s}");
    }
}
