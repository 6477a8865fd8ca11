//! Query construction from source config plus corpus context

use thoth_core::error::DiscoveryError;
use thoth_core::query::NormalizedQuery;
use thoth_core::source_config::{AdapterParams, SourceConfig};

use crate::context::CorpusContext;

/// Highest-frequency topics folded into the query.
const MAX_QUERY_TOPICS: usize = 8;

/// Highest-collaboration authors folded into the query.
const MAX_QUERY_AUTHORS: usize = 5;

/// Merge `extra` into `into`, deduplicating case-insensitively and
/// preserving first-seen order and form.
fn merge_terms(into: &mut Vec<String>, extra: impl IntoIterator<Item = String>) {
    let mut seen: Vec<String> = into.iter().map(|s| s.trim().to_lowercase()).collect();
    for term in extra {
        let term = term.trim().to_string();
        if term.is_empty() {
            continue;
        }
        let key = term.to_lowercase();
        if !seen.contains(&key) {
            seen.push(key);
            into.push(term);
        }
    }
}

/// Build the normalized query for one source: explicit config keywords
/// enriched with the corpus's dominant topics and authors.
pub fn build_query(
    config: &SourceConfig,
    ctx: &CorpusContext,
) -> Result<NormalizedQuery, DiscoveryError> {
    let mut query = NormalizedQuery {
        date_from: config.filters.date_from,
        date_to: config.filters.date_to,
        ..NormalizedQuery::default()
    };

    match config.typed_params()? {
        AdapterParams::Arxiv(p) => {
            merge_terms(&mut query.keywords, p.keywords);
            merge_terms(&mut query.categories, p.categories);
        }
        AdapterParams::Pubmed(p) => merge_terms(&mut query.keywords, p.keywords),
        AdapterParams::Crossref(p) => merge_terms(&mut query.keywords, p.keywords),
        AdapterParams::Openalex(p) => {
            merge_terms(&mut query.keywords, p.keywords);
            merge_terms(&mut query.concepts, p.concepts);
        }
        AdapterParams::SemanticScholar(p) => merge_terms(&mut query.keywords, p.keywords),
        AdapterParams::Browser(_) => {
            // Browser workflows take the keyword string via parameterized
            // TYPE steps; filter keywords double as the injected terms.
            merge_terms(&mut query.keywords, config.filters.keywords.clone());
        }
    }

    merge_terms(&mut query.keywords, ctx.top_topics(MAX_QUERY_TOPICS));
    merge_terms(&mut query.authors, ctx.top_authors(MAX_QUERY_AUTHORS));

    log::debug!(
        "{}: query with {} keywords, {} categories, {} authors",
        config.name,
        query.keywords.len(),
        query.categories.len(),
        query.authors.len()
    );
    Ok(query)
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use serde_json::json;
    use thoth_core::paper::SourceKind;
    use thoth_core::source_config::{Schedule, SourceFilters};

    use crate::context::{CorpusPaper, CorpusReader, analyze_corpus};

    struct FixedCorpus(Vec<CorpusPaper>);

    impl CorpusReader for FixedCorpus {
        fn papers(&self) -> Result<Vec<CorpusPaper>> {
            Ok(self.0.clone())
        }
    }

    fn arxiv_config() -> SourceConfig {
        SourceConfig {
            name: "arxiv_ml".to_string(),
            kind: SourceKind::Arxiv,
            is_active: true,
            adapter_params: json!({
                "categories": ["cs.LG"],
                "keywords": ["transformer"],
            }),
            schedule: Schedule {
                interval_minutes: Some(60),
                ..Schedule::default()
            },
            filters: SourceFilters::default(),
            max_papers_per_run: Some(10),
            fan_out: false,
        }
    }

    fn corpus_ctx() -> CorpusContext {
        analyze_corpus(&FixedCorpus(vec![
            CorpusPaper {
                title: "A".to_string(),
                tags: vec!["Transformer".to_string(), "attention".to_string()],
                authors: vec!["Ashish Vaswani".to_string()],
                year: Some(2017),
                ..CorpusPaper::default()
            },
            CorpusPaper {
                title: "B".to_string(),
                tags: vec!["attention".to_string()],
                authors: vec!["Noam Shazeer".to_string()],
                year: Some(2018),
                ..CorpusPaper::default()
            },
        ]))
        .unwrap()
    }

    #[test]
    fn config_keywords_come_first() {
        let query = build_query(&arxiv_config(), &corpus_ctx()).unwrap();
        assert_eq!(query.keywords[0], "transformer");
        assert_eq!(query.categories, vec!["cs.LG"]);
    }

    #[test]
    fn corpus_topics_merge_case_insensitively() {
        let query = build_query(&arxiv_config(), &corpus_ctx()).unwrap();
        // "Transformer" from the corpus collides with the config keyword.
        assert_eq!(
            query
                .keywords
                .iter()
                .filter(|k| k.eq_ignore_ascii_case("transformer"))
                .count(),
            1
        );
        assert!(query.keywords.iter().any(|k| k == "attention"));
    }

    #[test]
    fn authors_come_from_corpus() {
        let query = build_query(&arxiv_config(), &corpus_ctx()).unwrap();
        assert!(query.authors.iter().any(|a| a == "Ashish Vaswani"));
        assert!(query.authors.len() <= MAX_QUERY_AUTHORS);
    }

    #[test]
    fn empty_corpus_keeps_config_terms_only() {
        let empty = analyze_corpus(&FixedCorpus(vec![])).unwrap();
        let query = build_query(&arxiv_config(), &empty).unwrap();
        assert_eq!(query.keywords, vec!["transformer"]);
        assert!(query.authors.is_empty());
    }

    #[test]
    fn date_range_carried_from_filters() {
        let mut config = arxiv_config();
        config.filters.date_from = chrono::NaiveDate::from_ymd_opt(2020, 1, 1);
        let query = build_query(&config, &corpus_ctx()).unwrap();
        assert_eq!(query.date_from, config.filters.date_from);
    }
}
