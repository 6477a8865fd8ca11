//! Normalized query handed to adapters
//!
//! Built by the context analyzer from the source config plus the corpus;
//! each adapter translates it into its provider's protocol.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NormalizedQuery {
    /// Free-text terms, OR'ed by adapters that support it.
    pub keywords: Vec<String>,
    /// Provider category codes (e.g. ArXiv `cs.LG`).
    pub categories: Vec<String>,
    /// Author names for providers with author search.
    pub authors: Vec<String>,
    /// Concept/topic names for providers with concept filters.
    pub concepts: Vec<String>,
    pub date_from: Option<NaiveDate>,
    pub date_to: Option<NaiveDate>,
}

impl NormalizedQuery {
    pub fn is_empty(&self) -> bool {
        self.keywords.is_empty()
            && self.categories.is_empty()
            && self.authors.is_empty()
            && self.concepts.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_query() {
        let q = NormalizedQuery::default();
        assert!(q.is_empty());
    }

    #[test]
    fn query_with_keywords_is_not_empty() {
        let q = NormalizedQuery {
            keywords: vec!["transformer".to_string()],
            ..NormalizedQuery::default()
        };
        assert!(!q.is_empty());
    }
}
