//! Thoth Analyzer - Corpus-driven query shaping and relevance scoring
//!
//! Reads the user's existing paper corpus and produces (a) query
//! refinements for the discovery manager and (b) a relevance scorer used
//! by the filter stage. Deterministic for a given corpus snapshot.

pub mod context;
pub mod query_builder;
pub mod score;

pub use context::{CorpusContext, CorpusPaper, CorpusReader, analyze_corpus};
pub use query_builder::build_query;
pub use score::score_relevance;
