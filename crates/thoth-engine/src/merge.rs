//! Cross-provider deduplication and merge
//!
//! Candidates group by the first matching key: normalized DOI, then
//! normalized ArXiv id, then a fuzzy (title, year) key. Within a group
//! the best-provenance record wins, missing fields backfill from the
//! losers, and identifier sets union. Group representatives keep the
//! first-arrival order of any member.

use std::collections::HashMap;

use thoth_core::paper::{Paper, normalize_title};

/// Similarity floor for the fuzzy (title, year) key.
const FUZZY_THRESHOLD: f64 = 0.85;

/// Merge one run's candidates. Idempotent: `merge(merge(b)) == merge(b)`.
pub fn merge(batch: Vec<Paper>) -> Vec<Paper> {
    let mut groups: Vec<Vec<Paper>> = Vec::new();
    let mut by_doi: HashMap<String, usize> = HashMap::new();
    let mut by_arxiv: HashMap<String, usize> = HashMap::new();
    // (normalized title, year, group index) for fuzzy lookups.
    let mut fuzzy_keys: Vec<(String, i32, usize)> = Vec::new();

    for paper in batch {
        let doi = paper.ids.doi.clone();
        let arxiv = paper.ids.arxiv.clone();
        let title_key = normalize_title(&paper.title);
        let year = paper.year;

        // Unidentifiable and undated records are emitted as-is.
        if doi.is_none() && arxiv.is_none() && year.is_none() {
            groups.push(vec![paper]);
            continue;
        }

        let target = doi
            .as_ref()
            .and_then(|d| by_doi.get(d).copied())
            .or_else(|| arxiv.as_ref().and_then(|a| by_arxiv.get(a).copied()))
            .or_else(|| {
                let year = year?;
                fuzzy_keys
                    .iter()
                    .find(|(candidate, candidate_year, _)| {
                        *candidate_year == year
                            && strsim::normalized_levenshtein(candidate, &title_key)
                                >= FUZZY_THRESHOLD
                    })
                    .map(|(_, _, idx)| *idx)
            });

        let idx = match target {
            Some(idx) => {
                groups[idx].push(paper);
                idx
            }
            None => {
                groups.push(vec![paper]);
                groups.len() - 1
            }
        };

        // Register every key this member carries so later candidates
        // match the group through any of them.
        if let Some(d) = doi {
            by_doi.entry(d).or_insert(idx);
        }
        if let Some(a) = arxiv {
            by_arxiv.entry(a).or_insert(idx);
        }
        if let Some(y) = year {
            if !title_key.is_empty() {
                fuzzy_keys.push((title_key, y, idx));
            }
        }
    }

    groups.into_iter().map(collapse_group).collect()
}

/// Pick the group winner and fold the losers into it.
fn collapse_group(mut members: Vec<Paper>) -> Paper {
    if members.len() == 1 {
        return members.pop().expect("non-empty group");
    }

    let winner_idx = members
        .iter()
        .enumerate()
        .max_by(|(ia, a), (ib, b)| {
            a.source
                .merge_priority()
                .cmp(&b.source.merge_priority())
                .then(a.populated_fields().cmp(&b.populated_fields()))
                // Earlier fetch wins the final tie, so later loses.
                .then(b.fetched_at.cmp(&a.fetched_at))
                .then(ib.cmp(ia))
        })
        .map(|(i, _)| i)
        .expect("non-empty group");

    let mut winner = members.swap_remove(winner_idx);

    // Backfill in provenance order, richest loser first.
    members.sort_by(|a, b| {
        b.source
            .merge_priority()
            .cmp(&a.source.merge_priority())
            .then(b.populated_fields().cmp(&a.populated_fields()))
            .then(a.fetched_at.cmp(&b.fetched_at))
    });

    for loser in &members {
        winner.ids.union_from(&loser.ids);
        if winner.abstract_text.is_none() {
            winner.abstract_text = loser.abstract_text.clone();
        }
        if winner.year.is_none() {
            winner.year = loser.year;
        }
        if winner.venue.is_none() {
            winner.venue = loser.venue.clone();
        }
        if winner.authors.is_empty() {
            winner.authors = loser.authors.clone();
        }
        if winner.concepts.is_empty() {
            winner.concepts = loser.concepts.clone();
        }
        if winner.references.is_empty() {
            winner.references = loser.references.clone();
        }
        if winner.citation_count.is_none() {
            winner.citation_count = loser.citation_count;
        }
        if winner.open_access_url.is_none() {
            winner.open_access_url = loser.open_access_url.clone();
        }
    }
    winner
}
