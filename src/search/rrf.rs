//! Reciprocal Rank Fusion (RRF) algorithm.
//!
//! Combines multiple ranked lists into a single fused ranking. Based on:
//! Cormack, Clarke, Buettcher (2009) — "Reciprocal Rank Fusion outperforms
//! Condorcet and individual Rank Learning Methods". Generalized from the
//! teacher's `i64` chunk-id version to the `String` document ids this
//! domain uses, and extended with the documented tie-break rule: ties on
//! fused score are broken first by the number of lists an id appeared in
//! (more is better), then by the earliest rank at which it was seen across
//! all lists (lower is better), then lexicographically by id.

use std::cmp::Ordering;
use std::collections::HashMap;

/// Configuration for RRF algorithm.
#[derive(Debug, Clone, Copy)]
pub struct RrfConfig {
    /// The k parameter controls how much weight is given to lower-ranked
    /// items. Higher k values flatten the distribution. Default is 60, the
    /// value recommended in the original paper.
    pub k: u32,
}

impl Default for RrfConfig {
    fn default() -> Self {
        Self { k: 60 }
    }
}

impl RrfConfig {
    /// Creates a new RRF config with the specified k value.
    #[must_use]
    pub const fn new(k: u32) -> Self {
        Self { k }
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct TieBreak {
    list_count: u32,
    first_seen_rank: usize,
}

fn order(a: (&str, f64, TieBreak), b: (&str, f64, TieBreak)) -> Ordering {
    b.1.partial_cmp(&a.1)
        .unwrap_or(Ordering::Equal)
        .then_with(|| b.2.list_count.cmp(&a.2.list_count))
        .then_with(|| a.2.first_seen_rank.cmp(&b.2.first_seen_rank))
        .then_with(|| a.0.cmp(b.0))
}

/// Performs Reciprocal Rank Fusion on multiple ranked lists of document ids.
///
/// The RRF score for each item is `score(d) = Σ 1 / (k + rank(d) + 1)`,
/// summed over every list containing `d` (`rank` is 0-indexed). Ties are
/// broken as documented on the module.
///
/// # Examples
///
/// ```
/// use rag_orchestrator::search::rrf::{reciprocal_rank_fusion, RrfConfig};
///
/// let list1 = vec!["a".to_string(), "b".to_string()];
/// let list2 = vec!["b".to_string(), "a".to_string()];
///
/// let fused = reciprocal_rank_fusion(&[&list1, &list2], &RrfConfig::default());
/// assert_eq!(fused.len(), 2);
/// ```
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn reciprocal_rank_fusion(ranked_lists: &[&[String]], config: &RrfConfig) -> Vec<(String, f64)> {
    let mut scores: HashMap<&str, f64> = HashMap::new();
    let mut ties: HashMap<&str, TieBreak> = HashMap::new();

    for list in ranked_lists {
        for (rank, item_id) in list.iter().enumerate() {
            let rrf_score = 1.0 / f64::from(config.k + (rank as u32) + 1);
            *scores.entry(item_id.as_str()).or_insert(0.0) += rrf_score;
            let tie = ties.entry(item_id.as_str()).or_insert(TieBreak {
                list_count: 0,
                first_seen_rank: usize::MAX,
            });
            tie.list_count += 1;
            tie.first_seen_rank = tie.first_seen_rank.min(rank);
        }
    }

    let mut results: Vec<(String, f64)> = scores
        .into_iter()
        .map(|(id, score)| (id.to_string(), score))
        .collect();
    results.sort_by(|a, b| order((&a.0, a.1, ties[a.0.as_str()]), (&b.0, b.1, ties[b.0.as_str()])));
    results
}

/// Performs weighted RRF where each list carries its own weight. Useful
/// when one retrieval method (e.g. dense vs. lexical) should count more.
///
/// Ties are broken identically to [`reciprocal_rank_fusion`].
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn weighted_rrf(ranked_lists: &[(&[String], f64)], config: &RrfConfig) -> Vec<(String, f64)> {
    let mut scores: HashMap<&str, f64> = HashMap::new();
    let mut ties: HashMap<&str, TieBreak> = HashMap::new();

    for (list, weight) in ranked_lists {
        for (rank, item_id) in list.iter().enumerate() {
            let rrf_score = weight / f64::from(config.k + (rank as u32) + 1);
            *scores.entry(item_id.as_str()).or_insert(0.0) += rrf_score;
            let tie = ties.entry(item_id.as_str()).or_insert(TieBreak {
                list_count: 0,
                first_seen_rank: usize::MAX,
            });
            tie.list_count += 1;
            tie.first_seen_rank = tie.first_seen_rank.min(rank);
        }
    }

    let mut results: Vec<(String, f64)> = scores
        .into_iter()
        .map(|(id, score)| (id.to_string(), score))
        .collect();
    results.sort_by(|a, b| order((&a.0, a.1, ties[a.0.as_str()]), (&b.0, b.1, ties[b.0.as_str()])));
    results
}
