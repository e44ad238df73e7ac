//! Two-stage Reciprocal Rank Fusion and bounded keyword boosts.
//!
//! Every source list contributes `weight / (k + rank)` per item, with ranks
//! starting at 1. Stage 1 merges the full-text and vector lists into one
//! content ranking; stage 2 merges that ranking with the metadata
//! (title/path) list.
//!
//! Ties on the fused score go to the item with the smaller minimum rank over
//! the source lists, then to the smaller id, so the output order is fully
//! deterministic.

use std::cmp::Ordering;
use std::collections::HashMap;

/// Standard RRF smoothing constant.
pub const RRF_K: f64 = 60.0;

/// Per-term multiplier step for matching additional distinct query terms.
pub const DIVERSITY_STEP: f64 = 0.15;
/// Number of extra distinct terms that still earn a diversity bonus.
pub const MAX_DIVERSITY_TERMS: usize = 4;
/// Occurrence ceiling for the density boost.
pub const MAX_DENSITY_OCCURRENCES: usize = 10;
/// Largest density bonus (multiplier tops out at `1 + MAX_DENSITY_BONUS`).
pub const MAX_DENSITY_BONUS: f64 = 0.5;

const SCORE_EPSILON: f64 = 1e-12;

/// Fusion weights and pool bounds.
#[derive(Debug, Clone)]
pub struct FusionConfig {
    /// RRF smoothing constant `k`.
    pub k: f64,
    /// Stage 1 weight of the full-text list; the vector list gets `1 - w`.
    pub content_weight: f64,
    /// Stage 2 weight of the metadata list; the content ranking gets `1 - w`.
    pub metadata_weight: f64,
    /// Only the top `pool_size` items of each source list are fused.
    pub pool_size: usize,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            k: RRF_K,
            content_weight: 0.5,
            metadata_weight: 0.3,
            pool_size: 100,
        }
    }
}

/// One fused item.
#[derive(Debug, Clone, PartialEq)]
pub struct FusedItem {
    pub id: String,
    pub score: f64,
    /// Smallest 1-based rank this item had in any source list.
    pub min_rank: usize,
}

/// Ranks (1-based) an item had in each source list.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SourceRanks {
    pub fulltext: Option<usize>,
    pub vector: Option<usize>,
    pub metadata: Option<usize>,
}

impl SourceRanks {
    pub fn min_rank(&self) -> usize {
        [self.fulltext, self.vector, self.metadata]
            .into_iter()
            .flatten()
            .min()
            .unwrap_or(usize::MAX)
    }
}

/// Order by score desc, then min rank asc, then id asc.
pub fn compare_fused(a: &FusedItem, b: &FusedItem) -> Ordering {
    b.score
        .partial_cmp(&a.score)
        .unwrap_or(Ordering::Equal)
        .then(a.min_rank.cmp(&b.min_rank))
        .then(a.id.cmp(&b.id))
}

/// Weighted RRF over any number of lists.
///
/// `min_ranks` supplies the tie-break rank for each id; ids missing from it
/// fall back to their best rank in `lists`.
pub fn weighted_rrf(
    lists: &[(&[String], f64)],
    k: f64,
    min_ranks: &HashMap<String, usize>,
) -> Vec<FusedItem> {
    let ranked: Vec<(Vec<(&str, usize)>, f64)> = lists
        .iter()
        .map(|(list, weight)| {
            let ranks = list
                .iter()
                .enumerate()
                .map(|(i, id)| (id.as_str(), i + 1))
                .collect();
            (ranks, *weight)
        })
        .collect();
    fuse_ranked(&ranked, k, min_ranks)
}

/// Weighted RRF over lists that carry explicit (possibly shared) ranks.
fn fuse_ranked(
    lists: &[(Vec<(&str, usize)>, f64)],
    k: f64,
    min_ranks: &HashMap<String, usize>,
) -> Vec<FusedItem> {
    let mut scores: HashMap<&str, f64> = HashMap::new();
    let mut best: HashMap<&str, usize> = HashMap::new();

    for (list, weight) in lists {
        for &(id, rank) in list {
            *scores.entry(id).or_insert(0.0) += weight / (k + rank as f64);
            best.entry(id)
                .and_modify(|r| *r = (*r).min(rank))
                .or_insert(rank);
        }
    }

    let mut fused: Vec<FusedItem> = scores
        .into_iter()
        .map(|(id, score)| FusedItem {
            id: id.to_string(),
            score,
            min_rank: min_ranks
                .get(id)
                .copied()
                .unwrap_or_else(|| best.get(id).copied().unwrap_or(usize::MAX)),
        })
        .collect();

    fused.sort_by(compare_fused);
    fused
}

/// Competition ranking ("1224"): items with equal scores share a rank.
fn tied_ranks(items: &[FusedItem]) -> Vec<(&str, usize)> {
    let mut out = Vec::with_capacity(items.len());
    let mut rank = 0;
    let mut prev: Option<f64> = None;
    for (i, item) in items.iter().enumerate() {
        if prev.map_or(true, |p| (p - item.score).abs() > SCORE_EPSILON) {
            rank = i + 1;
        }
        prev = Some(item.score);
        out.push((item.id.as_str(), rank));
    }
    out
}

/// Run both fusion stages over the three source lists.
///
/// Lists are truncated to `config.pool_size` before scoring. Items tied after
/// stage 1 enter stage 2 with the same content rank, so the stage 1 tie-break
/// never turns into a score difference.
pub fn fuse_two_stage(
    fulltext: &[String],
    vector: &[String],
    metadata: &[String],
    config: &FusionConfig,
) -> Vec<FusedItem> {
    let pool = config.pool_size.max(1);
    let fulltext = &fulltext[..fulltext.len().min(pool)];
    let vector = &vector[..vector.len().min(pool)];
    let metadata = &metadata[..metadata.len().min(pool)];

    let ranks = source_ranks(fulltext, vector, metadata);
    let min_ranks: HashMap<String, usize> = ranks
        .iter()
        .map(|(id, r)| (id.clone(), r.min_rank()))
        .collect();

    let w = config.content_weight.clamp(0.0, 1.0);
    let content = weighted_rrf(&[(fulltext, w), (vector, 1.0 - w)], config.k, &min_ranks);

    let m = config.metadata_weight.clamp(0.0, 1.0);
    let metadata_ranks: Vec<(&str, usize)> = metadata
        .iter()
        .enumerate()
        .map(|(i, id)| (id.as_str(), i + 1))
        .collect();
    fuse_ranked(
        &[(tied_ranks(&content), 1.0 - m), (metadata_ranks, m)],
        config.k,
        &min_ranks,
    )
}

/// Collect each id's 1-based rank in every source list.
pub fn source_ranks(
    fulltext: &[String],
    vector: &[String],
    metadata: &[String],
) -> HashMap<String, SourceRanks> {
    let mut ranks: HashMap<String, SourceRanks> = HashMap::new();
    for (i, id) in fulltext.iter().enumerate() {
        let e = ranks.entry(id.clone()).or_default();
        e.fulltext = Some(e.fulltext.map_or(i + 1, |r| r.min(i + 1)));
    }
    for (i, id) in vector.iter().enumerate() {
        let e = ranks.entry(id.clone()).or_default();
        e.vector = Some(e.vector.map_or(i + 1, |r| r.min(i + 1)));
    }
    for (i, id) in metadata.iter().enumerate() {
        let e = ranks.entry(id.clone()).or_default();
        e.metadata = Some(e.metadata.map_or(i + 1, |r| r.min(i + 1)));
    }
    ranks
}

/// Multiplier rewarding matches on more distinct query terms.
///
/// The first matched term earns nothing; each further distinct term adds
/// [`DIVERSITY_STEP`], up to [`MAX_DIVERSITY_TERMS`] extra terms.
pub fn diversity_boost(text_lower: &str, terms: &[String]) -> f64 {
    let matched = terms
        .iter()
        .filter(|t| !t.is_empty() && text_lower.contains(t.as_str()))
        .count();
    let extra = matched.saturating_sub(1).min(MAX_DIVERSITY_TERMS);
    1.0 + DIVERSITY_STEP * extra as f64
}

/// Multiplier rewarding query-term frequency relative to text length.
///
/// Occurrences are capped at [`MAX_DENSITY_OCCURRENCES`]; the result is in
/// `[1, 1 + MAX_DENSITY_BONUS]`.
pub fn density_boost(text_lower: &str, terms: &[String]) -> f64 {
    let words = text_lower.split_whitespace().count();
    if words == 0 || terms.is_empty() {
        return 1.0;
    }
    let occurrences: usize = terms
        .iter()
        .filter(|t| !t.is_empty())
        .map(|t| text_lower.matches(t.as_str()).count())
        .sum::<usize>()
        .min(MAX_DENSITY_OCCURRENCES);
    // Dense means roughly one hit per ten words.
    let ratio = (occurrences as f64 * 10.0 / words as f64).min(1.0);
    1.0 + MAX_DENSITY_BONUS * ratio
}

/// Combined keyword boost applied to full-text candidates before fusion.
pub fn keyword_boost(text: &str, terms: &[String]) -> f64 {
    let lower = text.to_lowercase();
    diversity_boost(&lower, terms) * density_boost(&lower, terms)
}

/// Upper bound of [`keyword_boost`].
pub fn max_keyword_boost() -> f64 {
    (1.0 + DIVERSITY_STEP * MAX_DIVERSITY_TERMS as f64) * (1.0 + MAX_DENSITY_BONUS)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn position(items: &[FusedItem], id: &str) -> usize {
        items.iter().position(|f| f.id == id).unwrap()
    }

    fn score(items: &[FusedItem], id: &str) -> f64 {
        items.iter().find(|f| f.id == id).unwrap().score
    }

    #[test]
    fn test_item_in_both_lists_beats_single_list() {
        let fulltext = ids(&["x", "y", "z"]);
        let vector = ids(&["y", "x", "w"]);
        let fused = fuse_two_stage(&fulltext, &vector, &[], &FusionConfig::default());

        assert!(score(&fused, "y") >= score(&fused, "x"));
        assert!(position(&fused, "y") < position(&fused, "z"));
        assert!(position(&fused, "x") < position(&fused, "w"));
    }

    #[test]
    fn test_metadata_list_lifts_item() {
        let fulltext = ids(&["x", "y", "z"]);
        let vector = ids(&["y", "x", "w"]);
        let config = FusionConfig::default();

        let without = fuse_two_stage(&fulltext, &vector, &[], &config);
        let with = fuse_two_stage(&fulltext, &vector, &ids(&["w"]), &config);

        assert!(position(&with, "w") < position(&without, "w"));
    }

    #[test]
    fn test_tie_break_prefers_smaller_min_rank() {
        let mut min_ranks = HashMap::new();
        min_ranks.insert("a".to_string(), 3);
        min_ranks.insert("b".to_string(), 1);
        let (a, b) = (ids(&["a"]), ids(&["b"]));
        let fused = weighted_rrf(&[(a.as_slice(), 1.0), (b.as_slice(), 1.0)], RRF_K, &min_ranks);
        assert_eq!(fused[0].id, "b");
        assert_eq!(fused[0].score, fused[1].score);
    }

    #[test]
    fn test_tie_break_falls_back_to_id() {
        let (b, a) = (ids(&["b"]), ids(&["a"]));
        let fused = weighted_rrf(
            &[(b.as_slice(), 1.0), (a.as_slice(), 1.0)],
            RRF_K,
            &HashMap::new(),
        );
        assert_eq!(fused[0].id, "a");
    }

    #[test]
    fn test_content_weight_extremes() {
        let fulltext = ids(&["a"]);
        let vector = ids(&["b"]);

        let keyword_only = FusionConfig {
            content_weight: 1.0,
            metadata_weight: 0.0,
            ..FusionConfig::default()
        };
        let fused = fuse_two_stage(&fulltext, &vector, &[], &keyword_only);
        assert_eq!(fused[0].id, "a");

        let vector_only = FusionConfig {
            content_weight: 0.0,
            metadata_weight: 0.0,
            ..FusionConfig::default()
        };
        let fused = fuse_two_stage(&fulltext, &vector, &[], &vector_only);
        assert_eq!(fused[0].id, "b");
    }

    #[test]
    fn test_pool_size_bounds_candidates() {
        let fulltext = ids(&["a", "b", "c", "d"]);
        let config = FusionConfig {
            pool_size: 2,
            ..FusionConfig::default()
        };
        let fused = fuse_two_stage(&fulltext, &[], &[], &config);
        assert_eq!(fused.len(), 2);
    }

    #[test]
    fn test_empty_lists() {
        assert!(fuse_two_stage(&[], &[], &[], &FusionConfig::default()).is_empty());
    }

    #[test]
    fn test_results_sorted_descending() {
        let fused = fuse_two_stage(
            &ids(&["a", "b", "c"]),
            &ids(&["d", "e", "f"]),
            &ids(&["c", "f"]),
            &FusionConfig::default(),
        );
        for pair in fused.windows(2) {
            assert!(pair[0].score >= pair[1].score);
        }
    }

    #[test]
    fn test_diversity_boost_is_capped() {
        let terms: Vec<String> = (0..10).map(|i| format!("t{i}")).collect();
        let text = terms.join(" ");
        let boost = diversity_boost(&text, &terms);
        assert!((boost - (1.0 + DIVERSITY_STEP * MAX_DIVERSITY_TERMS as f64)).abs() < 1e-9);
        assert_eq!(diversity_boost("t0 only", &terms), 1.0);
    }

    #[test]
    fn test_density_boost_is_bounded() {
        let terms = vec!["rust".to_string()];
        let dense = "rust ".repeat(500);
        let boost = density_boost(&dense, &terms);
        assert!(boost <= 1.0 + MAX_DENSITY_BONUS);

        let sparse = format!("rust {}", "filler ".repeat(500));
        assert!(density_boost(&sparse, &terms) < boost);
        assert_eq!(density_boost("", &terms), 1.0);
    }

    #[test]
    fn test_keyword_boost_never_exceeds_ceiling() {
        let terms: Vec<String> = ["a", "b", "c", "d", "e", "f"].iter().map(|s| s.to_string()).collect();
        let text = "a b c d e f ".repeat(200);
        assert!(keyword_boost(&text, &terms) <= max_keyword_boost() + 1e-9);
    }
}
