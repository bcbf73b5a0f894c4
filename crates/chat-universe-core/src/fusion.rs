//! Weighted Reciprocal Rank Fusion (RRF).

use std::collections::{HashMap, HashSet};
use std::hash::Hash;

/// RRF smoothing constant `k` from Cormack, Clarke and Buettcher (SIGIR 2009).
///
/// Larger values flatten the difference between adjacent ranks.
pub const RRF_K: f64 = 60.0;

/// Contribution of a single list entry at 0-based `rank`.
pub fn rrf_contribution(weight: f64, rank: usize) -> f64 {
    weight / (RRF_K + rank as f64 + 1.0)
}

/// Fuse any number of ranked lists, each paired with a weight.
///
/// Each item scores `Σ weight_list / (k + rank_in_list + 1)` over the lists
/// it appears in. An item repeated within one list only counts at its best
/// (first) rank. The output is sorted by fused score descending; ties keep
/// first-seen order.
pub fn weighted_rrf<T: Clone + Eq + Hash>(lists: &[(&[T], f64)]) -> Vec<(T, f64)> {
    let mut scores: HashMap<T, f64> = HashMap::new();
    let mut first_seen: Vec<T> = Vec::new();

    for (items, weight) in lists {
        let mut seen_in_list: HashSet<&T> = HashSet::new();
        for (rank, item) in items.iter().enumerate() {
            if !seen_in_list.insert(item) {
                continue;
            }
            let entry = scores.entry(item.clone()).or_insert_with(|| {
                first_seen.push(item.clone());
                0.0
            });
            *entry += rrf_contribution(*weight, rank);
        }
    }

    let mut fused: Vec<(T, f64)> = first_seen
        .into_iter()
        .map(|item| {
            let score = scores.get(&item).copied().unwrap_or(0.0);
            (item, score)
        })
        .collect();
    // Stable sort preserves first-seen order among equal scores.
    fused.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    fused
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(fused: &[(&'static str, f64)]) -> Vec<&'static str> {
        fused.iter().map(|(id, _)| *id).collect()
    }

    #[test]
    fn zero_semantic_weight_keeps_full_text_order() {
        let fts = ["u3", "u1", "u2"];
        let semantic = ["u2", "u1", "u4"];
        let fused = weighted_rrf(&[(&fts[..], 1.0), (&semantic[..], 0.0)]);
        assert_eq!(&ids(&fused)[..3], &["u3", "u1", "u2"]);
        // Semantic-only items are present but score nothing.
        let u4 = fused.iter().find(|(id, _)| *id == "u4").unwrap();
        assert_eq!(u4.1, 0.0);
    }

    #[test]
    fn scores_add_across_lists() {
        let fts = ["a", "b"];
        let semantic = ["c", "b"];
        let fused = weighted_rrf(&[(&fts[..], 0.6), (&semantic[..], 0.4)]);
        let b = fused.iter().find(|(id, _)| *id == "b").unwrap().1;
        let expected = 0.6 / 62.0 + 0.4 / 62.0;
        assert!((b - expected).abs() < 1e-12);
        assert_eq!(fused[0].0, "b");
    }

    #[test]
    fn contribution_uses_zero_based_rank() {
        assert!((rrf_contribution(1.0, 0) - 1.0 / 61.0).abs() < 1e-12);
        assert!((rrf_contribution(0.5, 9) - 0.5 / 70.0).abs() < 1e-12);
    }

    #[test]
    fn duplicates_within_a_list_count_once() {
        let fts = ["a", "a", "b"];
        let fused = weighted_rrf(&[(&fts[..], 1.0)]);
        let a = fused.iter().find(|(id, _)| *id == "a").unwrap().1;
        let b = fused.iter().find(|(id, _)| *id == "b").unwrap().1;
        assert!((a - 1.0 / 61.0).abs() < 1e-12);
        assert!((b - 1.0 / 63.0).abs() < 1e-12);
    }

    #[test]
    fn empty_inputs() {
        let empty: [&str; 0] = [];
        assert!(weighted_rrf(&[(&empty[..], 0.6), (&empty[..], 0.4)]).is_empty());
    }
}
