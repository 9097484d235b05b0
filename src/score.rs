//! Pure relevance-scoring functions for the retrieve-then-rerank pipeline.
//!
//! Kept free of any backend or embedding dependency so the blend can be
//! verified without a live index:
//!
//! 1. `similarity = 1 - distance`
//! 2. candidates with `similarity < 1 - relevance_floor` are discarded
//! 3. `score = similarity × (1 + keyword_overlap × 0.3) × length_factor`,
//!    capped at 1.0
//!
//! where `keyword_overlap` is the fraction of query terms appearing in the
//! fragment (naive lowercase whitespace tokenization) and `length_factor`
//! is `min(len / 500, 1.2)` — short fragments are down-weighted, long ones
//! get at most a 20% boost.

use std::collections::HashSet;

/// Weight of the keyword-overlap boost.
const OVERLAP_WEIGHT: f32 = 0.3;
/// Text length at which the length factor reaches 1.0.
const LENGTH_PIVOT: f32 = 500.0;
/// Upper bound on the length factor.
const LENGTH_CAP: f32 = 1.2;

/// Convert an index distance into a similarity in `[0, 1]` for cosine
/// distance (clamped; backends may report slightly negative distances on
/// near-identical vectors).
pub fn similarity_from_distance(distance: f32) -> f32 {
    (1.0 - distance).clamp(0.0, 1.0)
}

/// True if a candidate passes the relevance floor.
pub fn passes_floor(similarity: f32, relevance_floor: f32) -> bool {
    similarity >= 1.0 - relevance_floor
}

/// Fraction of query terms that also occur in the fragment text.
///
/// Term sets come from lowercase whitespace splitting. Returns 0.0 for an
/// empty query.
pub fn keyword_overlap(query: &str, text: &str) -> f32 {
    let query_terms: HashSet<String> = query
        .split_whitespace()
        .map(|t| t.to_lowercase())
        .collect();
    if query_terms.is_empty() {
        return 0.0;
    }
    let text_terms: HashSet<String> =
        text.split_whitespace().map(|t| t.to_lowercase()).collect();
    let shared = query_terms.intersection(&text_terms).count();
    shared as f32 / query_terms.len() as f32
}

/// Length boost factor: `min(len / 500, 1.2)`. `text_len` is a char
/// count, not bytes, so non-ASCII text is not over-weighted.
pub fn length_factor(text_len: usize) -> f32 {
    (text_len as f32 / LENGTH_PIVOT).min(LENGTH_CAP)
}

/// Blended relevance score, capped at 1.0.
pub fn relevance_score(similarity: f32, query: &str, text: &str) -> f32 {
    let overlap = keyword_overlap(query, text);
    let score =
        similarity * (1.0 + overlap * OVERLAP_WEIGHT) * length_factor(text.chars().count());
    score.min(1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_similarity_from_distance() {
        assert_eq!(similarity_from_distance(0.0), 1.0);
        assert!((similarity_from_distance(0.25) - 0.75).abs() < 1e-6);
        // Clamped at both ends.
        assert_eq!(similarity_from_distance(-0.1), 1.0);
        assert_eq!(similarity_from_distance(1.5), 0.0);
    }

    #[test]
    fn test_floor_boundary() {
        // floor = 0.3 keeps similarity >= 0.7
        assert!(passes_floor(0.7, 0.3));
        assert!(!passes_floor(0.699, 0.3));
        assert!(passes_floor(1.0, 0.3));
    }

    #[test]
    fn test_overlap_full_and_none() {
        assert!((keyword_overlap("rust cargo", "Rust and Cargo tooling") - 1.0).abs() < 1e-6);
        assert_eq!(keyword_overlap("python", "rust only here"), 0.0);
    }

    #[test]
    fn test_overlap_partial() {
        let o = keyword_overlap("rust cargo crates tooling", "rust crates");
        assert!((o - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_overlap_empty_query() {
        assert_eq!(keyword_overlap("", "anything"), 0.0);
        assert_eq!(keyword_overlap("   ", "anything"), 0.0);
    }

    #[test]
    fn test_length_factor_bounds() {
        assert!((length_factor(250) - 0.5).abs() < 1e-6);
        assert!((length_factor(500) - 1.0).abs() < 1e-6);
        // Capped at 1.2 regardless of length.
        assert!((length_factor(600) - 1.2).abs() < 1e-6);
        assert!((length_factor(100_000) - 1.2).abs() < 1e-6);
    }

    #[test]
    fn test_length_counts_chars_not_bytes() {
        // 250 chars of 2-byte text: factor 0.5, not 1.0.
        let text = "é".repeat(250);
        let score = relevance_score(0.8, "query", &text);
        assert!((score - 0.8 * 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_score_capped_at_one() {
        let long_text = "rust ".repeat(200);
        let score = relevance_score(1.0, "rust", &long_text);
        assert!((score - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_score_downweights_short_text() {
        // 100-char text: factor 0.2, no overlap.
        let text = "x".repeat(100);
        let score = relevance_score(0.9, "query terms", &text);
        assert!((score - 0.9 * 0.2).abs() < 1e-6);
    }

    #[test]
    fn test_overlap_boost_applied() {
        // Similarity low enough that the boosted score stays under the
        // 1.0 cap, so the full 1.3x ratio is observable.
        let text = format!("rust {}", "pad ".repeat(124)); // ~500 chars
        let with_overlap = relevance_score(0.7, "rust", &text);
        let without_overlap = relevance_score(0.7, "golang", &text);
        assert!(with_overlap < 1.0);
        assert!(with_overlap > without_overlap);
        let ratio = with_overlap / without_overlap;
        assert!((ratio - 1.3).abs() < 1e-3);
    }
}
