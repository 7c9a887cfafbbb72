//! Euclidean face matching: distance, threshold test, and best-match selection.

use crate::types::{Embedding, GalleryEntry, MatchResult, Tolerance};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum MatchError {
    #[error("embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
}

/// What to do with a gallery entry whose length differs from the query's.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum MismatchPolicy {
    /// Drop the entry with a warning and keep matching against the rest.
    #[default]
    Skip,
    /// Fail the whole call with [`MatchError::DimensionMismatch`].
    Reject,
}

/// Euclidean distance between two embeddings of equal length.
pub fn distance(a: &Embedding, b: &Embedding) -> Result<f64, MatchError> {
    if a.len() != b.len() {
        return Err(MatchError::DimensionMismatch {
            expected: a.len(),
            actual: b.len(),
        });
    }

    Ok(a.as_slice()
        .iter()
        .zip(b.as_slice())
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f64>()
        .sqrt())
}

/// True iff `distance(a, b) <= tolerance`.
pub fn is_match(a: &Embedding, b: &Embedding, tolerance: Tolerance) -> Result<bool, MatchError> {
    Ok(distance(a, b)? <= tolerance.value())
}

/// Map a distance to a display score: `1 - distance`, clamped to [0, 1].
///
/// This is a monotonic proxy, not a probability. Encoders whose distances
/// are not bounded to [0, 1] will saturate at 0 past distance 1.
pub fn confidence_from_distance(distance: f64) -> f64 {
    (1.0 - distance).clamp(0.0, 1.0)
}

/// Find the nearest gallery entry and accept it if it clears the tolerance.
///
/// Ties on distance resolve to the earliest entry. Length mismatches are
/// skipped; use [`EuclideanMatcher`] to choose a different policy.
pub fn best_match<I: Clone>(
    gallery: &[GalleryEntry<I>],
    query: &Embedding,
    tolerance: Tolerance,
) -> MatchResult<I> {
    let distances = gallery.iter().enumerate().filter_map(|(i, entry)| {
        match distance(query, &entry.embedding) {
            Ok(d) => Some((i, d)),
            Err(_) => {
                tracing::warn!(
                    index = i,
                    expected = query.len(),
                    actual = entry.embedding.len(),
                    "skipping gallery entry with mismatched embedding length"
                );
                None
            }
        }
    });
    accept(gallery, nearest(distances), tolerance)
}

/// Like [`best_match`], but any length mismatch fails the whole call.
fn best_match_strict<I: Clone>(
    gallery: &[GalleryEntry<I>],
    query: &Embedding,
    tolerance: Tolerance,
) -> Result<MatchResult<I>, MatchError> {
    let distances = gallery
        .iter()
        .enumerate()
        .map(|(i, entry)| distance(query, &entry.embedding).map(|d| (i, d)))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(accept(gallery, nearest(distances), tolerance))
}

/// Position and distance of the closest candidate, earliest on ties.
fn nearest(distances: impl IntoIterator<Item = (usize, f64)>) -> Option<(usize, f64)> {
    let mut best: Option<(usize, f64)> = None;

    // Consume every candidate: no early exit on a close hit.
    for (i, d) in distances {
        if !d.is_finite() {
            tracing::warn!(index = i, "skipping gallery entry with non-finite distance");
            continue;
        }
        if best.map_or(true, |(_, best_d)| d < best_d) {
            best = Some((i, d));
        }
    }
    best
}

fn accept<I: Clone>(
    gallery: &[GalleryEntry<I>],
    best: Option<(usize, f64)>,
    tolerance: Tolerance,
) -> MatchResult<I> {
    match best {
        Some((index, d)) if d <= tolerance.value() => MatchResult::Match {
            identity: gallery[index].identity.clone(),
            index,
            distance: d,
            confidence: confidence_from_distance(d),
        },
        _ => MatchResult::NoMatch,
    }
}

/// Strategy for comparing a query embedding against a gallery of known faces.
pub trait Matcher {
    fn compare<I: Clone>(
        &self,
        query: &Embedding,
        gallery: &[GalleryEntry<I>],
    ) -> Result<MatchResult<I>, MatchError>;
}

/// Nearest-neighbour matcher gated by a Euclidean tolerance.
///
/// Holds its configuration explicitly; build one at startup and share it.
#[derive(Debug, Clone, Copy, Default)]
pub struct EuclideanMatcher {
    tolerance: Tolerance,
    policy: MismatchPolicy,
}

impl EuclideanMatcher {
    pub fn new(tolerance: Tolerance) -> Self {
        Self {
            tolerance,
            policy: MismatchPolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: MismatchPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn tolerance(&self) -> Tolerance {
        self.tolerance
    }

    pub fn policy(&self) -> MismatchPolicy {
        self.policy
    }
}

impl Matcher for EuclideanMatcher {
    fn compare<I: Clone>(
        &self,
        query: &Embedding,
        gallery: &[GalleryEntry<I>],
    ) -> Result<MatchResult<I>, MatchError> {
        match self.policy {
            MismatchPolicy::Skip => Ok(best_match(gallery, query, self.tolerance)),
            MismatchPolicy::Reject => best_match_strict(gallery, query, self.tolerance),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn emb(values: &[f64]) -> Embedding {
        Embedding::new(values.to_vec())
    }

    fn tol(v: f64) -> Tolerance {
        Tolerance::new(v).unwrap()
    }

    fn alice_bob() -> Vec<GalleryEntry<String>> {
        vec![
            GalleryEntry::new("Alice".to_string(), vec![0.3, 0.0, 0.0]),
            GalleryEntry::new("Bob".to_string(), vec![0.0, 0.5, 0.0]),
        ]
    }

    #[test]
    fn test_distance_to_self_is_zero() {
        let a = emb(&[0.12, -0.4, 0.9, 0.0]);
        assert_eq!(distance(&a, &a).unwrap(), 0.0);
    }

    #[test]
    fn test_distance_symmetric() {
        let a = emb(&[0.1, 0.2, 0.3]);
        let b = emb(&[-0.7, 0.05, 1.3]);
        assert_eq!(distance(&a, &b).unwrap(), distance(&b, &a).unwrap());
    }

    #[test]
    fn test_distance_known_value() {
        let a = emb(&[0.0, 0.0]);
        let b = emb(&[3.0, 4.0]);
        assert!((distance(&a, &b).unwrap() - 5.0).abs() < 1e-12);
    }

    #[test]
    fn test_distance_dimension_mismatch() {
        let a = Embedding::new(vec![0.0; 128]);
        let b = Embedding::new(vec![0.0; 64]);
        assert_eq!(
            distance(&a, &b),
            Err(MatchError::DimensionMismatch {
                expected: 128,
                actual: 64
            })
        );
    }

    #[test]
    fn test_is_match_inclusive_at_tolerance() {
        let a = emb(&[0.0, 0.0]);
        let b = emb(&[0.5, 0.0]);
        assert!(is_match(&a, &b, tol(0.5)).unwrap());
        assert!(!is_match(&a, &b, tol(0.49)).unwrap());
    }

    #[test]
    fn test_best_match_empty_gallery() {
        let gallery: Vec<GalleryEntry<String>> = Vec::new();
        let result = best_match(&gallery, &emb(&[1.0, 2.0]), tol(0.6));
        assert_eq!(result, MatchResult::NoMatch);
        assert_eq!(result.confidence(), 0.0);
    }

    #[test]
    fn test_best_match_picks_nearest() {
        let query = emb(&[0.0, 0.0, 0.0]);
        let result = best_match(&alice_bob(), &query, tol(0.6));
        assert_eq!(result.identity().map(String::as_str), Some("Alice"));
        assert!((result.confidence() - 0.7).abs() < 1e-9);
        assert!((result.distance().unwrap() - 0.3).abs() < 1e-9);
    }

    #[test]
    fn test_best_match_nearest_above_tolerance() {
        let query = emb(&[0.0, 0.0, 0.0]);
        let result = best_match(&alice_bob(), &query, tol(0.2));
        assert_eq!(result, MatchResult::NoMatch);
        assert_eq!(result.confidence(), 0.0);
    }

    #[test]
    fn test_best_match_tie_prefers_first() {
        let gallery = vec![
            GalleryEntry::new("Alice".to_string(), vec![0.1, 0.0]),
            GalleryEntry::new("Carol".to_string(), vec![-0.1, 0.0]),
        ];
        let query = emb(&[0.0, 0.0]);
        for _ in 0..16 {
            let result = best_match(&gallery, &query, tol(0.6));
            match result {
                MatchResult::Match { identity, index, .. } => {
                    assert_eq!(identity, "Alice");
                    assert_eq!(index, 0);
                }
                MatchResult::NoMatch => panic!("expected a match"),
            }
        }
    }

    #[test]
    fn test_best_match_later_entry_can_win() {
        // The best entry is last; every entry must be compared.
        let gallery = vec![
            GalleryEntry::new("decoy1", vec![0.0, 1.0, 0.0]),
            GalleryEntry::new("decoy2", vec![0.0, 0.0, 1.0]),
            GalleryEntry::new("match", vec![1.0, 0.0, 0.0]),
        ];
        let result = best_match(&gallery, &emb(&[1.0, 0.0, 0.0]), tol(0.6));
        assert_eq!(result.identity(), Some(&"match"));
        assert_eq!(result.confidence(), 1.0);
    }

    #[test]
    fn test_multiple_entries_same_identity() {
        let gallery = vec![
            GalleryEntry::new("Alice", vec![0.9, 0.0]),
            GalleryEntry::new("Bob", vec![0.4, 0.0]),
            GalleryEntry::new("Alice", vec![0.1, 0.0]),
        ];
        let result = best_match(&gallery, &emb(&[0.0, 0.0]), tol(0.6));
        match result {
            MatchResult::Match { identity, index, .. } => {
                assert_eq!(identity, "Alice");
                assert_eq!(index, 2);
            }
            MatchResult::NoMatch => panic!("expected a match"),
        }
    }

    #[test]
    fn test_skip_policy_ignores_malformed_entry() {
        let gallery = vec![
            GalleryEntry::new("short", vec![0.0]),
            GalleryEntry::new("ok", vec![0.2, 0.0]),
        ];
        let matcher = EuclideanMatcher::new(tol(0.6));
        let result = matcher.compare(&emb(&[0.0, 0.0]), &gallery).unwrap();
        assert_eq!(result.identity(), Some(&"ok"));
    }

    #[test]
    fn test_reject_policy_fails_whole_gallery() {
        let gallery = vec![
            GalleryEntry::new("ok", vec![0.2, 0.0]),
            GalleryEntry::new("short", vec![0.0]),
        ];
        let matcher = EuclideanMatcher::new(tol(0.6)).with_policy(MismatchPolicy::Reject);
        let err = matcher.compare(&emb(&[0.0, 0.0]), &gallery).unwrap_err();
        assert_eq!(
            err,
            MatchError::DimensionMismatch {
                expected: 2,
                actual: 1
            }
        );
    }

    #[test]
    fn test_policies_agree_on_well_formed_gallery() {
        let gallery = vec![
            GalleryEntry::new("Alice", vec![0.1, 0.0]),
            GalleryEntry::new("Carol", vec![-0.1, 0.0]),
            GalleryEntry::new("Bob", vec![0.0, 0.5]),
        ];
        let query = emb(&[0.0, 0.0]);
        let skip = EuclideanMatcher::new(tol(0.6));
        let reject = skip.with_policy(MismatchPolicy::Reject);
        let expected = best_match(&gallery, &query, tol(0.6));
        assert_eq!(skip.compare(&query, &gallery).unwrap(), expected);
        assert_eq!(reject.compare(&query, &gallery).unwrap(), expected);
        assert_eq!(expected.identity(), Some(&"Alice"));
    }

    #[test]
    fn test_only_mismatched_entries_is_no_match() {
        let gallery = vec![GalleryEntry::new("short", vec![0.0])];
        assert_eq!(
            best_match(&gallery, &emb(&[0.0, 0.0]), tol(0.6)),
            MatchResult::NoMatch
        );
    }

    #[test]
    fn test_non_finite_entry_never_selected() {
        let gallery = vec![
            GalleryEntry::new("nan", vec![f64::NAN, 0.0]),
            GalleryEntry::new("ok", vec![0.3, 0.0]),
        ];
        let result = best_match(&gallery, &emb(&[0.0, 0.0]), tol(0.6));
        assert_eq!(result.identity(), Some(&"ok"));
    }

    #[test]
    fn test_confidence_bounds_and_monotonic() {
        let mut prev = f64::INFINITY;
        for step in 0..=10 {
            let d = step as f64 * 0.1;
            let c = confidence_from_distance(d);
            assert!((0.0..=1.0).contains(&c));
            if step > 0 {
                assert!(c < prev, "confidence must fall as distance grows");
            }
            prev = c;
        }
        assert_eq!(confidence_from_distance(0.0), 1.0);
        assert_eq!(confidence_from_distance(2.5), 0.0);
    }

    #[test]
    fn test_matcher_default_tolerance() {
        let matcher = EuclideanMatcher::default();
        assert_eq!(matcher.tolerance().value(), 0.6);
        assert_eq!(matcher.policy(), MismatchPolicy::Skip);
    }
}
