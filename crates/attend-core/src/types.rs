use serde::{Deserialize, Serialize};
use std::fmt;

/// Embedding length produced by the 128-d face encoder used in deployment.
pub const EMBEDDING_DIM: usize = 128;

/// Tolerance used when none is configured.
pub const DEFAULT_TOLERANCE: f64 = 0.6;

/// Face embedding vector in the encoder's metric space.
///
/// Immutable once built: there is no way to mutate the values through a
/// shared reference, so a gallery snapshot can be read by many callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Embedding {
    values: Vec<f64>,
}

impl Embedding {
    pub fn new(values: Vec<f64>) -> Self {
        Self { values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.values
    }

    pub fn into_inner(self) -> Vec<f64> {
        self.values
    }
}

impl From<Vec<f64>> for Embedding {
    fn from(values: Vec<f64>) -> Self {
        Self::new(values)
    }
}

/// A known face: an identity and one reference embedding for it.
///
/// Several entries may share an identity (one per reference photo).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GalleryEntry<I> {
    pub identity: I,
    pub embedding: Embedding,
}

impl<I> GalleryEntry<I> {
    pub fn new(identity: I, embedding: impl Into<Embedding>) -> Self {
        Self {
            identity,
            embedding: embedding.into(),
        }
    }
}

/// Outcome of matching a query embedding against a gallery.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum MatchResult<I> {
    /// Empty gallery, or nearest entry farther than the tolerance.
    NoMatch,
    Match {
        identity: I,
        /// Position of the selected entry in the gallery.
        index: usize,
        distance: f64,
        /// `1 - distance` clamped to [0, 1]. Not a calibrated probability.
        confidence: f64,
    },
}

impl<I> MatchResult<I> {
    pub fn is_match(&self) -> bool {
        matches!(self, MatchResult::Match { .. })
    }

    /// Confidence of the match, `0.0` when there is none.
    pub fn confidence(&self) -> f64 {
        match self {
            MatchResult::Match { confidence, .. } => *confidence,
            MatchResult::NoMatch => 0.0,
        }
    }

    pub fn identity(&self) -> Option<&I> {
        match self {
            MatchResult::Match { identity, .. } => Some(identity),
            MatchResult::NoMatch => None,
        }
    }

    pub fn distance(&self) -> Option<f64> {
        match self {
            MatchResult::Match { distance, .. } => Some(*distance),
            MatchResult::NoMatch => None,
        }
    }
}

/// Maximum Euclidean distance at which two embeddings count as the same face.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize)]
#[serde(transparent)]
pub struct Tolerance(f64);

#[derive(Debug, Clone, Copy, PartialEq, thiserror::Error)]
#[error("tolerance must be a finite, non-negative number (got {0})")]
pub struct InvalidTolerance(pub f64);

impl Tolerance {
    pub fn new(value: f64) -> Result<Self, InvalidTolerance> {
        if value.is_finite() && value >= 0.0 {
            Ok(Self(value))
        } else {
            Err(InvalidTolerance(value))
        }
    }

    pub fn value(self) -> f64 {
        self.0
    }
}

impl Default for Tolerance {
    fn default() -> Self {
        Self(DEFAULT_TOLERANCE)
    }
}

impl fmt::Display for Tolerance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<f64> for Tolerance {
    type Error = InvalidTolerance;

    fn try_from(value: f64) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tolerance_default() {
        assert_eq!(Tolerance::default().value(), 0.6);
    }

    #[test]
    fn test_tolerance_rejects_invalid() {
        assert!(Tolerance::new(-0.1).is_err());
        assert!(Tolerance::new(f64::NAN).is_err());
        assert!(Tolerance::new(f64::INFINITY).is_err());
        assert!(Tolerance::new(0.0).is_ok());
    }

    #[test]
    fn test_embedding_serializes_as_array() {
        let e = Embedding::new(vec![0.5, -1.0]);
        assert_eq!(serde_json::to_string(&e).unwrap(), "[0.5,-1.0]");
        let back: Embedding = serde_json::from_str("[0.5,-1.0]").unwrap();
        assert_eq!(back, e);
    }

    #[test]
    fn test_no_match_has_zero_confidence() {
        let r: MatchResult<String> = MatchResult::NoMatch;
        assert!(!r.is_match());
        assert_eq!(r.confidence(), 0.0);
        assert!(r.identity().is_none());
    }

    #[test]
    fn test_match_result_json_shape() {
        let r = MatchResult::Match {
            identity: "Alice".to_string(),
            index: 0,
            distance: 0.25,
            confidence: 0.75,
        };
        let v = serde_json::to_value(&r).unwrap();
        assert_eq!(v["result"], "match");
        assert_eq!(v["identity"], "Alice");
        assert_eq!(v["confidence"], 0.75);
    }
}
