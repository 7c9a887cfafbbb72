//! attend-core — Face embedding matching for attendance check-in.
//!
//! Compares a query embedding against a gallery of known faces by
//! Euclidean distance, gated by a tolerance. Detection and embedding
//! extraction happen outside this crate.

pub mod codec;
pub mod matcher;
pub mod types;

pub use codec::{decode_embedding, encode_embedding, ByteOrder, CodecError};
pub use matcher::{
    best_match, confidence_from_distance, distance, is_match, EuclideanMatcher, MatchError,
    Matcher, MismatchPolicy,
};
pub use types::{
    Embedding, GalleryEntry, InvalidTolerance, MatchResult, Tolerance, DEFAULT_TOLERANCE,
    EMBEDDING_DIM,
};
