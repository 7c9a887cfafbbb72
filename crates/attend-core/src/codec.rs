//! Fixed-width byte encoding for stored embeddings.
//!
//! An embedding of length `n` is stored as `n * 8` bytes of IEEE-754
//! doubles. Decoding reproduces the original values bit for bit.

use crate::types::Embedding;
use thiserror::Error;

const ELEMENT_SIZE: usize = std::mem::size_of::<f64>();

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("embedding blob is empty")]
    Empty,
    #[error("embedding blob length {len} is not a multiple of 8")]
    InvalidLength { len: usize },
}

/// Byte order of the stored doubles.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ByteOrder {
    #[default]
    Little,
    Big,
}

impl std::str::FromStr for ByteOrder {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "little" | "le" | "little-endian" => Ok(ByteOrder::Little),
            "big" | "be" | "big-endian" => Ok(ByteOrder::Big),
            other => Err(format!("unknown byte order: {other}")),
        }
    }
}

pub fn encode_embedding(embedding: &Embedding, order: ByteOrder) -> Vec<u8> {
    let mut out = Vec::with_capacity(embedding.len() * ELEMENT_SIZE);
    for v in embedding.as_slice() {
        let bytes = match order {
            ByteOrder::Little => v.to_le_bytes(),
            ByteOrder::Big => v.to_be_bytes(),
        };
        out.extend_from_slice(&bytes);
    }
    out
}

pub fn decode_embedding(data: &[u8], order: ByteOrder) -> Result<Embedding, CodecError> {
    if data.is_empty() {
        return Err(CodecError::Empty);
    }
    if data.len() % ELEMENT_SIZE != 0 {
        return Err(CodecError::InvalidLength { len: data.len() });
    }

    let values = data
        .chunks_exact(ELEMENT_SIZE)
        .map(|chunk| {
            let mut buf = [0u8; ELEMENT_SIZE];
            buf.copy_from_slice(chunk);
            match order {
                ByteOrder::Little => f64::from_le_bytes(buf),
                ByteOrder::Big => f64::from_be_bytes(buf),
            }
        })
        .collect();

    Ok(Embedding::new(values))
}
