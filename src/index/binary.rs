//! Binary encoding/decoding for f32 embedding vectors.
//!
//! Embeddings are stored as flat little-endian f32 bytes (384 dims × 4 bytes
//! = 1,536 bytes per chunk), far smaller and faster than JSON text.

use anyhow::{bail, Result};

/// Encode an f32 embedding vector as flat little-endian bytes.
pub fn encode_embedding(vector: &[f32]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(vector.len() * 4);
    for &val in vector {
        buf.extend_from_slice(&val.to_le_bytes());
    }
    buf
}

/// Decode a flat little-endian f32 blob. The blob length must be a multiple
/// of 4; the dimension is implied by the length.
pub fn decode_embedding(blob: &[u8]) -> Result<Vec<f32>> {
    if blob.len() % 4 != 0 {
        bail!(
            "embedding blob length {} is not a multiple of 4",
            blob.len()
        );
    }
    let mut vector = Vec::with_capacity(blob.len() / 4);
    for chunk in blob.chunks_exact(4) {
        vector.push(f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]));
    }
    Ok(vector)
}
