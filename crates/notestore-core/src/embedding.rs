//! Vector codec, row-id newtype, and vector helpers.
//!
//! Embeddings are stored as BLOBs of little-endian `f32` values, 4 bytes per
//! element. The same byte layout is accepted by the ANN virtual table, so an
//! encoded vector can be bound unchanged to either side of the store.

use serde::{Deserialize, Serialize};

/// Bytes per encoded vector element.
pub const BYTES_PER_ELEMENT: usize = 4;

/// Row identifier shared by the relational embedding table and the ANN index.
///
/// The ANN entry for an embedding row lives at exactly the same row id; there
/// is no mapping table between the two.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RowId(pub i64);

impl RowId {
    pub fn get(self) -> i64 {
        self.0
    }
}

impl std::fmt::Display for RowId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Render row ids as a comma-separated SQL list (`1,2,3`).
///
/// Row ids are integers, so inlining them cannot inject SQL.
pub fn rowid_list(ids: &[RowId]) -> String {
    ids.iter()
        .map(|id| id.0.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

/// Encode a float vector as a BLOB (little-endian f32 bytes).
///
/// # Example
///
/// ```rust
/// use notestore_core::embedding::{decode_vector, encode_vector};
///
/// let v = vec![1.0f32, -2.5, 3.125];
/// let blob = encode_vector(&v);
/// assert_eq!(blob.len(), 12);
/// assert_eq!(decode_vector(&blob), v);
/// ```
pub fn encode_vector(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * BYTES_PER_ELEMENT);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode a BLOB back into a float vector.
///
/// Trailing bytes that do not form a whole element are ignored; use
/// [`declared_len_matches`] to validate a stored row first.
pub fn decode_vector(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(BYTES_PER_ELEMENT)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Check the `embedding_len == bytes / 4` invariant of a stored row.
pub fn declared_len_matches(blob: &[u8], embedding_len: usize) -> bool {
    blob.len() % BYTES_PER_ELEMENT == 0 && blob.len() / BYTES_PER_ELEMENT == embedding_len
}

/// Map an ANN distance to a ranking similarity in `(0, 1]`.
///
/// Lower distance gives higher similarity; distance 0 maps to 1.
pub fn similarity_from_distance(distance: f64) -> f64 {
    1.0 / (1.0 + distance.max(0.0))
}

/// Element-wise mean of a set of vectors.
///
/// Returns `None` for an empty set. Vectors whose length differs from the
/// first one are skipped.
///
/// Mean pooling is a lossy document summary: on long or topically mixed
/// documents the centroid drifts toward a generic direction ("semantic
/// dilution") and similarity against it becomes less discriminative.
pub fn mean_vector<'a, I>(vectors: I) -> Option<Vec<f32>>
where
    I: IntoIterator<Item = &'a [f32]>,
{
    let mut sum: Option<Vec<f32>> = None;
    let mut count = 0usize;

    for v in vectors {
        match sum.as_mut() {
            None => {
                sum = Some(v.to_vec());
                count = 1;
            }
            Some(acc) if acc.len() == v.len() => {
                for (a, x) in acc.iter_mut().zip(v) {
                    *a += x;
                }
                count += 1;
            }
            Some(_) => {}
        }
    }

    sum.map(|mut acc| {
        for a in acc.iter_mut() {
            *a /= count as f32;
        }
        acc
    })
}

/// Compute cosine similarity between two embedding vectors.
///
/// Returns `0.0` for empty vectors or vectors of different lengths.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    dot / denom
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vector_roundtrip() {
        let vec = vec![1.0f32, -2.5, 3.125, 0.0, -0.001, f32::MAX, f32::MIN_POSITIVE];
        let blob = encode_vector(&vec);
        assert_eq!(blob.len(), vec.len() * 4);
        assert_eq!(decode_vector(&blob), vec);
    }

    #[test]
    fn test_encoding_is_little_endian() {
        let blob = encode_vector(&[1.0]);
        assert_eq!(blob, vec![0x00, 0x00, 0x80, 0x3f]);
    }

    #[test]
    fn test_declared_len() {
        let blob = encode_vector(&[1.0, 2.0, 3.0]);
        assert!(declared_len_matches(&blob, 3));
        assert!(!declared_len_matches(&blob, 4));
        assert!(!declared_len_matches(&blob[..11], 2));
    }

    #[test]
    fn test_similarity_bounds() {
        assert!((similarity_from_distance(0.0) - 1.0).abs() < 1e-12);
        assert!(similarity_from_distance(3.0) < similarity_from_distance(1.0));
        assert!(similarity_from_distance(1e9) > 0.0);
    }

    #[test]
    fn test_mean_vector() {
        let a = [1.0f32, 2.0, 3.0];
        let b = [3.0f32, 2.0, 1.0];
        let mean = mean_vector([&a[..], &b[..]]).unwrap();
        assert_eq!(mean, vec![2.0, 2.0, 2.0]);
    }

    #[test]
    fn test_mean_vector_skips_mismatched_width() {
        let a = [2.0f32, 4.0];
        let odd = [9.0f32, 9.0, 9.0];
        let mean = mean_vector([&a[..], &odd[..]]).unwrap();
        assert_eq!(mean, vec![2.0, 4.0]);
        assert!(mean_vector(std::iter::empty::<&[f32]>()).is_none());
    }

    #[test]
    fn test_rowid_list() {
        assert_eq!(rowid_list(&[RowId(3), RowId(10)]), "3,10");
        assert_eq!(rowid_list(&[]), "");
    }

    #[test]
    fn test_cosine_identical() {
        let v = vec![1.0, 2.0, 3.0];
        let sim = cosine_similarity(&v, &v);
        assert!((sim - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_different_lengths() {
        assert_eq!(cosine_similarity(&[1.0, 2.0], &[1.0]), 0.0);
    }
}
