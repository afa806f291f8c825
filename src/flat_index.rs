//! Exact nearest-neighbour index over a flat array of vectors.
//!
//! # Binary Layout
//!
//! All integers and floats are little-endian:
//!
//! ```text
//! offset  size        field
//! 0       8           magic  b"FLATL2\0\0"
//! 8       4           version (u32, currently 1)
//! 12      4           dims    (u32)
//! 16      8           count   (u64)
//! 24      count*dims*4  vectors, row-major f32
//! ```
//!
//! Slot `i` is the i-th row. Search is a brute-force L2 scan, which is
//! exact and fast enough for indexes up to a few hundred thousand rows.

use anyhow::{bail, Result};

const MAGIC: &[u8; 8] = b"FLATL2\0\0";
const VERSION: u32 = 1;
const HEADER_LEN: usize = 24;

/// A decoded, immutable vector index.
#[derive(Debug, Clone)]
pub struct FlatIndex {
    dims: usize,
    data: Vec<f32>,
}

impl FlatIndex {
    /// Build an index from in-memory rows. Every row must have `dims` entries.
    pub fn from_rows(dims: usize, rows: &[Vec<f32>]) -> Result<Self> {
        if dims == 0 {
            bail!("index dims must be > 0");
        }
        let mut data = Vec::with_capacity(rows.len() * dims);
        for (slot, row) in rows.iter().enumerate() {
            if row.len() != dims {
                bail!(
                    "row {} has {} dims, expected {}",
                    slot,
                    row.len(),
                    dims
                );
            }
            data.extend_from_slice(row);
        }
        Ok(Self { dims, data })
    }

    /// Decode an index from its binary blob.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_LEN {
            bail!("index blob truncated: {} bytes", bytes.len());
        }
        if &bytes[0..8] != MAGIC {
            bail!("index blob has wrong magic");
        }
        let version = read_u32(&bytes[8..12]);
        if version != VERSION {
            bail!("unsupported index version {}", version);
        }
        let dims = read_u32(&bytes[12..16]) as usize;
        let count = read_u64(&bytes[16..24]) as usize;
        if dims == 0 {
            bail!("index blob declares zero dims");
        }

        let expected = count
            .checked_mul(dims)
            .and_then(|n| n.checked_mul(4))
            .and_then(|n| n.checked_add(HEADER_LEN))
            .ok_or_else(|| anyhow::anyhow!("index blob header overflows"))?;
        if bytes.len() != expected {
            bail!(
                "index blob size mismatch: {} bytes, header implies {}",
                bytes.len(),
                expected
            );
        }

        let data = bytes[HEADER_LEN..]
            .chunks_exact(4)
            .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect();

        Ok(Self { dims, data })
    }

    /// Encode to the binary blob format.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(HEADER_LEN + self.data.len() * 4);
        out.extend_from_slice(MAGIC);
        out.extend_from_slice(&VERSION.to_le_bytes());
        out.extend_from_slice(&(self.dims as u32).to_le_bytes());
        out.extend_from_slice(&(self.len() as u64).to_le_bytes());
        for v in &self.data {
            out.extend_from_slice(&v.to_le_bytes());
        }
        out
    }

    pub fn dims(&self) -> usize {
        self.dims
    }

    /// Number of stored vectors.
    pub fn len(&self) -> usize {
        self.data.len() / self.dims
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// The `k` nearest slots to `query` by Euclidean distance, nearest first.
    ///
    /// Ties are broken by ascending slot. A query of the wrong dimension
    /// matches nothing.
    pub fn search(&self, query: &[f32], k: usize) -> Vec<(usize, f32)> {
        if query.len() != self.dims || k == 0 {
            return Vec::new();
        }

        let mut scored: Vec<(usize, f32)> = self
            .data
            .chunks_exact(self.dims)
            .enumerate()
            .map(|(slot, row)| (slot, l2_distance(query, row)))
            .filter(|(_, d)| d.is_finite())
            .collect();

        scored.sort_by(|a, b| {
            a.1.partial_cmp(&b.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.0.cmp(&b.0))
        });
        scored.truncate(k);
        scored
    }
}

fn l2_distance(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f32>()
        .sqrt()
}

fn read_u32(bytes: &[u8]) -> u32 {
    let mut buf = [0u8; 4];
    buf.copy_from_slice(bytes);
    u32::from_le_bytes(buf)
}

fn read_u64(bytes: &[u8]) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(bytes);
    u64::from_le_bytes(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> FlatIndex {
        FlatIndex::from_rows(
            2,
            &[vec![0.0, 0.0], vec![1.0, 0.0], vec![0.0, 3.0], vec![1.0, 0.0]],
        )
        .unwrap()
    }

    #[test]
    fn decode_reads_what_encode_wrote() {
        let index = sample();
        let decoded = FlatIndex::decode(&index.encode()).unwrap();
        assert_eq!(decoded.dims(), 2);
        assert_eq!(decoded.len(), 4);
        assert_eq!(decoded.encode(), index.encode());
        assert_eq!(decoded.search(&[0.0, 3.0], 1), vec![(2, 0.0)]);
    }

    #[test]
    fn search_orders_by_distance_then_slot() {
        let hits = sample().search(&[1.0, 0.0], 3);
        assert_eq!(hits[0], (1, 0.0));
        assert_eq!(hits[1], (3, 0.0));
        assert_eq!(hits[2].0, 0);
        assert!((hits[2].1 - 1.0).abs() < 1e-6);
    }

    #[test]
    fn k_larger_than_index_returns_all() {
        assert_eq!(sample().search(&[0.0, 0.0], 100).len(), 4);
    }

    #[test]
    fn wrong_dims_query_matches_nothing() {
        assert!(sample().search(&[0.0, 0.0, 0.0], 2).is_empty());
    }

    #[test]
    fn corrupt_blobs_rejected() {
        assert!(FlatIndex::decode(b"short").is_err());

        let mut bytes = sample().encode();
        bytes[0] = b'X';
        assert!(FlatIndex::decode(&bytes).is_err());

        let mut bytes = sample().encode();
        bytes.pop();
        assert!(FlatIndex::decode(&bytes).is_err());
    }

    #[test]
    fn empty_index_decodes_and_matches_nothing() {
        let empty = FlatIndex::decode(&FlatIndex::from_rows(4, &[]).unwrap().encode()).unwrap();
        assert!(empty.is_empty());
        assert_eq!(empty.len(), 0);
        assert!(empty.search(&[0.0; 4], 3).is_empty());
        assert!(!sample().is_empty());
    }

    #[test]
    fn mismatched_row_rejected() {
        assert!(FlatIndex::from_rows(3, &[vec![1.0, 2.0]]).is_err());
    }
}
