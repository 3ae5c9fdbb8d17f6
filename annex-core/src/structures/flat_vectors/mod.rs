//! Native flat vector file: opaque index block plus raw vectors and ids.
//!
//! ```text
//! [fourcc: u32 "IxMp"]
//! [dim: i32][ntotal: i64][reserved: i64 x2][is_trained: u8][metric_type: i32]
//! [metric_arg: f32]                      // only when metric_type > 1
//! [index block]                          // opaque, may be empty
//! [vector_bytes: i64 = 4*dim*ntotal][ntotal*dim f32]
//! [id_count: i64 = ntotal][ntotal i64 ids, strictly increasing]
//! [footer: 16 bytes]
//! ```
//! Body values are little-endian. Neither section stores a forward length
//! for the index block, so readers locate the vector and id sections by
//! walking back from the end of the file.

mod reader;
mod writer;

pub use reader::FlatVectorReader;
pub use writer::FlatVectorFileWriter;

use crate::codec::FOOTER_SIZE;

/// Identifies an id-mapped flat file
pub const FLAT_FOURCC: u32 = u32::from_le_bytes(*b"IxMp");

/// Vectors fetched per bucket read
pub const BUCKET_SIZE: usize = 64;

/// fourcc(4) + dim(4) + ntotal(8) + reserved(16) + is_trained(1) + metric_type(4)
pub const FIXED_HEADER_SIZE: u64 = 37;

/// Metric ids stored in the header
pub const METRIC_INNER_PRODUCT: i32 = 0;
pub const METRIC_L2: i32 = 1;
pub const METRIC_L1: i32 = 2;
pub const METRIC_LINF: i32 = 3;

/// Header fields of a flat vector file
#[derive(Debug, Clone, PartialEq)]
pub struct FlatVectorHeader {
    pub dimension: usize,
    pub total_vectors: u64,
    pub is_trained: bool,
    pub metric_type: i32,
    /// Present exactly when `metric_type > 1`
    pub metric_arg: Option<f32>,
}

impl FlatVectorHeader {
    pub fn new(dimension: usize, total_vectors: u64, metric_type: i32) -> Self {
        Self {
            dimension,
            total_vectors,
            is_trained: true,
            metric_type,
            metric_arg: (metric_type > 1).then_some(0.0),
        }
    }

    /// Encoded header length (fourcc included)
    pub fn encoded_len(&self) -> u64 {
        if self.metric_type > 1 {
            FIXED_HEADER_SIZE + 4
        } else {
            FIXED_HEADER_SIZE
        }
    }
}

/// Parsed header plus section offsets reconstructed from the file length
#[derive(Debug, Clone, PartialEq)]
pub struct FlatVectorMeta {
    pub header: FlatVectorHeader,
    /// First byte after the header (start of the index block)
    pub header_end: u64,
    /// Offset of the `id_count` field
    pub id_section_offset: u64,
    /// Offset of the `vector_bytes` field
    pub vector_section_offset: u64,
}

impl FlatVectorMeta {
    /// Walk back from `file_len` to the id and vector sections.
    ///
    /// Returns `None` when the arithmetic over/underflows or the vector
    /// section would start inside the header.
    pub fn locate(header: FlatVectorHeader, file_len: u64) -> Option<Self> {
        let n = header.total_vectors;
        let dim = header.dimension as u64;
        let id_section_offset = file_len
            .checked_sub(n.checked_add(1)?.checked_mul(8)?)?
            .checked_sub(FOOTER_SIZE)?;
        let vector_section_offset = id_section_offset
            .checked_sub(dim.checked_mul(4)?.checked_mul(n)?)?
            .checked_sub(8)?;
        let header_end = header.encoded_len();
        if vector_section_offset < header_end {
            return None;
        }
        Some(Self {
            header,
            header_end,
            id_section_offset,
            vector_section_offset,
        })
    }

    /// Bytes between header and vector section
    pub fn index_block_len(&self) -> u64 {
        self.vector_section_offset - self.header_end
    }

    /// First vector byte
    pub fn vector_data_offset(&self) -> u64 {
        self.vector_section_offset + 8
    }

    /// First id byte
    pub fn id_data_offset(&self) -> u64 {
        self.id_section_offset + 8
    }
}

/// Scoring function selected by a file's metric type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimilarityFunction {
    InnerProduct,
    L2,
    L1,
    LInf,
}

impl SimilarityFunction {
    /// Unknown metric ids fall back to L2.
    pub fn from_metric_type(metric_type: i32) -> Self {
        match metric_type {
            METRIC_INNER_PRODUCT => Self::InnerProduct,
            METRIC_L2 => Self::L2,
            METRIC_L1 => Self::L1,
            METRIC_LINF => Self::LInf,
            _ => Self::L2,
        }
    }

    pub fn metric_type(&self) -> i32 {
        match self {
            Self::InnerProduct => METRIC_INNER_PRODUCT,
            Self::L2 => METRIC_L2,
            Self::L1 => METRIC_L1,
            Self::LInf => METRIC_LINF,
        }
    }

    /// Raw distance (inner product for `InnerProduct`, larger is closer)
    pub fn distance(&self, a: &[f32], b: &[f32]) -> f32 {
        let pairs = a.iter().zip(b);
        match self {
            Self::InnerProduct => pairs.map(|(x, y)| x * y).sum(),
            Self::L2 => pairs.map(|(x, y)| (x - y) * (x - y)).sum(),
            Self::L1 => pairs.map(|(x, y)| (x - y).abs()).sum(),
            Self::LInf => pairs.map(|(x, y)| (x - y).abs()).fold(0.0, f32::max),
        }
    }

    /// Similarity score where larger is always better
    pub fn score(&self, a: &[f32], b: &[f32]) -> f32 {
        let d = self.distance(a, b);
        match self {
            Self::InnerProduct => d,
            _ => 1.0 / (1.0 + d),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metric_fallback() {
        assert_eq!(SimilarityFunction::from_metric_type(0), SimilarityFunction::InnerProduct);
        assert_eq!(SimilarityFunction::from_metric_type(1), SimilarityFunction::L2);
        assert_eq!(SimilarityFunction::from_metric_type(2), SimilarityFunction::L1);
        assert_eq!(SimilarityFunction::from_metric_type(3), SimilarityFunction::LInf);
        assert_eq!(SimilarityFunction::from_metric_type(23), SimilarityFunction::L2);
        assert_eq!(SimilarityFunction::from_metric_type(-5), SimilarityFunction::L2);
    }

    #[test]
    fn test_scores() {
        let a = [1.0, 2.0, 3.0];
        let b = [2.0, 0.0, 3.0];
        assert_eq!(SimilarityFunction::InnerProduct.score(&a, &b), 11.0);
        assert_eq!(SimilarityFunction::L2.distance(&a, &b), 5.0);
        assert_eq!(SimilarityFunction::L1.distance(&a, &b), 3.0);
        assert_eq!(SimilarityFunction::LInf.distance(&a, &b), 2.0);
        assert_eq!(SimilarityFunction::L2.score(&a, &a), 1.0);
    }

    #[test]
    fn test_locate_offsets() {
        let header = FlatVectorHeader::new(4, 100, METRIC_L2);
        let header_len = header.encoded_len();
        let index_block = 10;
        let file_len = header_len + index_block + 8 + 4 * 4 * 100 + 8 + 8 * 100 + FOOTER_SIZE;

        let meta = FlatVectorMeta::locate(header.clone(), file_len).unwrap();
        assert_eq!(meta.index_block_len(), index_block);
        assert_eq!(meta.vector_section_offset, header_len + index_block);
        assert_eq!(meta.id_section_offset, file_len - FOOTER_SIZE - 808);

        // Too short for the declared ntotal: the vector section would start
        // inside the header.
        assert!(FlatVectorMeta::locate(header.clone(), file_len - index_block - 1).is_none());
        assert!(FlatVectorMeta::locate(header, 20).is_none());
    }

    #[test]
    fn test_metric_arg_presence() {
        assert_eq!(FlatVectorHeader::new(8, 1, METRIC_L2).encoded_len(), FIXED_HEADER_SIZE);
        let l1 = FlatVectorHeader::new(8, 1, METRIC_L1);
        assert_eq!(l1.metric_arg, Some(0.0));
        assert_eq!(l1.encoded_len(), FIXED_HEADER_SIZE + 4);
    }
}
