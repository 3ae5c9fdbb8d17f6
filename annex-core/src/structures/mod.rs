//! On-disk structures shared by segment writers and readers

pub mod blob_store;
pub mod flat_vectors;

pub use blob_store::{BlobRecord, BlobStoreReader, BlobStoreWriter};
pub use flat_vectors::{
    FlatVectorFileWriter, FlatVectorHeader, FlatVectorMeta, FlatVectorReader,
    SimilarityFunction,
};

use crate::DocId;

/// Doc id returned once a cursor is exhausted
pub const TERMINATED: DocId = u32::MAX;
