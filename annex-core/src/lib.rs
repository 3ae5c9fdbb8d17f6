//! Annex - segment-level persistence for ANN vector indexes
//!
//! This library provides:
//! - Fully async IO with a Directory abstraction for memory, local and mmap storage
//! - An append-only blob store with a trailing index and checksummed footer
//! - Scalar quantization (1/2/4-bit) trained per field and stored per segment
//! - Flat vector files with bucketed reads and binary-search seek by doc id
//! - A segment writer that decides per field whether to quantize and build an index
//! - Merge of several segments' vectors with deletions applied

pub mod codec;
pub mod directories;
pub mod error;
pub mod quantization;
pub mod segment;
pub mod structures;

/// Document id within a segment
pub type DocId = u32;

pub use error::{Error, Result};

// Re-exports from directories
#[cfg(feature = "native")]
pub use directories::FsDirectory;
#[cfg(feature = "native")]
pub use directories::MmapDirectory;
pub use directories::{
    AsyncFileRead, Directory, DirectoryWriter, FileSlice, LazyFileHandle, LazyFileSlice,
    OwnedBytes, RamDirectory,
};

/// Default directory type for native builds
#[cfg(feature = "native")]
pub type DefaultDirectory = MmapDirectory;

// Re-exports from structures
pub use structures::{
    BlobStoreReader, BlobStoreWriter, FlatVectorReader, SimilarityFunction, TERMINATED,
};

// Re-exports from quantization
pub use quantization::{QuantizationParams, QuantizationState, ScalarQuantizationType};

// Re-exports from segment
pub use segment::{
    BuildBackends, BuildDecision, FieldOutcome, FieldVectorConfig, NativeIndexBuilder,
    NativeVectorSegmentReader, NativeVectorSegmentWriter, ProfilerRegistry,
    QuantizationStateReader, QuantizationStateWriter, SegmentId, SegmentInfo, SpaceType,
    VectorWriterConfig,
};
