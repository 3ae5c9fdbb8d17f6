//! Native vector segments: per-field flat vector files plus one quantization
//! state file, written at flush or merge and reopened for reads.

mod ann_build;
mod build_policy;
mod config;
mod profiler;
mod quantization_state;
mod reader;
mod types;
mod vector_values;
mod writer;

pub use ann_build::{
    BuildBackends, BuildRequest, BuildStrategy, FLAT_CODE_KIND_IDMAP, FLAT_CODE_KIND_SCALAR,
    FLAT_CODE_MAGIC, FlatCodeBlock, FlatCodeIndexBuilder, NativeIndexBuilder,
};
pub use build_policy::BuildDecision;
pub use config::{BuildMode, FieldVectorConfig, SpaceType, VectorWriterConfig};
pub use profiler::{DimensionStats, ProfilerRegistry, SegmentProfilerState};
pub use quantization_state::{
    QUANTIZATION_STATE_CODEC, QUANTIZATION_STATE_VERSION, QuantizationStateReader,
    QuantizationStateWriter,
};
pub use reader::NativeVectorSegmentReader;
pub use types::{SegmentFiles, SegmentId, SegmentInfo};
pub use vector_values::{
    BufferedVectorValues, FieldVectorBuffer, MergeSource, MergedVectorSupplier,
    VectorValues, VectorValuesSupplier, count_live,
};
pub use writer::{FieldOutcome, NativeVectorSegmentWriter, SegmentMergeInput, WriteSummary};
