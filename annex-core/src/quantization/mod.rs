//! Scalar quantization of field vectors
//!
//! - `state` - trained thresholds and their persisted payloads
//! - `quantizer` - training over a sampled vector set
//! - `service` - params to trained state, as used by the segment writer

mod quantizer;
mod service;
mod state;

pub use quantizer::{DEFAULT_SAMPLE_SIZE, ScalarQuantizer};
pub use service::QuantizationService;
pub use state::{
    MultiBitScalarQuantizationState, OneBitScalarQuantizationState, QuantizationParams,
    QuantizationState, STATE_FORMAT_VERSION, ScalarQuantizationType,
};
