use super::quantizer::{DEFAULT_SAMPLE_SIZE, ScalarQuantizer};
use super::state::{QuantizationParams, QuantizationState};
use crate::Result;
use crate::segment::VectorValuesSupplier;

/// Resolves quantization params to a trained state for the segment writer
#[derive(Debug, Clone)]
pub struct QuantizationService {
    sample_size: usize,
    seed: u64,
}

impl Default for QuantizationService {
    fn default() -> Self {
        Self {
            sample_size: DEFAULT_SAMPLE_SIZE,
            seed: 42,
        }
    }
}

impl QuantizationService {
    pub fn new(sample_size: usize, seed: u64) -> Self {
        Self { sample_size, seed }
    }

    pub fn quantizer(&self, params: QuantizationParams) -> Result<ScalarQuantizer> {
        Ok(ScalarQuantizer::new(params)?
            .with_sample_size(self.sample_size)
            .with_seed(self.seed))
    }

    pub fn train(
        &self,
        params: QuantizationParams,
        supplier: &dyn VectorValuesSupplier,
    ) -> Result<QuantizationState> {
        self.quantizer(params)?.train(supplier)
    }
}
