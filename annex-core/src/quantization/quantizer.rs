//! Scalar quantizer training over a sampled vector set

use rand::prelude::*;

use super::state::{
    MultiBitScalarQuantizationState, OneBitScalarQuantizationState, QuantizationParams,
    QuantizationState, ScalarQuantizationType,
};
use crate::segment::VectorValuesSupplier;
use crate::{Error, Result};

/// Vectors sampled for training when the caller does not say otherwise
pub const DEFAULT_SAMPLE_SIZE: usize = 25_000;

/// Trains thresholds for one [`QuantizationParams`]
#[derive(Debug, Clone)]
pub struct ScalarQuantizer {
    params: QuantizationParams,
    sample_size: usize,
    seed: u64,
}

impl ScalarQuantizer {
    pub fn new(params: QuantizationParams) -> Result<Self> {
        if params.sq_type == ScalarQuantizationType::EightBit {
            return Err(Error::UnsupportedQuantizationType(params.sq_type.id()));
        }
        Ok(Self {
            params,
            sample_size: DEFAULT_SAMPLE_SIZE,
            seed: 42,
        })
    }

    pub fn with_sample_size(mut self, sample_size: usize) -> Self {
        self.sample_size = sample_size.max(1);
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn params(&self) -> &QuantizationParams {
        &self.params
    }

    /// Sample `supplier` and compute the state. Consumes one fresh pass.
    pub fn train(&self, supplier: &dyn VectorValuesSupplier) -> Result<QuantizationState> {
        let dim = supplier.dimension();
        let sample = self.sample(supplier)?;
        let n = sample.len() / dim;
        if n == 0 {
            return Err(Error::Internal(
                "cannot train a quantizer on zero vectors".into(),
            ));
        }

        let (mean, std) = mean_and_std(&sample, dim);
        let bits = self.params.sq_type.bits();
        let thresholds = thresholds(&mean, &std, bits);

        let state = if bits == 1 {
            let (below, above) = below_above_means(&sample, &mean);
            QuantizationState::OneBit(OneBitScalarQuantizationState {
                params: self.params,
                mean_thresholds: mean,
                below_threshold_means: below,
                above_threshold_means: above,
            })
        } else {
            QuantizationState::MultiBit(MultiBitScalarQuantizationState {
                params: self.params,
                thresholds,
            })
        };
        log::debug!(
            "trained {:?} quantizer on {} sampled vectors (dim {})",
            self.params.sq_type,
            n,
            dim
        );
        Ok(state)
    }

    /// Reservoir sample, flattened `n * dim`
    fn sample(&self, supplier: &dyn VectorValuesSupplier) -> Result<Vec<f32>> {
        let dim = supplier.dimension();
        let k = self.sample_size;
        let mut rng = StdRng::seed_from_u64(self.seed);
        let mut sample: Vec<f32> = Vec::with_capacity(k.min(supplier.declared_len()) * dim);

        let mut values = supplier.values();
        let mut seen = 0usize;
        while let Some((_, vector)) = values.next_vector()? {
            if seen < k {
                sample.extend_from_slice(vector);
            } else {
                let j = rng.random_range(0..=seen);
                if j < k {
                    sample[j * dim..(j + 1) * dim].copy_from_slice(vector);
                }
            }
            seen += 1;
        }
        Ok(sample)
    }
}

/// Welford mean and population standard deviation per dimension
fn mean_and_std(sample: &[f32], dim: usize) -> (Vec<f32>, Vec<f32>) {
    let mut mean = vec![0f32; dim];
    let mut m2 = vec![0f32; dim];
    let mut count = 0f32;
    for vector in sample.chunks_exact(dim) {
        count += 1.0;
        for ((&v, m), s) in vector.iter().zip(&mut mean).zip(&mut m2) {
            let delta = v - *m;
            *m += delta / count;
            *s += delta * (v - *m);
        }
    }
    let std = m2.iter().map(|s| (s / count).sqrt()).collect();
    (mean, std)
}

/// `t[b][d] = mean[d] + (-1 + 2(b+1)/(bits+1)) * std[d]`
fn thresholds(mean: &[f32], std: &[f32], bits: usize) -> Vec<Vec<f32>> {
    let coef = (bits + 1) as f32;
    (0..bits)
        .map(|b| {
            let step = -1.0 + 2.0 * (b + 1) as f32 / coef;
            mean.iter().zip(std).map(|(m, s)| m + step * s).collect()
        })
        .collect()
}

/// Means of the values at or below, and strictly above, each threshold
fn below_above_means(sample: &[f32], thresholds: &[f32]) -> (Vec<f32>, Vec<f32>) {
    let dim = thresholds.len();
    let mut below = vec![0f32; dim];
    let mut above = vec![0f32; dim];
    let mut below_count = vec![0u32; dim];
    let mut above_count = vec![0u32; dim];
    for vector in sample.chunks_exact(dim) {
        for (d, &v) in vector.iter().enumerate() {
            if v <= thresholds[d] {
                below[d] += v;
                below_count[d] += 1;
            } else {
                above[d] += v;
                above_count[d] += 1;
            }
        }
    }
    for d in 0..dim {
        if below_count[d] > 0 {
            below[d] /= below_count[d] as f32;
        }
        if above_count[d] > 0 {
            above[d] /= above_count[d] as f32;
        }
    }
    (below, above)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::segment::FieldVectorBuffer;

    fn buffer(rows: &[[f32; 2]]) -> FieldVectorBuffer {
        let mut b = FieldVectorBuffer::new(2);
        for (i, row) in rows.iter().enumerate() {
            b.push(i as u32, row).unwrap();
        }
        b
    }

    #[test]
    fn test_one_bit_training() {
        let b = buffer(&[[0.0, 10.0], [2.0, 10.0], [4.0, 10.0], [6.0, 10.0]]);
        let q = ScalarQuantizer::new(QuantizationParams::new(ScalarQuantizationType::OneBit))
            .unwrap();
        let QuantizationState::OneBit(state) = q.train(&b).unwrap() else {
            panic!("expected one-bit state");
        };
        assert_eq!(state.mean_thresholds, vec![3.0, 10.0]);
        assert_eq!(state.below_threshold_means, vec![1.0, 10.0]);
        // Nothing above a constant dimension's mean
        assert_eq!(state.above_threshold_means, vec![5.0, 0.0]);
    }

    #[test]
    fn test_multi_bit_thresholds() {
        // mean 2, population std 1 in both dimensions
        let b = buffer(&[[1.0, 1.0], [3.0, 3.0], [1.0, 3.0], [3.0, 1.0]]);
        let q = ScalarQuantizer::new(QuantizationParams::new(ScalarQuantizationType::TwoBit))
            .unwrap();
        let QuantizationState::MultiBit(state) = q.train(&b).unwrap() else {
            panic!("expected multi-bit state");
        };
        let third = 1.0 / 3.0;
        for (t, expected) in state.thresholds.iter().zip([2.0 - third, 2.0 + third]) {
            for v in t {
                assert!((v - expected).abs() < 1e-5, "{} vs {}", v, expected);
            }
        }
        let code = QuantizationState::MultiBit(state).quantize(&[3.0, 1.0]);
        assert_eq!(code, vec![0b1010_0000]);
    }

    #[test]
    fn test_sampling_is_bounded_and_seeded() {
        let mut b = FieldVectorBuffer::new(2);
        for i in 0..1_000u32 {
            b.push(i, &[i as f32, -(i as f32)]).unwrap();
        }
        let params = QuantizationParams::new(ScalarQuantizationType::FourBit);
        let q = ScalarQuantizer::new(params).unwrap().with_sample_size(50);
        assert_eq!(q.sample(&b).unwrap().len(), 100);
        assert_eq!(q.train(&b).unwrap(), q.train(&b).unwrap());
    }

    #[test]
    fn test_rejects_eight_bit_and_empty() {
        let eight = QuantizationParams::new(ScalarQuantizationType::EightBit);
        assert!(matches!(
            ScalarQuantizer::new(eight),
            Err(Error::UnsupportedQuantizationType(8))
        ));
        let q = ScalarQuantizer::new(QuantizationParams::new(ScalarQuantizationType::OneBit))
            .unwrap();
        assert!(q.train(&FieldVectorBuffer::new(3)).is_err());
    }
}
