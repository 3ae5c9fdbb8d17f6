//! Trained quantization states and their persisted payload format.
//!
//! A payload is one format-version byte followed by the state as JSON.

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Leading byte of every serialized state
pub const STATE_FORMAT_VERSION: u8 = 1;

/// Scalar quantization variants, identified by bits per dimension
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScalarQuantizationType {
    OneBit,
    TwoBit,
    FourBit,
    EightBit,
}

impl ScalarQuantizationType {
    pub fn from_id(id: u8) -> Result<Self> {
        match id {
            1 => Ok(Self::OneBit),
            2 => Ok(Self::TwoBit),
            4 => Ok(Self::FourBit),
            8 => Ok(Self::EightBit),
            other => Err(Error::UnsupportedQuantizationType(other)),
        }
    }

    pub fn id(&self) -> u8 {
        self.bits() as u8
    }

    pub fn bits(&self) -> usize {
        match self {
            Self::OneBit => 1,
            Self::TwoBit => 2,
            Self::FourBit => 4,
            Self::EightBit => 8,
        }
    }
}

/// Quantization settings of one field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuantizationParams {
    pub sq_type: ScalarQuantizationType,
}

impl QuantizationParams {
    pub fn new(sq_type: ScalarQuantizationType) -> Self {
        Self { sq_type }
    }

    /// Packed code length for one `dimension`-wide vector
    pub fn code_len(&self, dimension: usize) -> usize {
        (self.sq_type.bits() * dimension).div_ceil(8)
    }
}

/// One threshold per dimension plus the means on either side of it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OneBitScalarQuantizationState {
    pub params: QuantizationParams,
    pub mean_thresholds: Vec<f32>,
    pub below_threshold_means: Vec<f32>,
    pub above_threshold_means: Vec<f32>,
}

impl OneBitScalarQuantizationState {
    pub fn dimension(&self) -> usize {
        self.mean_thresholds.len()
    }

    /// Rescale `vector` so the below/above means map to 0 and 1
    pub fn transform(&self, vector: &[f32]) -> Vec<f32> {
        vector
            .iter()
            .zip(&self.below_threshold_means)
            .zip(&self.above_threshold_means)
            .map(|((&v, &below), &above)| {
                let span = above - below;
                if span == 0.0 { 0.0 } else { (v - below) / span }
            })
            .collect()
    }
}

/// `bits` thresholds per dimension, stored as `thresholds[bit][dim]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MultiBitScalarQuantizationState {
    pub params: QuantizationParams,
    pub thresholds: Vec<Vec<f32>>,
}

impl MultiBitScalarQuantizationState {
    pub fn dimension(&self) -> usize {
        self.thresholds.first().map_or(0, Vec::len)
    }
}

/// A trained state as stored in the quantization file
#[derive(Debug, Clone, PartialEq)]
pub enum QuantizationState {
    OneBit(OneBitScalarQuantizationState),
    MultiBit(MultiBitScalarQuantizationState),
}

impl QuantizationState {
    pub fn params(&self) -> QuantizationParams {
        match self {
            Self::OneBit(s) => s.params,
            Self::MultiBit(s) => s.params,
        }
    }

    pub fn dimension(&self) -> usize {
        match self {
            Self::OneBit(s) => s.dimension(),
            Self::MultiBit(s) => s.dimension(),
        }
    }

    pub fn code_len(&self) -> usize {
        self.params().code_len(self.dimension())
    }

    /// Pack `vector` into `out`: bit `b * dim + d` is set when
    /// `vector[d] > thresholds[b][d]`, most significant bit first.
    pub fn quantize_into(&self, vector: &[f32], out: &mut [u8]) {
        out.fill(0);
        let dim = self.dimension();
        let mut pack = |b: usize, thresholds: &[f32]| {
            for (d, (&v, &t)) in vector.iter().zip(thresholds).enumerate() {
                if v > t {
                    let pos = b * dim + d;
                    out[pos >> 3] |= 1 << (7 - (pos & 7));
                }
            }
        };
        match self {
            Self::OneBit(s) => pack(0, &s.mean_thresholds),
            Self::MultiBit(s) => {
                for (b, thresholds) in s.thresholds.iter().enumerate() {
                    pack(b, thresholds);
                }
            }
        }
    }

    pub fn quantize(&self, vector: &[f32]) -> Vec<u8> {
        let mut code = vec![0u8; self.code_len()];
        self.quantize_into(vector, &mut code);
        code
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut out = vec![STATE_FORMAT_VERSION];
        match self {
            Self::OneBit(s) => serde_json::to_writer(&mut out, s)?,
            Self::MultiBit(s) => serde_json::to_writer(&mut out, s)?,
        }
        Ok(out)
    }

    /// Decode a payload; the layout is chosen by `params`, not by the bytes.
    pub fn from_bytes(params: &QuantizationParams, bytes: &[u8]) -> Result<Self> {
        let (&version, json) = bytes
            .split_first()
            .ok_or_else(|| Error::Serialization("empty quantization state".into()))?;
        if version != STATE_FORMAT_VERSION {
            return Err(Error::Serialization(format!(
                "unknown quantization state version {}",
                version
            )));
        }
        let state = match params.sq_type {
            ScalarQuantizationType::OneBit => Self::OneBit(serde_json::from_slice(json)?),
            ScalarQuantizationType::TwoBit | ScalarQuantizationType::FourBit => {
                Self::MultiBit(serde_json::from_slice(json)?)
            }
            ScalarQuantizationType::EightBit => {
                return Err(Error::UnsupportedQuantizationType(params.sq_type.id()));
            }
        };
        if state.params() != *params {
            return Err(Error::Serialization(format!(
                "state trained for {:?}, requested {:?}",
                state.params().sq_type,
                params.sq_type
            )));
        }
        Ok(state)
    }
}
