//! Per-field and per-writer configuration for native vector segments

use serde::{Deserialize, Serialize};

use crate::quantization::{DEFAULT_SAMPLE_SIZE, QuantizationParams, ScalarQuantizer};
use crate::structures::flat_vectors::{
    METRIC_INNER_PRODUCT, METRIC_L1, METRIC_L2, METRIC_LINF,
};
use crate::{Error, Result};

/// Distance space of a vector field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpaceType {
    #[default]
    L2,
    InnerProduct,
    /// Stored as inner product; callers normalize before indexing
    Cosine,
    L1,
    LInf,
}

impl SpaceType {
    /// Metric id written to the flat file header
    pub fn metric_type(&self) -> i32 {
        match self {
            SpaceType::L2 => METRIC_L2,
            SpaceType::InnerProduct | SpaceType::Cosine => METRIC_INNER_PRODUCT,
            SpaceType::L1 => METRIC_L1,
            SpaceType::LInf => METRIC_LINF,
        }
    }
}

/// Where a field's index is built
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildMode {
    #[default]
    Local,
    Remote,
}

/// Resolved settings of one vector field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldVectorConfig {
    pub field_id: u32,
    pub name: String,
    pub dimension: usize,
    #[serde(default)]
    pub space_type: SpaceType,
    #[serde(default)]
    pub quantization: Option<QuantizationParams>,
    /// Overrides the writer default; `-1` never builds, `0` always builds
    #[serde(default)]
    pub build_threshold: Option<i64>,
    #[serde(default)]
    pub build_mode: BuildMode,
}

impl FieldVectorConfig {
    pub fn new(field_id: u32, name: impl Into<String>, dimension: usize) -> Self {
        Self {
            field_id,
            name: name.into(),
            dimension,
            space_type: SpaceType::default(),
            quantization: None,
            build_threshold: None,
            build_mode: BuildMode::default(),
        }
    }

    pub fn with_space_type(mut self, space_type: SpaceType) -> Self {
        self.space_type = space_type;
        self
    }

    pub fn with_quantization(mut self, params: QuantizationParams) -> Self {
        self.quantization = Some(params);
        self
    }

    pub fn with_build_threshold(mut self, threshold: i64) -> Self {
        self.build_threshold = Some(threshold);
        self
    }

    pub fn with_build_mode(mut self, mode: BuildMode) -> Self {
        self.build_mode = mode;
        self
    }

    pub fn threshold(&self, config: &VectorWriterConfig) -> i64 {
        self.build_threshold
            .unwrap_or(config.default_build_threshold)
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.dimension == 0 || self.dimension > i32::MAX as usize {
            return Err(Error::Config(format!(
                "field '{}': invalid dimension {}",
                self.name, self.dimension
            )));
        }
        if self.field_id > i32::MAX as u32 {
            return Err(Error::Config(format!(
                "field '{}': id {} does not fit a record key",
                self.name, self.field_id
            )));
        }
        // Reject what training would reject, before anything is written
        if let Some(params) = self.quantization
            && let Err(e) = ScalarQuantizer::new(params)
        {
            return Err(Error::Config(format!("field '{}': {}", self.name, e)));
        }
        Ok(())
    }
}

/// Writer-wide settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VectorWriterConfig {
    /// Used by fields without their own threshold
    pub default_build_threshold: i64,
    /// Vectors sampled to train a quantizer
    pub quantization_sample_size: usize,
    pub sample_seed: u64,
    /// Record per-dimension statistics when a profiler is attached
    pub profile_vectors: bool,
}

impl Default for VectorWriterConfig {
    fn default() -> Self {
        Self {
            default_build_threshold: 0,
            quantization_sample_size: DEFAULT_SAMPLE_SIZE,
            sample_seed: 42,
            profile_vectors: true,
        }
    }
}

impl VectorWriterConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        if config.quantization_sample_size == 0 {
            return Err(Error::Config("quantization_sample_size must be > 0".into()));
        }
        Ok(config)
    }

    pub fn with_default_build_threshold(mut self, threshold: i64) -> Self {
        self.default_build_threshold = threshold;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quantization::ScalarQuantizationType;

    #[test]
    fn test_config_from_json() {
        let config = VectorWriterConfig::from_json(r#"{"default_build_threshold": 100}"#).unwrap();
        assert_eq!(config.default_build_threshold, 100);
        assert_eq!(config.quantization_sample_size, DEFAULT_SAMPLE_SIZE);

        assert!(VectorWriterConfig::from_json(r#"{"quantization_sample_size": 0}"#).is_err());
        assert!(matches!(
            VectorWriterConfig::from_json("{"),
            Err(Error::Serialization(_))
        ));
    }

    #[test]
    fn test_field_threshold_override() {
        let config = VectorWriterConfig::default().with_default_build_threshold(100);
        let field = FieldVectorConfig::new(1, "emb", 8);
        assert_eq!(field.threshold(&config), 100);
        assert_eq!(field.with_build_threshold(-1).threshold(&config), -1);
    }

    #[test]
    fn test_field_config_json() {
        let field: FieldVectorConfig = serde_json::from_str(
            r#"{"field_id": 3, "name": "emb", "dimension": 4,
                "space_type": "inner_product", "quantization": {"sq_type": "two_bit"}}"#,
        )
        .unwrap();
        assert_eq!(field.space_type.metric_type(), METRIC_INNER_PRODUCT);
        assert_eq!(
            field.quantization,
            Some(QuantizationParams::new(ScalarQuantizationType::TwoBit))
        );
        assert_eq!(field.build_mode, BuildMode::Local);
        assert!(FieldVectorConfig::new(1, "zero", 0).validate().is_err());
    }

    #[test]
    fn test_untrainable_quantization_rejected() {
        let eight = FieldVectorConfig::new(2, "eight", 4)
            .with_quantization(QuantizationParams::new(ScalarQuantizationType::EightBit));
        assert!(matches!(eight.validate(), Err(Error::Config(_))));
        let four = FieldVectorConfig::new(2, "four", 4)
            .with_quantization(QuantizationParams::new(ScalarQuantizationType::FourBit));
        four.validate().unwrap();
    }
}
