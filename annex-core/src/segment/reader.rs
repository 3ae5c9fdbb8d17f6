//! Read side of a native vector segment

use rustc_hash::FxHashMap;

use super::config::FieldVectorConfig;
use super::quantization_state::QuantizationStateReader;
use super::types::SegmentInfo;
use crate::directories::{Directory, LazyFileHandle, OwnedBytes};
use crate::quantization::QuantizationState;
use crate::structures::FlatVectorReader;
use crate::{Error, Result};

struct FieldVectors {
    config: FieldVectorConfig,
    vectors: FlatVectorReader,
}

/// Opened vector files of one segment.
///
/// Field files are validated at open; the quantization file is only parsed
/// when states are requested.
pub struct NativeVectorSegmentReader {
    segment: SegmentInfo,
    fields: FxHashMap<u32, FieldVectors>,
    configs: FxHashMap<u32, FieldVectorConfig>,
    quantization_file: Option<LazyFileHandle>,
}

impl NativeVectorSegmentReader {
    /// Open every configured field's file. A field without a file has no
    /// vectors in this segment.
    pub async fn open<D: Directory + ?Sized>(
        dir: &D,
        segment: &SegmentInfo,
        fields: &[FieldVectorConfig],
    ) -> Result<Self> {
        let files = segment.files();
        let mut opened = FxHashMap::default();
        for config in fields {
            let path = files.field_vectors(config.field_id);
            if !dir.exists(&path).await? {
                log::debug!(
                    "[{}] no vector file for field '{}'",
                    segment.base_name(),
                    config.name
                );
                continue;
            }
            let vectors = FlatVectorReader::open(dir.open_lazy(&path).await?).await?;
            if vectors.dimension() != config.dimension {
                return Err(Error::corrupt(format!(
                    "{:?}: dimension {} but field '{}' has {}",
                    path,
                    vectors.dimension(),
                    config.name,
                    config.dimension
                )));
            }
            opened.insert(
                config.field_id,
                FieldVectors {
                    config: config.clone(),
                    vectors,
                },
            );
        }

        let quantization_path = files.quantization_state();
        let quantization_file = if dir.exists(&quantization_path).await? {
            Some(dir.open_lazy(&quantization_path).await?)
        } else {
            None
        };

        Ok(Self {
            segment: segment.clone(),
            fields: opened,
            configs: fields.iter().map(|f| (f.field_id, f.clone())).collect(),
            quantization_file,
        })
    }

    pub fn segment(&self) -> &SegmentInfo {
        &self.segment
    }

    pub fn has_field(&self, field_id: u32) -> bool {
        self.fields.contains_key(&field_id)
    }

    /// Fields with vectors in this segment, ascending
    pub fn field_ids(&self) -> Vec<u32> {
        let mut ids: Vec<u32> = self.fields.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn num_vectors(&self, field_id: u32) -> usize {
        self.fields.get(&field_id).map_or(0, |f| f.vectors.len())
    }

    /// A fresh cursor over the field's vectors
    pub fn flat_vectors(&self, field_id: u32) -> Result<FlatVectorReader> {
        self.fields
            .get(&field_id)
            .map(|f| f.vectors.fork())
            .ok_or_else(|| {
                Error::FieldNotFound(format!(
                    "field id {} has no vectors in {}",
                    field_id,
                    self.segment.base_name()
                ))
            })
    }

    async fn quantization_reader(&self) -> Result<Option<QuantizationStateReader>> {
        match &self.quantization_file {
            Some(handle) => Ok(Some(
                QuantizationStateReader::from_handle(handle.clone(), &self.segment).await?,
            )),
            None => Ok(None),
        }
    }

    /// Raw state payloads by field name. Never fails: a missing or corrupt
    /// quantization file reads as no quantization.
    pub async fn quantization_states(&self) -> FxHashMap<String, OwnedBytes> {
        let states = QuantizationStateReader::read_all_degraded(
            self.quantization_reader().await,
            &self.segment,
        )
        .await;
        states
            .into_iter()
            .filter_map(|(field_id, payload)| match self.configs.get(&field_id) {
                Some(config) => Some((config.name.clone(), payload)),
                None => {
                    log::debug!(
                        "[{}] quantization state for unknown field id {}",
                        self.segment.base_name(),
                        field_id
                    );
                    None
                }
            })
            .collect()
    }

    /// The field's decoded state, decoded with its configured params
    pub async fn quantization_state(&self, field_id: u32) -> Result<QuantizationState> {
        let config = self
            .configs
            .get(&field_id)
            .ok_or_else(|| Error::FieldNotFound(format!("field id {}", field_id)))?;
        let params = config.quantization.ok_or_else(|| {
            Error::FieldNotFound(format!("field '{}' is not quantized", config.name))
        })?;
        match self.quantization_reader().await? {
            Some(reader) => reader.read_one(field_id, &params).await,
            None => Err(Error::FieldNotFound(format!(
                "{} has no quantization state file",
                self.segment.base_name()
            ))),
        }
    }

    /// Recompute the checksum of every file of the segment
    pub async fn check_integrity(&self) -> Result<()> {
        for id in self.field_ids() {
            if let Some(field) = self.fields.get(&id) {
                field.vectors.verify().await.map_err(|e| {
                    Error::corrupt(format!("field '{}': {}", field.config.name, e))
                })?;
            }
        }
        if let Some(reader) = self.quantization_reader().await? {
            reader.verify().await?;
        }
        Ok(())
    }
}
