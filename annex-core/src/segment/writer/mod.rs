//! Native vector segment writer.
//!
//! Collects vectors per field, then in one flush (or one merge) decides per
//! field whether to train a quantizer and whether to build an index, and
//! writes one flat vector file per non-empty field plus the segment's
//! quantization state file.

mod merge;

pub use merge::SegmentMergeInput;

use std::sync::Arc;

use rustc_hash::FxHashMap;

use super::ann_build::{BuildBackends, BuildRequest, BuildStrategy};
use super::build_policy::BuildDecision;
use super::config::{FieldVectorConfig, VectorWriterConfig};
use super::profiler::{ProfilerRegistry, SegmentProfilerState};
use super::quantization_state::QuantizationStateWriter;
use super::types::SegmentInfo;
use super::vector_values::{FieldVectorBuffer, VectorValuesSupplier, count_live};
use crate::directories::DirectoryWriter;
use crate::quantization::QuantizationService;
use crate::structures::{FlatVectorFileWriter, FlatVectorHeader};
use crate::{DocId, Error, Result};

/// What happened to one field in a flush or merge
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldOutcome {
    /// No live vectors: nothing written
    Skipped,
    Written {
        live_docs: usize,
        quantized: bool,
        index_built: bool,
    },
    /// The backend failed; raw vectors were still written
    BuildFailed {
        live_docs: usize,
        quantized: bool,
        reason: String,
    },
}

/// Per-field outcomes of one flush or merge, in field order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteSummary {
    pub fields: Vec<(u32, FieldOutcome)>,
}

impl WriteSummary {
    pub fn outcome(&self, field_id: u32) -> Option<&FieldOutcome> {
        self.fields
            .iter()
            .find(|(id, _)| *id == field_id)
            .map(|(_, outcome)| outcome)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriterState {
    Collecting,
    Written,
    Finished,
}

struct FieldEntry {
    config: FieldVectorConfig,
    strategy: BuildStrategy,
    buffer: FieldVectorBuffer,
}

/// Writes the vector files of one segment. Single use: one flush or one
/// merge, then [`NativeVectorSegmentWriter::finish`].
pub struct NativeVectorSegmentWriter {
    segment: SegmentInfo,
    config: VectorWriterConfig,
    fields: Vec<FieldEntry>,
    field_index: FxHashMap<u32, usize>,
    quantization: QuantizationService,
    quantization_writer: QuantizationStateWriter,
    profiler: Option<Arc<ProfilerRegistry>>,
    state: WriterState,
}

impl NativeVectorSegmentWriter {
    pub fn new(
        segment: SegmentInfo,
        fields: Vec<FieldVectorConfig>,
        config: VectorWriterConfig,
        backends: &BuildBackends,
    ) -> Result<Self> {
        if config.quantization_sample_size == 0 {
            return Err(Error::Config("quantization_sample_size must be > 0".into()));
        }
        let mut field_index = FxHashMap::default();
        let mut entries = Vec::with_capacity(fields.len());
        for field in fields {
            field.validate()?;
            if field_index.insert(field.field_id, entries.len()).is_some() {
                return Err(Error::Config(format!(
                    "field id {} configured twice",
                    field.field_id
                )));
            }
            entries.push(FieldEntry {
                strategy: backends.strategy_for(&field),
                buffer: FieldVectorBuffer::new(field.dimension),
                config: field,
            });
        }
        Ok(Self {
            quantization: QuantizationService::new(
                config.quantization_sample_size,
                config.sample_seed,
            ),
            quantization_writer: QuantizationStateWriter::new(segment.clone()),
            segment,
            config,
            fields: entries,
            field_index,
            profiler: None,
            state: WriterState::Collecting,
        })
    }

    /// Record field profiles into `registry` on flush and merge
    pub fn with_profiler(mut self, registry: Arc<ProfilerRegistry>) -> Self {
        self.profiler = Some(registry);
        self
    }

    pub fn segment(&self) -> &SegmentInfo {
        &self.segment
    }

    /// Buffer one document's vector. Doc ids must increase per field.
    pub fn add_vector(&mut self, field_id: u32, doc: DocId, vector: &[f32]) -> Result<()> {
        if self.state != WriterState::Collecting {
            return Err(Error::ProtocolViolation(format!(
                "add_vector on {} after it was written",
                self.segment.base_name()
            )));
        }
        let idx = *self
            .field_index
            .get(&field_id)
            .ok_or_else(|| Error::FieldNotFound(format!("field id {}", field_id)))?;
        self.fields[idx].buffer.push(doc, vector)
    }

    /// Vectors buffered for `field_id`
    pub fn num_vectors(&self, field_id: u32) -> usize {
        self.field_index
            .get(&field_id)
            .map_or(0, |&idx| self.fields[idx].buffer.len())
    }

    pub fn estimated_memory_bytes(&self) -> usize {
        self.fields
            .iter()
            .map(|f| f.buffer.estimated_memory_bytes())
            .sum()
    }

    fn begin_write(&mut self, op: &str) -> Result<()> {
        if self.state != WriterState::Collecting {
            return Err(Error::ProtocolViolation(format!(
                "{} on {} which was already written",
                op,
                self.segment.base_name()
            )));
        }
        self.state = WriterState::Written;
        if let Some(registry) = &self.profiler
            && self.config.profile_vectors
        {
            registry.create(&self.segment);
        }
        Ok(())
    }

    /// Write every field's buffered vectors
    pub async fn flush<D: DirectoryWriter + ?Sized>(&mut self, dir: &D) -> Result<WriteSummary> {
        self.begin_write("flush")?;
        let mut summary = WriteSummary::default();
        for idx in 0..self.fields.len() {
            let dimension = self.fields[idx].config.dimension;
            let buffer = std::mem::replace(
                &mut self.fields[idx].buffer,
                FieldVectorBuffer::new(dimension),
            );
            let outcome = self.write_field(dir, idx, &buffer).await?;
            summary.fields.push((self.fields[idx].config.field_id, outcome));
        }
        Ok(summary)
    }

    /// Train, decide, build and write one field from `vectors`
    async fn write_field<D: DirectoryWriter + ?Sized>(
        &mut self,
        dir: &D,
        idx: usize,
        vectors: &dyn VectorValuesSupplier,
    ) -> Result<FieldOutcome> {
        let field = &self.fields[idx];
        let config = &field.config;

        // declared_len may overstate after deletions
        let live_docs = count_live(vectors)?;
        if live_docs == 0 {
            log::info!(
                "[{}] field '{}': no live vectors, skipped",
                self.segment.base_name(),
                config.name
            );
            return Ok(FieldOutcome::Skipped);
        }

        let quantization_state = match config.quantization {
            Some(params) => {
                let state = self.quantization.train(params, vectors)?;
                self.quantization_writer
                    .write_state(dir, config.field_id, &state)
                    .await?;
                Some(state)
            }
            None => None,
        };

        let threshold = config.threshold(&self.config);
        let decision = BuildDecision::decide(quantization_state.is_some(), threshold, live_docs);

        let mut build_error = None;
        let index_block = if decision.build_index {
            let request = BuildRequest {
                field: config,
                vectors,
                live_docs,
                quantization: quantization_state.as_ref(),
            };
            match field.strategy.build(&request) {
                Ok(block) => block,
                Err(e) => {
                    let e = match e {
                        e @ Error::IndexBuildFailure { .. } => e,
                        other => Error::IndexBuildFailure {
                            field: config.name.clone(),
                            reason: other.to_string(),
                        },
                    };
                    log::warn!(
                        "[{}] {}; writing raw vectors only",
                        self.segment.base_name(),
                        e
                    );
                    build_error = Some(e.to_string());
                    Vec::new()
                }
            }
        } else {
            Vec::new()
        };

        let path = self.segment.files().field_vectors(config.field_id);
        let header = FlatVectorHeader::new(
            config.dimension,
            live_docs as u64,
            config.space_type.metric_type(),
        );
        let writer = FlatVectorFileWriter::create(dir, &path, header, &index_block).await?;
        let written = writer.write_vectors(&mut *vectors.values());
        let file_len = match written {
            Ok(len) => len,
            Err(e) => {
                if let Err(delete_err) = dir.delete(&path).await {
                    log::warn!("failed to remove partial file {:?}: {}", path, delete_err);
                }
                return Err(e);
            }
        };

        if let Some(registry) = &self.profiler
            && self.config.profile_vectors
        {
            registry.record(
                &self.segment,
                config.field_id,
                SegmentProfilerState::from_supplier(vectors)?,
            );
        }

        let quantized = quantization_state.is_some();
        log::info!(
            "[{}] field '{}': {} live vectors, quantized={}, index_built={}, {} bytes",
            self.segment.base_name(),
            config.name,
            live_docs,
            quantized,
            decision.build_index && build_error.is_none(),
            file_len
        );
        Ok(match build_error {
            Some(reason) => FieldOutcome::BuildFailed {
                live_docs,
                quantized,
                reason,
            },
            None => FieldOutcome::Written {
                live_docs,
                quantized,
                index_built: decision.build_index,
            },
        })
    }

    /// Close the quantization file. Must be called exactly once, after the
    /// flush or merge.
    pub fn finish(&mut self) -> Result<()> {
        if self.state == WriterState::Finished {
            return Err(Error::ProtocolViolation(format!(
                "{} finished twice",
                self.segment.base_name()
            )));
        }
        self.state = WriterState::Finished;
        if let Some(len) = self.quantization_writer.finish()? {
            log::debug!(
                "[{}] quantization state file finished, {} bytes",
                self.segment.base_name(),
                len
            );
        }
        Ok(())
    }
}
