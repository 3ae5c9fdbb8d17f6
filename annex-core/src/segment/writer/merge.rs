//! Merging the vector files of several segments into a new one

use std::sync::Arc;

use rustc_hash::FxHashSet;

use super::{NativeVectorSegmentWriter, WriteSummary};
use crate::directories::DirectoryWriter;
use crate::segment::reader::NativeVectorSegmentReader;
use crate::segment::vector_values::{MergeSource, MergedVectorSupplier};
use crate::{DocId, Error, Result};

/// One source segment of a merge
#[derive(Clone)]
pub struct SegmentMergeInput<'a> {
    pub reader: &'a NativeVectorSegmentReader,
    /// First doc id of this segment in the merged segment
    pub doc_base: DocId,
    /// Segment-local doc ids deleted since the segment was written
    pub deleted: Option<Arc<FxHashSet<DocId>>>,
}

impl<'a> SegmentMergeInput<'a> {
    pub fn new(reader: &'a NativeVectorSegmentReader, doc_base: DocId) -> Self {
        Self {
            reader,
            doc_base,
            deleted: None,
        }
    }

    pub fn with_deletions(mut self, deleted: Arc<FxHashSet<DocId>>) -> Self {
        self.deleted = Some(deleted);
        self
    }
}

impl NativeVectorSegmentWriter {
    /// Write every field from the live vectors of `inputs`, in input order.
    ///
    /// The writer must not have received vectors through `add_vector`.
    pub async fn merge<D: DirectoryWriter + ?Sized>(
        &mut self,
        dir: &D,
        inputs: &[SegmentMergeInput<'_>],
    ) -> Result<WriteSummary> {
        if self.fields.iter().any(|f| !f.buffer.is_empty()) {
            return Err(Error::ProtocolViolation(format!(
                "merge into {} which already buffers vectors",
                self.segment.base_name()
            )));
        }
        self.begin_write("merge")?;
        log::info!(
            "[{}] merging {} segments",
            self.segment.base_name(),
            inputs.len()
        );

        let mut summary = WriteSummary::default();
        for idx in 0..self.fields.len() {
            let field_id = self.fields[idx].config.field_id;
            let dimension = self.fields[idx].config.dimension;

            let mut sources = Vec::with_capacity(inputs.len());
            for input in inputs {
                if !input.reader.has_field(field_id) {
                    continue;
                }
                let vectors = input.reader.flat_vectors(field_id)?;
                let mut source = MergeSource::new(vectors, input.doc_base);
                if let Some(deleted) = &input.deleted {
                    source = source.with_deletions(Arc::clone(deleted));
                }
                sources.push(source);
            }
            let merged = MergedVectorSupplier::load(dimension, &sources).await?;
            let outcome = self.write_field(dir, idx, &merged).await?;
            summary.fields.push((field_id, outcome));
        }
        Ok(summary)
    }
}
