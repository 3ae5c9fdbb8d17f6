//! Single-pass vector sources consumed by training, building and writing.
//!
//! A [`VectorValues`] is exhausted exactly once; every consumer that needs
//! another pass asks its [`VectorValuesSupplier`] for a fresh instance.

use std::sync::Arc;

use rustc_hash::FxHashSet;

use crate::structures::FlatVectorReader;
use crate::{DocId, Error, Result};

/// Forward-only cursor over `(doc id, vector)` pairs in doc id order
pub trait VectorValues: Send {
    fn dimension(&self) -> usize;

    /// Upper bound on the number of vectors; may count deleted docs
    fn declared_len(&self) -> usize;

    /// Next pair, `None` once exhausted. Calling again after `None` is a
    /// protocol violation.
    fn next_vector(&mut self) -> Result<Option<(DocId, &[f32])>>;
}

/// Produces fresh [`VectorValues`] instances over the same data
pub trait VectorValuesSupplier: Send + Sync {
    fn dimension(&self) -> usize;

    fn declared_len(&self) -> usize;

    fn values(&self) -> Box<dyn VectorValues + '_>;
}

/// Count vectors by exhausting a fresh instance.
///
/// `declared_len` is not trusted: after deletions it overstates.
pub fn count_live(supplier: &dyn VectorValuesSupplier) -> Result<usize> {
    let mut values = supplier.values();
    let mut count = 0;
    while values.next_vector()?.is_some() {
        count += 1;
    }
    Ok(count)
}

fn exhausted_error() -> Error {
    Error::ProtocolViolation("vector values consumed past exhaustion".into())
}

/// Per-field ingestion buffer: doc ids plus contiguous f32 storage
#[derive(Debug, Clone)]
pub struct FieldVectorBuffer {
    dimension: usize,
    doc_ids: Vec<DocId>,
    data: Vec<f32>,
}

impl FieldVectorBuffer {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            doc_ids: Vec::new(),
            data: Vec::new(),
        }
    }

    /// Append a vector. Doc ids must be strictly increasing.
    pub fn push(&mut self, doc: DocId, vector: &[f32]) -> Result<()> {
        if vector.len() != self.dimension {
            return Err(Error::InvalidVector(format!(
                "doc {}: expected dimension {}, got {}",
                doc,
                self.dimension,
                vector.len()
            )));
        }
        if let Some(&last) = self.doc_ids.last()
            && doc <= last
        {
            return Err(Error::InvalidVector(format!(
                "doc {} added after doc {}",
                doc, last
            )));
        }
        if vector.iter().any(|v| !v.is_finite()) {
            return Err(Error::InvalidVector(format!(
                "doc {}: vector has non-finite values",
                doc
            )));
        }
        self.doc_ids.push(doc);
        self.data.extend_from_slice(vector);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.doc_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.doc_ids.is_empty()
    }

    pub fn vector(&self, ord: usize) -> &[f32] {
        &self.data[ord * self.dimension..(ord + 1) * self.dimension]
    }

    pub fn estimated_memory_bytes(&self) -> usize {
        self.doc_ids.capacity() * size_of::<DocId>() + self.data.capacity() * size_of::<f32>()
    }
}

impl VectorValuesSupplier for FieldVectorBuffer {
    fn dimension(&self) -> usize {
        self.dimension
    }

    fn declared_len(&self) -> usize {
        self.doc_ids.len()
    }

    fn values(&self) -> Box<dyn VectorValues + '_> {
        Box::new(BufferedVectorValues {
            buffer: self,
            pos: 0,
            done: false,
        })
    }
}

/// Cursor over a [`FieldVectorBuffer`]
pub struct BufferedVectorValues<'a> {
    buffer: &'a FieldVectorBuffer,
    pos: usize,
    done: bool,
}

impl VectorValues for BufferedVectorValues<'_> {
    fn dimension(&self) -> usize {
        self.buffer.dimension
    }

    fn declared_len(&self) -> usize {
        self.buffer.len()
    }

    fn next_vector(&mut self) -> Result<Option<(DocId, &[f32])>> {
        if self.done {
            return Err(exhausted_error());
        }
        if self.pos == self.buffer.len() {
            self.done = true;
            return Ok(None);
        }
        let ord = self.pos;
        self.pos += 1;
        Ok(Some((self.buffer.doc_ids[ord], self.buffer.vector(ord))))
    }
}

/// One source segment taking part in a merge
pub struct MergeSource {
    pub vectors: FlatVectorReader,
    /// Added to every surviving doc id of this source
    pub doc_base: DocId,
    /// Segment-local doc ids to drop
    pub deleted: Option<Arc<FxHashSet<DocId>>>,
}

impl MergeSource {
    pub fn new(vectors: FlatVectorReader, doc_base: DocId) -> Self {
        Self {
            vectors,
            doc_base,
            deleted: None,
        }
    }

    pub fn with_deletions(mut self, deleted: Arc<FxHashSet<DocId>>) -> Self {
        self.deleted = Some(deleted);
        self
    }
}

/// Live vectors of several segments, concatenated in source order with
/// deleted docs dropped and doc ids rebased.
#[derive(Debug, Clone)]
pub struct MergedVectorSupplier {
    declared_len: usize,
    live: FieldVectorBuffer,
}

impl MergedVectorSupplier {
    /// Stream each source through its bucketed reader, keeping only live
    /// vectors. Deleted docs are never read.
    pub async fn load(dimension: usize, sources: &[MergeSource]) -> Result<Self> {
        let mut declared_len = 0;
        let mut live = FieldVectorBuffer::new(dimension);
        for source in sources {
            if source.vectors.dimension() != dimension {
                return Err(Error::CorruptSegment(format!(
                    "merge source has dimension {}, field expects {}",
                    source.vectors.dimension(),
                    dimension
                )));
            }
            let mut reader = source.vectors.fork();
            declared_len += reader.len();
            for ord in 0..reader.len() {
                let local = reader.doc_ids()[ord];
                if source.deleted.as_ref().is_some_and(|d| d.contains(&local)) {
                    continue;
                }
                let doc = source.doc_base.checked_add(local).ok_or_else(|| {
                    Error::Internal(format!(
                        "doc base {} + doc {} overflows",
                        source.doc_base, local
                    ))
                })?;
                let vector = reader.vector_value(ord).await?;
                live.push(doc, vector)?;
            }
        }
        Ok(Self { declared_len, live })
    }

    /// Vectors that survived deletions
    pub fn num_live(&self) -> usize {
        self.live.len()
    }

    pub fn estimated_memory_bytes(&self) -> usize {
        self.live.estimated_memory_bytes()
    }
}

impl VectorValuesSupplier for MergedVectorSupplier {
    fn dimension(&self) -> usize {
        self.live.dimension
    }

    /// Vectors in the sources before deletions
    fn declared_len(&self) -> usize {
        self.declared_len
    }

    fn values(&self) -> Box<dyn VectorValues + '_> {
        self.live.values()
    }
}
