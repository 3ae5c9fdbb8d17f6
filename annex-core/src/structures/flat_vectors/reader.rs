use std::io::Cursor;
use std::sync::Arc;

use byteorder::{ByteOrder, LittleEndian, ReadBytesExt};

use super::{
    BUCKET_SIZE, FIXED_HEADER_SIZE, FLAT_FOURCC, FlatVectorHeader, FlatVectorMeta,
    SimilarityFunction,
};
use crate::codec::{self, FOOTER_SIZE};
use crate::directories::{AsyncFileRead, LazyFileHandle, LazyFileSlice, OwnedBytes};
use crate::structures::TERMINATED;
use crate::{DocId, Error, Result};

/// State shared by every cursor over one file
#[derive(Debug)]
struct Shared {
    handle: LazyFileHandle,
    meta: FlatVectorMeta,
    doc_ids: Vec<DocId>,
    vectors: LazyFileSlice,
}

/// Random-access reader over a flat vector file.
///
/// The id list is loaded at open; vectors are fetched in buckets of
/// [`BUCKET_SIZE`] on demand. A reader is a single cursor: use
/// [`FlatVectorReader::fork`] to get an independent one over the same file.
#[derive(Debug)]
pub struct FlatVectorReader {
    shared: Arc<Shared>,
    /// None until the first next_doc/advance
    ord: Option<usize>,
    bucket: Vec<f32>,
    bucket_start: Option<usize>,
    bucket_loads: u64,
}

impl FlatVectorReader {
    pub async fn open(handle: LazyFileHandle) -> Result<Self> {
        let file_len = handle.len();
        if file_len < FIXED_HEADER_SIZE + FOOTER_SIZE {
            return Err(Error::corrupt(format!(
                "flat vector file too short: {} bytes",
                file_len
            )));
        }

        let footer = handle
            .read_bytes_range(file_len - FOOTER_SIZE..file_len)
            .await?;
        codec::retrieve_checksum(&footer)?;

        let header = read_header(&handle).await?;
        let meta = FlatVectorMeta::locate(header.clone(), file_len).ok_or_else(|| {
            Error::corrupt(format!(
                "dim {} x ntotal {} does not fit a {} byte file",
                header.dimension, header.total_vectors, file_len
            ))
        })?;

        let n = header.total_vectors;
        let vector_bytes = read_i64_at(&handle, meta.vector_section_offset).await?;
        if vector_bytes as u64 != 4 * header.dimension as u64 * n {
            return Err(Error::corrupt(format!(
                "vector section holds {} bytes, expected {}",
                vector_bytes,
                4 * header.dimension as u64 * n
            )));
        }
        let id_count = read_i64_at(&handle, meta.id_section_offset).await?;
        if id_count as u64 != n {
            return Err(Error::corrupt(format!(
                "id section holds {} ids, expected {}",
                id_count, n
            )));
        }

        let id_bytes = handle
            .read_bytes_range(meta.id_data_offset()..meta.id_data_offset() + 8 * n)
            .await?;
        let doc_ids = decode_doc_ids(&id_bytes)?;

        let vectors = handle.slice(meta.vector_data_offset()..meta.id_section_offset);
        Ok(Self {
            shared: Arc::new(Shared {
                handle,
                meta,
                doc_ids,
                vectors,
            }),
            ord: None,
            bucket: Vec::new(),
            bucket_start: None,
            bucket_loads: 0,
        })
    }

    /// Independent cursor over the same file, positioned before the first doc
    pub fn fork(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
            ord: None,
            bucket: Vec::new(),
            bucket_start: None,
            bucket_loads: 0,
        }
    }

    pub fn meta(&self) -> &FlatVectorMeta {
        &self.shared.meta
    }

    pub fn dimension(&self) -> usize {
        self.shared.meta.header.dimension
    }

    /// Number of vectors (`ntotal`)
    pub fn len(&self) -> usize {
        self.shared.doc_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shared.doc_ids.is_empty()
    }

    pub fn similarity(&self) -> SimilarityFunction {
        SimilarityFunction::from_metric_type(self.shared.meta.header.metric_type)
    }

    /// Ordinal-indexed doc ids, sorted ascending
    pub fn doc_ids(&self) -> &[DocId] {
        &self.shared.doc_ids
    }

    /// Whether an index block was written ahead of the vectors
    pub fn has_index(&self) -> bool {
        self.shared.meta.index_block_len() > 0
    }

    /// Opaque index block between header and vector section
    pub async fn index_block(&self) -> Result<OwnedBytes> {
        let meta = &self.shared.meta;
        Ok(self
            .shared
            .handle
            .read_bytes_range(meta.header_end..meta.vector_section_offset)
            .await?)
    }

    /// Every vector of the file as raw little-endian f32 bytes
    pub async fn read_vector_section(&self) -> Result<OwnedBytes> {
        Ok(self.shared.vectors.read_bytes().await?)
    }

    /// Current ordinal, None before the first move or after exhaustion
    pub fn ord(&self) -> Option<usize> {
        self.ord.filter(|&o| o < self.len())
    }

    /// Current doc id; [`TERMINATED`] when not positioned on a doc
    pub fn doc(&self) -> DocId {
        match self.ord() {
            Some(o) => self.shared.doc_ids[o],
            None => TERMINATED,
        }
    }

    /// Move to the next ordinal
    pub fn next_doc(&mut self) -> DocId {
        let next = self.ord.map_or(0, |o| o.saturating_add(1));
        self.ord = Some(next.min(self.len()));
        self.doc()
    }

    /// Move to the first doc >= `target` after the current one.
    ///
    /// Binary search over `(ord + 1)..len`; returns [`TERMINATED`] when the
    /// search runs off the end.
    pub fn advance(&mut self, target: DocId) -> DocId {
        let from = self.ord.map_or(0, |o| o.saturating_add(1)).min(self.len());
        let ids = &self.shared.doc_ids[from..];
        let pos = ids.partition_point(|&d| d < target);
        self.ord = Some(from + pos);
        self.doc()
    }

    /// Vector at `ord`, served from the bucket cache when possible
    pub async fn vector_value(&mut self, ord: usize) -> Result<&[f32]> {
        let n = self.len();
        if ord >= n {
            return Err(Error::InvalidVector(format!(
                "ordinal {} out of range ({} vectors)",
                ord, n
            )));
        }
        let dim = self.dimension();
        let start = ord - ord % BUCKET_SIZE;
        if self.bucket_start != Some(start) {
            let count = BUCKET_SIZE.min(n - start);
            let from = (start * dim * 4) as u64;
            let to = from + (count * dim * 4) as u64;
            let bytes = self.shared.vectors.read_bytes_range(from..to).await?;
            self.bucket.resize(count * dim, 0.0);
            LittleEndian::read_f32_into(&bytes, &mut self.bucket);
            self.bucket_start = Some(start);
            self.bucket_loads += 1;
        }
        let offset = (ord - start) * dim;
        Ok(&self.bucket[offset..offset + dim])
    }

    /// Vector of the doc the cursor is on
    pub async fn current_vector(&mut self) -> Result<&[f32]> {
        match self.ord() {
            Some(ord) => self.vector_value(ord).await,
            None => Err(Error::ProtocolViolation(
                "cursor is not positioned on a document".into(),
            )),
        }
    }

    /// Bulk reads issued by this cursor so far
    pub fn bucket_loads(&self) -> u64 {
        self.bucket_loads
    }

    /// Recompute the footer checksum over the whole file
    pub async fn verify(&self) -> Result<()> {
        let data = self.shared.handle.read_bytes().await?;
        codec::verify_checksum(&data)
    }
}

async fn read_i64_at(handle: &LazyFileHandle, offset: u64) -> Result<i64> {
    let bytes = handle.read_bytes_range(offset..offset + 8).await?;
    Ok(LittleEndian::read_i64(&bytes))
}

async fn read_header(handle: &LazyFileHandle) -> Result<FlatVectorHeader> {
    let bytes = handle.read_bytes_range(0..FIXED_HEADER_SIZE).await?;
    let mut cursor = Cursor::new(bytes.as_slice());

    let fourcc = cursor.read_u32::<LittleEndian>()?;
    if fourcc != FLAT_FOURCC {
        return Err(Error::corrupt(format!("unknown fourcc {:#010x}", fourcc)));
    }
    let dimension = cursor.read_i32::<LittleEndian>()?;
    let total_vectors = cursor.read_i64::<LittleEndian>()?;
    let _reserved = (
        cursor.read_i64::<LittleEndian>()?,
        cursor.read_i64::<LittleEndian>()?,
    );
    let is_trained = cursor.read_u8()? != 0;
    let metric_type = cursor.read_i32::<LittleEndian>()?;
    if dimension <= 0 || total_vectors < 0 {
        return Err(Error::corrupt(format!(
            "invalid header: dim {}, ntotal {}",
            dimension, total_vectors
        )));
    }

    let metric_arg = if metric_type > 1 {
        let arg = handle
            .read_bytes_range(FIXED_HEADER_SIZE..FIXED_HEADER_SIZE + 4)
            .await?;
        Some(LittleEndian::read_f32(&arg))
    } else {
        None
    };

    Ok(FlatVectorHeader {
        dimension: dimension as usize,
        total_vectors: total_vectors as u64,
        is_trained,
        metric_type,
        metric_arg,
    })
}

fn decode_doc_ids(bytes: &[u8]) -> Result<Vec<DocId>> {
    let mut ids = Vec::with_capacity(bytes.len() / 8);
    for chunk in bytes.chunks_exact(8) {
        let raw = LittleEndian::read_i64(chunk);
        if raw < 0 || raw >= TERMINATED as i64 {
            return Err(Error::corrupt(format!("doc id {} out of range", raw)));
        }
        let doc = raw as DocId;
        if ids.last().is_some_and(|&last| doc <= last) {
            return Err(Error::corrupt(format!(
                "doc ids not strictly increasing at {}",
                doc
            )));
        }
        ids.push(doc);
    }
    Ok(ids)
}
