use std::io::Write;
use std::path::Path;

use byteorder::{LittleEndian, WriteBytesExt};

use super::{FLAT_FOURCC, FlatVectorHeader};
use crate::codec::ChecksumWriter;
use crate::directories::DirectoryWriter;
use crate::segment::VectorValues;
use crate::structures::TERMINATED;
use crate::{DocId, Error, Result};

/// Streams one flat vector file: header and index block up front, then the
/// vectors and ids from a single pass over the field's vector values.
pub struct FlatVectorFileWriter {
    out: ChecksumWriter,
    header: FlatVectorHeader,
}

impl FlatVectorFileWriter {
    pub async fn create<D: DirectoryWriter + ?Sized>(
        dir: &D,
        path: &Path,
        header: FlatVectorHeader,
        index_block: &[u8],
    ) -> Result<Self> {
        if header.dimension == 0 || header.dimension > i32::MAX as usize {
            return Err(Error::InvalidVector(format!(
                "unsupported dimension {}",
                header.dimension
            )));
        }
        let mut out = ChecksumWriter::new(dir.create_new(path).await?);

        out.write_u32::<LittleEndian>(FLAT_FOURCC)?;
        out.write_i32::<LittleEndian>(header.dimension as i32)?;
        out.write_i64::<LittleEndian>(header.total_vectors as i64)?;
        // reserved
        out.write_i64::<LittleEndian>(0)?;
        out.write_i64::<LittleEndian>(0)?;
        out.write_u8(header.is_trained as u8)?;
        out.write_i32::<LittleEndian>(header.metric_type)?;
        if header.metric_type > 1 {
            out.write_f32::<LittleEndian>(header.metric_arg.unwrap_or(0.0))?;
        }
        out.write_all(index_block)?;

        Ok(Self { out, header })
    }

    /// Drain `values` into the vector and id sections and write the footer.
    ///
    /// Fails unless `values` yields exactly `total_vectors` vectors of the
    /// header's dimension with strictly increasing doc ids. Returns the file
    /// length.
    pub fn write_vectors(mut self, values: &mut dyn VectorValues) -> Result<u64> {
        let dim = self.header.dimension;
        let expected = self.header.total_vectors;
        let mut ids: Vec<DocId> = Vec::with_capacity(expected as usize);

        self.out
            .write_i64::<LittleEndian>((4 * dim as u64 * expected) as i64)?;
        while let Some((doc, vector)) = values.next_vector()? {
            if vector.len() != dim {
                return Err(Error::InvalidVector(format!(
                    "doc {}: dimension {} != {}",
                    doc,
                    vector.len(),
                    dim
                )));
            }
            if doc == TERMINATED || ids.last().is_some_and(|&last| doc <= last) {
                return Err(Error::InvalidVector(format!(
                    "doc ids must be strictly increasing (got {} after {:?})",
                    doc,
                    ids.last()
                )));
            }
            if ids.len() as u64 == expected {
                return Err(Error::Internal(format!(
                    "more than the declared {} vectors",
                    expected
                )));
            }
            for &v in vector {
                self.out.write_f32::<LittleEndian>(v)?;
            }
            ids.push(doc);
        }
        if ids.len() as u64 != expected {
            return Err(Error::Internal(format!(
                "declared {} vectors but wrote {}",
                expected,
                ids.len()
            )));
        }

        self.out.write_i64::<LittleEndian>(expected as i64)?;
        for &doc in &ids {
            self.out.write_i64::<LittleEndian>(doc as i64)?;
        }
        Ok(self.out.write_footer()?)
    }
}
