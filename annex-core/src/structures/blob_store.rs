//! Append-only blob store with a trailing index and checksummed footer.
//!
//! Layout:
//! ```text
//! [index header]
//! [blob_1][blob_2]...[blob_n]
//! [record_count: i32]
//!   repeat record_count: [key: i32][length: i32][offset: vlong]
//! [index_offset: i64]        // points at record_count
//! [-1: i32]                  // terminator
//! [footer: 16 bytes]
//! ```
//! Body integers are little-endian, header and footer are big-endian (see
//! [`crate::codec`]). The index is written in append order. A file without
//! a valid footer is never partially trusted.

use std::io::{Cursor, Write};
use std::path::Path;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::codec::{self, ChecksumWriter, FOOTER_SIZE, IndexHeader};
use crate::directories::{AsyncFileRead, DirectoryWriter, LazyFileHandle, OwnedBytes};
use crate::{Error, Result};

/// Sentinel written after the index offset
pub const INDEX_TERMINATOR: i32 = -1;

/// index_offset(8) + terminator(4)
const TRAILER_SIZE: u64 = 12;

/// Location of one blob inside the store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlobRecord {
    pub key: i32,
    pub length: u32,
    pub offset: u64,
}

/// Writes one blob store file. Not reusable: after [`BlobStoreWriter::finish`]
/// every call fails with `ProtocolViolation`.
pub struct BlobStoreWriter {
    out: Option<ChecksumWriter>,
    records: Vec<BlobRecord>,
    path: String,
}

impl BlobStoreWriter {
    /// Create the file and write its header. Fails if the file exists.
    pub async fn create<D: DirectoryWriter + ?Sized>(
        dir: &D,
        path: &Path,
        header: &IndexHeader,
    ) -> Result<Self> {
        let mut out = ChecksumWriter::new(dir.create_new(path).await?);
        header.write(&mut out)?;
        Ok(Self {
            out: Some(out),
            records: Vec::new(),
            path: path.display().to_string(),
        })
    }

    fn out(&mut self, op: &str) -> Result<&mut ChecksumWriter> {
        match self.out.as_mut() {
            Some(out) => Ok(out),
            None => Err(Error::ProtocolViolation(format!(
                "{} on finished blob store {}",
                op, self.path
            ))),
        }
    }

    /// Append a payload at the current end of file; returns its offset.
    pub fn append_record(&mut self, key: i32, payload: &[u8]) -> Result<u64> {
        if payload.is_empty() {
            return Err(Error::Internal(format!(
                "empty payload for key {} cannot be looked up",
                key
            )));
        }
        let length = i32::try_from(payload.len()).map_err(|_| {
            Error::Internal(format!("payload of {} bytes is too large", payload.len()))
        })?;
        let out = self.out("append_record")?;
        let offset = out.offset();
        out.write_all(payload)?;
        self.records.push(BlobRecord {
            key,
            length: length as u32,
            offset,
        });
        Ok(offset)
    }

    /// Write the index section, trailer and footer, then close the file.
    ///
    /// Returns the final file length.
    pub fn finish(&mut self) -> Result<u64> {
        let mut out = self
            .out
            .take()
            .ok_or_else(|| Error::ProtocolViolation(format!("{} finished twice", self.path)))?;

        let index_offset = out.offset();
        out.write_i32::<LittleEndian>(self.records.len() as i32)?;
        for record in &self.records {
            out.write_i32::<LittleEndian>(record.key)?;
            out.write_i32::<LittleEndian>(record.length as i32)?;
            codec::write_vlong(&mut out, record.offset)?;
        }
        out.write_i64::<LittleEndian>(index_offset as i64)?;
        out.write_i32::<LittleEndian>(INDEX_TERMINATOR)?;
        Ok(out.write_footer()?)
    }

    pub fn is_finished(&self) -> bool {
        self.out.is_none()
    }

    /// Records appended so far, in append order
    pub fn records(&self) -> &[BlobRecord] {
        &self.records
    }
}

/// Read side of a blob store.
///
/// Opening validates the header and the footer structure (the checksum
/// itself is only recomputed by [`BlobStoreReader::verify`]) and locates the
/// index section.
#[derive(Debug, Clone)]
pub struct BlobStoreReader {
    handle: LazyFileHandle,
    data_start: u64,
    index_offset: u64,
    index_end: u64,
}

impl BlobStoreReader {
    pub async fn open(handle: LazyFileHandle, expected: &IndexHeader, min_version: i32) -> Result<Self> {
        let len = handle.len();
        let header_len = expected.encoded_len() as u64;
        let min_len = header_len + 4 + TRAILER_SIZE + FOOTER_SIZE;
        if len < min_len {
            return Err(Error::corrupt(format!(
                "blob store too short: {} bytes (minimum {})",
                len, min_len
            )));
        }

        let header = handle.read_bytes_range(0..header_len).await?;
        IndexHeader::check(&header, expected, min_version)?;

        let index_end = len - FOOTER_SIZE - TRAILER_SIZE;
        let tail = handle.read_bytes_range(index_end..len).await?;
        codec::retrieve_checksum(&tail[TRAILER_SIZE as usize..])?;

        let mut cursor = Cursor::new(&tail[..TRAILER_SIZE as usize]);
        let index_offset = cursor.read_i64::<LittleEndian>()?;
        let terminator = cursor.read_i32::<LittleEndian>()?;
        if terminator != INDEX_TERMINATOR {
            return Err(Error::corrupt(format!(
                "missing index terminator (got {})",
                terminator
            )));
        }
        if index_offset < header_len as i64 || index_offset as u64 + 4 > index_end {
            return Err(Error::corrupt(format!(
                "index offset {} outside [{}, {})",
                index_offset, header_len, index_end
            )));
        }

        Ok(Self {
            handle,
            data_start: header_len,
            index_offset: index_offset as u64,
            index_end,
        })
    }

    /// Parse the index section, in append order
    pub async fn records(&self) -> Result<Vec<BlobRecord>> {
        let bytes = self
            .handle
            .read_bytes_range(self.index_offset..self.index_end)
            .await?;
        let mut cursor = Cursor::new(bytes.as_slice());
        let count = cursor.read_i32::<LittleEndian>()?;
        // Each entry takes at least 9 bytes (key + length + 1-byte vlong).
        if count < 0 || count as u64 * 9 > bytes.len() as u64 - 4 {
            return Err(Error::corrupt(format!("bad record count {}", count)));
        }

        let mut records = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let key = cursor.read_i32::<LittleEndian>()?;
            let length = cursor.read_i32::<LittleEndian>()?;
            let offset = codec::read_vlong(&mut cursor)?;
            if length < 0
                || offset < self.data_start
                || offset.saturating_add(length as u64) > self.index_offset
            {
                return Err(Error::corrupt(format!(
                    "record for key {} out of bounds (offset {}, length {})",
                    key, offset, length
                )));
            }
            records.push(BlobRecord {
                key,
                length: length as u32,
                offset,
            });
        }
        if cursor.position() != bytes.len() as u64 {
            return Err(Error::corrupt(format!(
                "{} trailing bytes after index section",
                bytes.len() as u64 - cursor.position()
            )));
        }
        Ok(records)
    }

    async fn read_record(&self, record: &BlobRecord) -> Result<OwnedBytes> {
        Ok(self
            .handle
            .read_bytes_range(record.offset..record.offset + record.length as u64)
            .await?)
    }

    /// Every blob with its key, in append order
    pub async fn read_all(&self) -> Result<Vec<(i32, OwnedBytes)>> {
        let mut blobs = Vec::new();
        for record in self.records().await? {
            blobs.push((record.key, self.read_record(&record).await?));
        }
        Ok(blobs)
    }

    /// The first blob stored under `key`, if any
    pub async fn read_one(&self, key: i32) -> Result<Option<OwnedBytes>> {
        let found = self
            .records()
            .await?
            .into_iter()
            .find(|r| r.key == key && r.length > 0);
        match found {
            Some(record) => Ok(Some(self.read_record(&record).await?)),
            None => Ok(None),
        }
    }

    /// Recompute the footer checksum over the whole file
    pub async fn verify(&self) -> Result<()> {
        let data = self.handle.read_bytes().await?;
        codec::verify_checksum(&data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directories::{Directory, RamDirectory};
    use std::path::PathBuf;

    fn header() -> IndexHeader {
        IndexHeader::new("BlobTest", 0, [1u8; 16], "")
    }

    async fn write_store(dir: &RamDirectory, path: &Path, records: &[(i32, Vec<u8>)]) -> u64 {
        let mut writer = BlobStoreWriter::create(dir, path, &header()).await.unwrap();
        for (key, payload) in records {
            writer.append_record(*key, payload).unwrap();
        }
        writer.finish().unwrap()
    }

    async fn open(dir: &RamDirectory, path: &Path) -> Result<BlobStoreReader> {
        BlobStoreReader::open(dir.open_lazy(path).await?, &header(), 0).await
    }

    #[tokio::test]
    async fn test_roundtrip_independent_of_append_order() {
        let dir = RamDirectory::new();
        let a = vec![(1, vec![1u8; 10]), (7, vec![7u8; 3]), (3, vec![3u8; 40])];
        let mut b = a.clone();
        b.reverse();

        write_store(&dir, Path::new("a.blob"), &a).await;
        write_store(&dir, Path::new("b.blob"), &b).await;

        let mut from_a = open(&dir, Path::new("a.blob")).await.unwrap().read_all().await.unwrap();
        let mut from_b = open(&dir, Path::new("b.blob")).await.unwrap().read_all().await.unwrap();
        // Index preserves append order
        assert_eq!(from_b.iter().map(|(k, _)| *k).collect::<Vec<_>>(), vec![3, 7, 1]);

        from_a.sort_by_key(|(k, _)| *k);
        from_b.sort_by_key(|(k, _)| *k);
        let as_vecs = |v: Vec<(i32, OwnedBytes)>| -> Vec<(i32, Vec<u8>)> {
            v.into_iter().map(|(k, b)| (k, b.to_vec())).collect()
        };
        let a_sorted = as_vecs(from_a);
        assert_eq!(a_sorted, as_vecs(from_b));
        assert_eq!(a_sorted[1], (3, vec![3u8; 40]));
    }

    #[tokio::test]
    async fn test_offsets_and_index_layout() {
        let dir = RamDirectory::new();
        let path = Path::new("layout.blob");
        let mut writer = BlobStoreWriter::create(&dir, path, &header()).await.unwrap();
        let first = writer.append_record(5, b"hello").unwrap();
        let second = writer.append_record(6, b"world!").unwrap();
        assert_eq!(first, header().encoded_len() as u64);
        assert_eq!(second, first + 5);
        let len = writer.finish().unwrap();

        let data = dir.open_read(path).await.unwrap().bytes().to_vec();
        assert_eq!(data.len() as u64, len);

        let trailer = (len - FOOTER_SIZE - TRAILER_SIZE) as usize;
        let mut cursor = Cursor::new(&data[trailer..]);
        let index_offset = cursor.read_i64::<LittleEndian>().unwrap() as usize;
        assert_eq!(cursor.read_i32::<LittleEndian>().unwrap(), -1);
        assert_eq!(index_offset as u64, second + 6);

        let mut cursor = Cursor::new(&data[index_offset..]);
        assert_eq!(cursor.read_i32::<LittleEndian>().unwrap(), 2);
        assert_eq!(cursor.read_i32::<LittleEndian>().unwrap(), 5);
        assert_eq!(cursor.read_i32::<LittleEndian>().unwrap(), 5);
        assert_eq!(codec::read_vlong(&mut cursor).unwrap(), first);

        let reader = open(&dir, path).await.unwrap();
        reader.verify().await.unwrap();
        assert_eq!(reader.read_one(6).await.unwrap().unwrap().as_slice(), b"world!");
        assert!(reader.read_one(42).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_finish_twice_and_append_after_finish() {
        let dir = RamDirectory::new();
        let mut writer = BlobStoreWriter::create(&dir, Path::new("x.blob"), &header())
            .await
            .unwrap();
        writer.append_record(1, b"abc").unwrap();
        writer.finish().unwrap();
        assert!(writer.is_finished());

        assert!(matches!(writer.finish(), Err(Error::ProtocolViolation(_))));
        assert!(matches!(
            writer.append_record(2, b"def"),
            Err(Error::ProtocolViolation(_))
        ));
    }

    #[tokio::test]
    async fn test_create_fails_if_exists() {
        let dir = RamDirectory::new();
        let path = Path::new("dup.blob");
        write_store(&dir, path, &[(1, vec![1])]).await;
        let err = BlobStoreWriter::create(&dir, path, &header()).await.err().unwrap();
        assert!(matches!(err, Error::Io(e) if e.kind() == std::io::ErrorKind::AlreadyExists));
    }

    #[tokio::test]
    async fn test_empty_store() {
        let dir = RamDirectory::new();
        write_store(&dir, Path::new("empty.blob"), &[]).await;
        let reader = open(&dir, Path::new("empty.blob")).await.unwrap();
        assert!(reader.read_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_truncation_is_never_partial() {
        let dir = RamDirectory::new();
        let path = Path::new("full.blob");
        let records: Vec<(i32, Vec<u8>)> =
            (0..4).map(|k| (k, vec![k as u8 + 1; 17 * (k as usize + 1)])).collect();
        let len = write_store(&dir, path, &records).await;
        let data = dir.open_read(path).await.unwrap().bytes().to_vec();

        for cut in 0..len as usize {
            let truncated = PathBuf::from(format!("cut_{}.blob", cut));
            dir.write(&truncated, &data[..cut]).await.unwrap();
            let result = match open(&dir, &truncated).await {
                Ok(reader) => reader.read_all().await,
                Err(e) => Err(e),
            };
            assert!(result.is_err(), "cut at {} was readable", cut);
        }
    }

    #[tokio::test]
    async fn test_wrong_codec_rejected() {
        let dir = RamDirectory::new();
        let path = Path::new("codec.blob");
        write_store(&dir, path, &[(1, vec![9; 4])]).await;
        let other = IndexHeader::new("BlobTesX", 0, [1u8; 16], "");
        let handle = dir.open_lazy(path).await.unwrap();
        assert!(matches!(
            BlobStoreReader::open(handle, &other, 0).await,
            Err(Error::CorruptSegment(_))
        ));
    }
}
