//! Shared binary codec primitives for segment files.
//!
//! Every file annex writes ends in the same 16-byte footer:
//! ```text
//! [footer_magic: u32 BE][algorithm_id: u32 BE = 0][checksum: u64 BE]
//! ```
//! The checksum is CRC-32 over every byte before it (footer magic and
//! algorithm id included) stored in the low 32 bits of the u64. Files that
//! carry a codec identity additionally start with an index header:
//! ```text
//! [codec_magic: u32 BE][name: vlong len + utf8][version: i32 BE]
//! [segment_id: 16 bytes][suffix_len: u8][suffix: utf8]
//! ```
//! Header and footer are big-endian; file bodies are little-endian.

mod checksum;

pub use checksum::ChecksumWriter;

use std::io::{self, Cursor, Read, Write};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use crate::{Error, Result};

/// Magic number opening an index header
pub const CODEC_MAGIC: u32 = 0x3fd7_6c17;

/// Magic number opening a footer (bitwise NOT of the header magic)
pub const FOOTER_MAGIC: u32 = !CODEC_MAGIC;

/// Footer size: magic(4) + algorithm_id(4) + checksum(8)
pub const FOOTER_SIZE: u64 = 16;

/// Only CRC-32 is defined
pub const CHECKSUM_ALGORITHM: u32 = 0;

pub const SEGMENT_ID_LEN: usize = 16;

/// Longest codec name accepted in a header
const MAX_CODEC_NAME_LEN: usize = 127;

/// Write a variable-length unsigned integer (7 bits per byte, high bit continues)
pub fn write_vlong<W: Write + ?Sized>(writer: &mut W, mut value: u64) -> io::Result<()> {
    loop {
        let byte = (value & 0x7F) as u8;
        value >>= 7;
        if value == 0 {
            writer.write_u8(byte)?;
            return Ok(());
        }
        writer.write_u8(byte | 0x80)?;
    }
}

/// Read a variable-length unsigned integer written by [`write_vlong`]
pub fn read_vlong<R: Read + ?Sized>(reader: &mut R) -> io::Result<u64> {
    let mut result = 0u64;
    let mut shift = 0;

    loop {
        let byte = reader.read_u8()?;
        result |= ((byte & 0x7F) as u64) << shift;
        if byte & 0x80 == 0 {
            return Ok(result);
        }
        shift += 7;
        if shift >= 64 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "vlong too long",
            ));
        }
    }
}

/// Encoded size of `value` as a vlong
pub fn vlong_len(value: u64) -> usize {
    let bits = 64 - value.leading_zeros() as usize;
    bits.max(1).div_ceil(7)
}

/// Identity carried by an index header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexHeader {
    pub codec: String,
    pub version: i32,
    pub segment_id: [u8; SEGMENT_ID_LEN],
    pub suffix: String,
}

impl IndexHeader {
    pub fn new(
        codec: impl Into<String>,
        version: i32,
        segment_id: [u8; SEGMENT_ID_LEN],
        suffix: impl Into<String>,
    ) -> Self {
        Self {
            codec: codec.into(),
            version,
            segment_id,
            suffix: suffix.into(),
        }
    }

    /// Encoded length in bytes
    pub fn encoded_len(&self) -> usize {
        4 + vlong_len(self.codec.len() as u64)
            + self.codec.len()
            + 4
            + SEGMENT_ID_LEN
            + 1
            + self.suffix.len()
    }

    pub fn write<W: Write + ?Sized>(&self, writer: &mut W) -> Result<()> {
        if self.codec.len() > MAX_CODEC_NAME_LEN || !self.codec.is_ascii() {
            return Err(Error::Internal(format!(
                "invalid codec name '{}'",
                self.codec
            )));
        }
        if self.suffix.len() > u8::MAX as usize {
            return Err(Error::Internal(format!(
                "segment suffix too long ({} bytes)",
                self.suffix.len()
            )));
        }
        writer.write_u32::<BigEndian>(CODEC_MAGIC)?;
        write_vlong(writer, self.codec.len() as u64)?;
        writer.write_all(self.codec.as_bytes())?;
        writer.write_i32::<BigEndian>(self.version)?;
        writer.write_all(&self.segment_id)?;
        writer.write_u8(self.suffix.len() as u8)?;
        writer.write_all(self.suffix.as_bytes())?;
        Ok(())
    }

    /// Parse a header from the start of `data`
    pub fn read(data: &[u8]) -> Result<Self> {
        let mut cursor = Cursor::new(data);
        let magic = cursor.read_u32::<BigEndian>()?;
        if magic != CODEC_MAGIC {
            return Err(Error::corrupt(format!(
                "codec header mismatch: expected {:#x}, got {:#x}",
                CODEC_MAGIC, magic
            )));
        }
        let name_len = read_vlong(&mut cursor)? as usize;
        if name_len > MAX_CODEC_NAME_LEN {
            return Err(Error::corrupt(format!("codec name too long: {}", name_len)));
        }
        let mut name = vec![0u8; name_len];
        cursor.read_exact(&mut name)?;
        let version = cursor.read_i32::<BigEndian>()?;
        let mut segment_id = [0u8; SEGMENT_ID_LEN];
        cursor.read_exact(&mut segment_id)?;
        let suffix_len = cursor.read_u8()? as usize;
        let mut suffix = vec![0u8; suffix_len];
        cursor.read_exact(&mut suffix)?;

        let codec = String::from_utf8(name)
            .map_err(|_| Error::corrupt("codec name is not utf-8"))?;
        let suffix = String::from_utf8(suffix)
            .map_err(|_| Error::corrupt("segment suffix is not utf-8"))?;
        Ok(Self {
            codec,
            version,
            segment_id,
            suffix,
        })
    }

    /// Parse and validate a header against the expected identity.
    ///
    /// `expected.version` is the newest version this reader understands;
    /// anything in `min_version..=expected.version` is accepted.
    pub fn check(data: &[u8], expected: &IndexHeader, min_version: i32) -> Result<Self> {
        let header = Self::read(data)?;
        if header.codec != expected.codec {
            return Err(Error::corrupt(format!(
                "codec mismatch: expected '{}', got '{}'",
                expected.codec, header.codec
            )));
        }
        if header.version < min_version || header.version > expected.version {
            return Err(Error::corrupt(format!(
                "unsupported format version {} (supported {}..={})",
                header.version, min_version, expected.version
            )));
        }
        if header.segment_id != expected.segment_id {
            return Err(Error::corrupt("segment id mismatch"));
        }
        if header.suffix != expected.suffix {
            return Err(Error::corrupt(format!(
                "segment suffix mismatch: expected '{}', got '{}'",
                expected.suffix, header.suffix
            )));
        }
        Ok(header)
    }
}

/// Structurally validate a footer and return the stored checksum.
///
/// Does not recompute the hash; see [`verify_checksum`] for that.
pub fn retrieve_checksum(footer: &[u8]) -> Result<u32> {
    if footer.len() as u64 != FOOTER_SIZE {
        return Err(Error::corrupt(format!(
            "footer must be {} bytes, got {}",
            FOOTER_SIZE,
            footer.len()
        )));
    }
    let mut cursor = Cursor::new(footer);
    let magic = cursor.read_u32::<BigEndian>()?;
    if magic != FOOTER_MAGIC {
        return Err(Error::corrupt(format!(
            "footer mismatch: expected {:#x}, got {:#x}",
            FOOTER_MAGIC, magic
        )));
    }
    let algorithm = cursor.read_u32::<BigEndian>()?;
    if algorithm != CHECKSUM_ALGORITHM {
        return Err(Error::corrupt(format!(
            "unknown checksum algorithm {}",
            algorithm
        )));
    }
    let checksum = cursor.read_u64::<BigEndian>()?;
    if checksum >> 32 != 0 {
        return Err(Error::corrupt(format!(
            "illegal checksum value {:#x}",
            checksum
        )));
    }
    Ok(checksum as u32)
}

/// Footer view of a whole file: validates it structurally
pub fn retrieve_file_checksum(file: &[u8]) -> Result<u32> {
    let len = file.len() as u64;
    if len < FOOTER_SIZE {
        return Err(Error::corrupt(format!(
            "file too short for footer: {} bytes",
            len
        )));
    }
    retrieve_checksum(&file[(len - FOOTER_SIZE) as usize..])
}

/// Recompute CRC-32 over a whole file and compare with its footer
pub fn verify_checksum(file: &[u8]) -> Result<()> {
    let expected = retrieve_file_checksum(file)?;
    let actual = crc32fast::hash(&file[..file.len() - 8]);
    if actual != expected {
        return Err(Error::corrupt(format!(
            "checksum failed: expected {:#010x}, actual {:#010x}",
            expected, actual
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directories::{DirectoryWriter, RamDirectory};
    use crate::directories::Directory;
    use std::path::Path;

    #[test]
    fn test_vlong() {
        for value in [0u64, 1, 127, 128, 300, 16_383, 16_384, u32::MAX as u64, u64::MAX] {
            let mut buf = Vec::new();
            write_vlong(&mut buf, value).unwrap();
            assert_eq!(buf.len(), vlong_len(value), "len of {}", value);
            assert_eq!(read_vlong(&mut Cursor::new(&buf)).unwrap(), value);
        }
        assert_eq!(vlong_len(u64::MAX), 10);

        let overlong = [0xFFu8; 11];
        assert!(read_vlong(&mut Cursor::new(&overlong[..])).is_err());
    }

    #[test]
    fn test_index_header_check() {
        let header = IndexHeader::new("TestCodec", 2, [7u8; SEGMENT_ID_LEN], "knn");
        let mut buf = Vec::new();
        header.write(&mut buf).unwrap();
        assert_eq!(buf.len(), header.encoded_len());

        let parsed = IndexHeader::check(&buf, &header, 0).unwrap();
        assert_eq!(parsed, header);

        let newer = IndexHeader::new("TestCodec", 1, [7u8; SEGMENT_ID_LEN], "knn");
        assert!(matches!(
            IndexHeader::check(&buf, &newer, 0),
            Err(Error::CorruptSegment(_))
        ));

        let other_segment = IndexHeader::new("TestCodec", 2, [8u8; SEGMENT_ID_LEN], "knn");
        assert!(IndexHeader::check(&buf, &other_segment, 0).is_err());

        let other_suffix = IndexHeader::new("TestCodec", 2, [7u8; SEGMENT_ID_LEN], "");
        assert!(IndexHeader::check(&buf, &other_suffix, 0).is_err());

        buf[0] ^= 0xFF;
        assert!(matches!(
            IndexHeader::read(&buf),
            Err(Error::CorruptSegment(_))
        ));
    }

    #[tokio::test]
    async fn test_footer_and_checksum() {
        let dir = RamDirectory::new();
        let path = Path::new("footer.bin");

        let mut writer = ChecksumWriter::new(dir.create_new(path).await.unwrap());
        writer.write_all(b"some payload").unwrap();
        assert_eq!(writer.offset(), 12);
        let total = writer.write_footer().unwrap();
        assert_eq!(total, 12 + FOOTER_SIZE);

        let data = dir.open_read(path).await.unwrap().bytes().to_vec();
        assert_eq!(data.len() as u64, total);
        let stored = retrieve_file_checksum(&data).unwrap();
        assert_eq!(stored, crc32fast::hash(&data[..data.len() - 8]));
        verify_checksum(&data).unwrap();

        // Flipping a payload byte keeps the footer structurally valid but
        // fails full verification.
        let mut flipped = data.clone();
        flipped[3] ^= 0x01;
        assert!(retrieve_file_checksum(&flipped).is_ok());
        assert!(matches!(
            verify_checksum(&flipped),
            Err(Error::CorruptSegment(_))
        ));

        // Truncation breaks the footer structure.
        assert!(retrieve_file_checksum(&data[..data.len() - 1]).is_err());
        assert!(retrieve_file_checksum(&data[..10]).is_err());
    }

    #[test]
    fn test_illegal_checksum_high_bits() {
        let mut footer = Vec::new();
        footer.write_u32::<BigEndian>(FOOTER_MAGIC).unwrap();
        footer.write_u32::<BigEndian>(0).unwrap();
        footer.write_u64::<BigEndian>(1u64 << 40).unwrap();
        assert!(retrieve_checksum(&footer).is_err());
    }
}
