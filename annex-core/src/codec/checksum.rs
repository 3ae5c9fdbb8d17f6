use std::io::{self, BufWriter, Write};

use byteorder::{BigEndian, WriteBytesExt};

use super::{CHECKSUM_ALGORITHM, FOOTER_MAGIC};
use crate::directories::StreamingWriter;

/// Output buffered before it reaches the directory writer
const WRITE_BUFFER_SIZE: usize = 1024 * 1024; // 1MB

/// Wraps a StreamingWriter to track the write offset and a running CRC-32.
///
/// Segment writers need the offset to record where each record starts, and
/// the footer needs the checksum of everything written before it.
pub struct ChecksumWriter {
    inner: BufWriter<Box<dyn StreamingWriter>>,
    hasher: crc32fast::Hasher,
    offset: u64,
}

impl ChecksumWriter {
    pub fn new(inner: Box<dyn StreamingWriter>) -> Self {
        Self {
            inner: BufWriter::with_capacity(WRITE_BUFFER_SIZE, inner),
            hasher: crc32fast::Hasher::new(),
            offset: 0,
        }
    }

    /// Current write position (total bytes written so far).
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// CRC-32 of everything written so far.
    pub fn checksum(&self) -> u32 {
        self.hasher.clone().finalize()
    }

    /// Append the footer and finalize the underlying writer.
    ///
    /// Consumes the writer, so nothing can be written after the footer.
    /// Returns the final file length.
    pub fn write_footer(mut self) -> io::Result<u64> {
        self.write_u32::<BigEndian>(FOOTER_MAGIC)?;
        self.write_u32::<BigEndian>(CHECKSUM_ALGORITHM)?;
        let checksum = self.checksum() as u64;
        self.write_u64::<BigEndian>(checksum)?;
        let len = self.offset;
        let inner = self.inner.into_inner().map_err(|e| e.into_error())?;
        inner.finish()?;
        Ok(len)
    }
}

impl Write for ChecksumWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.hasher.update(&buf[..n]);
        self.offset += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{FOOTER_SIZE, verify_checksum};
    use byteorder::LittleEndian;
    use parking_lot::Mutex;
    use std::sync::Arc;

    /// Records each write the directory sees
    struct CountingWriter {
        calls: Arc<Mutex<usize>>,
        data: Arc<Mutex<Vec<u8>>>,
    }

    impl Write for CountingWriter {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            *self.calls.lock() += 1;
            self.data.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl StreamingWriter for CountingWriter {
        fn finish(self: Box<Self>) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_small_writes_are_batched() {
        let calls = Arc::new(Mutex::new(0));
        let data = Arc::new(Mutex::new(Vec::new()));
        let mut w = ChecksumWriter::new(Box::new(CountingWriter {
            calls: Arc::clone(&calls),
            data: Arc::clone(&data),
        }));

        // 1000 x 128 floats, one call per value
        for i in 0..128_000u32 {
            w.write_f32::<LittleEndian>(i as f32).unwrap();
        }
        let len = w.write_footer().unwrap();

        assert_eq!(len, 128_000 * 4 + FOOTER_SIZE);
        assert!(*calls.lock() <= 4, "{} inner writes", *calls.lock());

        let bytes = data.lock().clone();
        assert_eq!(bytes.len() as u64, len);
        verify_checksum(&bytes).unwrap();
    }
}
