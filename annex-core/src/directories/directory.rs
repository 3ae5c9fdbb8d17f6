//! Async Directory abstraction for segment files
//!
//! Readers see a segment file as a [`LazyFileHandle`] and fetch byte ranges
//! on demand; writers stream a file out once through a [`StreamingWriter`].

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::io;
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::sync::Arc;

type Backing = Arc<dyn AsRef<[u8]> + Send + Sync>;

/// Owned bytes with cheap cloning (Arc-backed)
///
/// The backing store is either a heap buffer or a memory map; slicing never
/// copies.
#[derive(Clone)]
pub struct OwnedBytes {
    data: Backing,
    range: Range<usize>,
}

impl std::fmt::Debug for OwnedBytes {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OwnedBytes")
            .field("range", &self.range)
            .finish()
    }
}

impl OwnedBytes {
    pub fn new(data: Vec<u8>) -> Self {
        let len = data.len();
        Self {
            data: Arc::new(data),
            range: 0..len,
        }
    }

    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    pub(crate) fn from_shared(data: Backing, range: Range<usize>) -> Self {
        Self { data, range }
    }

    pub fn len(&self) -> usize {
        self.range.len()
    }

    pub fn is_empty(&self) -> bool {
        self.range.is_empty()
    }

    pub fn slice(&self, range: Range<usize>) -> Self {
        let start = self.range.start + range.start;
        let end = self.range.start + range.end;
        Self {
            data: Arc::clone(&self.data),
            range: start..end,
        }
    }

    pub fn as_slice(&self) -> &[u8] {
        &(*self.data).as_ref()[self.range.clone()]
    }

    pub fn to_vec(&self) -> Vec<u8> {
        self.as_slice().to_vec()
    }
}

impl AsRef<[u8]> for OwnedBytes {
    fn as_ref(&self) -> &[u8] {
        self.as_slice()
    }
}

impl std::ops::Deref for OwnedBytes {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        self.as_slice()
    }
}

fn out_of_bounds(range: &Range<u64>, len: u64) -> io::Error {
    io::Error::new(
        io::ErrorKind::UnexpectedEof,
        format!("Range {:?} out of bounds (len: {})", range, len),
    )
}

/// Trait for async range reading over a file or a view into one
#[async_trait]
pub trait AsyncFileRead: Send + Sync {
    fn len(&self) -> u64;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Read a specific byte range
    async fn read_bytes_range(&self, range: Range<u64>) -> io::Result<OwnedBytes>;

    /// Read all bytes
    async fn read_bytes(&self) -> io::Result<OwnedBytes> {
        self.read_bytes_range(0..self.len()).await
    }
}

/// A fully materialized file
#[derive(Debug, Clone)]
pub struct FileSlice {
    data: OwnedBytes,
}

impl FileSlice {
    pub fn new(data: OwnedBytes) -> Self {
        Self { data }
    }

    pub fn bytes(&self) -> &OwnedBytes {
        &self.data
    }
}

#[async_trait]
impl AsyncFileRead for FileSlice {
    fn len(&self) -> u64 {
        self.data.len() as u64
    }

    async fn read_bytes_range(&self, range: Range<u64>) -> io::Result<OwnedBytes> {
        if range.start > range.end || range.end > self.len() {
            return Err(out_of_bounds(&range, self.len()));
        }
        Ok(self.data.slice(range.start as usize..range.end as usize))
    }
}

/// Callback type for lazy range reading
pub type RangeReadFn = Arc<
    dyn Fn(
            Range<u64>,
        )
            -> std::pin::Pin<Box<dyn std::future::Future<Output = io::Result<OwnedBytes>> + Send>>
        + Send
        + Sync,
>;

/// Lazy file handle that fetches ranges on demand
///
/// Cloning is cheap; every clone reads independently.
#[derive(Clone)]
pub struct LazyFileHandle {
    file_size: u64,
    read_fn: RangeReadFn,
}

impl std::fmt::Debug for LazyFileHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LazyFileHandle")
            .field("file_size", &self.file_size)
            .finish()
    }
}

impl LazyFileHandle {
    pub fn new(file_size: u64, read_fn: RangeReadFn) -> Self {
        Self { file_size, read_fn }
    }

    /// Wrap bytes that are already in memory
    pub fn from_bytes(bytes: OwnedBytes) -> Self {
        let file_size = bytes.len() as u64;
        let read_fn: RangeReadFn = Arc::new(move |range: Range<u64>| {
            let bytes = bytes.clone();
            Box::pin(async move { Ok(bytes.slice(range.start as usize..range.end as usize)) })
        });
        Self { file_size, read_fn }
    }

    /// Create a sub-slice view (still lazy)
    pub fn slice(&self, range: Range<u64>) -> LazyFileSlice {
        LazyFileSlice {
            handle: self.clone(),
            offset: range.start,
            len: range.end.saturating_sub(range.start),
        }
    }
}

#[async_trait]
impl AsyncFileRead for LazyFileHandle {
    fn len(&self) -> u64 {
        self.file_size
    }

    async fn read_bytes_range(&self, range: Range<u64>) -> io::Result<OwnedBytes> {
        if range.start > range.end || range.end > self.file_size {
            return Err(out_of_bounds(&range, self.file_size));
        }
        (self.read_fn)(range).await
    }
}

/// A slice view into a LazyFileHandle
#[derive(Clone)]
pub struct LazyFileSlice {
    handle: LazyFileHandle,
    offset: u64,
    len: u64,
}

impl std::fmt::Debug for LazyFileSlice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LazyFileSlice")
            .field("offset", &self.offset)
            .field("len", &self.len)
            .finish()
    }
}

impl LazyFileSlice {
    pub fn slice(&self, range: Range<u64>) -> Self {
        Self {
            handle: self.handle.clone(),
            offset: self.offset + range.start,
            len: range.end.saturating_sub(range.start),
        }
    }

    /// Absolute offset of this view within its file
    pub fn offset(&self) -> u64 {
        self.offset
    }
}

#[async_trait]
impl AsyncFileRead for LazyFileSlice {
    fn len(&self) -> u64 {
        self.len
    }

    async fn read_bytes_range(&self, range: Range<u64>) -> io::Result<OwnedBytes> {
        if range.start > range.end || range.end > self.len {
            return Err(out_of_bounds(&range, self.len));
        }
        let abs_start = self.offset + range.start;
        let abs_end = self.offset + range.end;
        self.handle.read_bytes_range(abs_start..abs_end).await
    }
}

/// Async directory trait for reading segment files
#[async_trait]
pub trait Directory: Send + Sync + 'static {
    async fn exists(&self, path: &Path) -> io::Result<bool>;

    /// Open a file for reading, loading it whole
    async fn open_read(&self, path: &Path) -> io::Result<FileSlice>;

    /// Open a lazy file handle that fetches ranges on demand
    async fn open_lazy(&self, path: &Path) -> io::Result<LazyFileHandle>;
}

/// A writer for incrementally writing data to a directory file.
///
/// The file is not guaranteed to be visible (or complete) to readers until
/// [`StreamingWriter::finish`] returns.
pub trait StreamingWriter: io::Write + Send {
    /// Finalize the write, making data available for reading.
    fn finish(self: Box<Self>) -> io::Result<()>;
}

/// StreamingWriter backed by Vec<u8>, published into a RamDirectory on finish.
struct BufferedStreamingWriter {
    path: PathBuf,
    buffer: Vec<u8>,
    files: Arc<RwLock<HashMap<PathBuf, Arc<Vec<u8>>>>>,
}

impl io::Write for BufferedStreamingWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buffer.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl StreamingWriter for BufferedStreamingWriter {
    fn finish(self: Box<Self>) -> io::Result<()> {
        self.files.write().insert(self.path, Arc::new(self.buffer));
        Ok(())
    }
}

/// Async directory trait for writing segment files
#[async_trait]
pub trait DirectoryWriter: Directory {
    /// Create/overwrite a file with data
    async fn write(&self, path: &Path, data: &[u8]) -> io::Result<()>;

    async fn delete(&self, path: &Path) -> io::Result<()>;

    /// Create a file for incremental writes; fails with `AlreadyExists` if
    /// the target is already present.
    async fn create_new(&self, path: &Path) -> io::Result<Box<dyn StreamingWriter>>;
}

/// In-memory directory for testing and small segments
#[derive(Debug, Default, Clone)]
pub struct RamDirectory {
    files: Arc<RwLock<HashMap<PathBuf, Arc<Vec<u8>>>>>,
}

impl RamDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    fn not_found(path: &Path) -> io::Error {
        io::Error::new(
            io::ErrorKind::NotFound,
            format!("File not found: {}", path.display()),
        )
    }

    fn get(&self, path: &Path) -> io::Result<Arc<Vec<u8>>> {
        self.files
            .read()
            .get(path)
            .cloned()
            .ok_or_else(|| Self::not_found(path))
    }
}

#[async_trait]
impl Directory for RamDirectory {
    async fn exists(&self, path: &Path) -> io::Result<bool> {
        Ok(self.files.read().contains_key(path))
    }

    async fn open_read(&self, path: &Path) -> io::Result<FileSlice> {
        let data = self.get(path)?;
        let len = data.len();
        Ok(FileSlice::new(OwnedBytes::from_shared(data, 0..len)))
    }

    async fn open_lazy(&self, path: &Path) -> io::Result<LazyFileHandle> {
        // Snapshot the current contents; a later overwrite does not affect
        // handles that are already open.
        let data = self.get(path)?;
        let len = data.len();
        Ok(LazyFileHandle::from_bytes(OwnedBytes::from_shared(
            data,
            0..len,
        )))
    }
}

#[async_trait]
impl DirectoryWriter for RamDirectory {
    async fn write(&self, path: &Path, data: &[u8]) -> io::Result<()> {
        self.files
            .write()
            .insert(path.to_path_buf(), Arc::new(data.to_vec()));
        Ok(())
    }

    async fn delete(&self, path: &Path) -> io::Result<()> {
        self.files.write().remove(path);
        Ok(())
    }

    async fn create_new(&self, path: &Path) -> io::Result<Box<dyn StreamingWriter>> {
        let mut files = self.files.write();
        if files.contains_key(path) {
            return Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                format!("File already exists: {}", path.display()),
            ));
        }
        // Reserve the name so a second create_new fails before finish().
        files.insert(path.to_path_buf(), Arc::new(Vec::new()));
        Ok(Box::new(BufferedStreamingWriter {
            path: path.to_path_buf(),
            buffer: Vec::new(),
            files: Arc::clone(&self.files),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[tokio::test]
    async fn test_ram_directory() {
        let dir = RamDirectory::new();

        dir.write(Path::new("test.bin"), b"hello world")
            .await
            .unwrap();

        assert!(dir.exists(Path::new("test.bin")).await.unwrap());
        assert!(!dir.exists(Path::new("nonexistent.bin")).await.unwrap());

        let slice = dir.open_read(Path::new("test.bin")).await.unwrap();
        let data = slice.read_bytes().await.unwrap();
        assert_eq!(data.as_slice(), b"hello world");

        let range_data = slice.read_bytes_range(0..5).await.unwrap();
        assert_eq!(range_data.as_slice(), b"hello");

        dir.delete(Path::new("test.bin")).await.unwrap();
        assert!(!dir.exists(Path::new("test.bin")).await.unwrap());
    }

    #[tokio::test]
    async fn test_create_new_rejects_existing() {
        let dir = RamDirectory::new();
        let path = Path::new("seg.qstate");

        let mut w = dir.create_new(path).await.unwrap();
        let err = dir.create_new(path).await.err().unwrap();
        assert_eq!(err.kind(), io::ErrorKind::AlreadyExists);

        w.write_all(b"abc").unwrap();
        w.finish().unwrap();
        assert_eq!(dir.open_read(path).await.unwrap().len(), 3);

        let err = dir.create_new(path).await.err().unwrap();
        assert_eq!(err.kind(), io::ErrorKind::AlreadyExists);
    }

    #[tokio::test]
    async fn test_lazy_slices_read_independently() {
        let dir = RamDirectory::new();
        let path = Path::new("data.bin");
        dir.write(path, &(0u8..100).collect::<Vec<_>>())
            .await
            .unwrap();

        let handle = dir.open_lazy(path).await.unwrap();
        let a = handle.slice(10..50);
        let b = a.slice(5..15);
        assert_eq!(b.offset(), 15);

        let bytes = b.read_bytes().await.unwrap();
        assert_eq!(bytes.as_slice(), &(15u8..25).collect::<Vec<_>>()[..]);
        let bytes = a.read_bytes_range(0..2).await.unwrap();
        assert_eq!(bytes.as_slice(), &[10, 11]);

        let err = a.read_bytes_range(30..41).await.err().unwrap();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn test_owned_bytes() {
        let bytes = OwnedBytes::new(vec![1, 2, 3, 4, 5]);

        assert_eq!(bytes.len(), 5);
        let sliced = bytes.slice(1..4);
        assert_eq!(sliced.as_slice(), &[2, 3, 4]);
        assert_eq!(sliced.slice(1..2).as_slice(), &[3]);

        // Original unchanged
        assert_eq!(bytes.as_slice(), &[1, 2, 3, 4, 5]);
    }
}
