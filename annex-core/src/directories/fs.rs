//! Local filesystem directory with async IO via tokio
//!
//! This module is only compiled with the "native" feature.

use std::io::{self, Write};
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;

use super::{
    Directory, DirectoryWriter, FileSlice, LazyFileHandle, OwnedBytes, RangeReadFn,
    StreamingWriter,
};

/// StreamingWriter backed by std::fs::File; fsyncs on finish.
pub(crate) struct FileStreamingWriter {
    file: std::fs::File,
}

impl FileStreamingWriter {
    pub(crate) fn new(file: std::fs::File) -> Self {
        Self { file }
    }
}

impl Write for FileStreamingWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.file.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

impl StreamingWriter for FileStreamingWriter {
    fn finish(mut self: Box<Self>) -> io::Result<()> {
        self.file.flush()?;
        self.file.sync_all()?;
        Ok(())
    }
}

async fn read_file_range(path: &Path, range: Range<u64>) -> io::Result<OwnedBytes> {
    use tokio::io::{AsyncReadExt, AsyncSeekExt};

    let mut file = tokio::fs::File::open(path).await?;
    file.seek(io::SeekFrom::Start(range.start)).await?;

    let len = (range.end - range.start) as usize;
    let mut buffer = vec![0u8; len];
    file.read_exact(&mut buffer).await?;

    Ok(OwnedBytes::new(buffer))
}

/// Create `full_path` and its parents; fails if the file already exists.
pub(crate) async fn create_new_file(full_path: &Path) -> io::Result<std::fs::File> {
    if let Some(parent) = full_path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    std::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(full_path)
}

/// Directory rooted at a local path
#[derive(Debug, Clone)]
pub struct FsDirectory {
    root: PathBuf,
}

impl FsDirectory {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        self.root.join(path)
    }
}

#[async_trait]
impl Directory for FsDirectory {
    async fn exists(&self, path: &Path) -> io::Result<bool> {
        tokio::fs::try_exists(self.resolve(path)).await
    }

    async fn open_read(&self, path: &Path) -> io::Result<FileSlice> {
        let data = tokio::fs::read(self.resolve(path)).await?;
        Ok(FileSlice::new(OwnedBytes::new(data)))
    }

    async fn open_lazy(&self, path: &Path) -> io::Result<LazyFileHandle> {
        let full_path = self.resolve(path);
        let file_size = tokio::fs::metadata(&full_path).await?.len();

        let read_fn: RangeReadFn = Arc::new(move |range: Range<u64>| {
            let full_path = full_path.clone();
            Box::pin(async move { read_file_range(&full_path, range).await })
        });

        Ok(LazyFileHandle::new(file_size, read_fn))
    }
}

#[async_trait]
impl DirectoryWriter for FsDirectory {
    async fn write(&self, path: &Path, data: &[u8]) -> io::Result<()> {
        let full_path = self.resolve(path);
        if let Some(parent) = full_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&full_path, data).await
    }

    async fn delete(&self, path: &Path) -> io::Result<()> {
        tokio::fs::remove_file(self.resolve(path)).await
    }

    async fn create_new(&self, path: &Path) -> io::Result<Box<dyn StreamingWriter>> {
        let file = create_new_file(&self.resolve(path)).await?;
        Ok(Box::new(FileStreamingWriter::new(file)))
    }
}
