//! Memory-mapped directory for zero-copy reads of segment files
//!
//! This module is only compiled with the "native" feature.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use memmap2::Mmap;

use super::fs::{FileStreamingWriter, create_new_file};
use super::{Directory, DirectoryWriter, FileSlice, LazyFileHandle, OwnedBytes, StreamingWriter};

/// Memory-mapped directory
///
/// Reads hand out [`OwnedBytes`] that point straight into the mapping, so
/// bucketed vector reads are plain memory copies and the OS page cache does
/// the caching. Writes still use regular file I/O.
#[derive(Debug, Clone)]
pub struct MmapDirectory {
    root: PathBuf,
}

impl MmapDirectory {
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

    fn map(&self, path: &Path) -> io::Result<OwnedBytes> {
        let file = std::fs::File::open(self.resolve(path))?;
        if file.metadata()?.len() == 0 {
            // Zero-length files cannot be mapped on every platform.
            return Ok(OwnedBytes::empty());
        }
        // SAFETY: segment files are write-once; nothing truncates a file
        // while a reader holds a mapping.
        let mmap = unsafe { Mmap::map(&file)? };
        let len = mmap.len();
        Ok(OwnedBytes::from_shared(Arc::new(mmap), 0..len))
    }
}

#[async_trait]
impl Directory for MmapDirectory {
    async fn exists(&self, path: &Path) -> io::Result<bool> {
        tokio::fs::try_exists(self.resolve(path)).await
    }

    async fn open_read(&self, path: &Path) -> io::Result<FileSlice> {
        Ok(FileSlice::new(self.map(path)?))
    }

    async fn open_lazy(&self, path: &Path) -> io::Result<LazyFileHandle> {
        // The mapping is already "lazy"; range reads just slice it.
        Ok(LazyFileHandle::from_bytes(self.map(path)?))
    }
}

#[async_trait]
impl DirectoryWriter for MmapDirectory {
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directories::AsyncFileRead;

    #[tokio::test]
    async fn test_mmap_directory_reads() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = MmapDirectory::new(tmp.path());

        dir.write(Path::new("a.bin"), b"mapped bytes").await.unwrap();
        let handle = dir.open_lazy(Path::new("a.bin")).await.unwrap();
        let bytes = handle.read_bytes_range(7..12).await.unwrap();
        assert_eq!(bytes.as_slice(), b"bytes");

        dir.write(Path::new("empty.bin"), b"").await.unwrap();
        let slice = dir.open_read(Path::new("empty.bin")).await.unwrap();
        assert!(slice.is_empty());
    }
}
