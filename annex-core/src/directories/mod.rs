mod directory;
#[cfg(feature = "native")]
mod fs;
#[cfg(feature = "native")]
mod mmap;

pub use directory::*;
#[cfg(feature = "native")]
pub use fs::FsDirectory;
#[cfg(feature = "native")]
pub use mmap::MmapDirectory;
