//! The backend capability interface (§3 "Backend"). Every mount point
//! binds to one `dyn Backend`; the dispatch layer only ever talks to
//! backends through this trait, never to a concrete type.

mod http_index;
mod local_disk;
mod memory;

pub use http_index::HttpIndexedBackend;
pub use local_disk::LocalDiskBackend;
pub use memory::MemoryBackend;

use crate::error::Error;
use crate::flags::OpenFlags;
use crate::stat::Stats;

/// A name and whether it is itself a directory, as returned by `readdir`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String,
    pub stats: Stats,
}

/// Static capabilities a backend reports so the dispatch layer can fail
/// fast (`EROFS`/`EPERM`) instead of calling into a backend that would
/// reject the operation anyway.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    pub read_only: bool,
    pub supports_links: bool,
}

/// An opaque, backend-owned open file. The dispatch layer reads/writes
/// through this without knowing the concrete backend.
pub trait OpenFile: Send + Sync {
    fn read_at(&self, offset: u64, len: usize) -> Result<Vec<u8>, Error>;
    fn write_at(&mut self, offset: u64, data: &[u8]) -> Result<usize, Error>;
    fn truncate(&mut self, len: u64) -> Result<(), Error>;
    fn sync(&mut self) -> Result<(), Error>;
    fn datasync(&mut self) -> Result<(), Error>;
    fn close(&mut self) -> Result<(), Error>;
}

/// A concrete filesystem implementation bound to a mount point.
///
/// All paths passed to a `Backend` are already backend-relative
/// (the mount point prefix has been stripped by [`crate::mount::MountTable`]).
/// Backends are otherwise opaque — the dispatch layer never inspects
/// their internals.
pub trait Backend: Send + Sync {
    fn capabilities(&self) -> Capabilities;

    fn stat(&self, path: &str) -> Result<Stats, Error>;

    fn exists(&self, path: &str) -> bool {
        self.stat(path).is_ok()
    }

    fn open_file(&self, path: &str, flags: OpenFlags) -> Result<Box<dyn OpenFile>, Error>;

    fn create_file(&self, path: &str, flags: OpenFlags, mode: u32)
        -> Result<Box<dyn OpenFile>, Error>;

    fn mkdir(&self, path: &str, mode: u32) -> Result<(), Error>;

    fn rmdir(&self, path: &str) -> Result<(), Error>;

    fn unlink(&self, path: &str) -> Result<(), Error>;

    /// Rename within this backend only; cross-backend rename is
    /// implemented by the dispatch layer as copy+unlink.
    fn rename(&self, from: &str, to: &str) -> Result<(), Error>;

    /// Hard-link within this backend only; cross-backend linking is
    /// rejected by the dispatch layer with `EXDEV` before this is called.
    fn link(&self, target: &str, link_path: &str) -> Result<(), Error>;

    fn readdir(&self, path: &str) -> Result<Vec<DirEntry>, Error>;

    fn chmod(&self, path: &str, mode: u32) -> Result<(), Error>;

    fn chown(&self, path: &str, uid: u32, gid: u32) -> Result<(), Error>;

    fn utimes(
        &self,
        path: &str,
        atime: crate::stat::Timestamp,
        mtime: crate::stat::Timestamp,
    ) -> Result<(), Error>;
}

/// Async entry points for backends whose I/O is worth doing without
/// blocking a thread. Excluded for backends that would otherwise just
/// wrap their own synchronous methods (§1) — only [`HttpIndexedBackend`]
/// implements this, since its HTTP fetches genuinely differ between the
/// sync and async paths.
#[async_trait::async_trait]
pub trait AsyncBackend: Backend {
    async fn stat_async(&self, path: &str) -> Result<Stats, Error>;
    async fn read_file_async(&self, path: &str) -> Result<Vec<u8>, Error>;
}
