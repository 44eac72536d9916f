//! A portable virtual filesystem: a POSIX-style dispatch surface
//! (mount table, symlink-aware path resolution, fd table, per-operation
//! caching) over pluggable [`backend::Backend`] implementations.
//!
//! Two reference backends ship inline — [`backend::HttpIndexedBackend`],
//! a read-only backend built from a JSON index with lazy HTTP body
//! fetch, and [`backend::LocalDiskBackend`], a writable backend over
//! `std::fs` — plus [`backend::MemoryBackend`] for tests that shouldn't
//! touch a real disk or network.
//!
//! ```no_run
//! use vfs_core::{Vfs, backend::MemoryBackend};
//!
//! let vfs = Vfs::new(MemoryBackend::new());
//! vfs.write_file("/hello.txt", b"hi", 0o644).unwrap();
//! assert_eq!(vfs.read_file("/hello.txt").unwrap(), b"hi");
//! ```

pub mod backend;
pub mod cache;
pub mod config;
pub mod context;
pub mod error;
pub mod fd;
pub mod flags;
pub mod handle;
pub mod mount;
pub mod notify;
pub mod path;
pub mod resolve;
pub mod stat;
pub mod vfs;

pub use config::Config;
pub use context::Context;
pub use error::{Errno, Error, Result};
pub use vfs::{CopyOptions, Dir, MkdirOptions, ReaddirOptions, RmOptions, StatFs, SymlinkType, Vfs};
