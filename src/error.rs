//! Structured errno-style errors and caller-visible path rewriting.

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

/// POSIX-flavored error codes surfaced by the dispatch layer and backends.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Errno {
    /// No such file or directory.
    NoEnt,
    /// File exists.
    Exist,
    /// Is a directory.
    IsDir,
    /// Not a directory.
    NotDir,
    /// Permission denied (access check against mode/uid/gid).
    Access,
    /// Operation not permitted (owner/capability failure, or read-only backend).
    Perm,
    /// Invalid argument.
    Inval,
    /// Bad file descriptor.
    BadF,
    /// Cross-device link / cross-backend operation that requires same backend.
    XDev,
    /// I/O error from the backend's underlying store.
    Io,
    /// Too many levels of symbolic links.
    ELoop,
    /// Directory not empty.
    NotEmpty,
    /// Read-only filesystem.
    RoFs,
    /// Name too long.
    NameTooLong,
}

impl Errno {
    /// Short lowercase token, the way `strerror`/Node's `errno` constants read.
    pub fn as_str(self) -> &'static str {
        match self {
            Errno::NoEnt => "ENOENT",
            Errno::Exist => "EEXIST",
            Errno::IsDir => "EISDIR",
            Errno::NotDir => "ENOTDIR",
            Errno::Access => "EACCES",
            Errno::Perm => "EPERM",
            Errno::Inval => "EINVAL",
            Errno::BadF => "EBADF",
            Errno::XDev => "EXDEV",
            Errno::Io => "EIO",
            Errno::ELoop => "ELOOP",
            Errno::NotEmpty => "ENOTEMPTY",
            Errno::RoFs => "EROFS",
            Errno::NameTooLong => "ENAMETOOLONG",
        }
    }
}

/// A structured error carrying the syscall-like operation name, the
/// caller-visible path involved (if any), and a human-readable message.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Error {
    pub errno: Errno,
    pub syscall: &'static str,
    pub path: Option<PathBuf>,
    pub message: Option<String>,
}

impl Error {
    pub fn new(errno: Errno, syscall: &'static str) -> Self {
        Self { errno, syscall, path: None, message: None }
    }

    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Rewrite the backend-relative path embedded in this error to the
    /// caller-visible path, using the lookup table built at call entry (§4.J).
    pub fn rewrite_path(mut self, caller_visible: &Path) -> Self {
        self.path = Some(caller_visible.to_path_buf());
        self
    }

    pub fn is_not_found(&self) -> bool {
        self.errno == Errno::NoEnt
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.syscall, self.errno.as_str())?;
        if let Some(path) = &self.path {
            write!(f, ", path {:?}", path)?;
        }
        if let Some(message) = &self.message {
            write!(f, ": {message}")?;
        }
        Ok(())
    }
}

impl std::error::Error for Error {}

pub type Result<T> = std::result::Result<T, Error>;

/// Map a host `io::Error` to the closest crate error code, the way
/// backends translate their underlying store's failures.
pub fn map_io_error(syscall: &'static str, err: io::Error) -> Error {
    use io::ErrorKind::*;
    let errno = match err.kind() {
        NotFound => Errno::NoEnt,
        PermissionDenied => Errno::Access,
        AlreadyExists => Errno::Exist,
        InvalidInput | InvalidData => Errno::Inval,
        NotADirectory => Errno::NotDir,
        IsADirectory => Errno::IsDir,
        ReadOnlyFilesystem => Errno::RoFs,
        DirectoryNotEmpty => Errno::NotEmpty,
        _ => Errno::Io,
    };
    Error::new(errno, syscall).with_message(err.to_string())
}
