//! Open file handles: `{path, flags, position, backend_ref}` plus the
//! operations a bound fd exposes (component D's payload).

use crate::error::{Errno, Error};
use crate::flags::OpenFlags;

/// A handle bound to one open file on one backend. Owns its own read/write
/// position; two handles on the same path never share a cursor.
#[derive(Clone)]
pub struct FileHandle {
    pub path: String,
    pub flags: OpenFlags,
    pub position: u64,
    pub backend_ref: String,
}

impl FileHandle {
    /// A fresh handle at position 0, or at EOF (`size`) when opened in
    /// append mode. `size` is the target's size at open time.
    pub fn new(path: String, flags: OpenFlags, backend_ref: String) -> Self {
        FileHandle { path, flags, position: 0, backend_ref }
    }

    pub fn at_eof(path: String, flags: OpenFlags, backend_ref: String, size: u64) -> Self {
        let position = if flags.appendable { size } else { 0 };
        FileHandle { path, flags, position, backend_ref }
    }

    pub fn require_readable(&self) -> Result<(), Error> {
        if !self.flags.readable {
            return Err(Error::new(Errno::Access, "read").with_path(self.path.clone()));
        }
        Ok(())
    }

    pub fn require_writable(&self) -> Result<(), Error> {
        if !self.flags.writable {
            return Err(Error::new(Errno::Access, "write").with_path(self.path.clone()));
        }
        Ok(())
    }
}
