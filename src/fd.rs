//! File-descriptor table (component D): process-wide `fd → file handle`
//! map, allocating the smallest unused positive integer.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use dashmap::DashMap;

use crate::error::{Errno, Error};
use crate::handle::FileHandle;

/// Process-wide `fd → file handle` table. Backed by [`DashMap`] so
/// individual allocate/lookup/remove calls are atomic even though the
/// core's call semantics are single-threaded-cooperative per call (§5).
pub struct FdTable {
    handles: DashMap<u32, FileHandle>,
    next: AtomicU32,
    free: Mutex<BinaryHeap<Reverse<u32>>>,
}

impl FdTable {
    pub fn new() -> Self {
        FdTable { handles: DashMap::new(), next: AtomicU32::new(1), free: Mutex::new(BinaryHeap::new()) }
    }

    /// Bind `handle` to the smallest unused positive integer and return it.
    pub fn file_to_fd(&self, handle: FileHandle) -> u32 {
        let fd = {
            let mut free = self.free.lock().unwrap();
            match free.pop() {
                Some(Reverse(fd)) => fd,
                None => self.next.fetch_add(1, Ordering::SeqCst),
            }
        };
        self.handles.insert(fd, handle);
        fd
    }

    /// Look up the handle bound to `fd`, cloning it out. Fails with
    /// `EBADF` for a retired or never-issued fd.
    pub fn fd_to_file(&self, fd: u32) -> Result<FileHandle, Error> {
        self.handles
            .get(&fd)
            .map(|entry| entry.clone())
            .ok_or_else(|| Error::new(Errno::BadF, "fstat").with_message(format!("fd {fd}")))
    }

    /// Run `f` with mutable access to the handle bound to `fd`.
    pub fn with_file_mut<R>(
        &self,
        fd: u32,
        f: impl FnOnce(&mut FileHandle) -> R,
    ) -> Result<R, Error> {
        let mut entry = self
            .handles
            .get_mut(&fd)
            .ok_or_else(|| Error::new(Errno::BadF, "fstat").with_message(format!("fd {fd}")))?;
        Ok(f(&mut entry))
    }

    /// Remove `fd` from the table. Fails with `EBADF` if it was already
    /// absent (double-close).
    pub fn retire(&self, fd: u32) -> Result<FileHandle, Error> {
        let (_, handle) = self
            .handles
            .remove(&fd)
            .ok_or_else(|| Error::new(Errno::BadF, "close").with_message(format!("fd {fd}")))?;
        self.free.lock().unwrap().push(Reverse(fd));
        Ok(handle)
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }
}

impl Default for FdTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flags::parse_str_flag;

    fn sample_handle(path: &str) -> FileHandle {
        FileHandle::new(path.to_string(), parse_str_flag("r").unwrap(), "mnt".to_string())
    }

    #[test]
    fn allocates_smallest_unused_integer() {
        let table = FdTable::new();
        let a = table.file_to_fd(sample_handle("/a"));
        let b = table.file_to_fd(sample_handle("/b"));
        assert_eq!(a, 1);
        assert_eq!(b, 2);
        table.retire(a).unwrap();
        let c = table.file_to_fd(sample_handle("/c"));
        assert_eq!(c, 1, "freed fd 1 should be reused before bumping the counter");
    }

    #[test]
    fn double_close_fails_with_ebadf() {
        let table = FdTable::new();
        let fd = table.file_to_fd(sample_handle("/a"));
        table.retire(fd).unwrap();
        let err = table.retire(fd).unwrap_err();
        assert_eq!(err.errno, Errno::BadF);
    }

    #[test]
    fn lookup_of_unissued_fd_fails() {
        let table = FdTable::new();
        assert_eq!(table.fd_to_file(42).unwrap_err().errno, Errno::BadF);
    }
}
