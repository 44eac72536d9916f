//! A writable backend over a real directory on the host filesystem
//! (component K, ambient). Grounding/test material: maps every
//! backend-relative path under `root` and translates `std::io::Error`
//! the way the reference index-backed backend translates transport
//! failures.
//!
//! Symlinks are stored as regular files whose body is the UTF-8 target
//! (per §3), not as real OS-level symlinks — this keeps `stat`/`readlink`
//! backend-agnostic instead of leaking host-specific symlink semantics
//! into the dispatch layer. The mode bit marking a path as a symlink is
//! tracked in a sidecar map alongside the real files, since plain files on
//! disk have no spare bits to stash it in.

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use filetime::{set_file_times, FileTime};

use super::{Backend, Capabilities, DirEntry, OpenFile};
use crate::error::{map_io_error, Errno, Error};
use crate::flags::OpenFlags;
use crate::stat::{Stats, Timestamp, S_IFDIR, S_IFLNK, S_IFMT, S_IFREG};

/// Per-path mode override, tracked outside the filesystem proper.
///
/// `std::fs` exposes little beyond Unix permission bits; the symlink type
/// bit and exact permission bits this crate's `Stats` promises are kept
/// here rather than trusted to the OS metadata, so this backend behaves
/// identically under test on Linux, macOS or Windows.
#[derive(Default)]
struct ModeOverrides {
    modes: HashMap<PathBuf, u32>,
}

pub struct LocalDiskBackend {
    root: PathBuf,
    overrides: Mutex<ModeOverrides>,
}

impl LocalDiskBackend {
    pub fn new(root: impl Into<PathBuf>) -> std::sync::Arc<Self> {
        std::sync::Arc::new(LocalDiskBackend { root: root.into(), overrides: Mutex::new(ModeOverrides::default()) })
    }

    fn host_path(&self, path: &str) -> PathBuf {
        let trimmed = path.trim_start_matches('/');
        if trimmed.is_empty() {
            self.root.clone()
        } else {
            self.root.join(trimmed)
        }
    }

    fn mode_for(&self, path: &str, metadata: &fs::Metadata) -> u32 {
        if let Some(mode) = self.overrides.lock().unwrap().modes.get(Path::new(path)) {
            return *mode;
        }
        let perm_bits = unix_perm_bits(metadata);
        if metadata.is_dir() {
            S_IFDIR | perm_bits
        } else {
            S_IFREG | perm_bits
        }
    }

    fn stats_for(&self, path: &str, metadata: &fs::Metadata) -> Stats {
        Stats {
            mode: self.mode_for(path, metadata),
            size: metadata.len(),
            atime: system_time_to_timestamp(metadata.accessed().ok()),
            mtime: system_time_to_timestamp(metadata.modified().ok()),
            ctime: system_time_to_timestamp(metadata.modified().ok()),
            uid: 0,
            gid: 0,
        }
    }
}

#[cfg(unix)]
fn unix_perm_bits(metadata: &fs::Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode() & 0o7777
}

#[cfg(not(unix))]
fn unix_perm_bits(metadata: &fs::Metadata) -> u32 {
    if metadata.permissions().readonly() {
        0o555
    } else {
        0o755
    }
}

fn system_time_to_timestamp(time: Option<std::time::SystemTime>) -> Timestamp {
    match time {
        Some(t) => match t.duration_since(std::time::UNIX_EPOCH) {
            Ok(d) => Timestamp { secs: d.as_secs() as i64, nanos: d.subsec_nanos() },
            Err(_) => Timestamp::UNIX_EPOCH,
        },
        None => Timestamp::UNIX_EPOCH,
    }
}

struct LocalOpenFile {
    file: File,
}

impl OpenFile for LocalOpenFile {
    fn read_at(&self, offset: u64, len: usize) -> Result<Vec<u8>, Error> {
        let mut file = self.file.try_clone().map_err(|e| map_io_error("read", e))?;
        file.seek(SeekFrom::Start(offset)).map_err(|e| map_io_error("read", e))?;
        let mut buf = vec![0u8; len];
        let mut total = 0;
        loop {
            let n = file.read(&mut buf[total..]).map_err(|e| map_io_error("read", e))?;
            if n == 0 {
                break;
            }
            total += n;
            if total == buf.len() {
                break;
            }
        }
        buf.truncate(total);
        Ok(buf)
    }

    fn write_at(&mut self, offset: u64, data: &[u8]) -> Result<usize, Error> {
        self.file.seek(SeekFrom::Start(offset)).map_err(|e| map_io_error("write", e))?;
        self.file.write_all(data).map_err(|e| map_io_error("write", e))?;
        Ok(data.len())
    }

    fn truncate(&mut self, len: u64) -> Result<(), Error> {
        self.file.set_len(len).map_err(|e| map_io_error("truncate", e))
    }

    fn sync(&mut self) -> Result<(), Error> {
        self.file.sync_all().map_err(|e| map_io_error("fsync", e))
    }

    fn datasync(&mut self) -> Result<(), Error> {
        self.file.sync_data().map_err(|e| map_io_error("fdatasync", e))
    }

    fn close(&mut self) -> Result<(), Error> {
        Ok(())
    }
}

impl Backend for LocalDiskBackend {
    fn capabilities(&self) -> Capabilities {
        Capabilities { read_only: false, supports_links: true }
    }

    fn stat(&self, path: &str) -> Result<Stats, Error> {
        let metadata = fs::symlink_metadata(self.host_path(path))
            .map_err(|e| map_io_error("stat", e).with_path(path))?;
        Ok(self.stats_for(path, &metadata))
    }

    fn open_file(&self, path: &str, flags: OpenFlags) -> Result<Box<dyn OpenFile>, Error> {
        let file = OpenOptions::new()
            .read(flags.readable)
            .write(flags.writable || flags.appendable)
            .append(flags.appendable)
            .open(self.host_path(path))
            .map_err(|e| map_io_error("open", e).with_path(path))?;
        Ok(Box::new(LocalOpenFile { file }))
    }

    fn create_file(&self, path: &str, flags: OpenFlags, mode: u32) -> Result<Box<dyn OpenFile>, Error> {
        let mut options = OpenOptions::new();
        options.read(true).write(true).create(true);
        if flags.exclusive {
            options.create_new(true);
        }
        if flags.truncating {
            options.truncate(true);
        }
        let file = options.open(self.host_path(path)).map_err(|e| map_io_error("open", e).with_path(path))?;
        self.overrides.lock().unwrap().modes.insert(PathBuf::from(path), S_IFREG | (mode & 0o7777));
        Ok(Box::new(LocalOpenFile { file }))
    }

    fn mkdir(&self, path: &str, mode: u32) -> Result<(), Error> {
        fs::create_dir(self.host_path(path)).map_err(|e| map_io_error("mkdir", e).with_path(path))?;
        self.overrides.lock().unwrap().modes.insert(PathBuf::from(path), S_IFDIR | (mode & 0o7777));
        Ok(())
    }

    fn rmdir(&self, path: &str) -> Result<(), Error> {
        fs::remove_dir(self.host_path(path)).map_err(|e| map_io_error("rmdir", e).with_path(path))?;
        self.overrides.lock().unwrap().modes.remove(Path::new(path));
        Ok(())
    }

    fn unlink(&self, path: &str) -> Result<(), Error> {
        fs::remove_file(self.host_path(path)).map_err(|e| map_io_error("unlink", e).with_path(path))?;
        self.overrides.lock().unwrap().modes.remove(Path::new(path));
        Ok(())
    }

    fn rename(&self, from: &str, to: &str) -> Result<(), Error> {
        fs::rename(self.host_path(from), self.host_path(to))
            .map_err(|e| map_io_error("rename", e).with_path(from))?;
        let mut overrides = self.overrides.lock().unwrap();
        if let Some(mode) = overrides.modes.remove(Path::new(from)) {
            overrides.modes.insert(PathBuf::from(to), mode);
        }
        let prefix = format!("{from}/");
        let descendants: Vec<PathBuf> = overrides
            .modes
            .keys()
            .filter(|p| p.to_string_lossy().starts_with(&prefix))
            .cloned()
            .collect();
        for descendant in descendants {
            if let Some(mode) = overrides.modes.remove(&descendant) {
                let rest = &descendant.to_string_lossy()[from.len()..];
                overrides.modes.insert(PathBuf::from(format!("{to}{rest}")), mode);
            }
        }
        Ok(())
    }

    fn link(&self, target: &str, link_path: &str) -> Result<(), Error> {
        fs::hard_link(self.host_path(target), self.host_path(link_path))
            .map_err(|e| map_io_error("link", e).with_path(link_path))
    }

    fn readdir(&self, path: &str) -> Result<Vec<DirEntry>, Error> {
        let read_dir = fs::read_dir(self.host_path(path)).map_err(|e| map_io_error("readdir", e).with_path(path))?;
        let mut entries = Vec::new();
        for entry in read_dir {
            let entry = entry.map_err(|e| map_io_error("readdir", e).with_path(path))?;
            let name = entry.file_name().to_string_lossy().into_owned();
            let child_path = crate::path::join(&[path, &name])?;
            let metadata = entry.metadata().map_err(|e| map_io_error("readdir", e).with_path(&child_path))?;
            let stats = self.stats_for(&child_path, &metadata);
            entries.push(DirEntry { name, stats });
        }
        Ok(entries)
    }

    fn chmod(&self, path: &str, mode: u32) -> Result<(), Error> {
        let current = self.stat(path)?;
        let type_bits = mode & S_IFMT;
        self.overrides.lock().unwrap().modes.insert(
            PathBuf::from(path),
            if type_bits == 0 { current.file_type_bits() | (mode & 0o7777) } else { mode },
        );
        if type_bits == 0 || type_bits == S_IFREG || type_bits == S_IFDIR {
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                let perms = fs::Permissions::from_mode(mode & 0o7777);
                fs::set_permissions(self.host_path(path), perms)
                    .map_err(|e| map_io_error("chmod", e).with_path(path))?;
            }
        }
        Ok(())
    }

    #[cfg(unix)]
    fn chown(&self, path: &str, uid: u32, gid: u32) -> Result<(), Error> {
        use std::ffi::CString;
        use std::os::unix::ffi::OsStrExt;

        let host_path = self.host_path(path);
        let c_path = CString::new(host_path.as_os_str().as_bytes())
            .map_err(|_| Error::new(Errno::Inval, "chown").with_path(path).with_message("path contains a NUL byte"))?;
        let ret = unsafe { libc::chown(c_path.as_ptr(), uid, gid) };
        if ret != 0 {
            return Err(map_io_error("chown", std::io::Error::last_os_error()).with_path(path));
        }
        Ok(())
    }

    #[cfg(not(unix))]
    fn chown(&self, path: &str, _uid: u32, _gid: u32) -> Result<(), Error> {
        // No portable ownership-change syscall off Unix; surface the
        // unsupported attribute change as an error rather than faking
        // success (the teacher's `ensure_supported_attr` pattern).
        Err(Error::new(Errno::Perm, "chown").with_path(path))
    }

    fn utimes(&self, path: &str, atime: Timestamp, mtime: Timestamp) -> Result<(), Error> {
        let host_path = self.host_path(path);
        let atime = FileTime::from_unix_time(atime.secs, atime.nanos);
        let mtime = FileTime::from_unix_time(mtime.secs, mtime.nanos);
        set_file_times(&host_path, atime, mtime).map_err(|e| map_io_error("utimes", e).with_path(path))
    }
}

/// `open_file` with an advisory symlink mode bit still behaves like a
/// regular read/write on the body (the UTF-8 target), which is exactly
/// what `readlink`/`realpath` expect from §3 — no special-casing needed
/// here beyond recording the `S_IFLNK` mode override via `chmod`.
#[cfg(test)]
mod tests {
    use super::*;
    use crate::flags::parse_str_flag;
    use tempfile::TempDir;

    fn backend() -> (TempDir, std::sync::Arc<LocalDiskBackend>) {
        let dir = TempDir::new().unwrap();
        let backend = LocalDiskBackend::new(dir.path());
        (dir, backend)
    }

    #[test]
    fn write_then_read_round_trips() {
        let (_dir, backend) = backend();
        let mut file = backend.create_file("/a.txt", parse_str_flag("w+").unwrap(), 0o644).unwrap();
        file.write_at(0, b"hello").unwrap();
        assert_eq!(file.read_at(0, 5).unwrap(), b"hello");
        assert_eq!(backend.stat("/a.txt").unwrap().size, 5);
    }

    #[test]
    fn mkdir_then_readdir_lists_children() {
        let (_dir, backend) = backend();
        backend.mkdir("/sub", 0o755).unwrap();
        backend.create_file("/sub/x.txt", parse_str_flag("w+").unwrap(), 0o644).unwrap();
        let entries = backend.readdir("/sub").unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].name, "x.txt");
    }

    #[test]
    fn symlink_mode_override_round_trips_through_chmod() {
        let (_dir, backend) = backend();
        let mut file = backend.create_file("/link", parse_str_flag("w+").unwrap(), 0o644).unwrap();
        file.write_at(0, b"/target").unwrap();
        backend.chmod("/link", S_IFLNK | 0o777).unwrap();
        assert!(backend.stat("/link").unwrap().is_symlink());
    }

    #[test]
    fn rename_moves_mode_override() {
        let (_dir, backend) = backend();
        backend.mkdir("/a", 0o700).unwrap();
        backend.rename("/a", "/b").unwrap();
        assert_eq!(backend.stat("/b").unwrap().permission_bits(), 0o700);
    }
}
