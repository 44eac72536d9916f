//! The VFS dispatch surface (component H): the operations exposed to
//! callers. Every public method here normalizes its input paths,
//! consults the mount table, optionally resolves symlinks, invokes the
//! selected backend, and on failure rewrites the error's path back to
//! the caller-visible form before propagating it.

mod copy;
mod dir;

pub use dir::{Dir, ReaddirOptions};

use std::sync::{Arc, RwLock};

use tracing::{debug, warn};

use crate::backend::Backend;
use crate::config::Config;
use crate::context::Context;
use crate::error::{Errno, Error};
use crate::fd::FdTable;
use crate::flags::OpenFlags;
use crate::handle::FileHandle;
use crate::mount::MountTable;
use crate::notify::{ChangeEmitter, NullEmitter};
use crate::path;
use crate::resolve::realpath;
use crate::stat::{self, Stats, Timestamp, S_IFLNK};

pub use copy::CopyOptions;

/// Symlink target kind, as passed to [`Vfs::symlink`]. Purely advisory on
/// the reference backends (both store the target the same way); kept so
/// hosts targeting platforms that distinguish file/dir/junction symlinks
/// have somewhere to put that intent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymlinkType {
    File,
    Dir,
    Junction,
}

/// Options for [`Vfs::rm`].
#[derive(Debug, Clone, Copy, Default)]
pub struct RmOptions {
    pub recursive: bool,
    pub force: bool,
}

/// Options for [`Vfs::mkdir`].
#[derive(Debug, Clone, Copy)]
pub struct MkdirOptions {
    pub mode: u32,
    pub recursive: bool,
}

impl Default for MkdirOptions {
    fn default() -> Self {
        MkdirOptions { mode: 0o777, recursive: false }
    }
}

/// The dispatch layer: a mount table, a process-wide fd table, tunables,
/// and a change emitter. One `Vfs` is normally shared across a whole
/// embedding application.
pub struct Vfs {
    mounts: RwLock<MountTable>,
    fds: FdTable,
    config: Config,
    emitter: Arc<dyn ChangeEmitter>,
}

impl Vfs {
    /// A VFS rooted at `root_backend`, with the default config and a
    /// [`NullEmitter`].
    pub fn new(root_backend: Arc<dyn Backend>) -> Self {
        Vfs::with_config(root_backend, Config::default())
    }

    pub fn with_config(root_backend: Arc<dyn Backend>, config: Config) -> Self {
        Vfs {
            mounts: RwLock::new(MountTable::new(root_backend)),
            fds: FdTable::new(),
            config,
            emitter: Arc::new(NullEmitter),
        }
    }

    pub fn set_emitter(&mut self, emitter: Arc<dyn ChangeEmitter>) {
        self.emitter = emitter;
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Bind `backend` at `mount_point`.
    pub fn mount(&self, mount_point: &str, backend: Arc<dyn Backend>) -> Result<(), Error> {
        self.mounts.write().unwrap().mount(mount_point, backend)
    }

    pub fn unmount(&self, mount_point: &str) -> Result<(), Error> {
        self.mounts.write().unwrap().unmount(mount_point)
    }

    fn new_context(&self) -> Context {
        let mut ctx = Context::new(self.config.default_uid, self.config.default_gid);
        ctx.root = "/".to_string();
        ctx
    }

    fn realpath(&self, path: &str, ctx: &Context) -> Result<String, Error> {
        let mounts = self.mounts.read().unwrap();
        realpath(path, &mounts, ctx, &self.config)
    }

    fn check_access(&self, mode: u32, uid: u32, gid: u32, mask: u32, ctx: &Context) -> Result<(), Error> {
        if !self.config.check_access {
            return Ok(());
        }
        if stat::has_access(mode, uid, gid, mask, ctx) {
            Ok(())
        } else {
            Err(Error::new(Errno::Access, "access"))
        }
    }

    /// Stat `path`, preferring the per-operation cache.
    fn stat_cached(&self, path: &str, ctx: &Context) -> Result<Stats, Error> {
        if let Some(stats) = ctx.cache.get_stats(path) {
            return Ok(stats);
        }
        let mounts = self.mounts.read().unwrap();
        let resolved = mounts.resolve(path)?;
        let stats = resolved
            .backend
            .stat(&resolved.backend_path)
            .map_err(|e| e.rewrite_path(std::path::Path::new(path)))?;
        ctx.cache.put_stats(path, stats);
        Ok(stats)
    }

    fn finish(&self, ctx: &Context) {
        if !ctx.is_indirect {
            ctx.cache.clear();
        }
    }

    // ---- open / close -----------------------------------------------

    /// `open(path, flags, mode, resolve_symlinks=true) → fd`, run as the
    /// configured default caller identity. See [`Vfs::open_as`] to supply
    /// an explicit [`Context`].
    pub fn open(
        &self,
        path: &str,
        flags: OpenFlags,
        mode: u32,
        resolve_symlinks: bool,
    ) -> Result<u32, Error> {
        let ctx = self.new_context();
        self.open_as(&ctx, path, flags, mode, resolve_symlinks)
    }

    /// `open`, run as `ctx` (§9: "`this`-bound context becomes an explicit
    /// first argument; callers always pass it").
    pub fn open_as(
        &self,
        ctx: &Context,
        path: &str,
        flags: OpenFlags,
        mode: u32,
        resolve_symlinks: bool,
    ) -> Result<u32, Error> {
        let result = self.open_inner(path, flags, mode, resolve_symlinks, ctx);
        self.finish(ctx);
        result
    }

    fn open_inner(
        &self,
        path: &str,
        flags: OpenFlags,
        mode: u32,
        resolve_symlinks: bool,
        ctx: &Context,
    ) -> Result<u32, Error> {
        let normalized = path::normalize(path)?;
        let lookup_path =
            if resolve_symlinks { self.realpath(&normalized, ctx)? } else { normalized.clone() };

        let existing = self.stat_cached(&lookup_path, ctx);
        let mounts = self.mounts.read().unwrap();
        let resolved = mounts.resolve(&lookup_path).map_err(|e| {
            warn!(path = %normalized, "open: no mount covers this path");
            e
        })?;

        // Each branch below validates by actually calling into the backend
        // once, then immediately closes — file handles are re-opened from
        // the fd table's `{path, flags, backend_ref}` record on every
        // subsequent read/write rather than kept resident (§5 resource
        // lifecycle: no handle outlives the call that produced it).
        let handle = match existing {
            Err(ref e) if e.is_not_found() => {
                if !flags.writable || flags.must_exist {
                    return Err(Error::new(Errno::NoEnt, "open").with_path(&normalized));
                }
                let parsed = path::parse(&lookup_path);
                let parent_stats = self.stat_cached(&parsed.dir, ctx)?;
                if !parent_stats.is_dir() {
                    return Err(Error::new(Errno::NotDir, "open").with_path(&parsed.dir));
                }
                self.check_access(parent_stats.permission_bits(), parent_stats.uid, parent_stats.gid, crate::stat::W_OK, ctx)?;
                if resolved.backend.capabilities().read_only {
                    return Err(Error::new(Errno::RoFs, "open").with_path(&normalized));
                }
                let mut file = resolved
                    .backend
                    .create_file(&resolved.backend_path, flags, mode)
                    .map_err(|e| e.rewrite_path(std::path::Path::new(&normalized)))?;
                let _ = file.close();
                self.emitter.notify_rename(&normalized);
                debug!(path = %normalized, "created file on open");
                FileHandle::new(lookup_path.clone(), flags, resolved.mount_point.clone())
            }
            Ok(stats) => {
                if flags.exclusive {
                    return Err(Error::new(Errno::Exist, "open").with_path(&normalized));
                }
                if stats.is_dir() {
                    return Err(Error::new(Errno::IsDir, "open").with_path(&normalized));
                }
                self.check_access(stats.permission_bits(), stats.uid, stats.gid, flags.required_access(), ctx)?;
                let mut file = resolved
                    .backend
                    .open_file(&resolved.backend_path, flags)
                    .map_err(|e| e.rewrite_path(std::path::Path::new(&normalized)))?;
                if flags.truncating {
                    if resolved.backend.capabilities().read_only {
                        return Err(Error::new(Errno::RoFs, "open").with_path(&normalized));
                    }
                    file.truncate(0).map_err(|e| e.rewrite_path(std::path::Path::new(&normalized)))?;
                }
                let _ = file.close();
                FileHandle::at_eof(lookup_path.clone(), flags, resolved.mount_point.clone(), stats.size)
            }
            Err(e) => return Err(e.rewrite_path(std::path::Path::new(&normalized))),
        };

        drop(mounts);
        Ok(self.fds.file_to_fd(handle))
    }

    /// Close `fd`, removing it from the fd table. The backend's open file
    /// is reopened and closed again here purely to surface a close-time
    /// I/O error, matching backends (e.g. local disk) where close can fail.
    pub fn close(&self, fd: u32) -> Result<(), Error> {
        let handle = self.fds.retire(fd)?;
        let mounts = self.mounts.read().unwrap();
        let resolved = mounts.resolve(&handle.path)?;
        let mut file = resolved
            .backend
            .open_file(&resolved.backend_path, handle.flags)
            .map_err(|e| e.rewrite_path(std::path::Path::new(&handle.path)))?;
        file.close().map_err(|e| e.rewrite_path(std::path::Path::new(&handle.path)))
    }

    // ---- whole-file read/write ---------------------------------------

    /// `read_file(path, {flag='r'})`: open, read the whole file, close.
    pub fn read_file(&self, path: &str) -> Result<Vec<u8>, Error> {
        let ctx = self.new_context();
        self.read_file_as(&ctx, path)
    }

    /// `read_file`, run as `ctx`.
    pub fn read_file_as(&self, ctx: &Context, path: &str) -> Result<Vec<u8>, Error> {
        let result = self.read_file_inner(path, ctx);
        self.finish(ctx);
        result
    }

    fn read_file_inner(&self, path: &str, ctx: &Context) -> Result<Vec<u8>, Error> {
        let normalized = path::normalize(path)?;
        let real = self.realpath(&normalized, ctx)?;
        let stats = self.stat_cached(&real, ctx)?;
        if stats.is_dir() {
            return Err(Error::new(Errno::IsDir, "read").with_path(&normalized));
        }
        self.check_access(stats.permission_bits(), stats.uid, stats.gid, crate::stat::R_OK, ctx)?;
        let mounts = self.mounts.read().unwrap();
        let resolved = mounts.resolve(&real)?;
        let file = resolved
            .backend
            .open_file(&resolved.backend_path, crate::flags::parse_str_flag("r")?)
            .map_err(|e| e.rewrite_path(std::path::Path::new(&normalized)))?;
        let bytes = file
            .read_at(0, stats.size as usize)
            .map_err(|e| e.rewrite_path(std::path::Path::new(&normalized)))?;
        Ok(bytes)
    }

    pub fn read_file_utf8(&self, path: &str) -> Result<String, Error> {
        let bytes = self.read_file(path)?;
        String::from_utf8(bytes)
            .map_err(|_| Error::new(Errno::Inval, "read").with_path(path).with_message("not valid UTF-8"))
    }

    /// `write_file(path, data, {mode=0o644})`: open (creating/truncating),
    /// write at offset 0, emit `'change'`.
    pub fn write_file(&self, path: &str, data: &[u8], mode: u32) -> Result<(), Error> {
        let ctx = self.new_context();
        self.write_file_as(&ctx, path, data, mode)
    }

    /// `write_file`, run as `ctx`.
    pub fn write_file_as(&self, ctx: &Context, path: &str, data: &[u8], mode: u32) -> Result<(), Error> {
        let result = self.write_file_inner(path, data, mode, ctx);
        self.finish(ctx);
        result
    }

    fn write_file_inner(&self, path: &str, data: &[u8], mode: u32, ctx: &Context) -> Result<(), Error> {
        let normalized = path::normalize(path)?;
        let flags = crate::flags::parse_str_flag("w+")?;
        let fd = self.open_inner(&normalized, flags, mode, true, &ctx.indirect())?;
        let result = self.write_at_fd(fd, 0, data);
        self.fds.retire(fd).ok();
        result?;
        self.emitter.notify_change(&normalized);
        Ok(())
    }

    /// `append_file`: like [`Vfs::write_file`] but requires an appendable
    /// handle and writes starting at the handle's current position (EOF).
    pub fn append_file(&self, path: &str, data: &[u8], mode: u32) -> Result<(), Error> {
        let ctx = self.new_context();
        self.append_file_as(&ctx, path, data, mode)
    }

    /// `append_file`, run as `ctx`.
    pub fn append_file_as(&self, ctx: &Context, path: &str, data: &[u8], mode: u32) -> Result<(), Error> {
        let normalized = path::normalize(path)?;
        let flags = crate::flags::parse_str_flag("a")?;
        let fd = self.open_inner(&normalized, flags, mode, true, &ctx.indirect())?;
        let position = self.fds.fd_to_file(fd)?.position;
        let result = self.write_at_fd(fd, position, data);
        self.fds.retire(fd).ok();
        self.finish(ctx);
        result?;
        self.emitter.notify_change(&normalized);
        Ok(())
    }

    fn write_at_fd(&self, fd: u32, offset: u64, data: &[u8]) -> Result<(), Error> {
        let mut handle = self.fds.fd_to_file(fd)?;
        handle.require_writable()?;
        let mounts = self.mounts.read().unwrap();
        let resolved = mounts.resolve(&handle.path)?;
        if resolved.backend.capabilities().read_only {
            return Err(Error::new(Errno::RoFs, "write").with_path(&handle.path));
        }
        let mut file = resolved
            .backend
            .open_file(&resolved.backend_path, handle.flags)
            .map_err(|e| e.rewrite_path(std::path::Path::new(&handle.path)))?;
        let written = file
            .write_at(offset, data)
            .map_err(|e| e.rewrite_path(std::path::Path::new(&handle.path)))?;
        let _ = file.close();
        handle.position = offset + written as u64;
        self.fds.with_file_mut(fd, |h| h.position = handle.position)?;
        Ok(())
    }

    // ---- readv / writev ------------------------------------------------

    /// Loop over `bufs`, reading each into place starting at `position`
    /// (or the handle's current position), each element advancing the
    /// cursor by its own length.
    pub fn readv(&self, fd: u32, bufs: &mut [Vec<u8>], position: Option<u64>) -> Result<usize, Error> {
        let mut handle = self.fds.fd_to_file(fd)?;
        handle.require_readable()?;
        let mounts = self.mounts.read().unwrap();
        let resolved = mounts.resolve(&handle.path)?;
        let file = resolved
            .backend
            .open_file(&resolved.backend_path, handle.flags)
            .map_err(|e| e.rewrite_path(std::path::Path::new(&handle.path)))?;
        let mut cursor = position.unwrap_or(handle.position);
        let mut total = 0usize;
        for buf in bufs.iter_mut() {
            let chunk = file
                .read_at(cursor, buf.len())
                .map_err(|e| e.rewrite_path(std::path::Path::new(&handle.path)))?;
            total += chunk.len();
            cursor += chunk.len() as u64;
            *buf = chunk;
        }
        if position.is_none() {
            self.fds.with_file_mut(fd, |h| h.position = cursor)?;
        }
        Ok(total)
    }

    pub fn writev(&self, fd: u32, bufs: &[&[u8]], position: Option<u64>) -> Result<usize, Error> {
        let mut handle = self.fds.fd_to_file(fd)?;
        handle.require_writable()?;
        let mounts = self.mounts.read().unwrap();
        let resolved = mounts.resolve(&handle.path)?;
        let mut file = resolved
            .backend
            .open_file(&resolved.backend_path, handle.flags)
            .map_err(|e| e.rewrite_path(std::path::Path::new(&handle.path)))?;
        let mut cursor = position.unwrap_or(handle.position);
        let mut total = 0usize;
        for buf in bufs {
            let written = file
                .write_at(cursor, buf)
                .map_err(|e| e.rewrite_path(std::path::Path::new(&handle.path)))?;
            total += written;
            cursor += written as u64;
        }
        let _ = file.close();
        if position.is_none() {
            self.fds.with_file_mut(fd, |h| h.position = cursor)?;
        }
        Ok(total)
    }

    // ---- rename / unlink / rmdir / mkdir -------------------------------

    /// `rename(old, new)`: same-backend delegates; cross-backend copies
    /// then unlinks the source.
    pub fn rename(&self, old: &str, new: &str) -> Result<(), Error> {
        let ctx = self.new_context();
        self.rename_as(&ctx, old, new)
    }

    /// `rename`, run as `ctx`.
    pub fn rename_as(&self, ctx: &Context, old: &str, new: &str) -> Result<(), Error> {
        let result = self.rename_inner(old, new, ctx);
        self.finish(ctx);
        result
    }

    fn rename_inner(&self, old: &str, new: &str, ctx: &Context) -> Result<(), Error> {
        let old_norm = path::normalize(old)?;
        let new_norm = path::normalize(new)?;
        let old_real = self.realpath(&old_norm, ctx)?;
        let new_real = self.realpath(&new_norm, ctx)?;

        let old_parent = self.stat_cached(&path::parse(&old_real).dir, ctx)?;
        self.check_access(old_parent.permission_bits(), old_parent.uid, old_parent.gid, crate::stat::W_OK, ctx)?;

        let mounts = self.mounts.read().unwrap();
        let src = mounts.resolve(&old_real)?;
        let dst = mounts.resolve(&new_real)?;
        if src.backend.capabilities().read_only {
            return Err(Error::new(Errno::RoFs, "rename").with_path(&old_norm));
        }

        if std::sync::Arc::ptr_eq(&src.backend, &dst.backend) {
            src.backend
                .rename(&src.backend_path, &dst.backend_path)
                .map_err(|e| e.rewrite_path(std::path::Path::new(&old_norm)))?;
            self.emitter.notify_rename(&old_norm);
            self.emitter.notify_change(&new_norm);
        } else {
            drop(mounts);
            let data = self.read_file_inner(&old_real, &ctx.indirect())?;
            self.write_file_inner(&new_real, &data, 0o644, &ctx.indirect())?;
            self.unlink_inner(&old_real, &ctx.indirect())?;
        }
        Ok(())
    }

    pub fn unlink(&self, path: &str) -> Result<(), Error> {
        let ctx = self.new_context();
        self.unlink_as(&ctx, path)
    }

    /// `unlink`, run as `ctx`.
    pub fn unlink_as(&self, ctx: &Context, path: &str) -> Result<(), Error> {
        let result = self.unlink_inner(path, ctx);
        self.finish(ctx);
        result
    }

    fn unlink_inner(&self, path: &str, ctx: &Context) -> Result<(), Error> {
        let normalized = path::normalize(path)?;
        let real = self.realpath(&normalized, ctx)?;
        let parent_stats = self.stat_cached(&path::parse(&real).dir, ctx)?;
        self.check_access(parent_stats.permission_bits(), parent_stats.uid, parent_stats.gid, crate::stat::W_OK, ctx)?;
        let mounts = self.mounts.read().unwrap();
        let resolved = mounts.resolve(&real)?;
        if resolved.backend.capabilities().read_only {
            return Err(Error::new(Errno::RoFs, "unlink").with_path(&normalized));
        }
        resolved
            .backend
            .unlink(&resolved.backend_path)
            .map_err(|e| e.rewrite_path(std::path::Path::new(&normalized)))?;
        self.emitter.notify_rename(&normalized);
        Ok(())
    }

    pub fn rmdir(&self, path: &str) -> Result<(), Error> {
        let ctx = self.new_context();
        self.rmdir_as(&ctx, path)
    }

    /// `rmdir`, run as `ctx`.
    pub fn rmdir_as(&self, ctx: &Context, path: &str) -> Result<(), Error> {
        let result = self.rmdir_inner(path, ctx);
        self.finish(ctx);
        result
    }

    fn rmdir_inner(&self, path: &str, ctx: &Context) -> Result<(), Error> {
        let normalized = path::normalize(path)?;
        let real = self.realpath(&normalized, ctx)?;
        let stats = self.stat_cached(&real, ctx)?;
        if !stats.is_dir() {
            return Err(Error::new(Errno::NotDir, "rmdir").with_path(&normalized));
        }
        let parent_stats = self.stat_cached(&path::parse(&real).dir, ctx)?;
        self.check_access(parent_stats.permission_bits(), parent_stats.uid, parent_stats.gid, crate::stat::W_OK, ctx)?;
        let mounts = self.mounts.read().unwrap();
        let resolved = mounts.resolve(&real)?;
        if resolved.backend.capabilities().read_only {
            return Err(Error::new(Errno::RoFs, "rmdir").with_path(&normalized));
        }
        resolved
            .backend
            .rmdir(&resolved.backend_path)
            .map_err(|e| e.rewrite_path(std::path::Path::new(&normalized)))?;
        self.emitter.notify_rename(&normalized);
        Ok(())
    }

    /// `mkdir(path, {mode, recursive})`.
    pub fn mkdir(&self, path: &str, opts: MkdirOptions) -> Result<Option<String>, Error> {
        let ctx = self.new_context();
        self.mkdir_as(&ctx, path, opts)
    }

    /// `mkdir`, run as `ctx`.
    pub fn mkdir_as(&self, ctx: &Context, path: &str, opts: MkdirOptions) -> Result<Option<String>, Error> {
        let result = self.mkdir_inner(path, opts, ctx);
        self.finish(ctx);
        result
    }

    fn mkdir_inner(&self, path: &str, opts: MkdirOptions, ctx: &Context) -> Result<Option<String>, Error> {
        let normalized = path::normalize(path)?;
        if !opts.recursive {
            let parsed = path::parse(&normalized);
            let parent_stats = self.stat_cached(&parsed.dir, ctx)?;
            if !parent_stats.is_dir() {
                return Err(Error::new(Errno::NotDir, "mkdir").with_path(&parsed.dir));
            }
            self.check_access(parent_stats.permission_bits(), parent_stats.uid, parent_stats.gid, crate::stat::W_OK, ctx)?;
            let mounts = self.mounts.read().unwrap();
            let resolved = mounts.resolve(&normalized)?;
            if resolved.backend.capabilities().read_only {
                return Err(Error::new(Errno::RoFs, "mkdir").with_path(&normalized));
            }
            resolved
                .backend
                .mkdir(&resolved.backend_path, opts.mode)
                .map_err(|e| e.rewrite_path(std::path::Path::new(&normalized)))?;
            drop(mounts);
            self.emitter.notify_rename(&normalized);
            return Ok(None);
        }

        let mut missing = Vec::new();
        let mut cursor = normalized.clone();
        loop {
            match self.stat_cached(&cursor, &ctx.indirect()) {
                Ok(stats) => {
                    if !stats.is_dir() {
                        return Err(Error::new(Errno::NotDir, "mkdir").with_path(&cursor));
                    }
                    self.check_access(stats.permission_bits(), stats.uid, stats.gid, crate::stat::W_OK, ctx)?;
                    break;
                }
                Err(e) if e.is_not_found() => {
                    missing.push(cursor.clone());
                    if cursor == "/" {
                        break;
                    }
                    cursor = path::dirname(&cursor);
                }
                Err(e) => return Err(e),
            }
        }
        missing.reverse();
        for dir in &missing {
            let mounts = self.mounts.read().unwrap();
            let resolved = mounts.resolve(dir)?;
            if resolved.backend.capabilities().read_only {
                return Err(Error::new(Errno::RoFs, "mkdir").with_path(dir));
            }
            resolved
                .backend
                .mkdir(&resolved.backend_path, opts.mode)
                .map_err(|e| e.rewrite_path(std::path::Path::new(dir)))?;
            drop(mounts);
            self.emitter.notify_rename(dir);
        }
        Ok(missing.into_iter().next())
    }

    // ---- stat family ---------------------------------------------------

    pub fn stat(&self, path: &str) -> Result<Stats, Error> {
        let ctx = self.new_context();
        self.stat_as(&ctx, path)
    }

    /// `stat`, run as `ctx`.
    pub fn stat_as(&self, ctx: &Context, path: &str) -> Result<Stats, Error> {
        let normalized = path::normalize(path)?;
        let real = self.realpath(&normalized, ctx)?;
        let result = self.stat_cached(&real, ctx);
        self.finish(ctx);
        result.map_err(|e| e.rewrite_path(std::path::Path::new(&normalized)))
    }

    pub fn lstat(&self, path: &str) -> Result<Stats, Error> {
        let ctx = self.new_context();
        self.lstat_as(&ctx, path)
    }

    /// `lstat`, run as `ctx`.
    pub fn lstat_as(&self, ctx: &Context, path: &str) -> Result<Stats, Error> {
        let normalized = path::normalize(path)?;
        let result = self.stat_cached(&normalized, ctx);
        self.finish(ctx);
        result
    }

    pub fn fstat(&self, fd: u32) -> Result<Stats, Error> {
        let ctx = self.new_context();
        self.fstat_as(&ctx, fd)
    }

    /// `fstat`, run as `ctx`.
    pub fn fstat_as(&self, ctx: &Context, fd: u32) -> Result<Stats, Error> {
        let handle = self.fds.fd_to_file(fd)?;
        let result = self.stat_cached(&handle.path, ctx);
        self.finish(ctx);
        result
    }

    // ---- link / symlink / readlink -------------------------------------

    /// `link(target, link_path)`: both must resolve within the same
    /// backend (else `EXDEV`).
    pub fn link(&self, target: &str, link_path: &str) -> Result<(), Error> {
        let ctx = self.new_context();
        self.link_as(&ctx, target, link_path)
    }

    /// `link`, run as `ctx`.
    pub fn link_as(&self, ctx: &Context, target: &str, link_path: &str) -> Result<(), Error> {
        let target_norm = path::normalize(target)?;
        let link_norm = path::normalize(link_path)?;
        let target_real = self.realpath(&target_norm, ctx)?;
        let target_stats = self.stat_cached(&target_real, ctx)?;
        self.check_access(target_stats.permission_bits(), target_stats.uid, target_stats.gid, crate::stat::R_OK, ctx)?;
        let link_parent_stats = self.stat_cached(&path::dirname(&link_norm), ctx)?;
        self.check_access(link_parent_stats.permission_bits(), link_parent_stats.uid, link_parent_stats.gid, crate::stat::W_OK, ctx)?;

        let mounts = self.mounts.read().unwrap();
        let src = mounts.resolve(&target_real)?;
        let dst = mounts.resolve(&link_norm)?;
        if !Arc::ptr_eq(&src.backend, &dst.backend) {
            return Err(Error::new(Errno::XDev, "link").with_path(&link_norm));
        }
        if !src.backend.capabilities().supports_links {
            return Err(Error::new(Errno::Perm, "link").with_path(&link_norm));
        }
        src.backend
            .link(&src.backend_path, &dst.backend_path)
            .map_err(|e| e.rewrite_path(std::path::Path::new(&link_norm)))?;
        drop(mounts);
        self.finish(ctx);
        self.emitter.notify_rename(&link_norm);
        Ok(())
    }

    /// `symlink(target, link_path, type)`: writes `target` as the new
    /// file's body, then marks it with the symlink mode bit.
    pub fn symlink(&self, target: &str, link_path: &str, kind: SymlinkType) -> Result<(), Error> {
        let ctx = self.new_context();
        self.symlink_as(&ctx, target, link_path, kind)
    }

    /// `symlink`, run as `ctx`.
    pub fn symlink_as(&self, ctx: &Context, target: &str, link_path: &str, _kind: SymlinkType) -> Result<(), Error> {
        let link_norm = path::normalize(link_path)?;
        if self.stat_cached(&link_norm, ctx).is_ok() {
            self.finish(ctx);
            return Err(Error::new(Errno::Exist, "symlink").with_path(&link_norm));
        }
        self.write_file_inner(&link_norm, target.as_bytes(), 0o644, &ctx.indirect())?;
        let mounts = self.mounts.read().unwrap();
        let resolved = mounts.resolve(&link_norm)?;
        resolved
            .backend
            .chmod(&resolved.backend_path, S_IFLNK | 0o777)
            .map_err(|e| e.rewrite_path(std::path::Path::new(&link_norm)))?;
        drop(mounts);
        self.finish(ctx);
        Ok(())
    }

    /// `readlink(path, encoding)`: read the symlink body without
    /// following it.
    pub fn readlink(&self, path: &str) -> Result<String, Error> {
        let ctx = self.new_context();
        self.readlink_as(&ctx, path)
    }

    /// `readlink`, run as `ctx`.
    pub fn readlink_as(&self, ctx: &Context, path: &str) -> Result<String, Error> {
        let normalized = path::normalize(path)?;
        let stats = self.stat_cached(&normalized, ctx)?;
        if !stats.is_symlink() {
            self.finish(ctx);
            return Err(Error::new(Errno::Inval, "readlink").with_path(&normalized));
        }
        let bytes = self.read_file_inner(&normalized, &ctx.indirect())?;
        self.finish(ctx);
        String::from_utf8(bytes)
            .map_err(|_| Error::new(Errno::Inval, "readlink").with_path(&normalized).with_message("not valid UTF-8"))
    }

    // ---- chmod / chown / utimes family ----------------------------------

    pub fn chmod(&self, path: &str, mode: u32) -> Result<(), Error> {
        let ctx = self.new_context();
        self.chmod_resolved(path, mode, true, &ctx)
    }

    /// `chmod`, run as `ctx`.
    pub fn chmod_as(&self, ctx: &Context, path: &str, mode: u32) -> Result<(), Error> {
        self.chmod_resolved(path, mode, true, ctx)
    }

    pub fn lchmod(&self, path: &str, mode: u32) -> Result<(), Error> {
        let ctx = self.new_context();
        self.chmod_resolved(path, mode, false, &ctx)
    }

    /// `lchmod`, run as `ctx`.
    pub fn lchmod_as(&self, ctx: &Context, path: &str, mode: u32) -> Result<(), Error> {
        self.chmod_resolved(path, mode, false, ctx)
    }

    /// Shared `chmod`/`lchmod` body. Per §4.H, "`chmod` ... open[s] r+ ...
    /// delegate[s] to the fd variant" — i.e. goes through the same
    /// `R_OK|W_OK` access check as an ordinary `open(path, 'r+')` rather
    /// than mutating the backend unchecked.
    fn chmod_resolved(&self, path: &str, mode: u32, follow: bool, ctx: &Context) -> Result<(), Error> {
        let normalized = path::normalize(path)?;
        let real = if follow { self.realpath(&normalized, ctx)? } else { normalized.clone() };
        let stats = self.stat_cached(&real, ctx)?;
        self.check_access(stats.permission_bits(), stats.uid, stats.gid, crate::flags::parse_str_flag("r+")?.required_access(), ctx)?;
        let type_bits = stats.mode & crate::stat::S_IFMT;
        let mounts = self.mounts.read().unwrap();
        let resolved = mounts.resolve(&real)?;
        resolved
            .backend
            .chmod(&resolved.backend_path, type_bits | (mode & 0o7777))
            .map_err(|e| e.rewrite_path(std::path::Path::new(&normalized)))?;
        drop(mounts);
        self.finish(ctx);
        Ok(())
    }

    pub fn chown(&self, path: &str, uid: u32, gid: u32) -> Result<(), Error> {
        let ctx = self.new_context();
        self.chown_resolved(path, uid, gid, true, &ctx)
    }

    /// `chown`, run as `ctx`.
    pub fn chown_as(&self, ctx: &Context, path: &str, uid: u32, gid: u32) -> Result<(), Error> {
        self.chown_resolved(path, uid, gid, true, ctx)
    }

    pub fn lchown(&self, path: &str, uid: u32, gid: u32) -> Result<(), Error> {
        let ctx = self.new_context();
        self.chown_resolved(path, uid, gid, false, &ctx)
    }

    /// `lchown`, run as `ctx`.
    pub fn lchown_as(&self, ctx: &Context, path: &str, uid: u32, gid: u32) -> Result<(), Error> {
        self.chown_resolved(path, uid, gid, false, ctx)
    }

    fn chown_resolved(&self, path: &str, uid: u32, gid: u32, follow: bool, ctx: &Context) -> Result<(), Error> {
        let normalized = path::normalize(path)?;
        let real = if follow { self.realpath(&normalized, ctx)? } else { normalized.clone() };
        let stats = self.stat_cached(&real, ctx)?;
        self.check_access(stats.permission_bits(), stats.uid, stats.gid, crate::flags::parse_str_flag("r+")?.required_access(), ctx)?;
        let mounts = self.mounts.read().unwrap();
        let resolved = mounts.resolve(&real)?;
        resolved
            .backend
            .chown(&resolved.backend_path, uid, gid)
            .map_err(|e| e.rewrite_path(std::path::Path::new(&normalized)))?;
        drop(mounts);
        self.finish(ctx);
        Ok(())
    }

    pub fn utimes(&self, path: &str, atime: Timestamp, mtime: Timestamp) -> Result<(), Error> {
        let ctx = self.new_context();
        self.utimes_resolved(path, atime, mtime, true, &ctx)
    }

    /// `utimes`, run as `ctx`.
    pub fn utimes_as(&self, ctx: &Context, path: &str, atime: Timestamp, mtime: Timestamp) -> Result<(), Error> {
        self.utimes_resolved(path, atime, mtime, true, ctx)
    }

    pub fn lutimes(&self, path: &str, atime: Timestamp, mtime: Timestamp) -> Result<(), Error> {
        let ctx = self.new_context();
        self.utimes_resolved(path, atime, mtime, false, &ctx)
    }

    /// `lutimes`, run as `ctx`.
    pub fn lutimes_as(&self, ctx: &Context, path: &str, atime: Timestamp, mtime: Timestamp) -> Result<(), Error> {
        self.utimes_resolved(path, atime, mtime, false, ctx)
    }

    fn utimes_resolved(&self, path: &str, atime: Timestamp, mtime: Timestamp, follow: bool, ctx: &Context) -> Result<(), Error> {
        let normalized = path::normalize(path)?;
        let real = if follow { self.realpath(&normalized, ctx)? } else { normalized.clone() };
        let stats = self.stat_cached(&real, ctx)?;
        self.check_access(stats.permission_bits(), stats.uid, stats.gid, crate::flags::parse_str_flag("r+")?.required_access(), ctx)?;
        let mounts = self.mounts.read().unwrap();
        let resolved = mounts.resolve(&real)?;
        resolved
            .backend
            .utimes(&resolved.backend_path, atime, mtime)
            .map_err(|e| e.rewrite_path(std::path::Path::new(&normalized)))?;
        drop(mounts);
        self.finish(ctx);
        Ok(())
    }

    // ---- truncate -------------------------------------------------------

    pub fn truncate(&self, path: &str, len: i64) -> Result<(), Error> {
        let ctx = self.new_context();
        self.truncate_as(&ctx, path, len)
    }

    /// `truncate`, run as `ctx`.
    pub fn truncate_as(&self, ctx: &Context, path: &str, len: i64) -> Result<(), Error> {
        if len < 0 {
            return Err(Error::new(Errno::Inval, "truncate").with_path(path));
        }
        let normalized = path::normalize(path)?;
        let real = self.realpath(&normalized, ctx)?;
        let stats = self.stat_cached(&real, ctx)?;
        self.check_access(stats.permission_bits(), stats.uid, stats.gid, crate::flags::parse_str_flag("r+")?.required_access(), ctx)?;
        let mounts = self.mounts.read().unwrap();
        let resolved = mounts.resolve(&real)?;
        let mut file = resolved
            .backend
            .open_file(&resolved.backend_path, crate::flags::parse_str_flag("r+")?)
            .map_err(|e| e.rewrite_path(std::path::Path::new(&normalized)))?;
        file.truncate(len as u64).map_err(|e| e.rewrite_path(std::path::Path::new(&normalized)))?;
        let _ = file.close();
        drop(mounts);
        self.finish(ctx);
        Ok(())
    }

    pub fn ftruncate(&self, fd: u32, len: i64) -> Result<(), Error> {
        if len < 0 {
            return Err(Error::new(Errno::Inval, "ftruncate"));
        }
        let handle = self.fds.fd_to_file(fd)?;
        let mounts = self.mounts.read().unwrap();
        let resolved = mounts.resolve(&handle.path)?;
        let mut file = resolved
            .backend
            .open_file(&resolved.backend_path, handle.flags)
            .map_err(|e| e.rewrite_path(std::path::Path::new(&handle.path)))?;
        file.truncate(len as u64).map_err(|e| e.rewrite_path(std::path::Path::new(&handle.path)))?;
        let _ = file.close();
        Ok(())
    }

    // ---- rm ---------------------------------------------------------------

    /// `rm(path, {recursive, force})`.
    pub fn rm(&self, path: &str, opts: RmOptions) -> Result<(), Error> {
        let ctx = self.new_context();
        self.rm_as(&ctx, path, opts)
    }

    /// `rm`, run as `ctx`.
    pub fn rm_as(&self, ctx: &Context, path: &str, opts: RmOptions) -> Result<(), Error> {
        let result = self.rm_inner(path, opts, ctx);
        self.finish(ctx);
        result
    }

    fn rm_inner(&self, path: &str, opts: RmOptions, ctx: &Context) -> Result<(), Error> {
        let normalized = path::normalize(path)?;
        let stats = match self.stat_cached(&normalized, ctx) {
            Ok(stats) => stats,
            Err(e) if e.is_not_found() => {
                return if opts.force { Ok(()) } else { Err(e) };
            }
            Err(e) => return Err(e),
        };

        if stats.is_dir() {
            if opts.recursive {
                let entries = self.readdir_inner(
                    &normalized,
                    ReaddirOptions { with_file_types: true, recursive: false },
                    &ctx.indirect(),
                )?;
                for entry in entries {
                    let child = path::join(&[&normalized, &entry.name])?;
                    self.rm_inner(&child, opts, &ctx.indirect())?;
                }
            }
            self.rmdir_inner(&normalized, &ctx.indirect())
        } else if stats.is_file() || stats.is_symlink() || stats.is_block_device() || stats.is_char_device() {
            self.unlink_inner(&normalized, &ctx.indirect())
        } else {
            Err(Error::new(Errno::Perm, "rm").with_path(&normalized))
        }
    }

    // ---- mkdtemp / statfs / opendir -----------------------------------

    /// `mkdtemp(prefix)`: create `prefix<unique suffix>` under `/tmp` and
    /// return its path. `suffix` is supplied by the caller since this
    /// crate avoids hidden randomness/clock reads (see module docs).
    pub fn mkdtemp(&self, prefix: &str, suffix: &str) -> Result<String, Error> {
        let path = path::join(&["/tmp", &format!("{prefix}{suffix}")])?;
        self.mkdir(&path, MkdirOptions { mode: 0o700, recursive: true })?;
        Ok(path)
    }

    /// `mkdtemp`, run as `ctx`.
    pub fn mkdtemp_as(&self, ctx: &Context, prefix: &str, suffix: &str) -> Result<String, Error> {
        let path = path::join(&["/tmp", &format!("{prefix}{suffix}")])?;
        self.mkdir_as(ctx, &path, MkdirOptions { mode: 0o700, recursive: true })?;
        Ok(path)
    }

    pub fn statfs(&self, path: &str) -> Result<StatFs, Error> {
        let normalized = path::normalize(path)?;
        let mounts = self.mounts.read().unwrap();
        let resolved = mounts.resolve(&normalized)?;
        let caps = resolved.backend.capabilities();
        Ok(StatFs { read_only: caps.read_only, supports_links: caps.supports_links })
    }

    /// `opendir(path)`: a [`Dir`] iterator snapshotting `readdir` at
    /// construction time.
    pub fn opendir(&self, path: &str) -> Result<Dir, Error> {
        let entries = self.readdir(path, ReaddirOptions::default())?;
        Ok(Dir::new(entries))
    }

    /// `opendir`, run as `ctx`.
    pub fn opendir_as(&self, ctx: &Context, path: &str) -> Result<Dir, Error> {
        let entries = self.readdir_as(ctx, path, ReaddirOptions::default())?;
        Ok(Dir::new(entries))
    }

    pub(crate) fn readdir_inner(
        &self,
        path: &str,
        opts: ReaddirOptions,
        ctx: &Context,
    ) -> Result<Vec<crate::backend::DirEntry>, Error> {
        let stats = self.stat_cached(path, ctx)?;
        if !stats.is_dir() {
            return Err(Error::new(Errno::NotDir, "readdir").with_path(path));
        }
        self.check_access(stats.permission_bits(), stats.uid, stats.gid, crate::stat::R_OK, ctx)?;
        let mounts = self.mounts.read().unwrap();
        let resolved = mounts.resolve(path)?;
        let mut entries = resolved
            .backend
            .readdir(&resolved.backend_path)
            .map_err(|e| e.rewrite_path(std::path::Path::new(path)))?;
        drop(mounts);
        for entry in &entries {
            let child = path::join(&[path, &entry.name])?;
            ctx.cache.put_stats(&child, entry.stats);
        }

        if opts.recursive {
            let mut flattened = Vec::new();
            for entry in entries.drain(..) {
                let is_dir = entry.stats.is_dir();
                flattened.push(entry.clone());
                if is_dir {
                    let child_path = path::join(&[path, &entry.name])?;
                    let nested = self.readdir_inner(&child_path, opts, &ctx.indirect())?;
                    for mut nested_entry in nested {
                        nested_entry.name = format!("{}/{}", entry.name, nested_entry.name);
                        flattened.push(nested_entry);
                    }
                }
            }
            entries = flattened;
        }

        Ok(entries)
    }

    /// `readdir(path, {with_file_types, recursive})`.
    pub fn readdir(&self, path: &str, opts: ReaddirOptions) -> Result<Vec<crate::backend::DirEntry>, Error> {
        let ctx = self.new_context();
        self.readdir_as(&ctx, path, opts)
    }

    /// `readdir`, run as `ctx`.
    pub fn readdir_as(&self, ctx: &Context, path: &str, opts: ReaddirOptions) -> Result<Vec<crate::backend::DirEntry>, Error> {
        let normalized = path::normalize(path)?;
        let result = self.readdir_inner(&normalized, opts, ctx);
        self.finish(ctx);
        result
    }

    // ---- cp / copy_file --------------------------------------------------

    pub fn cp(&self, src: &str, dst: &str, opts: CopyOptions) -> Result<(), Error> {
        let ctx = self.new_context();
        self.cp_as(&ctx, src, dst, opts)
    }

    /// `cp`, run as `ctx`.
    pub fn cp_as(&self, ctx: &Context, src: &str, dst: &str, opts: CopyOptions) -> Result<(), Error> {
        let result = copy::cp(self, src, dst, opts, ctx);
        self.finish(ctx);
        result
    }

    pub fn copy_file(&self, src: &str, dst: &str, excl: bool) -> Result<(), Error> {
        let ctx = self.new_context();
        self.copy_file_as(&ctx, src, dst, excl)
    }

    /// `copy_file`, run as `ctx`.
    pub fn copy_file_as(&self, ctx: &Context, src: &str, dst: &str, excl: bool) -> Result<(), Error> {
        let result = copy::copy_file(self, src, dst, excl, ctx);
        self.finish(ctx);
        result
    }
}

/// The answer to [`Vfs::statfs`]: just enough of `struct statvfs` to be
/// useful without fabricating block counts no backend here actually has.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatFs {
    pub read_only: bool,
    pub supports_links: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;
    use crate::flags::parse_str_flag;

    fn fs() -> Vfs {
        Vfs::new(MemoryBackend::new())
    }

    // §8 scenario 1: write then read back a file, size matches.
    #[test]
    fn write_then_read_round_trips_with_matching_size() {
        let vfs = fs();
        vfs.write_file("/greeting.txt", b"hello, world", 0o644).unwrap();
        let data = vfs.read_file("/greeting.txt").unwrap();
        assert_eq!(data, b"hello, world");
        assert_eq!(vfs.stat("/greeting.txt").unwrap().size, data.len() as u64);
    }

    // §8 scenario 2: mixed read-only + writable mount.
    #[test]
    fn copy_from_read_only_mount_to_writable_mount_succeeds_write_back_fails() {
        let vfs = fs();
        let ro = crate::backend::HttpIndexedBackend::from_listing_json(
            r#"{"a.txt": null}"#,
            "https://example.com",
        )
        .unwrap();
        ro.preload_file("/a.txt", b"from the archive".to_vec()).unwrap();
        vfs.mount("/ro", ro).unwrap();
        vfs.mkdir("/rw", MkdirOptions::default()).unwrap();

        vfs.copy_file("/ro/a.txt", "/rw/a.txt", false).unwrap();
        assert_eq!(vfs.read_file("/rw/a.txt").unwrap(), b"from the archive");

        let err = vfs.write_file("/ro/a.txt", b"nope", 0o644).unwrap_err();
        assert_eq!(err.errno, Errno::RoFs);
    }

    // §8 scenario 3: symlink / readlink / stat / lstat round trip.
    #[test]
    fn symlink_readlink_and_stat_family_agree() {
        let vfs = fs();
        vfs.write_file("/target.txt", b"payload", 0o644).unwrap();
        vfs.symlink("/target.txt", "/link.txt", SymlinkType::File).unwrap();

        assert_eq!(vfs.readlink("/link.txt").unwrap(), "/target.txt");
        assert!(vfs.lstat("/link.txt").unwrap().is_symlink());
        assert!(!vfs.stat("/link.txt").unwrap().is_symlink());
        assert_eq!(vfs.read_file("/link.txt").unwrap(), b"payload");
    }

    // §8 scenario 4: recursive mkdir creates the full ancestor chain and
    // returns the first directory it had to create.
    #[test]
    fn recursive_mkdir_creates_full_ancestor_chain() {
        let vfs = fs();
        let first_created = vfs.mkdir("/a/b/c", MkdirOptions { mode: 0o755, recursive: true }).unwrap();
        assert_eq!(first_created.as_deref(), Some("/a"));
        assert!(vfs.stat("/a").unwrap().is_dir());
        assert!(vfs.stat("/a/b").unwrap().is_dir());
        assert!(vfs.stat("/a/b/c").unwrap().is_dir());
    }

    // §8 scenario 5: recursive rm, then rm again without/with force.
    #[test]
    fn recursive_rm_then_rm_again_respects_force() {
        let vfs = fs();
        vfs.mkdir("/a/b", MkdirOptions { mode: 0o755, recursive: true }).unwrap();
        vfs.write_file("/a/b/file.txt", b"x", 0o644).unwrap();

        vfs.rm("/a", RmOptions { recursive: true, force: false }).unwrap();
        assert_eq!(vfs.stat("/a").unwrap_err().errno, Errno::NoEnt);

        let err = vfs.rm("/a", RmOptions { recursive: true, force: false }).unwrap_err();
        assert_eq!(err.errno, Errno::NoEnt);
        vfs.rm("/a", RmOptions { recursive: true, force: true }).unwrap();
    }

    // §8 scenario 6: exclusive create on an existing file, read of a
    // missing path, and open of a directory all fail with the right errno
    // (the last of these is the EISDIR dispatch-layer fix).
    #[test]
    fn open_errors_match_flag_and_node_kind() {
        let vfs = fs();
        vfs.write_file("/exists.txt", b"x", 0o644).unwrap();
        vfs.mkdir("/d", MkdirOptions::default()).unwrap();

        let err = vfs.open("/exists.txt", parse_str_flag("wx").unwrap(), 0o644, true).unwrap_err();
        assert_eq!(err.errno, Errno::Exist);

        let err = vfs.open("/missing", parse_str_flag("r").unwrap(), 0, true).unwrap_err();
        assert_eq!(err.errno, Errno::NoEnt);

        let err = vfs.open("/d", parse_str_flag("r").unwrap(), 0, true).unwrap_err();
        assert_eq!(err.errno, Errno::IsDir);
    }

    #[test]
    fn rename_across_backends_copies_then_unlinks_source() {
        let vfs = fs();
        vfs.mount("/other", MemoryBackend::new()).unwrap();
        vfs.write_file("/a.txt", b"cross-backend", 0o644).unwrap();
        vfs.rename("/a.txt", "/other/a.txt").unwrap();
        assert_eq!(vfs.stat("/a.txt").unwrap_err().errno, Errno::NoEnt);
        assert_eq!(vfs.read_file("/other/a.txt").unwrap(), b"cross-backend");
    }

    #[test]
    fn readdir_recursive_flattens_nested_paths() {
        let vfs = fs();
        vfs.mkdir("/a/b", MkdirOptions { mode: 0o755, recursive: true }).unwrap();
        vfs.write_file("/a/top.txt", b"1", 0o644).unwrap();
        vfs.write_file("/a/b/nested.txt", b"2", 0o644).unwrap();

        let entries = vfs.readdir("/a", ReaddirOptions { with_file_types: true, recursive: true }).unwrap();
        let names: Vec<_> = entries.iter().map(|e| e.name.as_str()).collect();
        assert!(names.contains(&"top.txt"));
        assert!(names.contains(&"b/nested.txt"));
    }

    // Regression test for the maintainer-review fix: chmod/chown/utimes
    // must run the same access check as an ordinary `open(path, 'r+')`
    // rather than mutating the backend unconditionally.
    #[test]
    fn chmod_chown_utimes_deny_a_caller_without_write_access() {
        let vfs = fs();
        vfs.write_file("/owned.txt", b"x", 0o600).unwrap();
        vfs.chown("/owned.txt", 42, 42).unwrap();

        let intruder = Context::new(7, 7);
        let err = vfs.chmod_as(&intruder, "/owned.txt", 0o666).unwrap_err();
        assert_eq!(err.errno, Errno::Access);
        let err = vfs.chown_as(&intruder, "/owned.txt", 7, 7).unwrap_err();
        assert_eq!(err.errno, Errno::Access);
        let t = Timestamp::now();
        let err = vfs.utimes_as(&intruder, "/owned.txt", t, t).unwrap_err();
        assert_eq!(err.errno, Errno::Access);

        let owner = Context::new(42, 42);
        vfs.chmod_as(&owner, "/owned.txt", 0o666).unwrap();
    }

    #[test]
    fn open_as_honors_the_passed_context_rather_than_the_default_identity() {
        let vfs = fs();
        vfs.write_file("/secret.txt", b"x", 0o600).unwrap();
        vfs.chown("/secret.txt", 9, 9).unwrap();

        let other = Context::new(1, 1);
        let err =
            vfs.open_as(&other, "/secret.txt", parse_str_flag("r").unwrap(), 0, true).unwrap_err();
        assert_eq!(err.errno, Errno::Access);

        let owner = Context::new(9, 9);
        let fd = vfs.open_as(&owner, "/secret.txt", parse_str_flag("r").unwrap(), 0, true).unwrap();
        vfs.close(fd).unwrap();
    }

    // Regression test for the maintainer-review fix: a flag/operation
    // mismatch on an fd must surface EACCES (SPEC_FULL.md: "writing to a
    // file opened `r` → EACCES"), not EINVAL.
    #[test]
    fn writev_on_read_only_fd_and_readv_on_write_only_fd_fail_with_eacces() {
        let vfs = fs();
        vfs.write_file("/a.txt", b"hello", 0o644).unwrap();

        let ro_fd = vfs.open("/a.txt", parse_str_flag("r").unwrap(), 0, true).unwrap();
        let err = vfs.writev(ro_fd, &[b"x".as_slice()], None).unwrap_err();
        assert_eq!(err.errno, Errno::Access);
        vfs.close(ro_fd).unwrap();

        let wo_fd = vfs.open("/a.txt", parse_str_flag("a").unwrap(), 0, true).unwrap();
        let mut bufs = vec![vec![0u8; 5]];
        let err = vfs.readv(wo_fd, &mut bufs, None).unwrap_err();
        assert_eq!(err.errno, Errno::Access);
        vfs.close(wo_fd).unwrap();
    }
}


#[cfg(test)]
mod close_after_unlink_probe {
    use super::*;
    use crate::backend::MemoryBackend;
    use crate::flags::parse_str_flag;

    #[test]
    fn close_after_unlink_succeeds_like_posix() {
        let vfs = Vfs::new(MemoryBackend::new());
        vfs.write_file("/a.txt", b"hi", 0o644).unwrap();
        let fd = vfs.open("/a.txt", parse_str_flag("r").unwrap(), 0, true).unwrap();
        vfs.unlink("/a.txt").unwrap();
        let res = vfs.close(fd);
        assert!(res.is_ok(), "close after unlink should succeed, got {:?}", res);
    }
}
