//! `cp` and `copy_file`.

use std::sync::Arc;

use super::{MkdirOptions, ReaddirOptions, Vfs};
use crate::context::Context;
use crate::error::{Errno, Error};
use crate::path;

/// A predicate deciding whether a given `(src, dst)` pair should be
/// copied, checked for every entry [`cp`] visits during a recursive copy.
pub type CopyFilter = Arc<dyn Fn(&str, &str) -> bool + Send + Sync>;

/// Options for [`Vfs::cp`].
#[derive(Clone, Default)]
pub struct CopyOptions {
    pub recursive: bool,
    pub error_on_exist: bool,
    pub preserve_timestamps: bool,
    pub filter: Option<CopyFilter>,
}

pub(super) fn cp(vfs: &Vfs, src: &str, dst: &str, opts: CopyOptions, ctx: &Context) -> Result<(), Error> {
    let src_norm = path::normalize(src)?;
    let dst_norm = path::normalize(dst)?;

    if let Some(filter) = &opts.filter {
        if !filter(&src_norm, &dst_norm) {
            return Ok(());
        }
    }

    let src_stats = vfs.stat_cached(&src_norm, ctx)?;

    if opts.error_on_exist && vfs.stat_cached(&dst_norm, &ctx.indirect()).is_ok() {
        return Err(Error::new(Errno::Exist, "cp").with_path(&dst_norm));
    }

    if src_stats.is_dir() {
        if !opts.recursive {
            return Err(Error::new(Errno::IsDir, "cp").with_path(&src_norm));
        }
        vfs.mkdir_inner(&dst_norm, MkdirOptions { mode: src_stats.permission_bits(), recursive: true }, &ctx.indirect())?;
        let entries = vfs.readdir_inner(
            &src_norm,
            ReaddirOptions { with_file_types: true, recursive: false },
            &ctx.indirect(),
        )?;
        for entry in entries {
            let child_src = path::join(&[&src_norm, &entry.name])?;
            let child_dst = path::join(&[&dst_norm, &entry.name])?;
            cp(vfs, &child_src, &child_dst, opts.clone(), &ctx.indirect())?;
        }
    } else if src_stats.is_file() || src_stats.is_symlink() {
        copy_file(vfs, &src_norm, &dst_norm, false, &ctx.indirect())?;
    } else {
        return Err(Error::new(Errno::Perm, "cp").with_path(&src_norm));
    }

    if opts.preserve_timestamps {
        vfs.utimes_as(&ctx.indirect(), &dst_norm, src_stats.atime, src_stats.mtime)?;
    }

    Ok(())
}

pub(super) fn copy_file(vfs: &Vfs, src: &str, dst: &str, excl: bool, ctx: &Context) -> Result<(), Error> {
    let src_norm = path::normalize(src)?;
    let dst_norm = path::normalize(dst)?;

    if excl && vfs.stat_cached(&dst_norm, &ctx.indirect()).is_ok() {
        return Err(Error::new(Errno::Exist, "copy_file").with_path(&dst_norm));
    }

    let data = vfs.read_file_inner(&src_norm, &ctx.indirect())?;
    vfs.write_file_inner(&dst_norm, &data, 0o644, &ctx.indirect())?;
    vfs.emitter.notify_rename(&dst_norm);
    Ok(())
}
