//! Symlink-aware path resolver (component G): `realpath`.

use std::collections::HashSet;

use crate::config::Config;
use crate::context::Context;
use crate::error::{Errno, Error};
use crate::mount::MountTable;
use crate::path;
use crate::stat::Stats;

/// Resolve `path` to its fully-dereferenced absolute form.
///
/// Per §4.G: an `ENOENT` encountered while resolving any intermediate
/// component is swallowed and the original `path` is returned unchanged
/// (this is what lets `realpath` be called speculatively on paths that
/// don't exist yet, e.g. from `open`'s create branch).
pub fn realpath(
    path: &str,
    mounts: &MountTable,
    ctx: &Context,
    config: &Config,
) -> Result<String, Error> {
    let normalized = path::normalize(path)?;
    let mut visiting = HashSet::new();
    match resolve_inner(&normalized, mounts, ctx, config, &mut visiting, 0) {
        Ok(resolved) => Ok(resolved),
        Err(err) if err.is_not_found() => Ok(normalized),
        Err(err) => Err(err),
    }
}

fn resolve_inner(
    path: &str,
    mounts: &MountTable,
    ctx: &Context,
    config: &Config,
    visiting: &mut HashSet<String>,
    hops: usize,
) -> Result<String, Error> {
    if let Some(hit) = ctx.cache.get_realpath(path) {
        return Ok(hit);
    }
    if hops > config.max_symlink_hops {
        return Err(Error::new(Errno::ELoop, "realpath").with_path(path));
    }
    if path == "/" {
        ctx.cache.put_realpath(path, "/");
        return Ok("/".to_string());
    }
    if !visiting.insert(path.to_string()) {
        return Err(Error::new(Errno::ELoop, "realpath").with_path(path));
    }

    let parsed = path::parse(path);
    let real_dir = resolve_inner(&parsed.dir, mounts, ctx, config, visiting, hops + 1)?;
    let lpath = path::join(&[&real_dir, &parsed.base])?;

    let stats = stat_cached(&lpath, mounts, ctx)?;

    let resolved = if stats.is_symlink() {
        let target = read_symlink_body(&lpath, mounts, ctx)?;
        let resolved_target = path::resolve(&real_dir, &target)?;
        resolve_inner(&resolved_target, mounts, ctx, config, visiting, hops + 1)?
    } else {
        lpath
    };

    ctx.cache.put_realpath(path, &resolved);
    visiting.remove(path);
    Ok(resolved)
}

fn stat_cached(path: &str, mounts: &MountTable, ctx: &Context) -> Result<Stats, Error> {
    if let Some(stats) = ctx.cache.get_stats(path) {
        return Ok(stats);
    }
    let resolved = mounts.resolve(path)?;
    let stats = resolved
        .backend
        .stat(&resolved.backend_path)
        .map_err(|e| e.rewrite_path(std::path::Path::new(path)))?;
    ctx.cache.put_stats(path, stats);
    Ok(stats)
}

fn read_symlink_body(path: &str, mounts: &MountTable, ctx: &Context) -> Result<String, Error> {
    let _ = ctx;
    let resolved = mounts.resolve(path)?;
    let file = resolved
        .backend
        .open_file(&resolved.backend_path, crate::flags::parse_str_flag("r")?)
        .map_err(|e| e.rewrite_path(std::path::Path::new(path)))?;
    let stats = resolved
        .backend
        .stat(&resolved.backend_path)
        .map_err(|e| e.rewrite_path(std::path::Path::new(path)))?;
    let bytes = file
        .read_at(0, stats.size as usize)
        .map_err(|e| e.rewrite_path(std::path::Path::new(path)))?;
    let mut file = file;
    file.close().map_err(|e| e.rewrite_path(std::path::Path::new(path)))?;
    String::from_utf8(bytes)
        .map_err(|_| Error::new(Errno::Inval, "readlink").with_path(path).with_message("symlink body is not valid UTF-8"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;
    use crate::flags::parse_str_flag;
    use crate::stat::S_IFLNK;

    fn write_symlink(backend: &MemoryBackend, path: &str, target: &str) {
        let mut file = backend.create_file(path, parse_str_flag("w+").unwrap(), 0o644).unwrap();
        file.write_at(0, target.as_bytes()).unwrap();
        backend.chmod(path, S_IFLNK | 0o777).unwrap();
    }

    #[test]
    fn realpath_is_identity_for_plain_file() {
        let backend = MemoryBackend::new();
        backend.create_file("/a.txt", parse_str_flag("w+").unwrap(), 0o644).unwrap();
        let mounts = MountTable::new(backend);
        let ctx = Context::new(0, 0);
        let config = Config::default();
        assert_eq!(realpath("/a.txt", &mounts, &ctx, &config).unwrap(), "/a.txt");
    }

    #[test]
    fn realpath_follows_symlink_to_target() {
        let backend = MemoryBackend::new();
        backend.create_file("/target.txt", parse_str_flag("w+").unwrap(), 0o644).unwrap();
        write_symlink(&backend, "/link.txt", "/target.txt");
        let mounts = MountTable::new(backend);
        let ctx = Context::new(0, 0);
        let config = Config::default();
        assert_eq!(realpath("/link.txt", &mounts, &ctx, &config).unwrap(), "/target.txt");
    }

    #[test]
    fn realpath_swallows_enoent_on_missing_path() {
        let backend = MemoryBackend::new();
        let mounts = MountTable::new(backend);
        let ctx = Context::new(0, 0);
        let config = Config::default();
        assert_eq!(realpath("/missing.txt", &mounts, &ctx, &config).unwrap(), "/missing.txt");
    }

    #[test]
    fn realpath_detects_symlink_cycle() {
        let backend = MemoryBackend::new();
        write_symlink(&backend, "/a", "/b");
        write_symlink(&backend, "/b", "/a");
        let mounts = MountTable::new(backend);
        let ctx = Context::new(0, 0);
        let config = Config::default();
        let err = realpath("/a", &mounts, &ctx, &config).unwrap_err();
        assert_eq!(err.errno, Errno::ELoop);
    }

    #[test]
    fn realpath_is_idempotent() {
        let backend = MemoryBackend::new();
        backend.create_file("/target.txt", parse_str_flag("w+").unwrap(), 0o644).unwrap();
        write_symlink(&backend, "/link.txt", "/target.txt");
        let mounts = MountTable::new(backend);
        let ctx = Context::new(0, 0);
        let config = Config::default();
        let once = realpath("/link.txt", &mounts, &ctx, &config).unwrap();
        let twice = realpath(&once, &mounts, &ctx, &config).unwrap();
        assert_eq!(once, twice);
    }
}
