//! Mount table (component E): longest-prefix routing of absolute paths
//! to backends.

use std::sync::Arc;

use crate::backend::Backend;
use crate::error::{Errno, Error};

struct Mount {
    point: String,
    backend: Arc<dyn Backend>,
}

/// Bindings from an absolute path prefix to a backend. Exactly one root
/// mount (`/`) exists at all times; mount points are otherwise unique.
pub struct MountTable {
    mounts: Vec<Mount>,
}

/// The result of routing a caller path through the table: the backend
/// that owns it, the backend-relative path, and the mount point itself.
pub struct Resolved {
    pub backend: Arc<dyn Backend>,
    pub backend_path: String,
    pub mount_point: String,
}

impl MountTable {
    /// A fresh table with only the mandatory root mount.
    pub fn new(root_backend: Arc<dyn Backend>) -> Self {
        MountTable { mounts: vec![Mount { point: "/".to_string(), backend: root_backend }] }
    }

    /// Bind `backend` at `mount_point`. Fails with `EEXIST` if the point
    /// is already bound, or `EINVAL` if it isn't an absolute path.
    pub fn mount(&mut self, mount_point: &str, backend: Arc<dyn Backend>) -> Result<(), Error> {
        if !mount_point.starts_with('/') {
            return Err(Error::new(Errno::Inval, "mount").with_path(mount_point));
        }
        let normalized = crate::path::normalize(mount_point)?;
        if self.mounts.iter().any(|m| m.point == normalized) {
            return Err(Error::new(Errno::Exist, "mount").with_path(normalized));
        }
        self.mounts.push(Mount { point: normalized, backend });
        Ok(())
    }

    /// Unbind the mount at `mount_point`. The root mount cannot be
    /// unmounted.
    pub fn unmount(&mut self, mount_point: &str) -> Result<(), Error> {
        if mount_point == "/" {
            return Err(Error::new(Errno::Inval, "unmount").with_message("root cannot be unmounted"));
        }
        let before = self.mounts.len();
        self.mounts.retain(|m| m.point != mount_point);
        if self.mounts.len() == before {
            return Err(Error::new(Errno::NoEnt, "unmount").with_path(mount_point));
        }
        Ok(())
    }

    /// Route `path` to its backend: the mount point selected is the
    /// longest one that is a prefix of `path`; the backend-relative path
    /// is the remainder, with a leading `/` preserved (or `/` itself when
    /// `path` equals the mount point exactly).
    pub fn resolve(&self, path: &str) -> Result<Resolved, Error> {
        let mount = self
            .mounts
            .iter()
            .filter(|m| is_prefix(&m.point, path))
            .max_by_key(|m| m.point.len())
            .ok_or_else(|| Error::new(Errno::NoEnt, "resolve_mount").with_path(path))?;
        let backend_path = strip_prefix(&mount.point, path);
        Ok(Resolved {
            backend: mount.backend.clone(),
            backend_path,
            mount_point: mount.point.clone(),
        })
    }
}

fn is_prefix(mount_point: &str, path: &str) -> bool {
    if mount_point == "/" {
        return true;
    }
    path == mount_point || path.starts_with(&format!("{mount_point}/"))
}

fn strip_prefix(mount_point: &str, path: &str) -> String {
    if mount_point == "/" {
        return path.to_string();
    }
    let rest = &path[mount_point.len()..];
    if rest.is_empty() {
        "/".to_string()
    } else {
        rest.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;

    #[test]
    fn root_mount_matches_everything_by_default() {
        let table = MountTable::new(MemoryBackend::new());
        let resolved = table.resolve("/a/b").unwrap();
        assert_eq!(resolved.backend_path, "/a/b");
        assert_eq!(resolved.mount_point, "/");
    }

    #[test]
    fn longest_prefix_wins() {
        let mut table = MountTable::new(MemoryBackend::new());
        table.mount("/mnt", MemoryBackend::new()).unwrap();
        table.mount("/mnt/deep", MemoryBackend::new()).unwrap();

        let resolved = table.resolve("/mnt/deep/file.txt").unwrap();
        assert_eq!(resolved.mount_point, "/mnt/deep");
        assert_eq!(resolved.backend_path, "/file.txt");

        let resolved = table.resolve("/mnt/other.txt").unwrap();
        assert_eq!(resolved.mount_point, "/mnt");
        assert_eq!(resolved.backend_path, "/other.txt");
    }

    #[test]
    fn mounting_duplicate_point_fails() {
        let mut table = MountTable::new(MemoryBackend::new());
        table.mount("/mnt", MemoryBackend::new()).unwrap();
        assert_eq!(table.mount("/mnt", MemoryBackend::new()).unwrap_err().errno, Errno::Exist);
    }

    #[test]
    fn root_cannot_be_unmounted() {
        let mut table = MountTable::new(MemoryBackend::new());
        assert!(table.unmount("/").is_err());
    }
}
