//! Reference read-only backend built from a JSON listing, with lazy HTTP
//! body fetch and an in-memory cache (component I).

use std::collections::HashMap;
use std::sync::Mutex;

use moka::sync::Cache;
use tracing::{debug, warn};

use super::{AsyncBackend, Backend, Capabilities, DirEntry, OpenFile};
use crate::error::{Errno, Error};
use crate::flags::OpenFlags;
use crate::path;
use crate::stat::{Stats, Timestamp, S_IFDIR, S_IFREG};

enum Inode {
    Dir(Vec<String>),
    /// `size = None` means "not yet learned" (no HEAD/GET issued yet).
    File { size: Mutex<Option<u64>> },
}

/// A read-only backend whose directory tree comes entirely from a JSON
/// index fetched once at construction; file bodies are fetched lazily
/// and cached in [`Self::bodies`].
pub struct HttpIndexedBackend {
    prefix_url: String,
    tree: HashMap<String, Inode>,
    bodies: Cache<String, std::sync::Arc<Vec<u8>>>,
    client: reqwest::blocking::Client,
    async_client: reqwest::Client,
}

impl HttpIndexedBackend {
    /// Fetch `listing_url` synchronously as JSON and build the inode tree.
    /// `prefix_url` is normalized to end in `/`.
    pub fn new(listing_url: &str, prefix_url: &str) -> Result<std::sync::Arc<Self>, Error> {
        let client = reqwest::blocking::Client::new();
        let body = client
            .get(listing_url)
            .send()
            .and_then(|r| r.error_for_status())
            .and_then(|r| r.text())
            .map_err(|e| Error::new(Errno::Io, "new").with_message(e.to_string()))?;
        Self::from_listing_json(&body, prefix_url)
    }

    /// Build the backend from an already-fetched listing body — the path
    /// [`Self::new`] takes after the blocking HTTP call, split out so
    /// tests can exercise the tree-building logic without a network call.
    pub fn from_listing_json(body: &str, prefix_url: &str) -> Result<std::sync::Arc<Self>, Error> {
        let value: serde_json::Value = serde_json::from_str(body)
            .map_err(|e| Error::new(Errno::Inval, "new").with_message(format!("invalid index JSON: {e}")))?;
        let mut tree = HashMap::new();
        build_tree(&value, "/", &mut tree);
        let prefix_url = if prefix_url.is_empty() {
            String::new()
        } else if prefix_url.ends_with('/') {
            prefix_url.to_string()
        } else {
            format!("{prefix_url}/")
        };
        Ok(std::sync::Arc::new(HttpIndexedBackend {
            prefix_url,
            tree,
            bodies: Cache::builder().max_capacity(256 * 1024 * 1024).build(),
            client: reqwest::blocking::Client::new(),
            async_client: reqwest::Client::new(),
        }))
    }

    fn fetch_url(&self, path: &str) -> String {
        format!("{}{}", self.prefix_url, path.trim_start_matches('/'))
    }

    fn stats_for(&self, path: &str, size: u64) -> Stats {
        let node = &self.tree[path];
        let mode = match node {
            Inode::Dir(_) => S_IFDIR | 0o555,
            Inode::File { .. } => S_IFREG | 0o444,
        };
        Stats {
            mode,
            size,
            atime: Timestamp::UNIX_EPOCH,
            mtime: Timestamp::UNIX_EPOCH,
            ctime: Timestamp::UNIX_EPOCH,
            uid: 0,
            gid: 0,
        }
    }

    fn known_size(&self, path: &str) -> Option<u64> {
        match self.tree.get(path) {
            Some(Inode::File { size }) => *size.lock().unwrap(),
            _ => None,
        }
    }

    fn set_size(&self, path: &str, size: u64) {
        if let Some(Inode::File { size: cell }) = self.tree.get(path) {
            *cell.lock().unwrap() = Some(size);
        }
    }

    fn fetch_size_sync(&self, path: &str) -> Result<u64, Error> {
        if let Some(size) = self.known_size(path) {
            return Ok(size);
        }
        let url = self.fetch_url(path);
        let resp = self
            .client
            .head(&url)
            .send()
            .and_then(|r| r.error_for_status())
            .map_err(|e| {
                warn!(path, "HEAD request failed");
                Error::new(Errno::Io, "stat").with_path(path).with_message(e.to_string())
            })?;
        let size = resp
            .headers()
            .get(reqwest::header::CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(0);
        self.set_size(path, size);
        Ok(size)
    }

    fn fetch_body_sync(&self, path: &str) -> Result<std::sync::Arc<Vec<u8>>, Error> {
        if let Some(body) = self.bodies.get(path) {
            return Ok(body);
        }
        let url = self.fetch_url(path);
        let bytes = self
            .client
            .get(&url)
            .send()
            .and_then(|r| r.error_for_status())
            .and_then(|r| r.bytes())
            .map_err(|e| Error::new(Errno::Io, "open").with_path(path).with_message(e.to_string()))?;
        let body = std::sync::Arc::new(bytes.to_vec());
        self.set_size(path, body.len() as u64);
        self.bodies.insert(path.to_string(), body.clone());
        debug!(path, len = body.len(), "fetched and cached file body");
        Ok(body)
    }

    /// Release every cached body while keeping the index tree, the way
    /// a long-lived process reclaims memory between bursts of reads.
    pub fn empty(&self) {
        self.bodies.invalidate_all();
    }

    /// Seed a file's body without making an HTTP request. Fails with
    /// `ENOENT` if no such file inode exists in the index.
    pub fn preload_file(&self, path: &str, bytes: Vec<u8>) -> Result<(), Error> {
        if !matches!(self.tree.get(path), Some(Inode::File { .. })) {
            return Err(Error::new(Errno::NoEnt, "preload_file").with_path(path));
        }
        self.set_size(path, bytes.len() as u64);
        self.bodies.insert(path.to_string(), std::sync::Arc::new(bytes));
        Ok(())
    }
}

fn build_tree(value: &serde_json::Value, path: &str, tree: &mut HashMap<String, Inode>) {
    match value {
        serde_json::Value::Object(map) => {
            let children: Vec<String> = map.keys().cloned().collect();
            tree.insert(path.to_string(), Inode::Dir(children));
            for (name, child) in map {
                let child_path = path::join(&[path, name]).unwrap_or_else(|_| format!("{path}/{name}"));
                build_tree(child, &child_path, tree);
            }
        }
        _ => {
            tree.insert(path.to_string(), Inode::File { size: Mutex::new(None) });
        }
    }
}

struct HttpOpenFile {
    body: std::sync::Arc<Vec<u8>>,
}

impl OpenFile for HttpOpenFile {
    fn read_at(&self, offset: u64, len: usize) -> Result<Vec<u8>, Error> {
        let start = (offset as usize).min(self.body.len());
        let end = (start + len).min(self.body.len());
        Ok(self.body[start..end].to_vec())
    }

    fn write_at(&mut self, _offset: u64, _data: &[u8]) -> Result<usize, Error> {
        Err(Error::new(Errno::RoFs, "write"))
    }

    fn truncate(&mut self, _len: u64) -> Result<(), Error> {
        Err(Error::new(Errno::RoFs, "truncate"))
    }

    fn sync(&mut self) -> Result<(), Error> {
        Ok(())
    }

    fn datasync(&mut self) -> Result<(), Error> {
        Ok(())
    }

    fn close(&mut self) -> Result<(), Error> {
        Ok(())
    }
}

impl Backend for HttpIndexedBackend {
    fn capabilities(&self) -> Capabilities {
        Capabilities { read_only: true, supports_links: false }
    }

    fn stat(&self, path: &str) -> Result<Stats, Error> {
        match self.tree.get(path) {
            None => Err(Error::new(Errno::NoEnt, "stat").with_path(path)),
            Some(Inode::Dir(_)) => Ok(self.stats_for(path, 0)),
            Some(Inode::File { .. }) => {
                let size = self.fetch_size_sync(path)?;
                Ok(self.stats_for(path, size))
            }
        }
    }

    fn open_file(&self, path: &str, flags: OpenFlags) -> Result<Box<dyn OpenFile>, Error> {
        match self.tree.get(path) {
            None => Err(Error::new(Errno::NoEnt, "open").with_path(path)),
            Some(Inode::Dir(_)) => Err(Error::new(Errno::IsDir, "open").with_path(path)),
            Some(Inode::File { .. }) => {
                if flags.writable || flags.appendable || flags.truncating {
                    return Err(Error::new(Errno::Perm, "open").with_path(path));
                }
                if flags.exclusive {
                    return Err(Error::new(Errno::Exist, "open").with_path(path));
                }
                let body = self.fetch_body_sync(path)?;
                Ok(Box::new(HttpOpenFile { body }))
            }
        }
    }

    fn create_file(&self, path: &str, _flags: OpenFlags, _mode: u32) -> Result<Box<dyn OpenFile>, Error> {
        Err(Error::new(Errno::RoFs, "open").with_path(path))
    }

    fn mkdir(&self, path: &str, _mode: u32) -> Result<(), Error> {
        Err(Error::new(Errno::RoFs, "mkdir").with_path(path))
    }

    fn rmdir(&self, path: &str) -> Result<(), Error> {
        Err(Error::new(Errno::RoFs, "rmdir").with_path(path))
    }

    fn unlink(&self, path: &str) -> Result<(), Error> {
        Err(Error::new(Errno::RoFs, "unlink").with_path(path))
    }

    fn rename(&self, from: &str, _to: &str) -> Result<(), Error> {
        Err(Error::new(Errno::RoFs, "rename").with_path(from))
    }

    fn link(&self, _target: &str, link_path: &str) -> Result<(), Error> {
        Err(Error::new(Errno::Perm, "link").with_path(link_path))
    }

    fn readdir(&self, path: &str) -> Result<Vec<DirEntry>, Error> {
        match self.tree.get(path) {
            Some(Inode::Dir(children)) => {
                let mut entries = Vec::with_capacity(children.len());
                for name in children {
                    let child_path = path::join(&[path, name])?;
                    let size = self.known_size(&child_path).unwrap_or(0);
                    entries.push(DirEntry { name: name.clone(), stats: self.stats_for(&child_path, size) });
                }
                Ok(entries)
            }
            Some(Inode::File { .. }) => Err(Error::new(Errno::NotDir, "readdir").with_path(path)),
            None => Err(Error::new(Errno::NoEnt, "readdir").with_path(path)),
        }
    }

    fn chmod(&self, path: &str, _mode: u32) -> Result<(), Error> {
        Err(Error::new(Errno::RoFs, "chmod").with_path(path))
    }

    fn chown(&self, path: &str, _uid: u32, _gid: u32) -> Result<(), Error> {
        Err(Error::new(Errno::RoFs, "chown").with_path(path))
    }

    fn utimes(&self, path: &str, _atime: Timestamp, _mtime: Timestamp) -> Result<(), Error> {
        Err(Error::new(Errno::RoFs, "utimes").with_path(path))
    }
}

#[async_trait::async_trait]
impl AsyncBackend for HttpIndexedBackend {
    async fn stat_async(&self, path: &str) -> Result<Stats, Error> {
        match self.tree.get(path) {
            None => Err(Error::new(Errno::NoEnt, "stat").with_path(path)),
            Some(Inode::Dir(_)) => Ok(self.stats_for(path, 0)),
            Some(Inode::File { .. }) => {
                if let Some(size) = self.known_size(path) {
                    return Ok(self.stats_for(path, size));
                }
                let url = self.fetch_url(path);
                let resp = self
                    .async_client
                    .head(&url)
                    .send()
                    .await
                    .and_then(|r| r.error_for_status())
                    .map_err(|e| Error::new(Errno::Io, "stat").with_path(path).with_message(e.to_string()))?;
                let size = resp
                    .headers()
                    .get(reqwest::header::CONTENT_LENGTH)
                    .and_then(|v| v.to_str().ok())
                    .and_then(|s| s.parse::<u64>().ok())
                    .unwrap_or(0);
                self.set_size(path, size);
                Ok(self.stats_for(path, size))
            }
        }
    }

    async fn read_file_async(&self, path: &str) -> Result<Vec<u8>, Error> {
        if !matches!(self.tree.get(path), Some(Inode::File { .. })) {
            return Err(Error::new(Errno::NoEnt, "read").with_path(path));
        }
        if let Some(body) = self.bodies.get(path) {
            return Ok((*body).clone());
        }
        let url = self.fetch_url(path);
        let bytes = self
            .async_client
            .get(&url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| Error::new(Errno::Io, "read").with_path(path).with_message(e.to_string()))?
            .bytes()
            .await
            .map_err(|e| Error::new(Errno::Io, "read").with_path(path).with_message(e.to_string()))?;
        let body = std::sync::Arc::new(bytes.to_vec());
        self.set_size(path, body.len() as u64);
        self.bodies.insert(path.to_string(), body.clone());
        Ok((*body).clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flags::parse_str_flag;

    #[test]
    fn builds_tree_from_listing_json() {
        let backend = HttpIndexedBackend::from_listing_json(
            r#"{"a.txt": null, "d": {"b.txt": null}}"#,
            "https://example.com/files",
        )
        .unwrap();
        let root = backend.readdir("/").unwrap();
        let mut names: Vec<_> = root.iter().map(|e| e.name.clone()).collect();
        names.sort();
        assert_eq!(names, vec!["a.txt", "d"]);
        let nested = backend.readdir("/d").unwrap();
        assert_eq!(nested[0].name, "b.txt");
    }

    #[test]
    fn preload_file_avoids_http_and_serves_read() {
        let backend =
            HttpIndexedBackend::from_listing_json(r#"{"a.txt": null}"#, "https://example.com").unwrap();
        backend.preload_file("/a.txt", b"hello".to_vec()).unwrap();
        let file = backend.open_file("/a.txt", parse_str_flag("r").unwrap()).unwrap();
        assert_eq!(file.read_at(0, 5).unwrap(), b"hello");
        assert_eq!(backend.stat("/a.txt").unwrap().size, 5);
    }

    #[test]
    fn preload_missing_file_fails_with_enoent() {
        let backend = HttpIndexedBackend::from_listing_json("{}", "https://example.com").unwrap();
        assert_eq!(backend.preload_file("/missing", vec![]).unwrap_err().errno, Errno::NoEnt);
    }

    #[test]
    fn write_is_rejected_as_read_only() {
        let backend =
            HttpIndexedBackend::from_listing_json(r#"{"a.txt": null}"#, "https://example.com").unwrap();
        assert!(backend.create_file("/b.txt", parse_str_flag("w+").unwrap(), 0o644).is_err());
    }

    #[test]
    fn empty_drops_cached_bodies_but_keeps_index() {
        let backend =
            HttpIndexedBackend::from_listing_json(r#"{"a.txt": null}"#, "https://example.com").unwrap();
        backend.preload_file("/a.txt", b"hello".to_vec()).unwrap();
        backend.empty();
        assert!(backend.tree.contains_key("/a.txt"));
        assert!(backend.bodies.get("/a.txt").is_none());
    }

    #[tokio::test]
    async fn async_entry_points_serve_preloaded_bodies_without_a_request() {
        let backend = HttpIndexedBackend::from_listing_json(
            r#"{"a.txt": null, "d": {"b.txt": null}}"#,
            "https://example.com",
        )
        .unwrap();
        backend.preload_file("/a.txt", b"hello".to_vec()).unwrap();
        assert_eq!(backend.stat_async("/a.txt").await.unwrap().size, 5);
        assert_eq!(backend.read_file_async("/a.txt").await.unwrap(), b"hello");
        assert_eq!(backend.stat_async("/d").await.unwrap().mode & S_IFDIR, S_IFDIR);
        assert_eq!(backend.read_file_async("/missing").await.unwrap_err().errno, Errno::NoEnt);
    }
}
