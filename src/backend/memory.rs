//! A writable, fully in-memory backend. Grounds the [`Backend`] trait
//! against a plain `HashMap` tree rather than a real filesystem or HTTP
//! origin — used throughout the dispatch-layer test suite as the "rw"
//! half of a mixed-mount scenario.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use super::{Backend, Capabilities, DirEntry, OpenFile};
use crate::error::{Errno, Error};
use crate::flags::OpenFlags;
use crate::path;
use crate::stat::{Stats, Timestamp, S_IFDIR};

enum NodeKind {
    File(Vec<u8>),
    Dir,
}

struct Node {
    stats: Stats,
    kind: NodeKind,
}

struct State {
    nodes: HashMap<String, Node>,
}

impl State {
    fn new() -> Self {
        let now = Timestamp::now();
        let mut nodes = HashMap::new();
        nodes.insert(
            "/".to_string(),
            Node {
                stats: Stats {
                    mode: S_IFDIR | 0o755,
                    size: 0,
                    atime: now,
                    mtime: now,
                    ctime: now,
                    uid: 0,
                    gid: 0,
                },
                kind: NodeKind::Dir,
            },
        );
        State { nodes }
    }

    fn children_of(&self, dir: &str) -> Vec<(String, Stats)> {
        let prefix = if dir == "/" { "/".to_string() } else { format!("{dir}/") };
        self.nodes
            .iter()
            .filter_map(|(p, n)| {
                if p == dir || !p.starts_with(&prefix) {
                    return None;
                }
                let rest = &p[prefix.len()..];
                if rest.contains('/') {
                    return None;
                }
                Some((rest.to_string(), n.stats))
            })
            .collect()
    }
}

/// A whole filesystem held in a `HashMap<String, Node>` behind a mutex.
/// Every operation is `O(1)`/`O(children)` — there is no cleverness here,
/// only enough behavior to stand in for a real writable store in tests.
pub struct MemoryBackend {
    state: Arc<Mutex<State>>,
}

impl MemoryBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(MemoryBackend { state: Arc::new(Mutex::new(State::new())) })
    }

    fn new_file_common(
        &self,
        path: &str,
        mode: u32,
        exclusive: bool,
    ) -> Result<(), Error> {
        let parsed = path::parse(path);
        let mut state = self.state.lock().unwrap();
        if !matches!(state.nodes.get(&parsed.dir).map(|n| &n.kind), Some(NodeKind::Dir)) {
            return Err(Error::new(Errno::NoEnt, "open").with_path(&parsed.dir));
        }
        if state.nodes.contains_key(path) {
            if exclusive {
                return Err(Error::new(Errno::Exist, "open").with_path(path));
            }
            return Ok(());
        }
        let now = Timestamp::now();
        state.nodes.insert(
            path.to_string(),
            Node {
                stats: Stats {
                    mode: crate::stat::S_IFREG | (mode & 0o7777),
                    size: 0,
                    atime: now,
                    mtime: now,
                    ctime: now,
                    uid: 0,
                    gid: 0,
                },
                kind: NodeKind::File(Vec::new()),
            },
        );
        Ok(())
    }
}

struct MemoryOpenFile {
    state: Arc<Mutex<State>>,
    path: String,
}

// Reads/writes go straight through to the shared backend state rather
// than holding a private buffer, so concurrent handles on the same path
// observe each other's writes immediately.
impl OpenFile for MemoryOpenFile {
    fn read_at(&self, offset: u64, len: usize) -> Result<Vec<u8>, Error> {
        let state = self.state.lock().unwrap();
        let node = state
            .nodes
            .get(&self.path)
            .ok_or_else(|| Error::new(Errno::NoEnt, "read").with_path(&self.path))?;
        match &node.kind {
            NodeKind::File(data) => {
                let start = (offset as usize).min(data.len());
                let end = (start + len).min(data.len());
                Ok(data[start..end].to_vec())
            }
            NodeKind::Dir => Err(Error::new(Errno::IsDir, "read").with_path(&self.path)),
        }
    }

    fn write_at(&mut self, offset: u64, data: &[u8]) -> Result<usize, Error> {
        let mut state = self.state.lock().unwrap();
        let node = state
            .nodes
            .get_mut(&self.path)
            .ok_or_else(|| Error::new(Errno::NoEnt, "write").with_path(&self.path))?;
        match &mut node.kind {
            NodeKind::File(buf) => {
                let start = offset as usize;
                if buf.len() < start + data.len() {
                    buf.resize(start + data.len(), 0);
                }
                buf[start..start + data.len()].copy_from_slice(data);
                node.stats.size = buf.len() as u64;
                node.stats.mtime = Timestamp::now();
                Ok(data.len())
            }
            NodeKind::Dir => Err(Error::new(Errno::IsDir, "write").with_path(&self.path)),
        }
    }

    fn truncate(&mut self, len: u64) -> Result<(), Error> {
        let mut state = self.state.lock().unwrap();
        let node = state
            .nodes
            .get_mut(&self.path)
            .ok_or_else(|| Error::new(Errno::NoEnt, "truncate").with_path(&self.path))?;
        match &mut node.kind {
            NodeKind::File(buf) => {
                buf.resize(len as usize, 0);
                node.stats.size = len;
                Ok(())
            }
            NodeKind::Dir => Err(Error::new(Errno::IsDir, "truncate").with_path(&self.path)),
        }
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

impl Backend for MemoryBackend {
    fn capabilities(&self) -> Capabilities {
        Capabilities { read_only: false, supports_links: true }
    }

    fn stat(&self, path: &str) -> Result<Stats, Error> {
        let state = self.state.lock().unwrap();
        state
            .nodes
            .get(path)
            .map(|n| n.stats)
            .ok_or_else(|| Error::new(Errno::NoEnt, "stat").with_path(path))
    }

    fn open_file(&self, path: &str, _flags: OpenFlags) -> Result<Box<dyn OpenFile>, Error> {
        let state = self.state.lock().unwrap();
        match state.nodes.get(path) {
            None => return Err(Error::new(Errno::NoEnt, "open").with_path(path)),
            Some(Node { kind: NodeKind::Dir, .. }) => {
                return Err(Error::new(Errno::IsDir, "open").with_path(path));
            }
            Some(Node { kind: NodeKind::File(_), .. }) => {}
        }
        drop(state);
        Ok(Box::new(MemoryOpenFile { state: self.state.clone(), path: path.to_string() }))
    }

    fn create_file(
        &self,
        path: &str,
        flags: OpenFlags,
        mode: u32,
    ) -> Result<Box<dyn OpenFile>, Error> {
        self.new_file_common(path, mode, flags.exclusive)?;
        Ok(Box::new(MemoryOpenFile { state: self.state.clone(), path: path.to_string() }))
    }

    fn mkdir(&self, path: &str, mode: u32) -> Result<(), Error> {
        let parsed = path::parse(path);
        let mut state = self.state.lock().unwrap();
        if !matches!(state.nodes.get(&parsed.dir).map(|n| &n.kind), Some(NodeKind::Dir)) {
            return Err(Error::new(Errno::NoEnt, "mkdir").with_path(&parsed.dir));
        }
        if state.nodes.contains_key(path) {
            return Err(Error::new(Errno::Exist, "mkdir").with_path(path));
        }
        let now = Timestamp::now();
        state.nodes.insert(
            path.to_string(),
            Node {
                stats: Stats {
                    mode: S_IFDIR | (mode & 0o7777),
                    size: 0,
                    atime: now,
                    mtime: now,
                    ctime: now,
                    uid: 0,
                    gid: 0,
                },
                kind: NodeKind::Dir,
            },
        );
        Ok(())
    }

    fn rmdir(&self, path: &str) -> Result<(), Error> {
        let mut state = self.state.lock().unwrap();
        if !matches!(state.nodes.get(path).map(|n| &n.kind), Some(NodeKind::Dir)) {
            return Err(Error::new(Errno::NotDir, "rmdir").with_path(path));
        }
        if !state.children_of(path).is_empty() {
            return Err(Error::new(Errno::NotEmpty, "rmdir").with_path(path));
        }
        state.nodes.remove(path);
        Ok(())
    }

    fn unlink(&self, path: &str) -> Result<(), Error> {
        let mut state = self.state.lock().unwrap();
        match state.nodes.get(path) {
            Some(node) => match node.kind {
                NodeKind::Dir => Err(Error::new(Errno::IsDir, "unlink").with_path(path)),
                NodeKind::File(_) => {
                    state.nodes.remove(path);
                    Ok(())
                }
            },
            None => Err(Error::new(Errno::NoEnt, "unlink").with_path(path)),
        }
    }

    fn rename(&self, from: &str, to: &str) -> Result<(), Error> {
        let mut state = self.state.lock().unwrap();
        let node = state
            .nodes
            .remove(from)
            .ok_or_else(|| Error::new(Errno::NoEnt, "rename").with_path(from))?;
        let is_dir = matches!(node.kind, NodeKind::Dir);
        if is_dir {
            let prefix = format!("{from}/");
            let descendants: Vec<String> =
                state.nodes.keys().filter(|p| p.starts_with(&prefix)).cloned().collect();
            for descendant in descendants {
                if let Some(moved) = state.nodes.remove(&descendant) {
                    let new_path = format!("{to}{}", &descendant[from.len()..]);
                    state.nodes.insert(new_path, moved);
                }
            }
        }
        state.nodes.insert(to.to_string(), node);
        Ok(())
    }

    fn link(&self, target: &str, link_path: &str) -> Result<(), Error> {
        let mut state = self.state.lock().unwrap();
        let node = state
            .nodes
            .get(target)
            .ok_or_else(|| Error::new(Errno::NoEnt, "link").with_path(target))?;
        let data = match &node.kind {
            NodeKind::File(data) => data.clone(),
            NodeKind::Dir => return Err(Error::new(Errno::Perm, "link").with_path(target)),
        };
        let stats = node.stats;
        state.nodes.insert(link_path.to_string(), Node { stats, kind: NodeKind::File(data) });
        Ok(())
    }

    fn readdir(&self, path: &str) -> Result<Vec<DirEntry>, Error> {
        let state = self.state.lock().unwrap();
        if !matches!(state.nodes.get(path).map(|n| &n.kind), Some(NodeKind::Dir)) {
            return Err(Error::new(Errno::NotDir, "readdir").with_path(path));
        }
        let mut out: Vec<DirEntry> = state
            .children_of(path)
            .into_iter()
            .map(|(name, stats)| DirEntry { name, stats })
            .collect();
        out.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(out)
    }

    fn chmod(&self, path: &str, mode: u32) -> Result<(), Error> {
        let mut state = self.state.lock().unwrap();
        let node = state
            .nodes
            .get_mut(path)
            .ok_or_else(|| Error::new(Errno::NoEnt, "chmod").with_path(path))?;
        let type_bits = node.stats.mode & crate::stat::S_IFMT;
        node.stats.mode = type_bits | (mode & 0o7777);
        node.stats.ctime = Timestamp::now();
        Ok(())
    }

    fn chown(&self, path: &str, uid: u32, gid: u32) -> Result<(), Error> {
        let mut state = self.state.lock().unwrap();
        let node = state
            .nodes
            .get_mut(path)
            .ok_or_else(|| Error::new(Errno::NoEnt, "chown").with_path(path))?;
        node.stats.uid = uid;
        node.stats.gid = gid;
        node.stats.ctime = Timestamp::now();
        Ok(())
    }

    fn utimes(&self, path: &str, atime: Timestamp, mtime: Timestamp) -> Result<(), Error> {
        let mut state = self.state.lock().unwrap();
        let node = state
            .nodes
            .get_mut(path)
            .ok_or_else(|| Error::new(Errno::NoEnt, "utimes").with_path(path))?;
        node.stats.atime = atime;
        node.stats.mtime = mtime;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flags::parse_str_flag;

    #[test]
    fn write_then_read_round_trips() {
        let fs = MemoryBackend::new();
        let flags = parse_str_flag("w+").unwrap();
        let mut file = fs.create_file("/a.txt", flags, 0o644).unwrap();
        file.write_at(0, b"hello").unwrap();
        let data = file.read_at(0, 5).unwrap();
        assert_eq!(data, b"hello");
        assert_eq!(fs.stat("/a.txt").unwrap().size, 5);
    }

    #[test]
    fn mkdir_requires_existing_parent() {
        let fs = MemoryBackend::new();
        assert!(fs.mkdir("/a/b", 0o755).is_err());
        fs.mkdir("/a", 0o755).unwrap();
        assert!(fs.mkdir("/a/b", 0o755).is_ok());
    }

    #[test]
    fn rename_moves_directory_subtree() {
        let fs = MemoryBackend::new();
        fs.mkdir("/a", 0o755).unwrap();
        fs.create_file("/a/x.txt", parse_str_flag("w+").unwrap(), 0o644).unwrap();
        fs.rename("/a", "/b").unwrap();
        assert!(fs.stat("/a").is_err());
        assert!(fs.stat("/b/x.txt").is_ok());
    }

    #[test]
    fn rmdir_requires_empty() {
        let fs = MemoryBackend::new();
        fs.mkdir("/a", 0o755).unwrap();
        fs.create_file("/a/x.txt", parse_str_flag("w+").unwrap(), 0o644).unwrap();
        assert_eq!(fs.rmdir("/a").unwrap_err().errno, Errno::NotEmpty);
    }
}
