//! `readdir` options and the `opendir` iterator.

use crate::backend::DirEntry;
use crate::error::Error;

/// Options for [`super::Vfs::readdir`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ReaddirOptions {
    /// Kept for parity with the source API's `withFileTypes` flag; this
    /// crate always returns [`DirEntry`] (which already carries a type via
    /// `stats`), so the flag has no effect on the return shape here.
    pub with_file_types: bool,
    pub recursive: bool,
}

/// An iterator over a directory's entries, snapshotted at `opendir` time
/// (entries added or removed afterward are not reflected).
pub struct Dir {
    entries: std::vec::IntoIter<DirEntry>,
}

impl Dir {
    pub(super) fn new(entries: Vec<DirEntry>) -> Self {
        Dir { entries: entries.into_iter() }
    }
}

impl Iterator for Dir {
    type Item = Result<DirEntry, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        self.entries.next().map(Ok)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stat::Stats;

    #[test]
    fn dir_iterates_snapshot_in_order() {
        let stats = Stats {
            mode: 0,
            size: 0,
            atime: Default::default(),
            mtime: Default::default(),
            ctime: Default::default(),
            uid: 0,
            gid: 0,
        };
        let mut dir = Dir::new(vec![
            DirEntry { name: "a".to_string(), stats },
            DirEntry { name: "b".to_string(), stats },
        ]);
        assert_eq!(dir.next().unwrap().unwrap().name, "a");
        assert_eq!(dir.next().unwrap().unwrap().name, "b");
        assert!(dir.next().is_none());
    }
}
