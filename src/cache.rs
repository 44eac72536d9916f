//! Per-operation cache (component F): memoizes `realpath`/`stat` lookups
//! within a single compound VFS call.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::stat::Stats;

#[derive(Default)]
struct Inner {
    paths: HashMap<String, String>,
    stats: HashMap<String, Stats>,
}

/// Two write-through maps (`path → realpath`, `path → Stats`) scoped to a
/// single public entry point. Cloning an [`OpCache`] shares the same
/// underlying maps — this is how sub-calls inherit the outer frame's
/// cache instead of starting a fresh one.
#[derive(Clone)]
pub struct OpCache {
    inner: Arc<Mutex<Inner>>,
}

impl OpCache {
    pub fn new() -> Self {
        OpCache { inner: Arc::new(Mutex::new(Inner::default())) }
    }

    pub fn get_realpath(&self, path: &str) -> Option<String> {
        self.inner.lock().unwrap().paths.get(path).cloned()
    }

    pub fn put_realpath(&self, path: &str, real: &str) {
        self.inner.lock().unwrap().paths.insert(path.to_string(), real.to_string());
    }

    pub fn get_stats(&self, path: &str) -> Option<Stats> {
        self.inner.lock().unwrap().stats.get(path).copied()
    }

    pub fn put_stats(&self, path: &str, stats: Stats) {
        self.inner.lock().unwrap().stats.insert(path.to_string(), stats);
    }

    /// Drop every memoized entry. Only the outermost dispatch frame calls
    /// this (see [`crate::context::Context::is_indirect`]).
    pub fn clear(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.paths.clear();
        inner.stats.clear();
    }
}

impl Default for OpCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Context;

    #[test]
    fn sub_call_shares_cache_with_outer_frame() {
        let ctx = Context::new(0, 0);
        ctx.cache.put_realpath("/a", "/a");
        let sub = ctx.indirect();
        assert_eq!(sub.cache.get_realpath("/a").as_deref(), Some("/a"));
        assert!(sub.is_indirect);
        assert!(!ctx.is_indirect);
    }

    #[test]
    fn clear_empties_both_maps() {
        let cache = OpCache::new();
        cache.put_realpath("/a", "/a");
        cache.put_stats("/a", Stats { mode: 0, size: 0, atime: Default::default(), mtime: Default::default(), ctime: Default::default(), uid: 0, gid: 0 });
        cache.clear();
        assert!(cache.get_realpath("/a").is_none());
        assert!(cache.get_stats("/a").is_none());
    }
}
