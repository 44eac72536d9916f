//! Caller context (`V_Context`): identity plus the per-operation cache handle.

use crate::cache::OpCache;
use crate::config::Config;

/// The caller context threaded through every dispatch call: filesystem
/// root, caller identity, and the per-operation cache (component F).
///
/// Constructed once per public entry point; sub-calls clone it cheaply
/// (the cache is reference-counted) and set `is_indirect` so only the
/// outermost frame clears the cache on exit.
#[derive(Clone)]
pub struct Context {
    pub root: String,
    pub uid: u32,
    pub gid: u32,
    pub(crate) cache: OpCache,
    pub(crate) is_indirect: bool,
}

impl Context {
    /// A fresh top-level context: empty cache, `is_indirect = false`.
    pub fn new(uid: u32, gid: u32) -> Self {
        Context { root: "/".to_string(), uid, gid, cache: OpCache::new(), is_indirect: false }
    }

    pub fn from_config(config: &Config) -> Self {
        Context::new(config.default_uid, config.default_gid)
    }

    /// A context for a sub-call that shares this context's cache and is
    /// marked indirect so it won't clear the cache on exit.
    pub(crate) fn indirect(&self) -> Self {
        Context {
            root: self.root.clone(),
            uid: self.uid,
            gid: self.gid,
            cache: self.cache.clone(),
            is_indirect: true,
        }
    }
}

impl Default for Context {
    fn default() -> Self {
        Context::new(0, 0)
    }
}

#[cfg(unix)]
/// Build a [`Context`] from the real process identity, the way a host
/// embedding this crate typically wants to for its "ambient" caller.
pub fn current_process_context() -> Context {
    // SAFETY: getuid/getgid are always safe to call, no preconditions.
    let (uid, gid) = unsafe { (libc::getuid(), libc::getgid()) };
    Context::new(uid, gid)
}

#[cfg(not(unix))]
pub fn current_process_context() -> Context {
    Context::default()
}
