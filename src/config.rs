//! Crate configuration value.
//!
//! This crate never parses a config file or environment variable — that
//! loading step belongs to the embedding application's CLI/config layer.
//! `Config` is a plain value the caller constructs and passes in.

/// Tunables for the dispatch layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    /// Whether `has_access` checks are enforced at all. When `false`,
    /// every access check passes unconditionally.
    pub check_access: bool,
    /// Default caller identity used when no explicit [`crate::context::Context`]
    /// is supplied.
    pub default_uid: u32,
    pub default_gid: u32,
    /// Upper bound on symlink hops `realpath` will follow before giving up
    /// with `ELOOP`, independent of the visiting-set cycle detector.
    pub max_symlink_hops: usize,
}

impl Default for Config {
    fn default() -> Self {
        Config { check_access: true, default_uid: 0, default_gid: 0, max_symlink_hops: 40 }
    }
}
