//! Path utilities: normalize, join, split and resolve absolute POSIX paths.
//!
//! All paths in this crate are represented as `String`/`&str` rather than
//! `std::path::Path`, since POSIX semantics (forward slashes only, `.`/`..`
//! handling that never consults the OS) are simpler to reason about directly
//! on byte slices than through platform path types.

use crate::error::{Errno, Error};

/// The path and final-component name produced by [`parse`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Parsed {
    pub dir: String,
    pub base: String,
}

/// Convert `p` to an absolute, normalized POSIX path.
///
/// - A relative input is treated as already rooted at `/` (no implicit
///   cwd — callers resolve relative paths against a base via [`resolve`]).
/// - `.` components are dropped, `..` components pop the preceding
///   component (clamped at the root).
/// - The result always starts with `/` and never ends with `/` unless it
///   is the root itself.
pub fn normalize(p: &str) -> Result<String, Error> {
    if p.is_empty() {
        return Err(Error::new(Errno::Inval, "normalize").with_message("empty path"));
    }
    let mut stack: Vec<&str> = Vec::new();
    for component in p.split('/') {
        match component {
            "" | "." => continue,
            ".." => {
                stack.pop();
            }
            other => stack.push(other),
        }
    }
    if stack.is_empty() {
        return Ok("/".to_string());
    }
    Ok(format!("/{}", stack.join("/")))
}

/// Split a normalized path into its parent directory and final component.
///
/// `parse("/a/b/c") == {dir: "/a/b", base: "c"}`; `parse("/a") == {dir: "/",
/// base: "a"}`; `parse("/") == {dir: "/", base: ""}`.
pub fn parse(p: &str) -> Parsed {
    if p == "/" {
        return Parsed { dir: "/".to_string(), base: String::new() };
    }
    match p.rfind('/') {
        Some(0) => Parsed { dir: "/".to_string(), base: p[1..].to_string() },
        Some(idx) => Parsed { dir: p[..idx].to_string(), base: p[idx + 1..].to_string() },
        None => Parsed { dir: "/".to_string(), base: p.to_string() },
    }
}

/// The parent directory of `p` (same as `parse(p).dir`).
pub fn dirname(p: &str) -> String {
    parse(p).dir
}

/// The final path component of `p` (same as `parse(p).base`).
pub fn basename(p: &str) -> String {
    parse(p).base
}

/// Join path components with `/`, normalizing the result.
pub fn join(parts: &[&str]) -> Result<String, Error> {
    if parts.is_empty() {
        return Ok("/".to_string());
    }
    let joined = parts.join("/");
    normalize(&joined)
}

/// Resolve `rel` against `base` the way a symlink target is resolved
/// against the directory that contains the link.
///
/// If `rel` is itself absolute, it replaces `base` outright (POSIX
/// `realpath` semantics for absolute symlink targets).
pub fn resolve(base: &str, rel: &str) -> Result<String, Error> {
    if rel.starts_with('/') {
        return normalize(rel);
    }
    join(&[base, rel])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_collapses_dot_and_dotdot() {
        assert_eq!(normalize("/a/./b/../c").unwrap(), "/a/c");
        assert_eq!(normalize("/../a").unwrap(), "/a");
        assert_eq!(normalize("/").unwrap(), "/");
        assert_eq!(normalize("a/b").unwrap(), "/a/b");
    }

    #[test]
    fn normalize_rejects_empty() {
        assert!(normalize("").is_err());
    }

    #[test]
    fn normalize_is_idempotent() {
        for p in ["/a/b/c", "/", "/a/./b/../c/../../d"] {
            let once = normalize(p).unwrap();
            let twice = normalize(&once).unwrap();
            assert_eq!(once, twice);
        }
    }

    #[test]
    fn parse_splits_dir_and_base() {
        assert_eq!(parse("/a/b/c"), Parsed { dir: "/a/b".to_string(), base: "c".to_string() });
        assert_eq!(parse("/a"), Parsed { dir: "/".to_string(), base: "a".to_string() });
        assert_eq!(parse("/"), Parsed { dir: "/".to_string(), base: String::new() });
    }

    #[test]
    fn join_normalizes() {
        assert_eq!(join(&["/a", "b", "c"]).unwrap(), "/a/b/c");
        assert_eq!(join(&["/a/", "/b"]).unwrap(), "/a/b");
    }

    #[test]
    fn resolve_absolute_target_replaces_base() {
        assert_eq!(resolve("/a/b", "/etc/passwd").unwrap(), "/etc/passwd");
        assert_eq!(resolve("/a/b", "../c").unwrap(), "/a/c");
    }
}
