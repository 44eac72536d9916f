//! Open-flag parsing (component C): translate the Node-`fs`-style string
//! flags and their numeric equivalents into a capability record.

use crate::error::{Errno, Error};
use crate::stat::{R_OK, W_OK};

/// Capability record produced by parsing an open flag.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct OpenFlags {
    pub readable: bool,
    pub writable: bool,
    pub appendable: bool,
    pub truncating: bool,
    pub exclusive: bool,
    pub must_exist: bool,
}

impl OpenFlags {
    /// The minimum access mask (`R_OK`/`W_OK`) the caller must hold on the
    /// target for this flag to be honored.
    pub fn required_access(&self) -> u32 {
        let mut mask = 0;
        if self.readable {
            mask |= R_OK;
        }
        if self.writable || self.appendable || self.truncating {
            mask |= W_OK;
        }
        mask
    }
}

/// Parse a Node-`fs`-style string flag (`"r"`, `"r+"`, `"w"`, `"w+"`, `"a"`,
/// `"a+"`, `"wx"`, `"ax"`, `"rs+"`, …) into an [`OpenFlags`] record.
pub fn parse_str_flag(flag: &str) -> Result<OpenFlags, Error> {
    // `s`/`rs` are a synchronous-I/O hint in the source API; this crate has
    // no async variant of plain reads to differ from, so the letter is
    // accepted and ignored.
    let core = flag.replace('s', "");
    let exclusive = core.contains('x');
    let core = core.replace('x', "");
    let plus = core.contains('+');
    let base = core.trim_end_matches('+');

    let flags = match base {
        "r" => OpenFlags {
            readable: true,
            writable: plus,
            appendable: false,
            truncating: false,
            exclusive,
            must_exist: true,
        },
        "w" => OpenFlags {
            readable: plus,
            writable: true,
            appendable: false,
            truncating: true,
            exclusive,
            must_exist: false,
        },
        "a" => OpenFlags {
            readable: plus,
            writable: true,
            appendable: true,
            truncating: false,
            exclusive,
            must_exist: false,
        },
        _ => {
            return Err(Error::new(Errno::Inval, "open")
                .with_message(format!("unrecognized flag {flag:?}")));
        }
    };
    Ok(flags)
}

/// Numeric open flags mirroring the subset of POSIX `O_*` bits this crate
/// honors.
pub mod bits {
    pub const O_RDONLY: i32 = 0;
    pub const O_WRONLY: i32 = 1;
    pub const O_RDWR: i32 = 2;
    pub const O_CREAT: i32 = 0o100;
    pub const O_EXCL: i32 = 0o200;
    pub const O_TRUNC: i32 = 0o1000;
    pub const O_APPEND: i32 = 0o2000;
}

/// Parse a numeric open flag (`O_RDONLY | O_CREAT | ...`) into an
/// [`OpenFlags`] record.
pub fn parse_numeric_flag(flag: i32) -> Result<OpenFlags, Error> {
    use bits::*;
    let access = flag & 0o3;
    let readable = access == O_RDONLY || access == O_RDWR;
    let writable = access == O_WRONLY || access == O_RDWR;
    if !readable && !writable {
        return Err(Error::new(Errno::Inval, "open").with_message("no access mode bits set"));
    }
    Ok(OpenFlags {
        readable,
        writable,
        appendable: flag & O_APPEND != 0,
        truncating: flag & O_TRUNC != 0,
        exclusive: flag & O_EXCL != 0,
        must_exist: flag & O_CREAT == 0,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn r_requires_existing_readable() {
        let f = parse_str_flag("r").unwrap();
        assert!(f.readable && !f.writable && f.must_exist);
    }

    #[test]
    fn w_plus_truncates_and_creates() {
        let f = parse_str_flag("w+").unwrap();
        assert!(f.readable && f.writable && f.truncating && !f.must_exist);
    }

    #[test]
    fn a_appends_without_truncating() {
        let f = parse_str_flag("a").unwrap();
        assert!(f.writable && f.appendable && !f.truncating);
    }

    #[test]
    fn wx_is_exclusive() {
        let f = parse_str_flag("wx").unwrap();
        assert!(f.exclusive);
    }

    #[test]
    fn invalid_flag_rejected() {
        assert!(parse_str_flag("q").is_err());
    }

    #[test]
    fn numeric_rdwr_creat_trunc() {
        let f = parse_numeric_flag(bits::O_RDWR | bits::O_CREAT | bits::O_TRUNC).unwrap();
        assert!(f.readable && f.writable && f.truncating && !f.must_exist);
    }
}
