//! Mounts a read-only HTTP-indexed backend at `/ro` and a writable
//! local-disk backend at `/rw`, then mirrors a handful of files across.
//!
//! Run with a listing URL and an output directory:
//!
//! ```text
//! cargo run --example mirror -- <listing_url> <prefix_url> <out_dir>
//! ```

use std::sync::Arc;

use vfs_core::backend::{HttpIndexedBackend, LocalDiskBackend};
use vfs_core::{CopyOptions, MkdirOptions, Vfs};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let mut args = std::env::args().skip(1);
    let listing_url = args.next().ok_or("usage: mirror <listing_url> <prefix_url> <out_dir>")?;
    let prefix_url = args.next().unwrap_or_default();
    let out_dir = args.next().unwrap_or_else(|| "./mirror-out".to_string());

    let ro_backend = HttpIndexedBackend::new(&listing_url, &prefix_url)?;
    let rw_backend: Arc<dyn vfs_core::backend::Backend> = LocalDiskBackend::new(&out_dir);

    let vfs = Vfs::new(rw_backend);
    vfs.mount("/ro", ro_backend)?;

    vfs.mkdir("/mirrored", MkdirOptions { mode: 0o755, recursive: true })?;
    vfs.cp("/ro", "/mirrored", CopyOptions { recursive: true, ..Default::default() })?;

    println!("mirrored {listing_url} into {out_dir}/mirrored");
    Ok(())
}
