//! FUSE binding for the caching pipeline
//!
//! Mounts a [`PuterFs`] at a local directory, allowing transparent read/write
//! access to the remote store.

pub mod inode_table;
pub mod puter_fs;

use std::io;
use std::path::Path;

use fuser::{BackgroundSession, MountOption};

pub use puter_fs::PuterFs;

/// Mount `fs` at `mount_point` on a background thread. The filesystem stays
/// mounted until the returned session is dropped.
pub fn mount(fs: PuterFs, mount_point: &Path) -> io::Result<BackgroundSession> {
    let options = vec![
        MountOption::FSName("puterfs".to_string()),
        MountOption::AutoUnmount,
        MountOption::DefaultPermissions,
    ];
    fuser::spawn_mount2(fs, mount_point, &options)
}
