//! FUSE filesystem over the caching pipeline
//!
//! Implements `fuser::Filesystem` by resolving inodes to paths and blocking
//! on the pipeline's async operations.

use std::ffi::OsStr;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use fuser::{
    FileAttr, FileType, Filesystem, ReplyAttr, ReplyCreate, ReplyData, ReplyDirectory, ReplyEmpty,
    ReplyEntry, ReplyOpen, ReplyWrite, ReplyXattr, Request, TimeOrNow,
};
use libc::c_int;
use tokio::runtime::Handle;

use common::engine::{AssociationRegistry, ROOT_INO};
use common::fao::{path, FaoError, FsOps, NodeInfo};

use super::inode_table::InodeTable;

/// Bail out of a FUSE callback with the errno carried by `$result`.
macro_rules! or_reply {
    ($reply:expr, $result:expr) => {
        match $result {
            Ok(value) => value,
            Err(errno) => {
                $reply.error(errno);
                return;
            }
        }
    };
}

pub struct PuterFs {
    /// Tokio runtime handle for async operations
    rt: Handle,
    ops: Arc<dyn FsOps>,
    associations: Arc<AssociationRegistry>,
    inodes: InodeTable,
    next_fh: AtomicU64,
}

impl PuterFs {
    /// Default TTL for FUSE attributes
    const ATTR_TTL: Duration = Duration::from_secs(1);

    /// Block size for FUSE
    const BLOCK_SIZE: u32 = 512;

    pub fn new(rt: Handle, ops: Arc<dyn FsOps>, associations: Arc<AssociationRegistry>) -> Self {
        Self {
            rt,
            ops,
            associations,
            inodes: InodeTable::new(),
            next_fh: AtomicU64::new(1),
        }
    }

    /// The errno a pipeline error surfaces as.
    pub fn errno(e: &FaoError) -> c_int {
        match e {
            FaoError::NotFound(_) => libc::ENOENT,
            FaoError::NotADirectory(_) => libc::ENOTDIR,
            FaoError::IsADirectory(_) => libc::EISDIR,
            FaoError::AlreadyExists(_) => libc::EEXIST,
            FaoError::FileTooLarge { .. } => libc::EFBIG,
            _ => libc::EIO,
        }
    }

    fn kind(info: &NodeInfo) -> FileType {
        if info.is_dir {
            FileType::Directory
        } else if info.is_symlink {
            FileType::Symlink
        } else {
            FileType::RegularFile
        }
    }

    fn timestamp(seconds: f64) -> SystemTime {
        if seconds.is_finite() && seconds > 0.0 {
            UNIX_EPOCH + Duration::from_secs_f64(seconds)
        } else {
            UNIX_EPOCH
        }
    }

    pub fn make_attr(ino: u64, info: &NodeInfo) -> FileAttr {
        let kind = Self::kind(info);
        let perm = match kind {
            FileType::Directory => 0o755,
            FileType::Symlink => 0o777,
            _ => 0o644,
        };
        let size = if info.is_symlink {
            info.symlink_path.as_ref().map_or(0, |t| t.len() as u64)
        } else {
            info.size
        };
        let mtime = Self::timestamp(info.modified);

        FileAttr {
            ino,
            size,
            blocks: size.div_ceil(Self::BLOCK_SIZE as u64),
            atime: Self::timestamp(info.accessed).max(mtime),
            mtime,
            ctime: mtime,
            crtime: Self::timestamp(info.created),
            kind,
            perm,
            nlink: if info.is_dir { 2 } else { 1 },
            uid: unsafe { libc::getuid() },
            gid: unsafe { libc::getgid() },
            rdev: 0,
            blksize: Self::BLOCK_SIZE,
            flags: 0,
        }
    }

    fn next_handle(&self) -> u64 {
        self.next_fh.fetch_add(1, Ordering::Relaxed)
    }

    /// Run a pipeline operation to completion on the runtime.
    fn run<T>(
        &self,
        operation: impl std::future::Future<Output = common::fao::Result<T>>,
    ) -> Result<T, c_int> {
        self.rt.block_on(operation).map_err(|e| Self::errno(&e))
    }

    fn path_of(&self, ino: u64) -> Result<String, c_int> {
        self.inodes
            .get_path(ino)
            .map(str::to_string)
            .ok_or(libc::ENOENT)
    }

    fn child_path(&self, parent: u64, name: &OsStr) -> Result<(String, String), c_int> {
        let name = name.to_str().ok_or(libc::EINVAL)?;
        let parent_path = self.path_of(parent)?;
        Ok((parent_path, name.to_string()))
    }

    /// The inode for `info`, recorded as living at `node_path`.
    fn remember(&mut self, node_path: &str, info: &NodeInfo) -> u64 {
        let ino = if info.local_id.is_empty() {
            self.associations
                .ino_for_local(&format!("path:{}", node_path))
        } else {
            self.associations.ino_for_local(&info.local_id)
        };
        self.inodes.insert(ino, node_path);
        ino
    }

    fn stat_existing(&self, node_path: &str) -> Result<NodeInfo, c_int> {
        self.run(self.ops.stat(node_path))?.ok_or(libc::ENOENT)
    }
}

impl Filesystem for PuterFs {
    fn init(
        &mut self,
        _req: &Request<'_>,
        _config: &mut fuser::KernelConfig,
    ) -> Result<(), c_int> {
        tracing::info!("FUSE filesystem initialized");
        Ok(())
    }

    fn destroy(&mut self) {
        tracing::info!("FUSE filesystem destroyed");
    }

    fn lookup(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEntry) {
        let (parent_path, name) = or_reply!(reply, self.child_path(parent, name));
        let node_path = path::join(&parent_path, &name);
        let info = or_reply!(reply, self.stat_existing(&node_path));
        let ino = self.remember(&node_path, &info);
        reply.entry(&Self::ATTR_TTL, &Self::make_attr(ino, &info), 0);
    }

    fn getattr(&mut self, _req: &Request<'_>, ino: u64, _fh: Option<u64>, reply: ReplyAttr) {
        let node_path = or_reply!(reply, self.path_of(ino));
        let info = or_reply!(reply, self.stat_existing(&node_path));
        reply.attr(&Self::ATTR_TTL, &Self::make_attr(ino, &info));
    }

    fn setattr(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _mode: Option<u32>,
        _uid: Option<u32>,
        _gid: Option<u32>,
        size: Option<u64>,
        _atime: Option<TimeOrNow>,
        _mtime: Option<TimeOrNow>,
        _ctime: Option<SystemTime>,
        _fh: Option<u64>,
        _crtime: Option<SystemTime>,
        _chgtime: Option<SystemTime>,
        _bkuptime: Option<SystemTime>,
        _flags: Option<u32>,
        reply: ReplyAttr,
    ) {
        let node_path = or_reply!(reply, self.path_of(ino));
        if let Some(size) = size {
            or_reply!(reply, self.run(self.ops.truncate(&node_path, size)));
        }
        let info = or_reply!(reply, self.stat_existing(&node_path));
        reply.attr(&Self::ATTR_TTL, &Self::make_attr(ino, &info));
    }

    fn readdir(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        mut reply: ReplyDirectory,
    ) {
        let dir_path = or_reply!(reply, self.path_of(ino));
        let children = or_reply!(reply, self.run(self.ops.read_dir(&dir_path)));

        let parent_ino = if ino == ROOT_INO {
            ROOT_INO
        } else {
            self.inodes
                .get_inode(&path::parent(&dir_path))
                .unwrap_or(ROOT_INO)
        };

        let mut entries = vec![
            (ino, FileType::Directory, ".".to_string()),
            (parent_ino, FileType::Directory, "..".to_string()),
        ];
        for child in children {
            let child_path = path::join(&dir_path, &child.name);
            let child_ino = self.remember(&child_path, &child);
            entries.push((child_ino, Self::kind(&child), child.name));
        }

        let skip = usize::try_from(offset).unwrap_or(0);
        for (i, (ino, kind, name)) in entries.into_iter().enumerate().skip(skip) {
            if reply.add(ino, (i + 1) as i64, kind, name) {
                break;
            }
        }
        reply.ok();
    }

    fn open(&mut self, _req: &Request<'_>, ino: u64, _flags: i32, reply: ReplyOpen) {
        let node_path = or_reply!(reply, self.path_of(ino));
        let info = or_reply!(reply, self.stat_existing(&node_path));
        if info.is_dir {
            reply.error(libc::EISDIR);
            return;
        }
        reply.opened(self.next_handle(), 0);
    }

    fn read(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        size: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyData,
    ) {
        let node_path = or_reply!(reply, self.path_of(ino));
        let offset = or_reply!(reply, u64::try_from(offset).map_err(|_| libc::EINVAL));
        let mut buf = vec![0u8; size as usize];
        let n = or_reply!(reply, self.run(self.ops.read(&node_path, &mut buf, offset)));
        reply.data(&buf[..n.min(buf.len())]);
    }

    fn write(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        data: &[u8],
        _write_flags: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyWrite,
    ) {
        let node_path = or_reply!(reply, self.path_of(ino));
        let offset = or_reply!(reply, u64::try_from(offset).map_err(|_| libc::EINVAL));
        let n = or_reply!(reply, self.run(self.ops.write(&node_path, data, offset)));
        reply.written(n as u32);
    }

    fn create(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        _mode: u32,
        _umask: u32,
        flags: i32,
        reply: ReplyCreate,
    ) {
        let (parent_path, name) = or_reply!(reply, self.child_path(parent, name));
        let info = or_reply!(reply, self.run(self.ops.create(&parent_path, &name)));
        let ino = self.remember(&path::join(&parent_path, &name), &info);
        reply.created(
            &Self::ATTR_TTL,
            &Self::make_attr(ino, &info),
            0,
            self.next_handle(),
            flags as u32,
        );
    }

    fn mkdir(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        _mode: u32,
        _umask: u32,
        reply: ReplyEntry,
    ) {
        let (parent_path, name) = or_reply!(reply, self.child_path(parent, name));
        let info = or_reply!(reply, self.run(self.ops.mkdir(&parent_path, &name)));
        let ino = self.remember(&path::join(&parent_path, &name), &info);
        reply.entry(&Self::ATTR_TTL, &Self::make_attr(ino, &info), 0);
    }

    fn unlink(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        let (parent_path, name) = or_reply!(reply, self.child_path(parent, name));
        let node_path = path::join(&parent_path, &name);
        let info = or_reply!(reply, self.stat_existing(&node_path));
        if info.is_dir {
            reply.error(libc::EISDIR);
            return;
        }
        or_reply!(reply, self.run(self.ops.unlink(&node_path)));
        self.inodes.remove_subtree(&node_path);
        reply.ok();
    }

    fn rmdir(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        let (parent_path, name) = or_reply!(reply, self.child_path(parent, name));
        let node_path = path::join(&parent_path, &name);
        let info = or_reply!(reply, self.stat_existing(&node_path));
        if !info.is_dir {
            reply.error(libc::ENOTDIR);
            return;
        }
        let children = or_reply!(reply, self.run(self.ops.read_dir(&node_path)));
        if !children.is_empty() {
            reply.error(libc::ENOTEMPTY);
            return;
        }
        or_reply!(reply, self.run(self.ops.unlink(&node_path)));
        self.inodes.remove_subtree(&node_path);
        reply.ok();
    }

    fn rename(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        newparent: u64,
        newname: &OsStr,
        _flags: u32,
        reply: ReplyEmpty,
    ) {
        let (parent_path, name) = or_reply!(reply, self.child_path(parent, name));
        let (new_parent_path, new_name) = or_reply!(reply, self.child_path(newparent, newname));
        let source = path::join(&parent_path, &name);
        or_reply!(
            reply,
            self.run(self.ops.mv(&source, &new_parent_path, &new_name))
        );
        self.inodes
            .rename(&source, &path::join(&new_parent_path, &new_name));
        reply.ok();
    }

    fn symlink(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        link_name: &OsStr,
        target: &Path,
        reply: ReplyEntry,
    ) {
        let (parent_path, name) = or_reply!(reply, self.child_path(parent, link_name));
        let target = or_reply!(reply, target.to_str().ok_or(libc::EINVAL));
        let info = or_reply!(
            reply,
            self.run(self.ops.symlink(&parent_path, &name, target))
        );
        let ino = self.remember(&path::join(&parent_path, &name), &info);
        reply.entry(&Self::ATTR_TTL, &Self::make_attr(ino, &info), 0);
    }

    fn readlink(&mut self, _req: &Request<'_>, ino: u64, reply: ReplyData) {
        let node_path = or_reply!(reply, self.path_of(ino));
        let info = or_reply!(reply, self.stat_existing(&node_path));
        match info.symlink_path {
            Some(target) if info.is_symlink => reply.data(target.as_bytes()),
            _ => reply.error(libc::EINVAL),
        }
    }

    fn setxattr(
        &mut self,
        _req: &Request<'_>,
        _ino: u64,
        _name: &OsStr,
        _value: &[u8],
        _flags: i32,
        _position: u32,
        reply: ReplyEmpty,
    ) {
        reply.error(libc::ENOTSUP);
    }

    fn getxattr(
        &mut self,
        _req: &Request<'_>,
        _ino: u64,
        _name: &OsStr,
        _size: u32,
        reply: ReplyXattr,
    ) {
        reply.error(libc::ENOTSUP);
    }

    fn listxattr(&mut self, _req: &Request<'_>, _ino: u64, _size: u32, reply: ReplyXattr) {
        reply.error(libc::ENOTSUP);
    }

    fn removexattr(&mut self, _req: &Request<'_>, _ino: u64, _name: &OsStr, reply: ReplyEmpty) {
        reply.error(libc::ENOTSUP);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_errno_mapping() {
        let cases = [
            (FaoError::NotFound("/a".into()), libc::ENOENT),
            (FaoError::NotADirectory("/a".into()), libc::ENOTDIR),
            (FaoError::IsADirectory("/a".into()), libc::EISDIR),
            (FaoError::AlreadyExists("/a".into()), libc::EEXIST),
            (
                FaoError::FileTooLarge {
                    path: "/a".into(),
                    size: u64::MAX,
                },
                libc::EFBIG,
            ),
            (FaoError::ProtocolViolation("bad".into()), libc::EIO),
            (FaoError::Transport("down".into()), libc::EIO),
            (FaoError::Timeout(Duration::from_secs(1)), libc::EIO),
        ];
        for (error, expected) in cases {
            assert_eq!(PuterFs::errno(&error), expected, "{:?}", error);
        }
    }

    #[test]
    fn test_file_attr() {
        let info = NodeInfo {
            path: "/a.txt".into(),
            name: "a.txt".into(),
            size: 1025,
            modified: 1_700_000_000.0,
            ..Default::default()
        };
        let attr = PuterFs::make_attr(7, &info);
        assert_eq!(attr.ino, 7);
        assert_eq!(attr.kind, FileType::RegularFile);
        assert_eq!(attr.perm, 0o644);
        assert_eq!(attr.size, 1025);
        assert_eq!(attr.blocks, 3);
        assert_eq!(
            attr.mtime,
            UNIX_EPOCH + Duration::from_secs(1_700_000_000)
        );
    }

    #[test]
    fn test_directory_and_symlink_attrs() {
        let dir = NodeInfo {
            is_dir: true,
            ..Default::default()
        };
        let attr = PuterFs::make_attr(2, &dir);
        assert_eq!(attr.kind, FileType::Directory);
        assert_eq!(attr.perm, 0o755);
        assert_eq!(attr.mtime, UNIX_EPOCH);

        let link = NodeInfo {
            is_symlink: true,
            symlink_path: Some("/target".into()),
            size: 999,
            ..Default::default()
        };
        let attr = PuterFs::make_attr(3, &link);
        assert_eq!(attr.kind, FileType::Symlink);
        assert_eq!(attr.size, 7);
    }
}
