//! Freeing the initramfs after the root switch.
//!
//! The old root is only reachable through a descriptor opened before the
//! switch. Everything under it on the same device is deleted depth first.
//! Directories on another device are mount points and are left alone, and
//! symlinks are unlinked, never followed. Failures are logged and counted but
//! never stop the walk.

use std::ffi::{CStr, CString};
use std::os::fd::{AsFd, BorrowedFd, OwnedFd};
use std::os::unix::ffi::OsStrExt;
use std::path::Path;

use nix::errno::Errno;
use nix::fcntl::OFlag;
use tracing::{debug, info, warn};

use crate::error::{BootError, Op, Result};
use crate::syscall::{DirEntry, EntryKind, Syscall};

fn dir_flags() -> OFlag {
    OFlag::O_DIRECTORY | OFlag::O_RDONLY | OFlag::O_NOFOLLOW | OFlag::O_CLOEXEC
}

/// Open handle on a directory tree to be reclaimed.
#[derive(Debug)]
pub struct RootHandle {
    dir: OwnedFd,
    /// Parent directory and entry name, when the tree root itself can be
    /// removed. The filesystem root has none.
    parent: Option<(OwnedFd, CString)>,
}

impl RootHandle {
    pub fn open(sys: &dyn Syscall, path: &Path) -> Result<Self> {
        let dir = sys
            .open(path, dir_flags())
            .map_err(|e| BootError::sys(Op::Open, path, e))?;

        let parent = match path.file_name() {
            Some(name) => {
                let parent_path = match path.parent() {
                    Some(p) if !p.as_os_str().is_empty() => p,
                    _ => Path::new("."),
                };
                let parent = sys
                    .open(parent_path, dir_flags())
                    .map_err(|e| BootError::sys(Op::Open, parent_path, e))?;
                let name = CString::new(name.as_bytes())
                    .map_err(|_| BootError::sys(Op::Open, path, Errno::EINVAL))?;
                Some((parent, name))
            }
            None => None,
        };
        Ok(Self { dir, parent })
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReclaimReport {
    pub files: usize,
    pub dirs: usize,
    pub skipped_mounts: usize,
    pub failures: usize,
}

/// Delete everything reachable from `root` on its own device, then the root
/// directory itself when it has a parent. Consumes and closes the handle.
pub fn reclaim(sys: &dyn Syscall, root: RootHandle) -> ReclaimReport {
    let root_dev = match sys.device_of(root.dir.as_fd()) {
        Ok(dev) => dev,
        Err(e) => {
            warn!(error = %e, "cannot stat old root, leaving it in place");
            return ReclaimReport {
                failures: 1,
                ..ReclaimReport::default()
            };
        }
    };

    let mut walk = Walk {
        sys,
        root_dev,
        report: ReclaimReport::default(),
    };
    walk.empty(root.dir.as_fd());

    if let Some((parent, name)) = &root.parent
        && walk.unlink(parent.as_fd(), name, true)
    {
        walk.report.dirs += 1;
    }
    drop(root);

    let report = walk.report;
    info!(
        files = report.files,
        dirs = report.dirs,
        skipped_mounts = report.skipped_mounts,
        failures = report.failures,
        "old root reclaimed"
    );
    report
}

struct Walk<'a> {
    sys: &'a dyn Syscall,
    root_dev: u64,
    report: ReclaimReport,
}

impl Walk<'_> {
    /// Remove every entry inside `dir`.
    fn empty(&mut self, dir: BorrowedFd<'_>) {
        let sys = self.sys;
        let entries = match sys.read_dir(dir) {
            Ok(entries) => entries,
            Err(e) => {
                warn!(error = %e, "cannot list directory");
                self.report.failures += 1;
                return;
            }
        };

        for entry in entries {
            match entry {
                Ok(entry) if entry.is_dot() => {}
                Ok(entry) => self.visit(dir, &entry),
                Err(e) => {
                    warn!(error = %e, "directory read failed");
                    self.report.failures += 1;
                }
            }
        }
    }

    fn visit(&mut self, dir: BorrowedFd<'_>, entry: &DirEntry) {
        let name = entry.name.as_c_str();
        let kind = match entry.kind {
            EntryKind::Dir | EntryKind::Unknown => match self.sys.stat_at(dir, name) {
                Ok(stat) if stat.kind == EntryKind::Dir && stat.dev != self.root_dev => {
                    debug!(name = %name.to_string_lossy(), dev = stat.dev, "skipping mount point");
                    self.report.skipped_mounts += 1;
                    return;
                }
                Ok(stat) => stat.kind,
                Err(e) => {
                    warn!(name = %name.to_string_lossy(), error = %e, "stat failed");
                    self.report.failures += 1;
                    return;
                }
            },
            kind => kind,
        };

        if kind != EntryKind::Dir {
            if self.unlink(dir, name, false) {
                self.report.files += 1;
            }
            return;
        }

        match self.sys.openat(dir, name, dir_flags()) {
            Ok(child) => self.empty(child.as_fd()),
            Err(e) => {
                warn!(name = %name.to_string_lossy(), error = %e, "cannot open directory");
                self.report.failures += 1;
                return;
            }
        }
        if self.unlink(dir, name, true) {
            self.report.dirs += 1;
        }
    }

    fn unlink(&mut self, dir: BorrowedFd<'_>, name: &CStr, remove_dir: bool) -> bool {
        match self.sys.unlinkat(dir, name, remove_dir) {
            Ok(()) => true,
            Err(e) => {
                warn!(name = %name.to_string_lossy(), error = %e, "unlink failed");
                self.report.failures += 1;
                false
            }
        }
    }
}
