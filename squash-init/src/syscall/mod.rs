//! Kernel primitives used during boot, behind a trait so that the boot
//! sequence can be exercised against a recording backend in tests.

pub mod linux;

use std::ffi::{CStr, CString};
use std::os::fd::{BorrowedFd, OwnedFd, RawFd};
use std::path::Path;

use nix::errno::Errno;
use nix::fcntl::OFlag;
use nix::mount::MsFlags;
use nix::sys::stat::Mode;

pub use linux::LinuxSyscall;

pub type Result<T> = std::result::Result<T, Errno>;

/// File type as reported by a directory stream or `fstatat`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Dir,
    Symlink,
    Other,
    /// The filesystem did not fill in `d_type`.
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub name: CString,
    pub kind: EntryKind,
}

impl DirEntry {
    /// `.` and `..`.
    pub fn is_dot(&self) -> bool {
        matches!(self.name.as_bytes(), b"." | b"..")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryStat {
    pub dev: u64,
    pub kind: EntryKind,
}

/// Lazy, single-pass directory listing.
pub type DirStream<'a> = Box<dyn Iterator<Item = Result<DirEntry>> + 'a>;

pub trait Syscall {
    /// Whether `path` exists; symlinks are not followed.
    fn exists(&self, path: &Path) -> Result<bool>;
    fn mkdir(&self, path: &Path, mode: Mode) -> Result<()>;
    fn mount(
        &self,
        source: Option<&Path>,
        target: &Path,
        fstype: Option<&str>,
        flags: MsFlags,
        data: Option<&str>,
    ) -> Result<()>;
    fn chdir(&self, path: &Path) -> Result<()>;
    fn chroot(&self, path: &Path) -> Result<()>;
    fn open(&self, path: &Path, flags: OFlag) -> Result<OwnedFd>;
    fn openat(&self, dir: BorrowedFd<'_>, name: &CStr, flags: OFlag) -> Result<OwnedFd>;
    /// Duplicate `fd` with close-on-exec set. `EBADF` when `fd` is closed.
    fn dup_cloexec(&self, fd: BorrowedFd<'_>) -> Result<OwnedFd>;
    /// Make `target` (0, 1 or 2) refer to the same open file as `fd`.
    fn dup2(&self, fd: BorrowedFd<'_>, target: RawFd) -> Result<()>;
    /// `LOOP_CTL_GET_FREE` on an open loop-control device.
    fn loop_get_free(&self, control: BorrowedFd<'_>) -> Result<u32>;
    /// `LOOP_SET_FD`: make `backing` the storage of `device`.
    fn loop_set_fd(&self, device: BorrowedFd<'_>, backing: BorrowedFd<'_>) -> Result<()>;
    /// Device id of the filesystem holding `fd`.
    fn device_of(&self, fd: BorrowedFd<'_>) -> Result<u64>;
    /// `fstatat` relative to `dir`, never following a final symlink.
    fn stat_at(&self, dir: BorrowedFd<'_>, name: &CStr) -> Result<EntryStat>;
    fn read_dir<'a>(&'a self, dir: BorrowedFd<'a>) -> Result<DirStream<'a>>;
    fn unlinkat(&self, dir: BorrowedFd<'_>, name: &CStr, remove_dir: bool) -> Result<()>;
    /// Replace the process image. Only returns on failure.
    fn execv(&self, path: &CStr, argv: &[CString]) -> Errno;
}
