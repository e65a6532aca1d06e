use std::ffi::{CStr, CString};
use std::os::fd::{AsRawFd, BorrowedFd, OwnedFd, RawFd};
use std::path::Path;

use nix::dir::{Dir, Type};
use nix::errno::Errno;
use nix::fcntl::{AtFlags, OFlag};
use nix::mount::MsFlags;
use nix::sys::stat::{FileStat, Mode, SFlag};
use nix::unistd::UnlinkatFlags;

use super::{DirEntry, DirStream, EntryKind, EntryStat, Result, Syscall};

// linux/loop.h
const LOOP_SET_FD: u32 = 0x4C00;
const LOOP_CTL_GET_FREE: u32 = 0x4C82;

nix::ioctl_none_bad!(loop_ctl_get_free, LOOP_CTL_GET_FREE);
nix::ioctl_write_int_bad!(loop_set_fd, LOOP_SET_FD);

/// Direct system calls against the running kernel.
#[derive(Debug, Default, Clone, Copy)]
pub struct LinuxSyscall;

fn kind_from_stat(st: &FileStat) -> EntryKind {
    let format = SFlag::from_bits_truncate(st.st_mode) & SFlag::S_IFMT;
    if format == SFlag::S_IFDIR {
        EntryKind::Dir
    } else if format == SFlag::S_IFLNK {
        EntryKind::Symlink
    } else {
        EntryKind::Other
    }
}

fn kind_from_type(file_type: Option<Type>) -> EntryKind {
    match file_type {
        Some(Type::Directory) => EntryKind::Dir,
        Some(Type::Symlink) => EntryKind::Symlink,
        Some(_) => EntryKind::Other,
        None => EntryKind::Unknown,
    }
}

#[allow(clippy::unnecessary_cast)]
fn device_id(st: &FileStat) -> u64 {
    st.st_dev as u64
}

impl Syscall for LinuxSyscall {
    fn exists(&self, path: &Path) -> Result<bool> {
        match nix::sys::stat::lstat(path) {
            Ok(_) => Ok(true),
            Err(Errno::ENOENT) => Ok(false),
            Err(e) => Err(e),
        }
    }

    fn mkdir(&self, path: &Path, mode: Mode) -> Result<()> {
        nix::unistd::mkdir(path, mode)
    }

    fn mount(
        &self,
        source: Option<&Path>,
        target: &Path,
        fstype: Option<&str>,
        flags: MsFlags,
        data: Option<&str>,
    ) -> Result<()> {
        nix::mount::mount(source, target, fstype, flags, data)
    }

    fn chdir(&self, path: &Path) -> Result<()> {
        nix::unistd::chdir(path)
    }

    fn chroot(&self, path: &Path) -> Result<()> {
        nix::unistd::chroot(path)
    }

    fn open(&self, path: &Path, flags: OFlag) -> Result<OwnedFd> {
        nix::fcntl::open(path, flags, Mode::empty())
    }

    fn openat(&self, dir: BorrowedFd<'_>, name: &CStr, flags: OFlag) -> Result<OwnedFd> {
        nix::fcntl::openat(dir, name, flags, Mode::empty())
    }

    fn dup_cloexec(&self, fd: BorrowedFd<'_>) -> Result<OwnedFd> {
        // F_DUPFD_CLOEXEC under the hood.
        fd.try_clone_to_owned()
            .map_err(|e| e.raw_os_error().map_or(Errno::EIO, Errno::from_raw))
    }

    fn dup2(&self, fd: BorrowedFd<'_>, target: RawFd) -> Result<()> {
        match target {
            libc::STDIN_FILENO => nix::unistd::dup2_stdin(fd),
            libc::STDOUT_FILENO => nix::unistd::dup2_stdout(fd),
            libc::STDERR_FILENO => nix::unistd::dup2_stderr(fd),
            _ => Err(Errno::EBADF),
        }
    }

    fn loop_get_free(&self, control: BorrowedFd<'_>) -> Result<u32> {
        // SAFETY: LOOP_CTL_GET_FREE takes no argument and returns the index.
        let index = unsafe { loop_ctl_get_free(control.as_raw_fd()) }?;
        u32::try_from(index).map_err(|_| Errno::ERANGE)
    }

    fn loop_set_fd(&self, device: BorrowedFd<'_>, backing: BorrowedFd<'_>) -> Result<()> {
        // SAFETY: LOOP_SET_FD takes the backing descriptor by value.
        unsafe { loop_set_fd(device.as_raw_fd(), backing.as_raw_fd()) }.map(drop)
    }

    fn device_of(&self, fd: BorrowedFd<'_>) -> Result<u64> {
        nix::sys::stat::fstat(fd).map(|st| device_id(&st))
    }

    fn stat_at(&self, dir: BorrowedFd<'_>, name: &CStr) -> Result<EntryStat> {
        let st = nix::sys::stat::fstatat(dir, name, AtFlags::AT_SYMLINK_NOFOLLOW)?;
        Ok(EntryStat {
            dev: device_id(&st),
            kind: kind_from_stat(&st),
        })
    }

    fn read_dir<'a>(&'a self, dir: BorrowedFd<'a>) -> Result<DirStream<'a>> {
        // A fresh open file description starts at offset 0 and leaves `dir`
        // usable for the caller.
        let own = self.openat(
            dir,
            c".",
            OFlag::O_DIRECTORY | OFlag::O_RDONLY | OFlag::O_CLOEXEC,
        )?;
        let stream = Dir::from_fd(own)?.into_iter().map(|entry| {
            entry.map(|entry| DirEntry {
                name: entry.file_name().to_owned(),
                kind: kind_from_type(entry.file_type()),
            })
        });
        Ok(Box::new(stream))
    }

    fn unlinkat(&self, dir: BorrowedFd<'_>, name: &CStr, remove_dir: bool) -> Result<()> {
        let flag = if remove_dir {
            UnlinkatFlags::RemoveDir
        } else {
            UnlinkatFlags::NoRemoveDir
        };
        nix::unistd::unlinkat(dir, name, flag)
    }

    fn execv(&self, path: &CStr, argv: &[CString]) -> Errno {
        match nix::unistd::execv(path, argv) {
            Ok(never) => match never {},
            Err(e) => e,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::fd::AsFd;

    fn names(sys: &LinuxSyscall, dir: &OwnedFd) -> Vec<String> {
        let mut names: Vec<String> = sys
            .read_dir(dir.as_fd())
            .unwrap()
            .map(|e| e.unwrap())
            .filter(|e| !e.is_dot())
            .map(|e| e.name.to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn read_dir_lists_entries_with_kinds() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("file"), b"x").unwrap();
        std::fs::create_dir(tmp.path().join("sub")).unwrap();
        std::os::unix::fs::symlink("file", tmp.path().join("link")).unwrap();

        let sys = LinuxSyscall;
        let dir = sys
            .open(tmp.path(), OFlag::O_DIRECTORY | OFlag::O_RDONLY | OFlag::O_CLOEXEC)
            .unwrap();
        assert_eq!(names(&sys, &dir), ["file", "link", "sub"]);

        let sub = sys.stat_at(dir.as_fd(), c"sub").unwrap();
        assert_eq!(sub.kind, EntryKind::Dir);
        let link = sys.stat_at(dir.as_fd(), c"link").unwrap();
        assert_eq!(link.kind, EntryKind::Symlink);
        assert_eq!(sys.device_of(dir.as_fd()).unwrap(), sub.dev);
    }

    #[test]
    fn read_dir_can_run_twice_on_same_descriptor() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("a"), b"").unwrap();
        let sys = LinuxSyscall;
        let dir = sys
            .open(tmp.path(), OFlag::O_DIRECTORY | OFlag::O_RDONLY | OFlag::O_CLOEXEC)
            .unwrap();
        assert_eq!(names(&sys, &dir), ["a"]);
        assert_eq!(names(&sys, &dir), ["a"]);
    }

    #[test]
    fn exists_does_not_follow_dangling_symlink() {
        let tmp = tempfile::tempdir().unwrap();
        let link = tmp.path().join("dangling");
        std::os::unix::fs::symlink("missing", &link).unwrap();
        let sys = LinuxSyscall;
        assert!(sys.exists(&link).unwrap());
        assert!(!sys.exists(&tmp.path().join("missing")).unwrap());
    }

    #[test]
    fn execv_of_missing_binary_reports_enoent() {
        let sys = LinuxSyscall;
        let errno = sys.execv(c"/nonexistent/init", &[CString::from(c"init")]);
        assert_eq!(errno, Errno::ENOENT);
    }
}
