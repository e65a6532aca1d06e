//! Pseudo filesystem setup on the initramfs.

use std::path::Path;

use nix::sys::stat::Mode;
use tracing::info;

use crate::config::MountSpec;
use crate::error::{BootError, Op, Result};
use crate::syscall::Syscall;

/// Create `path` with mode 0755 unless something already exists there.
pub fn ensure_directory(sys: &dyn Syscall, path: &Path) -> Result<()> {
    let exists = sys
        .exists(path)
        .map_err(|e| BootError::sys(Op::Stat, path, e))?;
    if exists {
        return Ok(());
    }
    sys.mkdir(path, Mode::from_bits_truncate(0o755))
        .map_err(|e| BootError::sys(Op::Mkdir, path, e))
}

/// Create the mount point and attach the filesystem described by `spec`.
pub fn mount_pseudo(sys: &dyn Syscall, spec: &MountSpec) -> Result<()> {
    ensure_directory(sys, &spec.target)?;
    sys.mount(
        Some(Path::new(&spec.source)),
        &spec.target,
        Some(spec.fstype.as_str()),
        spec.flags,
        spec.data.as_deref(),
    )
    .map_err(|e| BootError::sys(Op::Mount, &spec.target, e))?;
    info!(fstype = %spec.fstype, target = %spec.target.display(), "mounted");
    Ok(())
}

/// Mount every entry in order, stopping at the first failure.
pub fn mount_all(sys: &dyn Syscall, specs: &[MountSpec]) -> Result<()> {
    specs.iter().try_for_each(|spec| mount_pseudo(sys, spec))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BootConfig;
    use crate::syscall::LinuxSyscall;
    use crate::syscall::test::{Call, TestSyscall};
    use nix::errno::Errno;
    use nix::mount::MsFlags;
    use std::path::PathBuf;

    #[test]
    fn ensure_directory_is_idempotent() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("newroot");
        let sys = LinuxSyscall;

        ensure_directory(&sys, &dir).unwrap();
        ensure_directory(&sys, &dir).unwrap();
        assert!(dir.is_dir());
    }

    #[test]
    fn ensure_directory_probes_before_creating() {
        let sys = TestSyscall::new();
        sys.add_existing("/proc");
        ensure_directory(&sys, Path::new("/proc")).unwrap();
        ensure_directory(&sys, Path::new("/run")).unwrap();
        assert_eq!(
            sys.calls(),
            [
                Call::Exists(PathBuf::from("/proc")),
                Call::Exists(PathBuf::from("/run")),
                Call::Mkdir(PathBuf::from("/run")),
            ]
        );
    }

    #[test]
    fn ensure_directory_reports_mkdir_failure() {
        let tmp = tempfile::tempdir().unwrap();
        let sys = LinuxSyscall;
        let err = ensure_directory(&sys, &tmp.path().join("missing/child")).unwrap_err();
        assert_eq!(err.errno(), Some(Errno::ENOENT));
    }

    #[test]
    fn mounts_in_configured_order() {
        let sys = TestSyscall::new();
        let config = BootConfig::default();
        mount_all(&sys, &config.pseudo_mounts).unwrap();

        let targets: Vec<_> = sys
            .calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Mount { target, .. } => Some(target.display().to_string()),
                _ => None,
            })
            .collect();
        assert_eq!(
            targets,
            [
                "/dev",
                "/dev/pts",
                "/dev/shm",
                "/tmp",
                "/run",
                "/proc",
                "/sys",
                "/sys/fs/cgroup",
                "/sys/kernel/config",
            ]
        );
    }

    #[test]
    fn mount_point_is_created_before_mount() {
        let sys = TestSyscall::new();
        let config = BootConfig::default();
        mount_pseudo(&sys, &config.pseudo_mounts[5]).unwrap();
        assert_eq!(
            sys.calls(),
            [
                Call::Exists(PathBuf::from("/proc")),
                Call::Mkdir(PathBuf::from("/proc")),
                Call::Mount {
                    source: Some(PathBuf::from("proc")),
                    target: PathBuf::from("/proc"),
                    fstype: Some("proc".into()),
                    flags: MsFlags::MS_NOSUID | MsFlags::MS_NODEV | MsFlags::MS_NOEXEC,
                },
            ]
        );
    }

    #[test]
    fn first_mount_failure_stops_the_sequence() {
        let sys = TestSyscall::new();
        sys.fail_on(
            |c| matches!(c, Call::Mount { target, .. } if target == Path::new("/dev/pts")),
            Errno::ENODEV,
        );
        let config = BootConfig::default();
        let err = mount_all(&sys, &config.pseudo_mounts).unwrap_err();

        assert_eq!(err.to_string(), format!("mount /dev/pts: {}", Errno::ENODEV));
        let mounts = sys
            .calls()
            .iter()
            .filter(|c| matches!(c, Call::Mount { .. }))
            .count();
        assert_eq!(mounts, 2);
    }
}
