//! Boot orchestration.
//!
//! Steps run strictly in order:
//!
//! 1. Mount the device tree, attach the diagnostics sink to the kernel log,
//!    mount the remaining pseudo filesystems
//! 2. Locate the squashfs image on the initramfs
//! 3. Bind it to a free loop device
//! 4. Mount the loop device, move the pseudo filesystems over, switch root
//! 5. Free the old initramfs
//! 6. Restore stdout/stderr and exec the real init
//!
//! The device tree goes first because `/dev/kmsg` lives in it.

use std::convert::Infallible;
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::config::BootConfig;
use crate::error::{BootError, Result};
use crate::handoff::hand_off;
use crate::image::find_image;
use crate::loopdev;
use crate::pseudofs::{mount_all, mount_pseudo};
use crate::reclaim::{ReclaimReport, RootHandle, reclaim};
use crate::sink::DiagnosticsSink;
use crate::stage::{BootStage, StageTracker};
use crate::syscall::Syscall;
use crate::transition;

/// State threaded through every boot step.
pub struct BootContext<'a> {
    sys: &'a dyn Syscall,
    config: &'a BootConfig,
    stages: StageTracker,
    sink: Option<DiagnosticsSink>,
}

impl<'a> BootContext<'a> {
    pub fn new(sys: &'a dyn Syscall, config: &'a BootConfig) -> Self {
        Self {
            sys,
            config,
            stages: StageTracker::new(),
            sink: None,
        }
    }

    pub fn stage(&self) -> BootStage {
        self.stages.current()
    }

    /// Run the whole sequence. Only returns on failure.
    pub fn boot(&mut self) -> Result<Infallible> {
        self.mount_pseudo_filesystems()?;
        let image = self.locate_image()?;
        let device = self.attach_loop(&image)?;
        let old_root = transition::switch_root(
            self.sys,
            &self.config.staging,
            &device,
            &self.config.relocations,
            &mut self.stages,
        )?;
        self.reclaim_old_root(old_root)?;
        self.restore_sink();
        hand_off(self.sys, &self.config.init_candidates, &mut self.stages)
    }

    fn mount_pseudo_filesystems(&mut self) -> Result<()> {
        let split = self.config.pseudo_mounts.split_first();
        if let Some((device_tree, _)) = split {
            mount_pseudo(self.sys, device_tree)?;
        }
        self.sink = Some(DiagnosticsSink::attach(self.sys, &self.config.kmsg)?);
        if let Some((_, rest)) = split {
            mount_all(self.sys, rest)?;
        }
        self.stages.advance(BootStage::PseudoFsMounted)
    }

    fn locate_image(&mut self) -> Result<PathBuf> {
        let dir = &self.config.image_dir;
        let name = find_image(dir).ok_or_else(|| BootError::ImageNotFound {
            dir: dir.display().to_string(),
        })?;
        self.stages.advance(BootStage::ImageLocated)?;
        Ok(dir.join(name))
    }

    /// Returns the loop device node path.
    fn attach_loop(&mut self, image: &Path) -> Result<PathBuf> {
        let device = loopdev::attach(
            self.sys,
            &self.config.loop_control,
            &self.config.loop_prefix,
            image,
        )?;
        self.stages.advance(BootStage::LoopAttached)?;
        Ok(device.path(&self.config.loop_prefix))
    }

    fn reclaim_old_root(&mut self, old_root: RootHandle) -> Result<ReclaimReport> {
        let report = reclaim(self.sys, old_root);
        if report.failures > 0 {
            warn!(failures = report.failures, "old root only partially reclaimed");
        }
        self.stages.advance(BootStage::OldRootReclaimed)?;
        Ok(report)
    }

    /// A failed restore leaves the streams on the kernel log, which the next
    /// init can live with.
    fn restore_sink(&mut self) {
        let Some(sink) = self.sink.take() else {
            return;
        };
        match sink.restore(self.sys) {
            Ok(()) => info!("handing off to init"),
            Err(e) => warn!(error = %e, "cannot restore original stdout/stderr"),
        }
    }
}

/// Boot the squashfs root described by `config`.
pub fn run(sys: &dyn Syscall, config: &BootConfig) -> Result<Infallible> {
    BootContext::new(sys, config).boot()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::syscall::test::{Call, TestSyscall};
    use nix::errno::Errno;
    use nix::mount::MsFlags;
    use std::panic::{AssertUnwindSafe, catch_unwind};
    use tempfile::TempDir;

    /// Default config with the image directory pointed at a scratch dir
    /// holding one squashfs image.
    fn config_with_image() -> (TempDir, BootConfig) {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("README"), b"not an image").unwrap();
        std::fs::write(tmp.path().join("rootfs.sqsh"), b"hsqs\0\0\0\0").unwrap();
        let config = BootConfig {
            image_dir: tmp.path().to_path_buf(),
            ..BootConfig::default()
        };
        (tmp, config)
    }

    fn position(calls: &[Call], wanted: &Call) -> usize {
        calls
            .iter()
            .position(|c| c == wanted)
            .unwrap_or_else(|| panic!("{wanted:?} not issued"))
    }

    fn mount_of(target: &str) -> impl Fn(&Call) -> bool + '_ {
        move |c: &Call| matches!(c, Call::Mount { target: t, .. } if t == Path::new(target))
    }

    #[test]
    fn full_boot_runs_every_step_in_order_and_execs_init() {
        let (_tmp, config) = config_with_image();
        let image = config.image_dir.join("rootfs.sqsh");
        let sys = TestSyscall::new().with_loop_index(2);
        sys.add_runnable("/sbin/init");

        let mut ctx = BootContext::new(&sys, &config);
        let outcome = catch_unwind(AssertUnwindSafe(|| ctx.boot()));

        let payload = outcome.unwrap_err();
        assert_eq!(payload.downcast_ref::<String>().unwrap(), "exec /sbin/init");
        assert_eq!(ctx.stage(), BootStage::HandedOff);

        let calls = sys.calls();
        let dev = calls.iter().position(mount_of("/dev")).unwrap();
        let kmsg = position(&calls, &Call::Open(PathBuf::from("/dev/kmsg")));
        let pts = calls.iter().position(mount_of("/dev/pts")).unwrap();
        let backing = position(&calls, &Call::Open(image));
        let bind = position(&calls, &Call::LoopSetFd);
        let new_root = position(
            &calls,
            &Call::Mount {
                source: Some(PathBuf::from("/dev/loop2")),
                target: PathBuf::from("/newroot"),
                fstype: Some("squashfs".into()),
                flags: MsFlags::MS_RDONLY,
            },
        );
        let chroot = position(&calls, &Call::Chroot(PathBuf::from(".")));
        let walk = position(&calls, &Call::ReadDir);
        let exec = position(&calls, &Call::Exec(PathBuf::from("/sbin/init")));

        assert!(dev < kmsg && kmsg < pts);
        assert!(pts < backing && backing < bind && bind < new_root);
        assert!(new_root < chroot && chroot < walk && walk < exec);

        // Both streams are pointed back after reclaim and before exec.
        let restores: Vec<_> = calls[walk..exec]
            .iter()
            .filter(|c| matches!(c, Call::Dup2(_)))
            .collect();
        assert_eq!(
            restores,
            [
                &Call::Dup2(libc::STDOUT_FILENO),
                &Call::Dup2(libc::STDERR_FILENO)
            ]
        );
    }

    #[test]
    fn getty_is_skipped_without_bootstrap_script() {
        let (_tmp, config) = config_with_image();
        let sys = TestSyscall::new();
        sys.add_runnable("/sbin/init");

        let outcome = catch_unwind(AssertUnwindSafe(|| run(&sys, &config)));

        assert!(outcome.is_err());
        let execs: Vec<_> = sys
            .calls()
            .into_iter()
            .filter(|c| matches!(c, Call::Exec(_)))
            .collect();
        assert_eq!(execs, [Call::Exec(PathBuf::from("/sbin/init"))]);
    }

    #[test]
    fn missing_image_stops_before_touching_loop_devices() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("config.txt"), b"plain text").unwrap();
        let config = BootConfig {
            image_dir: tmp.path().to_path_buf(),
            ..BootConfig::default()
        };
        let sys = TestSyscall::new();

        let mut ctx = BootContext::new(&sys, &config);
        let err = ctx.boot().unwrap_err();

        assert!(matches!(err, BootError::ImageNotFound { .. }));
        assert_eq!(ctx.stage(), BootStage::PseudoFsMounted);
        assert!(!sys.calls().contains(&Call::LoopGetFree));
    }

    #[test]
    fn kernel_log_failure_stops_after_device_tree() {
        let (_tmp, config) = config_with_image();
        let sys = TestSyscall::new();
        sys.fail_on(
            |c| *c == Call::Open(PathBuf::from("/dev/kmsg")),
            Errno::ENOENT,
        );

        let mut ctx = BootContext::new(&sys, &config);
        let err = ctx.boot().unwrap_err();

        assert_eq!(err.errno(), Some(Errno::ENOENT));
        assert_eq!(ctx.stage(), BootStage::Start);
        let mounts = sys
            .calls()
            .iter()
            .filter(|c| matches!(c, Call::Mount { .. }))
            .count();
        assert_eq!(mounts, 1);
    }

    #[test]
    fn switch_failure_leaves_stage_at_last_completed_step() {
        let (_tmp, config) = config_with_image();
        let sys = TestSyscall::new();
        sys.fail_on(|c| matches!(c, Call::Chroot(_)), Errno::EPERM);

        let mut ctx = BootContext::new(&sys, &config);
        let err = ctx.boot().unwrap_err();

        assert_eq!(err.errno(), Some(Errno::EPERM));
        assert_eq!(ctx.stage(), BootStage::PseudoFsRelocated);
        assert!(!sys.calls().contains(&Call::ReadDir));
    }

    #[test]
    fn every_init_failing_is_reported_after_streams_are_restored() {
        let (_tmp, config) = config_with_image();
        let sys = TestSyscall::new();

        let err = run(&sys, &config).unwrap_err();

        assert!(matches!(err, BootError::NoInit { tried: 2 }));
        let calls = sys.calls();
        let first_exec = calls
            .iter()
            .position(|c| matches!(c, Call::Exec(_)))
            .unwrap();
        assert_eq!(
            calls[first_exec - 2..first_exec],
            [
                Call::Dup2(libc::STDERR_FILENO),
                Call::Exists(PathBuf::from("/etc/bootstrap.sh")),
            ]
        );
    }

    #[test]
    fn no_exec_issued_leaves_stage_at_reclaimed() {
        let (_tmp, mut config) = config_with_image();
        config.init_candidates.truncate(1);
        let sys = TestSyscall::new();

        let mut ctx = BootContext::new(&sys, &config);
        let err = ctx.boot().unwrap_err();

        assert!(matches!(err, BootError::NoInit { tried: 0 }));
        assert_eq!(ctx.stage(), BootStage::OldRootReclaimed);
    }

    #[test]
    fn empty_mount_table_still_attaches_the_sink() {
        let (_tmp, mut config) = config_with_image();
        config.pseudo_mounts.clear();
        config.relocations.clear();
        let sys = TestSyscall::new();
        sys.add_runnable("/sbin/init");

        let outcome = catch_unwind(AssertUnwindSafe(|| run(&sys, &config)));

        assert!(outcome.is_err());
        assert_eq!(sys.calls()[0], Call::Open(PathBuf::from("/dev/kmsg")));
    }
}
