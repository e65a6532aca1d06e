//! Switching from the initramfs onto the squashfs root.
//!
//! The sequence is strictly linear. Once the first pseudo filesystem has been
//! moved off the initramfs there is no way back, so every failure here is
//! fatal to the boot.

use std::path::{Path, PathBuf};

use nix::mount::MsFlags;
use tracing::info;

use crate::error::{BootError, Op, Result};
use crate::pseudofs::ensure_directory;
use crate::reclaim::RootHandle;
use crate::stage::{BootStage, StageTracker};
use crate::syscall::Syscall;

const SQUASHFS: &str = "squashfs";

pub struct RootTransition<'a> {
    sys: &'a dyn Syscall,
    staging: &'a Path,
}

impl<'a> RootTransition<'a> {
    pub fn new(sys: &'a dyn Syscall, staging: &'a Path) -> Self {
        Self { sys, staging }
    }

    /// Mount `device` read-only at the staging path.
    pub fn mount_new_root(&self, device: &Path) -> Result<()> {
        ensure_directory(self.sys, self.staging)?;
        self.sys
            .mount(
                Some(device),
                self.staging,
                Some(SQUASHFS),
                MsFlags::MS_RDONLY,
                None,
            )
            .map_err(|e| BootError::sys(Op::Mount, self.staging, e))?;
        info!(
            device = %device.display(),
            target = %self.staging.display(),
            "new root mounted read-only"
        );
        Ok(())
    }

    /// Move each mount in `mounts` to the same path under the staging root.
    pub fn relocate(&self, mounts: &[PathBuf]) -> Result<()> {
        for from in mounts {
            let to = self.staged(from);
            self.sys
                .mount(Some(from), &to, None, MsFlags::MS_MOVE, None)
                .map_err(|e| BootError::sys(Op::MoveMount, from, e))?;
            info!(from = %from.display(), to = %to.display(), "mount moved");
        }
        Ok(())
    }

    /// Make the staging root the process root.
    ///
    /// Returns a handle on the old root, opened while it is still reachable
    /// by path.
    pub fn switch(&self) -> Result<RootHandle> {
        let root = Path::new("/");
        let here = Path::new(".");

        self.sys
            .chdir(self.staging)
            .map_err(|e| BootError::sys(Op::Chdir, self.staging, e))?;
        let old_root = RootHandle::open(self.sys, root)?;

        self.sys
            .mount(Some(here), root, None, MsFlags::MS_MOVE, None)
            .map_err(|e| BootError::sys(Op::MoveMount, self.staging, e))?;
        self.sys
            .chroot(here)
            .map_err(|e| BootError::sys(Op::Chroot, self.staging, e))?;
        // Relative lookups only resolve inside the new root after this.
        self.sys
            .chdir(root)
            .map_err(|e| BootError::sys(Op::Chdir, root, e))?;

        info!("switched root");
        Ok(old_root)
    }

    fn staged(&self, path: &Path) -> PathBuf {
        self.staging.join(path.strip_prefix("/").unwrap_or(path))
    }
}

/// Run the whole transition, recording each stage.
pub fn switch_root(
    sys: &dyn Syscall,
    staging: &Path,
    device: &Path,
    relocations: &[PathBuf],
    stages: &mut StageTracker,
) -> Result<RootHandle> {
    let transition = RootTransition::new(sys, staging);

    transition.mount_new_root(device)?;
    stages.advance(BootStage::NewRootMounted)?;

    transition.relocate(relocations)?;
    stages.advance(BootStage::PseudoFsRelocated)?;

    let old_root = transition.switch()?;
    stages.advance(BootStage::RootSwitched)?;
    Ok(old_root)
}
