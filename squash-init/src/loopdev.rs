//! Loop device allocation and binding.

use std::os::fd::AsFd;
use std::path::{Path, PathBuf};

use nix::fcntl::OFlag;
use tracing::info;

use crate::error::{BootError, Op, Result};
use crate::syscall::Syscall;

/// A bound loop device. Only the index survives the attach; the kernel keeps
/// its own reference to the backing file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopDevice {
    pub index: u32,
}

impl LoopDevice {
    /// Device node path, e.g. `/dev/loop0` for prefix `/dev/loop`.
    pub fn path(&self, prefix: &str) -> PathBuf {
        PathBuf::from(format!("{prefix}{}", self.index))
    }
}

/// Allocate a free loop device through `control` and back it with `image`.
pub fn attach(sys: &dyn Syscall, control: &Path, prefix: &str, image: &Path) -> Result<LoopDevice> {
    let index = {
        let ctl = sys
            .open(control, OFlag::O_RDWR | OFlag::O_CLOEXEC)
            .map_err(|e| BootError::sys(Op::Open, control, e))?;
        sys.loop_get_free(ctl.as_fd())
            .map_err(|e| BootError::sys(Op::LoopAllocate, control, e))?
    };
    let device = LoopDevice { index };
    let device_path = device.path(prefix);

    let dev = sys
        .open(&device_path, OFlag::O_RDWR | OFlag::O_CLOEXEC)
        .map_err(|e| BootError::sys(Op::Open, &device_path, e))?;
    let backing = sys
        .open(image, OFlag::O_RDWR | OFlag::O_CLOEXEC)
        .map_err(|e| BootError::sys(Op::Open, image, e))?;
    sys.loop_set_fd(dev.as_fd(), backing.as_fd())
        .map_err(|e| BootError::sys(Op::LoopBind, &device_path, e))?;
    drop(backing);

    info!(image = %image.display(), device = %device_path.display(), "loop device attached");
    Ok(device)
}
