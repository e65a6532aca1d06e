use std::fmt;
use std::path::Path;

use nix::errno::Errno;

use crate::stage::BootStage;

/// Kernel-facing operation that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Stat,
    Mkdir,
    Mount,
    MoveMount,
    Open,
    Dup,
    Dup2,
    Chdir,
    Chroot,
    LoopAllocate,
    LoopBind,
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Op::Stat => "stat",
            Op::Mkdir => "mkdir",
            Op::Mount => "mount",
            Op::MoveMount => "move mount",
            Op::Open => "open",
            Op::Dup => "dup",
            Op::Dup2 => "dup2",
            Op::Chdir => "chdir",
            Op::Chroot => "chroot",
            Op::LoopAllocate => "allocate loop device via",
            Op::LoopBind => "bind loop device",
        };
        f.write_str(s)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BootError {
    #[error("{op} {path}: {errno}")]
    Sys { op: Op, path: String, errno: Errno },

    #[error("no squashfs image found in {dir}")]
    ImageNotFound { dir: String },

    #[error("boot stage {next} cannot follow {current}")]
    StageOrder { current: BootStage, next: BootStage },

    #[error("no init found (tried {tried})")]
    NoInit { tried: usize },
}

impl BootError {
    pub fn sys(op: Op, path: impl AsRef<Path>, errno: Errno) -> Self {
        BootError::Sys {
            op,
            path: path.as_ref().display().to_string(),
            errno,
        }
    }

    /// OS error reported by the kernel, if the failure came from a syscall.
    pub fn errno(&self) -> Option<Errno> {
        match self {
            BootError::Sys { errno, .. } => Some(*errno),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, BootError>;
