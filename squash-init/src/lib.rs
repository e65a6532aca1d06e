//! Initramfs init that boots a squashfs root image.
//!
//! Runs as PID 1 from the initramfs. It mounts the pseudo filesystems, finds
//! the squashfs image next to itself, binds it to a loop device, switches root
//! onto it, frees the initramfs and execs the real init. Kernel access goes
//! through the [`Syscall`] trait so the sequence can be tested without root.

pub mod boot;
pub mod config;
pub mod error;
pub mod handoff;
pub mod image;
pub mod loopdev;
pub mod pseudofs;
pub mod reclaim;
pub mod signal;
pub mod sink;
pub mod stage;
pub mod syscall;
pub mod transition;

pub use boot::{BootContext, run};
pub use config::{BootConfig, InitCandidate, MountSpec};
pub use error::{BootError, Op, Result};
pub use stage::{BootStage, StageTracker};
pub use syscall::{LinuxSyscall, Syscall};
