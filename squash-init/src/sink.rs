//! Early boot diagnostics.
//!
//! There is no console until the real root is up, so stdout and stderr are
//! pointed at the kernel log device and put back before handing off.

use std::os::fd::{AsFd, BorrowedFd, OwnedFd, RawFd};
use std::path::Path;

use nix::errno::Errno;
use nix::fcntl::OFlag;
use tracing::debug;

use crate::error::{BootError, Op, Result};
use crate::syscall::Syscall;

const STDOUT: RawFd = libc::STDOUT_FILENO;
const STDERR: RawFd = libc::STDERR_FILENO;

/// Original stdout/stderr, saved while both point at the kernel log.
///
/// PID 1 may start with no console and therefore closed standard
/// descriptors; a stream that was closed has nothing saved and stays on the
/// kernel log after [`DiagnosticsSink::restore`].
#[derive(Debug)]
pub struct DiagnosticsSink {
    saved_stdout: Option<OwnedFd>,
    saved_stderr: Option<OwnedFd>,
}

impl DiagnosticsSink {
    /// Redirect stdout and stderr to `kmsg`.
    pub fn attach(sys: &dyn Syscall, kmsg: &Path) -> Result<Self> {
        let log = sys
            .open(kmsg, OFlag::O_WRONLY | OFlag::O_NOCTTY | OFlag::O_CLOEXEC)
            .map_err(|e| BootError::sys(Op::Open, kmsg, e))?;

        // Saved copies are close-on-exec so they never reach the next init.
        let saved_stdout = save(sys, std::io::stdout().as_fd(), "stdout")?;
        let saved_stderr = save(sys, std::io::stderr().as_fd(), "stderr")?;

        sys.dup2(log.as_fd(), STDERR)
            .map_err(|e| BootError::sys(Op::Dup2, kmsg, e))?;
        sys.dup2(log.as_fd(), STDOUT)
            .map_err(|e| BootError::sys(Op::Dup2, kmsg, e))?;
        drop(log);

        debug!(path = %kmsg.display(), "diagnostics redirected to kernel log");
        Ok(Self {
            saved_stdout,
            saved_stderr,
        })
    }

    /// Put back whichever of stdout and stderr were open at attach time.
    pub fn restore(self, sys: &dyn Syscall) -> Result<()> {
        if let Some(fd) = &self.saved_stdout {
            sys.dup2(fd.as_fd(), STDOUT)
                .map_err(|e| BootError::sys(Op::Dup2, "stdout", e))?;
        }
        if let Some(fd) = &self.saved_stderr {
            sys.dup2(fd.as_fd(), STDERR)
                .map_err(|e| BootError::sys(Op::Dup2, "stderr", e))?;
        }
        debug!("diagnostics restored to original descriptors");
        Ok(())
    }
}

/// Duplicate a standard stream; a closed stream (`EBADF`) has nothing to save.
fn save(sys: &dyn Syscall, fd: BorrowedFd<'_>, name: &str) -> Result<Option<OwnedFd>> {
    match sys.dup_cloexec(fd) {
        Ok(saved) => Ok(Some(saved)),
        Err(Errno::EBADF) => {
            debug!(stream = name, "stream closed at boot, nothing to restore");
            Ok(None)
        }
        Err(e) => Err(BootError::sys(Op::Dup, name, e)),
    }
}
