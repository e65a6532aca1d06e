//! squash-init: initramfs PID 1 for squashfs root images.
//!
//! Startup sequence:
//! 1. Install fatal signal handlers (report and exit, ignore SIGPIPE)
//! 2. Mount pseudo filesystems and redirect diagnostics to /dev/kmsg
//! 3. Loop-mount the squashfs image and switch root onto it
//! 4. Free the initramfs and exec the real init
//!
//! Only returns if the boot failed, at which point the kernel panics on PID 1
//! exiting. That is the intended outcome: there is nothing left to fall back to.

use std::fmt;
use std::process::ExitCode;
use std::time::Instant;

use tracing::error;
use tracing_subscriber::fmt::time::FormatTime;

use squash_init::{BootConfig, LinuxSyscall, signal};

struct Elapsed(Instant);

impl FormatTime for Elapsed {
    fn format_time(&self, w: &mut tracing_subscriber::fmt::format::Writer<'_>) -> fmt::Result {
        let d = self.0.elapsed();
        let total_secs = d.as_secs();
        let mins = total_secs / 60;
        let secs = total_secs % 60;
        let millis = d.subsec_millis();
        write!(w, "[{mins:02}:{secs:02}:{millis:03}]")
    }
}

fn main() -> ExitCode {
    // The kernel log adds its own prefix and does not render colour.
    tracing_subscriber::fmt()
        .with_timer(Elapsed(Instant::now()))
        .with_ansi(false)
        .with_writer(std::io::stderr)
        .init();

    signal::install_fatal_handlers();

    let config = BootConfig::default();
    match squash_init::run(&LinuxSyscall, &config) {
        Ok(never) => match never {},
        Err(e) => {
            error!(error = %e, "boot failed");
            ExitCode::FAILURE
        }
    }
}
