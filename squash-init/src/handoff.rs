//! Handing control to the real init.

use std::convert::Infallible;
use std::ffi::CString;
use std::os::unix::ffi::OsStrExt;

use tracing::{debug, error, info, warn};

use crate::config::InitCandidate;
use crate::error::{BootError, Result};
use crate::stage::{BootStage, StageTracker};
use crate::syscall::Syscall;

/// Exec the first candidate that works. Only returns when every candidate
/// failed.
///
/// [`BootStage::HandedOff`] is reached right before the first exec is issued.
/// Candidates skipped for a missing prerequisite or a NUL byte leave the stage
/// untouched.
pub fn hand_off(
    sys: &dyn Syscall,
    candidates: &[InitCandidate],
    stages: &mut StageTracker,
) -> Result<Infallible> {
    let mut tried = 0;
    for candidate in candidates {
        if let Some(required) = &candidate.requires {
            match sys.exists(required) {
                Ok(true) => {}
                Ok(false) => {
                    debug!(
                        init = %candidate.path.display(),
                        requires = %required.display(),
                        "skipping init candidate"
                    );
                    continue;
                }
                Err(e) => {
                    warn!(
                        requires = %required.display(),
                        error = %e,
                        "cannot probe init prerequisite"
                    );
                    continue;
                }
            }
        }

        tried += 1;
        let Some((path, argv)) = exec_args(candidate) else {
            warn!(init = %candidate.path.display(), "init path or argument contains NUL");
            continue;
        };
        if stages.current() != BootStage::HandedOff {
            stages.advance(BootStage::HandedOff)?;
        }
        info!(init = %candidate.path.display(), "executing init");
        let errno = sys.execv(&path, &argv);
        warn!(init = %candidate.path.display(), error = %errno, "exec failed");
    }

    error!("no init found");
    Err(BootError::NoInit { tried })
}

fn exec_args(candidate: &InitCandidate) -> Option<(CString, Vec<CString>)> {
    let path = CString::new(candidate.path.as_os_str().as_bytes()).ok()?;
    let argv = candidate
        .argv
        .iter()
        .map(|arg| CString::new(arg.as_str()).ok())
        .collect::<Option<Vec<_>>>()?;
    Some((path, argv))
}
