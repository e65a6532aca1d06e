//! Fatal signal handling during boot.
//!
//! Nothing can be recovered if the boot process faults, so the handler only
//! reports which signal hit and exits. It runs in signal context and must not
//! allocate, lock or go through `tracing`: it formats into a stack buffer and
//! writes straight to fd 2, which is the kernel log while the sink is attached.

const FATAL_SIGNALS: [(libc::c_int, &[u8]); 5] = [
    (libc::SIGSEGV, b"SIGSEGV"),
    (libc::SIGBUS, b"SIGBUS"),
    (libc::SIGILL, b"SIGILL"),
    (libc::SIGFPE, b"SIGFPE"),
    (libc::SIGABRT, b"SIGABRT"),
];

const PREFIX: &[u8] = b"squash-init: fatal signal ";

/// Install a `sigaction` handler for the given signal.
fn set_handler(sig: libc::c_int, handler: libc::sighandler_t, flags: libc::c_int) {
    // SAFETY: zeroed sigaction is valid; we fill sa_handler and sa_flags.
    let mut sa: libc::sigaction = unsafe { std::mem::zeroed() };
    sa.sa_sigaction = handler;
    sa.sa_flags = flags;
    // SAFETY: sa is properly initialized, sig is a valid signal number.
    unsafe {
        libc::sigaction(sig, &sa, std::ptr::null_mut());
    }
}

/// Report and exit on SIGSEGV, SIGBUS, SIGILL, SIGFPE and SIGABRT.
/// SIGPIPE is ignored so a closed log descriptor cannot kill the boot.
pub fn install_fatal_handlers() {
    for (sig, _) in FATAL_SIGNALS {
        set_handler(
            sig,
            handle_fatal_signal as *const () as libc::sighandler_t,
            libc::SA_RESETHAND,
        );
    }
    set_handler(libc::SIGPIPE, libc::SIG_IGN, 0);
}

extern "C" fn handle_fatal_signal(sig: libc::c_int) {
    let mut buf = [0u8; 64];
    let len = format_report(sig, &mut buf);
    // SAFETY: write(2) and _exit(2) are async-signal-safe; buf outlives the call.
    unsafe {
        libc::write(libc::STDERR_FILENO, buf.as_ptr().cast(), len);
        libc::_exit(128 + sig);
    }
}

/// Write `<prefix><NAME> (<number>)\n` into `buf`, returning the length.
/// Truncates rather than overflowing.
fn format_report(sig: libc::c_int, buf: &mut [u8]) -> usize {
    let name = FATAL_SIGNALS
        .iter()
        .find(|(s, _)| *s == sig)
        .map_or(&b"signal"[..], |(_, name)| *name);

    let mut digits = [0u8; 10];
    let mut n = sig.unsigned_abs();
    let mut start = digits.len();
    loop {
        start -= 1;
        if let Some(d) = digits.get_mut(start) {
            *d = b'0' + (n % 10) as u8;
        }
        n /= 10;
        if n == 0 || start == 0 {
            break;
        }
    }

    let mut len = 0;
    let parts: [&[u8]; 5] = [
        PREFIX,
        name,
        b" (",
        digits.get(start..).unwrap_or_default(),
        b")\n",
    ];
    for part in parts {
        for &byte in part {
            let Some(slot) = buf.get_mut(len) else {
                return len;
            };
            *slot = byte;
            len += 1;
        }
    }
    len
}
