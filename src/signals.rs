//! Shutdown requests for the `run` loop (SIGINT, SIGTERM, SIGHUP; console
//! control events on Windows).
use std::sync::atomic::{AtomicBool, Ordering};

static SHUTDOWN: AtomicBool = AtomicBool::new(false);

#[cfg(unix)]
extern "C" fn handle_shutdown(_sig: i32) {
    SHUTDOWN.store(true, Ordering::SeqCst);
}

/// Route termination signals to a flag polled by the run loop.
#[cfg(unix)]
pub(crate) fn install() {
    use nix::sys::signal::{self, SaFlags, SigAction, SigHandler, SigSet, Signal};

    let act = SigAction::new(
        SigHandler::Handler(handle_shutdown),
        SaFlags::SA_RESTART,
        SigSet::empty(),
    );
    unsafe {
        for sig in [Signal::SIGINT, Signal::SIGTERM, Signal::SIGHUP] {
            if let Err(e) = signal::sigaction(sig, &act) {
                tracing::warn!("cannot install {sig} handler: {e}");
            }
        }
    }
}

#[cfg(windows)]
unsafe extern "system" fn handle_console_ctrl(_ctrl_type: u32) -> i32 {
    SHUTDOWN.store(true, Ordering::SeqCst);
    1
}

/// Ctrl-C / Ctrl-Break / console close set the same flag.
#[cfg(windows)]
pub(crate) fn install() {
    type HandlerRoutine = unsafe extern "system" fn(u32) -> i32;

    #[link(name = "kernel32")]
    extern "system" {
        fn SetConsoleCtrlHandler(handler: Option<HandlerRoutine>, add: i32) -> i32;
    }

    // SAFETY: the handler only touches an atomic.
    if unsafe { SetConsoleCtrlHandler(Some(handle_console_ctrl), 1) } == 0 {
        tracing::warn!("cannot install console control handler");
    }
}

#[cfg(not(any(unix, windows)))]
pub(crate) fn install() {}

pub(crate) fn shutdown_requested() -> bool {
    SHUTDOWN.load(Ordering::SeqCst)
}
