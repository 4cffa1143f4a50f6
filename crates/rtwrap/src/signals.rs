//! Process-level setup for live mode: stop on SIGINT/SIGTERM, lock memory

use std::sync::OnceLock;

use rtwrap_core::audio::StopFlag;

/// Flag raised by the signal handler
static STOP: OnceLock<StopFlag> = OnceLock::new();

#[cfg(unix)]
extern "C" fn on_signal(_signal: libc::c_int) {
    // Only an atomic store, which is async-signal-safe
    if let Some(stop) = STOP.get() {
        stop.stop();
    }
}

/// Route SIGINT and SIGTERM to `stop`
///
/// Only the first registered flag is used.
pub fn install(stop: &StopFlag) {
    if STOP.set(stop.clone()).is_err() {
        log::warn!("Signal handler already installed");
        return;
    }

    #[cfg(unix)]
    unsafe {
        let handler = on_signal as extern "C" fn(libc::c_int) as libc::sighandler_t;
        for signal in [libc::SIGINT, libc::SIGTERM] {
            if libc::signal(signal, handler) == libc::SIG_ERR {
                log::warn!("Failed to install handler for signal {}", signal);
            }
        }
    }
}

/// Lock current and future pages into RAM so the audio thread never faults
///
/// Failure is not fatal (it usually means RLIMIT_MEMLOCK is too low).
pub fn lock_memory() -> bool {
    #[cfg(target_os = "linux")]
    {
        let result = unsafe { libc::mlockall(libc::MCL_CURRENT | libc::MCL_FUTURE) };
        if result != 0 {
            log::warn!(
                "mlockall failed: {} (raise the memlock limit for real-time use)",
                std::io::Error::last_os_error()
            );
            return false;
        }
        log::info!("Memory locked");
        true
    }

    #[cfg(not(target_os = "linux"))]
    {
        log::debug!("Memory locking not supported on this platform");
        false
    }
}
