use log::info;
use nix::sys::signal::{self, SaFlags, SigAction, SigHandler, SigSet, Signal};
/// Async-safe signal handling for checkbox
/// An interrupt must tear down every staging directory before the process
/// exits, so handlers only record the signal and the polling loops act on it.
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

/// Global shutdown flag (async-safe atomic)
static SHUTDOWN_REQUESTED: AtomicBool = AtomicBool::new(false);

/// Global signal received (async-safe atomic)
static SIGNAL_RECEIVED: AtomicU32 = AtomicU32::new(0);

/// Signal handler state
pub struct SignalHandler;

impl SignalHandler {
    /// Initialize signal handlers
    /// Must be called early in main() before any children are spawned
    pub fn init() -> Result<Self, String> {
        Self::install_signal_handlers()?;
        Ok(Self)
    }

    /// Install signal handlers for SIGINT, SIGTERM, SIGHUP
    fn install_signal_handlers() -> Result<(), String> {
        let sig_action = SigAction::new(
            SigHandler::Handler(Self::signal_handler),
            SaFlags::SA_RESTART,
            SigSet::empty(),
        );

        // SAFETY: the handler only performs atomic stores.
        unsafe {
            signal::sigaction(Signal::SIGINT, &sig_action)
                .map_err(|e| format!("Failed to install SIGINT handler: {}", e))?;

            signal::sigaction(Signal::SIGTERM, &sig_action)
                .map_err(|e| format!("Failed to install SIGTERM handler: {}", e))?;

            signal::sigaction(Signal::SIGHUP, &sig_action)
                .map_err(|e| format!("Failed to install SIGHUP handler: {}", e))?;
        }

        info!("Signal handlers installed (SIGINT, SIGTERM, SIGHUP)");
        Ok(())
    }

    /// Async-safe signal handler
    /// Only performs atomic operations - no allocations, no locks, no I/O
    extern "C" fn signal_handler(signal: libc::c_int) {
        SIGNAL_RECEIVED.store(signal as u32, Ordering::SeqCst);
        SHUTDOWN_REQUESTED.store(true, Ordering::SeqCst);
    }
}

/// Handle the pipeline and its children poll for shutdown requests.
///
/// `process()` observes the real signal handlers; `manual()` is an
/// independent flag for embedders and tests.
#[derive(Clone, Debug, Default)]
pub struct ShutdownSignal {
    local: Option<Arc<AtomicU32>>,
}

impl ShutdownSignal {
    /// Observe the process-wide signal flag
    pub fn process() -> Self {
        Self { local: None }
    }

    /// Private flag, only tripped through [`ShutdownSignal::trigger`]
    pub fn manual() -> Self {
        Self {
            local: Some(Arc::new(AtomicU32::new(0))),
        }
    }

    /// Record a shutdown request as if `signal` had been received
    pub fn trigger(&self, signal: i32) {
        match &self.local {
            Some(flag) => flag.store(signal as u32, Ordering::SeqCst),
            None => {
                SIGNAL_RECEIVED.store(signal as u32, Ordering::SeqCst);
                SHUTDOWN_REQUESTED.store(true, Ordering::SeqCst);
            }
        }
    }

    /// Signal number of a pending shutdown request
    pub fn requested(&self) -> Option<i32> {
        match &self.local {
            Some(flag) => match flag.load(Ordering::SeqCst) {
                0 => None,
                sig => Some(sig as i32),
            },
            None => {
                if SHUTDOWN_REQUESTED.load(Ordering::SeqCst) {
                    Some(SIGNAL_RECEIVED.load(Ordering::SeqCst) as i32)
                } else {
                    None
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signal_handler_init() {
        let handler = SignalHandler::init();
        assert!(handler.is_ok());
    }

    #[test]
    fn test_manual_signal_is_isolated() {
        let first = ShutdownSignal::manual();
        let second = ShutdownSignal::manual();
        assert_eq!(first.requested(), None);

        first.trigger(libc::SIGINT);
        assert_eq!(first.requested(), Some(libc::SIGINT));
        assert_eq!(second.requested(), None);
    }

    #[test]
    fn test_manual_signal_shared_between_clones() {
        let signal = ShutdownSignal::manual();
        let clone = signal.clone();
        clone.trigger(libc::SIGTERM);
        assert_eq!(signal.requested(), Some(libc::SIGTERM));
    }
}
