//! Termination signal handling.
//!
//! One node per process may install handlers; the binding is a process
//! scoped one-shot claimed at node construction and released at drop. The
//! handler body is a single atomic store - nothing async-signal-unsafe
//! runs in signal context. The spin loop polls the flag on every wakeup,
//! which the idle cap bounds, and the orderly stop path performs the
//! event-bus broadcast that the handler must not.

use crate::error::NodeResult;
use axon_shared_memory::ShmError;
use nix::sys::signal::{SaFlags, SigAction, SigHandler, SigSet, Signal, sigaction};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::debug;

static SHUTDOWN_REQUESTED: AtomicBool = AtomicBool::new(false);
static HANDLERS_INSTALLED: AtomicBool = AtomicBool::new(false);

const TERMINATION_SIGNALS: [Signal; 3] = [Signal::SIGINT, Signal::SIGQUIT, Signal::SIGTERM];

extern "C" fn handle_termination(_signum: libc::c_int) {
    SHUTDOWN_REQUESTED.store(true, Ordering::SeqCst);
}

/// True once a termination signal has been delivered to this process.
pub fn shutdown_requested() -> bool {
    SHUTDOWN_REQUESTED.load(Ordering::SeqCst)
}

/// Claim the process-wide handler binding for SIGINT, SIGQUIT and SIGTERM.
///
/// Returns `false` without touching the handlers when another node in this
/// process already holds the binding.
pub(crate) fn install() -> NodeResult<bool> {
    if HANDLERS_INSTALLED.swap(true, Ordering::AcqRel) {
        debug!("signal handlers already owned by another node in this process");
        return Ok(false);
    }

    let action = SigAction::new(
        SigHandler::Handler(handle_termination),
        SaFlags::empty(),
        SigSet::empty(),
    );
    for signal in TERMINATION_SIGNALS {
        unsafe { sigaction(signal, &action) }.map_err(ShmError::from)?;
    }
    debug!("termination signal handlers installed");
    Ok(true)
}

/// Release the binding claimed by [`install`], restoring default handlers.
/// No-op when `owned` is false.
pub(crate) fn uninstall(owned: bool) {
    if !owned {
        return;
    }
    let action = SigAction::new(SigHandler::SigDfl, SaFlags::empty(), SigSet::empty());
    for signal in TERMINATION_SIGNALS {
        let _ = unsafe { sigaction(signal, &action) };
    }
    SHUTDOWN_REQUESTED.store(false, Ordering::SeqCst);
    HANDLERS_INSTALLED.store(false, Ordering::Release);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_one_shot_binding() {
        let first = install().unwrap();
        assert!(first);
        // Second claimant in the same process is refused.
        assert!(!install().unwrap());

        // The handler body is an ordinary function; exercising it directly
        // avoids racing other tests with a real signal.
        handle_termination(libc::SIGTERM);
        assert!(shutdown_requested());

        uninstall(true);
        assert!(!shutdown_requested());

        // Released binding can be claimed again.
        assert!(install().unwrap());
        uninstall(true);
    }
}
