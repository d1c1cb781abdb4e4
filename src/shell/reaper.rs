use crate::shell::job_table;
use lazy_static::lazy_static;
use log::debug;
use nix::sys::signal::{self, SaFlags, SigAction, SigHandler, SigSet, SigmaskHow, Signal};
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

// Global flag to indicate if Ctrl+C was pressed
lazy_static! {
    pub static ref INTERRUPT_RECEIVED: Arc<AtomicBool> = Arc::new(AtomicBool::new(false));
}

pub struct SignalHandler;

impl SignalHandler {
    /// Install the shell's signal dispositions. SIGCHLD drives the reaper;
    /// SIGINT only sets a flag so the shell itself survives Ctrl+C; the
    /// stop-class signals are ignored so terminal handoff (tcsetpgrp from a
    /// non-owning group raises SIGTTOU) cannot suspend the shell.
    pub fn initialize() -> Result<(), nix::Error> {
        debug!("Initializing signal handlers");

        let sigchld_action = SigAction::new(
            SigHandler::Handler(Self::handle_sigchld),
            SaFlags::SA_RESTART,
            SigSet::empty(),
        );
        unsafe { signal::sigaction(Signal::SIGCHLD, &sigchld_action)? };

        let sigint_action = SigAction::new(
            SigHandler::Handler(Self::handle_sigint),
            SaFlags::empty(),
            SigSet::empty(),
        );
        unsafe { signal::sigaction(Signal::SIGINT, &sigint_action)? };

        let ignore = SigAction::new(SigHandler::SigIgn, SaFlags::empty(), SigSet::empty());
        unsafe {
            signal::sigaction(Signal::SIGTSTP, &ignore)?;
            signal::sigaction(Signal::SIGTTOU, &ignore)?;
            signal::sigaction(Signal::SIGQUIT, &ignore)?;
        }

        Ok(())
    }

    extern "C" fn handle_sigint(_: i32) {
        INTERRUPT_RECEIVED.store(true, Ordering::SeqCst);
    }

    /// Asynchronous reaper. Everything reachable from here must be
    /// non-blocking, allocation-free, and re-entrant safe: we probe with
    /// WNOHANG until nothing is reapable and flip per-slot atomics only.
    extern "C" fn handle_sigchld(_: i32) {
        let saved = unsafe { *errno_location() };
        reap_children();
        unsafe { *errno_location() = saved };
    }

    pub fn was_interrupted() -> bool {
        let was_interrupted = INTERRUPT_RECEIVED.load(Ordering::SeqCst);
        if was_interrupted {
            INTERRUPT_RECEIVED.store(false, Ordering::SeqCst);
        }
        was_interrupted
    }
}

#[cfg(any(target_os = "macos", target_os = "freebsd"))]
unsafe fn errno_location() -> *mut libc::c_int {
    libc::__error()
}

#[cfg(not(any(target_os = "macos", target_os = "freebsd")))]
unsafe fn errno_location() -> *mut libc::c_int {
    libc::__errno_location()
}

/// Reap any terminated or stopped descendant, never blocking and never
/// waiting on a specific pid. Multiple children may have changed state per
/// signal delivery, so loop until the probe comes up empty.
fn reap_children() {
    let flags = WaitPidFlag::WNOHANG | WaitPidFlag::WUNTRACED;
    loop {
        match waitpid(None, Some(flags)) {
            Ok(WaitStatus::StillAlive) | Err(_) => break,
            Ok(status) => job_table::flag_status(job_table::shared_slots(), status),
        }
    }
}

fn chld_set() -> SigSet {
    let mut set = SigSet::empty();
    set.add(Signal::SIGCHLD);
    set
}

/// Scope during which SIGCHLD delivery is deferred. Every multi-step table
/// access on the main thread holds one of these; the previous mask comes
/// back when it drops. Functions that require the deferral take a
/// `&ChldGuard` parameter.
pub struct ChldGuard {
    prev: SigSet,
}

impl ChldGuard {
    pub fn defer() -> ChldGuard {
        let mut prev = SigSet::empty();
        // Failure here would mean an invalid signal set, which chld_set()
        // cannot produce.
        let _ = signal::sigprocmask(SigmaskHow::SIG_BLOCK, Some(&chld_set()), Some(&mut prev));
        ChldGuard { prev }
    }
}

impl Drop for ChldGuard {
    fn drop(&mut self) {
        let _ = signal::sigprocmask(SigmaskHow::SIG_SETMASK, Some(&self.prev), None);
    }
}

/// Lift the signal mask entirely; used in the child between fork and exec.
pub(crate) fn unblock_all() {
    let _ = signal::sigprocmask(SigmaskHow::SIG_SETMASK, Some(&SigSet::empty()), None);
}

/// Put the job-control signals back to their default dispositions; used in
/// the child before exec (ignored dispositions survive exec).
pub(crate) fn restore_default_handlers() {
    let default = SigAction::new(SigHandler::SigDfl, SaFlags::empty(), SigSet::empty());
    unsafe {
        let _ = signal::sigaction(Signal::SIGINT, &default);
        let _ = signal::sigaction(Signal::SIGTSTP, &default);
        let _ = signal::sigaction(Signal::SIGTTOU, &default);
        let _ = signal::sigaction(Signal::SIGQUIT, &default);
        let _ = signal::sigaction(Signal::SIGCHLD, &default);
    }
}
