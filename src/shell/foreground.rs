use crate::shell::job_table::{JobState, JobTable};
use crate::shell::reaper::ChldGuard;
use log::warn;
use nix::sys::signal::SigSet;
use nix::unistd::{getpgrp, isatty, tcsetpgrp, Pid};

/// Block until `slot` is no longer a running foreground job.
///
/// The caller holds a [`ChldGuard`], so SIGCHLD is masked while the
/// predicate is checked; `sigsuspend` with an empty mask then unmasks and
/// sleeps in one indivisible step. A child-state change therefore either
/// lands before the check (the notice flag is already up) or interrupts the
/// suspension. There is no window in which the wakeup can be lost, and no
/// polling.
pub fn wait_for_foreground(table: &JobTable, slot: usize, _guard: &ChldGuard) {
    while table.state_of(slot) == JobState::Foreground && !table.has_notice(slot) {
        // returns with EINTR once any signal has been handled
        let _ = SigSet::empty().suspend();
    }
}

/// Hand the controlling terminal to `pgid`. Done just before a foreground
/// launch and when `fg` resumes a job; background jobs never get it.
pub fn give_terminal_to(pgid: Pid) {
    if !stdin_is_tty() {
        return;
    }
    if let Err(err) = tcsetpgrp(std::io::stdin(), pgid) {
        warn!("tcsetpgrp to group {} failed: {}", pgid, err);
    }
}

/// Take the controlling terminal back for the shell's own process group.
/// Called every time the coordinator's wait returns.
pub fn reclaim_terminal() {
    if !stdin_is_tty() {
        return;
    }
    if let Err(err) = tcsetpgrp(std::io::stdin(), getpgrp()) {
        warn!("reclaiming terminal failed: {}", err);
    }
}

fn stdin_is_tty() -> bool {
    isatty(libc::STDIN_FILENO).unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shell::job_table::{flag_status, JobState, JobTable, SharedSlot, MAX_JOBS};
    use nix::sys::pthread::{pthread_kill, pthread_self};
    use nix::sys::signal::{sigaction, SaFlags, SigAction, SigHandler, Signal};
    use nix::sys::wait::WaitStatus;
    use std::thread;
    use std::time::Duration;

    fn leaked_slots() -> &'static [SharedSlot; MAX_JOBS] {
        const FREE: SharedSlot = SharedSlot::new();
        Box::leak(Box::new([FREE; MAX_JOBS]))
    }

    // The job exits before the wait begins. The pending notice makes the
    // predicate false on the first check, so the wait returns without ever
    // suspending; a hang here is the lost-wakeup bug.
    #[test]
    fn test_wait_returns_for_already_finished_job() {
        let slots = leaked_slots();
        let mut table = JobTable::with_slots(slots);
        let guard = ChldGuard::defer();
        let pid = Pid::from_raw(31337);
        table.add(pid, JobState::Foreground, "true", &guard).unwrap();

        flag_status(slots, WaitStatus::Exited(pid, 0));

        wait_for_foreground(&table, 0, &guard);
        assert!(table.has_notice(0));
    }

    // The job dies while the coordinator is already suspended. The flag
    // goes up first, then a real SIGCHLD lands on the waiting thread; the
    // suspension must hand control back and the re-checked predicate must
    // end the wait. This is the other half of the lost-wakeup hazard: the
    // first half (flag raised before the wait begins) is covered above.
    #[test]
    fn test_wait_wakes_for_flag_arriving_during_suspension() {
        extern "C" fn observe_sigchld(_: i32) {}

        let slots = leaked_slots();
        let mut table = JobTable::with_slots(slots);
        let guard = ChldGuard::defer();
        let pid = Pid::from_raw(31339);
        table.add(pid, JobState::Foreground, "sleep 5", &guard).unwrap();

        // SIGCHLD's default disposition is to be discarded, which would
        // never interrupt the suspension; the wait contract assumes the
        // shell's handler is installed.
        let action = SigAction::new(
            SigHandler::Handler(observe_sigchld),
            SaFlags::empty(),
            SigSet::empty(),
        );
        unsafe { sigaction(Signal::SIGCHLD, &action).unwrap() };

        let waiter = pthread_self();
        let flagger = thread::spawn(move || {
            thread::sleep(Duration::from_millis(100));
            flag_status(slots, WaitStatus::Signaled(pid, Signal::SIGTERM, false));
            let _ = pthread_kill(waiter, Signal::SIGCHLD);
        });

        wait_for_foreground(&table, 0, &guard);

        assert!(table.has_notice(0));
        assert_eq!(table.state_of(0), JobState::Foreground);
        flagger.join().unwrap();
    }

    #[test]
    fn test_wait_returns_for_stopped_job() {
        let slots = leaked_slots();
        let mut table = JobTable::with_slots(slots);
        let guard = ChldGuard::defer();
        let pid = Pid::from_raw(31338);
        table.add(pid, JobState::Foreground, "cat", &guard).unwrap();

        flag_status(slots, WaitStatus::Stopped(pid, Signal::SIGTSTP));

        wait_for_foreground(&table, 0, &guard);
        assert_eq!(table.state_of(0), JobState::Stopped);
    }
}
