use crate::shell::error::ShellError;
use crate::shell::reaper::ChldGuard;
use nix::sys::wait::WaitStatus;
use nix::unistd::Pid;
use std::sync::atomic::{AtomicI32, AtomicU8, Ordering};

/// Fixed job-table capacity. A launch that would exceed it is refused
/// before any process is created.
pub const MAX_JOBS: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum JobState {
    Undefined = 0,
    Foreground = 1,
    Background = 2,
    Stopped = 3,
}

impl JobState {
    fn from_u8(v: u8) -> JobState {
        match v {
            1 => JobState::Foreground,
            2 => JobState::Background,
            3 => JobState::Stopped,
            _ => JobState::Undefined,
        }
    }

    pub fn describe(self) -> &'static str {
        match self {
            JobState::Undefined => "Undefined",
            JobState::Foreground => "Foreground",
            JobState::Background => "Running",
            JobState::Stopped => "Stopped",
        }
    }
}

const NOTICE_NONE: u8 = 0;
const NOTICE_FINISHED: u8 = 1;
const NOTICE_SIGNALED: u8 = 2;
const NOTICE_STOPPED: u8 = 3;

/// Why a slot was flagged, consumed exactly once by the reporter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeReason {
    Finished,
    Signaled(i32),
    Stopped(i32),
}

/// One drained notice, ready to be printed.
#[derive(Debug, Clone, PartialEq)]
pub struct JobNotice {
    pub jid: u32,
    pub pid: i32,
    pub reason: NoticeReason,
    pub command: String,
}

/// The part of a slot the SIGCHLD handler is allowed to touch. Everything
/// here is a plain atomic so the handler stays allocation-free and
/// lock-free; command text never appears on this side.
pub struct SharedSlot {
    pid: AtomicI32,
    state: AtomicU8,
    notice: AtomicU8,
    detail: AtomicI32,
}

impl SharedSlot {
    pub const fn new() -> SharedSlot {
        SharedSlot {
            pid: AtomicI32::new(0),
            state: AtomicU8::new(JobState::Undefined as u8),
            notice: AtomicU8::new(NOTICE_NONE),
            detail: AtomicI32::new(0),
        }
    }
}

const FREE_SLOT: SharedSlot = SharedSlot::new();

/// The one table shared between the control loop and the signal handler.
static SHARED: [SharedSlot; MAX_JOBS] = [FREE_SLOT; MAX_JOBS];

pub(crate) fn shared_slots() -> &'static [SharedSlot; MAX_JOBS] {
    &SHARED
}

/// Flag the slot owning `status`'s pid. This is the only mutation the
/// reaper may perform: it never creates or removes an occupancy, it only
/// records a transition for the reporter to consume. Runs in signal
/// context, so no allocation, no locking, no I/O.
pub(crate) fn flag_status(slots: &[SharedSlot; MAX_JOBS], status: WaitStatus) {
    let (pid, notice, detail, stop) = match status {
        WaitStatus::Exited(pid, _) => (pid, NOTICE_FINISHED, 0, false),
        WaitStatus::Signaled(pid, sig, _) => (pid, NOTICE_SIGNALED, sig as i32, false),
        WaitStatus::Stopped(pid, sig) => (pid, NOTICE_STOPPED, sig as i32, true),
        _ => return,
    };

    for slot in slots.iter() {
        if slot.pid.load(Ordering::SeqCst) == pid.as_raw()
            && slot.state.load(Ordering::SeqCst) != JobState::Undefined as u8
        {
            slot.detail.store(detail, Ordering::SeqCst);
            if stop {
                slot.state.store(JobState::Stopped as u8, Ordering::SeqCst);
            }
            // notice last: the waiter's predicate keys off this flag
            slot.notice.store(notice, Ordering::SeqCst);
            return;
        }
    }

    // A child we never registered changed state. The launcher registers
    // every fork under a deferred-SIGCHLD window, so this is a
    // synchronization bug, not a recoverable condition.
    unsafe { libc::abort() }
}

/// Fixed-capacity registry of active jobs, owned by the control loop.
/// `jid` is the slot position plus one and never moves for the life of an
/// occupancy. Every multi-step access is done under a [`ChldGuard`] so the
/// reaper cannot interleave.
pub struct JobTable {
    shared: &'static [SharedSlot; MAX_JOBS],
    commands: [Option<String>; MAX_JOBS],
}

impl JobTable {
    pub fn new() -> Self {
        Self::with_slots(&SHARED)
    }

    /// Back the table with caller-provided slots. Tests use this to avoid
    /// touching the process-global array.
    pub(crate) fn with_slots(shared: &'static [SharedSlot; MAX_JOBS]) -> Self {
        JobTable {
            shared,
            commands: std::array::from_fn(|_| None),
        }
    }

    pub fn has_free_slot(&self) -> bool {
        self.shared
            .iter()
            .any(|s| s.state.load(Ordering::SeqCst) == JobState::Undefined as u8)
    }

    /// Occupy a free slot for `pid`. Callers hold a ChldGuard across the
    /// fork and this call so the slot exists before the reaper can run.
    pub fn add(
        &mut self,
        pid: Pid,
        state: JobState,
        cmdline: &str,
        _guard: &ChldGuard,
    ) -> Result<u32, ShellError> {
        debug_assert!(state != JobState::Undefined);
        for (idx, slot) in self.shared.iter().enumerate() {
            if slot.state.load(Ordering::SeqCst) == JobState::Undefined as u8 {
                slot.pid.store(pid.as_raw(), Ordering::SeqCst);
                slot.notice.store(NOTICE_NONE, Ordering::SeqCst);
                slot.detail.store(0, Ordering::SeqCst);
                slot.state.store(state as u8, Ordering::SeqCst);
                self.commands[idx] = Some(cmdline.to_string());
                return Ok(idx as u32 + 1);
            }
        }
        Err(ShellError::TableFull)
    }

    pub fn find_by_pid(&self, pid: Pid) -> Option<usize> {
        self.shared.iter().position(|s| {
            s.pid.load(Ordering::SeqCst) == pid.as_raw()
                && s.state.load(Ordering::SeqCst) != JobState::Undefined as u8
        })
    }

    pub fn find_by_jid(&self, jid: u32) -> Option<usize> {
        let idx = jid.checked_sub(1)? as usize;
        if idx < MAX_JOBS && self.state_of(idx) != JobState::Undefined {
            Some(idx)
        } else {
            None
        }
    }

    /// Resolve a `%jid` or bare-pid job spec, as accepted by fg/bg/kill.
    pub fn resolve_spec(&self, spec: &str, _guard: &ChldGuard) -> Result<usize, ShellError> {
        let not_found = || ShellError::JobNotFound(spec.to_string());
        let found = if let Some(jid) = spec.strip_prefix('%') {
            let jid: u32 = jid.parse().map_err(|_| not_found())?;
            self.find_by_jid(jid)
        } else {
            let pid: i32 = spec.parse().map_err(|_| not_found())?;
            self.find_by_pid(Pid::from_raw(pid))
        };
        found.ok_or_else(not_found)
    }

    pub fn state_of(&self, slot: usize) -> JobState {
        JobState::from_u8(self.shared[slot].state.load(Ordering::SeqCst))
    }

    pub fn pid_of(&self, slot: usize) -> Pid {
        Pid::from_raw(self.shared[slot].pid.load(Ordering::SeqCst))
    }

    pub fn jid_of(&self, slot: usize) -> u32 {
        slot as u32 + 1
    }

    pub fn command_of(&self, slot: usize) -> &str {
        self.commands[slot].as_deref().unwrap_or("")
    }

    pub fn set_state(&self, slot: usize, state: JobState) {
        self.shared[slot].state.store(state as u8, Ordering::SeqCst);
    }

    pub fn has_notice(&self, slot: usize) -> bool {
        self.shared[slot].notice.load(Ordering::SeqCst) != NOTICE_NONE
    }

    pub fn remove(&mut self, slot: usize) {
        let s = &self.shared[slot];
        s.state.store(JobState::Undefined as u8, Ordering::SeqCst);
        s.notice.store(NOTICE_NONE, Ordering::SeqCst);
        s.detail.store(0, Ordering::SeqCst);
        s.pid.store(0, Ordering::SeqCst);
        self.commands[slot] = None;
    }

    /// Occupied slots, for the `jobs` listing.
    pub fn occupied(&self) -> impl Iterator<Item = usize> + '_ {
        (0..MAX_JOBS).filter(|&i| self.state_of(i) != JobState::Undefined)
    }

    /// Drain every pending notice. Finished and signaled jobs give their
    /// slot back; stopped jobs stay occupied. Each flagged transition
    /// appears in the result exactly once.
    pub fn take_notices(&mut self, _guard: &ChldGuard) -> Vec<JobNotice> {
        let mut notices = Vec::new();
        for idx in 0..MAX_JOBS {
            let slot = &self.shared[idx];
            let notice = slot.notice.swap(NOTICE_NONE, Ordering::SeqCst);
            if notice == NOTICE_NONE || self.state_of(idx) == JobState::Undefined {
                continue;
            }
            let detail = slot.detail.swap(0, Ordering::SeqCst);
            let reason = match notice {
                NOTICE_FINISHED => NoticeReason::Finished,
                NOTICE_SIGNALED => NoticeReason::Signaled(detail),
                NOTICE_STOPPED => NoticeReason::Stopped(detail),
                _ => continue,
            };
            notices.push(JobNotice {
                jid: self.jid_of(idx),
                pid: self.pid_of(idx).as_raw(),
                reason,
                command: self.command_of(idx).to_string(),
            });
            if !matches!(reason, NoticeReason::Stopped(_)) {
                self.remove(idx);
            }
        }
        notices
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shell::reaper::ChldGuard;
    use nix::sys::signal::Signal;

    fn test_table() -> JobTable {
        let slots: &'static [SharedSlot; MAX_JOBS] =
            Box::leak(Box::new([FREE_SLOT; MAX_JOBS]));
        JobTable::with_slots(slots)
    }

    #[test]
    fn test_capacity_refusal() {
        let mut table = test_table();
        let guard = ChldGuard::defer();
        for i in 0..MAX_JOBS {
            assert!(table.has_free_slot());
            let jid = table
                .add(Pid::from_raw(1000 + i as i32), JobState::Background, "sleep 60 &", &guard)
                .unwrap();
            assert_eq!(jid, i as u32 + 1);
        }
        assert!(!table.has_free_slot());
        assert_eq!(
            table.add(Pid::from_raw(9999), JobState::Background, "late", &guard),
            Err(ShellError::TableFull)
        );
        assert_eq!(table.occupied().count(), MAX_JOBS);
    }

    #[test]
    fn test_notice_reported_exactly_once() {
        let mut table = test_table();
        let guard = ChldGuard::defer();
        let pid = Pid::from_raw(4242);
        table.add(pid, JobState::Background, "true &", &guard).unwrap();

        flag_status(table.shared, WaitStatus::Exited(pid, 0));

        let first = table.take_notices(&guard);
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].reason, NoticeReason::Finished);
        assert_eq!(first[0].jid, 1);
        assert_eq!(first[0].command, "true &");

        // drained: nothing to report, slot reusable
        assert!(table.take_notices(&guard).is_empty());
        assert!(table.has_free_slot());
        assert_eq!(table.find_by_pid(pid), None);
    }

    #[test]
    fn test_concurrent_terminations_each_reported_once() {
        let mut table = test_table();
        let guard = ChldGuard::defer();
        let pids = [Pid::from_raw(100), Pid::from_raw(200), Pid::from_raw(300)];
        for pid in pids {
            table.add(pid, JobState::Background, "w &", &guard).unwrap();
        }
        for pid in pids {
            flag_status(table.shared, WaitStatus::Exited(pid, 0));
        }
        let notices = table.take_notices(&guard);
        assert_eq!(notices.len(), 3);
        assert!(table.take_notices(&guard).is_empty());
        assert_eq!(table.occupied().count(), 0);
    }

    #[test]
    fn test_signaled_job_reclaimed() {
        let mut table = test_table();
        let guard = ChldGuard::defer();
        let pid = Pid::from_raw(777);
        table.add(pid, JobState::Foreground, "cat", &guard).unwrap();

        flag_status(table.shared, WaitStatus::Signaled(pid, Signal::SIGTERM, false));

        let notices = table.take_notices(&guard);
        assert_eq!(notices.len(), 1);
        assert_eq!(notices[0].reason, NoticeReason::Signaled(libc::SIGTERM));
        assert_eq!(table.find_by_pid(pid), None);
    }

    #[test]
    fn test_stopped_job_stays_occupied() {
        let mut table = test_table();
        let guard = ChldGuard::defer();
        let pid = Pid::from_raw(888);
        let slot = {
            table.add(pid, JobState::Foreground, "vi notes", &guard).unwrap();
            table.find_by_pid(pid).unwrap()
        };

        flag_status(table.shared, WaitStatus::Stopped(pid, Signal::SIGTSTP));

        // reaper already moved the state; the pending notice wakes the waiter
        assert_eq!(table.state_of(slot), JobState::Stopped);
        let notices = table.take_notices(&guard);
        assert_eq!(notices[0].reason, NoticeReason::Stopped(libc::SIGTSTP));

        assert_eq!(table.state_of(slot), JobState::Stopped);
        assert_eq!(table.find_by_pid(pid), Some(slot));
        assert_eq!(table.jid_of(slot), 1);
    }

    #[test]
    fn test_killed_stopped_job_reported_once_and_reclaimed() {
        let mut table = test_table();
        let guard = ChldGuard::defer();
        let pid = Pid::from_raw(666);
        table.add(pid, JobState::Background, "sleep 100 &", &guard).unwrap();

        // job stops; the stop is drained but the slot stays occupied
        flag_status(table.shared, WaitStatus::Stopped(pid, Signal::SIGTSTP));
        let stopped = table.take_notices(&guard);
        assert_eq!(stopped.len(), 1);
        assert_eq!(table.state_of(0), JobState::Stopped);

        // SIGTERM chased by SIGCONT lets the stopped job die; exactly one
        // termination notice comes out and the slot goes back
        flag_status(table.shared, WaitStatus::Signaled(pid, Signal::SIGTERM, false));
        let killed = table.take_notices(&guard);
        assert_eq!(killed.len(), 1);
        assert_eq!(killed[0].reason, NoticeReason::Signaled(libc::SIGTERM));
        assert!(table.take_notices(&guard).is_empty());
        assert_eq!(table.find_by_pid(pid), None);
        assert!(table.has_free_slot());
    }

    #[test]
    fn test_backgrounded_job_visible_as_running() {
        let mut table = test_table();
        let guard = ChldGuard::defer();
        let pid = Pid::from_raw(555);
        table.add(pid, JobState::Background, "sleep 99 &", &guard).unwrap();

        let slot = table.find_by_pid(pid).unwrap();
        assert_eq!(table.state_of(slot), JobState::Background);
        assert_eq!(table.state_of(slot).describe(), "Running");
        assert_eq!(table.occupied().count(), 1);
    }

    #[test]
    fn test_resolve_spec() {
        let mut table = test_table();
        let guard = ChldGuard::defer();
        table.add(Pid::from_raw(111), JobState::Background, "a &", &guard).unwrap();
        table.add(Pid::from_raw(222), JobState::Background, "b &", &guard).unwrap();
        table.add(Pid::from_raw(333), JobState::Background, "c &", &guard).unwrap();

        assert_eq!(table.resolve_spec("%3", &guard).unwrap(), 2);
        assert_eq!(table.resolve_spec("222", &guard).unwrap(), 1);
        assert_eq!(
            table.resolve_spec("999999", &guard),
            Err(ShellError::JobNotFound("999999".to_string()))
        );
        assert_eq!(
            table.resolve_spec("%99", &guard),
            Err(ShellError::JobNotFound("%99".to_string()))
        );
        assert_eq!(
            table.resolve_spec("%bogus", &guard),
            Err(ShellError::JobNotFound("%bogus".to_string()))
        );
    }

    #[test]
    fn test_jid_stable_and_slot_reused_by_position() {
        let mut table = test_table();
        let guard = ChldGuard::defer();
        let a = Pid::from_raw(1);
        let b = Pid::from_raw(2);
        assert_eq!(table.add(a, JobState::Background, "a &", &guard).unwrap(), 1);
        assert_eq!(table.add(b, JobState::Background, "b &", &guard).unwrap(), 2);

        flag_status(table.shared, WaitStatus::Exited(a, 0));
        table.take_notices(&guard);

        // slot 0 freed; the next add lands there and takes jid 1 again
        let c = Pid::from_raw(3);
        assert_eq!(table.add(c, JobState::Background, "c &", &guard).unwrap(), 1);
        assert_eq!(table.find_by_jid(2), Some(1));
    }
}
