use crate::shell::foreground;
use crate::shell::job_table::{JobState, JobTable};
use crate::shell::reaper::{self, ChldGuard};
use anyhow::{Context, Result};
use log::debug;
use nix::unistd::{execv, fork, setpgid, ForkResult, Pid};
use std::ffi::CString;
use std::io::Write;
use std::os::unix::ffi::OsStrExt;
use std::path::Path;

/// Fork and exec `path`, register the job, and for a foreground job block
/// in the coordinator until it leaves the running state.
///
/// The fork and the table registration happen inside one SIGCHLD-deferred
/// window: the slot exists before the reaper can possibly observe the
/// child's exit. The caller has already checked capacity, so `add` cannot
/// fail here without a bug; if it somehow does, the error propagates before
/// the child is ever visible to the user as a job.
pub fn launch(
    table: &mut JobTable,
    path: &Path,
    argv: &[String],
    cmdline: &str,
    background: bool,
) -> Result<()> {
    // Build the exec arguments up front; the child must not allocate.
    let c_path = CString::new(path.as_os_str().as_bytes())
        .with_context(|| format!("bad executable path: {}", path.display()))?;
    let c_argv: Vec<CString> = argv
        .iter()
        .map(|arg| CString::new(arg.as_str()))
        .collect::<Result<_, _>>()
        .context("argument contains an interior NUL byte")?;

    let guard = ChldGuard::defer();

    let child = match unsafe { fork() } {
        Ok(ForkResult::Child) => run_child(&c_path, &c_argv, argv),
        Ok(ForkResult::Parent { child }) => child,
        // Resource exhaustion: abandon the launch, nothing was registered.
        Err(err) => return Err(err).context("could not create process"),
    };

    // Both sides call setpgid so the group exists no matter who runs first.
    let _ = setpgid(child, child);

    let state = if background {
        JobState::Background
    } else {
        JobState::Foreground
    };
    let jid = table.add(child, state, cmdline, &guard)?;
    debug!("launched pid {} as job [{}]", child, jid);

    if background {
        println!("[{}] ({}) {}", jid, child, cmdline);
    } else {
        foreground::give_terminal_to(child);
        let slot = (jid - 1) as usize;
        foreground::wait_for_foreground(table, slot, &guard);
        foreground::reclaim_terminal();
    }

    drop(guard);
    Ok(())
}

/// Child side of the fork. Never returns: either the image is replaced or
/// the child exits 127 so the parent can tell a failed exec from a clean
/// run.
fn run_child(c_path: &CString, c_argv: &[CString], argv: &[String]) -> ! {
    reaper::unblock_all();
    reaper::restore_default_handlers();
    // Lead a fresh process group; its pgid is the child's own pid.
    let _ = setpgid(Pid::from_raw(0), Pid::from_raw(0));

    let _ = execv(c_path, c_argv);

    // The path resolver saw an executable file but exec disagreed (it may
    // have been removed or chmodded in between). Report and die without
    // running any more shell code.
    let mut stderr = std::io::stderr();
    let _ = stderr.write_all(argv[0].as_bytes());
    let _ = stderr.write_all(b": command not found\n");
    unsafe { libc::_exit(127) }
}
