mod error;
mod foreground;
mod job_table;
mod launcher;
mod path_resolver;
mod reaper;
mod shell_env;
mod tokenizer;

use crate::shell::error::ShellError;
use crate::shell::job_table::{JobState, JobTable, NoticeReason};
use crate::shell::reaper::{ChldGuard, SignalHandler};
use crate::shell::tokenizer::ParsedLine;
use crate::terminal::Terminal;
use anyhow::{Context, Result};
use colored::*;
use log::debug;
use nix::sys::signal::{killpg, Signal};
use nix::unistd::{getpgrp, getpid, isatty, setpgid, tcsetpgrp};
use std::path::PathBuf;

pub struct Shell {
    terminal: Terminal,
    jobs: JobTable,
    environment: shell_env::Environment,
    working_dir: PathBuf,
}

impl Shell {
    pub fn new() -> Self {
        SignalHandler::initialize().unwrap_or_else(|e| {
            eprintln!("Warning: Failed to initialize signal handlers: {}", e);
        });

        let mut environment = shell_env::Environment::new();
        environment.initialize().unwrap_or_else(|e| {
            eprintln!("Warning: Failed to initialize environment: {}", e);
        });

        // Run in our own process group and own the terminal before the
        // first job is launched.
        if isatty(libc::STDIN_FILENO).unwrap_or(false) {
            let _ = setpgid(getpid(), getpid());
            let _ = tcsetpgrp(std::io::stdin(), getpgrp());
        }

        Shell {
            terminal: Terminal::new(),
            jobs: JobTable::new(),
            environment,
            working_dir: std::env::current_dir().unwrap_or_default(),
        }
    }

    pub fn run(&mut self) -> Result<()> {
        loop {
            // Drain whatever the reaper flagged since the last iteration.
            self.report_job_notices();

            let input = self.terminal.read_line()?;
            let input = input.trim();

            if SignalHandler::was_interrupted() {
                continue;
            }

            let (argv, background) = match tokenizer::tokenize(input) {
                Ok(ParsedLine::Empty) => continue,
                Ok(ParsedLine::Command { argv, background }) => (argv, background),
                Err(e) => {
                    eprintln!("jsh: {}", e);
                    continue;
                }
            };

            if let Some(result) = self.handle_builtin_command(&argv, input) {
                match result {
                    Ok(should_exit) => {
                        if should_exit {
                            break;
                        }
                    }
                    Err(e) => eprintln!("jsh: {:#}", e),
                }
                continue;
            }

            if let Err(e) = self.run_external(&argv, background, input) {
                eprintln!("jsh: {:#}", e);
            }

            if let Ok(dir) = std::env::current_dir() {
                self.working_dir = dir;
            }
        }

        Ok(())
    }

    /// Resolve and launch a non-builtin command. The capacity check comes
    /// before resolution so a process is never created without a slot
    /// waiting for it.
    fn run_external(&mut self, argv: &[String], background: bool, cmdline: &str) -> Result<()> {
        if !self.jobs.has_free_slot() {
            return Err(ShellError::TableFull.into());
        }

        let search_path = std::env::var("PATH").unwrap_or_default();
        let path = path_resolver::resolve(&argv[0], &search_path)?;
        debug!("resolved {} to {}", argv[0], path.display());

        launcher::launch(&mut self.jobs, &path, argv, cmdline, background)
    }

    fn handle_builtin_command(&mut self, argv: &[String], input: &str) -> Option<Result<bool>> {
        match argv[0].as_str() {
            "exit" => Some(Ok(true)),

            "cd" => Some(self.builtin_cd(argv.get(1).map(String::as_str)).map(|_| false)),

            "pwd" => {
                println!("{}", self.working_dir.display());
                Some(Ok(false))
            }

            "export" => {
                if argv.len() == 1 {
                    self.environment.list();
                    Some(Ok(false))
                } else {
                    let assignment = input["export".len()..].trim();
                    Some(self.environment.export(assignment).map(|_| false))
                }
            }

            "unset" => {
                if argv.len() == 1 {
                    eprintln!("unset: missing variable name");
                } else {
                    for name in &argv[1..] {
                        self.environment.unset(name);
                    }
                }
                Some(Ok(false))
            }

            "history" => {
                let entries = self.terminal.get_history().get_entries();
                for (i, entry) in entries.iter().enumerate() {
                    println!("{:5} {}", i + 1, entry);
                }
                Some(Ok(false))
            }

            "jobs" => {
                self.list_jobs();
                Some(Ok(false))
            }

            "fg" => Some(self.builtin_fg(argv).map(|_| false)),
            "bg" => Some(self.builtin_bg(argv).map(|_| false)),
            "kill" => Some(self.builtin_kill(argv).map(|_| false)),

            // Not a builtin; goes to path resolution.
            _ => None,
        }
    }

    fn builtin_cd(&mut self, dir: Option<&str>) -> Result<()> {
        let target = match dir {
            Some(d) => expand_tilde(d, dirs::home_dir())?,
            None => dirs::home_dir().context("cd: could not determine home directory")?,
        };

        std::env::set_current_dir(&target)
            .with_context(|| format!("cd: {}", target.display()))?;
        self.working_dir = std::env::current_dir().unwrap_or(target);
        Ok(())
    }

    fn list_jobs(&self) {
        let _guard = ChldGuard::defer();
        for slot in self.jobs.occupied() {
            let state = self.jobs.state_of(slot);
            let state_text = match state {
                JobState::Stopped => state.describe().yellow(),
                _ => state.describe().green(),
            };
            println!(
                "[{}] ({}) {} {}",
                self.jobs.jid_of(slot),
                self.jobs.pid_of(slot),
                state_text,
                self.jobs.command_of(slot)
            );
        }
    }

    fn builtin_fg(&mut self, argv: &[String]) -> Result<()> {
        let spec = argv.get(1).context("fg: usage: fg %jid|pid")?;
        let guard = ChldGuard::defer();
        let slot = self.jobs.resolve_spec(spec, &guard)?;
        let pgid = self.jobs.pid_of(slot);

        self.jobs.set_state(slot, JobState::Foreground);
        killpg(pgid, Signal::SIGCONT)
            .with_context(|| format!("fg: could not continue group {}", pgid))?;

        foreground::give_terminal_to(pgid);
        foreground::wait_for_foreground(&self.jobs, slot, &guard);
        foreground::reclaim_terminal();
        Ok(())
    }

    fn builtin_bg(&mut self, argv: &[String]) -> Result<()> {
        let spec = argv.get(1).context("bg: usage: bg %jid|pid")?;
        let guard = ChldGuard::defer();
        let slot = self.jobs.resolve_spec(spec, &guard)?;
        let pgid = self.jobs.pid_of(slot);

        self.jobs.set_state(slot, JobState::Background);
        killpg(pgid, Signal::SIGCONT)
            .with_context(|| format!("bg: could not continue group {}", pgid))?;

        println!(
            "[{}] ({}) {}",
            self.jobs.jid_of(slot),
            pgid,
            self.jobs.command_of(slot)
        );
        Ok(())
    }

    fn builtin_kill(&mut self, argv: &[String]) -> Result<()> {
        let spec = argv.get(1).context("kill: usage: kill %jid|pid")?;
        let guard = ChldGuard::defer();
        let slot = self.jobs.resolve_spec(spec, &guard)?;
        let pgid = self.jobs.pid_of(slot);
        let stopped = self.jobs.state_of(slot) == JobState::Stopped;

        killpg(pgid, Signal::SIGTERM)
            .with_context(|| format!("kill: could not signal group {}", pgid))?;
        // SIGTERM stays pending on a stopped job until it runs again.
        if stopped {
            let _ = killpg(pgid, Signal::SIGCONT);
        }
        Ok(())
    }

    /// Print every pending completion/suspension exactly once and reclaim
    /// the finished slots. Runs once per loop iteration with the reaper
    /// barred from the table.
    fn report_job_notices(&mut self) {
        let guard = ChldGuard::defer();
        for notice in self.jobs.take_notices(&guard) {
            match notice.reason {
                NoticeReason::Finished => {
                    println!(
                        "[{}] ({}) finished  {}",
                        notice.jid,
                        notice.pid,
                        notice.command.dimmed()
                    );
                }
                NoticeReason::Signaled(sig) => {
                    println!(
                        "[{}] ({}) terminated by signal {}  {}",
                        notice.jid,
                        notice.pid,
                        sig,
                        notice.command.dimmed()
                    );
                }
                NoticeReason::Stopped(sig) => {
                    println!(
                        "[{}] ({}) stopped by signal {}  {}",
                        notice.jid,
                        notice.pid,
                        sig,
                        notice.command.dimmed()
                    );
                }
            }
        }
    }
}

/// Expand a leading `~` to the home directory. Only bare `~` and `~/...`
/// are recognized; `~user` lookups need the passwd database and are
/// rejected rather than silently misresolved.
fn expand_tilde(dir: &str, home: Option<PathBuf>) -> Result<PathBuf> {
    let Some(rest) = dir.strip_prefix('~') else {
        return Ok(PathBuf::from(dir));
    };
    let home = home.context("cd: could not determine home directory")?;
    if rest.is_empty() {
        Ok(home)
    } else if let Some(path) = rest.strip_prefix('/') {
        Ok(home.join(path))
    } else {
        anyhow::bail!("cd: {}: user-name expansion is not supported", dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tilde_expansion() {
        let home = Some(PathBuf::from("/home/maria"));
        assert_eq!(
            expand_tilde("~", home.clone()).unwrap(),
            PathBuf::from("/home/maria")
        );
        assert_eq!(
            expand_tilde("~/src/jsh", home.clone()).unwrap(),
            PathBuf::from("/home/maria/src/jsh")
        );
        assert_eq!(
            expand_tilde("/tmp", home.clone()).unwrap(),
            PathBuf::from("/tmp")
        );
        assert_eq!(
            expand_tilde("relative/dir", home.clone()).unwrap(),
            PathBuf::from("relative/dir")
        );
    }

    #[test]
    fn test_tilde_user_rejected() {
        let home = Some(PathBuf::from("/home/maria"));
        assert!(expand_tilde("~alice", home.clone()).is_err());
        assert!(expand_tilde("~alice/src", home).is_err());
    }

    #[test]
    fn test_tilde_without_home_fails() {
        assert!(expand_tilde("~", None).is_err());
        // no expansion requested, home not needed
        assert_eq!(expand_tilde("/etc", None).unwrap(), PathBuf::from("/etc"));
    }
}

