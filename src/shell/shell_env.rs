use anyhow::Result;
use log::debug;
use std::env;

/// Thin wrapper over the process environment: fills in the defaults an
/// interactive shell expects and backs the `export`/`unset` builtins.
pub struct Environment;

impl Environment {
    pub fn new() -> Self {
        Environment
    }

    pub fn initialize(&mut self) -> Result<()> {
        debug!("Setting default environment variables");

        if env::var("PATH").is_err() {
            env::set_var("PATH", "/usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin");
        }

        if env::var("HOME").is_err() {
            if let Some(home) = dirs::home_dir() {
                env::set_var("HOME", home.as_os_str());
            }
        }

        if let Ok(exe) = env::current_exe() {
            env::set_var("SHELL", exe.as_os_str());
        }

        Ok(())
    }

    /// `export NAME=VALUE`; surrounding quotes on the value are stripped.
    pub fn export(&mut self, assignment: &str) -> Result<()> {
        let Some((name, value)) = assignment.split_once('=') else {
            anyhow::bail!("invalid export format, use: export NAME=VALUE");
        };
        let name = name.trim();
        if name.is_empty() {
            anyhow::bail!("invalid export format, use: export NAME=VALUE");
        }
        let value = value.trim().trim_matches('"').trim_matches('\'');
        env::set_var(name, value);
        Ok(())
    }

    pub fn unset(&mut self, name: &str) {
        env::remove_var(name);
    }

    pub fn list(&self) {
        for (key, value) in env::vars() {
            println!("{}={}", key, value);
        }
    }
}
