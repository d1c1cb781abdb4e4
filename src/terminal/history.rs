use anyhow::{Context, Result};
use std::fs;
use std::path::PathBuf;

const MAX_HISTORY_SIZE: usize = 1000;

/// Command history backed by `~/.jsh_history`. Loaded once at startup,
/// written back when the terminal shuts down.
pub struct History {
    history_file: Option<PathBuf>,
    entries: Vec<String>,
}

impl History {
    pub fn empty() -> Self {
        History {
            history_file: None,
            entries: Vec::new(),
        }
    }

    pub fn load() -> Result<Self> {
        let home = dirs::home_dir().context("Could not determine home directory")?;
        let history_file = home.join(".jsh_history");

        let mut entries = Vec::new();
        if history_file.exists() {
            for line in fs::read_to_string(&history_file)?.lines() {
                if !line.trim().is_empty() {
                    entries.push(line.to_string());
                }
            }
        }
        if entries.len() > MAX_HISTORY_SIZE {
            entries.drain(..entries.len() - MAX_HISTORY_SIZE);
        }

        Ok(History {
            history_file: Some(history_file),
            entries,
        })
    }

    pub fn add(&mut self, entry: &str) {
        let entry = entry.trim();
        if entry.is_empty() {
            return;
        }
        // skip immediate repeats
        if self.entries.last().map(String::as_str) == Some(entry) {
            return;
        }
        self.entries.push(entry.to_string());
        if self.entries.len() > MAX_HISTORY_SIZE {
            self.entries.remove(0);
        }
    }

    pub fn save(&self) -> Result<()> {
        if let Some(path) = &self.history_file {
            fs::write(path, self.entries.join("\n") + "\n")?;
        }
        Ok(())
    }

    pub fn get_entries(&self) -> &[String] {
        &self.entries
    }
}
