mod history;

use self::history::History;
use anyhow::Result;
use colored::*;
use rustyline::error::ReadlineError;
use rustyline::{Config, DefaultEditor, EditMode};
use std::env;
use std::path::{Path, PathBuf};

/// Interactive line source: rustyline editing plus a persistent history
/// file. Contributes no coordination logic; the shell core just calls
/// `read_line` once per loop iteration.
pub struct Terminal {
    editor: DefaultEditor,
    history: History,
}

impl Terminal {
    pub fn new() -> Self {
        let config = Config::builder()
            .edit_mode(EditMode::Emacs)
            .auto_add_history(false)
            .build();

        let editor =
            DefaultEditor::with_config(config).unwrap_or_else(|_| DefaultEditor::new().unwrap());

        let history = History::load().unwrap_or_else(|e| {
            eprintln!("Warning: Failed to load history: {}", e);
            History::empty()
        });

        let mut terminal = Terminal { editor, history };
        for entry in terminal.history.get_entries().to_vec() {
            let _ = terminal.editor.add_history_entry(entry);
        }
        terminal
    }

    pub fn read_line(&mut self) -> Result<String> {
        let prompt = self.create_prompt();

        let line = match self.editor.readline(&prompt) {
            Ok(line) => line,
            // Ctrl+C: blank line, fresh prompt
            Err(ReadlineError::Interrupted) => return Ok(String::new()),
            // Ctrl+D: end of input terminates the shell
            Err(ReadlineError::Eof) => return Ok("exit".to_string()),
            Err(err) => return Err(anyhow::anyhow!("Error reading input: {}", err)),
        };

        let line = line.trim().to_string();
        if !line.is_empty() {
            self.history.add(&line);
            self.editor.add_history_entry(&line)?;
        }

        Ok(line)
    }

    fn create_prompt(&self) -> String {
        let cwd = env::current_dir().unwrap_or_default();
        let home = dirs::home_dir().unwrap_or_default();
        let path = shorten_path(&cwd, &home);
        let username = env::var("USER").unwrap_or_else(|_| "user".to_string());

        format!(
            "{}{}{} {} ",
            username.bright_green(),
            ":".bright_blue(),
            path.bright_yellow(),
            "❯".bright_purple()
        )
    }

    pub fn get_history(&self) -> &History {
        &self.history
    }
}

fn shorten_path(path: &Path, home: &PathBuf) -> String {
    match path.strip_prefix(home) {
        Ok(stripped) if stripped.as_os_str().is_empty() => "~".to_string(),
        Ok(stripped) => format!("~/{}", stripped.to_string_lossy()),
        Err(_) => path.to_string_lossy().to_string(),
    }
}

impl Drop for Terminal {
    fn drop(&mut self) {
        if let Err(e) = self.history.save() {
            eprintln!("Warning: Failed to save history: {}", e);
        }
    }
}
