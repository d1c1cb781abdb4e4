use crate::shell::error::ShellError;
use nix::unistd::{access, AccessFlags};
use std::path::{Path, PathBuf};

/// Map a command name to an executable path.
///
/// A name containing `/` is used verbatim. Otherwise each directory of the
/// colon-separated `search_path` is tried in order and the first candidate
/// the caller may execute wins. The search path is passed in rather than
/// read from the environment so resolution is testable in isolation.
pub fn resolve(command: &str, search_path: &str) -> Result<PathBuf, ShellError> {
    if command.contains('/') {
        return Ok(PathBuf::from(command));
    }

    for dir in search_path.split(':').filter(|d| !d.is_empty()) {
        let candidate = Path::new(dir).join(command);
        if access(&candidate, AccessFlags::X_OK).is_ok() {
            return Ok(candidate);
        }
    }

    Err(ShellError::CommandNotFound(command.to_string()))
}
