use crate::shell::error::ShellError;

/// Longest accepted input line, in bytes.
pub const MAX_LINE: usize = 8192;
/// Most tokens accepted on one line.
pub const MAX_ARGS: usize = 128;

#[derive(Debug, Clone, PartialEq)]
pub enum ParsedLine {
    /// Blank input; the caller takes no action.
    Empty,
    Command { argv: Vec<String>, background: bool },
}

/// Split a line on runs of whitespace. A final token that is exactly `&`
/// is consumed and marks the command for background execution. No quoting,
/// escaping, or globbing.
pub fn tokenize(line: &str) -> Result<ParsedLine, ShellError> {
    if line.len() > MAX_LINE {
        return Err(ShellError::LineTooLong);
    }

    let mut argv: Vec<String> = line.split_whitespace().map(str::to_string).collect();
    if argv.is_empty() {
        return Ok(ParsedLine::Empty);
    }
    if argv.len() > MAX_ARGS {
        return Err(ShellError::TooManyArgs);
    }

    let background = argv.last().map(|t| t == "&").unwrap_or(false);
    if background {
        argv.pop();
        if argv.is_empty() {
            // a bare "&" is as good as a blank line
            return Ok(ParsedLine::Empty);
        }
    }

    Ok(ParsedLine::Command { argv, background })
}
