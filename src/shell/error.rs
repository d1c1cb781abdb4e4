use thiserror::Error;

/// Errors the control loop recovers from by printing a single line.
/// None of these terminate the shell.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ShellError {
    #[error("{0}: command not found")]
    CommandNotFound(String),

    #[error("job table full; refusing to launch")]
    TableFull,

    #[error("{0}: no such job")]
    JobNotFound(String),

    #[error("too many arguments")]
    TooManyArgs,

    #[error("input line too long")]
    LineTooLong,
}
