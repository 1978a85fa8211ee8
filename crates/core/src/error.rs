use std::io;

/// Errors that can occur during a start-test session
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("IO error: {0}")]
    IoError(#[from] io::Error),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// A configuration problem that ends the whole session. The message is
    /// logged as an `[Error: ...]` line before the session finalizes.
    #[error("{0}")]
    Fatal(String),

    /// A missing prerequisite detected before logging is set up
    #[error("{0}")]
    EnvironmentError(String),

    #[error("Command '{command}' returned non-zero exit status {code}")]
    CommandFailed {
        command: String,
        code: i32,
        output: String,
    },

    #[error("Log error: {0}")]
    LogError(String),
}

impl Error {
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Fatal(_))
    }
}

/// Result type alias for start-test operations
pub type Result<T> = std::result::Result<T, Error>;
