//! Errors raised while installing the subscriber

use thiserror::Error;

/// Logging setup errors
#[derive(Debug, Error)]
pub enum LogError {
    #[error("log configuration is malformed: {0}")]
    Config(#[from] serde_json::Error),

    #[error("invalid filter directive `{directive}`: {reason}")]
    Directive { directive: String, reason: String },

    #[error("failed to open log file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to create rolling appender: {0}")]
    Appender(#[from] tracing_appender::rolling::InitError),

    #[error("a global subscriber is already installed: {0}")]
    AlreadyInstalled(#[from] tracing_subscriber::util::TryInitError),
}

/// Result type for logging setup
pub type LogResult<T> = Result<T, LogError>;
