use std::io;
use std::time::Duration;

use thiserror::Error;

/// Failures at the Azure CLI boundary.
///
/// Every variant carries owned strings so the error can be cloned into the
/// completion events that travel back to the UI loop.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GatewayError {
    /// The CLI binary could not be started (missing, not executable, ...).
    #[error("failed to run `{binary}`: {message}")]
    Spawn { binary: String, message: String },
    /// The CLI ran but exited unsuccessfully.
    #[error("az exited with {status}: {stderr}")]
    Exit { status: String, stderr: String },
    /// The CLI did not finish within the configured timeout.
    #[error("az did not respond within {0:?}")]
    Timeout(Duration),
    /// Standard output was not the JSON shape we expected.
    #[error("unexpected response from az: {0}")]
    Parse(String),
    /// A write produced no output, which the CLI only does on failure.
    #[error("az returned an empty response")]
    EmptyResponse,
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

impl From<serde_json::Error> for GatewayError {
    fn from(err: serde_json::Error) -> Self {
        GatewayError::Parse(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, GatewayError>;

/// Process-level failures that abort start-up or tear-down.
#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error("Failed to switch subscription: {0}")]
    Subscription(String),
}
