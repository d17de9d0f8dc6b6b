//! Error types for connection establishment and command execution.
//!
//! This module defines all errors that can occur while opening a transport
//! session, negotiating the login prompts, and running commands on a device.

use thiserror::Error;
use tokio::sync::mpsc::error::SendError;

/// Errors that can occur during connection management and command execution.
#[derive(Error, Debug)]
pub enum ConnectError {
    /// The connector was configured in a way that can never connect.
    ///
    /// Raised by `connect()` when the candidate address list is empty.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Every candidate address was tried and none could be opened.
    ///
    /// `source` is the error returned for the last candidate, unchanged.
    #[error("connect failed after {attempts} attempt(s), last address {address}: {source}")]
    ConnectFailure {
        attempts: usize,
        address: String,
        #[source]
        source: Box<ConnectError>,
    },

    /// A transport could not open its connection within the connect timeout.
    #[error("connect timeout: {0}")]
    ConnectTimeout(String),

    /// The expected prompt was not observed before the read timeout.
    ///
    /// The error contains the partial output received before the timeout.
    #[error("exec command timeout: {0}")]
    ExecTimeout(String),

    /// The classified exit status is not in the accepted set.
    #[error("{message}")]
    UnexpectedExit { exit_status: i32, message: String },

    /// The channel was disconnected while waiting for a prompt.
    #[error("channel disconnect on wait prompt")]
    ChannelDisconnectError,

    /// The session has been closed.
    #[error("connect closed")]
    ConnectClosedError,

    /// A command was issued without a live session.
    #[error("not connected")]
    NotConnected,

    /// Socket level failure on the Telnet transport.
    #[error("io error: {0}")]
    IoError(#[from] std::io::Error),

    /// An error occurred in the async-ssh2-tokio library.
    #[error("async ssh2 error: {0}")]
    Ssh2Error(#[from] async_ssh2_tokio::Error),

    /// An error occurred in the russh library.
    #[error("russh error: {0}")]
    RusshError(#[from] russh::Error),

    /// Failed to send data through the channel.
    #[error("Failed to send data: {0}")]
    SendDataError(#[from] SendError<String>),

    /// A prompt pattern could not be compiled.
    #[error("invalid prompt pattern: {0}")]
    InvalidPattern(#[from] regex::Error),

    /// The parameter document could not be parsed.
    #[error("invalid parameters: {0}")]
    InvalidParams(#[from] serde_json::Error),

    /// Internal bookkeeping failure (lock poisoning, encoding).
    #[error("internal error: {0}")]
    InternalServerError(String),

    /// A replayed session has no recorded output for the requested command.
    #[error("replay mismatch: {0}")]
    ReplayMismatchError(String),
}

impl ConnectError {
    /// True for a prompt wait that ran out of time.
    pub fn is_timeout(&self) -> bool {
        matches!(self, ConnectError::ExecTimeout(_))
    }

    /// True when a command finished with a status outside the accepted set.
    pub fn is_unexpected_exit(&self) -> bool {
        matches!(self, ConnectError::UnexpectedExit { .. })
    }

    /// The error of the last candidate address for a failed `connect()`.
    pub fn last_attempt_error(&self) -> Option<&ConnectError> {
        match self {
            ConnectError::ConnectFailure { source, .. } => Some(source),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::ConnectError;
    use std::error::Error;

    #[test]
    fn unexpected_exit_displays_captured_message() {
        let err = ConnectError::UnexpectedExit {
            exit_status: 1,
            message: "mtd: bad command".to_string(),
        };
        assert_eq!(err.to_string(), "mtd: bad command");
        assert!(err.is_unexpected_exit());
        assert!(!err.is_timeout());
    }

    #[test]
    fn connect_failure_keeps_last_error_as_source() {
        let err = ConnectError::ConnectFailure {
            attempts: 2,
            address: "10.0.0.2".to_string(),
            source: Box::new(ConnectError::ExecTimeout("login:".to_string())),
        };
        let last = err.last_attempt_error().expect("last error");
        assert!(last.is_timeout());
        assert!(err.source().is_some());
        assert!(err.to_string().contains("10.0.0.2"));
    }
}
