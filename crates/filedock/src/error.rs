//! Error types for filedock operations
//!
//! Every handler catches its own failures and degrades them to a protocol
//! reply; [`Error::reply`] is that mapping. Failures are also handed to the
//! error-log sink through [`report`].

use crate::protocol::Reply;
use thiserror::Error;

/// Result type alias for filedock operations
pub type Result<T> = std::result::Result<T, Error>;

/// `tracing` target of the error-log sink.
///
/// The server binary routes events with this target to the error log file.
pub const ERROR_LOG_TARGET: &str = "filedock::errors";

/// Filedock error types
#[derive(Error, Debug)]
pub enum Error {
    /// I/O error on a socket or in the file store
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Command keyword was not recognized
    #[error("Invalid command: {0}")]
    InvalidCommand(String),

    /// Command requires a file name but none was given
    #[error("Missing argument for {0}")]
    MissingArgument(&'static str),

    /// File name is empty, contains path separators or otherwise escapes the store
    #[error("Invalid file name: {0}")]
    InvalidFileName(String),

    /// Received payload length does not match the declared length
    #[error("Transfer incomplete: received {received} of {expected} bytes")]
    Transfer {
        /// Declared payload length
        expected: u64,
        /// Bytes actually received
        received: u64,
    },

    /// Requested file does not exist in the store
    #[error("File not found: {0}")]
    FileNotFound(String),

    /// Socket or lock operation exceeded its deadline
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// Operation was interrupted by server shutdown
    #[error("Operation cancelled")]
    Cancelled,

    /// Connection could not be established or was lost
    #[error("Connection error: {0}")]
    Connection(String),

    /// Peer violated the wire protocol
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Invalid or missing configuration
    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Reply the server sends when a handler fails with this error
    pub fn reply(&self) -> Reply {
        match self {
            Error::InvalidCommand(_) | Error::MissingArgument(_) => Reply::InvalidCommand,
            Error::FileNotFound(_) => Reply::FileNotFound,
            _ => Reply::Error,
        }
    }

    /// Check if error was caused by what the peer sent
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Error::InvalidCommand(_)
                | Error::MissingArgument(_)
                | Error::InvalidFileName(_)
                | Error::FileNotFound(_)
                | Error::Transfer { .. }
                | Error::Protocol(_)
        )
    }

    /// Check if the caller may reasonably try the operation again
    ///
    /// Filedock never retries on its own; this is a hint for callers.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::Timeout(_) | Error::Connection(_) | Error::Transfer { .. }
        )
    }

    /// Create timeout error with context
    pub fn timeout(context: impl Into<String>) -> Self {
        Error::Timeout(context.into())
    }

    /// Create connection error with context
    pub fn connection(context: impl Into<String>) -> Self {
        Error::Connection(context.into())
    }
}

/// Hand an error to the error-log sink.
///
/// Fire-and-forget: the event goes to whatever subscriber is installed, and
/// nothing here can fail or alter the caller's control flow.
pub fn report(context: &str, err: &Error) {
    tracing::error!(
        target: ERROR_LOG_TARGET,
        context,
        error = %err,
        client_error = err.is_client_error(),
        "{context}: {err}"
    );
}
