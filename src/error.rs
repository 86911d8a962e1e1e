//! Error types for winrmcp.
//!
//! Every fallible operation in the crate returns [`Result`]. The variants
//! follow the failure taxonomy of a WinRM client: the transport could not
//! reach the listener, the listener rejected a well-formed request, the
//! caller misused a local object, or the caller supplied bad input.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for winrmcp operations.
pub type Result<T> = std::result::Result<T, Error>;

/// The main error type for winrmcp.
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Remote Errors
    // ========================================================================
    /// Network, TLS or authentication failure while reaching the listener.
    #[error("Transport error: {message}")]
    Transport {
        /// Error message
        message: String,
        /// Source error
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// The listener answered with a WS-Management fault.
    #[error("WS-Management fault{}: {reason}", .code.as_deref().map(|c| format!(" ({c})")).unwrap_or_default())]
    Protocol {
        /// Fault code reported by the listener, if any
        code: Option<String>,
        /// Fault reason text
        reason: String,
    },

    /// A remote command finished with a non-zero exit code.
    #[error("Command '{command}' exited with code {exit_code}")]
    CommandFailed {
        /// Command line (without encoded payloads)
        command: String,
        /// Remote exit code
        exit_code: i32,
    },

    // ========================================================================
    // Local Errors
    // ========================================================================
    /// Local misuse of a shell or command (closed shell, busy shell, ...).
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Bad constructor or configuration input.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Configuration file could not be loaded.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A copy task failed; wraps the cause with the path it was working on.
    #[error("Copy failed at '{path}': {source}")]
    Copy {
        /// Remote path of the failing task
        path: String,
        /// Underlying error
        #[source]
        source: Box<Error>,
    },

    /// Local I/O error tied to a path.
    #[error("IO error on '{}': {source}", .path.display())]
    Io {
        /// Local path
        path: PathBuf,
        /// Source error
        #[source]
        source: std::io::Error,
    },
}

impl Error {
    /// Creates a transport error without a source.
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            source: None,
        }
    }

    /// Creates a transport error wrapping its cause.
    pub fn transport_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Transport {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Creates a protocol (fault) error.
    pub fn protocol(code: Option<String>, reason: impl Into<String>) -> Self {
        Self::Protocol {
            code,
            reason: reason.into(),
        }
    }

    /// Creates an invalid state error.
    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidState(message.into())
    }

    /// Creates a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Creates an I/O error for a local path.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Wraps an error with the path of the copy task that produced it.
    pub fn copy(path: impl Into<String>, source: Error) -> Self {
        Self::Copy {
            path: path.into(),
            source: Box::new(source),
        }
    }

    /// Returns true if the listener could not be reached.
    pub fn is_transport(&self) -> bool {
        match self {
            Error::Transport { .. } => true,
            Error::Copy { source, .. } => source.is_transport(),
            _ => false,
        }
    }

    /// Returns true if the listener rejected the request.
    pub fn is_protocol(&self) -> bool {
        match self {
            Error::Protocol { .. } => true,
            Error::Copy { source, .. } => source.is_protocol(),
            _ => false,
        }
    }

    /// Returns the remote exit code if this error reports a failed command.
    pub fn remote_exit_code(&self) -> Option<i32> {
        match self {
            Error::CommandFailed { exit_code, .. } => Some(*exit_code),
            Error::Copy { source, .. } => source.remote_exit_code(),
            _ => None,
        }
    }

    /// Returns the error code for CLI exit status.
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::Copy { source, .. } => source.exit_code(),
            Error::CommandFailed { .. } => 2,
            Error::Transport { .. } | Error::Protocol { .. } => 3,
            Error::Validation(_) | Error::Config(_) => 4,
            _ => 1,
        }
    }
}
