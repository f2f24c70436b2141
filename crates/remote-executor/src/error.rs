//! Error types for remote execution

use thiserror::Error;

/// Unified error type for remote command execution
///
/// These cover transport-level problems only. A remote command that runs and
/// exits non-zero is not an error at this layer; its exit code is returned as
/// data in [`crate::ExecOutput`].
#[derive(Error, Debug)]
pub enum Error {
    /// Could not reach the remote host
    #[error("connection to {host} failed: {reason}")]
    ConnectionFailed {
        /// The hostname or IP address that failed to connect
        host: String,
        /// The detailed reason for the connection failure
        reason: String,
    },

    /// The remote host rejected our credentials
    #[error("authentication rejected by {host}")]
    AuthenticationRejected {
        /// The hostname or IP address that rejected authentication
        host: String,
    },

    /// The command produced no result within the configured timeout
    #[error("command on {host} timed out after {seconds}s")]
    Timeout {
        /// The hostname or IP address of the session that timed out
        host: String,
        /// The configured timeout in seconds
        seconds: u64,
    },

    /// Failed to spawn the local transport process
    #[error("failed to spawn process: {reason}")]
    SpawnFailed {
        /// The reason for the spawn failure
        reason: String,
    },

    /// Private key material could not be staged for the transport
    #[error("failed to stage key material: {reason}")]
    KeyMaterial {
        /// The reason key staging failed
        reason: String,
    },

    /// Failed to send a signal to a session process
    #[error("failed to send signal {signal}: {reason}")]
    SignalFailed {
        /// The signal number that failed to send
        signal: i32,
        /// The reason for the signal failure
        reason: String,
    },

    /// I/O error
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Create a spawn failed error
    pub fn spawn_failed(reason: impl Into<String>) -> Self {
        Self::SpawnFailed {
            reason: reason.into(),
        }
    }

    /// Create a key material error
    pub fn key_material(reason: impl Into<String>) -> Self {
        Self::KeyMaterial {
            reason: reason.into(),
        }
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
