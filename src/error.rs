//! Error types for the bot daemon.

use shrike_proto::{MessageParseError, ProtocolError};
use thiserror::Error;

/// Errors surfaced by the protocol engine.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ClientError {
    /// Transport or wire-format failure.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// An outbound message failed validation before any I/O happened.
    #[error("invalid outbound message: {0}")]
    InvalidOutbound(#[from] MessageParseError),

    /// The requested nickname was taken before registration completed.
    #[error("nickname is already in use: {0}")]
    NicknameInUse(String),

    /// The server closed the stream before registration completed.
    #[error("lost connection to the server")]
    ConnectionLost,

    /// The send path has shut down; the connection is gone.
    #[error("connection is closed")]
    Closed,
}

/// Errors from the command execution engine.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ExecError {
    /// The configured execution user does not exist.
    #[error("unknown user: {0}")]
    UnknownUser(String),

    /// Looking up the execution user failed.
    #[error("user lookup failed: {0}")]
    UserLookup(#[source] nix::Error),

    /// The configured execution user resolves to uid/gid 0.
    #[error("exec user {0:?} resolves to uid/gid 0")]
    RootUser(String),

    /// No execution user configured while running as root.
    #[error("refusing to run commands as root without an exec user")]
    RunningAsRoot,

    /// Spawning the shell failed.
    #[error("failed to spawn {shell}: {source}")]
    Spawn {
        /// The shell that could not be started.
        shell: String,
        /// The underlying spawn error.
        #[source]
        source: std::io::Error,
    },

    /// The process group survived the forceful kill signal.
    #[error("process group {pid} could not be killed: {source}")]
    Unkillable {
        /// Process group leader pid.
        pid: i32,
        /// Errno returned by the kill.
        #[source]
        source: nix::Error,
    },
}
