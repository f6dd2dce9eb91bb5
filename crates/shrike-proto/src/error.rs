//! Error types for the IRC protocol library.

use thiserror::Error;

/// Convenience type alias for Results using [`ProtocolError`].
pub type Result<T, E = ProtocolError> = std::result::Result<T, E>;

/// Top-level protocol errors.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ProtocolError {
    /// I/O error during reading or writing.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Message exceeded maximum allowed length.
    #[error("message too long: {actual} bytes (limit: {limit})")]
    MessageTooLong {
        /// Actual message length.
        actual: usize,
        /// Maximum allowed length.
        limit: usize,
    },

    /// Failed to parse an IRC message.
    #[error("invalid message: {string}")]
    InvalidMessage {
        /// The invalid message string.
        string: String,
        /// The underlying parse error.
        #[source]
        cause: MessageParseError,
    },
}

/// Errors encountered when parsing or formatting IRC messages.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum MessageParseError {
    /// Message was empty.
    #[error("empty message")]
    EmptyMessage,

    /// An origin prefix was present but no command followed it.
    #[error("unterminated origin/prefix")]
    UnterminatedOrigin,

    /// Command token was missing or could not be read.
    #[error("invalid command")]
    InvalidCommand,

    /// Outbound command was not purely alphanumeric.
    #[error("command must be alphanumeric: {0:?}")]
    CommandNotAlphanumeric(String),

    /// Outbound command or argument was the empty string.
    #[error("command and arguments may not be empty strings")]
    EmptyArgument,

    /// Outbound argument contained NUL, CR, or LF.
    #[error("argument contains forbidden character {ch:?}: {argument:?}")]
    ForbiddenArgumentChar {
        /// The offending argument.
        argument: String,
        /// The forbidden character.
        ch: char,
    },

    /// A non-final outbound argument contained a space.
    #[error("only the last argument may contain spaces: {0:?}")]
    MisplacedSpace(String),

    /// A non-final outbound argument started with `:`.
    #[error("only the last argument may start with ':': {0:?}")]
    MisplacedColon(String),

    /// Outbound argument list exceeded the protocol limit of 15.
    #[error("too many arguments: {count} (limit: 15)")]
    TooManyArguments {
        /// Number of arguments supplied.
        count: usize,
    },
}
