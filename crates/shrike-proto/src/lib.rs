//! # shrike-proto
//!
//! An IRC client protocol library: message parsing and formatting, RFC 1459
//! case mapping, case-insensitive identifiers, channel roster tracking,
//! byte-safe message splitting, and (behind the default `tokio` feature)
//! framed TCP/TLS transports.
//!
//! ## Quick Start
//!
//! ```rust
//! use shrike_proto::{IStr, Message};
//!
//! // Parse an inbound line
//! let msg: Message = ":nick!user@host PRIVMSG #channel :Hello!".parse().unwrap();
//! assert_eq!(msg.command, "privmsg");
//! assert_eq!(msg.origin.as_ref().unwrap().nick, "NICK");
//!
//! // Construct an outbound line
//! let out = Message::privmsg("#channel", "Hello back!");
//! assert_eq!(out.to_line().unwrap(), "PRIVMSG #channel :Hello back!");
//!
//! // Identifiers fold IRC-style: {}|^ are lowercase []\~
//! assert_eq!(IStr::from("Nick[1]"), "nick{1}");
//! ```

#![deny(clippy::all)]
#![warn(missing_docs)]

pub mod casemap;
pub mod error;
pub mod ident;
#[cfg(feature = "tokio")]
pub mod irc;
#[cfg(feature = "tokio")]
pub mod line;
pub mod message;
pub mod origin;
pub mod roster;
pub mod split;
#[cfg(feature = "tokio")]
pub mod transport;

pub use self::casemap::{irc_eq, irc_lower_char, irc_to_lower, irc_to_upper, irc_upper_char};
pub use self::error::{MessageParseError, ProtocolError};
pub use self::ident::IStr;
#[cfg(feature = "tokio")]
pub use self::irc::IrcCodec;
#[cfg(feature = "tokio")]
pub use self::line::LineCodec;
pub use self::message::{Message, MAX_ARGS};
pub use self::origin::Origin;
pub use self::roster::Roster;
pub use self::split::{split_string, SplitError};
#[cfg(feature = "tokio")]
pub use self::transport::{
    is_disconnect_error, TlsOptions, Transport, TransportReader, TransportWriter,
};
