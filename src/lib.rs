//! shrike - an IRC bot that runs shell commands.
//!
//! The protocol engine ([`client`]) drives the command execution engine
//! ([`exec`]) through the thin glue in [`bot`]: inbound `PRIVMSG` lines
//! carrying the command prefix become supervised shell invocations, and
//! their output flows back over the connection's rate-limited send path.

#![deny(clippy::all)]

pub mod bot;
pub mod client;
pub mod config;
pub mod error;
pub mod exec;
pub mod sched;

pub use client::{ChatEvent, Client, ClientConfig, ClientHandle};
pub use config::Config;
pub use error::{ClientError, ExecError};
pub use exec::{CommandRunner, Supervisor};
pub use sched::FloodPolicy;
