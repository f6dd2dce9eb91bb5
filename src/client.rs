//! The IRC protocol engine.
//!
//! [`Client`] owns the connection's read half and the dispatch loop. Writes
//! go through a dedicated writer task (and, when flood control is on, the
//! scheduler task in front of it); everything that needs to send holds a
//! [`ClientHandle`].
//!
//! Dispatch is strictly sequential: one inbound message is fully handled
//! (built-in state updates first, then registered callbacks, then the raw
//! notification) before the next is parsed. Callbacks that need roster data
//! copy it out through the handle.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use shrike_proto::transport::{is_disconnect_error, TlsOptions};
use shrike_proto::{split_string, IStr, Message, Origin, ProtocolError, Roster, Transport};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::error::ClientError;
use crate::sched::{spawn_scheduler, spawn_writer, FloodPolicy, Outbox};

/// Wire limit for one line, including the CRLF terminator.
const MAX_LINE_LEN: usize = 512;

/// Worst-case username length in a server-added message prefix.
const MAX_USER_LEN: usize = 10;

/// Worst-case hostname length in a server-added message prefix.
const MAX_HOST_LEN: usize = 63;

/// Connection parameters for [`Client::connect`].
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Server hostname.
    pub host: String,
    /// Server port.
    pub port: u16,
    /// Whether to connect with TLS.
    pub tls: bool,
    /// TLS trust options, used when `tls` is set.
    pub tls_options: TlsOptions,
    /// Flood-control policy; `None` disables outbound pacing entirely.
    pub flood: Option<FloodPolicy>,
}

/// A received PRIVMSG or NOTICE.
#[derive(Debug, Clone)]
pub struct ChatEvent {
    /// Who sent it. Empty nick when the server omitted a prefix.
    pub sender: Origin,
    /// Channel it was sent to, or `None` for a private query.
    pub channel: Option<IStr>,
    /// The message text.
    pub text: String,
    /// Whether this was addressed directly to the client.
    pub is_query: bool,
}

type RawHandler = Box<dyn FnMut(&ClientHandle, &Message) + Send>;
type ChatHandler = Box<dyn FnMut(&ClientHandle, &ChatEvent) + Send>;
type JoinHandler = Box<dyn FnMut(&ClientHandle, &Origin, &IStr) + Send>;
type PartHandler = Box<dyn FnMut(&ClientHandle, &Origin, &IStr, Option<&str>) + Send>;
type QuitHandler = Box<dyn FnMut(&ClientHandle, &Origin, Option<&str>, &[IStr]) + Send>;
type KickHandler = Box<dyn FnMut(&ClientHandle, &Origin, &IStr, &IStr, Option<&str>) + Send>;
type NickHandler = Box<dyn FnMut(&ClientHandle, &Origin, &IStr) + Send>;
type NamesHandler = Box<dyn FnMut(&ClientHandle, &IStr, &[IStr]) + Send>;

/// The set of registered callbacks. A "bot" is exactly this: closures
/// attached to the client, not a subtype of it.
#[derive(Default)]
struct Callbacks {
    message: Vec<ChatHandler>,
    notice: Vec<ChatHandler>,
    join: Vec<JoinHandler>,
    part: Vec<PartHandler>,
    quit: Vec<QuitHandler>,
    kick: Vec<KickHandler>,
    nick: Vec<NickHandler>,
    names: Vec<NamesHandler>,
    raw: Vec<RawHandler>,
    commands: HashMap<IStr, Vec<RawHandler>>,
}

struct Shared {
    roster: RwLock<Roster>,
    registered: AtomicBool,
    alive: AtomicBool,
}

/// Cheap, cloneable handle onto a client's send path and shared state.
#[derive(Clone)]
pub struct ClientHandle {
    outbox: Outbox,
    shared: Arc<Shared>,
}

impl ClientHandle {
    /// The client's current nickname, if registration has progressed far
    /// enough to know it.
    #[must_use]
    pub fn nickname(&self) -> Option<IStr> {
        self.shared.roster.read().own_nick().cloned()
    }

    /// Copy of the joined-channel list.
    #[must_use]
    pub fn channels(&self) -> Vec<IStr> {
        self.shared.roster.read().channels().to_vec()
    }

    /// Copy of a channel's member list.
    #[must_use]
    pub fn members(&self, channel: &IStr) -> Vec<IStr> {
        self.shared.roster.read().members(channel).to_vec()
    }

    /// Whether the registration-confirmation reply has arrived.
    #[must_use]
    pub fn is_registered(&self) -> bool {
        self.shared.registered.load(Ordering::SeqCst)
    }

    /// Whether the connection is still up.
    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.shared.alive.load(Ordering::SeqCst)
    }

    /// Send a raw message directly, bypassing flood control.
    pub fn send_raw(&self, message: Message) -> Result<(), ClientError> {
        self.outbox.send_raw(message)
    }

    /// Send a PRIVMSG, splitting long texts at byte boundaries without
    /// breaking words.
    pub fn send(&self, target: &str, text: &str) -> Result<(), ClientError> {
        self.privmsg_or_notice(target, text, true, true, false)
    }

    /// Send a NOTICE, splitting long texts like [`ClientHandle::send`].
    pub fn send_notice(&self, target: &str, text: &str) -> Result<(), ClientError> {
        self.privmsg_or_notice(target, text, true, true, true)
    }

    /// Send a PRIVMSG or NOTICE with explicit splitting behavior.
    ///
    /// `split` controls whether oversized texts are split at all; `nobreak`
    /// keeps words intact when splitting.
    pub fn send_with(
        &self,
        target: &str,
        text: &str,
        split: bool,
        nobreak: bool,
        notice: bool,
    ) -> Result<(), ClientError> {
        self.privmsg_or_notice(target, text, split, nobreak, notice)
    }

    /// Join a channel.
    pub fn join(&self, channel: &str) -> Result<(), ClientError> {
        self.send_raw(Message::join(channel))
    }

    /// Leave a channel, with an optional part message.
    pub fn part(&self, channel: &str, message: Option<&str>) -> Result<(), ClientError> {
        self.send_raw(Message::part(channel, message.map(str::to_owned)))
    }

    /// Disconnect from the server. The server closes the stream in
    /// response, which ends the listen loop cleanly.
    pub fn quit(&self, message: Option<&str>) -> Result<(), ClientError> {
        self.send_raw(Message::quit(message.map(str::to_owned)))
    }

    /// Request a nickname change. The roster is updated when the server
    /// echoes the change back.
    pub fn nick(&self, new_nickname: &str) -> Result<(), ClientError> {
        self.send_raw(Message::nick(new_nickname))
    }

    /// Query a channel's member list. Usually unnecessary: the roster is
    /// kept current automatically.
    pub fn names(&self, channel: &str) -> Result<(), ClientError> {
        if channel.is_empty() || channel.chars().all(char::is_whitespace) {
            return Ok(());
        }
        self.send_raw(Message::names(channel))
    }

    /// Maximum text bytes a PRIVMSG/NOTICE to `target` can carry without
    /// risking server-side truncation. Accounts for the worst-case
    /// `:nick!user@host ` prefix the server prepends when relaying.
    ///
    /// Returns `None` when no positive budget exists.
    #[must_use]
    pub fn safe_message_length(&self, target: &str, notice: bool) -> Option<usize> {
        let command = if notice { "NOTICE" } else { "PRIVMSG" };
        let nick_len = self.nickname().map_or(0, |n| n.len());
        // :<nick>!<user>@<host>
        let mask = 1 + nick_len + 1 + MAX_USER_LEN + 1 + MAX_HOST_LEN;
        // " COMMAND target : " plus CRLF
        let overhead = mask + 1 + command.len() + 1 + target.len() + 2 + 2;
        MAX_LINE_LEN.checked_sub(overhead).filter(|n| *n > 0)
    }

    fn privmsg_or_notice(
        &self,
        target: &str,
        text: &str,
        split: bool,
        nobreak: bool,
        notice: bool,
    ) -> Result<(), ClientError> {
        let command = if notice { "NOTICE" } else { "PRIVMSG" };

        let mut pieces = vec![text.to_owned()];
        if split {
            if let Some(budget) = self.safe_message_length(target, notice) {
                if let Ok(parts) = split_string(text, budget, nobreak) {
                    pieces = parts;
                }
            }
        }

        for piece in pieces {
            self.outbox.send_scheduled(
                IStr::from(target),
                Message::new(command, vec![target.to_owned(), piece]),
            )?;
        }
        Ok(())
    }
}

/// The protocol engine: owns the connection and the dispatch loop.
pub struct Client {
    reader: shrike_proto::TransportReader,
    handle: ClientHandle,
    callbacks: Callbacks,
}

impl Client {
    /// Connect to the server and start the writer (and scheduler, when
    /// flood control is enabled) tasks.
    pub async fn connect(config: &ClientConfig) -> Result<Client, ClientError> {
        let transport = if config.tls {
            Transport::connect_tls(&config.host, config.port, &config.tls_options).await?
        } else {
            Transport::connect(&config.host, config.port).await?
        };
        let (reader, writer) = transport.split();

        let raw_tx = spawn_writer(writer);
        let sched_tx = config
            .flood
            .clone()
            .map(|policy| spawn_scheduler(policy, raw_tx.clone()));

        let shared = Arc::new(Shared {
            roster: RwLock::new(Roster::new()),
            registered: AtomicBool::new(false),
            alive: AtomicBool::new(true),
        });

        Ok(Client {
            reader,
            handle: ClientHandle {
                outbox: Outbox::new(raw_tx, sched_tx),
                shared,
            },
            callbacks: Callbacks::default(),
        })
    }

    /// A cloneable handle onto this client's send path.
    #[must_use]
    pub fn handle(&self) -> ClientHandle {
        self.handle.clone()
    }

    /// Register a PRIVMSG callback.
    pub fn on_message(&mut self, f: impl FnMut(&ClientHandle, &ChatEvent) + Send + 'static) {
        self.callbacks.message.push(Box::new(f));
    }

    /// Register a NOTICE callback.
    pub fn on_notice(&mut self, f: impl FnMut(&ClientHandle, &ChatEvent) + Send + 'static) {
        self.callbacks.notice.push(Box::new(f));
    }

    /// Register a callback for users joining a channel.
    pub fn on_join(&mut self, f: impl FnMut(&ClientHandle, &Origin, &IStr) + Send + 'static) {
        self.callbacks.join.push(Box::new(f));
    }

    /// Register a callback for users leaving a channel.
    pub fn on_part(
        &mut self,
        f: impl FnMut(&ClientHandle, &Origin, &IStr, Option<&str>) + Send + 'static,
    ) {
        self.callbacks.part.push(Box::new(f));
    }

    /// Register a callback for users disconnecting. Receives the channels
    /// the user was actually in.
    pub fn on_quit(
        &mut self,
        f: impl FnMut(&ClientHandle, &Origin, Option<&str>, &[IStr]) + Send + 'static,
    ) {
        self.callbacks.quit.push(Box::new(f));
    }

    /// Register a callback for kicks.
    pub fn on_kick(
        &mut self,
        f: impl FnMut(&ClientHandle, &Origin, &IStr, &IStr, Option<&str>) + Send + 'static,
    ) {
        self.callbacks.kick.push(Box::new(f));
    }

    /// Register a callback for nickname changes.
    pub fn on_nick(&mut self, f: impl FnMut(&ClientHandle, &Origin, &IStr) + Send + 'static) {
        self.callbacks.nick.push(Box::new(f));
    }

    /// Register a callback for committed roster snapshots.
    pub fn on_names(&mut self, f: impl FnMut(&ClientHandle, &IStr, &[IStr]) + Send + 'static) {
        self.callbacks.names.push(Box::new(f));
    }

    /// Register a callback that fires after every dispatched message,
    /// whether or not anything else handled it.
    pub fn on_raw(&mut self, f: impl FnMut(&ClientHandle, &Message) + Send + 'static) {
        self.callbacks.raw.push(Box::new(f));
    }

    /// Register a handler for a specific command or numeric reply.
    ///
    /// Handlers receive the whole parsed message and slice the argument
    /// list themselves.
    pub fn register_handler(
        &mut self,
        command: &str,
        f: impl FnMut(&ClientHandle, &Message) + Send + 'static,
    ) {
        self.callbacks
            .commands
            .entry(IStr::from(command))
            .or_default()
            .push(Box::new(f));
    }

    /// Send a connection password. Must precede [`Client::register`].
    pub fn password(&self, password: &str) -> Result<(), ClientError> {
        self.handle.send_raw(Message::pass(password))
    }

    /// Register with the server and wait for confirmation.
    ///
    /// Reads and dispatches messages until the welcome reply arrives. Fails
    /// with [`ClientError::NicknameInUse`] if the name is taken first, or
    /// [`ClientError::ConnectionLost`] if the stream ends first.
    pub async fn register(
        &mut self,
        nickname: &str,
        realname: Option<&str>,
    ) -> Result<(), ClientError> {
        self.handle
            .shared
            .roster
            .write()
            .set_own_nick(IStr::from(nickname));
        self.handle
            .send_raw(Message::user(nickname, realname.unwrap_or(nickname)))?;
        self.handle.send_raw(Message::nick(nickname))?;

        while !self.handle.is_registered() {
            match self.reader.read_message().await? {
                Some(message) => self.dispatch(message)?,
                None => return Err(ClientError::ConnectionLost),
            }
        }
        Ok(())
    }

    /// Listen for messages until the connection ends.
    ///
    /// A closed or reset stream ends the loop cleanly; unparseable lines
    /// are dropped; any other transport error is fatal.
    pub async fn listen(&mut self) -> Result<(), ClientError> {
        let result = self.listen_inner().await;
        self.handle.shared.alive.store(false, Ordering::SeqCst);
        result
    }

    /// Listen on a spawned task, invoking `on_close` when the connection is
    /// lost. The non-blocking counterpart of [`Client::listen`].
    pub fn listen_spawn(
        mut self,
        on_close: impl FnOnce(Result<(), ClientError>) + Send + 'static,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let result = self.listen().await;
            on_close(result);
        })
    }

    async fn listen_inner(&mut self) -> Result<(), ClientError> {
        loop {
            match self.reader.read_message().await {
                Ok(Some(message)) => self.dispatch(message)?,
                Ok(None) => return Ok(()),
                Err(ProtocolError::InvalidMessage { string, cause }) => {
                    debug!(line = %string.trim_end(), error = %cause, "dropping unparseable line");
                }
                Err(ProtocolError::Io(e)) if is_disconnect_error(&e) => {
                    debug!(error = %e, "connection closed by peer");
                    return Ok(());
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Handle one parsed message: built-in state updates, then typed
    /// callbacks, then command handlers, then the raw notification.
    fn dispatch(&mut self, message: Message) -> Result<(), ClientError> {
        let handle = self.handle.clone();
        let command = message.command.to_irc_upper();
        let origin = message
            .origin
            .clone()
            .unwrap_or_else(|| Origin::nick_only(""));
        let args = &message.args;

        match command.as_str() {
            "PING" => {
                if let Err(e) = handle.send_raw(Message::pong(args.clone())) {
                    debug!(error = %e, "failed to answer PING");
                }
            }
            "001" => {
                if let Some(nick) = args.first() {
                    handle
                        .shared
                        .roster
                        .write()
                        .set_own_nick(IStr::from(nick.as_str()));
                }
                handle.shared.registered.store(true, Ordering::SeqCst);
                info!("registered with server");
            }
            "JOIN" => {
                if let Some(channel) = args.first() {
                    let channel = IStr::from(channel.as_str());
                    handle
                        .shared
                        .roster
                        .write()
                        .add_member(&origin.nick, std::slice::from_ref(&channel));
                    for f in &mut self.callbacks.join {
                        f(&handle, &origin, &channel);
                    }
                }
            }
            "PART" => {
                if let Some(channel) = args.first() {
                    let channel = IStr::from(channel.as_str());
                    handle
                        .shared
                        .roster
                        .write()
                        .remove_member(&origin.nick, std::slice::from_ref(&channel));
                    let reason = args.get(1).map(String::as_str);
                    for f in &mut self.callbacks.part {
                        f(&handle, &origin, &channel, reason);
                    }
                }
            }
            "QUIT" => {
                let affected = handle
                    .shared
                    .roster
                    .write()
                    .remove_member_everywhere(&origin.nick);
                let reason = args.first().map(String::as_str);
                for f in &mut self.callbacks.quit {
                    f(&handle, &origin, reason, &affected);
                }
            }
            "KICK" => {
                if let (Some(channel), Some(target)) = (args.first(), args.get(1)) {
                    let channel = IStr::from(channel.as_str());
                    let target = IStr::from(target.as_str());
                    handle
                        .shared
                        .roster
                        .write()
                        .remove_member(&target, std::slice::from_ref(&channel));
                    let reason = args.get(2).map(String::as_str);
                    for f in &mut self.callbacks.kick {
                        f(&handle, &origin, &channel, &target, reason);
                    }
                }
            }
            "NICK" => {
                if let Some(new_nick) = args.first() {
                    let new_nick = IStr::from(new_nick.as_str());
                    handle
                        .shared
                        .roster
                        .write()
                        .rename_member(&origin.nick, &new_nick);
                    for f in &mut self.callbacks.nick {
                        f(&handle, &origin, &new_nick);
                    }
                }
            }
            "PRIVMSG" | "NOTICE" => {
                if let (Some(target), Some(text)) = (args.first(), args.get(1)) {
                    let is_query = handle
                        .nickname()
                        .is_some_and(|nick| nick == target.as_str());
                    let event = ChatEvent {
                        sender: origin.clone(),
                        channel: (!is_query).then(|| IStr::from(target.as_str())),
                        text: text.clone(),
                        is_query,
                    };
                    let handlers = if command == "PRIVMSG" {
                        &mut self.callbacks.message
                    } else {
                        &mut self.callbacks.notice
                    };
                    for f in handlers {
                        f(&handle, &event);
                    }
                }
            }
            // NAMES reply entry: accumulate into the snapshot buffer.
            "353" => {
                if let (Some(channel), Some(names)) = (args.get(2), args.get(3)) {
                    let channel = IStr::from(channel.as_str());
                    let names = names
                        .split_whitespace()
                        .map(|n| IStr::from(n.trim_start_matches(['@', '+'])));
                    handle.shared.roster.write().buffer_names(&channel, names);
                }
            }
            // End of NAMES: commit the snapshot and notify per channel.
            "366" => {
                if let Some(channel) = args.get(1) {
                    let channel = IStr::from(channel.as_str());
                    let events = handle.shared.roster.write().commit_names(&channel);
                    for (chan, names) in &events {
                        for f in &mut self.callbacks.names {
                            f(&handle, chan, names);
                        }
                    }
                }
            }
            "433" => {
                if !handle.is_registered() {
                    let attempted = args.get(1).cloned().unwrap_or_default();
                    return Err(ClientError::NicknameInUse(attempted));
                }
            }
            _ => {}
        }

        if let Some(handlers) = self.callbacks.commands.get_mut(&message.command) {
            for f in handlers {
                f(&handle, &message);
            }
        }

        for f in &mut self.callbacks.raw {
            f(&handle, &message);
        }

        Ok(())
    }
}
