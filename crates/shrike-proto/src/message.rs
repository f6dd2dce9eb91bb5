//! IRC message parsing and formatting.
//!
//! One wire line parses to an optional origin, a command, and up to 15
//! arguments. Only the last argument may contain spaces; on the wire it is
//! carried as the trailing `:`-prefixed parameter.

use std::fmt;
use std::str::FromStr;

use nom::{
    bytes::complete::take_while1, character::complete::char, combinator::opt,
    sequence::preceded, sequence::terminated, IResult,
};
use smallvec::SmallVec;

use crate::error::{MessageParseError, ProtocolError};
use crate::ident::IStr;
use crate::origin::Origin;

/// Maximum number of arguments a single message may carry (RFC 1459).
pub const MAX_ARGS: usize = 15;

/// A parsed IRC message.
///
/// # Example
///
/// ```
/// use shrike_proto::Message;
///
/// let msg: Message = ":nick!user@host PRIVMSG #channel :Hello!".parse().unwrap();
/// assert_eq!(msg.command, "PRIVMSG");
/// assert_eq!(msg.args, vec!["#channel", "Hello!"]);
///
/// let out = Message::privmsg("#channel", "Hello!");
/// assert_eq!(out.to_line().unwrap(), "PRIVMSG #channel :Hello!");
/// ```
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Message {
    /// Where the message came from, when the server included a prefix.
    pub origin: Option<Origin>,
    /// The command or numeric reply, compared case-insensitively.
    pub command: IStr,
    /// Positional arguments; only the last may contain spaces.
    pub args: Vec<String>,
}

/// Parse `[:origin ]command` with nom; argument handling follows below.
fn parse_head(input: &str) -> IResult<&str, (Option<&str>, &str)> {
    let (input, origin) = opt(terminated(
        preceded(char(':'), take_while1(|c| c != ' ')),
        char(' '),
    ))(input)?;
    let (input, command) = take_while1(|c| c != ' ')(input)?;
    Ok((input, (origin, command)))
}

/// Split the remainder of a line into arguments.
///
/// Up to 14 space-separated middle arguments (which may not start with `:`),
/// then an optional trailing argument that may contain spaces. The trailing
/// argument loses one leading `:` if present; an empty trailing argument is
/// dropped.
fn parse_args(input: &str) -> SmallVec<[&str; MAX_ARGS]> {
    let mut args: SmallVec<[&str; MAX_ARGS]> = SmallVec::new();
    let mut rest = input;

    while args.len() < MAX_ARGS - 1 {
        let Some(tok) = rest.strip_prefix(' ') else {
            break;
        };
        if tok.is_empty() || tok.starts_with(':') || tok.starts_with(' ') {
            break;
        }
        let end = tok.find(' ').unwrap_or(tok.len());
        args.push(&tok[..end]);
        rest = &tok[end..];
    }

    if let Some(tok) = rest.strip_prefix(' ') {
        let trailing = tok.strip_prefix(':').unwrap_or(tok);
        if !trailing.is_empty() {
            args.push(trailing);
        }
    }

    args
}

impl Message {
    /// Create a message from a command and pre-built argument list.
    #[must_use]
    pub fn new(command: impl Into<IStr>, args: Vec<String>) -> Self {
        Message {
            origin: None,
            command: command.into(),
            args,
        }
    }

    /// Parse one wire line (trailing CR/LF tolerated).
    pub fn parse(line: &str) -> Result<Message, ProtocolError> {
        let invalid = |cause| ProtocolError::InvalidMessage {
            string: line.to_owned(),
            cause,
        };

        let trimmed = line.trim_end_matches(['\r', '\n']);
        if trimmed.is_empty() {
            return Err(invalid(MessageParseError::EmptyMessage));
        }

        let (rest, (origin, command)) =
            parse_head(trimmed).map_err(|_| invalid(MessageParseError::InvalidCommand))?;
        let args = parse_args(rest);

        Ok(Message {
            origin: origin.map(Origin::parse),
            command: IStr::from(command),
            args: args.into_iter().map(str::to_owned).collect(),
        })
    }

    /// Check the outbound validation rules without serializing.
    ///
    /// Rules: the command is non-empty and alphanumeric; every argument is
    /// non-empty and free of NUL/CR/LF; only the last argument may contain a
    /// space or start with `:`; at most [`MAX_ARGS`] arguments.
    pub fn validate(&self) -> Result<(), MessageParseError> {
        if self.command.is_empty() {
            return Err(MessageParseError::EmptyArgument);
        }
        if !self.command.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(MessageParseError::CommandNotAlphanumeric(
                self.command.as_str().to_owned(),
            ));
        }
        if self.args.len() > MAX_ARGS {
            return Err(MessageParseError::TooManyArguments {
                count: self.args.len(),
            });
        }

        for arg in &self.args {
            if arg.is_empty() {
                return Err(MessageParseError::EmptyArgument);
            }
            if let Some(ch) = arg.chars().find(|&c| matches!(c, '\0' | '\r' | '\n')) {
                return Err(MessageParseError::ForbiddenArgumentChar {
                    argument: arg.clone(),
                    ch,
                });
            }
        }

        for arg in &self.args[..self.args.len().saturating_sub(1)] {
            if arg.contains(' ') {
                return Err(MessageParseError::MisplacedSpace(arg.clone()));
            }
            if arg.starts_with(':') {
                return Err(MessageParseError::MisplacedColon(arg.clone()));
            }
        }

        Ok(())
    }

    /// Serialize to a wire line (without the CRLF terminator).
    ///
    /// The final argument is `:`-prefixed whenever arguments are present.
    /// Fails with the validation rules of [`Message::validate`]; nothing
    /// malformed is ever produced.
    pub fn to_line(&self) -> Result<String, MessageParseError> {
        self.validate()?;

        let mut line = self.command.as_str().to_owned();
        if let Some((last, middles)) = self.args.split_last() {
            for arg in middles {
                line.push(' ');
                line.push_str(arg);
            }
            line.push_str(" :");
            line.push_str(last);
        }
        Ok(line)
    }

    /// Create a `PRIVMSG` to a target with text.
    #[must_use]
    pub fn privmsg(target: impl Into<String>, text: impl Into<String>) -> Self {
        Message::new("PRIVMSG", vec![target.into(), text.into()])
    }

    /// Create a `NOTICE` to a target with text.
    #[must_use]
    pub fn notice(target: impl Into<String>, text: impl Into<String>) -> Self {
        Message::new("NOTICE", vec![target.into(), text.into()])
    }

    /// Create a `JOIN` for a channel.
    #[must_use]
    pub fn join(channel: impl Into<String>) -> Self {
        Message::new("JOIN", vec![channel.into()])
    }

    /// Create a `PART` for a channel, with an optional part message.
    #[must_use]
    pub fn part(channel: impl Into<String>, message: Option<String>) -> Self {
        let mut args = vec![channel.into()];
        args.extend(message);
        Message::new("PART", args)
    }

    /// Create a `QUIT` with an optional quit message.
    #[must_use]
    pub fn quit(message: Option<String>) -> Self {
        Message::new("QUIT", message.into_iter().collect())
    }

    /// Create a `NICK` message requesting a nickname change.
    #[must_use]
    pub fn nick(nickname: impl Into<String>) -> Self {
        Message::new("NICK", vec![nickname.into()])
    }

    /// Create the registration `USER` message.
    #[must_use]
    pub fn user(username: impl Into<String>, realname: impl Into<String>) -> Self {
        Message::new(
            "USER",
            vec![username.into(), "8".into(), "*".into(), realname.into()],
        )
    }

    /// Create a `PASS` message carrying a connection password.
    #[must_use]
    pub fn pass(password: impl Into<String>) -> Self {
        Message::new("PASS", vec![password.into()])
    }

    /// Create a `NAMES` query for a channel.
    #[must_use]
    pub fn names(channel: impl Into<String>) -> Self {
        Message::new("NAMES", vec![channel.into()])
    }

    /// Create a `PONG` echoing the arguments of a received `PING`.
    #[must_use]
    pub fn pong(args: Vec<String>) -> Self {
        Message::new("PONG", args)
    }
}

impl FromStr for Message {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Message, Self::Err> {
        Message::parse(s)
    }
}

impl fmt::Display for Message {
    /// Best-effort rendering for logs; unlike [`Message::to_line`] this never
    /// fails and includes the origin prefix when present.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(origin) = &self.origin {
            write!(f, ":{origin} ")?;
        }
        f.write_str(self.command.as_str())?;
        if let Some((last, middles)) = self.args.split_last() {
            for arg in middles {
                write!(f, " {arg}")?;
            }
            write!(f, " :{last}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple_ping() {
        let msg = Message::parse("PING :server\r\n").unwrap();
        assert_eq!(msg.command, "PING");
        assert_eq!(msg.args, vec!["server"]);
        assert!(msg.origin.is_none());
    }

    #[test]
    fn test_parse_bare_command() {
        let msg = Message::parse("PING").unwrap();
        assert_eq!(msg.command, "ping");
        assert!(msg.args.is_empty());
    }

    #[test]
    fn test_parse_privmsg_with_origin() {
        let msg = Message::parse(":nick!user@host PRIVMSG #channel :Hello, world!").unwrap();
        let origin = msg.origin.unwrap();
        assert_eq!(origin.nick, "nick");
        assert_eq!(origin.user.as_deref(), Some("user"));
        assert_eq!(origin.host.as_deref(), Some("host"));
        assert_eq!(msg.command, "PRIVMSG");
        assert_eq!(msg.args, vec!["#channel", "Hello, world!"]);
    }

    #[test]
    fn test_parse_numeric_reply() {
        let msg = Message::parse(":server 001 nick :Welcome to IRC").unwrap();
        assert_eq!(msg.origin.unwrap().nick, "server");
        assert_eq!(msg.command, "001");
        assert_eq!(msg.args, vec!["nick", "Welcome to IRC"]);
    }

    #[test]
    fn test_parse_trailing_without_colon_after_fourteen() {
        let line = "CMD a1 a2 a3 a4 a5 a6 a7 a8 a9 a10 a11 a12 a13 a14 rest of line";
        let msg = Message::parse(line).unwrap();
        assert_eq!(msg.args.len(), 15);
        assert_eq!(msg.args[13], "a14");
        assert_eq!(msg.args[14], "rest of line");
    }

    #[test]
    fn test_parse_middle_colon_is_not_trailing() {
        // A colon inside a middle argument does not begin the trailing part.
        let msg = Message::parse("USER nick 8 * :real name").unwrap();
        assert_eq!(msg.args, vec!["nick", "8", "*", "real name"]);

        let msg = Message::parse("MODE #chan +b nick!u@h:1").unwrap();
        assert_eq!(msg.args, vec!["#chan", "+b", "nick!u@h:1"]);
    }

    #[test]
    fn test_parse_empty_trailing_dropped() {
        let msg = Message::parse("PRIVMSG #channel :").unwrap();
        assert_eq!(msg.args, vec!["#channel"]);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(Message::parse("").is_err());
        assert!(Message::parse("\r\n").is_err());
        assert!(Message::parse(" leading-space").is_err());
    }

    #[test]
    fn test_command_comparison_is_case_insensitive() {
        let msg = Message::parse("privmsg #c :hi").unwrap();
        assert_eq!(msg.command, "PRIVMSG");
    }

    #[test]
    fn test_format_basic() {
        assert_eq!(
            Message::new("JOIN", vec!["#channel".into()])
                .to_line()
                .unwrap(),
            "JOIN :#channel"
        );
        assert_eq!(Message::new("QUIT", vec![]).to_line().unwrap(), "QUIT");
        assert_eq!(
            Message::privmsg("#c", "hello there").to_line().unwrap(),
            "PRIVMSG #c :hello there"
        );
    }

    #[test]
    fn test_format_rejects_empty() {
        assert_eq!(
            Message::new("PRIVMSG", vec!["#c".into(), String::new()])
                .to_line()
                .unwrap_err(),
            MessageParseError::EmptyArgument
        );
        assert_eq!(
            Message::new("", vec![]).to_line().unwrap_err(),
            MessageParseError::EmptyArgument
        );
    }

    #[test]
    fn test_format_rejects_non_alphanumeric_command() {
        assert!(matches!(
            Message::new("PRIV MSG", vec![]).to_line().unwrap_err(),
            MessageParseError::CommandNotAlphanumeric(_)
        ));
    }

    #[test]
    fn test_format_rejects_forbidden_chars() {
        for bad in ["a\0b", "a\rb", "a\nb"] {
            assert!(matches!(
                Message::new("PRIVMSG", vec!["#c".into(), bad.into()])
                    .to_line()
                    .unwrap_err(),
                MessageParseError::ForbiddenArgumentChar { .. }
            ));
        }
    }

    #[test]
    fn test_format_rejects_misplaced_space_and_colon() {
        assert!(matches!(
            Message::new("PRIVMSG", vec!["a b".into(), "text".into()])
                .to_line()
                .unwrap_err(),
            MessageParseError::MisplacedSpace(_)
        ));
        assert!(matches!(
            Message::new("PRIVMSG", vec![":a".into(), "text".into()])
                .to_line()
                .unwrap_err(),
            MessageParseError::MisplacedColon(_)
        ));
        // The last argument may do both.
        assert!(Message::new("PRIVMSG", vec!["#c".into(), ":a b".into()])
            .to_line()
            .is_ok());
    }

    #[test]
    fn test_round_trip() {
        let original = Message::new(
            "PRIVMSG",
            vec!["#channel".into(), "hello :worlds apart".into()],
        );
        let parsed = Message::parse(&original.to_line().unwrap()).unwrap();
        assert_eq!(parsed.command, original.command);
        assert_eq!(parsed.args, original.args);
    }

    #[test]
    fn test_display_includes_origin() {
        let msg = Message::parse(":nick!u@h PRIVMSG #c :hi").unwrap();
        assert_eq!(msg.to_string(), ":nick!u@h PRIVMSG #c :hi");
    }
}
