//! Message origin parsing.
//!
//! An inbound message may carry a `:origin ` prefix identifying its source:
//! either a user mask (`nick!user@host`) or a bare server name. Origins are
//! split on `!` and `@`; the username and hostname are only present when the
//! `@` separator is.

use std::fmt;

use crate::ident::IStr;

/// The source of an inbound message.
///
/// For user-originated commands the `nick` field is the sender's nickname;
/// for server-originated messages (numeric replies, PING) it is the server
/// name. Username and hostname are populated from a `nick!user@host` mask.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Origin {
    /// Nickname (or server name) the message came from.
    pub nick: IStr,
    /// Username from a `nick!user@host` mask.
    pub user: Option<String>,
    /// Hostname from a `nick[!user]@host` mask.
    pub host: Option<String>,
}

impl Origin {
    /// Parse a prefix string (without the leading `:`) into its components.
    ///
    /// This is a lenient parser: anything without an `@` is treated as a bare
    /// nickname or server name.
    #[must_use]
    pub fn parse(s: &str) -> Self {
        if let Some(at) = s.find('@') {
            let before = &s[..at];
            let host = &s[at + 1..];

            let (nick, user) = match before.find('!') {
                Some(bang) => (&before[..bang], Some(before[bang + 1..].to_owned())),
                None => (before, None),
            };

            Origin {
                nick: IStr::from(nick),
                user,
                host: Some(host.to_owned()),
            }
        } else {
            Origin {
                nick: IStr::from(s),
                user: None,
                host: None,
            }
        }
    }

    /// Create a bare origin from a nickname or server name.
    pub fn nick_only(nick: impl Into<IStr>) -> Self {
        Origin {
            nick: nick.into(),
            user: None,
            host: None,
        }
    }
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.nick.as_str())?;
        if let Some(user) = &self.user {
            write!(f, "!{user}")?;
        }
        if let Some(host) = &self.host {
            write!(f, "@{host}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_mask() {
        let o = Origin::parse("nick!user@host.example.com");
        assert_eq!(o.nick, "nick");
        assert_eq!(o.user.as_deref(), Some("user"));
        assert_eq!(o.host.as_deref(), Some("host.example.com"));
    }

    #[test]
    fn test_parse_without_user() {
        let o = Origin::parse("nick@host");
        assert_eq!(o.nick, "nick");
        assert_eq!(o.user, None);
        assert_eq!(o.host.as_deref(), Some("host"));
    }

    #[test]
    fn test_parse_server_name() {
        let o = Origin::parse("irc.example.com");
        assert_eq!(o.nick, "irc.example.com");
        assert_eq!(o.user, None);
        assert_eq!(o.host, None);
    }

    #[test]
    fn test_nick_is_case_insensitive() {
        let o = Origin::parse("Nick[1]!u@h");
        assert_eq!(o.nick, "nick{1}");
    }

    #[test]
    fn test_display_round_trip() {
        for raw in ["nick!user@host", "nick@host", "irc.example.com", "nick"] {
            assert_eq!(Origin::parse(raw).to_string(), raw);
        }
    }
}
