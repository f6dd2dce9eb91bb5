//! Channel roster tracking.
//!
//! Tracks per-channel membership and the client's own joined-channel set,
//! driven by JOIN/PART/QUIT/KICK/NICK events and the NAMES snapshot reply
//! sequence. All keys compare under IRC case rules via [`IStr`].
//!
//! NAMES replies accumulate into a side buffer; the live roster keeps its
//! pre-snapshot contents until the end-of-names event commits the buffer in
//! one step.

use std::collections::HashMap;

use crate::ident::IStr;

/// Membership state for every channel the client can see.
#[derive(Debug, Default, Clone)]
pub struct Roster {
    own_nick: Option<IStr>,
    channels: Vec<IStr>,
    members: HashMap<IStr, Vec<IStr>>,
    names_buffer: HashMap<IStr, Vec<IStr>>,
}

impl Roster {
    /// Create an empty roster.
    #[must_use]
    pub fn new() -> Self {
        Roster::default()
    }

    /// Record the client's own nickname (set at registration and on 001).
    pub fn set_own_nick(&mut self, nick: IStr) {
        self.own_nick = Some(nick);
    }

    /// The client's own nickname, if known.
    #[must_use]
    pub fn own_nick(&self) -> Option<&IStr> {
        self.own_nick.as_ref()
    }

    /// Channels the client itself has joined, in join order.
    #[must_use]
    pub fn channels(&self) -> &[IStr] {
        &self.channels
    }

    /// Members of a channel, in arrival order.
    #[must_use]
    pub fn members(&self, channel: &IStr) -> &[IStr] {
        self.members.get(channel).map_or(&[], Vec::as_slice)
    }

    /// Add a nickname to each channel's roster.
    ///
    /// Adding the client's own nickname also records the channel as joined.
    pub fn add_member(&mut self, nick: &IStr, channels: &[IStr]) {
        let is_self = self.own_nick.as_ref() == Some(nick);
        for channel in channels {
            if is_self && !self.channels.contains(channel) {
                self.channels.push(channel.clone());
            }
            self.members
                .entry(channel.clone())
                .or_default()
                .push(nick.clone());
        }
    }

    /// Remove a nickname from the given channels' rosters.
    ///
    /// Returns only the channels where a removal actually happened, which is
    /// what the quit notification reports. Removing the client's own nickname
    /// also un-joins the channel.
    pub fn remove_member(&mut self, nick: &IStr, channels: &[IStr]) -> Vec<IStr> {
        let is_self = self.own_nick.as_ref() == Some(nick);
        let mut affected = Vec::new();
        for channel in channels {
            let Some(list) = self.members.get_mut(channel) else {
                continue;
            };
            let Some(pos) = list.iter().position(|n| n == nick) else {
                continue;
            };
            list.remove(pos);
            if is_self {
                self.channels.retain(|c| c != channel);
            }
            affected.push(channel.clone());
        }
        affected
    }

    /// Remove a nickname from every joined channel (QUIT).
    ///
    /// Returns the channels the user was actually in.
    pub fn remove_member_everywhere(&mut self, nick: &IStr) -> Vec<IStr> {
        let joined = self.channels.clone();
        self.remove_member(nick, &joined)
    }

    /// Replace a nickname across all joined channels' rosters (NICK).
    ///
    /// Renaming the client's own nickname updates it. List position is not
    /// preserved; the new name is appended.
    pub fn rename_member(&mut self, old: &IStr, new: &IStr) {
        if self.own_nick.as_ref() == Some(old) {
            self.own_nick = Some(new.clone());
        }
        for channel in &self.channels {
            if let Some(list) = self.members.get_mut(channel) {
                if let Some(pos) = list.iter().position(|n| n == old) {
                    list.remove(pos);
                    list.push(new.clone());
                }
            }
        }
    }

    /// Accumulate one NAMES reply into the snapshot buffer.
    ///
    /// The live roster is unaffected until [`Roster::commit_names`].
    pub fn buffer_names(&mut self, channel: &IStr, names: impl IntoIterator<Item = IStr>) {
        self.names_buffer
            .entry(channel.clone())
            .or_default()
            .extend(names);
    }

    /// Commit the snapshot buffer on end-of-names.
    ///
    /// Buffered channels replace their live rosters wholesale; one
    /// `(channel, names)` notification is returned per buffered channel. A
    /// channel that was queried but produced no reply entries yields an
    /// empty-roster notification without touching the live roster.
    pub fn commit_names(&mut self, queried: &IStr) -> Vec<(IStr, Vec<IStr>)> {
        let buffer = std::mem::take(&mut self.names_buffer);
        let mut events: Vec<(IStr, Vec<IStr>)> = Vec::with_capacity(buffer.len() + 1);
        for (channel, names) in buffer {
            self.members.insert(channel.clone(), names.clone());
            events.push((channel, names));
        }
        if !events.iter().any(|(c, _)| c == queried) {
            events.push((queried.clone(), Vec::new()));
        }
        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn istr(s: &str) -> IStr {
        IStr::from(s)
    }

    #[test]
    fn test_join_tracks_self_and_others() {
        let mut roster = Roster::new();
        roster.set_own_nick(istr("me"));

        roster.add_member(&istr("Me"), &[istr("#a")]);
        assert_eq!(roster.channels(), &[istr("#a")]);

        roster.add_member(&istr("alice"), &[istr("#a")]);
        assert_eq!(roster.members(&istr("#a")), &[istr("me"), istr("alice")]);
        // Another user joining does not affect the joined set.
        assert_eq!(roster.channels().len(), 1);
    }

    #[test]
    fn test_remove_reports_only_affected_channels() {
        let mut roster = Roster::new();
        roster.set_own_nick(istr("me"));
        roster.add_member(&istr("me"), &[istr("#a"), istr("#b")]);
        roster.add_member(&istr("alice"), &[istr("#a")]);

        let affected = roster.remove_member(&istr("alice"), &[istr("#a"), istr("#b")]);
        assert_eq!(affected, vec![istr("#a")]);
        assert_eq!(roster.members(&istr("#a")), &[istr("me")]);
    }

    #[test]
    fn test_quit_removes_everywhere() {
        let mut roster = Roster::new();
        roster.set_own_nick(istr("me"));
        roster.add_member(&istr("me"), &[istr("#a"), istr("#b"), istr("#c")]);
        roster.add_member(&istr("bob"), &[istr("#a"), istr("#c")]);

        let affected = roster.remove_member_everywhere(&istr("BOB"));
        assert_eq!(affected, vec![istr("#a"), istr("#c")]);
        assert!(roster.members(&istr("#a")).iter().all(|n| n != "bob"));
    }

    #[test]
    fn test_own_part_unjoins_channel() {
        let mut roster = Roster::new();
        roster.set_own_nick(istr("me"));
        roster.add_member(&istr("me"), &[istr("#a"), istr("#b")]);

        let affected = roster.remove_member(&istr("me"), &[istr("#a")]);
        assert_eq!(affected, vec![istr("#a")]);
        assert_eq!(roster.channels(), &[istr("#b")]);
    }

    #[test]
    fn test_rename_updates_rosters_and_self() {
        let mut roster = Roster::new();
        roster.set_own_nick(istr("me"));
        roster.add_member(&istr("me"), &[istr("#a")]);
        roster.add_member(&istr("alice"), &[istr("#a")]);

        roster.rename_member(&istr("ALICE"), &istr("eve"));
        assert!(roster.members(&istr("#a")).iter().any(|n| n == "eve"));
        assert!(roster.members(&istr("#a")).iter().all(|n| n != "alice"));

        roster.rename_member(&istr("me"), &istr("me2"));
        assert_eq!(roster.own_nick(), Some(&istr("me2")));
        assert!(roster.members(&istr("#a")).iter().any(|n| n == "me2"));
    }

    #[test]
    fn test_names_snapshot_commits_atomically() {
        let mut roster = Roster::new();
        roster.set_own_nick(istr("me"));
        roster.add_member(&istr("me"), &[istr("#a")]);
        roster.add_member(&istr("stale"), &[istr("#a")]);

        roster.buffer_names(&istr("#a"), [istr("alice")]);
        // Pre-commit, the live roster still shows the old membership.
        assert_eq!(roster.members(&istr("#a")), &[istr("me"), istr("stale")]);

        roster.buffer_names(&istr("#a"), [istr("Bob")]);
        let events = roster.commit_names(&istr("#a"));
        assert_eq!(events, vec![(istr("#a"), vec![istr("alice"), istr("Bob")])]);
        assert_eq!(roster.members(&istr("#a")), &[istr("alice"), istr("Bob")]);
    }

    #[test]
    fn test_names_for_unqueried_empty_channel() {
        let mut roster = Roster::new();
        let events = roster.commit_names(&istr("#empty"));
        assert_eq!(events, vec![(istr("#empty"), vec![])]);
        // No roster entry is fabricated for the empty notification.
        assert!(roster.members(&istr("#empty")).is_empty());
    }

    #[test]
    fn test_buffer_cleared_after_commit() {
        let mut roster = Roster::new();
        roster.buffer_names(&istr("#a"), [istr("alice")]);
        let _ = roster.commit_names(&istr("#a"));

        let events = roster.commit_names(&istr("#a"));
        assert_eq!(events, vec![(istr("#a"), vec![])]);
    }
}
