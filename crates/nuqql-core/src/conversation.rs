use time::{Date, OffsetDateTime};

use crate::account::{Directory, Status};
use crate::config::SortStatistic;

/// Sender recorded for the user's own messages.
pub const OWN_SENDER: &str = "you";

/// Sender recorded for synthetic markers (date change, restart).
pub const EVENT_SENDER: &str = "<event>";

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ConversationKind {
    Buddy,
    Group,
    Backend,
    Nuqql,
    Main,
}

impl ConversationKind {
    pub fn type_rank(self) -> u8 {
        match self {
            ConversationKind::Buddy | ConversationKind::Group => 0,
            ConversationKind::Backend => 1,
            ConversationKind::Nuqql | ConversationKind::Main => 2,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConvStats {
    pub last_used: u64,
    pub last_send: u64,
    pub num_send: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogMessage {
    pub timestamp: i64,
    pub sender: String,
    pub text: String,
    pub own: bool,
    pub is_read: bool,
}

impl LogMessage {
    pub fn incoming(timestamp: i64, sender: &str, text: &str) -> Self {
        Self {
            timestamp,
            sender: sender.to_owned(),
            text: text.to_owned(),
            own: false,
            is_read: false,
        }
    }

    pub fn own(timestamp: i64, text: &str) -> Self {
        Self {
            timestamp,
            sender: OWN_SENDER.to_owned(),
            text: text.to_owned(),
            own: true,
            is_read: true,
        }
    }

    /// Client-generated notice shown in a conversation; always read.
    pub fn event(timestamp: i64, text: &str) -> Self {
        Self {
            timestamp,
            sender: EVENT_SENDER.to_owned(),
            text: text.to_owned(),
            own: false,
            is_read: true,
        }
    }

    pub fn date_changed(timestamp: i64, date: Date) -> Self {
        Self::event(
            timestamp,
            &format!(
                "Day changed to {:04}-{:02}-{:02}",
                date.year(),
                u8::from(date.month()),
                date.day()
            ),
        )
    }

    pub fn restarted(timestamp: i64) -> Self {
        let when = OffsetDateTime::from_unix_timestamp(timestamp)
            .unwrap_or(OffsetDateTime::UNIX_EPOCH);
        Self::event(
            timestamp,
            &format!(
                "Conversation restarted at {:04}-{:02}-{:02} {:02}:{:02}:{:02}",
                when.year(),
                u8::from(when.month()),
                when.day(),
                when.hour(),
                when.minute(),
                when.second()
            ),
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conversation {
    pub kind: ConversationKind,
    pub backend: Option<String>,
    pub account_id: Option<String>,
    /// Peer protocol handle for Buddy kinds, chat name for Group kinds,
    /// backend name for control kinds.
    pub name: String,
    pub alias: String,
    pub peer_status: Status,
    /// A Group conversation created by a not-yet-confirmed join.
    pub temporary: bool,
    pub notifications: u32,
    pub stats: ConvStats,
    pub log: Vec<LogMessage>,
    pub history_loaded: bool,
    /// Cleared after a history write failure; further appends are skipped
    /// for this conversation only.
    pub logging: bool,
}

impl Conversation {
    pub fn buddy(backend: &str, account_id: &str, name: &str, alias: &str, status: Status) -> Self {
        Self {
            kind: ConversationKind::Buddy,
            backend: Some(backend.to_owned()),
            account_id: Some(account_id.to_owned()),
            name: name.to_owned(),
            alias: alias.to_owned(),
            peer_status: status,
            temporary: false,
            notifications: 0,
            stats: ConvStats::default(),
            log: Vec::new(),
            history_loaded: false,
            logging: true,
        }
    }

    pub fn group(backend: &str, account_id: &str, chat: &str, alias: &str, temporary: bool) -> Self {
        Self {
            kind: ConversationKind::Group,
            peer_status: Status::Group,
            temporary,
            ..Self::buddy(backend, account_id, chat, alias, Status::Group)
        }
    }

    /// The control conversation for one backend.
    pub fn backend_control(backend: &str) -> Self {
        Self {
            kind: ConversationKind::Backend,
            backend: Some(backend.to_owned()),
            account_id: None,
            name: backend.to_owned(),
            alias: backend.to_owned(),
            peer_status: Status::Online,
            temporary: false,
            notifications: 0,
            stats: ConvStats::default(),
            log: Vec::new(),
            history_loaded: false,
            logging: true,
        }
    }

    pub fn nuqql() -> Self {
        Self {
            kind: ConversationKind::Nuqql,
            backend: None,
            name: "nuqql".to_owned(),
            alias: "nuqql".to_owned(),
            ..Self::backend_control("nuqql")
        }
    }

    pub fn main() -> Self {
        Self {
            kind: ConversationKind::Main,
            backend: None,
            name: "main".to_owned(),
            alias: "main".to_owned(),
            ..Self::backend_control("main")
        }
    }

    pub fn display_name(&self) -> String {
        match self.kind {
            ConversationKind::Buddy | ConversationKind::Group => {
                if self.alias.is_empty() {
                    self.name.clone()
                } else {
                    self.alias.clone()
                }
            }
            ConversationKind::Backend | ConversationKind::Nuqql | ConversationKind::Main => {
                format!("{{{}}}", self.name)
            }
        }
    }

    /// Stable identity for viewport maps and history directories.
    pub fn key(&self) -> String {
        format!(
            "{}/{}/{}",
            self.backend.as_deref().unwrap_or("-"),
            self.account_id.as_deref().unwrap_or("-"),
            self.name
        )
    }

    pub fn notify(&mut self) {
        self.notifications = self.notifications.saturating_add(1);
    }

    pub fn clear_notifications(&mut self) {
        self.notifications = 0;
    }

    pub fn touch(&mut self, now_ms: u64) {
        self.stats.last_used = now_ms;
    }

    pub fn record_send(&mut self, now_ms: u64) {
        self.stats.last_send = now_ms;
        self.stats.last_used = now_ms;
        self.stats.num_send = self.stats.num_send.saturating_add(1);
    }

    pub fn recency(&self, statistic: SortStatistic) -> u64 {
        match statistic {
            SortStatistic::LastSend => self.stats.last_send,
            SortStatistic::LastUsed => self.stats.last_used,
        }
    }
}

/// Total order over conversations: notified first, then most recent (only
/// while the peer is reachable), then kind, then peer status, then name.
pub fn sort_key(conv: &Conversation, statistic: SortStatistic) -> (i64, i64, u8, u8, String) {
    let recency = if conv.peer_status.is_offline() {
        0
    } else {
        conv.recency(statistic) as i64
    };
    (
        -(conv.notifications as i64),
        -recency,
        conv.kind.type_rank(),
        conv.peer_status.rank(),
        conv.display_name().to_lowercase(),
    )
}

pub fn sort(conversations: &mut [Conversation], statistic: SortStatistic) {
    conversations.sort_by(|a, b| sort_key(a, statistic).cmp(&sort_key(b, statistic)));
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum RouteOutcome {
    Existing(usize),
    Created(usize),
    /// No conversation and no roster entry; the caller logs the message
    /// against a generic target instead.
    Unrouted,
}

/// Find the conversation a message from `sender` belongs to, materializing
/// one (inactive) from the account's roster if needed.
pub fn route_message(
    conversations: &mut Vec<Conversation>,
    directory: &Directory,
    backend: &str,
    account_id: &str,
    sender: &str,
) -> RouteOutcome {
    if let Some(idx) = conversations.iter().position(|c| {
        matches!(c.kind, ConversationKind::Buddy | ConversationKind::Group)
            && c.backend.as_deref() == Some(backend)
            && c.account_id.as_deref() == Some(account_id)
            && c.name == sender
    }) {
        return RouteOutcome::Existing(idx);
    }

    let Some(buddy) = directory
        .account_by_id(account_id)
        .and_then(|a| a.buddy(sender))
    else {
        return RouteOutcome::Unrouted;
    };

    let conv = if matches!(buddy.status, Status::Group | Status::GroupInvite) {
        Conversation::group(backend, account_id, sender, &buddy.alias, false)
    } else {
        Conversation::buddy(backend, account_id, sender, &buddy.alias, buddy.status.clone())
    };
    conversations.push(conv);
    RouteOutcome::Created(conversations.len() - 1)
}

/// The conversation used next after one with `last_used == current`: the
/// smallest strictly greater `last_used` among conversations that were used
/// at all. First in iteration order wins ties.
pub fn next_used(conversations: &[Conversation], current: u64) -> Option<usize> {
    let mut best: Option<(usize, u64)> = None;
    for (idx, conv) in conversations.iter().enumerate() {
        let used = conv.stats.last_used;
        if used == 0 || used <= current {
            continue;
        }
        if best.map_or(true, |(_, b)| used < b) {
            best = Some((idx, used));
        }
    }
    best.map(|(idx, _)| idx)
}

pub fn prev_used(conversations: &[Conversation], current: u64) -> Option<usize> {
    let mut best: Option<(usize, u64)> = None;
    for (idx, conv) in conversations.iter().enumerate() {
        let used = conv.stats.last_used;
        if used == 0 || used >= current {
            continue;
        }
        if best.map_or(true, |(_, b)| used > b) {
            best = Some((idx, used));
        }
    }
    best.map(|(idx, _)| idx)
}

/// First conversation (iteration order) with pending notifications.
pub fn first_notified(conversations: &[Conversation]) -> Option<usize> {
    conversations.iter().position(|c| c.notifications > 0)
}

/// Input typed into a Group conversation: a handful of literal slash
/// commands manage the chat, everything else is a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GroupInput {
    Names,
    Part,
    Join,
    Invite(String),
    Message(String),
}

pub fn parse_group_input(text: &str) -> GroupInput {
    let trimmed = text.trim();
    if trimmed == "/names" {
        GroupInput::Names
    } else if trimmed == "/part" {
        GroupInput::Part
    } else if trimmed == "/join" {
        GroupInput::Join
    } else if let Some(user) = trimmed.strip_prefix("/invite ") {
        GroupInput::Invite(user.trim().to_owned())
    } else {
        GroupInput::Message(text.to_owned())
    }
}

/// Input typed into the client's own control conversation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NuqqlInput {
    GlobalStatusGet,
    GlobalStatusSet(String),
    Unknown(String),
}

pub fn parse_nuqql_input(text: &str) -> NuqqlInput {
    let trimmed = text.trim();
    if trimmed == "global-status get" {
        NuqqlInput::GlobalStatusGet
    } else if let Some(status) = trimmed.strip_prefix("global-status set ") {
        NuqqlInput::GlobalStatusSet(status.trim().to_owned())
    } else {
        NuqqlInput::Unknown(trimmed.to_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn online_conv(name: &str, notifications: u32, last_send: u64) -> Conversation {
        let mut conv = Conversation::buddy("be", "1", name, name, Status::Online);
        conv.notifications = notifications;
        conv.stats.last_send = last_send;
        conv
    }

    #[test]
    fn sort_prefers_notified_then_recent() {
        let mut convs = vec![
            online_conv("a", 0, 5),
            online_conv("b", 1, 5),
            online_conv("c", 0, 10),
        ];
        sort(&mut convs, SortStatistic::LastSend);
        let names: Vec<&str> = convs.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["b", "c", "a"]);
    }

    #[test]
    fn offline_peer_recency_does_not_count() {
        let mut offline = online_conv("zoe", 0, 100);
        offline.peer_status = Status::Offline;
        let mut convs = vec![offline, online_conv("amy", 0, 1)];
        sort(&mut convs, SortStatistic::LastSend);
        assert_eq!(convs[0].name, "amy");
    }

    #[test]
    fn control_conversations_sort_below_chats() {
        let mut convs = vec![
            Conversation::nuqql(),
            Conversation::backend_control("slixmppd"),
            online_conv("amy", 0, 0),
        ];
        sort(&mut convs, SortStatistic::LastSend);
        assert_eq!(convs[0].name, "amy");
        assert_eq!(convs[1].kind, ConversationKind::Backend);
        assert_eq!(convs[2].kind, ConversationKind::Nuqql);
    }

    #[test]
    fn status_rank_breaks_ties_between_chats() {
        let mut away = online_conv("amy", 0, 0);
        away.peer_status = Status::Away;
        let online = online_conv("zoe", 0, 0);
        let mut convs = vec![away, online];
        sort(&mut convs, SortStatistic::LastSend);
        assert_eq!(convs[0].name, "zoe");
    }

    #[test]
    fn route_finds_existing_then_roster_then_unrouted() {
        let mut dir = Directory::default();
        dir.on_account_event("1", "xmpp", "alice", 0, false);
        dir.on_buddy_event("1", "bob", "Available", "Bob");

        let mut convs = Vec::new();
        let got = route_message(&mut convs, &dir, "be", "1", "bob");
        assert_eq!(got, RouteOutcome::Created(0));
        assert_eq!(convs[0].kind, ConversationKind::Buddy);
        assert_eq!(convs[0].alias, "Bob");

        let got = route_message(&mut convs, &dir, "be", "1", "bob");
        assert_eq!(got, RouteOutcome::Existing(0));

        let got = route_message(&mut convs, &dir, "be", "1", "stranger");
        assert_eq!(got, RouteOutcome::Unrouted);
        assert_eq!(convs.len(), 1);
    }

    #[test]
    fn group_buddies_materialize_group_conversations() {
        let mut dir = Directory::default();
        dir.on_account_event("1", "xmpp", "alice", 0, false);
        dir.on_buddy_event("1", "room@muc", "GROUP_CHAT", "Room");

        let mut convs = Vec::new();
        route_message(&mut convs, &dir, "be", "1", "room@muc");
        assert_eq!(convs[0].kind, ConversationKind::Group);
    }

    #[test]
    fn next_prev_walk_last_used_order() {
        let mut convs = vec![
            online_conv("a", 0, 0),
            online_conv("b", 0, 0),
            online_conv("c", 0, 0),
            online_conv("never", 0, 0),
        ];
        convs[0].stats.last_used = 10;
        convs[1].stats.last_used = 20;
        convs[2].stats.last_used = 30;

        assert_eq!(next_used(&convs, 10), Some(1));
        assert_eq!(next_used(&convs, 20), Some(2));
        assert_eq!(next_used(&convs, 30), None);
        assert_eq!(prev_used(&convs, 30), Some(1));
        assert_eq!(prev_used(&convs, 10), None);
        // Never-used conversations are skipped entirely.
        assert_eq!(next_used(&convs, 0), Some(0));
    }

    #[test]
    fn first_notified_in_iteration_order() {
        let mut convs = vec![online_conv("a", 0, 0), online_conv("b", 2, 0), online_conv("c", 1, 0)];
        assert_eq!(first_notified(&convs), Some(1));
        convs[1].clear_notifications();
        assert_eq!(first_notified(&convs), Some(2));
    }

    #[test]
    fn group_input_intercepts_chat_commands() {
        assert_eq!(parse_group_input("/names"), GroupInput::Names);
        assert_eq!(parse_group_input("/part"), GroupInput::Part);
        assert_eq!(parse_group_input("/join"), GroupInput::Join);
        assert_eq!(
            parse_group_input("/invite carol"),
            GroupInput::Invite("carol".to_owned())
        );
        assert_eq!(
            parse_group_input("hello /names"),
            GroupInput::Message("hello /names".to_owned())
        );
    }

    #[test]
    fn nuqql_input_parses_global_status() {
        assert_eq!(parse_nuqql_input("global-status get"), NuqqlInput::GlobalStatusGet);
        assert_eq!(
            parse_nuqql_input("global-status set away"),
            NuqqlInput::GlobalStatusSet("away".to_owned())
        );
        assert_eq!(
            parse_nuqql_input("frobnicate"),
            NuqqlInput::Unknown("frobnicate".to_owned())
        );
    }

    #[test]
    fn synthetic_markers_are_read() {
        let date = Date::from_calendar_date(2023, time::Month::November, 14).unwrap();
        let marker = LogMessage::date_changed(0, date);
        assert!(marker.is_read);
        assert_eq!(marker.text, "Day changed to 2023-11-14");

        let restart = LogMessage::restarted(1_700_000_000);
        assert!(restart.is_read);
        assert!(restart.text.starts_with("Conversation restarted at 2023-11-1"));
    }
}
