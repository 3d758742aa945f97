use std::collections::BTreeMap;

/// How long a buddy roster stays fresh before the next refresh request.
pub const BUDDY_REFRESH_INTERVAL_MS: u64 = 5_000;

/// Normalized presence of a buddy. Wire statuses vary per protocol family;
/// everything the sort order and the list display need is one of these.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Status {
    Online,
    Away,
    Offline,
    Group,
    GroupInvite,
    Other(String),
}

impl Status {
    pub fn normalize(raw: &str) -> Self {
        match raw.to_lowercase().as_str() {
            "available" | "online" | "on" => Status::Online,
            "away" | "afk" => Status::Away,
            "offline" | "off" => Status::Offline,
            "group_chat" | "grp" => Status::Group,
            "group_chat_invite" | "grp_invite" => Status::GroupInvite,
            other => Status::Other(other.to_owned()),
        }
    }

    pub fn short(&self) -> &str {
        match self {
            Status::Online => "on",
            Status::Away => "afk",
            Status::Offline => "off",
            Status::Group => "grp",
            Status::GroupInvite => "grp_invite",
            Status::Other(raw) => raw,
        }
    }

    pub fn rank(&self) -> u8 {
        match self {
            Status::Online => 0,
            Status::Away => 1,
            Status::Group => 2,
            Status::GroupInvite => 3,
            Status::Offline => 4,
            Status::Other(_) => 5,
        }
    }

    pub fn is_offline(&self) -> bool {
        matches!(self, Status::Offline)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Protocol {
    Xmpp,
    Matrix,
    Icq,
    Other(String),
}

impl Protocol {
    /// The wire field arrives already lower-cased from the codec.
    pub fn from_wire(raw: &str) -> Self {
        match raw {
            "xmpp" => Protocol::Xmpp,
            "matrix" => Protocol::Matrix,
            "icq" | "oscar" => Protocol::Icq,
            other => Protocol::Other(other.to_owned()),
        }
    }

    /// Per-protocol sender cleanup, applied once before a message is routed:
    /// xmpp senders carry a `/resource` suffix, icq senders a trailing colon.
    pub fn normalize_sender(&self, sender: &str) -> String {
        match self {
            Protocol::Xmpp => sender.split('/').next().unwrap_or(sender).to_owned(),
            Protocol::Icq => sender.trim_end_matches(':').to_owned(),
            _ => sender.to_owned(),
        }
    }

    /// Per-protocol message cleanup: icq wraps whole messages in an HTML
    /// body envelope.
    pub fn normalize_text(&self, text: &str) -> String {
        match self {
            Protocol::Icq => strip_html_envelope(text).to_owned(),
            _ => text.to_owned(),
        }
    }
}

fn strip_html_envelope(text: &str) -> &str {
    let mut t = text.trim();
    for tag in ["<html>", "<body>"] {
        t = strip_ci_prefix(t, tag).trim_start();
    }
    for tag in ["</html>", "</body>"] {
        t = strip_ci_suffix(t, tag).trim_end();
    }
    t
}

fn strip_ci_prefix<'a>(s: &'a str, tag: &str) -> &'a str {
    if s.len() >= tag.len() && s.as_bytes()[..tag.len()].eq_ignore_ascii_case(tag.as_bytes()) {
        &s[tag.len()..]
    } else {
        s
    }
}

fn strip_ci_suffix<'a>(s: &'a str, tag: &str) -> &'a str {
    if s.len() >= tag.len()
        && s.as_bytes()[s.len() - tag.len()..].eq_ignore_ascii_case(tag.as_bytes())
    {
        &s[..s.len() - tag.len()]
    } else {
        s
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Buddy {
    pub name: String,
    pub alias: String,
    pub status: Status,
    /// Mark-and-sweep flag: set on every buddy event, cleared by the sweep
    /// at the end of a refresh cycle. A buddy the backend stopped reporting
    /// is dropped by the next sweep.
    pub updated: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Account {
    pub id: String,
    pub protocol: Protocol,
    pub user: String,
    pub buddies: Vec<Buddy>,
    pub last_buddy_refresh_ms: u64,
}

impl Account {
    pub fn buddy(&self, name: &str) -> Option<&Buddy> {
        self.buddies.iter().find(|b| b.name == name)
    }

    pub fn refresh_due(&self, now_ms: u64) -> bool {
        now_ms.saturating_sub(self.last_buddy_refresh_ms) > BUDDY_REFRESH_INTERVAL_MS
    }

    /// Drop buddies the last cycle did not confirm, then arm the flags for
    /// the next cycle. Called once per refresh period, not per message.
    pub fn sweep(&mut self) {
        self.buddies.retain(|b| b.updated);
        for buddy in &mut self.buddies {
            buddy.updated = false;
        }
    }
}

/// Follow-up I/O the runtime owes after a directory update. The directory
/// itself never touches a socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DirectoryRequest {
    RequestBuddies { account_id: String },
    CollectBacklog { account_id: String },
    PushGlobalStatus { account_id: String },
}

/// Per-backend map of accounts, keyed by username.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Directory {
    pub accounts: BTreeMap<String, Account>,
}

impl Directory {
    /// Handle an `account:` event. A previously unseen username creates the
    /// account and requests its roster plus the full message backlog; a
    /// configured global status is pushed to the new account as well.
    pub fn on_account_event(
        &mut self,
        id: &str,
        protocol: &str,
        user: &str,
        now_ms: u64,
        have_global_status: bool,
    ) -> Vec<DirectoryRequest> {
        if self.accounts.contains_key(user) {
            return Vec::new();
        }

        self.accounts.insert(
            user.to_owned(),
            Account {
                id: id.to_owned(),
                protocol: Protocol::from_wire(protocol),
                user: user.to_owned(),
                buddies: Vec::new(),
                last_buddy_refresh_ms: now_ms,
            },
        );

        let mut requests = vec![
            DirectoryRequest::RequestBuddies {
                account_id: id.to_owned(),
            },
            DirectoryRequest::CollectBacklog {
                account_id: id.to_owned(),
            },
        ];
        if have_global_status {
            requests.push(DirectoryRequest::PushGlobalStatus {
                account_id: id.to_owned(),
            });
        }
        requests
    }

    pub fn account_by_id(&self, id: &str) -> Option<&Account> {
        self.accounts.values().find(|a| a.id == id)
    }

    pub fn account_by_id_mut(&mut self, id: &str) -> Option<&mut Account> {
        self.accounts.values_mut().find(|a| a.id == id)
    }

    /// Find-or-create the buddy under the matching account. Returns whether
    /// status or alias actually changed, so the caller can skip redraws.
    pub fn on_buddy_event(&mut self, account_id: &str, name: &str, raw_status: &str, alias: &str) -> bool {
        let Some(account) = self.account_by_id_mut(account_id) else {
            return false;
        };

        let status = Status::normalize(raw_status);
        if let Some(buddy) = account.buddies.iter_mut().find(|b| b.name == name) {
            buddy.updated = true;
            let changed = buddy.status != status || buddy.alias != alias;
            buddy.status = status;
            buddy.alias = alias.to_owned();
            changed
        } else {
            account.buddies.push(Buddy {
                name: name.to_owned(),
                alias: alias.to_owned(),
                status,
                updated: true,
            });
            true
        }
    }

    /// Accounts whose roster went stale: sweep each, stamp the refresh time,
    /// and return the ids so the caller can request fresh buddy lists.
    pub fn due_for_refresh(&mut self, now_ms: u64) -> Vec<String> {
        let mut due = Vec::new();
        for account in self.accounts.values_mut() {
            if account.refresh_due(now_ms) {
                account.sweep();
                account.last_buddy_refresh_ms = now_ms;
                due.push(account.id.clone());
            }
        }
        due
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_normalization_and_ranks() {
        assert_eq!(Status::normalize("Available"), Status::Online);
        assert_eq!(Status::normalize("AWAY"), Status::Away);
        assert_eq!(Status::normalize("offline"), Status::Offline);
        assert_eq!(Status::normalize("GROUP_CHAT"), Status::Group);
        assert_eq!(Status::normalize("group_chat_invite"), Status::GroupInvite);
        assert_eq!(Status::normalize("dnd"), Status::Other("dnd".to_owned()));

        assert_eq!(Status::Online.rank(), 0);
        assert_eq!(Status::Away.rank(), 1);
        assert_eq!(Status::Group.rank(), 2);
        assert_eq!(Status::GroupInvite.rank(), 3);
        assert_eq!(Status::Offline.rank(), 4);
        assert_eq!(Status::Other("dnd".to_owned()).rank(), 5);
    }

    #[test]
    fn protocol_sender_and_text_quirks() {
        assert_eq!(
            Protocol::Xmpp.normalize_sender("bob@example.com/phone"),
            "bob@example.com"
        );
        assert_eq!(Protocol::Icq.normalize_sender("12345:"), "12345");
        assert_eq!(Protocol::Matrix.normalize_sender("@bob:example.org"), "@bob:example.org");

        assert_eq!(
            Protocol::Icq.normalize_text("<HTML><BODY>hi there</BODY></HTML>"),
            "hi there"
        );
        assert_eq!(Protocol::Xmpp.normalize_text("<b>hi</b>"), "<b>hi</b>");
    }

    #[test]
    fn unknown_account_event_creates_account_and_requests() {
        let mut dir = Directory::default();
        let reqs = dir.on_account_event("1", "xmpp", "alice@example.com", 100, false);
        assert_eq!(
            reqs,
            vec![
                DirectoryRequest::RequestBuddies {
                    account_id: "1".to_owned()
                },
                DirectoryRequest::CollectBacklog {
                    account_id: "1".to_owned()
                },
            ]
        );

        let account = dir.account_by_id("1").unwrap();
        assert_eq!(account.user, "alice@example.com");
        assert_eq!(account.protocol, Protocol::Xmpp);
        assert_eq!(account.last_buddy_refresh_ms, 100);

        // Known username: no new account, no requests.
        assert!(dir
            .on_account_event("1", "xmpp", "alice@example.com", 200, true)
            .is_empty());
        assert_eq!(dir.accounts.len(), 1);
    }

    #[test]
    fn global_status_is_pushed_to_new_accounts() {
        let mut dir = Directory::default();
        let reqs = dir.on_account_event("7", "matrix", "alice", 0, true);
        assert!(reqs.contains(&DirectoryRequest::PushGlobalStatus {
            account_id: "7".to_owned()
        }));
    }

    #[test]
    fn buddy_event_reports_changes() {
        let mut dir = Directory::default();
        dir.on_account_event("1", "xmpp", "alice", 0, false);

        assert!(dir.on_buddy_event("1", "bob", "Available", "Bob"));
        // Same data again: updated flag set, nothing changed.
        assert!(!dir.on_buddy_event("1", "bob", "Available", "Bob"));
        assert!(dir.on_buddy_event("1", "bob", "away", "Bob"));
        assert!(dir.on_buddy_event("1", "bob", "away", "Bobby"));

        // Unknown account id is ignored.
        assert!(!dir.on_buddy_event("9", "bob", "away", "Bob"));

        let account = dir.account_by_id("1").unwrap();
        assert_eq!(account.buddies.len(), 1);
        assert_eq!(account.buddies[0].alias, "Bobby");
        assert_eq!(account.buddies[0].status, Status::Away);
    }

    #[test]
    fn sweep_removes_buddy_missing_for_one_full_cycle() {
        let mut dir = Directory::default();
        dir.on_account_event("1", "xmpp", "alice", 0, false);

        // Cycle 1: both buddies report in.
        dir.on_buddy_event("1", "bob", "Available", "Bob");
        dir.on_buddy_event("1", "carol", "Available", "Carol");

        let due = dir.due_for_refresh(BUDDY_REFRESH_INTERVAL_MS + 1);
        assert_eq!(due, vec!["1".to_owned()]);
        // Sweep ran at the cycle boundary; both survived cycle 1.
        let account = dir.account_by_id("1").unwrap();
        assert_eq!(account.buddies.len(), 2);
        assert!(account.buddies.iter().all(|b| !b.updated));

        // Cycle 2: only bob reports in.
        dir.on_buddy_event("1", "bob", "Available", "Bob");

        let due = dir.due_for_refresh(2 * (BUDDY_REFRESH_INTERVAL_MS + 1));
        assert_eq!(due, vec!["1".to_owned()]);
        let account = dir.account_by_id("1").unwrap();
        assert_eq!(account.buddies.len(), 1);
        assert_eq!(account.buddies[0].name, "bob");
    }

    #[test]
    fn refresh_not_due_within_interval() {
        let mut dir = Directory::default();
        dir.on_account_event("1", "xmpp", "alice", 1_000, false);
        assert!(dir.due_for_refresh(2_000).is_empty());
        assert_eq!(
            dir.due_for_refresh(1_000 + BUDDY_REFRESH_INTERVAL_MS + 1),
            vec!["1".to_owned()]
        );
    }
}
