//! Wire codec for the nuqql backend protocol.
//!
//! Backends speak a CRLF-framed, whitespace-delimited text protocol over a
//! local socket. This crate maps raw inbound lines to typed [`Event`]s and
//! renders outbound [`Command`]s. It holds no state and performs no I/O;
//! lines that match no rule become [`Event::ParseError`] data, never a
//! Rust-level error.

pub mod html;

/// Framing terminator for both directions.
pub const TERMINATOR: &str = "\r\n";

/// Info lines with this prefix are periodic noise and are dropped entirely.
const SUPPRESSED_INFO_PREFIX: &str = "got buddies for account ";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Error {
        text: String,
    },
    Info {
        text: String,
    },
    Account {
        id: String,
        alias: String,
        protocol: String,
        user: String,
        status: String,
    },
    Status {
        account: String,
        status: String,
    },
    Buddy {
        account: String,
        status: String,
        name: String,
        alias: String,
    },
    Message {
        account: String,
        destination: String,
        timestamp: i64,
        sender: String,
        text: String,
    },
    /// Same shape as [`Event::Message`], replayed from the backend's backlog.
    Collect {
        account: String,
        destination: String,
        timestamp: i64,
        sender: String,
        text: String,
    },
    ChatList {
        account: String,
        chat: String,
        alias: String,
        nick: String,
    },
    ChatUser {
        account: String,
        chat: String,
        nick: String,
        alias: String,
        status: String,
    },
    ChatMessage {
        account: String,
        chat: String,
        timestamp: i64,
        sender: String,
        text: String,
    },
    /// A line no rule matched. Carries the full report text for display.
    ParseError {
        text: String,
    },
}

/// Decode one framed line (terminator already stripped or still attached).
/// Returns `None` only for suppressed info lines.
pub fn decode(line: &str) -> Option<Event> {
    let line = line.trim_end_matches(['\r', '\n']);

    let event = if let Some(rest) = line.strip_prefix("error: ") {
        Event::Error {
            text: rest.to_owned(),
        }
    } else if let Some(rest) = line.strip_prefix("info: ") {
        if rest.starts_with(SUPPRESSED_INFO_PREFIX) {
            return None;
        }
        Event::Info {
            text: rest.to_owned(),
        }
    } else if let Some(rest) = line.strip_prefix("account: ") {
        parse_account(rest).unwrap_or_else(|| parse_error(line))
    } else if let Some(rest) = line.strip_prefix("status: ") {
        parse_status(rest).unwrap_or_else(|| parse_error(line))
    } else if let Some(rest) = line.strip_prefix("buddy: ") {
        parse_buddy(rest).unwrap_or_else(|| parse_error(line))
    } else if let Some(rest) = line.strip_prefix("message: ") {
        parse_message(rest, false).unwrap_or_else(|| parse_error(line))
    } else if let Some(rest) = line.strip_prefix("collect: ") {
        parse_message(rest, true).unwrap_or_else(|| parse_error(line))
    } else if let Some(rest) = line.strip_prefix("chat: ") {
        parse_chat(rest).unwrap_or_else(|| parse_error(line))
    } else {
        parse_error(line)
    };

    Some(event)
}

fn parse_error(line: &str) -> Event {
    Event::ParseError {
        text: format!("Error parsing message: {line}"),
    }
}

/// `account: <id> <alias> <protocol> <user> <status>`
fn parse_account(rest: &str) -> Option<Event> {
    let mut fields = rest.split_whitespace();
    let id = fields.next()?.to_owned();
    let alias = fields.next()?.to_owned();
    let protocol = fields.next()?.to_lowercase();
    let user = fields.next()?.to_owned();
    let status = fields.next()?.to_owned();
    if fields.next().is_some() {
        return None;
    }
    Some(Event::Account {
        id,
        alias,
        protocol,
        user,
        status,
    })
}

/// `status: account <id> status: <status>`
fn parse_status(rest: &str) -> Option<Event> {
    let mut fields = rest.split_whitespace();
    if fields.next()? != "account" {
        return None;
    }
    let account = fields.next()?.to_owned();
    if fields.next()? != "status:" {
        return None;
    }
    let status = fields.next()?.to_owned();
    if fields.next().is_some() {
        return None;
    }
    Some(Event::Status { account, status })
}

/// `buddy: <id> status: <status> name: <name> alias: <alias>`
///
/// The alias marker is optional on the wire; a buddy without one is
/// displayed under its protocol handle.
fn parse_buddy(rest: &str) -> Option<Event> {
    let (account, rest) = rest.split_once(" status: ")?;
    let (status, rest) = rest.split_once(" name: ")?;
    let (name, alias) = match rest.split_once(" alias: ") {
        Some((name, alias)) if !alias.is_empty() => (name, alias),
        Some((name, _)) => (name, name),
        None => (rest, rest),
    };
    if account.trim().is_empty() || name.is_empty() {
        return None;
    }
    Some(Event::Buddy {
        account: account.trim().to_owned(),
        status: status.to_owned(),
        name: name.to_owned(),
        alias: alias.to_owned(),
    })
}

/// `message: <acc> <dest> <unix_ts> <sender> <text...>`
fn parse_message(rest: &str, collected: bool) -> Option<Event> {
    let mut fields = rest.splitn(5, ' ');
    let account = fields.next()?.to_owned();
    let destination = fields.next()?.to_owned();
    let timestamp: i64 = fields.next()?.parse().ok()?;
    let sender = fields.next()?.to_owned();
    let text = html::decode_text(fields.next().unwrap_or(""));
    Some(if collected {
        Event::Collect {
            account,
            destination,
            timestamp,
            sender,
            text,
        }
    } else {
        Event::Message {
            account,
            destination,
            timestamp,
            sender,
            text,
        }
    })
}

/// `chat: <list|user|msg>: <acc> <chat> ...`
fn parse_chat(rest: &str) -> Option<Event> {
    if let Some(rest) = rest.strip_prefix("list: ") {
        let mut fields = rest.split_whitespace();
        let account = fields.next()?.to_owned();
        let chat = fields.next()?.to_owned();
        let alias = fields.next()?.to_owned();
        let nick = fields.next()?.to_owned();
        if fields.next().is_some() {
            return None;
        }
        Some(Event::ChatList {
            account,
            chat,
            alias,
            nick,
        })
    } else if let Some(rest) = rest.strip_prefix("user: ") {
        let mut fields = rest.split_whitespace();
        let account = fields.next()?.to_owned();
        let chat = fields.next()?.to_owned();
        let nick = fields.next()?.to_owned();
        let alias = fields.next()?.to_owned();
        let status = fields.next()?.to_owned();
        if fields.next().is_some() {
            return None;
        }
        Some(Event::ChatUser {
            account,
            chat,
            nick,
            alias,
            status,
        })
    } else if let Some(rest) = rest.strip_prefix("msg: ") {
        let mut fields = rest.splitn(5, ' ');
        let account = fields.next()?.to_owned();
        let chat = fields.next()?.to_owned();
        let timestamp: i64 = fields.next()?.parse().ok()?;
        let sender = fields.next()?.to_owned();
        let text = html::decode_text(fields.next().unwrap_or(""));
        Some(Event::ChatMessage {
            account,
            chat,
            timestamp,
            sender,
            text,
        })
    } else {
        None
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// `account <id> send <buddy> <text>`
    SendMessage {
        account: String,
        buddy: String,
        text: String,
    },
    /// `account <id> chat send <chat> <text>`
    SendChatMessage {
        account: String,
        chat: String,
        text: String,
    },
    /// `account <id> collect <since>`: replay messages missed since a
    /// unix timestamp (0 for the full backlog).
    Collect {
        account: String,
        since: i64,
    },
    /// `account <id> buddies`
    Buddies {
        account: String,
    },
    /// `account list`
    ListAccounts,
    /// `account <id> status set <status>`
    SetStatus {
        account: String,
        status: String,
    },
    ChatJoin {
        account: String,
        chat: String,
    },
    ChatPart {
        account: String,
        chat: String,
    },
    ChatUsers {
        account: String,
        chat: String,
    },
    ChatInvite {
        account: String,
        chat: String,
        user: String,
    },
    /// Verbatim passthrough typed into a backend's control conversation.
    Raw {
        line: String,
    },
    /// Courtesy goodbye sent before deliberately closing the socket.
    Bye,
}

pub fn encode(command: &Command) -> String {
    let line = match command {
        Command::SendMessage {
            account,
            buddy,
            text,
        } => format!("account {account} send {buddy} {}", html::encode_text(text)),
        Command::SendChatMessage {
            account,
            chat,
            text,
        } => format!(
            "account {account} chat send {chat} {}",
            html::encode_text(text)
        ),
        Command::Collect { account, since } => format!("account {account} collect {since}"),
        Command::Buddies { account } => format!("account {account} buddies"),
        Command::ListAccounts => "account list".to_owned(),
        Command::SetStatus { account, status } => {
            format!("account {account} status set {status}")
        }
        Command::ChatJoin { account, chat } => format!("account {account} chat join {chat}"),
        Command::ChatPart { account, chat } => format!("account {account} chat part {chat}"),
        Command::ChatUsers { account, chat } => format!("account {account} chat users {chat}"),
        Command::ChatInvite {
            account,
            chat,
            user,
        } => format!("account {account} chat invite {chat} {user}"),
        Command::Raw { line } => line.clone(),
        Command::Bye => "bye".to_owned(),
    };
    format!("{line}{TERMINATOR}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_account_line_and_lowercases_protocol() {
        let got = decode("account: 1 Alice XMPP alice@example.com Available\r\n").unwrap();
        assert_eq!(
            got,
            Event::Account {
                id: "1".to_owned(),
                alias: "Alice".to_owned(),
                protocol: "xmpp".to_owned(),
                user: "alice@example.com".to_owned(),
                status: "Available".to_owned(),
            }
        );
    }

    #[test]
    fn decodes_status_line() {
        let got = decode("status: account 1 status: away").unwrap();
        assert_eq!(
            got,
            Event::Status {
                account: "1".to_owned(),
                status: "away".to_owned(),
            }
        );
    }

    #[test]
    fn decodes_buddy_line() {
        let got =
            decode("buddy: 1 status: Available name: bob@example.com alias: Bob").unwrap();
        assert_eq!(
            got,
            Event::Buddy {
                account: "1".to_owned(),
                status: "Available".to_owned(),
                name: "bob@example.com".to_owned(),
                alias: "Bob".to_owned(),
            }
        );
    }

    #[test]
    fn buddy_without_alias_falls_back_to_name() {
        let got = decode("buddy: 1 status: offline name: carol@example.com").unwrap();
        assert_eq!(
            got,
            Event::Buddy {
                account: "1".to_owned(),
                status: "offline".to_owned(),
                name: "carol@example.com".to_owned(),
                alias: "carol@example.com".to_owned(),
            }
        );
    }

    #[test]
    fn decodes_message_with_br_and_entities() {
        let got =
            decode("message: 1 alice@example.com 1700000000 bob@example.com Hi<br>there").unwrap();
        assert_eq!(
            got,
            Event::Message {
                account: "1".to_owned(),
                destination: "alice@example.com".to_owned(),
                timestamp: 1_700_000_000,
                sender: "bob@example.com".to_owned(),
                text: "Hi\nthere".to_owned(),
            }
        );

        let got = decode("message: 1 a 5 b 1 &lt; 2<BR/>ok").unwrap();
        assert_eq!(
            got,
            Event::Message {
                account: "1".to_owned(),
                destination: "a".to_owned(),
                timestamp: 5,
                sender: "b".to_owned(),
                text: "1 < 2\nok".to_owned(),
            }
        );
    }

    #[test]
    fn collect_decodes_like_message() {
        let got = decode("collect: 1 alice 10 bob old news").unwrap();
        assert_eq!(
            got,
            Event::Collect {
                account: "1".to_owned(),
                destination: "alice".to_owned(),
                timestamp: 10,
                sender: "bob".to_owned(),
                text: "old news".to_owned(),
            }
        );
    }

    #[test]
    fn decodes_chat_subkinds() {
        assert_eq!(
            decode("chat: list: 1 rust-room Rust alice").unwrap(),
            Event::ChatList {
                account: "1".to_owned(),
                chat: "rust-room".to_owned(),
                alias: "Rust".to_owned(),
                nick: "alice".to_owned(),
            }
        );
        assert_eq!(
            decode("chat: user: 1 rust-room bob Bob join").unwrap(),
            Event::ChatUser {
                account: "1".to_owned(),
                chat: "rust-room".to_owned(),
                nick: "bob".to_owned(),
                alias: "Bob".to_owned(),
                status: "join".to_owned(),
            }
        );
        assert_eq!(
            decode("chat: msg: 1 rust-room 42 bob hello<br>room").unwrap(),
            Event::ChatMessage {
                account: "1".to_owned(),
                chat: "rust-room".to_owned(),
                timestamp: 42,
                sender: "bob".to_owned(),
                text: "hello\nroom".to_owned(),
            }
        );
    }

    #[test]
    fn suppresses_buddy_list_noise() {
        assert_eq!(decode("info: got buddies for account 1"), None);
        assert!(matches!(
            decode("info: connected").unwrap(),
            Event::Info { .. }
        ));
    }

    #[test]
    fn unknown_prefix_becomes_parse_error() {
        let got = decode("bogus: what").unwrap();
        assert_eq!(
            got,
            Event::ParseError {
                text: "Error parsing message: bogus: what".to_owned(),
            }
        );
    }

    #[test]
    fn malformed_known_prefix_becomes_parse_error() {
        assert!(matches!(
            decode("account: 1 Alice xmpp").unwrap(),
            Event::ParseError { .. }
        ));
        assert!(matches!(
            decode("message: 1 alice notatimestamp bob hi").unwrap(),
            Event::ParseError { .. }
        ));
        assert!(matches!(
            decode("status: account 1 nope away").unwrap(),
            Event::ParseError { .. }
        ));
    }

    #[test]
    fn encodes_commands() {
        assert_eq!(
            encode(&Command::SendMessage {
                account: "1".to_owned(),
                buddy: "bob@example.com".to_owned(),
                text: "a < b\nok".to_owned(),
            }),
            "account 1 send bob@example.com a &lt; b<br/>ok\r\n"
        );
        assert_eq!(
            encode(&Command::Collect {
                account: "1".to_owned(),
                since: 0,
            }),
            "account 1 collect 0\r\n"
        );
        assert_eq!(encode(&Command::ListAccounts), "account list\r\n");
        assert_eq!(
            encode(&Command::SetStatus {
                account: "1".to_owned(),
                status: "away".to_owned(),
            }),
            "account 1 status set away\r\n"
        );
        assert_eq!(
            encode(&Command::ChatInvite {
                account: "1".to_owned(),
                chat: "rust-room".to_owned(),
                user: "carol".to_owned(),
            }),
            "account 1 chat invite rust-room carol\r\n"
        );
        assert_eq!(
            encode(&Command::Raw {
                line: "help".to_owned(),
            }),
            "help\r\n"
        );
    }

    #[test]
    fn send_and_receive_round_trip_text() {
        let original = "multi\nline & <text>";
        let encoded = encode(&Command::SendMessage {
            account: "1".to_owned(),
            buddy: "bob".to_owned(),
            text: original.to_owned(),
        });
        let wire_text = encoded
            .trim_end_matches(TERMINATOR)
            .strip_prefix("account 1 send bob ")
            .unwrap();

        let got = decode(&format!("message: 1 me 7 bob {wire_text}")).unwrap();
        assert_eq!(
            got,
            Event::Message {
                account: "1".to_owned(),
                destination: "me".to_owned(),
                timestamp: 7,
                sender: "bob".to_owned(),
                text: original.to_owned(),
            }
        );
    }
}
