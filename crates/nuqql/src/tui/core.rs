//! Application state and the reducer driving it. All conversation,
//! account, and viewport state lives in [`Model`]; the runtime loop feeds
//! it [`Msg`]s and executes the [`Effect`]s it returns. Nothing in here
//! performs I/O, which is what makes the whole UI testable.

use std::collections::HashMap;

use nuqql_core::account::{Directory, DirectoryRequest};
use nuqql_core::config::ConfigFile;
use nuqql_core::conversation::{
    self as conv, Conversation, ConversationKind, GroupInput, LogMessage, NuqqlInput, RouteOutcome,
};
use nuqql_core::history::Record;
use nuqql_protocol::{Command, Event};

use super::editor::Editor;
use super::filter;
use super::scrollback::Scrollback;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Focus {
    List,
    Log,
    Input,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Normal,
    Input,
    Filter,
    Search,
}

/// The pure, per-backend state the reducer owns; the subprocess and socket
/// live in the runtime's registry.
#[derive(Debug, Clone)]
pub struct BackendModel {
    pub name: String,
    pub running: bool,
    pub directory: Directory,
}

#[derive(Debug, Clone)]
pub struct Model {
    pub width: u16,
    pub height: u16,
    pub now_ms: u64,

    pub focus: Focus,
    pub mode: Mode,
    pub zoomed: bool,

    pub config: ConfigFile,
    pub global_status: Option<String>,

    pub backends: Vec<BackendModel>,
    pub conversations: Vec<Conversation>,
    /// Key of the conversation whose log pane is open.
    pub active: Option<String>,
    pub list_cursor: usize,

    pub filter: String,
    pub search: String,
    pub search_backward: bool,

    pub views: HashMap<String, Scrollback>,
    pub editor: Editor,
    pub status_line: Option<String>,
}

impl Model {
    pub fn new(config: ConfigFile, backends: &[String], global_status: Option<String>) -> Self {
        let mut conversations = vec![Conversation::nuqql(), Conversation::main()];
        let backend_models = backends
            .iter()
            .map(|name| {
                conversations.push(Conversation::backend_control(name));
                BackendModel {
                    name: name.clone(),
                    running: false,
                    directory: Directory::default(),
                }
            })
            .collect();

        let mut model = Self {
            width: 0,
            height: 0,
            now_ms: 0,
            focus: Focus::List,
            mode: Mode::Normal,
            zoomed: false,
            config,
            global_status,
            backends: backend_models,
            conversations,
            active: None,
            list_cursor: 0,
            filter: String::new(),
            search: String::new(),
            search_backward: false,
            views: HashMap::new(),
            editor: Editor::new(),
            status_line: None,
        };
        resort(&mut model);
        model
    }

    pub fn backend_mut(&mut self, name: &str) -> Option<&mut BackendModel> {
        self.backends.iter_mut().find(|b| b.name == name)
    }

    pub fn active_index(&self) -> Option<usize> {
        let key = self.active.as_deref()?;
        self.conversations.iter().position(|c| c.key() == key)
    }

    fn now_secs(&self) -> i64 {
        (self.now_ms / 1_000) as i64
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Quit,
    Tab,
    MoveUp,
    MoveDown,
    PageUp,
    PageDown,
    GoTop,
    GoBottom,
    Enter,
    ShiftEnter,
    Backspace,
    Cancel,
    Zoom,
    NextConversation,
    PrevConversation,
    Char(char),
}

#[derive(Debug, Clone)]
pub enum Msg {
    Resize {
        width: u16,
        height: u16,
    },
    Tick {
        now_ms: u64,
    },
    Action(Action),
    Paste(String),
    /// One decoded line from a backend socket.
    Wire {
        backend: String,
        event: Event,
    },
    BackendStarted {
        backend: String,
    },
    /// Connect-retry exhaustion or a post-connect I/O failure; stops this
    /// backend only.
    BackendFailed {
        backend: String,
        reason: String,
    },
    HistoryLoaded {
        key: String,
        result: Result<Vec<LogMessage>, String>,
    },
    HistoryAppendFailed {
        key: String,
        reason: String,
    },
}

/// Identity of a persisted (Buddy/Group) conversation, enough for the
/// runtime to locate its history directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConvRef {
    pub key: String,
    pub backend: String,
    pub account_id: String,
    pub name: String,
}

impl ConvRef {
    fn of(conversation: &Conversation) -> Option<Self> {
        if !matches!(
            conversation.kind,
            ConversationKind::Buddy | ConversationKind::Group
        ) {
            return None;
        }
        Some(Self {
            key: conversation.key(),
            backend: conversation.backend.clone()?,
            account_id: conversation.account_id.clone()?,
            name: conversation.name.clone(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    Send { backend: String, command: Command },
    LoadHistory { conv: ConvRef },
    AppendHistory { conv: ConvRef, record: Record },
    SaveGlobalStatus { status: String },
    Quit,
}

pub fn reduce(mut model: Model, msg: Msg) -> (Model, Vec<Effect>) {
    let mut effects = Vec::new();

    match msg {
        Msg::Resize { width, height } => {
            model.width = width;
            model.height = height;
        }
        Msg::Tick { now_ms } => {
            model.now_ms = now_ms;
            for backend in &mut model.backends {
                if !backend.running {
                    continue;
                }
                for account_id in backend.directory.due_for_refresh(now_ms) {
                    effects.push(Effect::Send {
                        backend: backend.name.clone(),
                        command: Command::Buddies {
                            account: account_id,
                        },
                    });
                }
            }
        }
        Msg::Action(action) => handle_action(&mut model, &mut effects, action),
        Msg::Paste(text) => {
            if matches!(model.mode, Mode::Input) {
                model.editor.paste(&text);
            }
        }
        Msg::Wire { backend, event } => handle_wire(&mut model, &mut effects, &backend, event),
        Msg::BackendStarted { backend } => {
            if let Some(b) = model.backend_mut(&backend) {
                b.running = true;
            }
            log_to_control(&mut model, Some(&backend), "connected");
            effects.push(Effect::Send {
                backend,
                command: Command::ListAccounts,
            });
        }
        Msg::BackendFailed { backend, reason } => {
            handle_backend_failed(&mut model, &backend, &reason);
        }
        Msg::HistoryLoaded { key, result } => match result {
            Ok(mut messages) => {
                if let Some(conversation) =
                    model.conversations.iter_mut().find(|c| c.key() == key)
                {
                    // Replayed history is older than anything received live.
                    messages.extend(conversation.log.drain(..));
                    conversation.log = messages;
                }
            }
            Err(reason) => {
                if let Some(conversation) =
                    model.conversations.iter_mut().find(|c| c.key() == key)
                {
                    let now = (model.now_ms / 1_000) as i64;
                    conversation
                        .log
                        .push(LogMessage::event(now, &format!("history load failed: {reason}")));
                }
            }
        },
        Msg::HistoryAppendFailed { key, reason } => {
            if let Some(conversation) = model.conversations.iter_mut().find(|c| c.key() == key) {
                conversation.logging = false;
                let now = (model.now_ms / 1_000) as i64;
                conversation.log.push(LogMessage::event(
                    now,
                    &format!("history write failed, logging disabled: {reason}"),
                ));
            }
        }
    }

    (model, effects)
}

/// Conversations shown in the list pane. Offline buddies are hidden unless
/// configured otherwise, notified, or currently open.
pub fn visible_conversations(model: &Model) -> Vec<usize> {
    model
        .conversations
        .iter()
        .enumerate()
        .filter(|(_, c)| {
            if model.config.show_offline || !matches!(c.kind, ConversationKind::Buddy) {
                return true;
            }
            !c.peer_status.is_offline()
                || c.notifications > 0
                || model.active.as_deref() == Some(c.key().as_str())
        })
        .map(|(idx, _)| idx)
        .collect()
}

/// Inner log-pane geometry `(columns, rows)` derived from terminal size,
/// the configured list ratio, and zoom state.
pub fn log_viewport(model: &Model) -> (usize, usize) {
    let width = model.width as usize;
    let height = model.height as usize;
    let list_width = if model.zoomed {
        0
    } else {
        width * model.config.list_ratio as usize / 100
    };
    let log_width = width.saturating_sub(list_width).saturating_sub(2);
    // Header and footer rows, input pane, log borders.
    let log_height = height
        .saturating_sub(2)
        .saturating_sub(3)
        .saturating_sub(2);
    (log_width.max(1), log_height.max(1))
}

fn resort(model: &mut Model) {
    conv::sort(&mut model.conversations, model.config.sort_statistic);
}

fn handle_wire(model: &mut Model, effects: &mut Vec<Effect>, backend_name: &str, event: Event) {
    match event {
        Event::Error { text } => {
            log_to_control(model, Some(backend_name), &format!("error: {text}"));
        }
        Event::Info { text } => {
            log_to_control(model, Some(backend_name), &text);
        }
        Event::ParseError { text } => {
            // Visible in the control conversation, never fatal.
            log_to_control(model, Some(backend_name), &text);
        }
        Event::Account {
            id,
            alias: _,
            protocol,
            user,
            status: _,
        } => {
            let now_ms = model.now_ms;
            let have_status = model.global_status.is_some();
            let global_status = model.global_status.clone().unwrap_or_default();
            let Some(backend) = model.backend_mut(backend_name) else {
                return;
            };
            let requests =
                backend
                    .directory
                    .on_account_event(&id, &protocol, &user, now_ms, have_status);
            if !requests.is_empty() {
                log_to_control(
                    model,
                    Some(backend_name),
                    &format!("new account {id}: {user} ({protocol})"),
                );
            }
            for request in requests {
                let command = match request {
                    DirectoryRequest::RequestBuddies { account_id } => Command::Buddies {
                        account: account_id,
                    },
                    DirectoryRequest::CollectBacklog { account_id } => Command::Collect {
                        account: account_id,
                        since: 0,
                    },
                    DirectoryRequest::PushGlobalStatus { account_id } => Command::SetStatus {
                        account: account_id,
                        status: global_status.clone(),
                    },
                };
                effects.push(Effect::Send {
                    backend: backend_name.to_owned(),
                    command,
                });
            }
        }
        Event::Status { account, status } => {
            log_to_control(
                model,
                Some(backend_name),
                &format!("account {account} status: {status}"),
            );
        }
        Event::Buddy {
            account,
            status,
            name,
            alias,
        } => {
            let Some(backend) = model.backend_mut(backend_name) else {
                return;
            };
            let changed = backend
                .directory
                .on_buddy_event(&account, &name, &status, &alias);
            if changed {
                let peer_status = backend
                    .directory
                    .account_by_id(&account)
                    .and_then(|a| a.buddy(&name))
                    .map(|b| b.status.clone());
                if let Some(peer_status) = peer_status {
                    for conversation in model.conversations.iter_mut().filter(|c| {
                        c.backend.as_deref() == Some(backend_name)
                            && c.account_id.as_deref() == Some(account.as_str())
                            && c.name == name
                    }) {
                        conversation.peer_status = peer_status.clone();
                        conversation.alias = alias.clone();
                    }
                }
                resort(model);
            }
        }
        Event::Message {
            account,
            destination: _,
            timestamp,
            sender,
            text,
        } => {
            handle_message(model, effects, backend_name, &account, timestamp, &sender, &text, false);
        }
        Event::Collect {
            account,
            destination: _,
            timestamp,
            sender,
            text,
        } => {
            handle_message(model, effects, backend_name, &account, timestamp, &sender, &text, true);
        }
        Event::ChatList {
            account,
            chat,
            alias,
            nick,
        } => {
            log_to_control(
                model,
                Some(backend_name),
                &format!("chat on account {account}: {chat} ({alias}) as {nick}"),
            );
        }
        Event::ChatUser {
            account,
            chat,
            nick,
            alias,
            status,
        } => {
            let now = model.now_secs();
            let idx = find_or_create_group(model, effects, backend_name, &account, &chat);
            let conversation = &mut model.conversations[idx];
            // Any user event for the chat confirms a pending join.
            conversation.temporary = false;
            conversation
                .log
                .push(LogMessage::event(now, &format!("{nick} ({alias}) {status}")));
        }
        Event::ChatMessage {
            account,
            chat,
            timestamp,
            sender,
            text,
        } => {
            handle_chat_message(model, effects, backend_name, &account, &chat, timestamp, &sender, &text);
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn handle_message(
    model: &mut Model,
    effects: &mut Vec<Effect>,
    backend_name: &str,
    account_id: &str,
    timestamp: i64,
    sender: &str,
    text: &str,
    collected: bool,
) {
    let Some(backend_idx) = model.backends.iter().position(|b| b.name == backend_name) else {
        return;
    };
    let Some(account) = model.backends[backend_idx].directory.account_by_id(account_id) else {
        log_to_control(
            model,
            Some(backend_name),
            &format!("message for unknown account {account_id} from {sender}: {text}"),
        );
        return;
    };

    // Per-protocol cleanup happens once, before routing.
    let protocol = account.protocol.clone();
    let own_user = account.user.clone();
    let sender = protocol.normalize_sender(sender);
    let text = protocol.normalize_text(text);
    let own = sender == own_user;

    let outcome = conv::route_message(
        &mut model.conversations,
        &model.backends[backend_idx].directory,
        backend_name,
        account_id,
        &sender,
    );

    let idx = match outcome {
        RouteOutcome::Existing(idx) => idx,
        RouteOutcome::Created(idx) => {
            request_history(model, effects, idx);
            idx
        }
        RouteOutcome::Unrouted => {
            // No conversation and no roster entry: the control conversation
            // is the generic target.
            log_to_control(
                model,
                Some(backend_name),
                &format!("{sender}: {text}"),
            );
            return;
        }
    };

    let message = if own {
        LogMessage::own(timestamp, &text)
    } else {
        LogMessage::incoming(timestamp, &sender, &text)
    };

    let conversation = &mut model.conversations[idx];
    let active = model.active.as_deref() == Some(conversation.key().as_str());
    if !own && !active {
        conversation.notify();
    }
    let record = Record::from_message(&message);
    conversation.log.push(message);

    // Collect replays are the backend's copy of history; persisting them
    // every startup would duplicate the log.
    if !collected && conversation.logging {
        if let Some(conv_ref) = ConvRef::of(conversation) {
            effects.push(Effect::AppendHistory {
                conv: conv_ref,
                record,
            });
        }
    }
    resort(model);
}

#[allow(clippy::too_many_arguments)]
fn handle_chat_message(
    model: &mut Model,
    effects: &mut Vec<Effect>,
    backend_name: &str,
    account_id: &str,
    chat: &str,
    timestamp: i64,
    sender: &str,
    text: &str,
) {
    let own_user = model
        .backends
        .iter()
        .find(|b| b.name == backend_name)
        .and_then(|b| b.directory.account_by_id(account_id))
        .map(|a| a.user.clone());

    let idx = find_or_create_group(model, effects, backend_name, account_id, chat);
    let conversation = &mut model.conversations[idx];
    conversation.temporary = false;

    let own = sender == "<self>" || Some(sender) == own_user.as_deref();
    if own {
        // The backend echoes our own chat messages back; the local append
        // at send time already covered this one.
        if conversation
            .log
            .last()
            .is_some_and(|m| m.own && m.text == text)
        {
            return;
        }
    }

    let message = if own {
        LogMessage::own(timestamp, text)
    } else {
        LogMessage::incoming(timestamp, sender, text)
    };
    let active = model.active.as_deref() == Some(conversation.key().as_str());
    if !own && !active {
        conversation.notify();
    }
    let record = Record::from_message(&message);
    conversation.log.push(message);
    if conversation.logging {
        if let Some(conv_ref) = ConvRef::of(conversation) {
            effects.push(Effect::AppendHistory {
                conv: conv_ref,
                record,
            });
        }
    }
    resort(model);
}

fn find_or_create_group(
    model: &mut Model,
    effects: &mut Vec<Effect>,
    backend_name: &str,
    account_id: &str,
    chat: &str,
) -> usize {
    if let Some(idx) = model.conversations.iter().position(|c| {
        matches!(c.kind, ConversationKind::Group)
            && c.backend.as_deref() == Some(backend_name)
            && c.account_id.as_deref() == Some(account_id)
            && c.name == chat
    }) {
        return idx;
    }
    model
        .conversations
        .push(Conversation::group(backend_name, account_id, chat, chat, false));
    let idx = model.conversations.len() - 1;
    request_history(model, effects, idx);
    idx
}

fn request_history(model: &mut Model, effects: &mut Vec<Effect>, idx: usize) {
    let conversation = &mut model.conversations[idx];
    if conversation.history_loaded {
        return;
    }
    conversation.history_loaded = true;
    if let Some(conv_ref) = ConvRef::of(conversation) {
        effects.push(Effect::LoadHistory { conv: conv_ref });
    }
}

/// Append a line to the named backend's control conversation, or to the
/// main conversation when no backend context exists.
fn log_to_control(model: &mut Model, backend_name: Option<&str>, text: &str) {
    let now = model.now_secs();
    let idx = model
        .conversations
        .iter()
        .position(|c| match backend_name {
            Some(name) => {
                matches!(c.kind, ConversationKind::Backend) && c.name == name
            }
            None => matches!(c.kind, ConversationKind::Main),
        })
        .or_else(|| {
            model
                .conversations
                .iter()
                .position(|c| matches!(c.kind, ConversationKind::Main))
        });
    let Some(idx) = idx else {
        return;
    };

    let sender = backend_name.unwrap_or("nuqql").to_owned();
    let conversation = &mut model.conversations[idx];
    let active = model.active.as_deref() == Some(conversation.key().as_str());
    conversation.log.push(LogMessage::incoming(now, &sender, text));
    if !active {
        conversation.notify();
    }
}

/// Session death: the backend stays listed (stopped) with its control
/// conversation, but its accounts, buddies, and chat conversations go away.
fn handle_backend_failed(model: &mut Model, backend_name: &str, reason: &str) {
    if let Some(backend) = model.backend_mut(backend_name) {
        backend.running = false;
        backend.directory = Directory::default();
    }

    model.conversations.retain(|c| {
        c.backend.as_deref() != Some(backend_name)
            || matches!(
                c.kind,
                ConversationKind::Backend | ConversationKind::Nuqql | ConversationKind::Main
            )
    });
    let live_keys: Vec<String> = model.conversations.iter().map(|c| c.key()).collect();
    model.views.retain(|key, _| live_keys.iter().any(|k| k == key));
    if let Some(active) = model.active.clone() {
        if !live_keys.iter().any(|k| *k == active) {
            model.active = None;
            model.focus = Focus::List;
            model.mode = Mode::Normal;
        }
    }

    log_to_control(model, Some(backend_name), &format!("backend stopped: {reason}"));
    resort(model);
}

fn handle_action(model: &mut Model, effects: &mut Vec<Effect>, action: Action) {
    match model.mode {
        Mode::Input => handle_input_mode(model, effects, action),
        Mode::Filter => handle_filter_mode(model, action),
        Mode::Search => handle_search_mode(model, action),
        Mode::Normal => handle_normal_mode(model, effects, action),
    }
}

fn handle_normal_mode(model: &mut Model, effects: &mut Vec<Effect>, action: Action) {
    match action {
        Action::Quit => effects.push(Effect::Quit),
        Action::Tab => {
            if model.active.is_some() {
                model.focus = match model.focus {
                    Focus::List => Focus::Log,
                    Focus::Log | Focus::Input => Focus::List,
                };
            }
        }
        Action::Zoom => toggle_zoom(model),
        Action::NextConversation => {
            let current = model
                .active_index()
                .map(|idx| model.conversations[idx].stats.last_used)
                .unwrap_or(0);
            if let Some(idx) = conv::next_used(&model.conversations, current) {
                open_conversation(model, effects, idx);
            }
        }
        Action::PrevConversation => {
            let current = model
                .active_index()
                .map(|idx| model.conversations[idx].stats.last_used)
                .unwrap_or(0);
            if let Some(idx) = conv::prev_used(&model.conversations, current) {
                open_conversation(model, effects, idx);
            }
        }
        Action::MoveUp => move_cursor(model, -1),
        Action::MoveDown => move_cursor(model, 1),
        Action::PageUp => page(model, true),
        Action::PageDown => page(model, false),
        Action::GoTop => go_edge(model, true),
        Action::GoBottom => go_edge(model, false),
        Action::Enter => match model.focus {
            Focus::List => {
                let visible = visible_conversations(model);
                if let Some(&idx) = visible.get(model.list_cursor) {
                    open_conversation(model, effects, idx);
                }
            }
            Focus::Log | Focus::Input => {
                if model.active.is_some() {
                    model.mode = Mode::Input;
                    model.focus = Focus::Input;
                    model.editor.history_cursor = None;
                }
            }
        },
        Action::Cancel => {
            if model.zoomed {
                toggle_zoom(model);
            } else if model.active.is_some() {
                model.active = None;
                model.focus = Focus::List;
            }
        }
        Action::Char(ch) => handle_normal_char(model, effects, ch),
        Action::ShiftEnter | Action::Backspace => {}
    }
}

fn handle_normal_char(model: &mut Model, effects: &mut Vec<Effect>, ch: char) {
    match (model.focus, ch) {
        (_, 'q') => effects.push(Effect::Quit),
        (Focus::List, 'j') => move_cursor(model, 1),
        (Focus::List, 'k') => move_cursor(model, -1),
        (Focus::List, 'g') => go_edge(model, true),
        (Focus::List, 'G') => go_edge(model, false),
        (Focus::List, '/') => {
            model.mode = Mode::Filter;
            model.filter.clear();
        }
        (Focus::List, 'n') => {
            if let Some(idx) = conv::first_notified(&model.conversations) {
                open_conversation(model, effects, idx);
            }
        }
        (Focus::Log, 'j') => move_cursor(model, 1),
        (Focus::Log, 'k') => move_cursor(model, -1),
        (Focus::Log, 'g') => go_edge(model, true),
        (Focus::Log, 'G') => go_edge(model, false),
        (Focus::Log, 'z') => toggle_zoom(model),
        (Focus::Log, 'i') => {
            model.mode = Mode::Input;
            model.focus = Focus::Input;
        }
        (Focus::Log, '/') => {
            model.mode = Mode::Search;
            model.search_backward = false;
            model.search.clear();
        }
        (Focus::Log, '?') => {
            model.mode = Mode::Search;
            model.search_backward = true;
            model.search.clear();
        }
        (Focus::Log, 'n') => run_search(model, false),
        (Focus::Log, 'N') => run_search(model, true),
        _ => {}
    }
}

fn handle_input_mode(model: &mut Model, effects: &mut Vec<Effect>, action: Action) {
    match action {
        Action::Quit => effects.push(Effect::Quit),
        Action::Enter => {
            if let Some(text) = model.editor.take_submit() {
                send_input(model, effects, &text);
            }
        }
        Action::ShiftEnter => model.editor.insert_newline(),
        Action::Backspace => model.editor.backspace(),
        Action::Char(ch) => model.editor.insert_char(ch),
        Action::MoveUp => model.editor.history_prev(),
        Action::MoveDown => model.editor.history_next(),
        Action::Cancel | Action::Tab => {
            model.mode = Mode::Normal;
            model.focus = Focus::Log;
        }
        _ => {}
    }
}

fn handle_filter_mode(model: &mut Model, action: Action) {
    match action {
        Action::Char(ch) => {
            model.filter.push(ch);
            jump_to_nearest_match(model);
        }
        Action::Backspace => {
            model.filter.pop();
            jump_to_nearest_match(model);
        }
        Action::Enter | Action::Cancel => {
            if matches!(action, Action::Cancel) {
                model.filter.clear();
            }
            model.mode = Mode::Normal;
        }
        _ => {}
    }
}

fn handle_search_mode(model: &mut Model, action: Action) {
    match action {
        Action::Char(ch) => model.search.push(ch),
        Action::Backspace => {
            model.search.pop();
        }
        Action::Enter => {
            model.mode = Mode::Normal;
            model.focus = Focus::Log;
            let backward = model.search_backward;
            run_search(model, backward);
        }
        Action::Cancel => {
            model.search.clear();
            model.mode = Mode::Normal;
        }
        _ => {}
    }
}

/// Move the selected match of the current filter closest to the cursor:
/// smaller index distance wins, the row above on ties.
fn jump_to_nearest_match(model: &mut Model) {
    let visible = visible_conversations(model);
    let matches: Vec<usize> = visible
        .iter()
        .enumerate()
        .filter(|(_, &idx)| {
            filter::matches(&model.filter, &model.conversations[idx].display_name())
        })
        .map(|(row, _)| row)
        .collect();
    if let Some(row) = filter::nearest(&matches, model.list_cursor) {
        model.list_cursor = row;
    }
}

fn run_search(model: &mut Model, backward: bool) {
    if model.search.is_empty() {
        return;
    }
    let Some(idx) = model.active_index() else {
        return;
    };
    let (_, height) = log_viewport(model);
    let key = model.conversations[idx].key();
    let needle = model.search.clone();
    let log = &model.conversations[idx].log;
    let view = model.views.entry(key).or_default();
    view.search(log, height, &needle, backward);
}

fn toggle_zoom(model: &mut Model) {
    if model.active.is_none() {
        return;
    }
    model.zoomed = !model.zoomed;
    model.focus = Focus::Log;
    // Pane geometry changed for every pane; the log snaps back to the tail.
    if let Some(key) = model.active.clone() {
        model.views.entry(key).or_default().jump_bottom();
    }
}

fn move_cursor(model: &mut Model, delta: i32) {
    match model.focus {
        Focus::List => {
            let visible = visible_conversations(model);
            if visible.is_empty() {
                model.list_cursor = 0;
                return;
            }
            let last = visible.len() - 1;
            model.list_cursor = if delta < 0 {
                model.list_cursor.saturating_sub(1)
            } else {
                (model.list_cursor + 1).min(last)
            };
        }
        Focus::Log | Focus::Input => {
            with_active_view(model, |view, log, height| {
                if delta < 0 {
                    view.cursor_up(log, height);
                } else {
                    view.cursor_down(log, height);
                }
            });
        }
    }
}

fn page(model: &mut Model, up: bool) {
    if matches!(model.focus, Focus::List) {
        let visible = visible_conversations(model);
        let last = visible.len().saturating_sub(1);
        model.list_cursor = if up {
            model.list_cursor.saturating_sub(10)
        } else {
            (model.list_cursor + 10).min(last)
        };
        return;
    }
    with_active_view(model, |view, log, height| {
        if up {
            view.page_up(log, height);
        } else {
            view.page_down(log, height);
        }
    });
}

fn go_edge(model: &mut Model, top: bool) {
    if matches!(model.focus, Focus::List) {
        let visible = visible_conversations(model);
        model.list_cursor = if top {
            0
        } else {
            visible.len().saturating_sub(1)
        };
        return;
    }
    with_active_view(model, |view, _log, _height| {
        if top {
            view.jump_top();
        } else {
            view.jump_bottom();
        }
    });
}

fn with_active_view(model: &mut Model, f: impl FnOnce(&mut Scrollback, &[LogMessage], usize)) {
    let Some(idx) = model.active_index() else {
        return;
    };
    let (_, height) = log_viewport(model);
    let key = model.conversations[idx].key();
    let log = &model.conversations[idx].log;
    let view = model.views.entry(key).or_default();
    f(view, log, height);
}

fn open_conversation(model: &mut Model, effects: &mut Vec<Effect>, idx: usize) {
    let now_ms = model.now_ms;
    request_history(model, effects, idx);

    let conversation = &mut model.conversations[idx];
    conversation.clear_notifications();
    conversation.touch(now_ms);
    let key = conversation.key();

    model.views.entry(key.clone()).or_default().jump_bottom();
    model.active = Some(key);
    model.focus = Focus::Input;
    model.mode = Mode::Input;
    model.editor.history_cursor = None;
    resort(model);

    // Keep the cursor on the opened conversation after the resort.
    if let Some(active_idx) = model.active_index() {
        let visible = visible_conversations(model);
        if let Some(row) = visible.iter().position(|&i| i == active_idx) {
            model.list_cursor = row;
        }
    }
}

fn send_input(model: &mut Model, effects: &mut Vec<Effect>, text: &str) {
    let Some(idx) = model.active_index() else {
        model.status_line = Some("no conversation selected".to_owned());
        return;
    };
    let now_ms = model.now_ms;
    let now = model.now_secs();

    let kind = model.conversations[idx].kind;
    match kind {
        ConversationKind::Buddy => {
            let conversation = &mut model.conversations[idx];
            let (Some(backend), Some(account)) =
                (conversation.backend.clone(), conversation.account_id.clone())
            else {
                debug_assert!(false, "buddy conversation without backend/account");
                return;
            };
            let message = LogMessage::own(now, text);
            let record = Record::from_message(&message);
            conversation.log.push(message);
            conversation.record_send(now_ms);
            if conversation.logging {
                if let Some(conv_ref) = ConvRef::of(conversation) {
                    effects.push(Effect::AppendHistory {
                        conv: conv_ref,
                        record,
                    });
                }
            }
            let buddy = conversation.name.clone();
            effects.push(Effect::Send {
                backend,
                command: Command::SendMessage {
                    account,
                    buddy,
                    text: text.to_owned(),
                },
            });
            resort(model);
        }
        ConversationKind::Group => send_group_input(model, effects, idx, text),
        ConversationKind::Backend => {
            let conversation = &mut model.conversations[idx];
            let backend = conversation.name.clone();
            conversation.log.push(LogMessage::own(now, text));
            conversation.record_send(now_ms);
            effects.push(Effect::Send {
                backend,
                command: Command::Raw {
                    line: text.to_owned(),
                },
            });
        }
        ConversationKind::Nuqql => send_nuqql_input(model, effects, idx, text),
        ConversationKind::Main => {
            model.conversations[idx]
                .log
                .push(LogMessage::event(now, "the main log takes no commands"));
        }
    }
}

fn send_group_input(model: &mut Model, effects: &mut Vec<Effect>, idx: usize, text: &str) {
    let now_ms = model.now_ms;
    let now = model.now_secs();
    let conversation = &mut model.conversations[idx];
    let (Some(backend), Some(account)) =
        (conversation.backend.clone(), conversation.account_id.clone())
    else {
        debug_assert!(false, "group conversation without backend/account");
        return;
    };
    let chat = conversation.name.clone();

    match conv::parse_group_input(text) {
        GroupInput::Names => effects.push(Effect::Send {
            backend,
            command: Command::ChatUsers {
                account,
                chat,
            },
        }),
        GroupInput::Join => effects.push(Effect::Send {
            backend,
            command: Command::ChatJoin {
                account,
                chat,
            },
        }),
        GroupInput::Invite(user) => effects.push(Effect::Send {
            backend,
            command: Command::ChatInvite {
                account,
                chat,
                user,
            },
        }),
        GroupInput::Part => {
            if conversation.temporary {
                // Never joined: the conversation simply goes away.
                let key = conversation.key();
                model.conversations.remove(idx);
                model.views.remove(&key);
                if model.active.as_deref() == Some(key.as_str()) {
                    model.active = None;
                    model.focus = Focus::List;
                    model.mode = Mode::Normal;
                }
            } else {
                effects.push(Effect::Send {
                    backend,
                    command: Command::ChatPart {
                        account,
                        chat,
                    },
                });
            }
        }
        GroupInput::Message(message) => {
            let log_message = LogMessage::own(now, &message);
            let record = Record::from_message(&log_message);
            conversation.log.push(log_message);
            conversation.record_send(now_ms);
            if conversation.logging {
                if let Some(conv_ref) = ConvRef::of(conversation) {
                    effects.push(Effect::AppendHistory {
                        conv: conv_ref,
                        record,
                    });
                }
            }
            effects.push(Effect::Send {
                backend,
                command: Command::SendChatMessage {
                    account,
                    chat,
                    text: message,
                },
            });
            resort(model);
        }
    }
}

fn send_nuqql_input(model: &mut Model, effects: &mut Vec<Effect>, idx: usize, text: &str) {
    let now = model.now_secs();
    match conv::parse_nuqql_input(text) {
        NuqqlInput::GlobalStatusGet => {
            let status = model
                .global_status
                .clone()
                .unwrap_or_else(|| "(not set)".to_owned());
            model.conversations[idx]
                .log
                .push(LogMessage::event(now, &format!("global status: {status}")));
        }
        NuqqlInput::GlobalStatusSet(status) => {
            model.global_status = Some(status.clone());
            effects.push(Effect::SaveGlobalStatus {
                status: status.clone(),
            });
            for backend in &model.backends {
                if !backend.running {
                    continue;
                }
                for account in backend.directory.accounts.values() {
                    effects.push(Effect::Send {
                        backend: backend.name.clone(),
                        command: Command::SetStatus {
                            account: account.id.clone(),
                            status: status.clone(),
                        },
                    });
                }
            }
            model.conversations[idx]
                .log
                .push(LogMessage::event(now, &format!("global status set: {status}")));
        }
        NuqqlInput::Unknown(input) => {
            model.conversations[idx].log.push(LogMessage::event(
                now,
                &format!("unknown command: {input} (try \"global-status get|set <status>\")"),
            ));
        }
    }
}
