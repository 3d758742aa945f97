//! The terminal runtime: raw-mode guard, input and tick pumps, the single
//! cooperative loop polling backend sessions, and the effect executor that
//! performs all I/O the reducer asked for.

use std::collections::BTreeMap;
use std::io::{self, Stdout};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{anyhow, Context as _, Result};
use crossterm::event::{
    DisableBracketedPaste, EnableBracketedPaste, Event as CEvent, KeyCode, KeyEvent, KeyEventKind,
    KeyModifiers,
};
use crossterm::terminal::{
    disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen,
};
use crossterm::{execute, terminal};
use ratatui::backend::CrosstermBackend;
use ratatui::Terminal;
use tokio::sync::mpsc;

use nuqql_core::config::ConfigFile;
use nuqql_core::history;
use nuqql_core::paths::NuqqlPaths;
use nuqql_core::status;

use crate::backend::Backend;

use super::core::{reduce, Action, Effect, Model, Msg};
use super::view;

struct TerminalGuard {
    stdout: Stdout,
}

impl TerminalGuard {
    fn enter() -> Result<(Self, Terminal<CrosstermBackend<Stdout>>)> {
        enable_raw_mode().context("enable raw mode")?;

        let mut stdout = io::stdout();
        execute!(
            stdout,
            EnterAlternateScreen,
            EnableBracketedPaste,
            terminal::Clear(terminal::ClearType::All)
        )
        .context("enter alt screen")?;

        let backend = CrosstermBackend::new(stdout);
        let terminal = Terminal::new(backend).context("create terminal")?;

        Ok((
            Self {
                stdout: io::stdout(),
            },
            terminal,
        ))
    }
}

impl Drop for TerminalGuard {
    fn drop(&mut self) {
        let _ = execute!(self.stdout, DisableBracketedPaste, LeaveAlternateScreen);
        let _ = disable_raw_mode();
    }
}

pub async fn run(
    paths: &NuqqlPaths,
    config: ConfigFile,
    discovered: Vec<(String, PathBuf)>,
) -> Result<()> {
    let shutdown = Arc::new(AtomicBool::new(false));
    let (_guard, mut terminal) = TerminalGuard::enter()?;

    let (msg_tx, mut msg_rx) = mpsc::unbounded_channel::<Msg>();
    spawn_input_pump(msg_tx.clone(), shutdown.clone());

    let names: Vec<String> = discovered.iter().map(|(name, _)| name.clone()).collect();
    let global_status = status::load_global_status(&paths.global_status_file);
    let mut model = Model::new(config, &names, global_status);

    let size = terminal.size().context("terminal size")?;
    (model, _) = reduce(
        model,
        Msg::Resize {
            width: size.width,
            height: size.height,
        },
    );
    (model, _) = reduce(
        model,
        Msg::Tick {
            now_ms: unix_epoch_ms(),
        },
    );
    terminal.draw(|f| view::draw(f, &mut model)).context("draw")?;

    // Backends start concurrently; each start is bounded by the settle
    // delay plus the connect-retry budget.
    let mut registry: BTreeMap<String, Backend> = BTreeMap::new();
    let mut handles = Vec::new();
    for (name, exec) in discovered {
        let work_dir = paths.backend_dir(&name);
        let socket = paths.backend_socket(&name);
        handles.push(tokio::spawn(async move {
            let mut backend = Backend::new(&name, exec);
            let result = backend.start(&work_dir, &socket).await;
            (name, backend, result)
        }));
    }
    for handle in handles {
        let (name, backend, result) = handle.await.context("join backend start")?;
        registry.insert(name.clone(), backend);
        let msg = match result {
            Ok(()) => Msg::BackendStarted { backend: name },
            Err(err) => {
                tracing::warn!(backend = %name, error = %err, "backend start failed");
                Msg::BackendFailed {
                    backend: name,
                    reason: format!("{err:#}"),
                }
            }
        };
        let (next, effects) = reduce(model, msg);
        let (next, _) = apply_effects(next, effects, &mut registry, paths).await?;
        model = next;
    }
    terminal.draw(|f| view::draw(f, &mut model)).context("draw")?;

    let mut tick = tokio::time::interval(Duration::from_millis(100));
    let mut quit = false;
    while !quit {
        tokio::select! {
            msg = msg_rx.recv() => {
                let Some(msg) = msg else { break };
                let (next, effects) = reduce(model, msg);
                let (next, q) = apply_effects(next, effects, &mut registry, paths).await?;
                model = next;
                quit = q;
                terminal.draw(|f| view::draw(f, &mut model)).context("draw")?;
            }
            _ = tick.tick() => {
                let mut msgs = vec![Msg::Tick { now_ms: unix_epoch_ms() }];
                msgs.extend(poll_backends(&mut registry).await);
                for msg in msgs {
                    let (next, effects) = reduce(model, msg);
                    let (next, q) = apply_effects(next, effects, &mut registry, paths).await?;
                    model = next;
                    quit = quit || q;
                }
                terminal.draw(|f| view::draw(f, &mut model)).context("draw")?;
            }
        }
    }

    shutdown.store(true, Ordering::Relaxed);
    // Normal quit already stopped every backend; this is the idempotent
    // safety net for abnormal loop exits.
    for backend in registry.values_mut() {
        backend.stop().await;
    }
    Ok(())
}

/// Poll every connected session for at most one framed message each.
async fn poll_backends(registry: &mut BTreeMap<String, Backend>) -> Vec<Msg> {
    let mut msgs = Vec::new();
    for backend in registry.values_mut() {
        if !backend.is_connected() {
            continue;
        }
        match backend.read() {
            Ok(Some(line)) => {
                if let Some(event) = nuqql_protocol::decode(&line) {
                    msgs.push(Msg::Wire {
                        backend: backend.name.clone(),
                        event,
                    });
                }
            }
            Ok(None) => {}
            Err(err) => {
                backend.stop().await;
                msgs.push(Msg::BackendFailed {
                    backend: backend.name.clone(),
                    reason: format!("{err:#}"),
                });
            }
        }
    }
    msgs
}

async fn apply_effects(
    mut model: Model,
    mut effects: Vec<Effect>,
    registry: &mut BTreeMap<String, Backend>,
    paths: &NuqqlPaths,
) -> Result<(Model, bool)> {
    let mut quit = false;

    let mut idx = 0;
    while idx < effects.len() {
        let effect = effects[idx].clone();
        idx += 1;

        match effect {
            Effect::Quit => {
                for backend in registry.values_mut() {
                    backend.stop().await;
                }
                quit = true;
            }
            Effect::Send { backend, command } => {
                let result = match registry.get_mut(&backend) {
                    Some(b) => b.send(&command).await,
                    None => Err(anyhow!("unknown backend {backend}")),
                };
                if let Err(err) = result {
                    if let Some(b) = registry.get_mut(&backend) {
                        b.stop().await;
                    }
                    let (next, more) = reduce(
                        model,
                        Msg::BackendFailed {
                            backend,
                            reason: format!("{err:#}"),
                        },
                    );
                    model = next;
                    effects.extend(more);
                }
            }
            Effect::LoadHistory { conv } => {
                let dir = paths.conversation_dir(&conv.backend, &conv.account_id, &conv.name);
                let now = (unix_epoch_ms() / 1_000) as i64;
                let result = history::load(&dir, now).map_err(|err| err.to_string());
                let (next, more) = reduce(
                    model,
                    Msg::HistoryLoaded {
                        key: conv.key,
                        result,
                    },
                );
                model = next;
                effects.extend(more);
            }
            Effect::AppendHistory { conv, record } => {
                let dir = paths.conversation_dir(&conv.backend, &conv.account_id, &conv.name);
                if let Err(err) = history::append(&dir, &record) {
                    let (next, more) = reduce(
                        model,
                        Msg::HistoryAppendFailed {
                            key: conv.key,
                            reason: err.to_string(),
                        },
                    );
                    model = next;
                    effects.extend(more);
                }
            }
            Effect::SaveGlobalStatus { status } => {
                if let Err(err) = status::save_global_status(&paths.global_status_file, &status) {
                    tracing::warn!(error = %err, "could not save global status");
                }
            }
        }
    }

    Ok((model, quit))
}

fn spawn_input_pump(tx: mpsc::UnboundedSender<Msg>, shutdown: Arc<AtomicBool>) {
    tokio::task::spawn_blocking(move || {
        while !shutdown.load(Ordering::Relaxed) {
            let ready = match crossterm::event::poll(Duration::from_millis(50)) {
                Ok(ready) => ready,
                Err(_) => continue,
            };
            if !ready {
                continue;
            }

            let evt = match crossterm::event::read() {
                Ok(evt) => evt,
                Err(_) => continue,
            };

            let msg = match evt {
                CEvent::Key(key) => map_key(key).map(Msg::Action),
                CEvent::Paste(text) => Some(Msg::Paste(text)),
                CEvent::Resize(width, height) => Some(Msg::Resize { width, height }),
                _ => None,
            };

            if let Some(msg) = msg {
                if tx.send(msg).is_err() {
                    break;
                }
            }
        }
    });
}

fn unix_epoch_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis()
        .min(u64::MAX as u128) as u64
}

fn map_key(key: KeyEvent) -> Option<Action> {
    if !matches!(key.kind, KeyEventKind::Press) {
        return None;
    }

    if key.modifiers.contains(KeyModifiers::CONTROL) {
        return match key.code {
            KeyCode::Char('c') => Some(Action::Quit),
            KeyCode::Char('n') => Some(Action::NextConversation),
            KeyCode::Char('p') => Some(Action::PrevConversation),
            _ => None,
        };
    }

    match key.code {
        KeyCode::Tab => Some(Action::Tab),
        KeyCode::Esc => Some(Action::Cancel),
        KeyCode::Up => Some(Action::MoveUp),
        KeyCode::Down => Some(Action::MoveDown),
        KeyCode::Home => Some(Action::GoTop),
        KeyCode::End => Some(Action::GoBottom),
        KeyCode::PageUp => Some(Action::PageUp),
        KeyCode::PageDown => Some(Action::PageDown),
        KeyCode::Backspace => Some(Action::Backspace),
        KeyCode::F(2) => Some(Action::Zoom),
        KeyCode::Enter => {
            if key.modifiers.contains(KeyModifiers::SHIFT) {
                Some(Action::ShiftEnter)
            } else {
                Some(Action::Enter)
            }
        }
        KeyCode::Char(c) => {
            if key.modifiers.intersects(KeyModifiers::ALT) {
                None
            } else {
                Some(Action::Char(c))
            }
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keymap_maps_expected_actions() {
        assert_eq!(
            map_key(KeyEvent::new(KeyCode::Char('q'), KeyModifiers::NONE)),
            Some(Action::Char('q'))
        );
        assert_eq!(
            map_key(KeyEvent::new(KeyCode::Char('c'), KeyModifiers::CONTROL)),
            Some(Action::Quit)
        );
        assert_eq!(
            map_key(KeyEvent::new(KeyCode::Char('n'), KeyModifiers::CONTROL)),
            Some(Action::NextConversation)
        );
        assert_eq!(
            map_key(KeyEvent::new(KeyCode::Char('p'), KeyModifiers::CONTROL)),
            Some(Action::PrevConversation)
        );
        assert_eq!(
            map_key(KeyEvent::new(KeyCode::Tab, KeyModifiers::NONE)),
            Some(Action::Tab)
        );
        assert_eq!(
            map_key(KeyEvent::new(KeyCode::F(2), KeyModifiers::NONE)),
            Some(Action::Zoom)
        );
        assert_eq!(
            map_key(KeyEvent::new(KeyCode::Enter, KeyModifiers::SHIFT)),
            Some(Action::ShiftEnter)
        );
        assert_eq!(
            map_key(KeyEvent::new(KeyCode::Esc, KeyModifiers::NONE)),
            Some(Action::Cancel)
        );
        assert_eq!(
            map_key(KeyEvent::new(KeyCode::PageUp, KeyModifiers::NONE)),
            Some(Action::PageUp)
        );
    }
}
