//! Backend subprocess lifecycle: discovery on PATH, spawn with the socket
//! path convention, an output-drain task per child, and idempotent stop.

pub mod session;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use anyhow::{anyhow, Context as _};
use tokio::io::{AsyncBufReadExt as _, BufReader};
use tokio::process::Child;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use nuqql_protocol::Command;

use self::session::{Session, SocketTarget, CONNECT_ATTEMPTS, CONNECT_RETRY_DELAY};

/// Backend executables looked up on PATH by their well-known names.
pub const WELL_KNOWN_BACKENDS: &[&str] = &[
    "nuqql-based",
    "nuqql-slixmppd",
    "nuqql-matrixd",
    "nuqql-mattermostd",
];

/// Any executable with this file-name prefix in the extra search directory
/// is treated as a backend too.
pub const BACKEND_PREFIX: &str = "nuqql-";

/// Settle delay between spawning a backend and the first connect attempt.
pub const STARTUP_GRACE: Duration = Duration::from_millis(500);

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Starting,
    Connecting,
    Connected,
    Stopped,
}

/// One backend: the subprocess, its drain tasks, and the socket session.
pub struct Backend {
    pub name: String,
    pub exec: PathBuf,
    pub state: SessionState,
    child: Option<Child>,
    drain_stop: Option<watch::Sender<bool>>,
    drain_tasks: Vec<JoinHandle<()>>,
    session: Option<Session>,
}

impl Backend {
    pub fn new(name: &str, exec: PathBuf) -> Self {
        Self {
            name: name.to_owned(),
            exec,
            state: SessionState::Idle,
            child: None,
            drain_stop: None,
            drain_tasks: Vec::new(),
            session: None,
        }
    }

    pub fn is_connected(&self) -> bool {
        matches!(self.state, SessionState::Connected)
    }

    /// Spawn the subprocess, wait out the settle delay, then connect to its
    /// socket with bounded retries. A connect failure stops the backend.
    pub async fn start(&mut self, work_dir: &Path, socket: &Path) -> anyhow::Result<()> {
        self.state = SessionState::Starting;

        tokio::fs::create_dir_all(work_dir)
            .await
            .with_context(|| format!("create backend dir: {}", work_dir.display()))?;
        // A stale socket from a previous run would confuse connect-retry.
        let _ = tokio::fs::remove_file(socket).await;

        let mut cmd = tokio::process::Command::new(&self.exec);
        cmd.arg("--af")
            .arg("unix")
            .arg("--sockfile")
            .arg(socket)
            .arg("--dir")
            .arg(work_dir)
            .current_dir(work_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd
            .spawn()
            .with_context(|| format!("spawn backend {}", self.name))?;

        let (stop_tx, stop_rx) = watch::channel(false);
        if let Some(stdout) = child.stdout.take() {
            self.drain_tasks
                .push(spawn_drain(self.name.clone(), "stdout", stdout, stop_rx.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            self.drain_tasks
                .push(spawn_drain(self.name.clone(), "stderr", stderr, stop_rx));
        }
        self.drain_stop = Some(stop_tx);
        self.child = Some(child);

        tokio::time::sleep(STARTUP_GRACE).await;
        self.state = SessionState::Connecting;

        let target = SocketTarget::Unix(socket.to_owned());
        match Session::connect(&target, CONNECT_ATTEMPTS, CONNECT_RETRY_DELAY).await {
            Ok(session) => {
                tracing::info!(backend = %self.name, socket = %target, "connected");
                self.session = Some(session);
                self.state = SessionState::Connected;
                Ok(())
            }
            Err(err) => {
                self.stop().await;
                Err(err)
            }
        }
    }

    /// Poll at most one framed line. A socket error drops the session and
    /// surfaces as `Err`; the caller stops the backend.
    pub fn read(&mut self) -> anyhow::Result<Option<String>> {
        let Some(session) = self.session.as_mut() else {
            return Ok(None);
        };
        match session.read_line() {
            Ok(line) => Ok(line),
            Err(err) => {
                self.session = None;
                self.state = SessionState::Stopped;
                Err(err)
            }
        }
    }

    pub async fn send(&mut self, command: &Command) -> anyhow::Result<()> {
        let Some(session) = self.session.as_mut() else {
            return Err(anyhow!("backend {} is not connected", self.name));
        };
        match session.send(command).await {
            Ok(()) => Ok(()),
            Err(err) => {
                self.session = None;
                self.state = SessionState::Stopped;
                Err(err)
            }
        }
    }

    /// Idempotent teardown: say goodbye if the socket is still up, kill the
    /// subprocess, signal and join the drain tasks.
    pub async fn stop(&mut self) {
        if let Some(mut session) = self.session.take() {
            let _ = session.send(&Command::Bye).await;
        }
        if let Some(stop) = self.drain_stop.take() {
            let _ = stop.send(true);
        }
        if let Some(mut child) = self.child.take() {
            let _ = child.start_kill();
            let _ = child.wait().await;
        }
        for task in self.drain_tasks.drain(..) {
            let _ = task.await;
        }
        self.state = SessionState::Stopped;
        tracing::info!(backend = %self.name, "stopped");
    }
}

/// Drain one output stream of the subprocess into the diagnostic log so the
/// child never blocks on a full pipe. Communicates nothing back into
/// application state; the stop signal ends it when the backend stops.
fn spawn_drain<R>(
    backend: String,
    label: &'static str,
    reader: R,
    mut stop: watch::Receiver<bool>,
) -> JoinHandle<()>
where
    R: tokio::io::AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        loop {
            tokio::select! {
                _ = stop.changed() => {
                    if *stop.borrow() {
                        break;
                    }
                }
                line = lines.next_line() => match line {
                    Ok(Some(line)) => tracing::debug!(backend = %backend, "{label}: {line}"),
                    Ok(None) | Err(_) => break,
                }
            }
        }
    })
}

/// Locate backend executables: the well-known names on PATH, plus anything
/// matching the name prefix in the extra directory. Returns short names
/// (well-known prefix stripped) mapped to executable paths.
pub fn discover(extra_dir: Option<&Path>) -> Vec<(String, PathBuf)> {
    let mut found = BTreeMap::new();

    for name in WELL_KNOWN_BACKENDS {
        if let Ok(path) = which::which(name) {
            found.insert(short_name(name), path);
        }
    }

    if let Some(dir) = extra_dir {
        if let Ok(entries) = std::fs::read_dir(dir) {
            for entry in entries.flatten() {
                let path = entry.path();
                let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
                    continue;
                };
                if file_name.starts_with(BACKEND_PREFIX) && is_executable(&path) {
                    found.insert(short_name(file_name), path);
                }
            }
        }
    }

    found.into_iter().collect()
}

pub fn short_name(exec_name: &str) -> String {
    exec_name
        .strip_prefix(BACKEND_PREFIX)
        .unwrap_or(exec_name)
        .to_owned()
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt as _;
    path.metadata()
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_names_strip_the_prefix() {
        assert_eq!(short_name("nuqql-slixmppd"), "slixmppd");
        assert_eq!(short_name("custom-backend"), "custom-backend");
    }

    #[cfg(unix)]
    #[test]
    fn discover_finds_prefixed_executables_in_extra_dir() {
        use std::os::unix::fs::PermissionsExt as _;

        let dir = tempfile::tempdir().unwrap();
        let exec = dir.path().join("nuqql-testd");
        std::fs::write(&exec, "#!/bin/sh\n").unwrap();
        std::fs::set_permissions(&exec, std::fs::Permissions::from_mode(0o755)).unwrap();
        // Not executable, not picked up.
        std::fs::write(dir.path().join("nuqql-plain"), "").unwrap();
        // Wrong prefix, not picked up.
        std::fs::write(dir.path().join("other-testd"), "").unwrap();

        let found = discover(Some(dir.path()));
        assert!(found.iter().any(|(name, path)| name == "testd" && *path == exec));
        assert!(!found.iter().any(|(name, _)| name == "plain"));
        assert!(!found.iter().any(|(name, _)| name.contains("other")));
    }
}
