//! Socket client for one backend: connect with a bounded retry loop, pull
//! framed lines without ever blocking the poll path, push encoded commands.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{anyhow, Context as _};
use tokio::io::AsyncWriteExt as _;
use tokio::net::{TcpStream, UnixStream};

use nuqql_protocol::Command;

/// Connect attempts before a starting backend is given up on.
pub const CONNECT_ATTEMPTS: u32 = 40;
/// Pause between connect attempts while the backend creates its socket.
pub const CONNECT_RETRY_DELAY: Duration = Duration::from_millis(250);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SocketTarget {
    Unix(PathBuf),
    Tcp(SocketAddr),
}

impl std::fmt::Display for SocketTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SocketTarget::Unix(path) => write!(f, "{}", path.display()),
            SocketTarget::Tcp(addr) => write!(f, "{addr}"),
        }
    }
}

#[derive(Debug)]
enum Stream {
    Unix(UnixStream),
    Tcp(TcpStream),
}

#[derive(Debug)]
pub struct Session {
    stream: Stream,
    buffer: Vec<u8>,
}

impl Session {
    /// Connect with a bounded retry loop; a freshly launched backend needs
    /// a moment to create its socket. Exhausting the attempts is the
    /// "could not connect" failure the backend is stopped over.
    pub async fn connect(
        target: &SocketTarget,
        attempts: u32,
        delay: Duration,
    ) -> anyhow::Result<Self> {
        let mut last_err = None;
        for attempt in 0..attempts.max(1) {
            if attempt > 0 {
                tokio::time::sleep(delay).await;
            }
            match Self::try_connect(target).await {
                Ok(stream) => {
                    return Ok(Self {
                        stream,
                        buffer: Vec::new(),
                    })
                }
                Err(err) => last_err = Some(err),
            }
        }
        let err = last_err.unwrap_or_else(|| std::io::Error::other("no attempts made"));
        Err(anyhow!(err)).with_context(|| format!("could not connect: {target}"))
    }

    async fn try_connect(target: &SocketTarget) -> std::io::Result<Stream> {
        match target {
            SocketTarget::Unix(path) => UnixStream::connect(path).await.map(Stream::Unix),
            SocketTarget::Tcp(addr) => TcpStream::connect(addr).await.map(Stream::Tcp),
        }
    }

    /// Non-blocking poll: pull whatever bytes are ready into the
    /// accumulation buffer, then pop the first complete CRLF-framed line.
    /// Returns `Ok(None)` when no full line is available yet; any socket
    /// error (including EOF) is fatal to the session.
    pub fn read_line(&mut self) -> anyhow::Result<Option<String>> {
        let mut chunk = [0u8; 4096];
        loop {
            match self.try_read(&mut chunk) {
                Ok(0) => return Err(anyhow!("backend closed the connection")),
                Ok(n) => self.buffer.extend_from_slice(&chunk[..n]),
                Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => break,
                Err(err) => return Err(err).context("read from backend"),
            }
        }
        Ok(self.pop_line())
    }

    fn try_read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match &self.stream {
            Stream::Unix(s) => s.try_read(buf),
            Stream::Tcp(s) => s.try_read(buf),
        }
    }

    fn pop_line(&mut self) -> Option<String> {
        let pos = self.buffer.windows(2).position(|w| w == b"\r\n")?;
        let line: Vec<u8> = self.buffer.drain(..pos + 2).collect();
        Some(String::from_utf8_lossy(&line[..pos]).into_owned())
    }

    /// Encode and write one command. A partial write or broken pipe is a
    /// fatal session error; the caller tears the backend down.
    pub async fn send(&mut self, command: &Command) -> anyhow::Result<()> {
        let data = nuqql_protocol::encode(command);
        let result = match &mut self.stream {
            Stream::Unix(s) => s.write_all(data.as_bytes()).await,
            Stream::Tcp(s) => s.write_all(data.as_bytes()).await,
        };
        result.context("write to backend")
    }
}
