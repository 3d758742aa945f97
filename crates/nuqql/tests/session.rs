//! Session-layer tests against a real Unix socket in a temp directory.

use std::time::{Duration, Instant};

use tokio::io::{AsyncReadExt as _, AsyncWriteExt as _};
use tokio::net::{UnixListener, UnixStream};

use nuqql::backend::session::{Session, SocketTarget};
use nuqql::backend::Backend;
use nuqql_protocol::Command;

async fn pair(dir: &tempfile::TempDir) -> (Session, UnixStream) {
    let path = dir.path().join("test.sock");
    let listener = UnixListener::bind(&path).unwrap();
    let target = SocketTarget::Unix(path);

    let (session, accepted) = tokio::join!(
        Session::connect(&target, 3, Duration::from_millis(10)),
        async { listener.accept().await.unwrap().0 },
    );
    (session.unwrap(), accepted)
}

/// Poll until a full line arrives; the reads themselves never block.
async fn read_line_eventually(session: &mut Session) -> Option<String> {
    for _ in 0..200 {
        match session.read_line() {
            Ok(Some(line)) => return Some(line),
            Ok(None) => tokio::time::sleep(Duration::from_millis(5)).await,
            Err(_) => return None,
        }
    }
    None
}

#[tokio::test]
async fn frames_lines_across_split_writes() {
    let dir = tempfile::tempdir().unwrap();
    let (mut session, mut server) = pair(&dir).await;

    server.write_all(b"info: hel").await.unwrap();
    server.flush().await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    // Half a frame is no frame.
    assert_eq!(session.read_line().unwrap(), None);

    server.write_all(b"lo\r\ninfo: second\r\n").await.unwrap();
    server.flush().await.unwrap();

    assert_eq!(
        read_line_eventually(&mut session).await.as_deref(),
        Some("info: hello")
    );
    // The second line is served from the buffer without new socket data.
    assert_eq!(
        session.read_line().unwrap().as_deref(),
        Some("info: second")
    );
    assert_eq!(session.read_line().unwrap(), None);
}

#[tokio::test]
async fn one_chunk_may_hold_many_frames() {
    let dir = tempfile::tempdir().unwrap();
    let (mut session, mut server) = pair(&dir).await;

    server
        .write_all(b"error: a\r\ninfo: b\r\nstatus: account 1 status: away\r\n")
        .await
        .unwrap();
    server.flush().await.unwrap();

    assert_eq!(
        read_line_eventually(&mut session).await.as_deref(),
        Some("error: a")
    );
    assert_eq!(session.read_line().unwrap().as_deref(), Some("info: b"));
    assert_eq!(
        session.read_line().unwrap().as_deref(),
        Some("status: account 1 status: away")
    );
}

#[tokio::test]
async fn send_writes_the_encoded_command() {
    let dir = tempfile::tempdir().unwrap();
    let (mut session, mut server) = pair(&dir).await;

    session.send(&Command::ListAccounts).await.unwrap();
    session
        .send(&Command::SendMessage {
            account: "1".to_owned(),
            buddy: "bob".to_owned(),
            text: "hi\nthere".to_owned(),
        })
        .await
        .unwrap();

    let mut buf = vec![0u8; 128];
    let mut got = Vec::new();
    while !got.ends_with(b"there\r\n") {
        let n = server.read(&mut buf).await.unwrap();
        assert!(n > 0);
        got.extend_from_slice(&buf[..n]);
    }
    assert_eq!(
        String::from_utf8(got).unwrap(),
        "account list\r\naccount 1 send bob hi<br/>there\r\n"
    );
}

#[tokio::test]
async fn peer_close_is_a_fatal_session_error() {
    let dir = tempfile::tempdir().unwrap();
    let (mut session, server) = pair(&dir).await;
    drop(server);

    let mut got_err = false;
    for _ in 0..200 {
        match session.read_line() {
            Err(_) => {
                got_err = true;
                break;
            }
            Ok(_) => tokio::time::sleep(Duration::from_millis(5)).await,
        }
    }
    assert!(got_err, "peer close never surfaced as an error");
}

#[tokio::test]
async fn connect_retry_gives_up_on_a_missing_socket() {
    let dir = tempfile::tempdir().unwrap();
    let target = SocketTarget::Unix(dir.path().join("absent.sock"));

    let start = Instant::now();
    let err = Session::connect(&target, 3, Duration::from_millis(20))
        .await
        .unwrap_err();
    assert!(format!("{err:#}").contains("could not connect"));
    // Two sleeps between three attempts.
    assert!(start.elapsed() >= Duration::from_millis(40));
}

#[tokio::test]
async fn connect_retry_succeeds_once_the_socket_appears() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("late.sock");
    let target = SocketTarget::Unix(path.clone());

    let binder = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        UnixListener::bind(&path).unwrap()
    });

    let session = Session::connect(&target, 40, Duration::from_millis(25)).await;
    assert!(session.is_ok());
    drop(binder.await.unwrap());
}

#[tokio::test]
async fn tcp_sessions_frame_the_same_way() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let target = SocketTarget::Tcp(addr);

    let (session, accepted) = tokio::join!(
        Session::connect(&target, 3, Duration::from_millis(10)),
        async { listener.accept().await.unwrap().0 },
    );
    let mut session = session.unwrap();
    let mut server = accepted;

    server.write_all(b"info: over tcp\r\n").await.unwrap();
    server.flush().await.unwrap();
    assert_eq!(
        read_line_eventually(&mut session).await.as_deref(),
        Some("info: over tcp")
    );
}

#[tokio::test]
async fn backend_start_fails_cleanly_and_stop_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let mut backend = Backend::new("ghost", dir.path().join("no-such-exec"));

    let work_dir = dir.path().join("work");
    let err = backend
        .start(&work_dir, &work_dir.join("ghost.sock"))
        .await;
    assert!(err.is_err());

    backend.stop().await;
    backend.stop().await;
}
