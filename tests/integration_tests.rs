//! Integration tests for echolog

use echolog::client::EchoClient;
use echolog::config::ServerConfig;
use echolog::server::{DrainReport, EchoLogServer, ServerContext};
use echolog::EchoLogError;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::tempdir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};

struct TestServer {
    addr: SocketAddr,
    context: Arc<ServerContext>,
    handle: JoinHandle<echolog::Result<DrainReport>>,
    data_file: PathBuf,
}

impl TestServer {
    fn client(&self) -> EchoClient {
        EchoClient::new(self.addr.to_string()).with_timeout(Duration::from_secs(5))
    }

    fn log(&self) -> Vec<u8> {
        std::fs::read(&self.data_file).unwrap()
    }

    async fn stop(self) -> DrainReport {
        self.context.request_shutdown();
        timeout(Duration::from_secs(5), self.handle)
            .await
            .expect("server did not stop")
            .unwrap()
            .unwrap()
    }
}

/// Helper function to create a test server config
fn create_test_server_config(dir: &Path, timestamp_interval_ms: Option<u64>) -> ServerConfig {
    let mut config = ServerConfig::default();
    config.server.bind_address = "127.0.0.1".parse().unwrap();
    config.server.port = 0;
    config.storage.data_file = dir.join("aesdsocketdata");
    config.shutdown.drain_grace_ms = 100;
    match timestamp_interval_ms {
        Some(interval_ms) => config.timestamp.interval_ms = interval_ms,
        None => config.timestamp.enabled = false,
    }
    config
}

async fn start_server(config: ServerConfig) -> TestServer {
    let data_file = config.storage.data_file.clone();
    let server = EchoLogServer::bind(config).await.unwrap();
    let addr = server.local_addr().unwrap();
    let context = server.context();
    let handle = tokio::spawn(server.run());

    TestServer {
        addr,
        context,
        handle,
        data_file,
    }
}

/// A single client gets its own message back and the log holds exactly it
#[tokio::test]
async fn test_single_message_round_trip() {
    let temp_dir = tempdir().unwrap();
    let server = start_server(create_test_server_config(temp_dir.path(), None)).await;

    let echo = server.client().send_line("hello").await.unwrap();
    assert_eq!(&echo[..], b"hello\n");
    assert_eq!(server.log(), b"hello\n");

    server.stop().await;
}

/// A later client sees everything appended before it
#[tokio::test]
async fn test_sequential_clients_see_accumulated_log() {
    let temp_dir = tempdir().unwrap();
    let server = start_server(create_test_server_config(temp_dir.path(), None)).await;

    let first = server.client().send_line("first").await.unwrap();
    assert_eq!(&first[..], b"first\n");

    let second = server.client().send_line("second").await.unwrap();
    assert_eq!(&second[..], b"first\nsecond\n");

    server.stop().await;
}

/// Concurrent clients each see a snapshot of one serialized log
#[tokio::test]
async fn test_concurrent_clients_see_consistent_prefixes() {
    let temp_dir = tempdir().unwrap();
    let server = start_server(create_test_server_config(temp_dir.path(), None)).await;

    let mut handles = vec![];
    for i in 0..20 {
        let client = server.client();
        handles.push(tokio::spawn(async move {
            let line = format!("client-{}-{}\n", i, "x".repeat(200));
            let echo = client.send_line(&line).await.unwrap();
            (line, echo)
        }));
    }

    let mut echoes = vec![];
    for handle in handles {
        echoes.push(handle.await.unwrap());
    }

    let log = server.log();
    let text = String::from_utf8(log.clone()).unwrap();
    assert_eq!(text.lines().count(), 20);

    for (line, echo) in echoes {
        // Own message is present, whole and contiguous.
        let echo_text = String::from_utf8(echo.to_vec()).unwrap();
        assert!(echo_text.lines().any(|l| format!("{}\n", l) == line));
        // Every echo is a snapshot of the final log.
        assert!(log.starts_with(&echo));
    }

    server.stop().await;
}

/// With no traffic for one interval the log holds exactly one timestamp
#[tokio::test]
async fn test_timestamp_written_without_traffic() {
    let temp_dir = tempdir().unwrap();
    let started = tokio::time::Instant::now();
    let server = start_server(create_test_server_config(temp_dir.path(), Some(1_000))).await;

    let mut text = String::new();
    for _ in 0..500 {
        text = String::from_utf8(server.log()).unwrap();
        if !text.is_empty() {
            break;
        }
        sleep(Duration::from_millis(10)).await;
    }

    // The next record is a whole interval away.
    assert!(started.elapsed() >= Duration::from_millis(1_000));
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines.len(), 1, "unexpected log: {:?}", text);
    assert!(lines[0].starts_with("timestamp:"));
    assert!(text.ends_with('\n'));

    server.stop().await;
}

/// Timestamps and client messages share the log without interleaving
#[tokio::test]
async fn test_timestamps_interleave_with_messages_as_whole_lines() {
    let temp_dir = tempdir().unwrap();
    let server = start_server(create_test_server_config(temp_dir.path(), Some(50))).await;

    for i in 0..10 {
        server.client().send_line(format!("message {}", i)).await.unwrap();
        sleep(Duration::from_millis(20)).await;
    }

    let text = String::from_utf8(server.log()).unwrap();
    for line in text.lines() {
        assert!(line.starts_with("timestamp:") || line.starts_with("message "));
    }
    let messages: Vec<&str> = text.lines().filter(|l| l.starts_with("message ")).collect();
    let expected: Vec<String> = (0..10).map(|i| format!("message {}", i)).collect();
    assert_eq!(messages, expected);
    assert!(text.lines().any(|l| l.starts_with("timestamp:")));

    server.stop().await;
}

/// A client that never completes a line leaves no trace in the log
#[tokio::test]
async fn test_partial_message_is_discarded() {
    let temp_dir = tempdir().unwrap();
    let server = start_server(create_test_server_config(temp_dir.path(), None)).await;

    let echo = server.client().send(b"abc").await.unwrap();
    assert!(echo.is_empty());
    assert!(server.log().is_empty());

    let echo = server.client().send_line("after").await.unwrap();
    assert_eq!(&echo[..], b"after\n");

    server.stop().await;
}

/// Connecting and leaving without data disturbs nobody
#[tokio::test]
async fn test_empty_connection_leaves_log_unchanged() {
    let temp_dir = tempdir().unwrap();
    let server = start_server(create_test_server_config(temp_dir.path(), None)).await;

    server.client().send_line("kept").await.unwrap();
    drop(TcpStream::connect(server.addr).await.unwrap());
    sleep(Duration::from_millis(100)).await;
    assert_eq!(server.log(), b"kept\n");

    let echo = server.client().send_line("next").await.unwrap();
    assert_eq!(&echo[..], b"kept\nnext\n");

    server.stop().await;
}

/// Bytes after the first newline are not logged
#[tokio::test]
async fn test_only_first_line_is_logged() {
    let temp_dir = tempdir().unwrap();
    let server = start_server(create_test_server_config(temp_dir.path(), None)).await;

    let echo = server.client().send(b"one\ntwo\nthree\n").await.unwrap();
    assert_eq!(&echo[..], b"one\n");
    assert_eq!(server.log(), b"one\n");

    server.stop().await;
}

/// A large message spanning many receive chunks is logged intact
#[tokio::test]
async fn test_large_message() {
    let temp_dir = tempdir().unwrap();
    let mut config = create_test_server_config(temp_dir.path(), None);
    config.server.recv_chunk_size = 100;
    let server = start_server(config).await;

    let line = format!("{}\n", "y".repeat(64 * 1024));
    let echo = server.client().send_line(&line).await.unwrap();
    assert_eq!(&echo[..], line.as_bytes());

    server.stop().await;
}

/// Shutdown forces a blocked worker out and removes the log file
#[tokio::test]
async fn test_shutdown_with_blocked_client() {
    let temp_dir = tempdir().unwrap();
    let server = start_server(create_test_server_config(temp_dir.path(), Some(10_000))).await;

    server.client().send_line("before shutdown").await.unwrap();

    let mut blocked = TcpStream::connect(server.addr).await.unwrap();
    blocked.write_all(b"no newline yet").await.unwrap();
    sleep(Duration::from_millis(100)).await;

    let data_file = server.data_file.clone();
    assert!(data_file.exists());
    let report = server.stop().await;

    assert_eq!(report.aborted, 1);
    assert_eq!(report.failed, 0);
    assert!(!data_file.exists());

    // The server side was closed without an echo.
    let mut rest = Vec::new();
    let read = timeout(Duration::from_secs(2), blocked.read_to_end(&mut rest))
        .await
        .unwrap();
    assert!(read.is_err() || rest.is_empty());
}

/// Requesting shutdown twice runs the sequence once
#[tokio::test]
async fn test_repeated_shutdown_request() {
    let temp_dir = tempdir().unwrap();
    let server = start_server(create_test_server_config(temp_dir.path(), Some(10_000))).await;

    assert!(server.context.request_shutdown());
    assert!(!server.context.request_shutdown());

    let data_file = server.data_file.clone();
    let report = server.stop().await;
    assert_eq!(report, DrainReport::default());
    assert!(!data_file.exists());
}

/// No new connections are served after shutdown
#[tokio::test]
async fn test_listener_closed_after_shutdown() {
    let temp_dir = tempdir().unwrap();
    let server = start_server(create_test_server_config(temp_dir.path(), None)).await;
    let addr = server.addr;
    server.stop().await;

    let result = EchoClient::new(addr.to_string())
        .with_timeout(Duration::from_secs(1))
        .send_line("too late")
        .await;
    assert!(result.is_err());
}

/// Binding an address in use fails at startup
#[tokio::test]
async fn test_bind_conflict_is_startup_error() {
    let temp_dir = tempdir().unwrap();
    let occupied = std::net::TcpListener::bind("127.0.0.1:0").unwrap();

    let mut config = create_test_server_config(temp_dir.path(), None);
    config.server.port = occupied.local_addr().unwrap().port();

    let result = EchoLogServer::bind(config).await;
    assert!(matches!(result, Err(EchoLogError::Server(_))));
}

/// An unwritable log location fails at startup
#[tokio::test]
async fn test_log_creation_failure_is_startup_error() {
    let temp_dir = tempdir().unwrap();
    let mut config = create_test_server_config(temp_dir.path(), None);
    config.storage.data_file = temp_dir.path().join("missing").join("data");

    let result = EchoLogServer::bind(config).await;
    assert!(matches!(result, Err(EchoLogError::Server(_))));
}

/// `run_until` stops on its signal future
#[tokio::test]
async fn test_run_until_signal_future() {
    let temp_dir = tempdir().unwrap();
    let config = create_test_server_config(temp_dir.path(), None);
    let data_file = config.storage.data_file.clone();
    let server = EchoLogServer::bind(config).await.unwrap();
    let addr = server.local_addr().unwrap();

    let (tx, rx) = tokio::sync::oneshot::channel::<()>();
    let handle = tokio::spawn(server.run_until(async {
        let _ = rx.await;
    }));

    let echo = EchoClient::new(addr.to_string()).send_line("ping").await.unwrap();
    assert_eq!(&echo[..], b"ping\n");

    tx.send(()).unwrap();
    timeout(Duration::from_secs(5), handle)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert!(!data_file.exists());
}
