//! Wire-level error handling tests
//!
//! These talk to the server over a raw `TcpStream` to check the exact reply
//! literals for malformed or truncated requests.

use filedock::logging::error_log_layer;
use filedock::{Config, Server};
use std::io::Write;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::layer::SubscriberExt;

async fn start_server(dir: &TempDir, max_upload_bytes: u64) -> (Server, SocketAddr) {
    let mut config = Config::default();
    config.bind_addr = "127.0.0.1:0".parse().unwrap();
    config.storage_dir = dir.path().join("FileStorage");
    config.temp_dir = dir.path().join("TempFiles");
    config.io_timeout_secs = 2;
    config.max_upload_bytes = max_upload_bytes;
    config.logging.error_log = None;

    let mut server = Server::new(config).await.unwrap();
    let addr = server.start().await.unwrap();
    (server, addr)
}

/// Send `request`, close the write side and collect everything the server sends back
async fn exchange(addr: SocketAddr, request: &[u8]) -> Vec<u8> {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(request).await.unwrap();
    stream.shutdown().await.unwrap();

    let mut response = Vec::new();
    tokio::time::timeout(Duration::from_secs(5), stream.read_to_end(&mut response))
        .await
        .unwrap()
        .unwrap();
    response
}

/// In-memory sink standing in for the error log file
#[derive(Clone, Default)]
struct ErrorLog(Arc<Mutex<Vec<u8>>>);

impl ErrorLog {
    fn records(&self) -> Vec<String> {
        String::from_utf8_lossy(&self.0.lock().unwrap())
            .lines()
            .map(str::to_string)
            .collect()
    }
}

impl Write for ErrorLog {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for ErrorLog {
    type Writer = ErrorLog;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

fn upload_frame(name: &str, declared: i32, payload: &[u8]) -> Vec<u8> {
    let mut frame = format!("SEND_FILE {name}\n").into_bytes();
    frame.extend_from_slice(&declared.to_le_bytes());
    frame.extend_from_slice(payload);
    frame
}

#[tokio::test]
async fn test_unknown_command() {
    let dir = TempDir::new().unwrap();
    let (mut server, addr) = start_server(&dir, 0).await;

    assert_eq!(exchange(addr, b"DELETE a.bin\n").await, b"INVALID_COMMAND");
    assert_eq!(exchange(addr, b"list_files\n").await, b"INVALID_COMMAND");

    server.stop().await;
}

#[tokio::test]
async fn test_missing_argument() {
    let dir = TempDir::new().unwrap();
    let (mut server, addr) = start_server(&dir, 0).await;

    assert_eq!(exchange(addr, b"GET_FILE\n").await, b"INVALID_COMMAND");
    assert_eq!(exchange(addr, b"SEND_FILE\n").await, b"INVALID_COMMAND");

    server.stop().await;
}

#[tokio::test]
async fn test_invalid_file_names() {
    let dir = TempDir::new().unwrap();
    let (mut server, addr) = start_server(&dir, 0).await;

    for request in [
        "GET_FILE ../etc/passwd\n",
        "GET_FILE a/b\n",
        "GET_FILE ..\n",
        "SEND_FILE x,y\n",
    ] {
        assert_eq!(exchange(addr, request.as_bytes()).await, b"ERROR", "{request}");
    }

    // nothing escaped the store
    assert!(!dir.path().join("x,y").exists());
    assert!(!dir.path().join("FileStorage").join("x,y").exists());

    server.stop().await;
}

#[tokio::test]
async fn test_get_missing_file() {
    let dir = TempDir::new().unwrap();
    let (mut server, addr) = start_server(&dir, 0).await;

    assert_eq!(exchange(addr, b"GET_FILE ghost.txt\n").await, b"FILE_NOT_FOUND");

    server.stop().await;
}

#[tokio::test]
async fn test_bare_command_without_newline() {
    let dir = TempDir::new().unwrap();
    let (mut server, addr) = start_server(&dir, 0).await;
    std::fs::write(dir.path().join("FileStorage").join("one.txt"), b"1").unwrap();

    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(b"LIST_FILES").await.unwrap();
    // keep the write side open: the server must answer the single read
    let mut response = Vec::new();
    tokio::time::timeout(Duration::from_secs(5), stream.read_to_end(&mut response))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(response, b"one.txt");

    server.stop().await;
}

#[tokio::test]
async fn test_upload_frame_in_one_write() {
    let dir = TempDir::new().unwrap();
    let (mut server, addr) = start_server(&dir, 0).await;

    let payload = b"coalesced with the command line";
    let frame = upload_frame("c.txt", payload.len() as i32, payload);
    assert_eq!(exchange(addr, &frame).await, b"FILE_RECEIVED");

    let stored = std::fs::read(dir.path().join("FileStorage").join("c.txt")).unwrap();
    assert_eq!(stored, payload);

    server.stop().await;
}

#[tokio::test]
async fn test_short_upload_replies_error() {
    let dir = TempDir::new().unwrap();
    let (mut server, addr) = start_server(&dir, 0).await;

    let frame = upload_frame("short.bin", 100, &[7u8; 10]);
    assert_eq!(exchange(addr, &frame).await, b"ERROR");

    // the partial file stays behind
    let stored = std::fs::read(dir.path().join("FileStorage").join("short.bin")).unwrap();
    assert_eq!(stored.len(), 10);

    server.stop().await;
}

#[tokio::test]
async fn test_truncated_length_prefix() {
    let dir = TempDir::new().unwrap();
    let (mut server, addr) = start_server(&dir, 0).await;

    assert_eq!(exchange(addr, b"SEND_FILE p.bin\n\x05\x00").await, b"ERROR");

    server.stop().await;
}

#[tokio::test]
async fn test_negative_length_prefix() {
    let dir = TempDir::new().unwrap();
    let (mut server, addr) = start_server(&dir, 0).await;

    assert_eq!(exchange(addr, &upload_frame("neg.bin", -1, b"")).await, b"ERROR");

    server.stop().await;
}

#[tokio::test]
async fn test_upload_over_limit() {
    let dir = TempDir::new().unwrap();
    let (mut server, addr) = start_server(&dir, 1024).await;

    assert_eq!(exchange(addr, &upload_frame("big.bin", 4096, b"")).await, b"ERROR");
    assert_eq!(
        exchange(addr, &upload_frame("ok.bin", 3, b"abc")).await,
        b"FILE_RECEIVED"
    );

    // the destination is truncated before the declared length is checked
    assert_eq!(exchange(addr, &upload_frame("ok.bin", 4096, b"")).await, b"ERROR");
    let stored = std::fs::read(dir.path().join("FileStorage").join("ok.bin")).unwrap();
    assert!(stored.is_empty());

    server.stop().await;
}

#[tokio::test]
async fn test_silent_client_times_out() {
    let dir = TempDir::new().unwrap();
    let (mut server, addr) = start_server(&dir, 0).await;

    // connect and send nothing; the server gives up after its read deadline
    let mut stream = TcpStream::connect(addr).await.unwrap();
    let mut response = Vec::new();
    tokio::time::timeout(Duration::from_secs(10), stream.read_to_end(&mut response))
        .await
        .unwrap()
        .unwrap();
    assert!(response.is_empty());

    server.stop().await;
}

#[tokio::test]
async fn test_server_survives_bad_clients() {
    let dir = TempDir::new().unwrap();
    let (mut server, addr) = start_server(&dir, 0).await;

    // connect and hang up immediately
    drop(TcpStream::connect(addr).await.unwrap());
    exchange(addr, b"GARBAGE\n").await;

    assert_eq!(
        exchange(addr, &upload_frame("after.txt", 2, b"ok")).await,
        b"FILE_RECEIVED"
    );
    assert_eq!(exchange(addr, b"LIST_FILES\n").await, b"after.txt");

    server.stop().await;
}

#[tokio::test]
async fn test_short_upload_is_written_to_error_log() {
    let error_log = ErrorLog::default();
    let subscriber = tracing_subscriber::registry().with(error_log_layer(error_log.clone()));
    // current-thread runtime: handler tasks run on this thread and see the subscriber
    let _guard = tracing::subscriber::set_default(subscriber);

    let dir = TempDir::new().unwrap();
    let (mut server, addr) = start_server(&dir, 0).await;

    assert_eq!(exchange(addr, b"LIST_FILES\n").await, b"");
    assert!(error_log.records().is_empty());

    let frame = upload_frame("partial.bin", 100, &[1u8; 10]);
    assert_eq!(exchange(addr, &frame).await, b"ERROR");

    let records = error_log.records();
    assert_eq!(records.len(), 1, "{records:?}");
    assert!(records[0].contains("receiving partial.bin"));
    assert!(records[0].contains("received 10 of 100 bytes"));

    server.stop().await;
}
