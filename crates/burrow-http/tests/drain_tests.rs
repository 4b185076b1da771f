//! Admin API shutdown: in-flight requests and the grace period

use burrow_core::{DrainOutcome, ServerConfig};
use burrow_db::Database;
use burrow_http::HttpServer;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

const BODY: &str = r#"{"username": "alice"}"#;

async fn start_server(
    grace_secs: u64,
) -> (
    SocketAddr,
    CancellationToken,
    JoinHandle<burrow_core::Result<DrainOutcome>>,
    Arc<Database>,
) {
    let db = Arc::new(Database::in_memory().await.unwrap());
    let config = ServerConfig {
        administrative_users: vec!["root".to_string()],
        shutdown_grace_secs: grace_secs,
        ..ServerConfig::default()
    };
    let server = HttpServer::new(Arc::clone(&db), config);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let shutdown = CancellationToken::new();
    let task = tokio::spawn(server.serve(listener, shutdown.clone()));

    (addr, shutdown, task, db)
}

/// Open a POST whose body is only half sent, so the handler is left waiting
async fn start_slow_request(addr: SocketAddr) -> TcpStream {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    let head = format!(
        "POST /users HTTP/1.1\r\nHost: localhost\r\nX-Remote-User: root\r\nConnection: close\r\n\
         Content-Type: application/json\r\nContent-Length: {}\r\n\r\n",
        BODY.len()
    );
    stream.write_all(head.as_bytes()).await.unwrap();
    stream.write_all(&BODY.as_bytes()[..5]).await.unwrap();
    stream
}

#[tokio::test]
async fn test_idle_api_drains_immediately() {
    let (addr, shutdown, task, _db) = start_server(5).await;

    shutdown.cancel();
    let outcome = tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .unwrap()
        .unwrap()
        .unwrap();

    assert_eq!(outcome, DrainOutcome::Drained);
    assert!(TcpStream::connect(addr).await.is_err());
}

#[tokio::test]
async fn test_in_flight_request_finishes_within_grace() {
    let (addr, shutdown, task, db) = start_server(5).await;
    let mut stream = start_slow_request(addr).await;
    tokio::time::sleep(Duration::from_millis(200)).await;

    shutdown.cancel();
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(!task.is_finished());

    stream.write_all(&BODY.as_bytes()[5..]).await.unwrap();
    let mut response = Vec::new();
    tokio::time::timeout(Duration::from_secs(5), stream.read_to_end(&mut response))
        .await
        .unwrap()
        .unwrap();
    assert!(String::from_utf8_lossy(&response).starts_with("HTTP/1.1 201"));

    let outcome = tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(outcome, DrainOutcome::Drained);
    assert!(db.user_exists("alice").await.unwrap());
}

#[tokio::test]
async fn test_stuck_request_times_out() {
    let (addr, shutdown, task, db) = start_server(1).await;
    let _stream = start_slow_request(addr).await;
    tokio::time::sleep(Duration::from_millis(200)).await;

    let started = Instant::now();
    shutdown.cancel();
    let outcome = tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .unwrap()
        .unwrap()
        .unwrap();

    assert_eq!(outcome, DrainOutcome::TimedOut);
    assert!(started.elapsed() >= Duration::from_secs(1));
    assert!(!db.user_exists("alice").await.unwrap());
}
