use cgateweb::channels::Channels;
use cgateweb::connection::pool::Pool;
use cgateweb::stats::BridgeStats;

use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::TcpListener;

async fn fake_command_server() -> (std::net::SocketAddr, tokio::task::JoinHandle<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let handle = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut reader = BufReader::new(stream);
        let mut line = String::new();
        reader.read_line(&mut line).await.unwrap();
        line
    });

    (addr, handle)
}

#[tokio::test]
async fn execute_writes_a_newline_terminated_command_to_a_healthy_slot() {
    let (addr, server) = fake_command_server().await;

    let pool = Pool::new(
        addr.ip().to_string(),
        addr.port(),
        1,
        Duration::from_secs(30),
        Duration::from_secs(60),
        Duration::from_secs(2),
        3,
        Channels::new(),
        BridgeStats::shared(),
    );

    pool.start().await.unwrap();

    pool.execute("ON //PROJECT/254/56/4").await.unwrap();

    let received = tokio::time::timeout(Duration::from_secs(2), server).await.unwrap().unwrap();
    assert_eq!(received.trim_end(), "ON //PROJECT/254/56/4");

    pool.stop().await;
    // A stopped pool has no healthy slots left to serve a write.
    assert!(pool.execute("OFF //PROJECT/254/56/4").await.is_err());
}

#[tokio::test]
async fn start_fails_when_no_slot_can_connect() {
    // Nothing is listening on this port.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let pool = Pool::new(
        addr.ip().to_string(),
        addr.port(),
        2,
        Duration::from_secs(30),
        Duration::from_secs(60),
        Duration::from_millis(200),
        3,
        Channels::new(),
        BridgeStats::shared(),
    );

    assert!(pool.start().await.is_err());
}

#[tokio::test]
async fn execute_errors_with_no_healthy_connections_before_start() {
    let pool = Pool::new(
        "127.0.0.1".to_string(),
        1, // unused, pool is never started
        1,
        Duration::from_secs(30),
        Duration::from_secs(60),
        Duration::from_secs(2),
        3,
        Channels::new(),
        BridgeStats::shared(),
    );

    let err = pool.execute("GET //PROJECT/254/56/4 level").await.unwrap_err();
    assert!(err.to_string().contains("NoHealthyConnections"));
}

#[tokio::test]
async fn double_start_is_a_no_op_not_an_error() {
    let (addr, server) = fake_command_server().await;
    tokio::spawn(async move {
        let _ = server.await;
    });

    let pool = Pool::new(
        addr.ip().to_string(),
        addr.port(),
        1,
        Duration::from_secs(30),
        Duration::from_secs(60),
        Duration::from_secs(2),
        3,
        Channels::new(),
        BridgeStats::shared(),
    );

    pool.start().await.unwrap();
    pool.start().await.unwrap();
    pool.execute("ON //PROJECT/254/56/4").await.unwrap();
}
