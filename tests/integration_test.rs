//! Integration tests for the Uplo SDK

use std::time::Duration;
use tokio_test::{assert_err, assert_ok};
use uplo_sdk::{
    call, connect, hastings_to_uplocoins, is_running, ConnectionPool, Error, PoolConfig,
    RequestOptions,
};

#[tokio::test]
async fn test_connect_call_and_convert() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("GET", "/gateway")
        .with_status(200)
        .with_body(r#"{"netaddress":"127.0.0.1:8481","peers":[]}"#)
        .create_async()
        .await;
    server
        .mock("GET", "/wallet")
        .with_status(200)
        .with_body(r#"{"confirmeduplocoinbalance":"1500000000000000000000000"}"#)
        .create_async()
        .await;

    let pool = assert_ok!(ConnectionPool::with_defaults());
    let uplod = assert_ok!(connect(&pool, server.host_with_port()).await);

    let wallet = assert_ok!(uplod.call("/wallet").await);
    let balance = wallet["confirmeduplocoinbalance"].as_str().unwrap();
    let uplocoins = assert_ok!(hastings_to_uplocoins(balance));
    assert_eq!(uplocoins.to_string(), "1.5");
}

#[tokio::test]
async fn test_unreachable_daemon() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let address = listener.local_addr().unwrap().to_string();
    drop(listener);

    let pool = ConnectionPool::with_defaults().unwrap();
    assert!(!is_running(&pool, &address).await);

    let err = assert_err!(connect(&pool, address.clone()).await);
    assert!(matches!(err, Error::CouldNotConnect));

    let err = assert_err!(call(&pool, &address, "/gateway").await);
    assert!(err.is_transport());
}

#[tokio::test]
async fn test_handles_share_one_pool() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("GET", "/gateway")
        .with_status(200)
        .with_body("success")
        .create_async()
        .await;

    let pool = ConnectionPool::new(PoolConfig {
        max_sockets: 4,
        ..PoolConfig::default()
    })
    .unwrap();
    let first = connect(&pool, server.host_with_port()).await.unwrap();
    let second = connect(&pool, server.host_with_port()).await.unwrap();
    assert!(first.pool().same_pool(second.pool()));
    assert_eq!(first.pool().max_sockets(), 4);
}

#[cfg(target_os = "linux")]
fn open_descriptors() -> usize {
    std::fs::read_dir("/proc/self/fd").unwrap().count()
}

#[cfg(target_os = "linux")]
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_slow_endpoint_does_not_leak_descriptors() {
    // a server that accepts connections and never answers
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap().to_string();
    let server = tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((socket, _)) = listener.accept().await {
            held.push(socket);
        }
    });

    let pool = ConnectionPool::with_defaults().unwrap();
    let initial = open_descriptors();

    let mut calls = Vec::new();
    for _ in 0..400 {
        let pool = pool.clone();
        let address = address.clone();
        calls.push(tokio::spawn(async move {
            call(&pool, &address, RequestOptions::new("/test")).await
        }));
    }

    tokio::time::sleep(Duration::from_secs(2)).await;

    // one descriptor per client socket plus one per accepted server socket
    let delta = open_descriptors().saturating_sub(initial);
    assert!(
        delta <= pool.max_sockets() * 2,
        "{} new descriptors for a ceiling of {} sockets",
        delta,
        pool.max_sockets()
    );
    assert_eq!(pool.available(&address), 0);

    for handle in calls {
        handle.abort();
    }
    server.abort();
}
