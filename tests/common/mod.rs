//! Shared utilities for integration and load testing.

#![allow(dead_code)]

use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::Router;
use civic_guard::config::GuardConfig;
use civic_guard::lifecycle::{Services, Shutdown};
use civic_guard::security::store::{CounterHit, CounterStore, MemoryCounterStore, StoreError};
use civic_guard::HttpServer;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;

/// A running server plus the handles tests poke at.
pub struct TestServer {
    pub addr: SocketAddr,
    pub services: Arc<Services>,
    pub admin: Router,
    pub shutdown: Shutdown,
}

impl TestServer {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }
}

/// Start a server on an ephemeral port. `api` receives the live services
/// and returns the routes mounted under `/api`.
pub async fn start_server<F>(config: GuardConfig, api: F) -> TestServer
where
    F: FnOnce(Arc<Services>) -> Router,
{
    let services = Arc::new(Services::new(&config));
    start_server_with(config, services, api).await
}

pub async fn start_server_with<F>(config: GuardConfig, services: Arc<Services>, api: F) -> TestServer
where
    F: FnOnce(Arc<Services>) -> Router,
{
    let server = HttpServer::with_services(config, services.clone()).with_api(api(services.clone()));
    let admin = server.admin_router();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let shutdown = Shutdown::new();
    let (_, config_updates) = mpsc::unbounded_channel();
    let server_shutdown = shutdown.subscribe();
    tokio::spawn(async move {
        let _ = server.run(listener, config_updates, server_shutdown).await;
    });

    TestServer {
        addr,
        services,
        admin,
        shutdown,
    }
}

/// Non-pooled client so every request opens a fresh connection.
pub fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .pool_max_idle_per_host(0)
        .no_proxy()
        .build()
        .unwrap()
}

/// Start a programmable mock dependency on an ephemeral port.
pub async fn start_programmable_backend<F, Fut>(f: F) -> SocketAddr
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = (u16, String)> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let f = Arc::new(f);

    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((mut socket, _)) => {
                    let f = f.clone();
                    tokio::spawn(async move {
                        // Drain the request head before answering.
                        let mut buf = [0u8; 4096];
                        let _ = socket.read(&mut buf).await;

                        let (status, body) = f().await;
                        let status_text = match status {
                            200 => "200 OK",
                            400 => "400 Bad Request",
                            422 => "422 Unprocessable Entity",
                            500 => "500 Internal Server Error",
                            502 => "502 Bad Gateway",
                            503 => "503 Service Unavailable",
                            _ => "200 OK",
                        };

                        let response = format!(
                            "HTTP/1.1 {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                            status_text,
                            body.len(),
                            body
                        );
                        let _ = socket.write_all(response.as_bytes()).await;
                        let _ = socket.shutdown().await;
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    });
                }
                Err(_) => break,
            }
        }
    });

    addr
}

/// Counter store that can be switched off to simulate an outage.
#[derive(Debug)]
pub struct FlakyStore {
    inner: MemoryCounterStore,
    up: AtomicBool,
}

impl FlakyStore {
    pub fn new(inner: MemoryCounterStore) -> Self {
        Self {
            inner,
            up: AtomicBool::new(true),
        }
    }

    pub fn set_up(&self, up: bool) {
        self.up.store(up, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.up.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::Unavailable("connection refused".into()))
        }
    }
}

#[async_trait]
impl CounterStore for FlakyStore {
    async fn increment(&self, key: &str, window: Duration) -> Result<CounterHit, StoreError> {
        self.check()?;
        self.inner.increment(key, window).await
    }

    async fn decrement(&self, key: &str) -> Result<(), StoreError> {
        self.check()?;
        self.inner.decrement(key).await
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.check()
    }

    fn kind(&self) -> &'static str {
        "flaky"
    }
}
