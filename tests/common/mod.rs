//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, watch};

use queue_sidecar::activity::StateHook;
use queue_sidecar::config::SidecarConfig;
use queue_sidecar::http::HttpServer;
use queue_sidecar::lifecycle::Shutdown;
use queue_sidecar::{Breaker, ConcurrencyState};

/// Start a programmable mock backend. `f` receives the request path.
pub async fn start_programmable_backend<F, Fut>(f: F) -> SocketAddr
where
    F: Fn(String) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = (u16, String)> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let f = Arc::new(f);

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            let f = f.clone();
            tokio::spawn(async move {
                let mut buf = vec![0u8; 8192];
                let mut head = Vec::new();
                while !head.windows(4).any(|w| w == b"\r\n\r\n") {
                    match socket.read(&mut buf).await {
                        Ok(0) | Err(_) => return,
                        Ok(n) => head.extend_from_slice(&buf[..n]),
                    }
                }
                let head = String::from_utf8_lossy(&head);
                let path = head
                    .split_whitespace()
                    .nth(1)
                    .unwrap_or("/")
                    .to_string();

                let (status, body) = f(path).await;
                let status_text = match status {
                    200 => "200 OK",
                    500 => "500 Internal Server Error",
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
            });
        }
    });

    addr
}

/// A backend where `/block` requests park until the gate opens.
pub struct GatedBackend {
    pub addr: SocketAddr,
    pub arrivals: Arc<AtomicUsize>,
    gate: watch::Sender<bool>,
}

impl GatedBackend {
    pub async fn start() -> Self {
        let arrivals = Arc::new(AtomicUsize::new(0));
        let (gate, gate_rx) = watch::channel(false);

        let counter = arrivals.clone();
        let addr = start_programmable_backend(move |path| {
            let counter = counter.clone();
            let mut gate_rx = gate_rx.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                if path.starts_with("/block") {
                    let _ = gate_rx.wait_for(|open| *open).await;
                }
                (200, format!("served {}", path))
            }
        })
        .await;

        Self {
            addr,
            arrivals,
            gate,
        }
    }

    pub fn open(&self) {
        let _ = self.gate.send(true);
    }
}

/// A backend that answers with its head at once and sends the body only
/// after the gate opens.
pub struct SlowBodyBackend {
    pub addr: SocketAddr,
    gate: watch::Sender<bool>,
}

impl SlowBodyBackend {
    pub async fn start(body: &'static str) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (gate, gate_rx) = watch::channel(false);

        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                let mut gate_rx = gate_rx.clone();
                tokio::spawn(async move {
                    let mut buf = vec![0u8; 8192];
                    let mut head = Vec::new();
                    while !head.windows(4).any(|w| w == b"\r\n\r\n") {
                        match socket.read(&mut buf).await {
                            Ok(0) | Err(_) => return,
                            Ok(n) => head.extend_from_slice(&buf[..n]),
                        }
                    }

                    let head = format!(
                        "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                        body.len()
                    );
                    if socket.write_all(head.as_bytes()).await.is_err() {
                        return;
                    }
                    let _ = socket.flush().await;
                    let _ = gate_rx.wait_for(|open| *open).await;
                    let _ = socket.write_all(body.as_bytes()).await;
                    let _ = socket.shutdown().await;
                });
            }
        });

        Self { addr, gate }
    }

    pub fn open(&self) {
        let _ = self.gate.send(true);
    }
}

/// A running sidecar under test.
pub struct Sidecar {
    pub addr: SocketAddr,
    pub breaker: Option<Arc<Breaker>>,
    pub activity: Arc<ConcurrencyState>,
    pub admin: queue_sidecar::admin::AdminState,
    shutdown: Shutdown,
}

impl Sidecar {
    pub async fn start(
        mut config: SidecarConfig,
        backend: SocketAddr,
        on_active: Option<StateHook>,
        on_idle: Option<StateHook>,
    ) -> Self {
        config.backend.address = backend.to_string();
        config.observability.trace_requests = false;
        config.observability.metrics_enabled = false;

        let server = HttpServer::with_hooks(config, on_active, on_idle).unwrap();
        let breaker = server.breaker().cloned();
        let activity = server.activity().clone();
        let admin = server.admin_state();

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let shutdown = Shutdown::new();
        let server_shutdown = shutdown.subscribe();
        let (_, config_updates) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            let _ = server.run(listener, config_updates, server_shutdown).await;
        });

        Self {
            addr,
            breaker,
            activity,
            admin,
            shutdown,
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub fn breaker(&self) -> &Breaker {
        self.breaker.as_deref().expect("breaker configured")
    }
}

impl Drop for Sidecar {
    fn drop(&mut self) {
        self.shutdown.trigger();
    }
}

pub fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .pool_max_idle_per_host(0)
        .no_proxy()
        .build()
        .unwrap()
}

/// Counting hooks: `(on_active, on_idle, resumed, paused)`.
pub fn counting_hooks() -> (StateHook, StateHook, Arc<AtomicUsize>, Arc<AtomicUsize>) {
    let resumed = Arc::new(AtomicUsize::new(0));
    let paused = Arc::new(AtomicUsize::new(0));
    let on_active = {
        let resumed = resumed.clone();
        StateHook::from_fn(move || {
            resumed.fetch_add(1, Ordering::SeqCst);
        })
    };
    let on_idle = {
        let paused = paused.clone();
        StateHook::from_fn(move || {
            paused.fetch_add(1, Ordering::SeqCst);
        })
    };
    (on_active, on_idle, resumed, paused)
}

/// Poll until `cond` holds, for at most one second.
pub async fn wait_until(mut cond: impl FnMut() -> bool) {
    for _ in 0..1000 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    panic!("condition not reached within 1s");
}

/// Poll `value` until it equals `want`, returning the last observed value.
pub async fn poll_for(value: &AtomicUsize, want: usize) -> usize {
    for _ in 0..1000 {
        if value.load(Ordering::SeqCst) == want {
            break;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    value.load(Ordering::SeqCst)
}
