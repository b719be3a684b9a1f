//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tcp_balancer::config::{BalancerConfig, ExecutionStrategy};
use tcp_balancer::load_balancer::RoutingState;
use tcp_balancer::{Balancer, Shutdown, StartupError};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

/// How a mock backend answers proxied (non-probe) requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reply {
    /// `200 OK` with the backend's name as the body.
    Name,
    /// Read the request, then reset the connection without a byte.
    Reset,
}

/// A mock backend that tags responses with its name and records traffic.
#[derive(Clone)]
pub struct MockBackend {
    pub name: &'static str,
    pub addr: SocketAddr,
    /// Whether health probes get `200` (otherwise `503`).
    pub healthy: Arc<AtomicBool>,
    /// Proxied requests served, probes excluded.
    pub hits: Arc<AtomicUsize>,
    /// Raw bytes of every proxied request.
    pub received: Arc<Mutex<Vec<Vec<u8>>>>,
}

impl MockBackend {
    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }

    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }

    pub fn received(&self) -> Vec<Vec<u8>> {
        self.received.lock().unwrap().clone()
    }
}

pub fn response_for(name: &str) -> Vec<u8> {
    format!(
        "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        name.len(),
        name
    )
    .into_bytes()
}

/// Start a mock backend on an ephemeral port.
pub async fn start_backend(name: &'static str, reply: Reply) -> MockBackend {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let backend = MockBackend {
        name,
        addr: listener.local_addr().unwrap(),
        healthy: Arc::new(AtomicBool::new(true)),
        hits: Arc::new(AtomicUsize::new(0)),
        received: Arc::new(Mutex::new(Vec::new())),
    };

    let state = backend.clone();
    tokio::spawn(async move {
        loop {
            let Ok((socket, _)) = listener.accept().await else { break };
            let state = state.clone();
            tokio::spawn(serve(socket, state, reply));
        }
    });

    backend
}

async fn serve(mut socket: TcpStream, state: MockBackend, reply: Reply) {
    let request = read_request(&mut socket).await;
    if request.is_empty() {
        return;
    }

    if request.starts_with(b"GET /health ") {
        let status: &[u8] = if state.healthy.load(Ordering::SeqCst) {
            b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\nConnection: close\r\n\r\n"
        } else {
            b"HTTP/1.1 503 Service Unavailable\r\nContent-Length: 0\r\nConnection: close\r\n\r\n"
        };
        let _ = socket.write_all(status).await;
        return;
    }

    state.hits.fetch_add(1, Ordering::SeqCst);
    state.received.lock().unwrap().push(request);

    match reply {
        Reply::Name => {
            let _ = socket.write_all(&response_for(state.name)).await;
            let _ = socket.shutdown().await;
        }
        Reply::Reset => {
            let _ = socket2::SockRef::from(&socket).set_linger(Some(Duration::ZERO));
            drop(socket);
        }
    }
}

/// Read one request: head plus `Content-Length` body, or until EOF.
async fn read_request(socket: &mut TcpStream) -> Vec<u8> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        if let Some(total) = framed_len(&buf) {
            if buf.len() >= total {
                return buf;
            }
        }
        match socket.read(&mut chunk).await {
            Ok(0) | Err(_) => return buf,
            Ok(n) => buf.extend_from_slice(&chunk[..n]),
        }
    }
}

fn framed_len(buf: &[u8]) -> Option<usize> {
    let head_end = buf.windows(4).position(|w| w == b"\r\n\r\n")? + 4;
    let head = String::from_utf8_lossy(&buf[..head_end]).to_ascii_lowercase();
    let body = head
        .lines()
        .find_map(|line| line.strip_prefix("content-length:"))
        .and_then(|v| v.trim().parse::<usize>().ok())
        .unwrap_or(0);
    Some(head_end + body)
}

/// An address nothing listens on.
pub fn refused_addr() -> SocketAddr {
    std::net::TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
}

/// Test configuration: ephemeral bind, fast probes.
pub fn config_for(backends: &[SocketAddr], strategy: ExecutionStrategy) -> BalancerConfig {
    let mut config = BalancerConfig::default();
    config.listener.bind_address = "127.0.0.1:0".to_string();
    config.backends.addresses = backends.iter().map(ToString::to_string).collect();
    config.health_check.interval_secs = 1;
    config.health_check.timeout_secs = 1;
    config.runtime.strategy = strategy;
    config.runtime.workers = 8;
    config.runtime.drain_timeout_secs = 2;
    config
}

/// A balancer serving on a background thread.
pub struct RunningBalancer {
    pub addr: SocketAddr,
    pub routing: Arc<RoutingState>,
    pub shutdown: Shutdown,
    handle: std::thread::JoinHandle<Result<(), StartupError>>,
}

impl RunningBalancer {
    /// Trigger shutdown and wait for the balancer to return.
    pub async fn stop(self) -> Result<(), StartupError> {
        self.shutdown.trigger();
        let handle = self.handle;
        tokio::task::spawn_blocking(move || handle.join().expect("balancer thread panicked"))
            .await
            .unwrap()
    }
}

pub fn start_balancer(config: BalancerConfig) -> RunningBalancer {
    let balancer = Balancer::bind(config).unwrap();
    let addr = balancer.local_addr().unwrap();
    let routing = balancer.routing();
    let shutdown = Shutdown::new();

    let run_shutdown = shutdown.clone();
    let handle = std::thread::spawn(move || balancer.run(run_shutdown));

    RunningBalancer {
        addr,
        routing,
        shutdown,
        handle,
    }
}

/// Poll `condition` every 50ms until it holds or `timeout` passes.
pub async fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    condition()
}

/// Send raw bytes and collect everything until the balancer closes.
pub async fn send_raw(addr: SocketAddr, request: &[u8]) -> Vec<u8> {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(request).await.unwrap();
    let mut out = Vec::new();
    stream.read_to_end(&mut out).await.unwrap();
    out
}

pub const SIMPLE_GET: &[u8] = b"GET / HTTP/1.1\r\nHost: lb\r\n\r\n";
