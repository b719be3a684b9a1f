//! Health probes.
//!
//! A probe is one `GET <path>` with `Connection: close`, judged healthy
//! only if the response status is 200. The async monitor probes through a
//! hyper client; the blocking monitor writes the request itself and parses
//! the response head with httparse. Either way the whole exchange is
//! bounded by one timeout.

use std::io::{self, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::{Duration, Instant};

use hyper::header::{CONNECTION, USER_AGENT};
use hyper::{Method, Request};
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use thiserror::Error;

use crate::load_balancer::Backend;

/// Most bytes read while waiting for a complete response head.
const MAX_HEAD_BYTES: usize = 4096;
const MAX_HEADERS: usize = 64;
const PROBE_AGENT: &str = "tcp-balancer-health-check";

/// Why a probe judged a backend unhealthy.
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("connect failed: {0}")]
    Connect(io::Error),

    #[error("i/o error: {0}")]
    Io(io::Error),

    #[error("request failed: {0}")]
    Request(#[from] hyper_util::client::legacy::Error),

    #[error("invalid probe request: {0}")]
    Build(String),

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("empty response")]
    Empty,

    #[error("response ended before its head was complete")]
    Truncated,

    #[error("response head exceeds {0} bytes")]
    HeadTooLarge(usize),

    #[error("malformed response: {0}")]
    Malformed(#[from] httparse::Error),

    #[error("unexpected status {0}")]
    Status(u16),
}

/// Async prober. Keeps no idle connections, so every probe opens a fresh one.
#[derive(Clone)]
pub struct HttpProbe {
    client: Client<HttpConnector, String>,
}

impl HttpProbe {
    pub fn new() -> Self {
        let client = Client::builder(TokioExecutor::new())
            .pool_max_idle_per_host(0)
            .build(HttpConnector::new());
        Self { client }
    }

    pub async fn check(
        &self,
        backend: &Backend,
        path: &str,
        timeout: Duration,
    ) -> Result<(), ProbeError> {
        let request = Request::builder()
            .method(Method::GET)
            .uri(format!("http://{backend}{path}"))
            .header(USER_AGENT, PROBE_AGENT)
            .header(CONNECTION, "close")
            .body(String::new())
            .map_err(|e| ProbeError::Build(e.to_string()))?;

        let response = tokio::time::timeout(timeout, self.client.request(request))
            .await
            .map_err(|_| ProbeError::Timeout(timeout))??;
        judge(response.status().as_u16())
    }
}

impl Default for HttpProbe {
    fn default() -> Self {
        Self::new()
    }
}

/// Build the probe request for `backend`.
pub fn probe_request(backend: &Backend, path: &str) -> Vec<u8> {
    format!(
        "GET {path} HTTP/1.1\r\nHost: {backend}\r\nUser-Agent: {PROBE_AGENT}\r\nConnection: close\r\n\r\n"
    )
    .into_bytes()
}

/// Status code of a complete response head; `None` while more bytes are needed.
pub fn parse_status(buf: &[u8]) -> Result<Option<u16>, httparse::Error> {
    let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut response = httparse::Response::new(&mut headers);
    match response.parse(buf)? {
        httparse::Status::Complete(_) => Ok(response.code),
        httparse::Status::Partial => Ok(None),
    }
}

fn judge(code: u16) -> Result<(), ProbeError> {
    if code == 200 {
        Ok(())
    } else {
        Err(ProbeError::Status(code))
    }
}

/// Time left before `deadline`, or a timeout error once it has passed.
fn remaining(deadline: Instant, timeout: Duration) -> Result<Duration, ProbeError> {
    deadline
        .checked_duration_since(Instant::now())
        .filter(|left| !left.is_zero())
        .ok_or(ProbeError::Timeout(timeout))
}

fn map_timeout(e: io::Error, timeout: Duration) -> ProbeError {
    match e.kind() {
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => ProbeError::Timeout(timeout),
        _ => ProbeError::Io(e),
    }
}

/// Probe with blocking sockets. Connect, write and every read share one
/// deadline `timeout` from the start.
pub fn probe_blocking(backend: &Backend, path: &str, timeout: Duration) -> Result<(), ProbeError> {
    let deadline = Instant::now() + timeout;
    let addrs = (backend.host(), backend.port())
        .to_socket_addrs()
        .map_err(ProbeError::Connect)?;

    let mut last_err = io::Error::new(io::ErrorKind::NotFound, "no addresses resolved");
    let mut stream = None;
    for addr in addrs {
        match TcpStream::connect_timeout(&addr, remaining(deadline, timeout)?) {
            Ok(s) => {
                stream = Some(s);
                break;
            }
            Err(e) => last_err = e,
        }
    }
    let mut stream = match stream {
        Some(s) => s,
        None if last_err.kind() == io::ErrorKind::TimedOut => {
            return Err(ProbeError::Timeout(timeout))
        }
        None => return Err(ProbeError::Connect(last_err)),
    };

    stream
        .set_write_timeout(Some(remaining(deadline, timeout)?))
        .map_err(ProbeError::Io)?;
    stream
        .write_all(&probe_request(backend, path))
        .map_err(|e| map_timeout(e, timeout))?;

    let mut response = Vec::with_capacity(256);
    let mut chunk = [0u8; 1024];
    loop {
        if let Some(code) = parse_status(&response)? {
            return judge(code);
        }
        if response.len() >= MAX_HEAD_BYTES {
            return Err(ProbeError::HeadTooLarge(MAX_HEAD_BYTES));
        }

        stream
            .set_read_timeout(Some(remaining(deadline, timeout)?))
            .map_err(ProbeError::Io)?;
        let n = match stream.read(&mut chunk) {
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(map_timeout(e, timeout)),
        };
        if n == 0 {
            return Err(if response.is_empty() {
                ProbeError::Empty
            } else {
                ProbeError::Truncated
            });
        }
        response.extend_from_slice(&chunk[..n]);
    }
}
