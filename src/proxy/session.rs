//! Per-connection proxy state machine.
//!
//! # States
//! ```text
//! AwaitRequest → SelectBackend ─┬→ NoBackend → Respond503 → Closed
//!                               └→ ConnectBackend ─┬→ ConnectFailed → Respond502 → Closed
//!                                                  └→ ForwardRequest → StreamResponse → Closed
//!                                                       (failure before first response byte → Respond502)
//! ```
//!
//! The session holds no sockets; the blocking and cooperative drivers own
//! those and report progress here, so both models walk the same machine.
//! `Closed` is terminal. A request never retries selection.

use std::net::SocketAddr;
use std::time::Instant;

use crate::load_balancer::Backend;
use crate::net::ConnectionId;
use crate::observability::metrics;
use crate::proxy::error::ProxyError;
use crate::proxy::response;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    AwaitRequest,
    SelectBackend,
    NoBackend,
    Respond503,
    ConnectBackend,
    ConnectFailed,
    ForwardRequest,
    StreamResponse,
    Respond502,
    Closed,
}

impl SessionState {
    /// Whether `self → next` is an edge of the machine.
    pub fn can_transition(self, next: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, next),
            (AwaitRequest, SelectBackend)
                | (SelectBackend, NoBackend)
                | (SelectBackend, ConnectBackend)
                | (NoBackend, Respond503)
                | (ConnectBackend, ConnectFailed)
                | (ConnectBackend, ForwardRequest)
                | (ConnectFailed, Respond502)
                | (ForwardRequest, StreamResponse)
                | (ForwardRequest, Respond502)
                | (StreamResponse, Respond502)
        ) || (next == Closed && self != Closed)
    }
}

/// How a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Response fully relayed.
    Completed,
    /// No healthy backend; 503 sent.
    NoBackend,
    /// Backend failed before responding; 502 sent.
    BadGateway,
    /// Ended without a synthetic response (partial relay, client gone, malformed).
    Aborted,
    /// Turned away at accept time because the worker queue was full; 503 sent.
    Rejected,
}

impl Outcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Outcome::Completed => "completed",
            Outcome::NoBackend => "no_backend",
            Outcome::BadGateway => "bad_gateway",
            Outcome::Aborted => "aborted",
            Outcome::Rejected => "rejected",
        }
    }
}

/// Transient state of one client connection.
#[derive(Debug)]
pub struct ProxySession {
    id: ConnectionId,
    peer: SocketAddr,
    state: SessionState,
    backend: Option<Backend>,
    request_bytes: usize,
    response_bytes: u64,
    started: Instant,
}

impl ProxySession {
    pub fn new(id: ConnectionId, peer: SocketAddr) -> Self {
        Self {
            id,
            peer,
            state: SessionState::AwaitRequest,
            backend: None,
            request_bytes: 0,
            response_bytes: 0,
            started: Instant::now(),
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn backend(&self) -> Option<&Backend> {
        self.backend.as_ref()
    }

    /// Whether any backend bytes reached the client.
    pub fn response_started(&self) -> bool {
        self.response_bytes > 0
    }

    fn transition(&mut self, next: SessionState) {
        debug_assert!(
            self.state.can_transition(next),
            "invalid session transition {:?} -> {:?}",
            self.state,
            next
        );
        tracing::trace!(connection_id = %self.id, from = ?self.state, to = ?next, "Session transition");
        self.state = next;
    }

    /// The full request has been read.
    pub fn request_received(&mut self, len: usize) {
        self.request_bytes = len;
        self.transition(SessionState::SelectBackend);
    }

    /// Selection came back empty. Returns the bytes to send the client.
    pub fn no_backend(&mut self) -> &'static [u8] {
        tracing::error!(connection_id = %self.id, peer = %self.peer, "No healthy backend available");
        self.transition(SessionState::NoBackend);
        self.transition(SessionState::Respond503);
        response::SERVICE_UNAVAILABLE
    }

    pub fn backend_selected(&mut self, backend: Backend) {
        tracing::info!(connection_id = %self.id, peer = %self.peer, backend = %backend, "Routing client");
        metrics::record_selection(&backend);
        self.backend = Some(backend);
        self.transition(SessionState::ConnectBackend);
    }

    pub fn backend_connected(&mut self) {
        self.transition(SessionState::ForwardRequest);
    }

    /// Request written and backend write side shut down.
    pub fn request_forwarded(&mut self) {
        self.transition(SessionState::StreamResponse);
    }

    /// `n` response bytes were relayed to the client.
    pub fn response_relayed(&mut self, n: usize) {
        self.response_bytes += n as u64;
    }

    /// Record a failure and decide the synthetic response, if any.
    pub fn fail(&mut self, err: &ProxyError) -> Option<&'static [u8]> {
        if matches!(err, ProxyError::BackendConnect { .. }) {
            self.transition(SessionState::ConnectFailed);
        }

        if err.is_backend_failure() && !self.response_started() {
            tracing::warn!(connection_id = %self.id, peer = %self.peer, error = %err, "Backend failed, answering 502");
            self.transition(SessionState::Respond502);
            return Some(response::BAD_GATEWAY);
        }

        match err {
            ProxyError::ClientClosed | ProxyError::ClientWrite(_) | ProxyError::ClientRead(_) => {
                tracing::debug!(connection_id = %self.id, peer = %self.peer, error = %err, "Client went away")
            }
            _ => tracing::warn!(connection_id = %self.id, peer = %self.peer, error = %err, "Session aborted"),
        }
        None
    }

    /// Close the session, log a summary, and record the outcome.
    pub fn finish(mut self, outcome: Outcome) {
        self.transition(SessionState::Closed);
        metrics::record_outcome(outcome.as_str());
        tracing::debug!(
            connection_id = %self.id,
            peer = %self.peer,
            backend = ?self.backend.as_ref().map(ToString::to_string),
            outcome = outcome.as_str(),
            request_bytes = self.request_bytes,
            response_bytes = self.response_bytes,
            elapsed_ms = self.started.elapsed().as_millis() as u64,
            "Session closed"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    fn session() -> ProxySession {
        ProxySession::new(ConnectionId::new(), "127.0.0.1:50000".parse().unwrap())
    }

    fn backend() -> Backend {
        Backend::new("127.0.0.1", 8080)
    }

    #[test]
    fn happy_path_walks_the_machine() {
        let mut s = session();
        s.request_received(40);
        s.backend_selected(backend());
        s.backend_connected();
        s.request_forwarded();
        s.response_relayed(10);
        assert_eq!(s.state(), SessionState::StreamResponse);
        assert!(s.response_started());
        assert_eq!(s.backend(), Some(&backend()));
        s.finish(Outcome::Completed);
    }

    #[test]
    fn no_backend_answers_503() {
        let mut s = session();
        s.request_received(10);
        assert_eq!(s.no_backend(), response::SERVICE_UNAVAILABLE);
        assert_eq!(s.state(), SessionState::Respond503);
    }

    #[test]
    fn connect_failure_answers_502() {
        let mut s = session();
        s.request_received(10);
        s.backend_selected(backend());
        let err = ProxyError::BackendConnect {
            backend: backend(),
            source: io::Error::from(io::ErrorKind::ConnectionRefused),
        };
        assert_eq!(s.fail(&err), Some(response::BAD_GATEWAY));
        assert_eq!(s.state(), SessionState::Respond502);
    }

    #[test]
    fn mid_stream_failure_after_first_byte_has_no_response() {
        let mut s = session();
        s.request_received(10);
        s.backend_selected(backend());
        s.backend_connected();
        s.request_forwarded();
        s.response_relayed(1);
        let err = ProxyError::BackendIo {
            backend: backend(),
            source: io::Error::from(io::ErrorKind::ConnectionReset),
        };
        assert_eq!(s.fail(&err), None);
        assert_eq!(s.state(), SessionState::StreamResponse);
    }

    #[test]
    fn mid_stream_failure_before_first_byte_answers_502() {
        let mut s = session();
        s.request_received(10);
        s.backend_selected(backend());
        s.backend_connected();
        s.request_forwarded();
        let err = ProxyError::BackendIo {
            backend: backend(),
            source: io::Error::from(io::ErrorKind::ConnectionReset),
        };
        assert_eq!(s.fail(&err), Some(response::BAD_GATEWAY));
    }

    #[test]
    fn client_errors_never_answer() {
        let mut s = session();
        assert_eq!(s.fail(&ProxyError::ClientClosed), None);
        assert_eq!(s.state(), SessionState::AwaitRequest);
        s.finish(Outcome::Aborted);
    }

    #[test]
    fn transition_table() {
        use SessionState::*;
        assert!(AwaitRequest.can_transition(SelectBackend));
        assert!(AwaitRequest.can_transition(Closed));
        assert!(!AwaitRequest.can_transition(ConnectBackend));
        assert!(!NoBackend.can_transition(ConnectBackend));
        assert!(!Respond503.can_transition(Respond502));
        assert!(!Closed.can_transition(Closed));
        assert!(!StreamResponse.can_transition(SelectBackend));
    }
}
