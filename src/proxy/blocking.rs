//! Blocking connection handler, run on a worker thread.

use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::time::{Duration, Instant};

use crate::load_balancer::Backend;
use crate::net::ConnectionId;
use crate::proxy::error::{is_timeout, ProxyError};
use crate::proxy::session::{Outcome, ProxySession};
use crate::proxy::{response, ProxyContext};

/// Proxy one client connection to completion.
///
/// Never returns an error: failures are answered (502/503) where the
/// protocol allows it, logged, and the sockets are closed on return.
pub fn handle_connection(
    mut client: TcpStream,
    peer: SocketAddr,
    id: ConnectionId,
    ctx: &ProxyContext,
) {
    let mut session = ProxySession::new(id, peer);

    let outcome = match proxy(&mut client, &mut session, ctx) {
        Ok(outcome) => outcome,
        Err(err) => match session.fail(&err) {
            Some(reply) => {
                write_reply(&mut client, reply, &session);
                Outcome::BadGateway
            }
            None => Outcome::Aborted,
        },
    };

    session.finish(outcome);
}

/// How long a rejected client gets to finish sending before the socket closes.
const REJECT_LINGER: Duration = Duration::from_millis(250);

/// Turn a connection away with a 503 (worker queue saturated).
///
/// The request is discarded, but only after a short read-drain: unread
/// input at close turns it into a reset that can destroy the 503 in flight.
pub fn reject(mut client: TcpStream, peer: SocketAddr) {
    tracing::warn!(peer = %peer, "Worker queue full, rejecting connection");
    if let Err(e) = client.write_all(response::SERVICE_UNAVAILABLE) {
        tracing::debug!(peer = %peer, error = %e, "Failed to write rejection");
    }
    crate::observability::metrics::record_outcome(Outcome::Rejected.as_str());

    if client.shutdown(Shutdown::Write).is_err() {
        return;
    }
    let deadline = Instant::now() + REJECT_LINGER;
    let mut sink = [0u8; 1024];
    while let Some(left) = deadline.checked_duration_since(Instant::now()) {
        if left.is_zero() || client.set_read_timeout(Some(left)).is_err() {
            break;
        }
        match client.read(&mut sink) {
            Ok(0) | Err(_) => break,
            Ok(_) => {}
        }
    }
}

fn proxy(
    client: &mut TcpStream,
    session: &mut ProxySession,
    ctx: &ProxyContext,
) -> Result<Outcome, ProxyError> {
    let request = read_request(client, ctx)?;
    session.request_received(request.len());

    let Some(backend) = ctx.routing.select() else {
        let reply = session.no_backend();
        write_reply(client, reply, session);
        return Ok(Outcome::NoBackend);
    };
    session.backend_selected(backend.clone());

    let mut upstream = connect(&backend, ctx.settings.connect_timeout())?;
    session.backend_connected();

    let backend_err = |source| ProxyError::BackendIo {
        backend: backend.clone(),
        source,
    };
    upstream.write_all(&request).map_err(backend_err)?;
    upstream.shutdown(Shutdown::Write).map_err(backend_err)?;
    session.request_forwarded();

    let mut chunk = vec![0u8; ctx.settings.read_buffer_bytes];
    loop {
        let n = match upstream.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(backend_err(e)),
        };
        client.write_all(&chunk[..n]).map_err(ProxyError::ClientWrite)?;
        session.response_relayed(n);
    }

    Ok(Outcome::Completed)
}

fn read_request(client: &mut TcpStream, ctx: &ProxyContext) -> Result<Vec<u8>, ProxyError> {
    let idle = ctx.settings.client_idle_timeout();
    client.set_read_timeout(idle).map_err(ProxyError::ClientRead)?;

    let mut buffer = ctx.request_buffer();
    let mut chunk = vec![0u8; ctx.settings.read_buffer_bytes];
    loop {
        let n = match client.read(&mut chunk) {
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) if is_timeout(&e) => {
                return Err(ProxyError::ClientTimeout(idle.unwrap_or_default()))
            }
            Err(e) => return Err(ProxyError::ClientRead(e)),
        };

        if n == 0 {
            return buffer.finish().ok_or(ProxyError::ClientClosed);
        }
        if let Some(request) = buffer.push(&chunk[..n])? {
            return Ok(request);
        }
    }
}

/// Open a fresh connection to `backend`, trying each resolved address.
fn connect(backend: &Backend, timeout: Duration) -> Result<TcpStream, ProxyError> {
    let connect_err = |source| ProxyError::BackendConnect {
        backend: backend.clone(),
        source,
    };

    let addrs = (backend.host(), backend.port())
        .to_socket_addrs()
        .map_err(connect_err)?;

    let mut last_err = io::Error::new(io::ErrorKind::NotFound, "no addresses resolved");
    for addr in addrs {
        match TcpStream::connect_timeout(&addr, timeout) {
            Ok(stream) => return Ok(stream),
            Err(e) => last_err = e,
        }
    }
    Err(connect_err(last_err))
}

fn write_reply(client: &mut TcpStream, reply: &[u8], session: &ProxySession) {
    if let Err(e) = client.write_all(reply) {
        tracing::warn!(connection_id = %session.id(), error = %e, "Failed to write error response");
    }
}
