//! Cooperative connection handler, run as a task on the event loop.
//!
//! Mirrors `blocking.rs` step for step; every socket operation is a
//! suspension point instead of a blocking call.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::load_balancer::Backend;
use crate::net::ConnectionId;
use crate::proxy::error::ProxyError;
use crate::proxy::session::{Outcome, ProxySession};
use crate::proxy::ProxyContext;

/// Proxy one client connection to completion.
pub async fn handle_connection(
    client: TcpStream,
    peer: SocketAddr,
    id: ConnectionId,
    ctx: &ProxyContext,
) {
    let mut client = client;
    let mut session = ProxySession::new(id, peer);

    let outcome = match proxy(&mut client, &mut session, ctx).await {
        Ok(outcome) => outcome,
        Err(err) => match session.fail(&err) {
            Some(reply) => {
                write_reply(&mut client, reply, &session).await;
                Outcome::BadGateway
            }
            None => Outcome::Aborted,
        },
    };

    session.finish(outcome);
}

async fn proxy(
    client: &mut TcpStream,
    session: &mut ProxySession,
    ctx: &ProxyContext,
) -> Result<Outcome, ProxyError> {
    let request = read_request(client, ctx).await?;
    session.request_received(request.len());

    let Some(backend) = ctx.routing.select() else {
        let reply = session.no_backend();
        write_reply(client, reply, session).await;
        return Ok(Outcome::NoBackend);
    };
    session.backend_selected(backend.clone());

    let mut upstream = connect(&backend, ctx.settings.connect_timeout()).await?;
    session.backend_connected();

    let backend_err = |source| ProxyError::BackendIo {
        backend: backend.clone(),
        source,
    };
    upstream.write_all(&request).await.map_err(backend_err)?;
    upstream.shutdown().await.map_err(backend_err)?;
    session.request_forwarded();

    let mut chunk = vec![0u8; ctx.settings.read_buffer_bytes];
    loop {
        let n = upstream.read(&mut chunk).await.map_err(backend_err)?;
        if n == 0 {
            break;
        }
        client
            .write_all(&chunk[..n])
            .await
            .map_err(ProxyError::ClientWrite)?;
        session.response_relayed(n);
    }

    Ok(Outcome::Completed)
}

async fn read_request(client: &mut TcpStream, ctx: &ProxyContext) -> Result<Vec<u8>, ProxyError> {
    let idle = ctx.settings.client_idle_timeout();
    let mut buffer = ctx.request_buffer();
    let mut chunk = vec![0u8; ctx.settings.read_buffer_bytes];

    loop {
        let read = client.read(&mut chunk);
        let n = match idle {
            Some(limit) => tokio::time::timeout(limit, read)
                .await
                .map_err(|_| ProxyError::ClientTimeout(limit))?,
            None => read.await,
        }
        .map_err(ProxyError::ClientRead)?;

        if n == 0 {
            return buffer.finish().ok_or(ProxyError::ClientClosed);
        }
        if let Some(request) = buffer.push(&chunk[..n])? {
            return Ok(request);
        }
    }
}

async fn connect(backend: &Backend, timeout: Duration) -> Result<TcpStream, ProxyError> {
    let attempt = TcpStream::connect((backend.host(), backend.port()));
    let result = match tokio::time::timeout(timeout, attempt).await {
        Ok(result) => result,
        Err(_) => Err(std::io::Error::new(
            std::io::ErrorKind::TimedOut,
            format!("no connection within {timeout:?}"),
        )),
    };
    result.map_err(|source| ProxyError::BackendConnect {
        backend: backend.clone(),
        source,
    })
}

async fn write_reply(client: &mut TcpStream, reply: &[u8], session: &ProxySession) {
    let result = async {
        client.write_all(reply).await?;
        client.flush().await
    }
    .await;
    if let Err(e) = result {
        tracing::warn!(connection_id = %session.id(), error = %e, "Failed to write error response");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProxySettings;
    use crate::load_balancer::{BackendRegistry, RoutingState};
    use crate::proxy::response;
    use std::sync::Arc;
    use tokio::net::TcpListener;

    fn context(backends: Vec<Backend>, healthy: bool) -> ProxyContext {
        let routing = Arc::new(RoutingState::new(BackendRegistry::new(backends), healthy));
        ProxyContext::new(routing, ProxySettings::default())
    }

    async fn serve_one(ctx: ProxyContext) -> (TcpStream, tokio::task::JoinHandle<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let (stream, peer) = listener.accept().await.unwrap();
            handle_connection(stream, peer, ConnectionId::new(), &ctx).await;
        });
        (TcpStream::connect(addr).await.unwrap(), handle)
    }

    #[tokio::test]
    async fn empty_healthy_set_gets_503() {
        let (mut client, handle) = serve_one(context(vec![Backend::new("127.0.0.1", 1)], false)).await;
        client.write_all(b"GET / HTTP/1.1\r\nHost: lb\r\n\r\n").await.unwrap();

        let mut out = Vec::new();
        client.read_to_end(&mut out).await.unwrap();
        assert_eq!(out, response::SERVICE_UNAVAILABLE);
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn refused_backend_gets_502() {
        let port = std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();
        let (mut client, handle) = serve_one(context(vec![Backend::new("127.0.0.1", port)], true)).await;
        client.write_all(b"GET / HTTP/1.1\r\nHost: lb\r\n\r\n").await.unwrap();

        let mut out = Vec::new();
        client.read_to_end(&mut out).await.unwrap();
        assert_eq!(out, response::BAD_GATEWAY);
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn backend_drop_after_partial_response_just_closes() {
        let backend_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = backend_listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (mut stream, _) = backend_listener.accept().await.unwrap();
            let mut sink = Vec::new();
            stream.read_to_end(&mut sink).await.unwrap();
            stream.write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 100\r\n\r\npart").await.unwrap();
            // Dropped mid-body.
        });

        let (mut client, handle) = serve_one(context(vec![Backend::new("127.0.0.1", port)], true)).await;
        client.write_all(b"GET / HTTP/1.1\r\n\r\n").await.unwrap();

        let mut out = Vec::new();
        client.read_to_end(&mut out).await.unwrap();
        assert_eq!(out, b"HTTP/1.1 200 OK\r\nContent-Length: 100\r\n\r\npart");
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn idle_client_times_out() {
        let mut ctx = context(vec![Backend::new("127.0.0.1", 1)], true);
        ctx.settings.client_idle_timeout_secs = Some(1);
        let (mut client, handle) = serve_one(ctx).await;
        client.write_all(b"GET / HTTP/1.1\r\n").await.unwrap();

        let mut out = Vec::new();
        client.read_to_end(&mut out).await.unwrap();
        assert!(out.is_empty());
        handle.await.unwrap();
    }
}
