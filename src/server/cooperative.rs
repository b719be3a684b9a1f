//! Cooperative execution model: one task per connection on the event loop.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use crate::lifecycle::ShutdownSignal;
use crate::net::{BoundedListener, ConnectionTracker};
use crate::proxy::{cooperative, ProxyContext};

pub struct CooperativeServer {
    listener: BoundedListener,
    ctx: Arc<ProxyContext>,
    tracker: ConnectionTracker,
    drain_timeout: Duration,
}

impl CooperativeServer {
    pub fn new(listener: BoundedListener, ctx: ProxyContext, drain_timeout: Duration) -> Self {
        Self {
            listener,
            ctx: Arc::new(ctx),
            tracker: ConnectionTracker::new(),
            drain_timeout,
        }
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept until shutdown, then wait (bounded) for in-flight sessions.
    pub async fn run(self, mut shutdown: ShutdownSignal) -> io::Result<()> {
        tracing::info!(
            address = %self.listener.local_addr()?,
            max_connections = self.listener.max_connections(),
            "Cooperative server accepting connections"
        );

        loop {
            tokio::select! {
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer, permit)) => {
                        let guard = self.tracker.track(peer);
                        let ctx = Arc::clone(&self.ctx);
                        tokio::spawn(async move {
                            cooperative::handle_connection(stream, peer, guard.id(), &ctx).await;
                            drop(permit);
                            drop(guard);
                        });
                    }
                    Err(e) => tracing::warn!(error = %e, "Accept failed"),
                },
                _ = shutdown.recv() => {
                    tracing::info!("Stopping accept loop");
                    break;
                }
            }
        }

        drop(self.listener);

        let active = self.tracker.active_count();
        if active > 0 {
            tracing::info!(active, "Draining in-flight connections");
        }
        if !self.tracker.wait_for_drain(self.drain_timeout).await {
            tracing::warn!(
                remaining = self.tracker.active_count(),
                "Drain deadline passed, abandoning connections"
            );
        }

        tracing::info!("Cooperative server stopped");
        Ok(())
    }
}
