//! Threaded execution model: one blocking accept loop feeding a worker pool.

use std::io;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::time::Duration;

use crate::config::RuntimeConfig;
use crate::lifecycle::Shutdown;
use crate::net::{ConnectionGuard, ConnectionTracker};
use crate::proxy::{blocking, ProxyContext};
use crate::server::pool::{Rejected, WorkerPool};

type Job = (TcpStream, ConnectionGuard);

pub struct ThreadedServer {
    listener: TcpListener,
    ctx: Arc<ProxyContext>,
    runtime: RuntimeConfig,
    tracker: ConnectionTracker,
}

impl ThreadedServer {
    pub fn new(listener: TcpListener, ctx: ProxyContext, runtime: RuntimeConfig) -> Self {
        Self {
            listener,
            ctx: Arc::new(ctx),
            runtime,
            tracker: ConnectionTracker::new(),
        }
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept until `shutdown` fires, then let the pool finish queued work
    /// for at most `drain_timeout_secs`. Workers still busy after that are
    /// left behind.
    ///
    /// The loop only notices shutdown between accepts, so a trigger must be
    /// paired with a wake-up connection (`lifecycle::signals::spawn_listener_waker`).
    pub fn run(self, shutdown: Shutdown) -> io::Result<()> {
        let ctx = Arc::clone(&self.ctx);
        let pool = WorkerPool::new(
            self.runtime.workers,
            self.runtime.queue_capacity,
            self.runtime.saturation,
            move |(stream, guard): Job| {
                blocking::handle_connection(stream, guard.peer(), guard.id(), &ctx)
            },
        )?;

        tracing::info!(
            address = %self.listener.local_addr()?,
            workers = pool.size(),
            "Threaded server accepting connections"
        );

        loop {
            let accepted = self.listener.accept();
            if shutdown.is_triggered() {
                tracing::info!("Stopping accept loop");
                break;
            }

            match accepted {
                Ok((stream, peer)) => {
                    let guard = self.tracker.track(peer);
                    tracing::debug!(connection_id = %guard.id(), peer = %peer, "Connection accepted");
                    if let Err(Rejected((stream, guard))) = pool.submit((stream, guard)) {
                        blocking::reject(stream, guard.peer());
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Accept failed");
                }
            }
        }

        drop(self.listener);
        let in_flight = self.tracker.active_count();
        if in_flight > 0 {
            tracing::info!(in_flight, "Draining in-flight connections");
        }

        let drain = Duration::from_secs(self.runtime.drain_timeout_secs);
        if self.tracker.wait_for_drain_blocking(drain) {
            pool.shutdown();
        } else {
            tracing::warn!(
                remaining = self.tracker.active_count(),
                "Drain deadline passed, abandoning connections"
            );
            pool.detach();
        }
        tracing::info!(
            accepted = self.tracker.accepted_total(),
            "Threaded server stopped"
        );
        Ok(())
    }
}
