//! OS signal handling.
//!
//! # Responsibilities
//! - Wait for SIGINT (Ctrl+C) and, on Unix, SIGTERM
//! - Translate the first signal into a `Shutdown` trigger
//! - Exit at once on a second signal, without waiting for the drain
//! - Bridge signals into the blocking (threaded) execution model
//! - Wake a blocking accept loop once shutdown has been triggered
//!
//! # Design Decisions
//! - Uses Tokio's signal handling (async-safe)
//! - The threaded server gets a dedicated signal thread running a tiny
//!   current-thread runtime, so worker threads never see signals

use std::io;
use std::net::{SocketAddr, TcpStream};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::lifecycle::Shutdown;

/// Wait for an interrupt or terminate signal.
pub async fn wait_for_signal() -> io::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut terminate = signal(SignalKind::terminate())?;
        tokio::select! {
            res = tokio::signal::ctrl_c() => res?,
            _ = terminate.recv() => {}
        }
    }

    #[cfg(not(unix))]
    tokio::signal::ctrl_c().await?;

    Ok(())
}

/// Exit status after a forced exit (128 + SIGINT).
pub const FORCED_EXIT_CODE: i32 = 130;

/// Trigger `shutdown` when a signal arrives. A second signal ends the
/// process immediately with [`FORCED_EXIT_CODE`].
pub async fn shutdown_on_signal(shutdown: Shutdown) {
    match wait_for_signal().await {
        Ok(()) => tracing::info!("Shutdown signal received, draining (signal again to force exit)"),
        Err(e) => {
            tracing::error!(error = %e, "Failed to install signal handlers");
            return;
        }
    }
    shutdown.trigger();

    if wait_for_signal().await.is_ok() {
        tracing::warn!("Second shutdown signal received, exiting without drain");
        std::process::exit(FORCED_EXIT_CODE);
    }
}

/// Spawn a thread that triggers `shutdown` on the first signal and forces
/// the exit on the second.
///
/// Used by the threaded model, which has no runtime of its own.
pub fn spawn_signal_thread(shutdown: Shutdown) -> io::Result<JoinHandle<()>> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    thread::Builder::new()
        .name("lb-signals".into())
        .spawn(move || runtime.block_on(shutdown_on_signal(shutdown)))
}

/// Spawn a thread that waits for `shutdown` and then connects to
/// `listen_addr`, so a blocking accept loop notices the trigger no matter
/// who pulled it.
pub fn spawn_listener_waker(shutdown: Shutdown, listen_addr: SocketAddr) -> io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("lb-waker".into())
        .spawn(move || {
            while !shutdown.wait_timeout(Duration::from_secs(3600)) {}
            wake_listener(listen_addr);
        })
}

/// Unblock a thread parked in `accept()` on `addr`.
pub fn wake_listener(addr: SocketAddr) {
    let target = loopback_for(addr);
    if let Err(e) = TcpStream::connect_timeout(&target, Duration::from_secs(1)) {
        tracing::debug!(address = %target, error = %e, "Wake-up connection failed");
    }
}

// A wildcard bind is reachable through the loopback of the same family.
fn loopback_for(addr: SocketAddr) -> SocketAddr {
    let mut target = addr;
    if addr.ip().is_unspecified() {
        let ip = match addr {
            SocketAddr::V4(_) => std::net::Ipv4Addr::LOCALHOST.into(),
            SocketAddr::V6(_) => std::net::Ipv6Addr::LOCALHOST.into(),
        };
        target.set_ip(ip);
    }
    target
}
