//! Connection identity and in-flight accounting.
//!
//! # Responsibilities
//! - Give every accepted client a process-unique ID for log correlation
//! - Count accepted and in-flight connections for both execution models
//! - Let a server wait, with a deadline, for in-flight sessions at shutdown

use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

// Only uniqueness matters, so relaxed ordering is enough.
static NEXT_ID: AtomicU64 = AtomicU64::new(1);

const DRAIN_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Process-unique client connection ID, displayed as `conn-<n>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub fn new() -> Self {
        Self(NEXT_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

#[derive(Debug, Default)]
struct Counters {
    accepted: AtomicU64,
    in_flight: AtomicU64,
}

/// Shared accounting of client connections.
#[derive(Debug, Clone, Default)]
pub struct ConnectionTracker {
    counters: Arc<Counters>,
}

impl ConnectionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a freshly accepted client. The connection counts as in
    /// flight until the returned guard is dropped.
    pub fn track(&self, peer: SocketAddr) -> ConnectionGuard {
        self.counters.accepted.fetch_add(1, Ordering::Relaxed);
        self.counters.in_flight.fetch_add(1, Ordering::SeqCst);
        ConnectionGuard {
            counters: Arc::clone(&self.counters),
            id: ConnectionId::new(),
            peer,
            opened: Instant::now(),
        }
    }

    pub fn active_count(&self) -> u64 {
        self.counters.in_flight.load(Ordering::SeqCst)
    }

    pub fn accepted_total(&self) -> u64 {
        self.counters.accepted.load(Ordering::Relaxed)
    }

    /// Poll until nothing is in flight. Returns `false` if `timeout`
    /// passed first.
    pub async fn wait_for_drain(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.active_count() == 0 {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(DRAIN_POLL_INTERVAL).await;
        }
    }

    /// Blocking counterpart of [`wait_for_drain`](Self::wait_for_drain).
    pub fn wait_for_drain_blocking(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if self.active_count() == 0 {
                return true;
            }
            let Some(left) = deadline.checked_duration_since(Instant::now()) else {
                return false;
            };
            std::thread::sleep(left.min(DRAIN_POLL_INTERVAL));
        }
    }
}

/// One in-flight client connection. Travels with the socket to whichever
/// thread or task serves it.
#[derive(Debug)]
pub struct ConnectionGuard {
    counters: Arc<Counters>,
    id: ConnectionId,
    peer: SocketAddr,
    opened: Instant,
}

impl ConnectionGuard {
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.counters.in_flight.fetch_sub(1, Ordering::SeqCst);
        tracing::trace!(
            connection_id = %self.id,
            peer = %self.peer,
            open_ms = self.opened.elapsed().as_millis() as u64,
            "Connection released"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer() -> SocketAddr {
        "127.0.0.1:40000".parse().unwrap()
    }

    #[test]
    fn ids_are_unique_and_increasing() {
        let first = ConnectionId::new();
        let second = ConnectionId::new();
        assert!(second > first);
        assert_eq!(first.to_string(), format!("conn-{}", first.as_u64()));
    }

    #[test]
    fn guards_track_in_flight_connections() {
        let tracker = ConnectionTracker::new();
        let a = tracker.track(peer());
        let b = tracker.clone().track(peer());
        assert_eq!(tracker.active_count(), 2);
        assert_ne!(a.id(), b.id());
        assert_eq!(a.peer(), peer());

        drop(a);
        assert_eq!(tracker.active_count(), 1);
        drop(b);
        assert_eq!(tracker.active_count(), 0);
        assert_eq!(tracker.accepted_total(), 2);
    }

    #[tokio::test]
    async fn drain_respects_deadline() {
        let tracker = ConnectionTracker::new();
        let guard = tracker.track(peer());
        assert!(!tracker.wait_for_drain(Duration::from_millis(120)).await);

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            drop(guard);
        });
        assert!(tracker.wait_for_drain(Duration::from_secs(2)).await);
    }

    #[test]
    fn blocking_drain_respects_deadline() {
        let tracker = ConnectionTracker::new();
        let guard = tracker.track(peer());
        assert!(!tracker.wait_for_drain_blocking(Duration::from_millis(120)));

        let releaser = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(30));
            drop(guard);
        });
        assert!(tracker.wait_for_drain_blocking(Duration::from_secs(2)));
        releaser.join().unwrap();
    }
}
