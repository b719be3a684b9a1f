//! Shared routing state.
//!
//! # Responsibilities
//! - Own the healthy set and the rotation cursor behind one mutex
//! - Serve backend selection to every connection handler
//! - Apply health probe results and report transitions
//!
//! # Invariants
//! - The healthy set is always a subset of the registry
//! - Cursor read and update happen under the same lock as the snapshot,
//!   so no two selectors observe the same (snapshot, index) pair

use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::load_balancer::{Backend, BackendRegistry, LoadBalancer, RoundRobin};
use crate::observability::metrics;

/// A change in a backend's membership of the healthy set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthTransition {
    BecameHealthy,
    BecameUnhealthy,
}

#[derive(Debug)]
struct Inner {
    healthy: HashSet<Backend>,
    cursor: usize,
}

/// Healthy set + rotation cursor, guarded against concurrent access.
#[derive(Debug)]
pub struct RoutingState {
    registry: BackendRegistry,
    balancer: Box<dyn LoadBalancer>,
    inner: Mutex<Inner>,
}

impl RoutingState {
    /// Create state with round-robin selection.
    ///
    /// When `assume_healthy` is set every registered backend starts in the
    /// healthy set; otherwise the set starts empty until the first probe.
    pub fn new(registry: BackendRegistry, assume_healthy: bool) -> Self {
        Self::with_balancer(registry, assume_healthy, Box::new(RoundRobin::new()))
    }

    pub fn with_balancer(
        registry: BackendRegistry,
        assume_healthy: bool,
        balancer: Box<dyn LoadBalancer>,
    ) -> Self {
        let healthy: HashSet<Backend> = if assume_healthy {
            registry.iter().cloned().collect()
        } else {
            HashSet::new()
        };

        for backend in registry.iter() {
            metrics::record_backend_health(backend, healthy.contains(backend));
        }

        Self {
            registry,
            balancer,
            inner: Mutex::new(Inner { healthy, cursor: 0 }),
        }
    }

    /// The fixed set of configured backends.
    pub fn registry(&self) -> &BackendRegistry {
        &self.registry
    }

    // A panicking holder cannot leave Inner half-updated, so poisoning is
    // safe to ignore.
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Select the next backend, or `None` when nothing is healthy.
    pub fn select(&self) -> Option<Backend> {
        let mut inner = self.lock();
        if inner.healthy.is_empty() {
            return None;
        }

        let snapshot: Vec<Backend> = self
            .registry
            .iter()
            .filter(|b| inner.healthy.contains(*b))
            .cloned()
            .collect();

        let Inner { cursor, .. } = &mut *inner;
        self.balancer.next_server(&snapshot, cursor)
    }

    /// Apply one probe result.
    ///
    /// Returns the transition when membership changed. Backends outside the
    /// registry are ignored.
    pub fn record_probe(&self, backend: &Backend, healthy: bool) -> Option<HealthTransition> {
        if !self.registry.contains(backend) {
            tracing::warn!(backend = %backend, "Ignoring probe result for unregistered backend");
            return None;
        }

        let transition = {
            let mut inner = self.lock();
            if healthy {
                inner
                    .healthy
                    .insert(backend.clone())
                    .then_some(HealthTransition::BecameHealthy)
            } else {
                inner
                    .healthy
                    .remove(backend)
                    .then_some(HealthTransition::BecameUnhealthy)
            }
        };

        if transition.is_some() {
            metrics::record_backend_health(backend, healthy);
        }
        transition
    }

    pub fn is_healthy(&self, backend: &Backend) -> bool {
        self.lock().healthy.contains(backend)
    }

    /// Healthy backends in registry order.
    pub fn healthy_snapshot(&self) -> Vec<Backend> {
        let inner = self.lock();
        self.registry
            .iter()
            .filter(|b| inner.healthy.contains(*b))
            .cloned()
            .collect()
    }

    pub fn healthy_count(&self) -> usize {
        self.lock().healthy.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Arc;
    use std::thread;

    fn registry(n: u16) -> BackendRegistry {
        BackendRegistry::new((0..n).map(|i| Backend::new("127.0.0.1", 8080 + i)))
    }

    #[test]
    fn rotation_has_period_n() {
        let state = RoutingState::new(registry(3), true);

        let picks: Vec<Backend> = (0..9).map(|_| state.select().unwrap()).collect();
        let first_cycle = &picks[0..3];

        let distinct: HashSet<&Backend> = first_cycle.iter().collect();
        assert_eq!(distinct.len(), 3);
        assert_eq!(&picks[3..6], first_cycle);
        assert_eq!(&picks[6..9], first_cycle);
    }

    #[test]
    fn empty_healthy_set_selects_none_until_recovery() {
        let state = RoutingState::new(registry(2), false);
        for _ in 0..5 {
            assert!(state.select().is_none());
        }

        let b = Backend::new("127.0.0.1", 8081);
        assert_eq!(state.record_probe(&b, true), Some(HealthTransition::BecameHealthy));
        assert_eq!(state.select(), Some(b.clone()));
        assert_eq!(state.select(), Some(b));
    }

    #[test]
    fn probe_results_report_transitions_once() {
        let state = RoutingState::new(registry(2), true);
        let b = Backend::new("127.0.0.1", 8080);

        assert_eq!(state.record_probe(&b, true), None);
        assert_eq!(state.record_probe(&b, false), Some(HealthTransition::BecameUnhealthy));
        assert_eq!(state.record_probe(&b, false), None);
        assert!(!state.is_healthy(&b));
        assert_eq!(state.record_probe(&b, true), Some(HealthTransition::BecameHealthy));
        assert!(state.is_healthy(&b));
    }

    #[test]
    fn unregistered_backend_never_enters_healthy_set() {
        let state = RoutingState::new(registry(1), false);
        let stranger = Backend::new("10.0.0.1", 80);

        assert_eq!(state.record_probe(&stranger, true), None);
        assert_eq!(state.healthy_count(), 0);
        assert!(state.select().is_none());
    }

    #[test]
    fn unhealthy_backend_is_skipped() {
        let state = RoutingState::new(registry(3), true);
        let down = Backend::new("127.0.0.1", 8081);
        state.record_probe(&down, false);

        let picks: Vec<Backend> = (0..6).map(|_| state.select().unwrap()).collect();
        assert!(picks.iter().all(|b| *b != down));
        assert_ne!(picks[0], picks[1]);
        assert_eq!(picks[0], picks[2]);
        assert_eq!(state.healthy_snapshot().len(), 2);
    }

    #[test]
    fn shrinking_set_keeps_cursor_in_range() {
        let state = RoutingState::new(registry(3), true);
        state.select();
        state.select();

        for port in [8080, 8081] {
            state.record_probe(&Backend::new("127.0.0.1", port), false);
        }
        assert_eq!(state.select(), Some(Backend::new("127.0.0.1", 8082)));
    }

    #[test]
    fn concurrent_selection_is_evenly_spread() {
        let state = Arc::new(RoutingState::new(registry(4), true));
        let per_thread = 250;

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let state = Arc::clone(&state);
                thread::spawn(move || {
                    (0..per_thread)
                        .map(|_| state.select().unwrap())
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut counts: HashMap<Backend, usize> = HashMap::new();
        for handle in handles {
            for backend in handle.join().unwrap() {
                *counts.entry(backend).or_default() += 1;
            }
        }

        // 2000 selections over 4 backends under mutual exclusion: exactly 500 each.
        assert_eq!(counts.len(), 4);
        assert!(counts.values().all(|&c| c == 500));
    }
}
