//! Round-robin load balancing strategy.

use crate::load_balancer::{backend::Backend, LoadBalancer};

/// Round-robin selector.
///
/// Stateless: the rotation cursor lives in `RoutingState` so that it is read
/// and advanced under the same lock as the healthy-set snapshot.
#[derive(Debug, Default, Clone, Copy)]
pub struct RoundRobin;

impl RoundRobin {
    pub fn new() -> Self {
        Self
    }
}

impl LoadBalancer for RoundRobin {
    fn next_server(&self, snapshot: &[Backend], cursor: &mut usize) -> Option<Backend> {
        if snapshot.is_empty() {
            return None;
        }

        // The set may have shrunk since the last call; reduce against the
        // current snapshot only.
        let len = snapshot.len();
        let index = *cursor % len;
        *cursor = (index + 1) % len;
        Some(snapshot[index].clone())
    }
}
