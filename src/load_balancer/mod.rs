//! Load balancing subsystem.
//!
//! # Data Flow
//! ```text
//! Connection accepted, request framed
//!     → state.rs (lock, snapshot healthy set in registry order)
//!     → round_robin.rs (index = cursor mod len, advance cursor)
//!     → unlock, return Backend or None
//! ```
//!
//! # Design Decisions
//! - Backend set is fixed at startup (backend.rs registry); only health varies
//! - Selection and health updates share a single lock in `RoutingState`
//! - The lock is never held across socket I/O
//! - Strategy is pure: it sees a snapshot and a cursor, nothing else

pub mod backend;
pub mod round_robin;
pub mod state;

pub use backend::{AddressError, Backend, BackendRegistry};
pub use round_robin::RoundRobin;
pub use state::{HealthTransition, RoutingState};

/// A backend selection algorithm.
///
/// Implementations receive an ordered snapshot of the healthy backends and
/// the shared rotation cursor. Callers guarantee exclusive access to both.
pub trait LoadBalancer: Send + Sync + std::fmt::Debug {
    fn next_server(&self, snapshot: &[Backend], cursor: &mut usize) -> Option<Backend>;
}
