//! Health checking subsystem.
//!
//! # Data Flow
//! ```text
//! Active health checks (active.rs):
//!     Cycle start
//!     → probe.rs: GET <path> to each backend, in registration order
//!     → RoutingState::record_probe (add / remove from healthy set)
//!     → log transitions
//!     → sleep one interval (interruptible by shutdown)
//! ```
//!
//! # Design Decisions
//! - One probe failing never aborts the cycle
//! - Any error (timeout, refused, non-200, garbage) counts as unhealthy
//! - Probe success = a complete `HTTP/1.x` response head with status 200
//! - The async monitor probes through a hyper client, the blocking one
//!   parses the head with httparse; both share the state updates

pub mod active;
pub mod probe;

pub use active::HealthMonitor;
pub use probe::{HttpProbe, ProbeError};
