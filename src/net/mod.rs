//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Startup
//!     → listener.rs (bind with backlog, fatal on failure)
//!
//! Incoming TCP connection
//!     → listener.rs (accept, connection limits for the cooperative model)
//!     → connection.rs (ID, lifecycle tracking)
//!     → Hand off to the proxy layer
//! ```
//!
//! # Design Decisions
//! - One bind path for both execution models (socket2, explicit backlog)
//! - Each connection tracked for graceful shutdown

pub mod connection;
pub mod listener;

pub use connection::{ConnectionGuard, ConnectionId, ConnectionTracker};
pub use listener::{bind, BoundedListener, ConnectionPermit, ListenerError};
