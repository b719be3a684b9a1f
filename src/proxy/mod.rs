//! Per-connection proxying.
//!
//! # Data Flow
//! ```text
//! Accepted client socket
//!     → framing.rs (read until head + Content-Length body)
//!     → RoutingState::select
//!         None → response.rs 503 → close
//!     → connect backend (fresh connection per request)
//!     → write request, shut down backend write side
//!     → relay backend bytes until EOF
//!     → close both sockets
//! Failure before first relayed byte → response.rs 502
//! ```
//!
//! # Design Decisions
//! - session.rs owns the state machine; blocking.rs and cooperative.rs only do I/O
//! - Sockets are owned by the driver function, so every exit path closes them
//! - No error escapes a handler into the accept loop

pub mod blocking;
pub mod cooperative;
pub mod error;
pub mod framing;
pub mod response;
pub mod session;

use std::sync::Arc;

use crate::config::ProxySettings;
use crate::load_balancer::RoutingState;

pub use error::ProxyError;
pub use framing::{FrameStatus, FramingError, RequestBuffer, RequestFramer};
pub use session::{Outcome, ProxySession, SessionState};

/// Everything a connection handler needs, shared by all handlers.
#[derive(Debug, Clone)]
pub struct ProxyContext {
    pub routing: Arc<RoutingState>,
    pub settings: ProxySettings,
}

impl ProxyContext {
    pub fn new(routing: Arc<RoutingState>, settings: ProxySettings) -> Self {
        Self { routing, settings }
    }

    pub(crate) fn request_buffer(&self) -> RequestBuffer {
        RequestBuffer::new(
            self.settings.max_header_bytes,
            self.settings.max_body_bytes,
            self.settings.read_buffer_bytes,
        )
    }
}
