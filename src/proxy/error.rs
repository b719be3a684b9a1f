//! Proxy session errors.

use std::io;
use std::time::Duration;

use thiserror::Error;

use crate::load_balancer::Backend;
use crate::proxy::framing::FramingError;

/// Errors that end a proxy session early.
#[derive(Debug, Error)]
pub enum ProxyError {
    /// Reading the request from the client failed.
    #[error("client read failed: {0}")]
    ClientRead(io::Error),

    /// The client closed without sending anything.
    #[error("client closed before sending a request")]
    ClientClosed,

    /// The client sent nothing for the configured idle timeout.
    #[error("client idle for {0:?}")]
    ClientTimeout(Duration),

    /// The request head could not be framed.
    #[error("malformed request: {0}")]
    Malformed(#[from] FramingError),

    /// Connecting to the selected backend failed.
    #[error("connect to {backend} failed: {source}")]
    BackendConnect { backend: Backend, source: io::Error },

    /// The backend connection failed after it was established.
    #[error("backend {backend} i/o failed: {source}")]
    BackendIo { backend: Backend, source: io::Error },

    /// Relaying to the client failed (client went away).
    #[error("client write failed: {0}")]
    ClientWrite(io::Error),
}

impl ProxyError {
    /// Failures attributable to the backend; these earn a 502 when no
    /// response bytes have been relayed yet.
    pub fn is_backend_failure(&self) -> bool {
        matches!(
            self,
            ProxyError::BackendConnect { .. } | ProxyError::BackendIo { .. }
        )
    }
}

/// Read-side errors that mean the idle timeout fired.
pub(crate) fn is_timeout(e: &io::Error) -> bool {
    matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut)
}
