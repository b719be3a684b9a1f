//! Backend abstraction.
//!
//! # Responsibilities
//! - Represent a single backend server by its (host, port) identity
//! - Parse backend addresses from configuration
//! - Hold the fixed, ordered registry of configured backends

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use thiserror::Error;

/// A single backend server.
///
/// Identity is the `(host, port)` pair; equality and hashing follow it.
/// Cloning is cheap (the host is reference counted).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Backend {
    host: Arc<str>,
    port: u16,
}

impl Backend {
    /// Create a new backend.
    pub fn new(host: impl Into<Arc<str>>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Host name or IP literal (IPv6 without brackets).
    pub fn host(&self) -> &str {
        &self.host
    }

    /// TCP port.
    pub fn port(&self) -> u16 {
        self.port
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

/// Error returned when a backend address cannot be parsed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AddressError {
    #[error("missing port in backend address '{0}'")]
    MissingPort(String),

    #[error("invalid port in backend address '{0}'")]
    InvalidPort(String),

    #[error("empty host in backend address '{0}'")]
    EmptyHost(String),
}

impl FromStr for Backend {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (host, port) = s
            .rsplit_once(':')
            .ok_or_else(|| AddressError::MissingPort(s.to_string()))?;

        let host = host
            .strip_prefix('[')
            .and_then(|h| h.strip_suffix(']'))
            .unwrap_or(host);
        if host.is_empty() {
            return Err(AddressError::EmptyHost(s.to_string()));
        }

        let port: u16 = port
            .parse()
            .map_err(|_| AddressError::InvalidPort(s.to_string()))?;
        if port == 0 {
            return Err(AddressError::InvalidPort(s.to_string()));
        }

        Ok(Backend::new(host, port))
    }
}

/// The fixed, ordered list of configured backends.
///
/// Built once at startup; never mutated afterwards.
#[derive(Debug, Clone, Default)]
pub struct BackendRegistry {
    backends: Vec<Backend>,
}

impl BackendRegistry {
    /// Build a registry, dropping duplicates while keeping first-seen order.
    pub fn new(backends: impl IntoIterator<Item = Backend>) -> Self {
        let mut ordered: Vec<Backend> = Vec::new();
        for backend in backends {
            if !ordered.contains(&backend) {
                ordered.push(backend);
            }
        }
        Self { backends: ordered }
    }

    /// Parse every address, failing on the first invalid one.
    pub fn parse<S: AsRef<str>>(addresses: &[S]) -> Result<Self, AddressError> {
        let backends = addresses
            .iter()
            .map(|a| a.as_ref().parse())
            .collect::<Result<Vec<Backend>, _>>()?;
        Ok(Self::new(backends))
    }

    pub fn contains(&self, backend: &Backend) -> bool {
        self.backends.contains(backend)
    }

    /// Backends in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &Backend> {
        self.backends.iter()
    }

    pub fn len(&self) -> usize {
        self.backends.len()
    }

    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }
}
