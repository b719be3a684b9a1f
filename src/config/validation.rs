//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate backend addresses and detect duplicates
//! - Validate value ranges (timeouts > 0, workers > 0)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: BalancerConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::collections::HashSet;
use std::net::SocketAddr;

use thiserror::Error;

use crate::config::schema::BalancerConfig;
use crate::load_balancer::{AddressError, Backend};

/// Smallest header limit that still fits a minimal request line.
const MIN_HEADER_BYTES: usize = 16;

/// A single semantic problem with the configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("no backends configured")]
    NoBackends,

    #[error("invalid backend: {0}")]
    InvalidBackend(#[from] AddressError),

    #[error("duplicate backend '{0}'")]
    DuplicateBackend(String),

    #[error("invalid bind address '{0}'")]
    InvalidBindAddress(String),

    #[error("invalid metrics address '{0}'")]
    InvalidMetricsAddress(String),

    #[error("{0} must be at least {1}")]
    TooSmall(&'static str, u64),
}

/// Check every semantic rule and collect all failures.
pub fn validate_config(config: &BalancerConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.backends.addresses.is_empty() {
        errors.push(ValidationError::NoBackends);
    }

    let mut seen = HashSet::new();
    for address in &config.backends.addresses {
        match address.parse::<Backend>() {
            Ok(backend) => {
                if !seen.insert(backend) {
                    errors.push(ValidationError::DuplicateBackend(address.clone()));
                }
            }
            Err(e) => errors.push(e.into()),
        }
    }

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::InvalidBindAddress(
            config.listener.bind_address.clone(),
        ));
    }

    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::InvalidMetricsAddress(
            config.observability.metrics_address.clone(),
        ));
    }

    let minimums: [(&'static str, u64, u64); 7] = [
        ("listener.backlog", config.listener.backlog as u64, 1),
        ("listener.max_connections", config.listener.max_connections as u64, 1),
        ("health_check.timeout_secs", config.health_check.timeout_secs, 1),
        ("proxy.connect_timeout_secs", config.proxy.connect_timeout_secs, 1),
        ("proxy.read_buffer_bytes", config.proxy.read_buffer_bytes as u64, 1),
        ("proxy.max_header_bytes", config.proxy.max_header_bytes as u64, MIN_HEADER_BYTES as u64),
        ("runtime.workers", config.runtime.workers as u64, 1),
    ];
    for (field, value, min) in minimums {
        if value < min {
            errors.push(ValidationError::TooSmall(field, min));
        }
    }

    if config.proxy.client_idle_timeout_secs == Some(0) {
        errors.push(ValidationError::TooSmall("proxy.client_idle_timeout_secs", 1));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
