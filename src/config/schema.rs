//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the balancer.
//! All types derive Serde traits for deserialization from config files.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Root configuration for the load balancer.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct BalancerConfig {
    /// Listener configuration (bind address, backlog).
    pub listener: ListenerConfig,

    /// Backend server addresses, in registration order.
    pub backends: BackendsConfig,

    /// Health check settings.
    pub health_check: HealthCheckConfig,

    /// Per-connection proxy settings.
    pub proxy: ProxySettings,

    /// Execution strategy and worker pool settings.
    pub runtime: RuntimeConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "127.0.0.1:9090").
    pub bind_address: String,

    /// Pending-connection queue length passed to listen(2).
    pub backlog: u32,

    /// Maximum concurrent connections (cooperative strategy backpressure).
    pub max_connections: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1:9090".to_string(),
            backlog: 100,
            max_connections: 10_000,
        }
    }
}

/// Backend server list.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BackendsConfig {
    /// Backend addresses (e.g., "127.0.0.1:8080").
    pub addresses: Vec<String>,
}

impl Default for BackendsConfig {
    fn default() -> Self {
        Self {
            addresses: vec![
                "127.0.0.1:8080".to_string(),
                "127.0.0.1:8081".to_string(),
                "127.0.0.1:8082".to_string(),
            ],
        }
    }
}

/// Health check configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HealthCheckConfig {
    /// Pause between probe cycles in seconds (minimum 1).
    pub interval_secs: u64,

    /// Per-probe timeout in seconds.
    pub timeout_secs: u64,

    /// Path to probe for HTTP health checks.
    pub path: String,

    /// Seed the healthy set with every backend before the first cycle.
    pub assume_healthy_on_start: bool,
}

impl HealthCheckConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs.max(1))
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            interval_secs: 10,
            timeout_secs: 5,
            path: "/health".to_string(),
            assume_healthy_on_start: true,
        }
    }
}

/// Per-connection proxy settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ProxySettings {
    /// Size of each read from client or backend.
    pub read_buffer_bytes: usize,

    /// Largest accepted request head (request line + headers).
    pub max_header_bytes: usize,

    /// Largest accepted Content-Length.
    pub max_body_bytes: usize,

    /// Backend connect timeout in seconds.
    pub connect_timeout_secs: u64,

    /// Idle timeout for client reads in seconds. Unset means wait forever.
    pub client_idle_timeout_secs: Option<u64>,
}

impl ProxySettings {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn client_idle_timeout(&self) -> Option<Duration> {
        self.client_idle_timeout_secs.map(Duration::from_secs)
    }
}

impl Default for ProxySettings {
    fn default() -> Self {
        Self {
            read_buffer_bytes: 4096,
            max_header_bytes: 64 * 1024,
            max_body_bytes: 16 * 1024 * 1024,
            connect_timeout_secs: 5,
            client_idle_timeout_secs: None,
        }
    }
}

/// How accepted connections are executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStrategy {
    /// Bounded pool of blocking worker threads.
    #[default]
    Threaded,
    /// One task per connection on a single-threaded event loop.
    Cooperative,
}

/// What the threaded server does when the worker queue is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SaturationPolicy {
    /// Stop accepting until a queue slot frees up.
    #[default]
    Queue,
    /// Answer 503 immediately and close.
    Reject,
}

/// Execution strategy configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub strategy: ExecutionStrategy,

    /// Worker threads (threaded strategy).
    pub workers: usize,

    /// Accepted connections waiting for a worker.
    pub queue_capacity: usize,

    pub saturation: SaturationPolicy,

    /// Upper bound on draining in-flight connections at shutdown.
    pub drain_timeout_secs: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            strategy: ExecutionStrategy::Threaded,
            workers: 50,
            queue_capacity: 1024,
            saturation: SaturationPolicy::Queue,
            drain_timeout_secs: 30,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9100".to_string(),
        }
    }
}
