//! Active health checking.
//!
//! # Responsibilities
//! - Periodically probe every registered backend
//! - Update the shared healthy set and log transitions

use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crate::config::HealthCheckConfig;
use crate::health::probe::{self, HttpProbe, ProbeError};
use crate::lifecycle::{Shutdown, ShutdownSignal};
use crate::load_balancer::{Backend, HealthTransition, RoutingState};
use crate::observability::metrics;

pub struct HealthMonitor {
    routing: Arc<RoutingState>,
    config: HealthCheckConfig,
    http: HttpProbe,
}

impl HealthMonitor {
    pub fn new(routing: Arc<RoutingState>, config: HealthCheckConfig) -> Self {
        Self {
            routing,
            config,
            http: HttpProbe::new(),
        }
    }

    /// Run cycles on the current async runtime until shutdown.
    pub async fn run(self, mut shutdown: ShutdownSignal) {
        tracing::info!(
            interval = self.config.interval().as_secs(),
            path = %self.config.path,
            backends = self.routing.registry().len(),
            "Health monitor starting"
        );

        loop {
            tokio::select! {
                _ = self.check_all() => {}
                _ = shutdown.recv() => {
                    tracing::info!("Health monitor received shutdown signal, abandoning cycle");
                    break;
                }
            }
            tokio::select! {
                _ = tokio::time::sleep(self.config.interval()) => {}
                _ = shutdown.recv() => {
                    tracing::info!("Health monitor received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }

    /// Run cycles on the calling thread until shutdown.
    pub fn run_blocking(self, shutdown: Shutdown) {
        tracing::info!(
            interval = self.config.interval().as_secs(),
            path = %self.config.path,
            backends = self.routing.registry().len(),
            "Health monitor starting"
        );

        loop {
            self.check_all_blocking();
            if shutdown.wait_timeout(self.config.interval()) {
                tracing::info!("Health monitor received shutdown signal, exiting loop");
                break;
            }
        }
    }

    /// Start [`run_blocking`](Self::run_blocking) on a dedicated thread.
    pub fn spawn_blocking(self, shutdown: Shutdown) -> io::Result<JoinHandle<()>> {
        thread::Builder::new()
            .name("lb-health".into())
            .spawn(move || self.run_blocking(shutdown))
    }

    /// One pass over all backends, probing asynchronously.
    pub async fn check_all(&self) {
        for backend in self.routing.registry().iter() {
            let result = self
                .http
                .check(backend, &self.config.path, self.config.timeout())
                .await;
            self.apply(backend, result);
        }
    }

    /// One pass over all backends, probing with blocking sockets.
    pub fn check_all_blocking(&self) {
        for backend in self.routing.registry().iter() {
            let result = probe::probe_blocking(backend, &self.config.path, self.config.timeout());
            self.apply(backend, result);
        }
    }

    fn apply(&self, backend: &Backend, result: Result<(), ProbeError>) {
        let healthy = match result {
            Ok(()) => {
                tracing::debug!(backend = %backend, "Health check passed");
                true
            }
            Err(e) => {
                tracing::debug!(backend = %backend, error = %e, "Health check failed");
                metrics::record_probe_failure(backend);
                false
            }
        };

        match self.routing.record_probe(backend, healthy) {
            Some(HealthTransition::BecameHealthy) => {
                tracing::info!(backend = %backend, "Backend marked healthy");
            }
            Some(HealthTransition::BecameUnhealthy) => {
                tracing::warn!(backend = %backend, "Backend marked unhealthy");
            }
            None => {}
        }
    }
}
