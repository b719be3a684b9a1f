//! Startup orchestration.
//!
//! # Responsibilities
//! - Resolve configuration from file and command line
//! - Initialize logging and metrics before anything else logs
//! - Build the routing state and bind the listener
//! - Start the health monitor and the chosen execution model
//!
//! # Design Decisions
//! - Fail fast: configuration and bind errors are fatal and reported once
//! - The listener is bound before any background work starts
//! - Both execution models share one shutdown handle; signals only trigger it

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use thiserror::Error;

use crate::config::{self, BalancerConfig, CliArgs, ConfigError, ExecutionStrategy};
use crate::health::HealthMonitor;
use crate::lifecycle::signals::{spawn_listener_waker, spawn_signal_thread};
use crate::lifecycle::Shutdown;
use crate::load_balancer::{AddressError, BackendRegistry, RoutingState};
use crate::net::{self, BoundedListener, ListenerError};
use crate::observability::{logging, metrics};
use crate::proxy::ProxyContext;
use crate::server::{CooperativeServer, ThreadedServer};

/// Fatal startup or runtime error.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("invalid backend list: {0}")]
    Backends(#[from] AddressError),

    #[error("failed to initialize logging: {0}")]
    Logging(#[from] tracing_subscriber::util::TryInitError),

    #[error("failed to start metrics exporter: {0}")]
    Metrics(#[from] metrics_exporter_prometheus::BuildError),

    #[error(transparent)]
    Listener(#[from] ListenerError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// A configured balancer with its listener bound, ready to serve.
pub struct Balancer {
    config: BalancerConfig,
    routing: Arc<RoutingState>,
    listener: std::net::TcpListener,
}

impl Balancer {
    /// Build routing state and bind the listener.
    pub fn bind(config: BalancerConfig) -> Result<Self, StartupError> {
        let registry = BackendRegistry::parse(&config.backends.addresses)?;
        let routing = Arc::new(RoutingState::new(
            registry,
            config.health_check.assume_healthy_on_start,
        ));
        let listener = net::bind(&config.listener.bind_address, config.listener.backlog)?;

        Ok(Self {
            config,
            routing,
            listener,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn routing(&self) -> Arc<RoutingState> {
        Arc::clone(&self.routing)
    }

    /// Serve until `shutdown` is triggered.
    pub fn run(self, shutdown: Shutdown) -> Result<(), StartupError> {
        tracing::info!(
            address = %self.local_addr()?,
            strategy = ?self.config.runtime.strategy,
            backends = self.routing.registry().len(),
            healthy = self.routing.healthy_count(),
            "Balancer starting"
        );

        match self.config.runtime.strategy {
            ExecutionStrategy::Threaded => self.run_threaded(shutdown),
            ExecutionStrategy::Cooperative => self.run_cooperative(shutdown),
        }
    }

    fn run_threaded(self, shutdown: Shutdown) -> Result<(), StartupError> {
        let addr = self.local_addr()?;
        let monitor = HealthMonitor::new(self.routing(), self.config.health_check.clone())
            .spawn_blocking(shutdown.clone())?;
        let waker = spawn_listener_waker(shutdown.clone(), addr)?;

        let ctx = ProxyContext::new(self.routing(), self.config.proxy.clone());
        let server = ThreadedServer::new(self.listener, ctx, self.config.runtime.clone());
        let result = server.run(shutdown.clone());

        // Also releases the helper threads if the server failed on its own.
        shutdown.trigger();
        join("health monitor", monitor);
        join("listener waker", waker);
        result.map_err(StartupError::from)
    }

    fn run_cooperative(self, shutdown: Shutdown) -> Result<(), StartupError> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;

        let routing = self.routing();
        let health = self.config.health_check.clone();
        let ctx = ProxyContext::new(self.routing(), self.config.proxy.clone());
        let drain = Duration::from_secs(self.config.runtime.drain_timeout_secs);
        let max_connections = self.config.listener.max_connections;
        let listener = self.listener;

        runtime.block_on(async move {
            let listener = BoundedListener::from_std(listener, max_connections)?;
            let server = CooperativeServer::new(listener, ctx, drain);
            let monitor = tokio::spawn(HealthMonitor::new(routing, health).run(shutdown.subscribe()));

            let result = server.run(shutdown.subscribe()).await;

            shutdown.trigger();
            if let Err(e) = monitor.await {
                tracing::error!(error = %e, "Health monitor task failed");
            }
            result.map_err(StartupError::from)
        })
    }
}

fn join(name: &str, handle: JoinHandle<()>) {
    if handle.join().is_err() {
        tracing::error!(thread = name, "Background thread panicked");
    }
}

/// Run the balancer process: configure, bind, serve until a signal arrives.
pub fn run(cli: CliArgs) -> Result<(), StartupError> {
    let config = config::resolve(&cli)?;

    logging::init(&config.observability.log_level)?;
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "tcp-balancer starting");
    tracing::info!(
        bind_address = %config.listener.bind_address,
        backends = ?config.backends.addresses,
        interval_secs = config.health_check.interval_secs,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        // Validation has already checked the address.
        if let Ok(addr) = config.observability.metrics_address.parse() {
            metrics::init_metrics(addr)?;
        }
    }

    let balancer = Balancer::bind(config).inspect_err(|e| {
        tracing::error!(error = %e, "Startup failed");
    })?;

    let shutdown = Shutdown::new();
    // Left running; the process exits once `run` returns.
    spawn_signal_thread(shutdown.clone())?;
    balancer.run(shutdown)?;

    tracing::info!("Shutdown complete");
    Ok(())
}
