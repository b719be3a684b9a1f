//! Command-line arguments.

use std::path::PathBuf;

use clap::Parser;

use crate::config::schema::{BalancerConfig, ExecutionStrategy};

/// Command-line arguments for the load balancer
#[derive(Parser, Debug, Default)]
#[command(name = "tcp-balancer")]
#[command(version)]
#[command(about = "Round-robin TCP load balancer with active health checks", long_about = None)]
pub struct CliArgs {
    /// Health check period in whole seconds; values below 1 are raised to 1
    #[arg(allow_negative_numbers = true)]
    pub period: Option<i64>,

    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Address to bind to (e.g., 127.0.0.1:9090)
    #[arg(short = 'l', long)]
    pub listen: Option<String>,

    /// Execution strategy for accepted connections
    #[arg(short, long, value_enum)]
    pub strategy: Option<ExecutionStrategy>,

    /// Number of worker threads (threaded strategy)
    #[arg(short, long)]
    pub workers: Option<usize>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    pub log_level: Option<String>,
}

impl CliArgs {
    /// Overlay explicitly given arguments onto `config`.
    pub fn apply(&self, config: &mut BalancerConfig) {
        if let Some(period) = self.period {
            config.health_check.interval_secs = period.max(1).unsigned_abs();
        }
        if let Some(listen) = &self.listen {
            config.listener.bind_address = listen.clone();
        }
        if let Some(strategy) = self.strategy {
            config.runtime.strategy = strategy;
        }
        if let Some(workers) = self.workers {
            config.runtime.workers = workers;
        }
        if let Some(level) = &self.log_level {
            config.observability.log_level = level.clone();
        }
    }
}
