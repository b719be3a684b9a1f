//! Round-robin TCP load balancer with active health checks.
//!
//! # Architecture Overview
//!
//! ```text
//!                      ┌──────────────────────────────────────────────────────┐
//!                      │                    TCP BALANCER                       │
//!                      │                                                       │
//!   Client request     │  ┌──────────┐    ┌──────────┐    ┌───────────────┐    │
//!   ───────────────────┼─▶│   net    │───▶│  server  │───▶│     proxy     │────┼──▶ Backend
//!                      │  │ listener │    │ threaded │    │ frame, select │    │
//!                      │  └──────────┘    │   or     │    │ connect, relay│    │
//!   Client response    │                  │cooperative    └───────┬───────┘    │
//!   ◀──────────────────┼──────────────────┴──────────┘◀───────────┘            │
//!                      │                                    ▲                  │
//!                      │                          ┌─────────┴────────┐         │
//!                      │                          │  load_balancer   │         │
//!                      │                          │ healthy set + RR │         │
//!                      │                          └─────────▲────────┘         │
//!                      │                                    │                  │
//!                      │                          ┌─────────┴────────┐         │
//!                      │                          │  health monitor  │─────────┼──▶ GET /health
//!                      │                          └──────────────────┘         │
//!                      │                                                       │
//!                      │  config · lifecycle (startup, signals, shutdown)      │
//!                      │  observability (tracing, prometheus)                  │
//!                      └──────────────────────────────────────────────────────┘
//! ```

use std::process::ExitCode;

use clap::Parser;

use tcp_balancer::config::CliArgs;
use tcp_balancer::lifecycle::startup;

fn main() -> ExitCode {
    match startup::run(CliArgs::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("tcp-balancer: {e}");
            ExitCode::FAILURE
        }
    }
}
