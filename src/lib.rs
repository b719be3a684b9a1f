//! Round-robin TCP load balancer library.

pub mod config;
pub mod health;
pub mod lifecycle;
pub mod load_balancer;
pub mod net;
pub mod observability;
pub mod proxy;
pub mod server;

pub use config::BalancerConfig;
pub use lifecycle::startup::{Balancer, StartupError};
pub use lifecycle::Shutdown;
