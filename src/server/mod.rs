//! Execution models for accepted connections.
//!
//! # Data Flow
//! ```text
//! Threaded (threaded.rs):
//!     std accept loop → WorkerPool queue (pool.rs) → worker thread
//!         → proxy::blocking::handle_connection
//!     queue full + Reject policy → 503 on the accept thread
//!
//! Cooperative (cooperative.rs):
//!     BoundedListener::accept (permit) → tokio::spawn
//!         → proxy::cooperative::handle_connection
//! ```
//!
//! # Design Decisions
//! - Both models drive the same `ProxySession`, so observable behaviour
//!   is identical; only scheduling differs
//! - Concurrency is always bounded: worker count plus queue capacity for
//!   threads, a connection semaphore for tasks
//! - Shutdown stops accepting first, then finishes in-flight sessions

pub mod cooperative;
pub mod pool;
pub mod threaded;

pub use cooperative::CooperativeServer;
pub use pool::{Rejected, WorkerPool};
pub use threaded::ThreadedServer;
