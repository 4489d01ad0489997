//! Queue worker for the order-processing chains.
//!
//! Pulls jobs from the weighted queues, runs them through the handler
//! registry (the chain orchestrator included), and settles each message
//! with the broker. A heartbeat task keeps the worker registered and
//! requeues jobs left behind by dead workers. Another task periodically
//! copies the inventory counters back onto the catalog.

pub mod app;
pub mod config;
pub mod error;
pub mod heartbeat;
pub mod pool;
pub mod reconcile;
pub mod telemetry;

pub use app::{App, build_registry, orchestrator_options};
pub use config::{Config, LedgerMode, LogFormat, QueueWeight};
pub use error::{Result, WorkerError};
pub use heartbeat::{WorkerMembership, heartbeat_period, spawn_heartbeat};
pub use pool::{Disposition, PoolOptions, WorkerPool, disposition, retry_delay};
pub use reconcile::spawn_inventory_sync;
