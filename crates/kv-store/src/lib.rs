//! Key-value store used for cached counters and the atomic reservation.
//!
//! The [`KeyValueStore`] trait covers plain get/set/increment/decrement
//! plus [`KeyValueStore::reserve_all`], which runs [`RESERVE_SCRIPT`]: a
//! check-then-decrement across several counters that either applies every
//! decrement or none of them. [`KeyValueStore::reserve_all_once`] and
//! [`KeyValueStore::release_all`] add a marker key to that script so a
//! repeated reservation or release for the same owner is a no-op.

pub mod error;
pub mod memory;
pub mod redis_store;
pub mod script;
pub mod store;

pub use error::{KvError, Result};
pub use memory::InMemoryKeyValueStore;
pub use redis_store::RedisKeyValueStore;
pub use script::{RELEASE_SCRIPT, RESERVE_ONCE_SCRIPT, RESERVE_SCRIPT};
pub use store::{KeyValueStore, ReservationOutcome};
