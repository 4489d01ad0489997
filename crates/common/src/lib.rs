//! Identifier types shared across the order-processing crates.

pub mod types;

pub use types::{ChainId, InventoryId, JobId, OrderId, ProductId};
