//! Infrastructure layer: inventory storage backends, mirrors, replication, config.

pub mod config;
pub mod mirror;
pub mod replication;
pub mod store;


pub use config::{Config, ConfigError, DatabaseBackend, MirrorTarget};
pub use store::{DeleteOutcome, InventoryStore, StoreError};
