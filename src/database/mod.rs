//! Database module for discovery staging and device inventory
//!
//! Provides SQLite storage for:
//! - The discovery staging queue
//! - Devices and their classification targets
//! - Liveness history
//! - Run leases

pub mod connection;
pub mod devices;
pub mod history;
pub mod lease;
pub mod models;
pub mod queue;
pub mod savepoint;
pub mod schema;

pub use connection::Database;
pub use devices::*;
pub use history::*;
pub use models::*;
pub use queue::*;
pub use savepoint::with_savepoint;
