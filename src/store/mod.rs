//! SQLite persistence layer
//!
//! Three stores share one database file (WAL mode allows concurrent
//! readers): operational data, long-term agent memory, and job records.

pub mod inventory_db;
pub mod jobs_db;
pub mod memory_db;

pub use inventory_db::InventoryStore;
pub use jobs_db::{JobRecord, JobStore};
pub use memory_db::MemoryStore;
