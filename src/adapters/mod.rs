//! Adapters for external systems.

pub mod memory;
pub mod mock;
pub mod oracle;
pub mod retrieval;
pub mod sqlite;
