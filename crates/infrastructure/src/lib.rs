pub mod database;
pub mod in_memory_store;
pub mod observability;

pub use database::*;
pub use in_memory_store::{InMemoryJobDefinitionStore, InMemoryTriggerStore};
pub use observability::*;
