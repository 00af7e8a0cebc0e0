pub mod definition_store;
pub mod job;
pub mod lifecycle;
pub mod trigger_store;

pub use definition_store::*;
pub use job::*;
pub use lifecycle::*;
pub use trigger_store::*;
