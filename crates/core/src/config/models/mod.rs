pub mod app_config;
pub mod database;
pub mod node_observability;
pub mod scheduler;

pub use app_config::AppConfig;
pub use database::DatabaseConfig;
pub use node_observability::{default_node_id, NodeConfig, ObservabilityConfig};
pub use scheduler::{CleanupConfig, SchedulerConfig};
