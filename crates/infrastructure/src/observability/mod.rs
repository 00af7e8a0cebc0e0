pub mod scheduler_metrics;
pub mod structured_logger;

pub use scheduler_metrics::SchedulerMetrics;
pub use structured_logger::StructuredLogger;
