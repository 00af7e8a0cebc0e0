pub mod clock;
pub mod config;
pub mod errors;
pub mod logging;
pub mod models;
pub mod traits;

pub use clock::{JobSchedulerClock, SystemClock, TestClock};
pub use errors::SchedulerError;

/// 统一的Result类型
pub type SchedulerResult<T> = std::result::Result<T, SchedulerError>;
