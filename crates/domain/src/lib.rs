//! 调度领域逻辑：调度策略和系统作业族

pub mod schedule;
pub mod system_job;

pub use schedule::JobScheduleStrategies;
pub use system_job::{
    SystemJob, SystemJobAdapter, SystemJobConfig, SystemJobContext, SystemJobRegistry,
    SystemJobResult,
};
