//! 调度服务
//!
//! 作业执行引擎、命名调度服务，以及系统作业的提交入口和内置清理作业。

pub mod cleanup_job;
pub mod eligibility;
pub mod engine;
pub mod service;
pub mod system_job_manager;

pub use cleanup_job::{TriggerCleanupConfig, TriggerCleanupJob};
pub use eligibility::{always_eligible, leader_only, EligibilityPredicate};
pub use engine::{EngineComponents, JobExecutionEngine};
pub use service::JobSchedulerService;
pub use system_job_manager::{SystemJobInfo, SystemJobManager};
