//! # 数据模型
//!
//! 作业调度核心的数据结构：作业定义、触发器、调度描述和执行结果。
//!
//! ## 核心模型
//!
//! ### JobDefinition - 作业定义
//! 一类工作的类型和配置模板。系统作业不持久化定义，按作业类型推导合成定义。
//!
//! ### JobTrigger - 触发器
//! 引擎操作的单元，携带自己的下一次执行时间、状态和租约锁。
//!
//! ### JobSchedule - 调度描述
//! 以 `type` 区分的标签联合体：一次性、固定间隔、CRON。
//!
//! ### JobUpdate / JobTriggerUpdate
//! 作业返回的执行结果，以及引擎释放锁时写回存储的变更。
//!
//! ## 状态流转
//!
//! ```text
//! RUNNABLE --(加锁并分发)--------------> RUNNING
//! RUNNING  --(Complete，有下一次)-------> RUNNABLE
//! RUNNING  --(Complete，一次性)---------> COMPLETE   [终态]
//! RUNNING  --(Retry(delay))------------> RUNNABLE   (next_time = now + delay)
//! RUNNING  --(Error)-------------------> ERROR      [终态]
//! RUNNING  --(Cancelled)---------------> CANCELLED  [终态]
//! RUNNING  --(租约过期，未释放)---------> 可被其他节点重新加锁
//! ```
//!
//! ## 不变量
//!
//! - 任意时刻同一个触发器最多只有一个未过期的锁
//! - `progress` 始终在 [0, 100] 之间
//! - 成功完成的一次性触发器不会再次被调度
//!
//! 所有时间字段使用 `DateTime<Utc>`。

pub mod job_definition;
pub mod job_trigger;
pub mod job_update;
pub mod namespace;
pub mod schedule;
pub mod trigger_update;

pub use job_definition::*;
pub use job_trigger::*;
pub use job_update::*;
pub use namespace::*;
pub use schedule::*;
pub use trigger_update::*;
