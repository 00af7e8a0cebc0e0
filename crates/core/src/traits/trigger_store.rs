//! 触发器存储接口
//!
//! 集群共享的触发器仓储抽象。所有节点通过同一个存储协调，不存在中心协调者，
//! 因此每个会改变锁状态的操作都必须是针对共享持久层的原子条件更新。
//!
//! ## 锁协议
//!
//! 1. `find_runnable` 只是候选列表，返回的触发器可能在下一刻被其他节点锁定
//! 2. `acquire_lock` 以比较交换语义加锁：只有触发器此刻仍可运行时才成功，
//!    竞争失败返回 `false`，绝不静默覆盖
//! 3. `release_lock_and_update` 只有调用者仍持有锁时才写入，
//!    租约已被其他节点回收时返回 `false`
//! 4. 持有者崩溃不释放锁时，依靠租约过期让其他节点回收
//!
//! ## 使用示例
//!
//! ```rust,ignore
//! use scheduler_core::traits::JobTriggerStore;
//! use scheduler_core::models::{JobTriggerUpdate, TriggerNamespace};
//!
//! async fn poll_once(store: &dyn JobTriggerStore, node_id: &str) -> SchedulerResult<()> {
//!     let now = chrono::Utc::now();
//!     let candidates = store
//!         .find_runnable(node_id, &TriggerNamespace::All, now, 4)
//!         .await?;
//!
//!     for trigger in candidates {
//!         let lease = now + chrono::Duration::minutes(5);
//!         if !store.acquire_lock(&trigger.id, node_id, lease).await? {
//!             continue; // 其他节点抢先
//!         }
//!         // ... 执行作业
//!         store
//!             .release_lock_and_update(&trigger.id, node_id, &JobTriggerUpdate::without_next_time())
//!             .await?;
//!     }
//!     Ok(())
//! }
//! ```

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::models::{JobTrigger, JobTriggerUpdate, TriggerNamespace};
use crate::SchedulerResult;

/// 触发器存储
///
/// 实现持有自己的时钟，用于判断租约是否过期以及记录更新时间。
#[async_trait]
pub trait JobTriggerStore: Send + Sync {
    /// 创建触发器
    ///
    /// 调度配置在此处校验（非正间隔、无效CRON），而不是在执行时。
    /// ID已存在时返回 `DuplicateTrigger`。
    async fn create(&self, trigger: &JobTrigger) -> SchedulerResult<JobTrigger>;

    async fn get(&self, trigger_id: &str) -> SchedulerResult<Option<JobTrigger>>;

    async fn all(&self) -> SchedulerResult<Vec<JobTrigger>>;

    /// 删除触发器，返回是否存在
    async fn delete(&self, trigger_id: &str) -> SchedulerResult<bool>;

    /// 查找可运行的触发器
    ///
    /// 返回此刻能被 `node_id` 锁定的触发器（见 [`JobTrigger::is_runnable_at`]），
    /// 限定在 `namespace` 内，按 `next_time` 从早到晚排序，最多 `limit` 个。
    async fn find_runnable(
        &self,
        node_id: &str,
        namespace: &TriggerNamespace,
        now: DateTime<Utc>,
        limit: usize,
    ) -> SchedulerResult<Vec<JobTrigger>>;

    /// 加锁
    ///
    /// 成功时触发器进入 RUNNING，锁持有者为 `node_id`，并记录 `triggered_at`。
    async fn acquire_lock(
        &self,
        trigger_id: &str,
        node_id: &str,
        lease_expiry: DateTime<Utc>,
    ) -> SchedulerResult<bool>;

    /// 写回执行结果并释放锁
    ///
    /// 只有 `node_id` 仍持有锁且状态为 RUNNING 时才写入。
    async fn release_lock_and_update(
        &self,
        trigger_id: &str,
        node_id: &str,
        update: &JobTriggerUpdate,
    ) -> SchedulerResult<bool>;

    /// 更新进度，超出 [0, 100] 的值被截断；调用者不再持有锁时不写入
    async fn update_progress(
        &self,
        trigger_id: &str,
        node_id: &str,
        progress: i32,
    ) -> SchedulerResult<()>;

    async fn is_cancelled(&self, trigger_id: &str) -> SchedulerResult<bool>;

    /// 设置取消标记，返回触发器是否存在
    async fn cancel(&self, trigger_id: &str) -> SchedulerResult<bool>;

    /// 为该节点所有运行中的触发器续租
    async fn refresh_leases(
        &self,
        node_id: &str,
        lease_expiry: DateTime<Utc>,
    ) -> SchedulerResult<u64>;

    /// 把该节点上次异常退出遗留的 RUNNING 触发器恢复为 RUNNABLE
    async fn force_release_owned(&self, node_id: &str) -> SchedulerResult<u64>;

    /// 删除在 `cutoff` 之前结束的一次性触发器（COMPLETE 或 CANCELLED，且未加锁）
    async fn delete_completed_once_older_than(
        &self,
        cutoff: DateTime<Utc>,
    ) -> SchedulerResult<u64>;

    /// 统计某个作业类型在集群中正在运行（租约未过期）的触发器数量
    async fn count_running(&self, job_type: &str, now: DateTime<Utc>) -> SchedulerResult<u64>;

    /// 按作业类型统计逾期未执行的触发器数量
    async fn count_overdue(
        &self,
        namespace: &TriggerNamespace,
        now: DateTime<Utc>,
    ) -> SchedulerResult<HashMap<String, u64>>;
}
