//! 作业执行接口
//!
//! 引擎通过 [`JobFactory`] 为每次执行创建全新的 [`Job`] 实例，
//! 同一作业定义的多次执行之间不共享状态。
//!
//! ## 幂等性
//!
//! 引擎只保证同一时刻最多一个节点持有触发器的执行锁，不保证副作用恰好执行一次。
//! 如果持有者在执行中途失去租约（进程崩溃、长时间停顿、未及时续租），
//! 其他节点会从头重新执行该触发器。非幂等的作业需要作者自己处理重复执行，
//! 例如在副作用前检查目标状态，或者把进度写进触发器数据并在重入时跳过已完成的部分。

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use crate::models::{JobDefinition, JobTrigger, JobUpdate};
use crate::traits::JobTriggerStore;
use crate::SchedulerResult;

/// 可执行的作业
///
/// 返回 `Err` 与 panic 一样被引擎捕获，触发器进入 ERROR 并记录错误消息。
/// 引擎不设置超时：长时间运行的作业应当定期上报进度并检查取消标记。
#[async_trait]
pub trait Job: Send + Sync {
    async fn execute(&self, ctx: &JobExecutionContext) -> SchedulerResult<JobUpdate>;
}

/// 按作业定义创建作业实例
pub trait JobFactory: Send + Sync {
    fn create(&self, definition: &JobDefinition) -> SchedulerResult<Box<dyn Job>>;
}

/// 作业类型到工厂的映射
pub type JobFactoryMap = HashMap<String, Arc<dyn JobFactory>>;

struct FnJobFactory<F> {
    make: F,
}

impl<F, J> JobFactory for FnJobFactory<F>
where
    F: Fn() -> J + Send + Sync,
    J: Job + 'static,
{
    fn create(&self, _definition: &JobDefinition) -> SchedulerResult<Box<dyn Job>> {
        Ok(Box::new((self.make)()))
    }
}

/// 用构造函数创建工厂，忽略作业定义
pub fn job_factory<F, J>(make: F) -> Arc<dyn JobFactory>
where
    F: Fn() -> J + Send + Sync + 'static,
    J: Job + 'static,
{
    Arc::new(FnJobFactory { make })
}

/// 作业执行上下文
///
/// 取消检查和进度上报都直接访问存储，调用频率由作业自行控制。
#[derive(Clone)]
pub struct JobExecutionContext {
    pub trigger: JobTrigger,
    pub definition: JobDefinition,
    pub node_id: String,
    store: Arc<dyn JobTriggerStore>,
    running: Arc<AtomicBool>,
}

impl JobExecutionContext {
    pub fn new(
        trigger: JobTrigger,
        definition: JobDefinition,
        node_id: impl Into<String>,
        store: Arc<dyn JobTriggerStore>,
        running: Arc<AtomicBool>,
    ) -> Self {
        Self {
            trigger,
            definition,
            node_id: node_id.into(),
            store,
            running,
        }
    }

    pub fn trigger_id(&self) -> &str {
        &self.trigger.id
    }

    /// 查询外部设置的取消标记，读取失败时视为未取消
    pub async fn is_cancelled(&self) -> bool {
        match self.store.is_cancelled(&self.trigger.id).await {
            Ok(cancelled) => cancelled,
            Err(e) => {
                warn!("读取触发器 {} 的取消标记失败: {}", self.trigger.id, e);
                false
            }
        }
    }

    /// 上报进度百分比
    pub async fn update_progress(&self, progress: i32) {
        if let Err(e) = self
            .store
            .update_progress(&self.trigger.id, &self.node_id, progress)
            .await
        {
            warn!("更新触发器 {} 的进度失败: {}", self.trigger.id, e);
        }
    }

    /// 按完成数量上报进度，`total <= 0` 时忽略
    pub async fn update_progress_of(&self, total: i64, completed: i64) {
        if total <= 0 {
            return;
        }
        let percent = ((completed as f64 / total as f64) * 100.0).round();
        self.update_progress(percent.clamp(i32::MIN as f64, i32::MAX as f64) as i32)
            .await;
    }

    /// 调度器是否仍在运行，关闭期间返回 false
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for JobExecutionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobExecutionContext")
            .field("trigger_id", &self.trigger.id)
            .field("job_type", &self.trigger.job_definition_type)
            .field("node_id", &self.node_id)
            .finish()
    }
}
