//! # 作业执行引擎
//!
//! 驱动触发器在集群范围内完成状态流转，同一时刻每个触发器只有一个锁持有者：
//!
//! ```text
//! RUNNABLE --(加锁成功并派发)--> RUNNING
//! RUNNING  --(Complete，调度有下一次)--> RUNNABLE
//! RUNNING  --(Complete，调度结束)------> COMPLETE
//! RUNNING  --(Retry(delay))------------> RUNNABLE (next_time = now + delay)
//! RUNNING  --(Error)-------------------> ERROR
//! RUNNING  --(Cancelled)---------------> CANCELLED
//! (RUNNING 且租约过期)------------------> 可被其他节点重新获取
//! ```
//!
//! 每轮迭代：
//!
//! 1. 首轮之前释放本节点遗留的锁（上次非正常退出）
//! 2. 按空闲槽位数查询可执行的触发器
//! 3. 逐个加锁，竞争失败直接跳过
//! 4. 解析作业工厂，未注册的类型直接置为 ERROR
//! 5. 作业类型达到集群并发上限时按递减的退避时长推迟
//! 6. 解析作业定义，定义缺失置为 ERROR，存储暂时不可用时5秒后重试
//! 7. 提交到工作池，被拒绝时原样释放
//!
//! 作业在工作池中执行，panic 和返回的错误都在这里被捕获并写回为 ERROR。
//! 根据执行结果计算下一次时间时的溢出同样写回为 ERROR，不会导致触发器永久锁定。
//! 执行过程中崩溃的节点依赖租约过期回收。

use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use futures::FutureExt;
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

use scheduler_core::config::SchedulerConfig;
use scheduler_core::models::{
    JobDefinition, JobTrigger, JobTriggerLock, JobTriggerStatus, JobTriggerUpdate, JobUpdate,
    TriggerNamespace,
};
use scheduler_core::traits::{
    Job, JobDefinitionStore, JobExecutionContext, JobFactoryMap, JobTriggerStore,
};
use scheduler_core::{JobSchedulerClock, SchedulerError, SchedulerResult};
use scheduler_domain::JobScheduleStrategies;
use scheduler_infrastructure::{SchedulerMetrics, StructuredLogger};
use scheduler_worker::JobWorkerPool;

/// 存储暂时不可用时的重试间隔
const TRANSIENT_RETRY_DELAY_SECONDS: i64 = 5;

/// 构造引擎所需的组件
pub struct EngineComponents {
    pub node_id: String,
    pub store: Arc<dyn JobTriggerStore>,
    /// 为 `None` 时所有触发器都使用按类型推导的合成定义
    pub definitions: Option<Arc<dyn JobDefinitionStore>>,
    pub clock: Arc<dyn JobSchedulerClock>,
    pub pool: Arc<JobWorkerPool>,
    pub factories: JobFactoryMap,
    pub namespace: TriggerNamespace,
}

/// 在工作池中执行作业并写回结果
///
/// 派发时整体克隆进任务，所有字段都是共享句柄。
#[derive(Clone)]
struct JobRunner {
    node_id: String,
    store: Arc<dyn JobTriggerStore>,
    clock: Arc<dyn JobSchedulerClock>,
    strategies: JobScheduleStrategies,
    metrics: SchedulerMetrics,
    completed: Arc<Notify>,
}

impl JobRunner {
    async fn run(self, job: Box<dyn Job>, ctx: JobExecutionContext) {
        let trigger = ctx.trigger.clone();
        StructuredLogger::log_execution_start(&trigger, &self.node_id);

        let started = Instant::now();
        let outcome = AssertUnwindSafe(job.execute(&ctx)).catch_unwind().await;
        let update = match outcome {
            Ok(Ok(update)) => update,
            Ok(Err(e)) => JobUpdate::Error(e.to_string()),
            Err(panic) => JobUpdate::Error(panic_message(panic.as_ref())),
        };
        let elapsed = started.elapsed();
        self.metrics.record_execution_time(elapsed.as_secs_f64());

        // 写回必须执行，结果计算中的panic也转为 ERROR
        let trigger_update =
            std::panic::catch_unwind(AssertUnwindSafe(|| self.trigger_update_for(&trigger, &update)))
                .unwrap_or_else(|panic| {
                    JobTriggerUpdate::with_error(format!(
                        "计算执行结果时发生panic: {}",
                        panic_detail(panic.as_ref())
                    ))
                });
        self.record_outcome(&trigger, &update, &trigger_update, elapsed);

        match self
            .store
            .release_lock_and_update(&trigger.id, &self.node_id, &trigger_update)
            .await
        {
            Ok(true) => {}
            Ok(false) => StructuredLogger::log_lock_lost(&trigger, &self.node_id),
            Err(e) => error!(
                "写回触发器 {} 的执行结果失败，等待租约过期后回收: {}",
                trigger.id, e
            ),
        }

        self.completed.notify_one();
    }

    fn trigger_update_for(&self, trigger: &JobTrigger, update: &JobUpdate) -> JobTriggerUpdate {
        let now = self.clock.now_utc();
        match update {
            JobUpdate::Complete => match self.strategies.next_time(trigger, now) {
                Ok(Some(next_time)) => JobTriggerUpdate::with_next_time(next_time),
                Ok(None) => JobTriggerUpdate::without_next_time(),
                Err(e) => JobTriggerUpdate::with_error(e.to_string()),
            },
            JobUpdate::Retry(delay) => match now.checked_add_signed(*delay) {
                Some(next_time) => JobTriggerUpdate::with_next_time(next_time),
                None => JobTriggerUpdate::with_error(format!("重试延迟超出时间范围: {delay}")),
            },
            JobUpdate::Error(message) => JobTriggerUpdate::with_error(message.clone()),
            JobUpdate::Cancelled => JobTriggerUpdate::with_status(JobTriggerStatus::Cancelled),
        }
    }

    fn record_outcome(
        &self,
        trigger: &JobTrigger,
        update: &JobUpdate,
        trigger_update: &JobTriggerUpdate,
        elapsed: Duration,
    ) {
        let duration_ms = i64::try_from(elapsed.as_millis()).unwrap_or(i64::MAX);
        StructuredLogger::log_execution_complete(trigger, &self.node_id, update.kind(), duration_ms);

        match trigger_update.resolved_status() {
            JobTriggerStatus::Error => {
                let message = trigger_update.error_message.as_deref().unwrap_or_default();
                StructuredLogger::log_execution_failed(trigger, &self.node_id, message);
                self.metrics.record_failed();
            }
            JobTriggerStatus::Runnable => {
                if matches!(update, JobUpdate::Complete) {
                    self.metrics.record_successful();
                }
                self.metrics.record_rescheduled();
            }
            JobTriggerStatus::Complete => self.metrics.record_successful(),
            JobTriggerStatus::Cancelled | JobTriggerStatus::Running => {}
        }
    }
}

fn panic_detail(panic: &(dyn Any + Send)) -> String {
    panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "未知原因".to_string())
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    format!("作业执行时发生panic: {}", panic_detail(panic))
}

/// 并发受限时的退避时长
///
/// 首次推迟使用完整时长，之后按推迟次数递减，最短为五分之一。
fn sliding_backoff(base: chrono::Duration, reschedule_count: i32) -> chrono::Duration {
    if reschedule_count < 1 {
        return base;
    }
    base / reschedule_count.min(5)
}

/// 作业执行引擎
pub struct JobExecutionEngine {
    name: String,
    node_id: String,
    store: Arc<dyn JobTriggerStore>,
    definitions: Option<Arc<dyn JobDefinitionStore>>,
    clock: Arc<dyn JobSchedulerClock>,
    pool: Arc<JobWorkerPool>,
    factories: JobFactoryMap,
    namespace: TriggerNamespace,
    concurrency_limits: HashMap<String, u32>,
    concurrency_backoff: chrono::Duration,
    lock_expiration: chrono::Duration,
    lease_refresh_interval: chrono::Duration,
    runner: JobRunner,
    running: Arc<AtomicBool>,
    startup_cleanup_done: AtomicBool,
    last_lease_refresh: Mutex<Option<DateTime<Utc>>>,
}

impl JobExecutionEngine {
    pub fn new(config: &SchedulerConfig, components: EngineComponents) -> Self {
        let metrics = SchedulerMetrics::new(&config.name);
        let runner = JobRunner {
            node_id: components.node_id.clone(),
            store: components.store.clone(),
            clock: components.clock.clone(),
            strategies: JobScheduleStrategies::new(),
            metrics,
            completed: Arc::new(Notify::new()),
        };

        Self {
            name: config.name.clone(),
            node_id: components.node_id,
            store: components.store,
            definitions: components.definitions,
            clock: components.clock,
            pool: components.pool,
            factories: components.factories,
            namespace: components.namespace,
            concurrency_limits: config.concurrency_limits.clone(),
            concurrency_backoff: config.concurrency_backoff(),
            lock_expiration: config.lock_expiration(),
            lease_refresh_interval: config.lease_refresh_interval(),
            runner,
            running: Arc::new(AtomicBool::new(true)),
            startup_cleanup_done: AtomicBool::new(false),
            last_lease_refresh: Mutex::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn namespace(&self) -> &TriggerNamespace {
        &self.namespace
    }

    pub fn pool(&self) -> &Arc<JobWorkerPool> {
        &self.pool
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// 执行一轮调度，返回成功派发的触发器数量
    pub async fn execute_once(&self) -> SchedulerResult<usize> {
        if !self.is_running() {
            return Ok(0);
        }
        self.cleanup_on_startup().await?;

        let free_slots = self.pool.available_slots();
        self.runner.metrics.set_slots_in_use(self.pool.slots_in_use());
        if free_slots == 0 {
            debug!("调度器 {} 没有空闲槽位，跳过本轮", self.name);
            return Ok(0);
        }

        let now = self.clock.now_utc();
        let candidates = self
            .store
            .find_runnable(&self.node_id, &self.namespace, now, free_slots)
            .await?;

        let mut dispatched = 0;
        for candidate in candidates {
            if !self.is_running() {
                break;
            }
            if self.lock_and_dispatch(candidate).await {
                dispatched += 1;
            }
        }
        self.runner.metrics.set_slots_in_use(self.pool.slots_in_use());
        Ok(dispatched)
    }

    async fn cleanup_on_startup(&self) -> SchedulerResult<()> {
        if self.startup_cleanup_done.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        match self.store.force_release_owned(&self.node_id).await {
            Ok(released) => {
                StructuredLogger::log_startup_cleanup(&self.name, &self.node_id, released);
                Ok(())
            }
            Err(e) => {
                // 下一轮重试
                self.startup_cleanup_done.store(false, Ordering::SeqCst);
                Err(e)
            }
        }
    }

    async fn lock_and_dispatch(&self, mut trigger: JobTrigger) -> bool {
        let now = self.clock.now_utc();
        let lease_expiry = now + self.lock_expiration;

        match self.store.acquire_lock(&trigger.id, &self.node_id, lease_expiry).await {
            Ok(true) => {}
            Ok(false) => {
                debug!("触发器 {} 已被其他节点锁定，跳过", trigger.id);
                return false;
            }
            Err(e) => {
                warn!("锁定触发器 {} 失败: {}", trigger.id, e);
                return false;
            }
        }

        trigger.status = JobTriggerStatus::Running;
        trigger.lock = JobTriggerLock {
            owner: Some(self.node_id.clone()),
            last_owner: trigger
                .lock
                .owner
                .clone()
                .or_else(|| trigger.lock.last_owner.clone()),
            lease_expiry: Some(lease_expiry),
        };
        trigger.triggered_at = Some(now);
        trigger.progress = 0;
        StructuredLogger::log_trigger_locked(&trigger, &self.node_id, lease_expiry);

        self.dispatch(trigger).await
    }

    async fn dispatch(&self, trigger: JobTrigger) -> bool {
        let Some(factory) = self.factories.get(&trigger.job_definition_type) else {
            StructuredLogger::log_unknown_job_type(&trigger, &self.node_id);
            let message = SchedulerError::UnknownJobType(trigger.job_definition_type.clone());
            self.release_with_error(&trigger, message.to_string()).await;
            return false;
        };

        if self.defer_for_concurrency_limit(&trigger).await {
            return false;
        }

        let definition = match self.resolve_definition(&trigger).await {
            Ok(definition) => definition,
            Err(e) if e.is_permanent() => {
                self.release_with_error(&trigger, e.to_string()).await;
                return false;
            }
            Err(e) => {
                warn!(
                    "读取触发器 {} 的作业定义失败，{}秒后重试: {}",
                    trigger.id, TRANSIENT_RETRY_DELAY_SECONDS, e
                );
                self.release_for_retry(&trigger).await;
                return false;
            }
        };

        let job = match factory.create(&definition) {
            Ok(job) => job,
            Err(e) => {
                self.release_with_error(&trigger, e.to_string()).await;
                return false;
            }
        };

        let ctx = JobExecutionContext::new(
            trigger.clone(),
            definition,
            self.node_id.clone(),
            self.store.clone(),
            self.running.clone(),
        );
        let runner = self.runner.clone();
        if self.pool.try_submit(runner.run(job, ctx)) {
            return true;
        }

        StructuredLogger::log_execution_denied(&trigger, &self.node_id);
        self.runner.metrics.record_denied();
        self.release_unchanged(&trigger).await;
        false
    }

    /// 作业类型在集群内的运行数量超过上限时推迟触发器，返回是否已推迟
    async fn defer_for_concurrency_limit(&self, trigger: &JobTrigger) -> bool {
        let job_type = &trigger.job_definition_type;
        let limit = self.concurrency_limits.get(job_type).copied().unwrap_or(0);
        if limit == 0 {
            return false;
        }

        let now = self.clock.now_utc();
        // 计数包含本节点刚锁定的这一个
        let running = match self.store.count_running(job_type, now).await {
            Ok(running) => running,
            Err(e) => {
                warn!("统计作业类型 {} 的运行数量失败，稍后重试: {}", job_type, e);
                self.release_for_retry(trigger).await;
                return true;
            }
        };
        if running <= u64::from(limit) {
            return false;
        }

        let backoff = sliding_backoff(self.concurrency_backoff, trigger.concurrency_reschedule_count);
        let next_time = now.checked_add_signed(backoff).unwrap_or(now);
        StructuredLogger::log_concurrency_limited(trigger, &self.node_id, running, limit, next_time);
        self.runner.metrics.record_denied();
        self.runner.metrics.record_rescheduled();
        self.release(trigger, JobTriggerUpdate::with_concurrency_reschedule(next_time))
            .await;
        true
    }

    async fn resolve_definition(&self, trigger: &JobTrigger) -> SchedulerResult<JobDefinition> {
        if let Some(job_type) = JobDefinition::system_job_type(&trigger.job_definition_id) {
            return Ok(JobDefinition::synthetic(job_type));
        }
        let Some(definitions) = &self.definitions else {
            return Ok(JobDefinition::synthetic(&trigger.job_definition_type));
        };
        definitions
            .get(&trigger.job_definition_id)
            .await?
            .ok_or_else(|| SchedulerError::JobDefinitionNotFound {
                id: trigger.job_definition_id.clone(),
            })
    }

    async fn release_with_error(&self, trigger: &JobTrigger, message: String) {
        StructuredLogger::log_execution_failed(trigger, &self.node_id, &message);
        self.runner.metrics.record_failed();
        self.release(trigger, JobTriggerUpdate::with_error(message)).await;
    }

    async fn release_unchanged(&self, trigger: &JobTrigger) {
        self.release(trigger, JobTriggerUpdate::unchanged(trigger)).await;
    }

    async fn release_for_retry(&self, trigger: &JobTrigger) {
        let retry_at = self
            .clock
            .now_utc()
            .checked_add_signed(chrono::Duration::seconds(TRANSIENT_RETRY_DELAY_SECONDS));
        let update = match retry_at {
            Some(next_time) => JobTriggerUpdate::with_next_time(next_time),
            None => JobTriggerUpdate::unchanged(trigger),
        };
        self.release(trigger, update).await;
    }

    async fn release(&self, trigger: &JobTrigger, update: JobTriggerUpdate) {
        match self
            .store
            .release_lock_and_update(&trigger.id, &self.node_id, &update)
            .await
        {
            Ok(true) => {}
            Ok(false) => StructuredLogger::log_lock_lost(trigger, &self.node_id),
            Err(e) => error!("释放触发器 {} 失败: {}", trigger.id, e),
        }
    }

    /// 为本节点执行中的触发器续租，返回续租数量
    ///
    /// 没有执行中的作业或距上次续租不足配置间隔时不访问存储。
    pub async fn update_locked_triggers(&self) -> SchedulerResult<u64> {
        if !self.pool.any_slots_used() {
            return Ok(0);
        }

        let now = self.clock.now_utc();
        {
            let last = self
                .last_lease_refresh
                .lock()
                .map_err(|_| SchedulerError::Internal("续租时间锁已损坏".to_string()))?;
            if let Some(last) = *last {
                if now - last < self.lease_refresh_interval {
                    return Ok(0);
                }
            }
        }

        let refreshed = self
            .store
            .refresh_leases(&self.node_id, now + self.lock_expiration)
            .await?;
        if let Ok(mut last) = self.last_lease_refresh.lock() {
            *last = Some(now);
        }
        if refreshed > 0 {
            StructuredLogger::log_leases_refreshed(&self.name, &self.node_id, refreshed);
        }
        Ok(refreshed)
    }

    /// 统计本调度器命名空间内逾期未执行的触发器
    pub async fn report_overdue(&self) {
        match self
            .store
            .count_overdue(&self.namespace, self.clock.now_utc())
            .await
        {
            Ok(overdue) => self.runner.metrics.set_overdue(&overdue),
            Err(e) => debug!("统计逾期触发器失败: {}", e),
        }
    }

    /// 等待下一个作业执行结束
    pub async fn completion_notified(&self) {
        self.runner.completed.notified().await
    }

    /// 停止派发新作业，执行中的作业通过 `is_running()` 感知
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    /// 停止派发并等待执行中的作业结束，返回是否在超时前结束
    pub async fn shutdown(&self, timeout: Duration) -> bool {
        self.stop();
        let drained = self.pool.shutdown(timeout).await;
        if drained {
            info!("调度器 {} 的执行中作业已全部结束", self.name);
        }
        drained
    }
}

impl std::fmt::Debug for JobExecutionEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobExecutionEngine")
            .field("name", &self.name)
            .field("node_id", &self.node_id)
            .field("namespace", &self.namespace)
            .field("pool", &self.pool)
            .finish()
    }
}
