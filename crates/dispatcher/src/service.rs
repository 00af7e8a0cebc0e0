use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use scheduler_core::config::SchedulerConfig;
use scheduler_core::traits::GracefulShutdownHook;
use scheduler_core::{SchedulerError, SchedulerResult};

use crate::eligibility::EligibilityPredicate;
use crate::engine::{EngineComponents, JobExecutionEngine};

/// 命名调度服务
///
/// 一个引擎、一个工作池和一个节点资格判断的组合。同一节点上可以运行多个实例，
/// 各自负责互不重叠的作业类型，共享同一个触发器存储。
pub struct JobSchedulerService {
    name: String,
    engine: Arc<JobExecutionEngine>,
    eligibility: EligibilityPredicate,
    loop_sleep: Duration,
    shutdown_timeout: Duration,
    shutdown_tx: broadcast::Sender<()>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl JobSchedulerService {
    pub fn new(
        config: &SchedulerConfig,
        components: EngineComponents,
        eligibility: EligibilityPredicate,
    ) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            name: config.name.clone(),
            engine: Arc::new(JobExecutionEngine::new(config, components)),
            eligibility,
            loop_sleep: config.loop_sleep(),
            shutdown_timeout: config.shutdown_timeout(),
            shutdown_tx,
            handle: Mutex::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn engine(&self) -> &Arc<JobExecutionEngine> {
        &self.engine
    }

    /// 执行一轮：资格判断、派发、续租
    ///
    /// 不具备资格时不尝试加锁，但仍为已在执行的作业续租。
    pub async fn tick(&self) -> SchedulerResult<usize> {
        let dispatched = if (self.eligibility)() {
            self.engine.execute_once().await
        } else {
            debug!("节点不具备调度器 {} 的执行资格，跳过本轮", self.name);
            Ok(0)
        };

        if let Err(e) = self.engine.update_locked_triggers().await {
            warn!("调度器 {} 续租失败: {}", self.name, e);
        }
        self.engine.report_overdue().await;

        dispatched
    }

    /// 在独立任务中启动调度循环
    pub async fn start(self: &Arc<Self>) -> SchedulerResult<()> {
        let mut handle = self.handle.lock().await;
        if handle.is_some() {
            return Err(SchedulerError::Configuration(format!(
                "调度器 {} 已经启动",
                self.name
            )));
        }
        if !self.engine.is_running() {
            return Err(SchedulerError::Configuration(format!(
                "调度器 {} 已经关闭",
                self.name
            )));
        }

        let service = Arc::clone(self);
        let shutdown_rx = self.shutdown_tx.subscribe();
        *handle = Some(tokio::spawn(async move {
            service.run_loop(shutdown_rx).await;
        }));

        info!(
            "调度器 {} 已启动，节点: {}，工作线程: {}",
            self.name,
            self.engine.node_id(),
            self.engine.pool().size()
        );
        Ok(())
    }

    async fn run_loop(&self, mut shutdown_rx: broadcast::Receiver<()>) {
        loop {
            match self.tick().await {
                Ok(dispatched) if dispatched > 0 => {
                    debug!("调度器 {} 本轮派发 {} 个作业", self.name, dispatched);
                }
                Ok(_) => {}
                Err(e) => warn!("调度器 {} 本轮执行失败，下一轮重试: {}", self.name, e),
            }

            tokio::select! {
                _ = shutdown_rx.recv() => {
                    info!("调度器 {} 收到关闭信号", self.name);
                    break;
                }
                _ = tokio::time::sleep(self.loop_sleep) => {}
                _ = self.engine.completion_notified() => {}
            }

            if !self.engine.is_running() {
                break;
            }
        }
    }

    /// 停止调度并在超时前等待执行中的作业结束，返回是否全部结束
    pub async fn shutdown(&self) -> bool {
        self.engine.stop();
        let _ = self.shutdown_tx.send(());

        let handle = self.handle.lock().await.take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!("调度器 {} 的循环任务异常结束: {}", self.name, e);
            }
        }

        let drained = self.engine.shutdown(self.shutdown_timeout).await;
        if !drained {
            warn!(
                "调度器 {} 关闭超时，未完成的作业将在租约过期后由其他节点回收",
                self.name
            );
        }
        info!("调度器 {} 已关闭", self.name);
        drained
    }
}

#[async_trait]
impl GracefulShutdownHook for JobSchedulerService {
    fn name(&self) -> &str {
        &self.name
    }

    async fn shutdown_gracefully(&self) -> bool {
        self.shutdown().await
    }
}

impl std::fmt::Debug for JobSchedulerService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobSchedulerService")
            .field("name", &self.name)
            .field("engine", &self.engine)
            .field("loop_sleep", &self.loop_sleep)
            .finish()
    }
}
