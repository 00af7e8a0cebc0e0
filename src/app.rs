use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Duration;
use tokio::sync::broadcast;
use tracing::info;

use scheduler_core::config::{AppConfig, SchedulerConfig};
use scheduler_core::models::TriggerNamespace;
use scheduler_core::traits::{JobDefinitionStore, JobFactoryMap, JobTriggerStore};
use scheduler_core::JobSchedulerClock;
use scheduler_dispatcher::{
    always_eligible, leader_only, EligibilityPredicate, EngineComponents, JobSchedulerService,
    SystemJobManager, TriggerCleanupConfig, TriggerCleanupJob,
};
use scheduler_domain::SystemJobRegistry;
use scheduler_infrastructure::{DatabaseManager, InMemoryJobDefinitionStore, InMemoryTriggerStore};
use scheduler_worker::JobWorkerPool;

use crate::shutdown::GracefulShutdownService;

/// 应用组装
///
/// 按配置创建存储、系统作业调度器和用户作业调度器，两个调度器共享同一个触发器存储，
/// 按作业类型划分互不重叠的命名空间。
pub struct Application {
    config: AppConfig,
    store: Arc<dyn JobTriggerStore>,
    definitions: Arc<dyn JobDefinitionStore>,
    database: Option<DatabaseManager>,
    system_scheduler: Arc<JobSchedulerService>,
    user_scheduler: Arc<JobSchedulerService>,
    system_jobs: SystemJobManager,
    shutdown_service: GracefulShutdownService,
    is_leader: Arc<AtomicBool>,
}

impl Application {
    /// 创建应用
    ///
    /// `registry` 中的系统作业与内置的清理作业一起注册，`user_jobs` 是用户作业的工厂表。
    pub async fn new(
        config: AppConfig,
        clock: Arc<dyn JobSchedulerClock>,
        mut registry: SystemJobRegistry,
        user_jobs: JobFactoryMap,
    ) -> Result<Self> {
        config.validate().context("配置校验失败")?;
        info!("初始化应用，节点: {}", config.node.node_id);

        let (store, definitions, database) = create_stores(&config, clock.clone()).await?;

        let cleanup_store = store.clone();
        let cleanup_clock = clock.clone();
        registry
            .register(move || TriggerCleanupJob::new(cleanup_store.clone(), cleanup_clock.clone()))
            .context("注册清理作业失败")?;
        let registry = Arc::new(registry);
        let system_types = registry.job_types();

        let is_leader = Arc::new(AtomicBool::new(true));

        let system_scheduler = Arc::new(JobSchedulerService::new(
            &config.system_scheduler,
            EngineComponents {
                node_id: config.node.node_id.clone(),
                store: store.clone(),
                definitions: None,
                clock: clock.clone(),
                pool: worker_pool(&config.system_scheduler),
                factories: registry.job_factories(),
                namespace: TriggerNamespace::only(system_types.clone()),
            },
            eligibility(&config.system_scheduler, &is_leader),
        ));

        let user_scheduler = Arc::new(JobSchedulerService::new(
            &config.scheduler,
            EngineComponents {
                node_id: config.node.node_id.clone(),
                store: store.clone(),
                definitions: Some(definitions.clone()),
                clock: clock.clone(),
                pool: worker_pool(&config.scheduler),
                factories: user_jobs,
                namespace: TriggerNamespace::except(system_types),
            },
            eligibility(&config.scheduler, &is_leader),
        ));

        let system_jobs = SystemJobManager::new(store.clone(), clock, registry);

        Ok(Self {
            config,
            store,
            definitions,
            database,
            system_scheduler,
            user_scheduler,
            system_jobs,
            shutdown_service: GracefulShutdownService::new(),
            is_leader,
        })
    }

    /// 启动两个调度器并确保周期性清理作业存在
    pub async fn start(&self) -> Result<()> {
        for scheduler in [&self.system_scheduler, &self.user_scheduler] {
            scheduler
                .start()
                .await
                .with_context(|| format!("启动调度器 {} 失败", scheduler.name()))?;
            self.shutdown_service.register(scheduler.clone()).await;
        }

        if self.config.cleanup.enabled {
            let cleanup = TriggerCleanupConfig {
                retention_hours: self.config.cleanup.retention_hours,
            };
            let interval = Duration::try_seconds(self.config.cleanup.interval_seconds)
                .context("清理间隔超出范围")?;
            self.system_jobs
                .ensure_periodic(&cleanup, interval)
                .await
                .context("创建周期性清理作业失败")?;
        }

        info!("应用已启动，节点: {}", self.config.node.node_id);
        Ok(())
    }

    /// 启动并运行到收到关闭信号
    pub async fn run(&self, mut shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
        self.start().await?;
        let _ = shutdown_rx.recv().await;
        info!("收到关闭信号，停止调度");
        self.shutdown().await;
        Ok(())
    }

    /// 停止所有调度器，返回执行中的作业是否全部在超时前结束
    pub async fn shutdown(&self) -> bool {
        let drained = self.shutdown_service.shutdown_all().await;
        if let Some(database) = &self.database {
            database.close().await;
        }
        info!("应用已关闭");
        drained
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn JobTriggerStore> {
        &self.store
    }

    pub fn definitions(&self) -> &Arc<dyn JobDefinitionStore> {
        &self.definitions
    }

    pub fn system_jobs(&self) -> &SystemJobManager {
        &self.system_jobs
    }

    pub fn system_scheduler(&self) -> &Arc<JobSchedulerService> {
        &self.system_scheduler
    }

    pub fn user_scheduler(&self) -> &Arc<JobSchedulerService> {
        &self.user_scheduler
    }

    /// 主节点标记，供 `leader_only` 的调度器使用
    pub fn leader_flag(&self) -> Arc<AtomicBool> {
        self.is_leader.clone()
    }
}

type Stores = (
    Arc<dyn JobTriggerStore>,
    Arc<dyn JobDefinitionStore>,
    Option<DatabaseManager>,
);

async fn create_stores(config: &AppConfig, clock: Arc<dyn JobSchedulerClock>) -> Result<Stores> {
    if config.database.is_in_memory() {
        info!("未配置数据库，使用内存存储");
        let store: Arc<dyn JobTriggerStore> = Arc::new(InMemoryTriggerStore::new(clock));
        let definitions: Arc<dyn JobDefinitionStore> = Arc::new(InMemoryJobDefinitionStore::new());
        return Ok((store, definitions, None));
    }

    let database = DatabaseManager::connect(&config.database)
        .await
        .with_context(|| format!("连接数据库失败: {}", config.database.url))?;
    let store: Arc<dyn JobTriggerStore> = Arc::new(database.trigger_store(clock));
    let definitions: Arc<dyn JobDefinitionStore> = Arc::new(database.definition_store());
    Ok((store, definitions, Some(database)))
}

fn worker_pool(config: &SchedulerConfig) -> Arc<JobWorkerPool> {
    Arc::new(JobWorkerPool::new(&config.name, config.worker_threads))
}

fn eligibility(config: &SchedulerConfig, is_leader: &Arc<AtomicBool>) -> EligibilityPredicate {
    if config.leader_only {
        leader_only(is_leader.clone())
    } else {
        always_eligible()
    }
}
