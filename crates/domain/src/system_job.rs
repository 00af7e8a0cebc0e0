//! # 系统作业
//!
//! 平台内部维护任务（索引轮换、保留期清理等）使用的作业族。
//!
//! 系统作业不持久化作业定义：配置完全由触发器的 `data` 决定，
//! 同一类型的所有提交共用一个按类型推导的合成定义。
//!
//! ## 类型注册
//!
//! 每个系统作业类型通过 [`SystemJobRegistry::register`] 显式注册，
//! 注册时校验类型名并记录对应的解码函数，而不是在第一次执行时才发现问题：
//!
//! ```rust,ignore
//! let mut registry = SystemJobRegistry::new();
//! registry.register(|| RotateIndexJob::new(indices.clone()))?;
//!
//! // 构造引擎时使用
//! let factories = registry.job_factories();
//! ```
//!
//! ## 结果转换
//!
//! | SystemJobResult.status | JobUpdate |
//! |---|---|
//! | COMPLETE | Complete（是否终态由调度决定） |
//! | RUNNABLE + delay | Retry(delay) |
//! | ERROR | Error(message) |
//! | CANCELLED | Cancelled |

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Duration;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::warn;

use scheduler_core::models::{JobDefinition, JobTriggerStatus, JobUpdate};
use scheduler_core::traits::{Job, JobExecutionContext, JobFactory, JobFactoryMap};
use scheduler_core::{SchedulerError, SchedulerResult};

/// 系统作业配置
///
/// 序列化后作为触发器的 `data` 存储。
pub trait SystemJobConfig: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// 作业类型名，同时是触发器的 `job_definition_type`
    const TYPE_NAME: &'static str;

    fn validate(&self) -> SchedulerResult<()> {
        Ok(())
    }
}

/// 系统作业
#[async_trait]
pub trait SystemJob: Send + Sync + 'static {
    type Config: SystemJobConfig;

    async fn execute(
        &self,
        config: Self::Config,
        ctx: &SystemJobContext,
    ) -> SchedulerResult<SystemJobResult>;
}

/// 系统作业执行结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SystemJobResult {
    pub status: JobTriggerStatus,
    pub delay: Option<Duration>,
    pub message: Option<String>,
}

impl SystemJobResult {
    pub fn success() -> Self {
        Self {
            status: JobTriggerStatus::Complete,
            delay: None,
            message: None,
        }
    }

    pub fn with_retry(delay: Duration) -> Self {
        Self {
            status: JobTriggerStatus::Runnable,
            delay: Some(delay),
            message: None,
        }
    }

    pub fn with_error(message: impl Into<String>) -> Self {
        Self {
            status: JobTriggerStatus::Error,
            delay: None,
            message: Some(message.into()),
        }
    }

    pub fn cancelled() -> Self {
        Self {
            status: JobTriggerStatus::Cancelled,
            delay: None,
            message: None,
        }
    }

    /// 转换为通用的作业执行结果
    pub fn into_job_update(self) -> JobUpdate {
        match self.status {
            JobTriggerStatus::Complete => JobUpdate::Complete,
            JobTriggerStatus::Runnable => {
                JobUpdate::Retry(self.delay.unwrap_or_else(Duration::zero))
            }
            JobTriggerStatus::Error => JobUpdate::Error(
                self.message
                    .unwrap_or_else(|| "系统作业执行失败".to_string()),
            ),
            JobTriggerStatus::Cancelled => JobUpdate::Cancelled,
            JobTriggerStatus::Running => {
                JobUpdate::Error("系统作业返回了无效的状态: RUNNING".to_string())
            }
        }
    }
}

/// 系统作业上下文
pub struct SystemJobContext {
    inner: JobExecutionContext,
}

impl SystemJobContext {
    pub fn new(inner: JobExecutionContext) -> Self {
        Self { inner }
    }

    pub fn trigger_id(&self) -> &str {
        self.inner.trigger_id()
    }

    pub fn node_id(&self) -> &str {
        &self.inner.node_id
    }

    pub async fn is_cancelled(&self) -> bool {
        self.inner.is_cancelled().await
    }

    pub async fn update_progress(&self, progress: i32) {
        self.inner.update_progress(progress).await
    }

    pub async fn update_progress_of(&self, total: i64, completed: i64) {
        self.inner.update_progress_of(total, completed).await
    }

    pub fn is_running(&self) -> bool {
        self.inner.is_running()
    }
}

impl fmt::Debug for SystemJobContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SystemJobContext")
            .field("trigger_id", &self.trigger_id())
            .finish()
    }
}

/// 把类型化的系统作业适配为通用作业
pub struct SystemJobAdapter<J> {
    job: J,
}

impl<J: SystemJob> SystemJobAdapter<J> {
    pub fn new(job: J) -> Self {
        Self { job }
    }
}

#[async_trait]
impl<J: SystemJob> Job for SystemJobAdapter<J> {
    async fn execute(&self, ctx: &JobExecutionContext) -> SchedulerResult<JobUpdate> {
        let config = match decode_config::<J::Config>(ctx.trigger.data.as_ref()) {
            Ok(config) => config,
            Err(e) => {
                warn!(
                    "系统作业 {} 的配置无效，触发器: {}: {}",
                    <J::Config as SystemJobConfig>::TYPE_NAME,
                    ctx.trigger.id,
                    e
                );
                return Ok(JobUpdate::Error(e.to_string()));
            }
        };

        let result = self
            .job
            .execute(config, &SystemJobContext::new(ctx.clone()))
            .await?;
        Ok(result.into_job_update())
    }
}

fn decode_config<C: SystemJobConfig>(data: Option<&serde_json::Value>) -> SchedulerResult<C> {
    let data = data.ok_or_else(|| {
        SchedulerError::Serialization(format!("系统作业 {} 缺少配置数据", C::TYPE_NAME))
    })?;
    let config: C = serde_json::from_value(data.clone())?;
    config.validate()?;
    Ok(config)
}

fn validate_payload_of<C: SystemJobConfig>(value: &serde_json::Value) -> SchedulerResult<()> {
    decode_config::<C>(Some(value)).map(|_| ())
}

struct SystemJobFactory<J, F> {
    make: F,
    _job: PhantomData<fn() -> J>,
}

impl<J, F> JobFactory for SystemJobFactory<J, F>
where
    J: SystemJob,
    F: Fn() -> J + Send + Sync,
{
    fn create(&self, _definition: &JobDefinition) -> SchedulerResult<Box<dyn Job>> {
        Ok(Box::new(SystemJobAdapter::new((self.make)())))
    }
}

type PayloadValidator = fn(&serde_json::Value) -> SchedulerResult<()>;

struct RegisteredSystemJob {
    factory: Arc<dyn JobFactory>,
    validate_payload: PayloadValidator,
}

/// 系统作业注册表
#[derive(Default)]
pub struct SystemJobRegistry {
    jobs: HashMap<String, RegisteredSystemJob>,
}

impl SystemJobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册系统作业类型，类型名为空或重复时返回配置错误
    pub fn register<J, F>(&mut self, make: F) -> SchedulerResult<()>
    where
        J: SystemJob,
        F: Fn() -> J + Send + Sync + 'static,
    {
        let type_name = <J::Config as SystemJobConfig>::TYPE_NAME;
        if type_name.trim().is_empty() {
            return Err(SchedulerError::Configuration(
                "系统作业类型名不能为空".to_string(),
            ));
        }
        if self.jobs.contains_key(type_name) {
            return Err(SchedulerError::Configuration(format!(
                "系统作业类型重复注册: {type_name}"
            )));
        }

        let factory: Arc<dyn JobFactory> = Arc::new(SystemJobFactory {
            make,
            _job: PhantomData,
        });
        self.jobs.insert(
            type_name.to_string(),
            RegisteredSystemJob {
                factory,
                validate_payload: validate_payload_of::<J::Config>,
            },
        );
        Ok(())
    }

    pub fn contains(&self, job_type: &str) -> bool {
        self.jobs.contains_key(job_type)
    }

    /// 用注册时记录的解码函数校验触发器数据
    pub fn validate_payload(&self, job_type: &str, data: &serde_json::Value) -> SchedulerResult<()> {
        let registered = self
            .jobs
            .get(job_type)
            .ok_or_else(|| SchedulerError::UnknownJobType(job_type.to_string()))?;
        (registered.validate_payload)(data)
    }

    pub fn job_types(&self) -> BTreeSet<String> {
        self.jobs.keys().cloned().collect()
    }

    pub fn job_factories(&self) -> JobFactoryMap {
        self.jobs
            .iter()
            .map(|(name, registered)| (name.clone(), registered.factory.clone()))
            .collect()
    }
}

impl fmt::Debug for SystemJobRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SystemJobRegistry")
            .field("job_types", &self.job_types())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use serde::Deserialize;
    use std::sync::atomic::AtomicBool;

    use scheduler_core::models::{JobTrigger, TriggerNamespace, JobTriggerUpdate};
    use scheduler_core::traits::JobTriggerStore;

    mockall::mock! {
        pub Store {}

        #[async_trait]
        impl JobTriggerStore for Store {
            async fn create(&self, trigger: &JobTrigger) -> SchedulerResult<JobTrigger>;
            async fn get(&self, trigger_id: &str) -> SchedulerResult<Option<JobTrigger>>;
            async fn all(&self) -> SchedulerResult<Vec<JobTrigger>>;
            async fn delete(&self, trigger_id: &str) -> SchedulerResult<bool>;
            async fn find_runnable(
                &self,
                node_id: &str,
                namespace: &TriggerNamespace,
                now: chrono::DateTime<Utc>,
                limit: usize,
            ) -> SchedulerResult<Vec<JobTrigger>>;
            async fn acquire_lock(
                &self,
                trigger_id: &str,
                node_id: &str,
                lease_expiry: chrono::DateTime<Utc>,
            ) -> SchedulerResult<bool>;
            async fn release_lock_and_update(
                &self,
                trigger_id: &str,
                node_id: &str,
                update: &JobTriggerUpdate,
            ) -> SchedulerResult<bool>;
            async fn update_progress(&self, trigger_id: &str, node_id: &str, progress: i32) -> SchedulerResult<()>;
            async fn is_cancelled(&self, trigger_id: &str) -> SchedulerResult<bool>;
            async fn cancel(&self, trigger_id: &str) -> SchedulerResult<bool>;
            async fn refresh_leases(&self, node_id: &str, lease_expiry: chrono::DateTime<Utc>) -> SchedulerResult<u64>;
            async fn force_release_owned(&self, node_id: &str) -> SchedulerResult<u64>;
            async fn delete_completed_once_older_than(&self, cutoff: chrono::DateTime<Utc>) -> SchedulerResult<u64>;
            async fn count_running(&self, job_type: &str, now: chrono::DateTime<Utc>) -> SchedulerResult<u64>;
            async fn count_overdue(
                &self,
                namespace: &TriggerNamespace,
                now: chrono::DateTime<Utc>,
            ) -> SchedulerResult<HashMap<String, u64>>;
        }
    }

    #[derive(Debug, Serialize, Deserialize)]
    struct RotateIndexConfig {
        index_set: String,
    }

    impl SystemJobConfig for RotateIndexConfig {
        const TYPE_NAME: &'static str = "rotate-index";

        fn validate(&self) -> SchedulerResult<()> {
            if self.index_set.is_empty() {
                return Err(SchedulerError::Configuration("index_set不能为空".into()));
            }
            Ok(())
        }
    }

    struct RotateIndexJob;

    #[async_trait]
    impl SystemJob for RotateIndexJob {
        type Config = RotateIndexConfig;

        async fn execute(
            &self,
            config: RotateIndexConfig,
            ctx: &SystemJobContext,
        ) -> SchedulerResult<SystemJobResult> {
            ctx.update_progress(100).await;
            if config.index_set == "busy" {
                return Ok(SystemJobResult::with_retry(Duration::seconds(30)));
            }
            Ok(SystemJobResult::success())
        }
    }

    fn context(store: MockStore, data: Option<serde_json::Value>) -> JobExecutionContext {
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let mut builder = JobTrigger::builder(
            JobDefinition::system_definition_id("rotate-index"),
            "rotate-index",
        )
        .with_id("trigger-1");
        if let Some(data) = data {
            builder = builder.with_data(data);
        }
        JobExecutionContext::new(
            builder.build(now),
            JobDefinition::synthetic("rotate-index"),
            "node-a",
            Arc::new(store),
            Arc::new(AtomicBool::new(true)),
        )
    }

    #[test]
    fn test_result_translation() {
        assert_eq!(SystemJobResult::success().into_job_update(), JobUpdate::Complete);
        assert_eq!(
            SystemJobResult::with_retry(Duration::seconds(5)).into_job_update(),
            JobUpdate::Retry(Duration::seconds(5))
        );
        assert_eq!(
            SystemJobResult::with_error("disk full").into_job_update(),
            JobUpdate::Error("disk full".to_string())
        );
        assert_eq!(SystemJobResult::cancelled().into_job_update(), JobUpdate::Cancelled);
    }

    #[test]
    fn test_registry_rejects_duplicates() {
        let mut registry = SystemJobRegistry::new();
        registry.register(|| RotateIndexJob).unwrap();
        let err = registry.register(|| RotateIndexJob).unwrap_err();
        assert!(matches!(err, SchedulerError::Configuration(_)));
        assert_eq!(
            registry.job_types().into_iter().collect::<Vec<_>>(),
            vec!["rotate-index".to_string()]
        );
        assert!(registry.job_factories().contains_key("rotate-index"));
    }

    #[test]
    fn test_registry_validates_payload() {
        let mut registry = SystemJobRegistry::new();
        registry.register(|| RotateIndexJob).unwrap();

        assert!(registry
            .validate_payload("rotate-index", &serde_json::json!({"index_set": "default-index"}))
            .is_ok());
        assert!(registry
            .validate_payload("rotate-index", &serde_json::json!({"index_set": ""}))
            .is_err());
        assert!(registry
            .validate_payload("rotate-index", &serde_json::json!({"wrong": 1}))
            .is_err());
        assert!(matches!(
            registry.validate_payload("unknown-type", &serde_json::json!({})),
            Err(SchedulerError::UnknownJobType(_))
        ));
    }

    #[tokio::test]
    async fn test_adapter_runs_typed_job() {
        let mut store = MockStore::new();
        store
            .expect_update_progress()
            .times(2)
            .returning(|_, _, _| Ok(()));

        let adapter = SystemJobAdapter::new(RotateIndexJob);

        let ctx = context(store, Some(serde_json::json!({"index_set": "default-index"})));
        assert_eq!(adapter.execute(&ctx).await.unwrap(), JobUpdate::Complete);

        let mut busy = ctx.clone();
        busy.trigger.data = Some(serde_json::json!({"index_set": "busy"}));
        assert_eq!(
            adapter.execute(&busy).await.unwrap(),
            JobUpdate::Retry(Duration::seconds(30))
        );
    }

    #[tokio::test]
    async fn test_adapter_reports_invalid_config_as_error() {
        let adapter = SystemJobAdapter::new(RotateIndexJob);
        let ctx = context(MockStore::new(), None);
        let update = adapter.execute(&ctx).await.unwrap();
        assert!(matches!(update, JobUpdate::Error(message) if message.contains("rotate-index")));
    }
}
