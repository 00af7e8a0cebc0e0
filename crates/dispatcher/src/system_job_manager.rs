use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::{debug, info};

use scheduler_core::models::{
    JobDefinition, JobSchedule, JobTrigger, JobTriggerBuilder, JobTriggerStatus,
    SYSTEM_JOB_DEFINITION_PREFIX,
};
use scheduler_core::traits::JobTriggerStore;
use scheduler_core::{JobSchedulerClock, SchedulerError, SchedulerResult};
use scheduler_domain::{SystemJobConfig, SystemJobRegistry};

/// 系统作业触发器的只读视图
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SystemJobInfo {
    pub trigger_id: String,
    pub job_type: String,
    pub status: JobTriggerStatus,
    pub progress: i32,
    pub is_cancelled: bool,
    pub next_time: Option<DateTime<Utc>>,
    pub lock_owner: Option<String>,
    pub last_error_message: Option<String>,
    pub last_execution_duration_ms: Option<i64>,
}

impl From<JobTrigger> for SystemJobInfo {
    fn from(trigger: JobTrigger) -> Self {
        Self {
            trigger_id: trigger.id,
            job_type: trigger.job_definition_type,
            status: trigger.status,
            progress: trigger.progress,
            is_cancelled: trigger.is_cancelled,
            next_time: trigger.next_time,
            lock_owner: trigger.lock.owner,
            last_error_message: trigger.last_error_message,
            last_execution_duration_ms: trigger.last_execution_duration_ms,
        }
    }
}

/// 系统作业提交入口
pub struct SystemJobManager {
    store: Arc<dyn JobTriggerStore>,
    clock: Arc<dyn JobSchedulerClock>,
    registry: Arc<SystemJobRegistry>,
}

impl SystemJobManager {
    pub fn new(
        store: Arc<dyn JobTriggerStore>,
        clock: Arc<dyn JobSchedulerClock>,
        registry: Arc<SystemJobRegistry>,
    ) -> Self {
        Self {
            store,
            clock,
            registry,
        }
    }

    /// 提交一次性系统作业，立即可执行
    pub async fn submit<C: SystemJobConfig>(&self, config: &C) -> SchedulerResult<String> {
        self.submit_with_delay(config, Duration::zero()).await
    }

    /// 提交一次性系统作业，`delay` 之后可执行
    pub async fn submit_with_delay<C: SystemJobConfig>(
        &self,
        config: &C,
        delay: Duration,
    ) -> SchedulerResult<String> {
        let now = self.clock.now_utc();
        let trigger = self
            .trigger_for(config, JobSchedule::once())?
            .with_next_time(now + delay.max(Duration::zero()))
            .build(now);

        let created = self.store.create(&trigger).await?;
        debug!("已提交系统作业 {}，触发器: {}", C::TYPE_NAME, created.id);
        Ok(created.id)
    }

    /// 确保存在一个周期性系统作业，重复调用不会创建新的触发器
    ///
    /// 触发器ID由作业类型推导，集群内所有节点同时调用也只会保留一个。
    pub async fn ensure_periodic<C: SystemJobConfig>(
        &self,
        config: &C,
        interval: Duration,
    ) -> SchedulerResult<String> {
        if interval.num_seconds() <= 0 {
            return Err(SchedulerError::InvalidSchedule(format!(
                "周期性系统作业 {} 的间隔必须至少为1秒",
                C::TYPE_NAME
            )));
        }

        let trigger_id = Self::periodic_trigger_id(C::TYPE_NAME);
        if self.store.get(&trigger_id).await?.is_some() {
            return Ok(trigger_id);
        }

        let now = self.clock.now_utc();
        let trigger = self
            .trigger_for(config, JobSchedule::every_seconds(interval.num_seconds()))?
            .with_id(&trigger_id)
            .build(now);

        match self.store.create(&trigger).await {
            Ok(_) => {
                info!(
                    "已创建周期性系统作业 {}，间隔 {} 秒",
                    C::TYPE_NAME,
                    interval.num_seconds()
                );
                Ok(trigger_id)
            }
            Err(SchedulerError::DuplicateTrigger { .. }) => Ok(trigger_id),
            Err(e) => Err(e),
        }
    }

    pub fn periodic_trigger_id(job_type: &str) -> String {
        format!("{SYSTEM_JOB_DEFINITION_PREFIX}{job_type}:periodic")
    }

    pub async fn cancel(&self, trigger_id: &str) -> SchedulerResult<bool> {
        let cancelled = self.store.cancel(trigger_id).await?;
        if cancelled {
            info!("已请求取消系统作业，触发器: {}", trigger_id);
        }
        Ok(cancelled)
    }

    pub async fn get_info(&self, trigger_id: &str) -> SchedulerResult<SystemJobInfo> {
        self.store
            .get(trigger_id)
            .await?
            .map(SystemJobInfo::from)
            .ok_or_else(|| SchedulerError::TriggerNotFound {
                id: trigger_id.to_string(),
            })
    }

    fn trigger_for<C: SystemJobConfig>(
        &self,
        config: &C,
        schedule: JobSchedule,
    ) -> SchedulerResult<JobTriggerBuilder> {
        let data = serde_json::to_value(config)?;
        self.registry.validate_payload(C::TYPE_NAME, &data)?;

        Ok(JobTrigger::builder(
            JobDefinition::system_definition_id(C::TYPE_NAME),
            C::TYPE_NAME,
        )
        .with_schedule(schedule)
        .with_data(data))
    }
}

impl std::fmt::Debug for SystemJobManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SystemJobManager")
            .field("registry", &self.registry)
            .finish()
    }
}
