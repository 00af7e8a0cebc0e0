//! 触发器保留期清理
//!
//! 删除超过保留期、已结束的一次性触发器。周期性触发器不会被删除。

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use scheduler_core::traits::JobTriggerStore;
use scheduler_core::{JobSchedulerClock, SchedulerError, SchedulerResult};
use scheduler_domain::{SystemJob, SystemJobConfig, SystemJobContext, SystemJobResult};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerCleanupConfig {
    pub retention_hours: i64,
}

impl SystemJobConfig for TriggerCleanupConfig {
    const TYPE_NAME: &'static str = "trigger-cleanup";

    fn validate(&self) -> SchedulerResult<()> {
        if self.retention_hours <= 0 {
            return Err(SchedulerError::Configuration(
                "触发器保留时间必须大于0".to_string(),
            ));
        }
        self.retention().map(|_| ())
    }
}

impl TriggerCleanupConfig {
    fn retention(&self) -> SchedulerResult<Duration> {
        Duration::try_hours(self.retention_hours).ok_or_else(|| {
            SchedulerError::Configuration(format!(
                "触发器保留时间超出范围: {} 小时",
                self.retention_hours
            ))
        })
    }
}

pub struct TriggerCleanupJob {
    store: Arc<dyn JobTriggerStore>,
    clock: Arc<dyn JobSchedulerClock>,
}

impl TriggerCleanupJob {
    pub fn new(store: Arc<dyn JobTriggerStore>, clock: Arc<dyn JobSchedulerClock>) -> Self {
        Self { store, clock }
    }
}

#[async_trait]
impl SystemJob for TriggerCleanupJob {
    type Config = TriggerCleanupConfig;

    async fn execute(
        &self,
        config: TriggerCleanupConfig,
        ctx: &SystemJobContext,
    ) -> SchedulerResult<SystemJobResult> {
        if ctx.is_cancelled().await {
            return Ok(SystemJobResult::cancelled());
        }

        let cutoff = self
            .clock
            .now_utc()
            .checked_sub_signed(config.retention()?)
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        let deleted = self.store.delete_completed_once_older_than(cutoff).await?;
        ctx.update_progress(100).await;

        if deleted > 0 {
            info!(
                "清理了 {} 个超过保留期 {} 小时的触发器",
                deleted, config.retention_hours
            );
        }
        Ok(SystemJobResult::success())
    }
}
