use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::debug;

use scheduler_core::models::{
    clamp_progress, JobDefinition, JobSchedule, JobTrigger, JobTriggerLock, JobTriggerStatus,
    JobTriggerUpdate, TriggerNamespace,
};
use scheduler_core::traits::{JobDefinitionStore, JobTriggerStore};
use scheduler_core::{JobSchedulerClock, SchedulerError, SchedulerResult};

/// 内存触发器存储
///
/// 单进程内共享，互斥锁保证每个操作的原子性。适用于嵌入式部署和测试，
/// 多个引擎实例可以共享同一个存储来模拟集群节点。
pub struct InMemoryTriggerStore {
    triggers: Mutex<HashMap<String, JobTrigger>>,
    clock: Arc<dyn JobSchedulerClock>,
}

impl InMemoryTriggerStore {
    pub fn new(clock: Arc<dyn JobSchedulerClock>) -> Self {
        Self {
            triggers: Mutex::new(HashMap::new()),
            clock,
        }
    }
}

#[async_trait]
impl JobTriggerStore for InMemoryTriggerStore {
    async fn create(&self, trigger: &JobTrigger) -> SchedulerResult<JobTrigger> {
        trigger.schedule.validate()?;

        let mut triggers = self.triggers.lock().await;
        if triggers.contains_key(&trigger.id) {
            return Err(SchedulerError::DuplicateTrigger {
                id: trigger.id.clone(),
            });
        }
        triggers.insert(trigger.id.clone(), trigger.clone());
        debug!("创建触发器: {} ({})", trigger.id, trigger.job_definition_type);
        Ok(trigger.clone())
    }

    async fn get(&self, trigger_id: &str) -> SchedulerResult<Option<JobTrigger>> {
        Ok(self.triggers.lock().await.get(trigger_id).cloned())
    }

    async fn all(&self) -> SchedulerResult<Vec<JobTrigger>> {
        let mut all: Vec<JobTrigger> = self.triggers.lock().await.values().cloned().collect();
        all.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(all)
    }

    async fn delete(&self, trigger_id: &str) -> SchedulerResult<bool> {
        Ok(self.triggers.lock().await.remove(trigger_id).is_some())
    }

    async fn find_runnable(
        &self,
        node_id: &str,
        namespace: &TriggerNamespace,
        now: DateTime<Utc>,
        limit: usize,
    ) -> SchedulerResult<Vec<JobTrigger>> {
        let triggers = self.triggers.lock().await;
        let mut runnable: Vec<JobTrigger> = triggers
            .values()
            .filter(|t| namespace.contains(&t.job_definition_type))
            .filter(|t| t.is_runnable_at(node_id, now))
            .cloned()
            .collect();
        runnable.sort_by(|a, b| a.next_time.cmp(&b.next_time).then_with(|| a.id.cmp(&b.id)));
        runnable.truncate(limit);
        Ok(runnable)
    }

    async fn acquire_lock(
        &self,
        trigger_id: &str,
        node_id: &str,
        lease_expiry: DateTime<Utc>,
    ) -> SchedulerResult<bool> {
        let now = self.clock.now_utc();
        let mut triggers = self.triggers.lock().await;
        let Some(trigger) = triggers.get_mut(trigger_id) else {
            return Ok(false);
        };
        if !trigger.is_runnable_at(node_id, now) {
            return Ok(false);
        }

        let previous = trigger.lock.owner.clone().or_else(|| trigger.lock.last_owner.clone());
        trigger.lock = JobTriggerLock {
            owner: Some(node_id.to_string()),
            last_owner: previous,
            lease_expiry: Some(lease_expiry),
        };
        trigger.status = JobTriggerStatus::Running;
        trigger.triggered_at = Some(now);
        trigger.progress = 0;
        trigger.updated_at = now;
        Ok(true)
    }

    async fn release_lock_and_update(
        &self,
        trigger_id: &str,
        node_id: &str,
        update: &JobTriggerUpdate,
    ) -> SchedulerResult<bool> {
        let now = self.clock.now_utc();
        let mut triggers = self.triggers.lock().await;
        let Some(trigger) = triggers.get_mut(trigger_id) else {
            return Ok(false);
        };
        if !trigger.lock.is_owned_by(node_id) || trigger.status != JobTriggerStatus::Running {
            return Ok(false);
        }
        update.apply_to(trigger, now);
        Ok(true)
    }

    async fn update_progress(
        &self,
        trigger_id: &str,
        node_id: &str,
        progress: i32,
    ) -> SchedulerResult<()> {
        let now = self.clock.now_utc();
        let mut triggers = self.triggers.lock().await;
        if let Some(trigger) = triggers.get_mut(trigger_id) {
            if trigger.lock.is_owned_by(node_id) && trigger.status == JobTriggerStatus::Running {
                trigger.progress = clamp_progress(progress);
                trigger.updated_at = now;
            }
        }
        Ok(())
    }

    async fn is_cancelled(&self, trigger_id: &str) -> SchedulerResult<bool> {
        Ok(self
            .triggers
            .lock()
            .await
            .get(trigger_id)
            .is_some_and(|t| t.is_cancelled))
    }

    async fn cancel(&self, trigger_id: &str) -> SchedulerResult<bool> {
        let now = self.clock.now_utc();
        let mut triggers = self.triggers.lock().await;
        let Some(trigger) = triggers.get_mut(trigger_id) else {
            return Ok(false);
        };
        trigger.is_cancelled = true;
        // 没有作业在运行时直接进入终态
        if trigger.status == JobTriggerStatus::Runnable && trigger.lock.owner.is_none() {
            trigger.status = JobTriggerStatus::Cancelled;
        }
        trigger.updated_at = now;
        Ok(true)
    }

    async fn refresh_leases(
        &self,
        node_id: &str,
        lease_expiry: DateTime<Utc>,
    ) -> SchedulerResult<u64> {
        let now = self.clock.now_utc();
        let mut triggers = self.triggers.lock().await;
        let mut refreshed = 0;
        for trigger in triggers.values_mut() {
            if trigger.status == JobTriggerStatus::Running && trigger.lock.is_owned_by(node_id) {
                trigger.lock.lease_expiry = Some(lease_expiry);
                trigger.updated_at = now;
                refreshed += 1;
            }
        }
        Ok(refreshed)
    }

    async fn force_release_owned(&self, node_id: &str) -> SchedulerResult<u64> {
        let now = self.clock.now_utc();
        let mut triggers = self.triggers.lock().await;
        let mut released = 0;
        for trigger in triggers.values_mut() {
            if trigger.status == JobTriggerStatus::Running && trigger.lock.is_owned_by(node_id) {
                trigger.status = JobTriggerStatus::Runnable;
                trigger.lock = trigger.lock.released();
                trigger.updated_at = now;
                released += 1;
            }
        }
        Ok(released)
    }

    async fn delete_completed_once_older_than(
        &self,
        cutoff: DateTime<Utc>,
    ) -> SchedulerResult<u64> {
        let mut triggers = self.triggers.lock().await;
        let before = triggers.len();
        triggers.retain(|_, t| {
            let finished = matches!(
                t.status,
                JobTriggerStatus::Complete | JobTriggerStatus::Cancelled
            );
            !(finished
                && t.schedule == JobSchedule::Once
                && t.lock.owner.is_none()
                && t.updated_at < cutoff)
        });
        Ok((before - triggers.len()) as u64)
    }

    async fn count_running(&self, job_type: &str, now: DateTime<Utc>) -> SchedulerResult<u64> {
        let triggers = self.triggers.lock().await;
        let running = triggers
            .values()
            .filter(|t| t.job_definition_type == job_type)
            .filter(|t| t.status == JobTriggerStatus::Running && !t.lock.is_expired(now))
            .count();
        Ok(running as u64)
    }

    async fn count_overdue(
        &self,
        namespace: &TriggerNamespace,
        now: DateTime<Utc>,
    ) -> SchedulerResult<HashMap<String, u64>> {
        let triggers = self.triggers.lock().await;
        let mut counts = HashMap::new();
        for trigger in triggers.values() {
            if namespace.contains(&trigger.job_definition_type) && trigger.is_overdue(now) {
                *counts
                    .entry(trigger.job_definition_type.clone())
                    .or_insert(0) += 1;
            }
        }
        Ok(counts)
    }
}

/// 内存作业定义存储
#[derive(Default)]
pub struct InMemoryJobDefinitionStore {
    definitions: Mutex<HashMap<String, JobDefinition>>,
}

impl InMemoryJobDefinitionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobDefinitionStore for InMemoryJobDefinitionStore {
    async fn create(&self, definition: &JobDefinition) -> SchedulerResult<JobDefinition> {
        let mut definitions = self.definitions.lock().await;
        if definitions.contains_key(&definition.id) {
            return Err(SchedulerError::DatabaseOperation(format!(
                "作业定义已存在: {}",
                definition.id
            )));
        }
        definitions.insert(definition.id.clone(), definition.clone());
        Ok(definition.clone())
    }

    async fn get(&self, definition_id: &str) -> SchedulerResult<Option<JobDefinition>> {
        Ok(self.definitions.lock().await.get(definition_id).cloned())
    }

    async fn delete(&self, definition_id: &str) -> SchedulerResult<bool> {
        Ok(self.definitions.lock().await.remove(definition_id).is_some())
    }
}
