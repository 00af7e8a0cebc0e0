use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::JobSchedule;
use crate::SchedulerError;

/// 触发器状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobTriggerStatus {
    Runnable,
    Running,
    Complete,
    Error,
    Cancelled,
}

impl JobTriggerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobTriggerStatus::Runnable => "RUNNABLE",
            JobTriggerStatus::Running => "RUNNING",
            JobTriggerStatus::Complete => "COMPLETE",
            JobTriggerStatus::Error => "ERROR",
            JobTriggerStatus::Cancelled => "CANCELLED",
        }
    }

    /// 终态：引擎不会再调度
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobTriggerStatus::Complete | JobTriggerStatus::Error | JobTriggerStatus::Cancelled
        )
    }
}

impl fmt::Display for JobTriggerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobTriggerStatus {
    type Err = SchedulerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "RUNNABLE" => Ok(JobTriggerStatus::Runnable),
            "RUNNING" => Ok(JobTriggerStatus::Running),
            "COMPLETE" => Ok(JobTriggerStatus::Complete),
            "ERROR" => Ok(JobTriggerStatus::Error),
            "CANCELLED" => Ok(JobTriggerStatus::Cancelled),
            other => Err(SchedulerError::Serialization(format!(
                "未知的触发器状态: {other}"
            ))),
        }
    }
}

/// 触发器执行锁（租约）
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobTriggerLock {
    /// 当前持有者节点ID
    pub owner: Option<String>,
    /// 上一个持有者，释放后保留用于排查
    pub last_owner: Option<String>,
    pub lease_expiry: Option<DateTime<Utc>>,
}

impl JobTriggerLock {
    pub fn held_by(owner: impl Into<String>, lease_expiry: DateTime<Utc>) -> Self {
        Self {
            owner: Some(owner.into()),
            last_owner: None,
            lease_expiry: Some(lease_expiry),
        }
    }

    /// 没有持有者或租约已过期
    pub fn is_free(&self, now: DateTime<Utc>) -> bool {
        self.owner.is_none() || self.is_expired(now)
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        match self.lease_expiry {
            Some(expiry) => expiry <= now,
            None => true,
        }
    }

    pub fn is_owned_by(&self, node_id: &str) -> bool {
        self.owner.as_deref() == Some(node_id)
    }

    /// 释放锁，保留最后持有者
    pub fn released(&self) -> Self {
        Self {
            owner: None,
            last_owner: self.owner.clone().or_else(|| self.last_owner.clone()),
            lease_expiry: None,
        }
    }
}

/// 作业触发器
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobTrigger {
    pub id: String,
    pub job_definition_id: String,
    pub job_definition_type: String,
    pub schedule: JobSchedule,
    pub data: Option<serde_json::Value>,
    pub status: JobTriggerStatus,
    pub next_time: Option<DateTime<Utc>>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub lock: JobTriggerLock,
    pub progress: i32,
    pub last_error_message: Option<String>,
    pub is_cancelled: bool,
    pub triggered_at: Option<DateTime<Utc>>,
    pub last_execution_duration_ms: Option<i64>,
    /// 因作业类型并发上限被连续推迟的次数，正常释放时清零
    #[serde(default)]
    pub concurrency_reschedule_count: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl JobTrigger {
    pub fn builder(
        job_definition_id: impl Into<String>,
        job_definition_type: impl Into<String>,
    ) -> JobTriggerBuilder {
        JobTriggerBuilder::new(job_definition_id, job_definition_type)
    }

    /// 判断该节点此刻能否锁定触发器
    ///
    /// 两种情况可以锁定：
    /// - RUNNABLE、没有有效锁、`next_time` 已到并且处于 start/end 时间窗口内
    /// - RUNNING 但租约已过期，且持有者是其他节点（崩溃恢复）
    ///
    /// 存储的 `acquire_lock` 以同一条件做比较交换。
    pub fn is_runnable_at(&self, node_id: &str, now: DateTime<Utc>) -> bool {
        match self.status {
            JobTriggerStatus::Runnable => {
                self.lock.is_free(now) && self.is_due(now) && self.is_within_window(now)
            }
            JobTriggerStatus::Running => {
                self.lock.is_expired(now) && !self.lock.is_owned_by(node_id)
            }
            _ => false,
        }
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.next_time.is_some_and(|next| next <= now)
    }

    pub fn is_within_window(&self, now: DateTime<Utc>) -> bool {
        let started = self.start_time.map_or(true, |start| start <= now);
        let not_ended = self.end_time.map_or(true, |end| end >= now);
        started && not_ended
    }

    /// 逾期未执行：空闲、RUNNABLE 且 `next_time` 已到
    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        self.status == JobTriggerStatus::Runnable && self.lock.owner.is_none() && self.is_due(now)
    }
}

/// 进度限制在 [0, 100]
pub fn clamp_progress(progress: i32) -> i32 {
    progress.clamp(0, 100)
}

/// 触发器构建器
#[derive(Debug, Clone)]
pub struct JobTriggerBuilder {
    id: Option<String>,
    job_definition_id: String,
    job_definition_type: String,
    schedule: JobSchedule,
    data: Option<serde_json::Value>,
    next_time: Option<DateTime<Utc>>,
    start_time: Option<DateTime<Utc>>,
    end_time: Option<DateTime<Utc>>,
}

impl JobTriggerBuilder {
    pub fn new(job_definition_id: impl Into<String>, job_definition_type: impl Into<String>) -> Self {
        Self {
            id: None,
            job_definition_id: job_definition_id.into(),
            job_definition_type: job_definition_type.into(),
            schedule: JobSchedule::Once,
            data: None,
            next_time: None,
            start_time: None,
            end_time: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_schedule(mut self, schedule: JobSchedule) -> Self {
        self.schedule = schedule;
        self
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn with_next_time(mut self, next_time: DateTime<Utc>) -> Self {
        self.next_time = Some(next_time);
        self
    }

    pub fn with_start_time(mut self, start_time: DateTime<Utc>) -> Self {
        self.start_time = Some(start_time);
        self
    }

    pub fn with_end_time(mut self, end_time: DateTime<Utc>) -> Self {
        self.end_time = Some(end_time);
        self
    }

    /// 构建 RUNNABLE 状态的触发器，未指定 `next_time` 时使用 `now`
    pub fn build(self, now: DateTime<Utc>) -> JobTrigger {
        JobTrigger {
            id: self.id.unwrap_or_else(|| Uuid::new_v4().to_string()),
            job_definition_id: self.job_definition_id,
            job_definition_type: self.job_definition_type,
            schedule: self.schedule,
            data: self.data,
            status: JobTriggerStatus::Runnable,
            next_time: Some(self.next_time.unwrap_or(now)),
            start_time: self.start_time,
            end_time: self.end_time,
            lock: JobTriggerLock::default(),
            progress: 0,
            last_error_message: None,
            is_cancelled: false,
            triggered_at: None,
            last_execution_duration_ms: None,
            concurrency_reschedule_count: 0,
            created_at: now,
            updated_at: now,
        }
    }
}
