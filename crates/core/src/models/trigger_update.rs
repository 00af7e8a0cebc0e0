use chrono::{DateTime, Utc};

use super::{JobTrigger, JobTriggerStatus};

/// 释放锁时写回的触发器变更
///
/// 未显式指定状态时：有 `next_time` 则回到 RUNNABLE，否则进入 COMPLETE。
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobTriggerUpdate {
    pub next_time: Option<DateTime<Utc>>,
    pub status: Option<JobTriggerStatus>,
    pub data: Option<serde_json::Value>,
    pub error_message: Option<String>,
    /// 因并发上限推迟，累加触发器的推迟计数；否则计数清零
    pub concurrency_reschedule: bool,
}

impl JobTriggerUpdate {
    pub fn with_next_time(next_time: DateTime<Utc>) -> Self {
        Self {
            next_time: Some(next_time),
            ..Default::default()
        }
    }

    /// 没有下一次执行，默认进入终态 COMPLETE
    pub fn without_next_time() -> Self {
        Self::default()
    }

    pub fn with_error(message: impl Into<String>) -> Self {
        Self {
            status: Some(JobTriggerStatus::Error),
            error_message: Some(message.into()),
            ..Default::default()
        }
    }

    /// 达到作业类型并发上限，推迟到 `next_time` 再试
    pub fn with_concurrency_reschedule(next_time: DateTime<Utc>) -> Self {
        Self {
            next_time: Some(next_time),
            status: Some(JobTriggerStatus::Runnable),
            concurrency_reschedule: true,
            ..Default::default()
        }
    }

    pub fn with_status(status: JobTriggerStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    /// 保持原有的 `next_time`，触发器回到 RUNNABLE
    pub fn unchanged(trigger: &JobTrigger) -> Self {
        Self {
            next_time: trigger.next_time,
            status: Some(JobTriggerStatus::Runnable),
            ..Default::default()
        }
    }

    pub fn and_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn resolved_status(&self) -> JobTriggerStatus {
        match (self.status, self.next_time) {
            (Some(status), _) => status,
            (None, Some(_)) => JobTriggerStatus::Runnable,
            (None, None) => JobTriggerStatus::Complete,
        }
    }

    /// 将变更应用到触发器并释放锁
    pub fn apply_to(&self, trigger: &mut JobTrigger, now: DateTime<Utc>) {
        trigger.status = self.resolved_status();
        trigger.next_time = self.next_time;
        if let Some(data) = &self.data {
            trigger.data = Some(data.clone());
        }
        if let Some(message) = &self.error_message {
            trigger.last_error_message = Some(message.clone());
        }
        if self.concurrency_reschedule {
            trigger.concurrency_reschedule_count = trigger.concurrency_reschedule_count.saturating_add(1);
        } else {
            trigger.concurrency_reschedule_count = 0;
        }
        if let Some(triggered_at) = trigger.triggered_at {
            trigger.last_execution_duration_ms = Some((now - triggered_at).num_milliseconds());
        }
        trigger.lock = trigger.lock.released();
        trigger.updated_at = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::JobTriggerLock;
    use chrono::{Duration, TimeZone};

    #[test]
    fn test_resolved_status_defaults() {
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(
            JobTriggerUpdate::with_next_time(now).resolved_status(),
            JobTriggerStatus::Runnable
        );
        assert_eq!(
            JobTriggerUpdate::without_next_time().resolved_status(),
            JobTriggerStatus::Complete
        );
        assert_eq!(
            JobTriggerUpdate::with_error("boom").resolved_status(),
            JobTriggerStatus::Error
        );
    }

    #[test]
    fn test_apply_releases_lock_and_records_duration() {
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let mut trigger = JobTrigger::builder("d", "t").build(now);
        trigger.status = JobTriggerStatus::Running;
        trigger.lock = JobTriggerLock::held_by("node-a", now + Duration::seconds(60));
        trigger.triggered_at = Some(now);

        let later = now + Duration::seconds(3);
        JobTriggerUpdate::with_error("boom").apply_to(&mut trigger, later);

        assert_eq!(trigger.status, JobTriggerStatus::Error);
        assert_eq!(trigger.last_error_message.as_deref(), Some("boom"));
        assert_eq!(trigger.lock.owner, None);
        assert_eq!(trigger.lock.last_owner.as_deref(), Some("node-a"));
        assert_eq!(trigger.last_execution_duration_ms, Some(3000));
        assert_eq!(trigger.next_time, None);
    }

    #[test]
    fn test_concurrency_reschedule_counts_until_normal_release() {
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let mut trigger = JobTrigger::builder("d", "t").build(now);
        let later = now + Duration::seconds(5);

        for expected in 1..=3 {
            trigger.status = JobTriggerStatus::Running;
            JobTriggerUpdate::with_concurrency_reschedule(later).apply_to(&mut trigger, now);
            assert_eq!(trigger.status, JobTriggerStatus::Runnable);
            assert_eq!(trigger.next_time, Some(later));
            assert_eq!(trigger.concurrency_reschedule_count, expected);
        }

        JobTriggerUpdate::with_next_time(later).apply_to(&mut trigger, now);
        assert_eq!(trigger.concurrency_reschedule_count, 0);
    }
}
