//! 调度策略
//!
//! 根据触发器的调度描述计算下一次执行时间。都是纯函数，不读取系统时钟。

use chrono::{DateTime, Duration, Utc};
use scheduler_core::models::{JobSchedule, JobTrigger};
use scheduler_core::{SchedulerError, SchedulerResult};

/// 调度策略集合
#[derive(Debug, Clone, Copy, Default)]
pub struct JobScheduleStrategies;

impl JobScheduleStrategies {
    pub fn new() -> Self {
        Self
    }

    /// 计算下一次执行时间
    ///
    /// - 一次性调度返回 `None`，本次完成即为终态
    /// - 间隔调度返回 `previous + interval`，落后时跳到 `now` 之后的第一个间隔点，不补跑
    /// - CRON 调度返回 `now` 之后的下一个时间点
    ///
    /// 结果超出可表示的时间范围时返回 `InvalidSchedule`。
    pub fn next_execution(
        &self,
        schedule: &JobSchedule,
        previous: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> SchedulerResult<Option<DateTime<Utc>>> {
        match schedule {
            JobSchedule::Once => Ok(None),
            JobSchedule::Interval { .. } => {
                schedule.validate()?;
                let Some(interval) = schedule.interval_duration()? else {
                    return Ok(None);
                };
                next_interval_time(previous, interval, now)
                    .map(Some)
                    .ok_or_else(|| {
                        SchedulerError::InvalidSchedule(format!(
                            "下一次执行时间超出范围: {previous} + {interval}"
                        ))
                    })
            }
            JobSchedule::Cron { .. } => Ok(schedule
                .parse_cron()?
                .and_then(|cron| cron.after(&now).next())),
        }
    }

    /// 触发器的下一次执行时间，超过 `end_time` 时返回 `None`
    pub fn next_time(
        &self,
        trigger: &JobTrigger,
        now: DateTime<Utc>,
    ) -> SchedulerResult<Option<DateTime<Utc>>> {
        let previous = trigger.next_time.unwrap_or(now);
        let next = self.next_execution(&trigger.schedule, previous, now)?;
        Ok(next.filter(|next| trigger.end_time.map_or(true, |end| *next <= end)))
    }
}

fn next_interval_time(
    previous: DateTime<Utc>,
    interval: Duration,
    now: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    let next = previous.checked_add_signed(interval)?;
    if next > now {
        return Some(next);
    }

    let interval_ms = interval.num_milliseconds().max(1);
    let behind_ms = now.signed_duration_since(previous).num_milliseconds();
    let steps = behind_ms / interval_ms + 1;
    let offset = Duration::try_milliseconds(steps.checked_mul(interval_ms)?)?;
    previous.checked_add_signed(offset)
}
