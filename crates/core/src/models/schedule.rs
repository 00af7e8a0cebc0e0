use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::{SchedulerError, SchedulerResult};

/// 触发器的调度描述
///
/// 以 `type` 字段区分的标签联合体。未知的变体、非正的间隔和无效的CRON表达式
/// 都在创建触发器时被拒绝，而不是在执行时。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobSchedule {
    /// 只执行一次，成功完成后进入终态
    Once,
    /// 固定间隔重复执行
    Interval { interval: i64, unit: IntervalUnit },
    /// 日历式调度（6或7段CRON表达式，含秒）
    Cron { cron_expression: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntervalUnit {
    Seconds,
    Minutes,
    Hours,
    Days,
}

impl IntervalUnit {
    /// 换算为时长，超出可表示范围时返回 `None`
    pub fn to_duration(self, interval: i64) -> Option<Duration> {
        match self {
            IntervalUnit::Seconds => Duration::try_seconds(interval),
            IntervalUnit::Minutes => Duration::try_minutes(interval),
            IntervalUnit::Hours => Duration::try_hours(interval),
            IntervalUnit::Days => Duration::try_days(interval),
        }
    }
}

impl JobSchedule {
    pub fn once() -> Self {
        JobSchedule::Once
    }

    pub fn interval(interval: i64, unit: IntervalUnit) -> Self {
        JobSchedule::Interval { interval, unit }
    }

    pub fn every_seconds(seconds: i64) -> Self {
        JobSchedule::interval(seconds, IntervalUnit::Seconds)
    }

    pub fn cron(expression: impl Into<String>) -> Self {
        JobSchedule::Cron {
            cron_expression: expression.into(),
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            JobSchedule::Once => "once",
            JobSchedule::Interval { .. } => "interval",
            JobSchedule::Cron { .. } => "cron",
        }
    }

    pub fn is_once(&self) -> bool {
        matches!(self, JobSchedule::Once)
    }

    /// 间隔调度的时长，其他调度返回None
    pub fn interval_duration(&self) -> SchedulerResult<Option<Duration>> {
        match self {
            JobSchedule::Interval { interval, unit } => unit
                .to_duration(*interval)
                .map(Some)
                .ok_or_else(|| {
                    SchedulerError::InvalidSchedule(format!("间隔超出范围: {interval} {unit:?}"))
                }),
            _ => Ok(None),
        }
    }

    /// 解析CRON调度
    pub fn parse_cron(&self) -> SchedulerResult<Option<cron::Schedule>> {
        match self {
            JobSchedule::Cron { cron_expression } => cron::Schedule::from_str(cron_expression)
                .map(Some)
                .map_err(|e| SchedulerError::InvalidCron {
                    expr: cron_expression.clone(),
                    message: e.to_string(),
                }),
            _ => Ok(None),
        }
    }

    /// 校验调度配置
    pub fn validate(&self) -> SchedulerResult<()> {
        match self {
            JobSchedule::Once => Ok(()),
            JobSchedule::Interval { interval, .. } => {
                if *interval <= 0 {
                    return Err(SchedulerError::InvalidSchedule(format!(
                        "间隔必须大于0，当前值: {interval}"
                    )));
                }
                let Some(duration) = self.interval_duration()? else {
                    return Ok(());
                };
                // 间隔本身必须落在可表示的时间范围内
                if DateTime::<Utc>::default().checked_add_signed(duration).is_none() {
                    return Err(SchedulerError::InvalidSchedule(format!(
                        "间隔超出范围: {interval}"
                    )));
                }
                Ok(())
            }
            JobSchedule::Cron { .. } => self.parse_cron().map(|_| ()),
        }
    }

    /// 从带 `type` 标签的JSON解码并校验调度配置
    pub fn from_value(value: serde_json::Value) -> SchedulerResult<Self> {
        let schedule: JobSchedule = serde_json::from_value(value)
            .map_err(|e| SchedulerError::InvalidSchedule(format!("不支持的调度配置: {e}")))?;
        schedule.validate()?;
        Ok(schedule)
    }
}
