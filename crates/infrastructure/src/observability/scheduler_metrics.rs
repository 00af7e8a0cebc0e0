//! 调度器指标
//!
//! 只通过 `metrics` 门面记录，导出器由宿主进程安装。

use std::collections::HashMap;

use metrics::{counter, gauge, histogram, Counter, Gauge, Histogram};

/// 单个命名调度器的指标，所有指标带 `scheduler` 标签
#[derive(Clone)]
pub struct SchedulerMetrics {
    scheduler: String,
    executions_successful: Counter,
    executions_failed: Counter,
    executions_denied: Counter,
    executions_rescheduled: Counter,
    execution_time: Histogram,
    worker_slots_in_use: Gauge,
}

impl SchedulerMetrics {
    pub fn new(scheduler: &str) -> Self {
        let label = scheduler.to_string();
        Self {
            scheduler: label.clone(),
            executions_successful: counter!("job_scheduler_executions_successful_total", "scheduler" => label.clone()),
            executions_failed: counter!("job_scheduler_executions_failed_total", "scheduler" => label.clone()),
            executions_denied: counter!("job_scheduler_executions_denied_total", "scheduler" => label.clone()),
            executions_rescheduled: counter!("job_scheduler_executions_rescheduled_total", "scheduler" => label.clone()),
            execution_time: histogram!("job_scheduler_execution_time_seconds", "scheduler" => label.clone()),
            worker_slots_in_use: gauge!("job_scheduler_worker_slots_in_use", "scheduler" => label),
        }
    }

    pub fn record_successful(&self) {
        self.executions_successful.increment(1);
    }

    pub fn record_failed(&self) {
        self.executions_failed.increment(1);
    }

    pub fn record_denied(&self) {
        self.executions_denied.increment(1);
    }

    pub fn record_rescheduled(&self) {
        self.executions_rescheduled.increment(1);
    }

    pub fn record_execution_time(&self, duration_seconds: f64) {
        self.execution_time.record(duration_seconds);
    }

    pub fn set_slots_in_use(&self, slots: usize) {
        self.worker_slots_in_use.set(slots as f64);
    }

    /// 按作业类型更新逾期触发器数量
    pub fn set_overdue(&self, overdue: &HashMap<String, u64>) {
        for (job_type, count) in overdue {
            gauge!(
                "job_scheduler_overdue_triggers",
                "scheduler" => self.scheduler.clone(),
                "job_type" => job_type.clone()
            )
            .set(*count as f64);
        }
    }
}

impl std::fmt::Debug for SchedulerMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchedulerMetrics")
            .field("scheduler", &self.scheduler)
            .finish()
    }
}
