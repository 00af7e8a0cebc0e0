//! 结构化日志
//!
//! 调度关键事件统一以 `event` 字段标记，便于日志系统检索。

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};

use scheduler_core::models::JobTrigger;

pub struct StructuredLogger;

impl StructuredLogger {
    pub fn log_trigger_locked(trigger: &JobTrigger, node_id: &str, lease_expiry: DateTime<Utc>) {
        debug!(
            event = "trigger_locked",
            trigger.id = %trigger.id,
            job.type = %trigger.job_definition_type,
            node.id = node_id,
            lock.lease_expiry = %lease_expiry,
            "Trigger locked for execution"
        );
    }

    pub fn log_execution_start(trigger: &JobTrigger, node_id: &str) {
        info!(
            event = "job_execution_start",
            trigger.id = %trigger.id,
            job.type = %trigger.job_definition_type,
            job.definition_id = %trigger.job_definition_id,
            node.id = node_id,
            "Job execution started"
        );
    }

    pub fn log_execution_complete(
        trigger: &JobTrigger,
        node_id: &str,
        outcome: &str,
        duration_ms: i64,
    ) {
        info!(
            event = "job_execution_complete",
            trigger.id = %trigger.id,
            job.type = %trigger.job_definition_type,
            node.id = node_id,
            job.outcome = outcome,
            job.duration_ms = duration_ms,
            "Job execution finished"
        );
    }

    pub fn log_execution_failed(trigger: &JobTrigger, node_id: &str, error_message: &str) {
        error!(
            event = "job_execution_failed",
            trigger.id = %trigger.id,
            job.type = %trigger.job_definition_type,
            node.id = node_id,
            error.message = error_message,
            "Job execution failed"
        );
    }

    pub fn log_execution_denied(trigger: &JobTrigger, node_id: &str) {
        warn!(
            event = "job_execution_denied",
            trigger.id = %trigger.id,
            job.type = %trigger.job_definition_type,
            node.id = node_id,
            "Worker pool refused the job, trigger released unchanged"
        );
    }

    pub fn log_concurrency_limited(
        trigger: &JobTrigger,
        node_id: &str,
        running: u64,
        limit: u32,
        next_time: DateTime<Utc>,
    ) {
        info!(
            event = "job_concurrency_limited",
            trigger.id = %trigger.id,
            job.type = %trigger.job_definition_type,
            node.id = node_id,
            job.running = running,
            job.concurrency_limit = limit,
            trigger.next_time = %next_time,
            trigger.reschedule_count = trigger.concurrency_reschedule_count,
            "Job type concurrency limit reached, trigger rescheduled"
        );
    }

    pub fn log_lock_lost(trigger: &JobTrigger, node_id: &str) {
        warn!(
            event = "trigger_lock_lost",
            trigger.id = %trigger.id,
            job.type = %trigger.job_definition_type,
            node.id = node_id,
            "Trigger lock no longer held, result discarded"
        );
    }

    pub fn log_unknown_job_type(trigger: &JobTrigger, node_id: &str) {
        error!(
            event = "unknown_job_type",
            trigger.id = %trigger.id,
            job.type = %trigger.job_definition_type,
            node.id = node_id,
            "No job factory registered for trigger type"
        );
    }

    pub fn log_leases_refreshed(scheduler: &str, node_id: &str, count: u64) {
        debug!(
            event = "trigger_leases_refreshed",
            scheduler = scheduler,
            node.id = node_id,
            count = count,
            "Trigger leases refreshed"
        );
    }

    pub fn log_startup_cleanup(scheduler: &str, node_id: &str, released: u64) {
        info!(
            event = "trigger_startup_cleanup",
            scheduler = scheduler,
            node.id = node_id,
            released = released,
            "Released triggers left locked by this node"
        );
    }
}
