use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// 锁租约时长上限（30天）
pub const MAX_LOCK_EXPIRATION_SECONDS: i64 = 30 * 24 * 3600;

/// 并发限制退避时长上限（1小时）
pub const MAX_CONCURRENCY_BACKOFF_MS: u64 = 3600 * 1000;

/// 清理间隔上限（1年）
pub const MAX_CLEANUP_INTERVAL_SECONDS: i64 = 365 * 24 * 3600;

/// 触发器保留时长上限（10年）
pub const MAX_RETENTION_HOURS: i64 = 10 * 365 * 24;

/// 单个命名调度器的配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub name: String,
    /// 工作池大小
    pub worker_threads: usize,
    /// 两次轮询之间的休眠
    pub loop_sleep_ms: u64,
    /// 锁租约时长
    pub lock_expiration_seconds: i64,
    /// 续租的最小间隔，0 表示每轮都续租
    pub lease_refresh_seconds: i64,
    /// 关闭时等待执行中作业的最长时间
    pub shutdown_timeout_seconds: u64,
    /// 只在主节点上运行
    pub leader_only: bool,
    /// 达到并发上限时的初始退避时长，随重排次数递减
    pub concurrency_backoff_ms: u64,
    /// 按作业类型限制集群范围内同时运行的数量，未列出或为0表示不限制
    pub concurrency_limits: HashMap<String, u32>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            name: "job-scheduler".to_string(),
            worker_threads: 5,
            loop_sleep_ms: 1000,
            lock_expiration_seconds: 300,
            lease_refresh_seconds: 60,
            shutdown_timeout_seconds: 30,
            leader_only: false,
            concurrency_backoff_ms: 5000,
            concurrency_limits: HashMap::new(),
        }
    }
}

impl SchedulerConfig {
    /// 系统作业队列的默认配置
    pub fn system_default() -> Self {
        Self {
            name: "system-job-scheduler".to_string(),
            worker_threads: 2,
            ..Self::default()
        }
    }

    pub fn loop_sleep(&self) -> Duration {
        Duration::from_millis(self.loop_sleep_ms)
    }

    pub fn lock_expiration(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.lock_expiration_seconds.clamp(1, MAX_LOCK_EXPIRATION_SECONDS))
    }

    pub fn lease_refresh_interval(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.lease_refresh_seconds.clamp(0, MAX_LOCK_EXPIRATION_SECONDS))
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_seconds)
    }

    pub fn concurrency_backoff(&self) -> chrono::Duration {
        chrono::Duration::milliseconds(self.concurrency_backoff_ms.min(MAX_CONCURRENCY_BACKOFF_MS) as i64)
    }

    /// 作业类型的并发上限，0 表示不限制
    pub fn concurrency_limit(&self, job_type: &str) -> u32 {
        self.concurrency_limits.get(job_type).copied().unwrap_or(0)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.name.trim().is_empty() {
            return Err(anyhow::anyhow!("调度器名称不能为空"));
        }

        if self.worker_threads == 0 {
            return Err(anyhow::anyhow!("工作线程数必须大于0"));
        }

        if self.loop_sleep_ms == 0 {
            return Err(anyhow::anyhow!("轮询间隔必须大于0"));
        }

        if self.lock_expiration_seconds <= 0 || self.lock_expiration_seconds > MAX_LOCK_EXPIRATION_SECONDS {
            return Err(anyhow::anyhow!(
                "锁租约时长必须在 (0, {}] 秒之间",
                MAX_LOCK_EXPIRATION_SECONDS
            ));
        }

        if self.lease_refresh_seconds < 0 || self.lease_refresh_seconds >= self.lock_expiration_seconds {
            return Err(anyhow::anyhow!(
                "续租间隔必须在 [0, {}) 之间",
                self.lock_expiration_seconds
            ));
        }

        if self.concurrency_backoff_ms == 0 || self.concurrency_backoff_ms > MAX_CONCURRENCY_BACKOFF_MS {
            return Err(anyhow::anyhow!(
                "并发退避时长必须在 (0, {}] 毫秒之间",
                MAX_CONCURRENCY_BACKOFF_MS
            ));
        }

        if self.concurrency_limits.keys().any(|job_type| job_type.trim().is_empty()) {
            return Err(anyhow::anyhow!("并发限制的作业类型不能为空"));
        }

        Ok(())
    }
}

/// 已完成触发器的清理配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CleanupConfig {
    pub enabled: bool,
    pub interval_seconds: i64,
    pub retention_hours: i64,
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_seconds: 3600,
            retention_hours: 24 * 7,
        }
    }
}

impl CleanupConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.interval_seconds <= 0 || self.interval_seconds > MAX_CLEANUP_INTERVAL_SECONDS {
            return Err(anyhow::anyhow!(
                "清理间隔必须在 (0, {}] 秒之间",
                MAX_CLEANUP_INTERVAL_SECONDS
            ));
        }
        if self.retention_hours <= 0 || self.retention_hours > MAX_RETENTION_HOURS {
            return Err(anyhow::anyhow!(
                "保留时长必须在 (0, {}] 小时之间",
                MAX_RETENTION_HOURS
            ));
        }
        Ok(())
    }
}
