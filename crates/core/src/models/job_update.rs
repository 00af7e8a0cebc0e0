use chrono::Duration;

/// 作业执行结果，由引擎翻译为触发器状态变更
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobUpdate {
    /// 成功完成，下一次执行时间由调度决定
    Complete,
    /// 延迟后重新执行
    Retry(Duration),
    /// 失败，触发器进入ERROR
    Error(String),
    /// 作业响应取消请求后退出
    Cancelled,
}

impl JobUpdate {
    pub fn retry_in_seconds(seconds: i64) -> Self {
        JobUpdate::Retry(Duration::seconds(seconds))
    }

    pub fn error(message: impl Into<String>) -> Self {
        JobUpdate::Error(message.into())
    }

    pub fn kind(&self) -> &'static str {
        match self {
            JobUpdate::Complete => "complete",
            JobUpdate::Retry(_) => "retry",
            JobUpdate::Error(_) => "error",
            JobUpdate::Cancelled => "cancelled",
        }
    }
}
