use thiserror::Error;

/// 调度器错误类型定义
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("数据库错误: {0}")]
    Database(#[from] sqlx::Error),

    #[error("数据库操作错误: {0}")]
    DatabaseOperation(String),

    #[error("触发器未找到: {id}")]
    TriggerNotFound { id: String },

    #[error("触发器已存在: {id}")]
    DuplicateTrigger { id: String },

    #[error("作业定义未找到: {id}")]
    JobDefinitionNotFound { id: String },

    #[error("未注册的作业类型: {0}")]
    UnknownJobType(String),

    #[error("无效的调度配置: {0}")]
    InvalidSchedule(String),

    #[error("无效的CRON表达式: {expr} - {message}")]
    InvalidCron { expr: String, message: String },

    #[error("序列化错误: {0}")]
    Serialization(String),

    #[error("配置错误: {0}")]
    Configuration(String),

    #[error("作业执行错误: {0}")]
    JobExecution(String),

    #[error("触发器锁已丢失: {trigger_id}")]
    LockLost { trigger_id: String },

    #[error("内部错误: {0}")]
    Internal(String),
}

impl From<serde_json::Error> for SchedulerError {
    fn from(err: serde_json::Error) -> Self {
        SchedulerError::Serialization(err.to_string())
    }
}

impl SchedulerError {
    /// 配置类缺陷，重试无法修复
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            SchedulerError::UnknownJobType(_)
                | SchedulerError::JobDefinitionNotFound { .. }
                | SchedulerError::InvalidSchedule(_)
                | SchedulerError::InvalidCron { .. }
                | SchedulerError::Configuration(_)
        )
    }
}

/// 统一的Result类型
pub type Result<T> = std::result::Result<T, SchedulerError>;
