use std::path::Path;

use anyhow::{Context, Result};
use config::{Config as ConfigBuilder, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};

use super::{
    database::DatabaseConfig,
    node_observability::{NodeConfig, ObservabilityConfig},
    scheduler::{CleanupConfig, SchedulerConfig},
};

/// 应用配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub node: NodeConfig,
    pub database: DatabaseConfig,
    /// 用户作业队列
    pub scheduler: SchedulerConfig,
    /// 系统作业队列
    pub system_scheduler: SchedulerConfig,
    pub cleanup: CleanupConfig,
    pub observability: ObservabilityConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            node: NodeConfig::default(),
            database: DatabaseConfig::default(),
            scheduler: SchedulerConfig::default(),
            system_scheduler: SchedulerConfig::system_default(),
            cleanup: CleanupConfig::default(),
            observability: ObservabilityConfig::default(),
        }
    }
}

impl AppConfig {
    /// 从配置文件和环境变量加载配置
    ///
    /// 加载顺序：
    /// 1. 默认配置
    /// 2. 配置文件（TOML格式）
    /// 3. 环境变量覆盖（前缀 `SCHEDULER_`，层级分隔符 `__`，
    ///    例如 `SCHEDULER_DATABASE__URL`）
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let mut builder = ConfigBuilder::builder();

        if let Some(path) = config_path {
            if !Path::new(path).exists() {
                return Err(anyhow::anyhow!("配置文件不存在: {}", path));
            }
            builder = builder.add_source(File::new(path, FileFormat::Toml));
        } else {
            let default_paths = ["config/scheduler.toml", "scheduler.toml"];
            if let Some(path) = default_paths.iter().find(|p| Path::new(p).exists()) {
                builder = builder.add_source(File::new(path, FileFormat::Toml));
            }
        }

        builder = builder.add_source(
            Environment::with_prefix("SCHEDULER")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config: AppConfig = builder
            .build()
            .context("构建配置失败")?
            .try_deserialize()
            .context("反序列化配置失败")?;

        config.validate()?;
        Ok(config)
    }

    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(toml_str).context("解析TOML配置失败")?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("序列化配置为TOML失败")
    }

    pub fn validate(&self) -> Result<()> {
        self.node.validate().context("节点配置验证失败")?;
        self.database.validate().context("数据库配置验证失败")?;
        self.scheduler.validate().context("调度器配置验证失败")?;
        self.system_scheduler
            .validate()
            .context("系统调度器配置验证失败")?;
        self.cleanup.validate().context("清理配置验证失败")?;
        self.observability
            .validate()
            .context("可观测性配置验证失败")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config_is_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert!(config.database.is_in_memory());
        assert_eq!(config.system_scheduler.name, "system-job-scheduler");
        assert!(!config.node.node_id.is_empty());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config = AppConfig::from_toml(
            r#"
            [node]
            node_id = "node-a"

            [scheduler]
            worker_threads = 8
            loop_sleep_ms = 250
            "#,
        )
        .unwrap();

        assert_eq!(config.node.node_id, "node-a");
        assert_eq!(config.scheduler.worker_threads, 8);
        assert_eq!(config.scheduler.loop_sleep_ms, 250);
        assert_eq!(config.scheduler.lock_expiration_seconds, 300);
        assert_eq!(config.cleanup, CleanupConfig::default());
    }

    #[test]
    fn test_toml_round_trip() {
        let mut config = AppConfig::default();
        config.node.node_id = "node-b".to_string();
        config.database.url = "sqlite://scheduler.db".to_string();

        let text = config.to_toml().unwrap();
        let parsed = AppConfig::from_toml(&text).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        assert!(AppConfig::from_toml("[scheduler]\nworker_threads = 0").is_err());
        assert!(AppConfig::from_toml("[database]\nurl = \"postgres://db\"").is_err());
        assert!(AppConfig::from_toml("[observability]\nlog_format = \"xml\"").is_err());
        assert!(AppConfig::from_toml(
            "[scheduler]\nlock_expiration_seconds = 30\nlease_refresh_seconds = 60"
        )
        .is_err());
    }

    #[test]
    fn test_unbounded_durations_are_rejected() {
        assert!(AppConfig::from_toml(&format!(
            "[scheduler]\nlock_expiration_seconds = {}",
            i64::MAX
        ))
        .is_err());
        assert!(AppConfig::from_toml(
            "[system_scheduler]\nlock_expiration_seconds = 2592001\nlease_refresh_seconds = 60"
        )
        .is_err());
        assert!(AppConfig::from_toml("[scheduler]\nconcurrency_backoff_ms = 0").is_err());
        assert!(AppConfig::from_toml(&format!("[cleanup]\ninterval_seconds = {}", i64::MAX)).is_err());
        assert!(AppConfig::from_toml(&format!("[cleanup]\nretention_hours = {}", i64::MAX)).is_err());

        let mut config = SchedulerConfig {
            lock_expiration_seconds: i64::MAX,
            ..SchedulerConfig::default()
        };
        assert!(config.validate().is_err());
        // 未校验的配置也不会在换算时panic
        assert_eq!(config.lock_expiration().num_days(), 30);
        config.lease_refresh_seconds = i64::MAX;
        assert_eq!(config.lease_refresh_interval().num_days(), 30);
    }

    #[test]
    fn test_concurrency_limits_from_toml() {
        let config = AppConfig::from_toml(
            r#"
            [scheduler]
            concurrency_backoff_ms = 2000

            [scheduler.concurrency_limits]
            "event-processor" = 2
            "#,
        )
        .unwrap();

        assert_eq!(config.scheduler.concurrency_limit("event-processor"), 2);
        assert_eq!(config.scheduler.concurrency_limit("rotate-index"), 0);
        assert_eq!(config.scheduler.concurrency_backoff().num_milliseconds(), 2000);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "[node]\nnode_id = \"file-node\"\n[cleanup]\nretention_hours = 12"
        )
        .unwrap();

        let config = AppConfig::load(file.path().to_str()).unwrap();
        assert_eq!(config.node.node_id, "file-node");
        assert_eq!(config.cleanup.retention_hours, 12);
    }

    #[test]
    fn test_load_missing_file_fails() {
        assert!(AppConfig::load(Some("/nonexistent/scheduler.toml")).is_err());
    }
}
