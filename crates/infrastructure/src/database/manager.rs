use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use tracing::info;

use scheduler_core::config::DatabaseConfig;
use scheduler_core::{JobSchedulerClock, SchedulerResult};

use super::sqlite::{SqliteJobDefinitionStore, SqliteTriggerStore};

const MIGRATIONS: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS job_triggers (
        id TEXT PRIMARY KEY,
        job_definition_id TEXT NOT NULL,
        job_definition_type TEXT NOT NULL,
        schedule TEXT NOT NULL,
        schedule_type TEXT NOT NULL,
        data TEXT,
        status TEXT NOT NULL,
        next_time INTEGER,
        start_time INTEGER,
        end_time INTEGER,
        lock_owner TEXT,
        lock_last_owner TEXT,
        lock_expiry INTEGER,
        progress INTEGER NOT NULL DEFAULT 0,
        last_error_message TEXT,
        is_cancelled INTEGER NOT NULL DEFAULT 0,
        triggered_at INTEGER,
        last_execution_duration_ms INTEGER,
        concurrency_reschedule_count INTEGER NOT NULL DEFAULT 0,
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_job_triggers_status_next_time ON job_triggers (status, next_time)",
    "CREATE INDEX IF NOT EXISTS idx_job_triggers_lock_owner ON job_triggers (lock_owner)",
    "CREATE INDEX IF NOT EXISTS idx_job_triggers_type_status ON job_triggers (job_definition_type, status)",
    r#"
    CREATE TABLE IF NOT EXISTS job_definitions (
        id TEXT PRIMARY KEY,
        type TEXT NOT NULL,
        title TEXT NOT NULL,
        description TEXT NOT NULL,
        config TEXT NOT NULL
    )
    "#,
];

/// SQLite数据库管理器
///
/// 负责连接池、表结构迁移，并为调度器创建存储实例。
pub struct DatabaseManager {
    pool: SqlitePool,
}

impl DatabaseManager {
    pub async fn new(url: &str, max_connections: u32) -> SchedulerResult<Self> {
        let config = DatabaseConfig {
            url: url.to_string(),
            max_connections,
            ..DatabaseConfig::default()
        };
        Self::connect(&config).await
    }

    /// 建立连接池并执行迁移
    pub async fn connect(config: &DatabaseConfig) -> SchedulerResult<Self> {
        let options = SqliteConnectOptions::from_str(&config.url)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(config.connection_timeout_seconds));

        let mut pool_options = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.connection_timeout_seconds))
            .idle_timeout(Duration::from_secs(config.idle_timeout_seconds));

        // 内存数据库每个连接都是独立的库，只能保持一个常驻连接
        if config.url.contains(":memory:") {
            pool_options = pool_options
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None);
        }

        let pool = pool_options.connect_with(options).await?;

        let manager = Self { pool };
        manager.migrate().await?;
        info!("数据库连接成功: {}", config.url);
        Ok(manager)
    }

    pub async fn migrate(&self) -> SchedulerResult<()> {
        for statement in MIGRATIONS {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    pub async fn health_check(&self) -> SchedulerResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn trigger_store(&self, clock: Arc<dyn JobSchedulerClock>) -> SqliteTriggerStore {
        SqliteTriggerStore::new(self.pool.clone(), clock)
    }

    pub fn definition_store(&self) -> SqliteJobDefinitionStore {
        SqliteJobDefinitionStore::new(self.pool.clone())
    }
}
