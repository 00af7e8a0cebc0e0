use async_trait::async_trait;
use sqlx::{Row, SqlitePool};

use scheduler_core::models::JobDefinition;
use scheduler_core::traits::JobDefinitionStore;
use scheduler_core::{SchedulerError, SchedulerResult};

pub struct SqliteJobDefinitionStore {
    pool: SqlitePool,
}

impl SqliteJobDefinitionStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl JobDefinitionStore for SqliteJobDefinitionStore {
    async fn create(&self, definition: &JobDefinition) -> SchedulerResult<JobDefinition> {
        let result = sqlx::query(
            "INSERT INTO job_definitions (id, type, title, description, config) \
             VALUES (?1, ?2, ?3, ?4, ?5) ON CONFLICT(id) DO NOTHING",
        )
        .bind(&definition.id)
        .bind(&definition.job_type)
        .bind(&definition.title)
        .bind(&definition.description)
        .bind(definition.config.to_string())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(SchedulerError::DatabaseOperation(format!(
                "作业定义已存在: {}",
                definition.id
            )));
        }
        Ok(definition.clone())
    }

    async fn get(&self, definition_id: &str) -> SchedulerResult<Option<JobDefinition>> {
        let row = sqlx::query(
            "SELECT id, type, title, description, config FROM job_definitions WHERE id = ?1",
        )
        .bind(definition_id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => {
                let config: String = row.try_get("config")?;
                Ok(Some(JobDefinition {
                    id: row.try_get("id")?,
                    job_type: row.try_get("type")?,
                    title: row.try_get("title")?,
                    description: row.try_get("description")?,
                    config: serde_json::from_str(&config)?,
                }))
            }
            None => Ok(None),
        }
    }

    async fn delete(&self, definition_id: &str) -> SchedulerResult<bool> {
        let result = sqlx::query("DELETE FROM job_definitions WHERE id = ?1")
            .bind(definition_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
