use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};
use tracing::{debug, instrument};

use scheduler_core::models::{
    clamp_progress, JobSchedule, JobTrigger, JobTriggerLock, JobTriggerUpdate, TriggerNamespace,
};
use scheduler_core::traits::JobTriggerStore;
use scheduler_core::{JobSchedulerClock, SchedulerError, SchedulerResult};

use super::{from_millis, from_optional_millis, to_millis};

const TRIGGER_COLUMNS: &str = "id, job_definition_id, job_definition_type, schedule, data, status, \
     next_time, start_time, end_time, lock_owner, lock_last_owner, lock_expiry, progress, \
     last_error_message, is_cancelled, triggered_at, last_execution_duration_ms, \
     concurrency_reschedule_count, created_at, updated_at";

/// SQLite触发器存储
///
/// 多个节点打开同一个数据库文件。每个改变锁状态的操作都是一条带条件的
/// `UPDATE`，由 `rows_affected` 判断是否成功。
pub struct SqliteTriggerStore {
    pool: SqlitePool,
    clock: Arc<dyn JobSchedulerClock>,
}

impl SqliteTriggerStore {
    pub fn new(pool: SqlitePool, clock: Arc<dyn JobSchedulerClock>) -> Self {
        Self { pool, clock }
    }

    fn row_to_trigger(row: &SqliteRow) -> SchedulerResult<JobTrigger> {
        let schedule: String = row.try_get("schedule")?;
        let data: Option<String> = row.try_get("data")?;
        let status: String = row.try_get("status")?;

        Ok(JobTrigger {
            id: row.try_get("id")?,
            job_definition_id: row.try_get("job_definition_id")?,
            job_definition_type: row.try_get("job_definition_type")?,
            schedule: serde_json::from_str(&schedule)?,
            data: data.map(|d| serde_json::from_str(&d)).transpose()?,
            status: status.parse()?,
            next_time: from_optional_millis(row.try_get("next_time")?)?,
            start_time: from_optional_millis(row.try_get("start_time")?)?,
            end_time: from_optional_millis(row.try_get("end_time")?)?,
            lock: JobTriggerLock {
                owner: row.try_get("lock_owner")?,
                last_owner: row.try_get("lock_last_owner")?,
                lease_expiry: from_optional_millis(row.try_get("lock_expiry")?)?,
            },
            progress: row.try_get("progress")?,
            last_error_message: row.try_get("last_error_message")?,
            is_cancelled: row.try_get("is_cancelled")?,
            triggered_at: from_optional_millis(row.try_get("triggered_at")?)?,
            last_execution_duration_ms: row.try_get("last_execution_duration_ms")?,
            concurrency_reschedule_count: row.try_get("concurrency_reschedule_count")?,
            created_at: from_millis(row.try_get("created_at")?)?,
            updated_at: from_millis(row.try_get("updated_at")?)?,
        })
    }
}

/// 可运行条件，与 `JobTrigger::is_runnable_at` 一致
fn push_runnable_condition<'a>(
    builder: &mut QueryBuilder<'a, Sqlite>,
    node_id: &str,
    now: i64,
) {
    builder
        .push("((status = 'RUNNABLE' AND (lock_owner IS NULL OR lock_expiry IS NULL OR lock_expiry <= ")
        .push_bind(now)
        .push(") AND next_time IS NOT NULL AND next_time <= ")
        .push_bind(now)
        .push(" AND (start_time IS NULL OR start_time <= ")
        .push_bind(now)
        .push(") AND (end_time IS NULL OR end_time >= ")
        .push_bind(now)
        .push(")) OR (status = 'RUNNING' AND (lock_expiry IS NULL OR lock_expiry <= ")
        .push_bind(now)
        .push(") AND (lock_owner IS NULL OR lock_owner != ")
        .push_bind(node_id.to_string())
        .push(")))");
}

fn push_namespace_condition<'a>(builder: &mut QueryBuilder<'a, Sqlite>, namespace: &TriggerNamespace) {
    match namespace {
        TriggerNamespace::All => {}
        TriggerNamespace::Only(types) if types.is_empty() => {
            builder.push(" AND 0");
        }
        TriggerNamespace::Except(types) if types.is_empty() => {}
        TriggerNamespace::Only(types) | TriggerNamespace::Except(types) => {
            let op = if matches!(namespace, TriggerNamespace::Only(_)) {
                " AND job_definition_type IN ("
            } else {
                " AND job_definition_type NOT IN ("
            };
            builder.push(op);
            let mut separated = builder.separated(", ");
            for job_type in types {
                separated.push_bind(job_type.clone());
            }
            separated.push_unseparated(")");
        }
    }
}

#[async_trait]
impl JobTriggerStore for SqliteTriggerStore {
    #[instrument(skip(self, trigger), fields(
        trigger.id = %trigger.id,
        job.type = %trigger.job_definition_type,
    ))]
    async fn create(&self, trigger: &JobTrigger) -> SchedulerResult<JobTrigger> {
        trigger.schedule.validate()?;

        let result = sqlx::query(
            r#"
            INSERT INTO job_triggers (id, job_definition_id, job_definition_type, schedule, schedule_type,
                                      data, status, next_time, start_time, end_time, lock_owner,
                                      lock_last_owner, lock_expiry, progress, last_error_message,
                                      is_cancelled, triggered_at, last_execution_duration_ms,
                                      concurrency_reschedule_count, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20, ?21)
            ON CONFLICT(id) DO NOTHING
            "#,
        )
        .bind(&trigger.id)
        .bind(&trigger.job_definition_id)
        .bind(&trigger.job_definition_type)
        .bind(serde_json::to_string(&trigger.schedule)?)
        .bind(trigger.schedule.type_name())
        .bind(trigger.data.as_ref().map(|d| d.to_string()))
        .bind(trigger.status.as_str())
        .bind(trigger.next_time.map(to_millis))
        .bind(trigger.start_time.map(to_millis))
        .bind(trigger.end_time.map(to_millis))
        .bind(&trigger.lock.owner)
        .bind(&trigger.lock.last_owner)
        .bind(trigger.lock.lease_expiry.map(to_millis))
        .bind(clamp_progress(trigger.progress))
        .bind(&trigger.last_error_message)
        .bind(trigger.is_cancelled)
        .bind(trigger.triggered_at.map(to_millis))
        .bind(trigger.last_execution_duration_ms)
        .bind(trigger.concurrency_reschedule_count)
        .bind(to_millis(trigger.created_at))
        .bind(to_millis(trigger.updated_at))
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(SchedulerError::DuplicateTrigger {
                id: trigger.id.clone(),
            });
        }
        debug!("创建触发器: {}", trigger.id);
        Ok(trigger.clone())
    }

    async fn get(&self, trigger_id: &str) -> SchedulerResult<Option<JobTrigger>> {
        let row = sqlx::query(&format!(
            "SELECT {TRIGGER_COLUMNS} FROM job_triggers WHERE id = ?1"
        ))
        .bind(trigger_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::row_to_trigger).transpose()
    }

    async fn all(&self) -> SchedulerResult<Vec<JobTrigger>> {
        let rows = sqlx::query(&format!(
            "SELECT {TRIGGER_COLUMNS} FROM job_triggers ORDER BY created_at, id"
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::row_to_trigger).collect()
    }

    async fn delete(&self, trigger_id: &str) -> SchedulerResult<bool> {
        let result = sqlx::query("DELETE FROM job_triggers WHERE id = ?1")
            .bind(trigger_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn find_runnable(
        &self,
        node_id: &str,
        namespace: &TriggerNamespace,
        now: DateTime<Utc>,
        limit: usize,
    ) -> SchedulerResult<Vec<JobTrigger>> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let mut builder: QueryBuilder<Sqlite> =
            QueryBuilder::new(format!("SELECT {TRIGGER_COLUMNS} FROM job_triggers WHERE "));
        push_runnable_condition(&mut builder, node_id, to_millis(now));
        push_namespace_condition(&mut builder, namespace);
        builder
            .push(" ORDER BY next_time ASC, id ASC LIMIT ")
            .push_bind(i64::try_from(limit).unwrap_or(i64::MAX));

        let rows = builder.build().fetch_all(&self.pool).await?;
        rows.iter().map(Self::row_to_trigger).collect()
    }

    #[instrument(skip(self, lease_expiry), fields(trigger.id = %trigger_id, node.id = %node_id))]
    async fn acquire_lock(
        &self,
        trigger_id: &str,
        node_id: &str,
        lease_expiry: DateTime<Utc>,
    ) -> SchedulerResult<bool> {
        let now = to_millis(self.clock.now_utc());

        let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new(
            "UPDATE job_triggers SET status = 'RUNNING', \
             lock_last_owner = COALESCE(lock_owner, lock_last_owner), lock_owner = ",
        );
        builder
            .push_bind(node_id.to_string())
            .push(", lock_expiry = ")
            .push_bind(to_millis(lease_expiry))
            .push(", triggered_at = ")
            .push_bind(now)
            .push(", progress = 0, updated_at = ")
            .push_bind(now)
            .push(" WHERE id = ")
            .push_bind(trigger_id.to_string())
            .push(" AND ");
        push_runnable_condition(&mut builder, node_id, now);

        let result = builder.build().execute(&self.pool).await?;
        Ok(result.rows_affected() == 1)
    }

    #[instrument(skip(self, update), fields(trigger.id = %trigger_id, node.id = %node_id))]
    async fn release_lock_and_update(
        &self,
        trigger_id: &str,
        node_id: &str,
        update: &JobTriggerUpdate,
    ) -> SchedulerResult<bool> {
        let now = to_millis(self.clock.now_utc());

        let result = sqlx::query(
            r#"
            UPDATE job_triggers
            SET status = ?3,
                next_time = ?4,
                data = COALESCE(?5, data),
                last_error_message = COALESCE(?6, last_error_message),
                last_execution_duration_ms = CASE
                    WHEN triggered_at IS NULL THEN last_execution_duration_ms
                    ELSE ?7 - triggered_at
                END,
                concurrency_reschedule_count = CASE
                    WHEN ?8 THEN concurrency_reschedule_count + 1
                    ELSE 0
                END,
                lock_last_owner = lock_owner,
                lock_owner = NULL,
                lock_expiry = NULL,
                updated_at = ?7
            WHERE id = ?1 AND lock_owner = ?2 AND status = 'RUNNING'
            "#,
        )
        .bind(trigger_id)
        .bind(node_id)
        .bind(update.resolved_status().as_str())
        .bind(update.next_time.map(to_millis))
        .bind(update.data.as_ref().map(|d| d.to_string()))
        .bind(&update.error_message)
        .bind(now)
        .bind(update.concurrency_reschedule)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn update_progress(
        &self,
        trigger_id: &str,
        node_id: &str,
        progress: i32,
    ) -> SchedulerResult<()> {
        sqlx::query(
            "UPDATE job_triggers SET progress = ?3, updated_at = ?4 \
             WHERE id = ?1 AND lock_owner = ?2 AND status = 'RUNNING'",
        )
        .bind(trigger_id)
        .bind(node_id)
        .bind(clamp_progress(progress))
        .bind(to_millis(self.clock.now_utc()))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn is_cancelled(&self, trigger_id: &str) -> SchedulerResult<bool> {
        let cancelled: Option<bool> =
            sqlx::query_scalar("SELECT is_cancelled FROM job_triggers WHERE id = ?1")
                .bind(trigger_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(cancelled.unwrap_or(false))
    }

    async fn cancel(&self, trigger_id: &str) -> SchedulerResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE job_triggers
            SET is_cancelled = 1,
                status = CASE
                    WHEN status = 'RUNNABLE' AND lock_owner IS NULL THEN 'CANCELLED'
                    ELSE status
                END,
                updated_at = ?2
            WHERE id = ?1
            "#,
        )
        .bind(trigger_id)
        .bind(to_millis(self.clock.now_utc()))
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn refresh_leases(
        &self,
        node_id: &str,
        lease_expiry: DateTime<Utc>,
    ) -> SchedulerResult<u64> {
        let result = sqlx::query(
            "UPDATE job_triggers SET lock_expiry = ?2, updated_at = ?3 \
             WHERE status = 'RUNNING' AND lock_owner = ?1",
        )
        .bind(node_id)
        .bind(to_millis(lease_expiry))
        .bind(to_millis(self.clock.now_utc()))
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn force_release_owned(&self, node_id: &str) -> SchedulerResult<u64> {
        let result = sqlx::query(
            "UPDATE job_triggers SET status = 'RUNNABLE', lock_last_owner = lock_owner, \
             lock_owner = NULL, lock_expiry = NULL, updated_at = ?2 \
             WHERE status = 'RUNNING' AND lock_owner = ?1",
        )
        .bind(node_id)
        .bind(to_millis(self.clock.now_utc()))
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn delete_completed_once_older_than(
        &self,
        cutoff: DateTime<Utc>,
    ) -> SchedulerResult<u64> {
        let result = sqlx::query(
            "DELETE FROM job_triggers WHERE schedule_type = ?1 \
             AND status IN ('COMPLETE', 'CANCELLED') AND lock_owner IS NULL AND updated_at < ?2",
        )
        .bind(JobSchedule::Once.type_name())
        .bind(to_millis(cutoff))
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn count_running(&self, job_type: &str, now: DateTime<Utc>) -> SchedulerResult<u64> {
        let running: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM job_triggers WHERE job_definition_type = ?1 \
             AND status = 'RUNNING' AND lock_expiry IS NOT NULL AND lock_expiry > ?2",
        )
        .bind(job_type)
        .bind(to_millis(now))
        .fetch_one(&self.pool)
        .await?;
        Ok(u64::try_from(running).unwrap_or(0))
    }

    async fn count_overdue(
        &self,
        namespace: &TriggerNamespace,
        now: DateTime<Utc>,
    ) -> SchedulerResult<HashMap<String, u64>> {
        let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new(
            "SELECT job_definition_type, COUNT(*) AS overdue FROM job_triggers \
             WHERE status = 'RUNNABLE' AND lock_owner IS NULL AND next_time IS NOT NULL AND next_time <= ",
        );
        builder.push_bind(to_millis(now));
        push_namespace_condition(&mut builder, namespace);
        builder.push(" GROUP BY job_definition_type");

        let rows = builder.build().fetch_all(&self.pool).await?;
        let mut counts = HashMap::with_capacity(rows.len());
        for row in rows {
            let job_type: String = row.try_get("job_definition_type")?;
            let overdue: i64 = row.try_get("overdue")?;
            counts.insert(job_type, u64::try_from(overdue).unwrap_or(0));
        }
        Ok(counts)
    }
}

