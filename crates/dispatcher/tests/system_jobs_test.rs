use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use scheduler_core::config::SchedulerConfig;
use scheduler_core::models::{JobDefinition, JobTriggerStatus, TriggerNamespace};
use scheduler_core::traits::JobTriggerStore;
use scheduler_core::{JobSchedulerClock, SchedulerError, SchedulerResult, TestClock};
use scheduler_dispatcher::{
    EngineComponents, JobExecutionEngine, SystemJobManager, TriggerCleanupConfig,
    TriggerCleanupJob,
};
use scheduler_domain::{SystemJob, SystemJobConfig, SystemJobContext, SystemJobRegistry, SystemJobResult};
use scheduler_infrastructure::InMemoryTriggerStore;
use scheduler_worker::JobWorkerPool;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct RotateIndexConfig {
    index_set: String,
}

impl SystemJobConfig for RotateIndexConfig {
    const TYPE_NAME: &'static str = "rotate-index";

    fn validate(&self) -> SchedulerResult<()> {
        if self.index_set.is_empty() {
            return Err(SchedulerError::Configuration("index_set不能为空".to_string()));
        }
        Ok(())
    }
}

struct RotateIndexJob;

#[async_trait]
impl SystemJob for RotateIndexJob {
    type Config = RotateIndexConfig;

    async fn execute(
        &self,
        _config: RotateIndexConfig,
        ctx: &SystemJobContext,
    ) -> SchedulerResult<SystemJobResult> {
        ctx.update_progress_of(4, 3).await;
        Ok(SystemJobResult::success())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct UnregisteredConfig {}

impl SystemJobConfig for UnregisteredConfig {
    const TYPE_NAME: &'static str = "never-registered";
}

fn start_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap()
}

struct SystemHarness {
    clock: TestClock,
    store: Arc<InMemoryTriggerStore>,
    manager: SystemJobManager,
    engine: JobExecutionEngine,
}

fn system_harness() -> SystemHarness {
    let clock = TestClock::new(start_time());
    let shared_clock: Arc<dyn JobSchedulerClock> = Arc::new(clock.clone());
    let store = Arc::new(InMemoryTriggerStore::new(shared_clock.clone()));

    let mut registry = SystemJobRegistry::new();
    registry.register(|| RotateIndexJob).unwrap();
    let cleanup_store: Arc<dyn JobTriggerStore> = store.clone();
    let cleanup_clock = shared_clock.clone();
    registry
        .register(move || TriggerCleanupJob::new(cleanup_store.clone(), cleanup_clock.clone()))
        .unwrap();
    let registry = Arc::new(registry);

    let config = SchedulerConfig::system_default();
    let engine = JobExecutionEngine::new(
        &config,
        EngineComponents {
            node_id: "node-a".to_string(),
            store: store.clone(),
            definitions: None,
            clock: shared_clock.clone(),
            pool: Arc::new(JobWorkerPool::new(&config.name, config.worker_threads)),
            factories: registry.job_factories(),
            namespace: TriggerNamespace::only(registry.job_types()),
        },
    );
    let manager = SystemJobManager::new(store.clone(), shared_clock, registry);

    SystemHarness {
        clock,
        store,
        manager,
        engine,
    }
}

async fn run_once(engine: &JobExecutionEngine) -> usize {
    let dispatched = engine.execute_once().await.unwrap();
    engine.pool().wait_idle().await;
    dispatched
}

#[tokio::test]
async fn test_submitted_system_job_runs_to_completion() {
    let harness = system_harness();
    let trigger_id = harness
        .manager
        .submit(&RotateIndexConfig {
            index_set: "default-index".to_string(),
        })
        .await
        .unwrap();

    let stored = harness.store.get(&trigger_id).await.unwrap().unwrap();
    assert_eq!(stored.job_definition_type, "rotate-index");
    assert_eq!(
        JobDefinition::system_job_type(&stored.job_definition_id),
        Some("rotate-index")
    );

    harness.clock.advance_seconds(1);
    assert_eq!(run_once(&harness.engine).await, 1);

    let info = harness.manager.get_info(&trigger_id).await.unwrap();
    assert_eq!(info.status, JobTriggerStatus::Complete);
    assert_eq!(info.progress, 75);
    assert_eq!(info.lock_owner, None);
}

#[tokio::test]
async fn test_delayed_submission_waits() {
    let harness = system_harness();
    let trigger_id = harness
        .manager
        .submit_with_delay(
            &RotateIndexConfig {
                index_set: "default-index".to_string(),
            },
            Duration::minutes(5),
        )
        .await
        .unwrap();

    harness.clock.advance_seconds(60);
    assert_eq!(run_once(&harness.engine).await, 0);

    harness.clock.advance_seconds(240);
    assert_eq!(run_once(&harness.engine).await, 1);
    assert_eq!(
        harness.manager.get_info(&trigger_id).await.unwrap().status,
        JobTriggerStatus::Complete
    );
}

#[tokio::test]
async fn test_submission_is_validated() {
    let harness = system_harness();

    let err = harness
        .manager
        .submit(&RotateIndexConfig {
            index_set: String::new(),
        })
        .await
        .unwrap_err();
    assert!(matches!(err, SchedulerError::Configuration(_)));

    let err = harness.manager.submit(&UnregisteredConfig {}).await.unwrap_err();
    assert!(matches!(err, SchedulerError::UnknownJobType(ref t) if t == "never-registered"));

    assert!(harness.store.all().await.unwrap().is_empty());
}

#[test]
fn test_cleanup_retention_must_be_representable() {
    assert!(TriggerCleanupConfig { retention_hours: 24 }.validate().is_ok());
    for retention_hours in [0, i64::MAX] {
        let err = TriggerCleanupConfig { retention_hours }.validate().unwrap_err();
        assert!(matches!(err, SchedulerError::Configuration(_)));
    }
}

#[tokio::test]
async fn test_cancelling_a_pending_system_job() {
    let harness = system_harness();
    let trigger_id = harness
        .manager
        .submit_with_delay(
            &RotateIndexConfig {
                index_set: "default-index".to_string(),
            },
            Duration::minutes(1),
        )
        .await
        .unwrap();

    assert!(harness.manager.cancel(&trigger_id).await.unwrap());
    assert!(!harness.manager.cancel("missing").await.unwrap());

    harness.clock.advance_seconds(120);
    assert_eq!(run_once(&harness.engine).await, 0);
    let info = harness.manager.get_info(&trigger_id).await.unwrap();
    assert_eq!(info.status, JobTriggerStatus::Cancelled);
    assert!(info.is_cancelled);

    let err = harness.manager.get_info("missing").await.unwrap_err();
    assert!(matches!(err, SchedulerError::TriggerNotFound { .. }));
}

#[tokio::test]
async fn test_periodic_cleanup_removes_old_finished_triggers() {
    let harness = system_harness();
    let config = TriggerCleanupConfig { retention_hours: 24 };

    let first = harness
        .manager
        .ensure_periodic(&config, Duration::hours(1))
        .await
        .unwrap();
    let second = harness
        .manager
        .ensure_periodic(&config, Duration::hours(1))
        .await
        .unwrap();
    assert_eq!(first, second);
    assert_eq!(first, SystemJobManager::periodic_trigger_id("trigger-cleanup"));

    let old = harness
        .manager
        .submit(&RotateIndexConfig {
            index_set: "default-index".to_string(),
        })
        .await
        .unwrap();
    // 执行一次性作业和第一次清理，此时一次性作业还在保留期内
    assert_eq!(run_once(&harness.engine).await, 2);
    assert!(harness.store.get(&old).await.unwrap().is_some());

    harness.clock.advance(Duration::hours(25));
    assert_eq!(run_once(&harness.engine).await, 1);
    assert!(harness.store.get(&old).await.unwrap().is_none());

    let cleanup = harness.manager.get_info(&first).await.unwrap();
    assert_eq!(cleanup.status, JobTriggerStatus::Runnable);
    assert!(cleanup.next_time.unwrap() > harness.clock.now_utc());

    assert!(harness
        .manager
        .ensure_periodic(&config, Duration::zero())
        .await
        .is_err());
}
