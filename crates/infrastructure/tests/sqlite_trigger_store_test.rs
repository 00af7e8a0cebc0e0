use std::sync::Arc;

use chrono::{Duration, TimeZone, Utc};
use scheduler_core::models::{
    JobDefinition, JobSchedule, JobTrigger, JobTriggerStatus, JobTriggerUpdate, TriggerNamespace,
};
use scheduler_core::traits::{JobDefinitionStore, JobTriggerStore};
use scheduler_core::{JobSchedulerClock, SchedulerError, TestClock};
use scheduler_infrastructure::{DatabaseManager, SqliteTriggerStore};
use tempfile::TempDir;

struct TwoNodes {
    _dir: TempDir,
    clock: TestClock,
    manager: DatabaseManager,
    node_a: SqliteTriggerStore,
    node_b: SqliteTriggerStore,
}

/// 两个连接池打开同一个数据库文件，模拟两个集群节点
async fn two_nodes() -> TwoNodes {
    let dir = TempDir::new().unwrap();
    let url = format!("sqlite://{}", dir.path().join("scheduler.db").display());
    let clock = TestClock::new(Utc.with_ymd_and_hms(2024, 2, 1, 9, 0, 0).unwrap());

    let manager_a = DatabaseManager::new(&url, 4).await.unwrap();
    let manager_b = DatabaseManager::new(&url, 4).await.unwrap();

    let node_a = manager_a.trigger_store(Arc::new(clock.clone()));
    let node_b = manager_b.trigger_store(Arc::new(clock.clone()));

    TwoNodes {
        _dir: dir,
        clock,
        manager: manager_a,
        node_a,
        node_b,
    }
}

#[tokio::test]
async fn test_trigger_round_trips_through_sqlite() {
    let nodes = two_nodes().await;
    let now = nodes.clock.now_utc();

    let trigger = JobTrigger::builder("def-1", "rotate-index")
        .with_id("t-1")
        .with_schedule(JobSchedule::cron("0 0 * * * *"))
        .with_data(serde_json::json!({"index_set": "default-index"}))
        .with_end_time(now + Duration::days(1))
        .build(now);
    nodes.node_a.create(&trigger).await.unwrap();

    let stored = nodes.node_b.get("t-1").await.unwrap().unwrap();
    assert_eq!(stored, trigger);

    let err = nodes.node_b.create(&trigger).await.unwrap_err();
    assert!(matches!(err, SchedulerError::DuplicateTrigger { .. }));
}

#[tokio::test]
async fn test_only_one_node_acquires_the_lock() {
    let nodes = two_nodes().await;
    let now = nodes.clock.now_utc();
    nodes
        .node_a
        .create(&JobTrigger::builder("def", "rotate-index").with_id("t-1").build(now))
        .await
        .unwrap();

    let lease = now + Duration::seconds(60);
    let (a, b) = tokio::join!(
        nodes.node_a.acquire_lock("t-1", "node-a", lease),
        nodes.node_b.acquire_lock("t-1", "node-b", lease),
    );
    let (a, b) = (a.unwrap(), b.unwrap());
    assert!(a ^ b, "exactly one node must win: a={a} b={b}");

    let stored = nodes.node_a.get("t-1").await.unwrap().unwrap();
    assert_eq!(stored.status, JobTriggerStatus::Running);
    let winner = if a { "node-a" } else { "node-b" };
    assert_eq!(stored.lock.owner.as_deref(), Some(winner));
}

#[tokio::test]
async fn test_expired_lease_is_reclaimed_by_other_node() {
    let nodes = two_nodes().await;
    let now = nodes.clock.now_utc();
    nodes
        .node_a
        .create(&JobTrigger::builder("def", "rotate-index").with_id("t-1").build(now))
        .await
        .unwrap();

    assert!(nodes
        .node_a
        .acquire_lock("t-1", "node-a", now + Duration::seconds(60))
        .await
        .unwrap());

    nodes.clock.advance_seconds(30);
    let candidates = nodes
        .node_b
        .find_runnable("node-b", &TriggerNamespace::All, nodes.clock.now_utc(), 10)
        .await
        .unwrap();
    assert!(candidates.is_empty());

    nodes.clock.advance_seconds(31);
    let now = nodes.clock.now_utc();
    let candidates = nodes
        .node_b
        .find_runnable("node-b", &TriggerNamespace::All, now, 10)
        .await
        .unwrap();
    assert_eq!(candidates.len(), 1);
    assert!(nodes
        .node_b
        .acquire_lock("t-1", "node-b", now + Duration::seconds(60))
        .await
        .unwrap());

    // 原持有者的写回被拒绝
    assert!(!nodes
        .node_a
        .release_lock_and_update("t-1", "node-a", &JobTriggerUpdate::without_next_time())
        .await
        .unwrap());

    let stored = nodes.node_a.get("t-1").await.unwrap().unwrap();
    assert_eq!(stored.lock.owner.as_deref(), Some("node-b"));
    assert_eq!(stored.lock.last_owner.as_deref(), Some("node-a"));
}

#[tokio::test]
async fn test_release_reschedules_and_clamps_progress() {
    let nodes = two_nodes().await;
    let now = nodes.clock.now_utc();
    nodes
        .node_a
        .create(
            &JobTrigger::builder("def", "rotate-index")
                .with_id("t-1")
                .with_schedule(JobSchedule::every_seconds(60))
                .build(now),
        )
        .await
        .unwrap();
    nodes
        .node_a
        .acquire_lock("t-1", "node-a", now + Duration::seconds(60))
        .await
        .unwrap();

    nodes.node_a.update_progress("t-1", "node-a", 150).await.unwrap();
    assert_eq!(nodes.node_b.get("t-1").await.unwrap().unwrap().progress, 100);
    nodes.node_a.update_progress("t-1", "node-a", -5).await.unwrap();
    assert_eq!(nodes.node_b.get("t-1").await.unwrap().unwrap().progress, 0);

    nodes.clock.advance_seconds(5);
    let next = now + Duration::seconds(60);
    assert!(nodes
        .node_a
        .release_lock_and_update("t-1", "node-a", &JobTriggerUpdate::with_next_time(next))
        .await
        .unwrap());

    let stored = nodes.node_b.get("t-1").await.unwrap().unwrap();
    assert_eq!(stored.status, JobTriggerStatus::Runnable);
    assert_eq!(stored.next_time, Some(next));
    assert_eq!(stored.lock.owner, None);
    assert_eq!(stored.last_execution_duration_ms, Some(5000));
}

#[tokio::test]
async fn test_running_counts_and_concurrency_reschedules() {
    let nodes = two_nodes().await;
    let now = nodes.clock.now_utc();
    for (id, job_type) in [("t-1", "rotate-index"), ("t-2", "rotate-index"), ("t-3", "renew-cert")] {
        nodes
            .node_a
            .create(&JobTrigger::builder("def", job_type).with_id(id).build(now))
            .await
            .unwrap();
    }
    assert!(nodes
        .node_a
        .acquire_lock("t-1", "node-a", now + Duration::seconds(60))
        .await
        .unwrap());
    assert!(nodes
        .node_b
        .acquire_lock("t-2", "node-b", now + Duration::seconds(30))
        .await
        .unwrap());
    assert!(nodes
        .node_b
        .acquire_lock("t-3", "node-b", now + Duration::seconds(60))
        .await
        .unwrap());

    assert_eq!(nodes.node_a.count_running("rotate-index", now).await.unwrap(), 2);
    assert_eq!(nodes.node_b.count_running("renew-cert", now).await.unwrap(), 1);
    assert_eq!(nodes.node_a.count_running("unknown", now).await.unwrap(), 0);
    // 租约已过期的不计入
    assert_eq!(
        nodes
            .node_a
            .count_running("rotate-index", now + Duration::seconds(45))
            .await
            .unwrap(),
        1
    );

    for round in 1..=2 {
        let deferred = nodes.clock.now_utc() + Duration::seconds(5);
        assert!(nodes
            .node_b
            .release_lock_and_update(
                "t-2",
                "node-b",
                &JobTriggerUpdate::with_concurrency_reschedule(deferred)
            )
            .await
            .unwrap());
        let stored = nodes.node_a.get("t-2").await.unwrap().unwrap();
        assert_eq!(stored.status, JobTriggerStatus::Runnable);
        assert_eq!(stored.next_time, Some(deferred));
        assert_eq!(stored.concurrency_reschedule_count, round);

        nodes.clock.advance_seconds(5);
        assert!(nodes
            .node_b
            .acquire_lock("t-2", "node-b", nodes.clock.now_utc() + Duration::seconds(30))
            .await
            .unwrap());
    }

    nodes
        .node_b
        .release_lock_and_update("t-2", "node-b", &JobTriggerUpdate::without_next_time())
        .await
        .unwrap();
    assert_eq!(
        nodes.node_a.get("t-2").await.unwrap().unwrap().concurrency_reschedule_count,
        0
    );
}

#[tokio::test]
async fn test_namespace_filtering_and_overdue_counts() {
    let nodes = two_nodes().await;
    let now = nodes.clock.now_utc();
    for (id, job_type) in [("s-1", "rotate-index"), ("s-2", "rotate-index"), ("u-1", "event-processor")] {
        nodes
            .node_a
            .create(&JobTrigger::builder("def", job_type).with_id(id).build(now))
            .await
            .unwrap();
    }

    let system = TriggerNamespace::only(["rotate-index"]);
    let user = TriggerNamespace::except(["rotate-index"]);

    let found = nodes.node_a.find_runnable("node-a", &system, now, 10).await.unwrap();
    assert_eq!(found.len(), 2);
    let found = nodes.node_a.find_runnable("node-a", &user, now, 10).await.unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].id, "u-1");
    let found = nodes.node_a.find_runnable("node-a", &system, now, 1).await.unwrap();
    assert_eq!(found.len(), 1);

    let overdue = nodes.node_b.count_overdue(&system, now).await.unwrap();
    assert_eq!(overdue.get("rotate-index"), Some(&2));
    assert!(!overdue.contains_key("event-processor"));
}

#[tokio::test]
async fn test_cancel_cleanup_and_startup_release() {
    let nodes = two_nodes().await;
    let now = nodes.clock.now_utc();
    for id in ["idle", "running", "done"] {
        nodes
            .node_a
            .create(&JobTrigger::builder("def", "rotate-index").with_id(id).build(now))
            .await
            .unwrap();
    }

    assert!(nodes.node_b.cancel("idle").await.unwrap());
    assert_eq!(
        nodes.node_a.get("idle").await.unwrap().unwrap().status,
        JobTriggerStatus::Cancelled
    );

    let lease = now + Duration::seconds(60);
    nodes.node_a.acquire_lock("running", "node-a", lease).await.unwrap();
    nodes.node_b.cancel("running").await.unwrap();
    assert!(nodes.node_a.is_cancelled("running").await.unwrap());
    assert_eq!(
        nodes.node_a.get("running").await.unwrap().unwrap().status,
        JobTriggerStatus::Running
    );

    nodes.node_a.acquire_lock("done", "node-a", lease).await.unwrap();
    nodes
        .node_a
        .release_lock_and_update("done", "node-a", &JobTriggerUpdate::without_next_time())
        .await
        .unwrap();

    assert_eq!(nodes.node_a.refresh_leases("node-a", lease + Duration::seconds(60)).await.unwrap(), 1);
    assert_eq!(nodes.node_a.force_release_owned("node-a").await.unwrap(), 1);
    assert_eq!(
        nodes.node_a.get("running").await.unwrap().unwrap().status,
        JobTriggerStatus::Runnable
    );

    nodes.clock.advance(Duration::hours(3));
    let deleted = nodes
        .node_b
        .delete_completed_once_older_than(nodes.clock.now_utc() - Duration::hours(1))
        .await
        .unwrap();
    // idle(CANCELLED) 和 done(COMPLETE)
    assert_eq!(deleted, 2);
    assert_eq!(nodes.node_a.all().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_definition_store() {
    let nodes = two_nodes().await;
    let store = nodes.manager.definition_store();

    let definition = JobDefinition::new(
        "event-processor",
        "Failed logins",
        serde_json::json!({"query": "action:login AND result:failure"}),
    )
    .with_description("Counts failed logins");
    store.create(&definition).await.unwrap();

    assert_eq!(store.get(&definition.id).await.unwrap(), Some(definition.clone()));
    assert!(store.create(&definition).await.is_err());
    assert!(store.delete(&definition.id).await.unwrap());
    assert_eq!(store.get(&definition.id).await.unwrap(), None);
}
