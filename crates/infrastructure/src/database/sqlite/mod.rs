pub mod sqlite_definition_store;
pub mod sqlite_trigger_store;

pub use sqlite_definition_store::SqliteJobDefinitionStore;
pub use sqlite_trigger_store::SqliteTriggerStore;

use chrono::{DateTime, Utc};
use scheduler_core::{SchedulerError, SchedulerResult};

// 时间以UTC毫秒整数存储，便于在SQL中直接比较
pub(crate) fn to_millis(time: DateTime<Utc>) -> i64 {
    time.timestamp_millis()
}

pub(crate) fn from_millis(millis: i64) -> SchedulerResult<DateTime<Utc>> {
    DateTime::from_timestamp_millis(millis)
        .ok_or_else(|| SchedulerError::Serialization(format!("无效的时间戳: {millis}")))
}

pub(crate) fn from_optional_millis(millis: Option<i64>) -> SchedulerResult<Option<DateTime<Utc>>> {
    millis.map(from_millis).transpose()
}
