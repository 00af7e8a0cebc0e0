use async_trait::async_trait;

use crate::models::JobDefinition;
use crate::SchedulerResult;

/// 作业定义存储
#[async_trait]
pub trait JobDefinitionStore: Send + Sync {
    async fn create(&self, definition: &JobDefinition) -> SchedulerResult<JobDefinition>;

    async fn get(&self, definition_id: &str) -> SchedulerResult<Option<JobDefinition>>;

    async fn delete(&self, definition_id: &str) -> SchedulerResult<bool>;
}
