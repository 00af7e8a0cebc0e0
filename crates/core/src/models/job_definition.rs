use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 系统作业使用的合成定义ID前缀
pub const SYSTEM_JOB_DEFINITION_PREFIX: &str = "system-job:";

/// 作业定义：一类工作的类型和配置模板
///
/// 被触发器引用后不再修改。`config` 的内容对引擎不透明。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobDefinition {
    pub id: String,
    #[serde(rename = "type")]
    pub job_type: String,
    pub title: String,
    pub description: String,
    pub config: serde_json::Value,
}

impl JobDefinition {
    pub fn new(
        job_type: impl Into<String>,
        title: impl Into<String>,
        config: serde_json::Value,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            job_type: job_type.into(),
            title: title.into(),
            description: String::new(),
            config,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// 按作业类型推导的合成定义，不需要持久化
    pub fn synthetic(job_type: &str) -> Self {
        Self {
            id: Self::system_definition_id(job_type),
            job_type: job_type.to_string(),
            title: format!("System job {job_type}"),
            description: String::new(),
            config: serde_json::json!({ "type": job_type }),
        }
    }

    pub fn system_definition_id(job_type: &str) -> String {
        format!("{SYSTEM_JOB_DEFINITION_PREFIX}{job_type}")
    }

    /// 如果是合成定义ID，返回其中的作业类型
    pub fn system_job_type(definition_id: &str) -> Option<&str> {
        definition_id
            .strip_prefix(SYSTEM_JOB_DEFINITION_PREFIX)
            .filter(|job_type| !job_type.is_empty())
    }

    pub fn is_synthetic(&self) -> bool {
        Self::system_job_type(&self.id).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_synthetic_definition_round_trips_type() {
        let definition = JobDefinition::synthetic("rotate-index");
        assert_eq!(definition.id, "system-job:rotate-index");
        assert_eq!(definition.job_type, "rotate-index");
        assert!(definition.is_synthetic());
        assert_eq!(JobDefinition::system_job_type(&definition.id), Some("rotate-index"));
    }

    #[test]
    fn test_regular_definition_is_not_synthetic() {
        let definition = JobDefinition::new("event-processor", "Events", serde_json::json!({}));
        assert!(!definition.is_synthetic());
        assert_eq!(JobDefinition::system_job_type("system-job:"), None);
    }

    #[test]
    fn test_type_is_serialized_as_type() {
        let definition = JobDefinition::new("event-processor", "Events", serde_json::json!({}));
        let value = serde_json::to_value(&definition).unwrap();
        assert_eq!(value["type"], "event-processor");
    }
}
