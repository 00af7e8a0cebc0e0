use std::collections::BTreeSet;

/// 调度器负责的作业类型范围
///
/// 同一节点上的多个调度器通过互不重叠的命名空间共享一个存储。
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum TriggerNamespace {
    #[default]
    All,
    Only(BTreeSet<String>),
    Except(BTreeSet<String>),
}

impl TriggerNamespace {
    pub fn only<I, S>(types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        TriggerNamespace::Only(types.into_iter().map(Into::into).collect())
    }

    pub fn except<I, S>(types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        TriggerNamespace::Except(types.into_iter().map(Into::into).collect())
    }

    pub fn contains(&self, job_type: &str) -> bool {
        match self {
            TriggerNamespace::All => true,
            TriggerNamespace::Only(types) => types.contains(job_type),
            TriggerNamespace::Except(types) => !types.contains(job_type),
        }
    }
}
