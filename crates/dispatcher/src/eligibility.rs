use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// 节点资格判断，返回 `false` 时调度器跳过本轮，不尝试加锁
pub type EligibilityPredicate = Arc<dyn Fn() -> bool + Send + Sync>;

pub fn always_eligible() -> EligibilityPredicate {
    Arc::new(|| true)
}

/// 只有当前节点为集群主节点时才调度
pub fn leader_only(is_leader: Arc<AtomicBool>) -> EligibilityPredicate {
    Arc::new(move || is_leader.load(Ordering::SeqCst))
}
