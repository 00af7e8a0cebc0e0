use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

/// 作业工作池
///
/// 固定数量的执行槽位，每个提交的作业占用一个槽位直到结束。
/// 提交是非阻塞的：没有空闲槽位时立即返回 `false`，轮询循环不会被阻塞。
#[derive(Debug)]
pub struct JobWorkerPool {
    name: String,
    size: usize,
    slots: Arc<Semaphore>,
    accepting: AtomicBool,
}

impl JobWorkerPool {
    pub fn new(name: impl Into<String>, size: usize) -> Self {
        let size = size.clamp(1, Semaphore::MAX_PERMITS.min(u32::MAX as usize));
        Self {
            name: name.into(),
            size,
            slots: Arc::new(Semaphore::new(size)),
            accepting: AtomicBool::new(true),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// 尝试提交作业，没有空闲槽位或已关闭时返回 `false`
    pub fn try_submit<F>(&self, job: F) -> bool
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if !self.accepting.load(Ordering::SeqCst) {
            return false;
        }

        match Arc::clone(&self.slots).try_acquire_owned() {
            Ok(permit) => {
                tokio::spawn(async move {
                    let _permit = permit;
                    job.await;
                });
                true
            }
            Err(_) => {
                debug!("工作池 {} 没有空闲槽位", self.name);
                false
            }
        }
    }

    pub fn available_slots(&self) -> usize {
        if !self.accepting.load(Ordering::SeqCst) {
            return 0;
        }
        self.slots.available_permits()
    }

    pub fn slots_in_use(&self) -> usize {
        self.size.saturating_sub(self.slots.available_permits())
    }

    pub fn any_slots_used(&self) -> bool {
        self.slots_in_use() > 0
    }

    pub fn is_shutdown(&self) -> bool {
        !self.accepting.load(Ordering::SeqCst)
    }

    /// 等待所有执行中的作业结束
    pub async fn wait_idle(&self) {
        if let Ok(permits) = self.slots.acquire_many(self.size as u32).await {
            drop(permits);
        }
    }

    /// 停止接收新作业，并在超时前等待执行中的作业结束
    ///
    /// 返回所有作业是否在超时前结束。超时后仍在运行的作业被放弃，
    /// 它们持有的触发器锁会在租约过期后被其他节点回收。
    pub async fn shutdown(&self, timeout: Duration) -> bool {
        self.accepting.store(false, Ordering::SeqCst);

        let in_use = self.slots_in_use();
        if in_use > 0 {
            info!("工作池 {} 等待 {} 个执行中的作业结束", self.name, in_use);
        }

        let drained = tokio::time::timeout(timeout, self.wait_idle()).await.is_ok();
        if !drained {
            warn!(
                "工作池 {} 关闭超时，放弃 {} 个执行中的作业",
                self.name,
                self.slots_in_use()
            );
        }
        self.slots.close();
        drained
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::oneshot;

    #[tokio::test]
    async fn test_refuses_when_full() {
        let pool = JobWorkerPool::new("test", 2);
        let (tx1, rx1) = oneshot::channel::<()>();
        let (tx2, rx2) = oneshot::channel::<()>();

        assert!(pool.try_submit(async move {
            let _ = rx1.await;
        }));
        assert!(pool.try_submit(async move {
            let _ = rx2.await;
        }));
        assert_eq!(pool.available_slots(), 0);
        assert!(!pool.try_submit(async {}));

        tx1.send(()).unwrap();
        tx2.send(()).unwrap();
        pool.wait_idle().await;
        assert_eq!(pool.available_slots(), 2);
        assert!(!pool.any_slots_used());
    }

    #[tokio::test]
    async fn test_concurrency_never_exceeds_size() {
        let pool = Arc::new(JobWorkerPool::new("test", 3));
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut submitted = 0;
        while submitted < 20 {
            let running = running.clone();
            let peak = peak.clone();
            let accepted = pool.try_submit(async move {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                running.fetch_sub(1, Ordering::SeqCst);
            });
            if accepted {
                submitted += 1;
            } else {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        }

        pool.wait_idle().await;
        assert!(peak.load(Ordering::SeqCst) <= 3);
        assert_eq!(running.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_shutdown_waits_for_running_jobs() {
        let pool = JobWorkerPool::new("test", 2);
        let finished = Arc::new(AtomicBool::new(false));
        let flag = finished.clone();
        assert!(pool.try_submit(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            flag.store(true, Ordering::SeqCst);
        }));

        assert!(pool.shutdown(Duration::from_secs(5)).await);
        assert!(finished.load(Ordering::SeqCst));
        assert!(!pool.try_submit(async {}));
        assert_eq!(pool.available_slots(), 0);
    }

    #[tokio::test]
    async fn test_shutdown_times_out() {
        let pool = JobWorkerPool::new("test", 1);
        let (_tx, rx) = oneshot::channel::<()>();
        assert!(pool.try_submit(async move {
            let _ = rx.await;
        }));

        assert!(!pool.shutdown(Duration::from_millis(20)).await);
        assert!(pool.is_shutdown());
    }
}
