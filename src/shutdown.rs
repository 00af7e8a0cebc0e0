use std::sync::Arc;

use futures::future::join_all;
use scheduler_core::traits::GracefulShutdownHook;
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, info, warn};

/// 关闭信号广播
#[derive(Clone)]
pub struct ShutdownManager {
    shutdown_tx: broadcast::Sender<()>,
    is_shutdown: Arc<RwLock<bool>>,
}

impl ShutdownManager {
    pub fn new() -> Self {
        let (shutdown_tx, _) = broadcast::channel(16);
        Self {
            shutdown_tx,
            is_shutdown: Arc::new(RwLock::new(false)),
        }
    }

    /// 订阅关闭信号，已经关闭时返回的接收器立即就绪
    pub async fn subscribe(&self) -> broadcast::Receiver<()> {
        if *self.is_shutdown.read().await {
            let (tx, rx) = broadcast::channel(1);
            let _ = tx.send(());
            return rx;
        }
        self.shutdown_tx.subscribe()
    }

    pub async fn shutdown(&self) {
        let mut is_shutdown = self.is_shutdown.write().await;
        if *is_shutdown {
            debug!("关闭信号已经发送过");
            return;
        }
        *is_shutdown = true;

        debug!("发送关闭信号给 {} 个订阅者", self.shutdown_tx.receiver_count());
        let _ = self.shutdown_tx.send(());
        info!("关闭信号已发送");
    }

    pub async fn is_shutdown(&self) -> bool {
        *self.is_shutdown.read().await
    }
}

impl Default for ShutdownManager {
    fn default() -> Self {
        Self::new()
    }
}

/// 节点关闭回调注册表
///
/// 关闭时并发调用所有已注册的回调，每个回调自行控制等待超时。
#[derive(Default)]
pub struct GracefulShutdownService {
    hooks: RwLock<Vec<Arc<dyn GracefulShutdownHook>>>,
}

impl GracefulShutdownService {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, hook: Arc<dyn GracefulShutdownHook>) {
        debug!("注册关闭回调: {}", hook.name());
        self.hooks.write().await.push(hook);
    }

    pub async fn hook_count(&self) -> usize {
        self.hooks.read().await.len()
    }

    /// 调用所有回调，返回是否全部在超时前结束。回调只会被调用一次。
    pub async fn shutdown_all(&self) -> bool {
        let hooks: Vec<_> = self.hooks.write().await.drain(..).collect();
        if hooks.is_empty() {
            return true;
        }

        info!("开始优雅关闭 {} 个服务", hooks.len());
        let results = join_all(hooks.iter().map(|hook| async move {
            let drained = hook.shutdown_gracefully().await;
            if !drained {
                warn!("服务 {} 未能在超时前结束全部工作", hook.name());
            }
            drained
        }))
        .await;

        results.into_iter().all(|drained| drained)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingHook {
        name: String,
        calls: Arc<AtomicUsize>,
        drained: bool,
    }

    #[async_trait]
    impl GracefulShutdownHook for CountingHook {
        fn name(&self) -> &str {
            &self.name
        }

        async fn shutdown_gracefully(&self) -> bool {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.drained
        }
    }

    fn hook(name: &str, calls: &Arc<AtomicUsize>, drained: bool) -> Arc<dyn GracefulShutdownHook> {
        Arc::new(CountingHook {
            name: name.to_string(),
            calls: calls.clone(),
            drained,
        })
    }

    #[tokio::test]
    async fn test_shutdown_signal_reaches_subscribers() {
        let manager = ShutdownManager::new();
        let mut rx1 = manager.subscribe().await;
        let mut rx2 = manager.subscribe().await;

        manager.shutdown().await;
        assert!(rx1.recv().await.is_ok());
        assert!(rx2.recv().await.is_ok());
        assert!(manager.is_shutdown().await);

        // 重复关闭不报错
        manager.shutdown().await;
    }

    #[tokio::test]
    async fn test_subscribe_after_shutdown() {
        let manager = ShutdownManager::new();
        manager.shutdown().await;

        let mut rx = manager.subscribe().await;
        assert!(rx.recv().await.is_ok());
    }

    #[tokio::test]
    async fn test_hooks_run_once() {
        let service = GracefulShutdownService::new();
        let calls = Arc::new(AtomicUsize::new(0));
        service.register(hook("system-job-scheduler", &calls, true)).await;
        service.register(hook("job-scheduler", &calls, true)).await;
        assert_eq!(service.hook_count().await, 2);

        assert!(service.shutdown_all().await);
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        assert!(service.shutdown_all().await);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_undrained_hook_is_reported() {
        let service = GracefulShutdownService::new();
        let calls = Arc::new(AtomicUsize::new(0));
        service.register(hook("fast", &calls, true)).await;
        service.register(hook("stuck", &calls, false)).await;

        assert!(!service.shutdown_all().await);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
