use async_trait::async_trait;

/// 节点关闭时需要执行的回调
///
/// 实现者在 `shutdown_gracefully` 中停止接收新工作并等待执行中的工作结束。
#[async_trait]
pub trait GracefulShutdownHook: Send + Sync {
    fn name(&self) -> &str;

    /// 返回执行中的工作是否在超时前全部结束
    async fn shutdown_gracefully(&self) -> bool;
}
