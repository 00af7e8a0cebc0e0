//! 分布式作业调度节点
//!
//! 组装触发器存储、系统作业调度器和用户作业调度器，并负责节点的优雅关闭。

pub mod app;
pub mod shutdown;

pub use app::Application;
pub use shutdown::{GracefulShutdownService, ShutdownManager};
