//! 有界并发的作业工作池

pub mod pool;

pub use pool::JobWorkerPool;
