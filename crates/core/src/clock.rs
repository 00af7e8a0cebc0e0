//! 调度器时钟
//!
//! 引擎中所有的时间比较、租约计算和重新调度都通过 [`JobSchedulerClock`] 获取当前时间，
//! 从不直接读取系统时钟。生产环境使用 [`SystemClock`]，测试使用可手动推进的 [`TestClock`]。

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};

/// 时钟接口
pub trait JobSchedulerClock: Send + Sync {
    /// 当前UTC时间
    fn now_utc(&self) -> DateTime<Utc>;
}

/// 系统墙上时钟
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl SystemClock {
    pub fn new() -> Self {
        Self
    }

    pub fn shared() -> Arc<dyn JobSchedulerClock> {
        Arc::new(Self)
    }
}

impl JobSchedulerClock for SystemClock {
    fn now_utc(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// 测试时钟，时间只在显式推进时变化
#[derive(Debug, Clone)]
pub struct TestClock {
    now: Arc<Mutex<DateTime<Utc>>>,
}

impl TestClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Arc::new(Mutex::new(start)),
        }
    }

    /// 推进时钟
    pub fn advance(&self, duration: Duration) {
        let mut now = self.lock();
        *now += duration;
    }

    pub fn advance_seconds(&self, seconds: i64) {
        self.advance(Duration::seconds(seconds));
    }

    pub fn set(&self, time: DateTime<Utc>) {
        *self.lock() = time;
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, DateTime<Utc>> {
        // 时钟状态只是一个时间值，中毒后继续使用是安全的
        self.now.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for TestClock {
    fn default() -> Self {
        Self::new(Utc::now())
    }
}

impl JobSchedulerClock for TestClock {
    fn now_utc(&self) -> DateTime<Utc> {
        *self.lock()
    }
}
