//! 可注入时钟：生产环境使用真实单调时间，测试环境使用可推进的虚拟时间。
//!
//! 把“现在几点”抽成一个 trait，使连接心跳（28s/32s/60s）、到站/离站超时
//! （300s/120s）等依赖时间推移的断言可以在测试里瞬间完成，而不必真的睡眠。

use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;

/// 统一的“现在几点”来源。
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

/// 生产环境默认时钟：直接委托给 `Instant::now`。
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// 测试用虚拟时钟：起点固定，通过 [`MockClock::advance`] 手动推进。
#[derive(Clone)]
pub struct MockClock {
    inner: Arc<Mutex<Instant>>,
}

impl MockClock {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Instant::now())),
        }
    }

    pub fn advance(&self, by: std::time::Duration) {
        let mut guard = self.inner.lock();
        *guard += by;
    }
}

impl Default for MockClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MockClock {
    fn now(&self) -> Instant {
        *self.inner.lock()
    }
}
