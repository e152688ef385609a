//! 节拍器 / 节拍驱动。
//!
//! # 意图（Why）
//! 用一个协作式、单线程的时钟取代“每连接一个定时器”，让整台引擎在高负载下仍然可预测：
//! 每个周期最多只有一次 `tick` 在执行，一个出错的 ticker 绝不会拖垮其它 ticker。
//!
//! # 契约（What）
//! - [`add_ticker`](Metronome::add_ticker)/[`remove_ticker`](Metronome::remove_ticker)
//!   维护的是一组弱引用：其它地方释放了某个 ticker，它会从节拍器的视角“悄悄消失”，
//!   不需要显式注销；
//! - `tick` 内部捕获每个 ticker 的 panic（通过 `catch_unwind`），记录日志后继续处理下一个。
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, OnceLock, Weak};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{error, warn};

/// 节拍器驱动的对象：任何想在固定节奏上被调用的组件都实现这个 trait。
pub trait Ticker: Send + Sync {
    /// 由节拍器在每个周期调用一次。`now` 为本次调用的时间点，`elapsed` 为距上次调用的间隔。
    fn tick(&self, now: Instant, elapsed: Duration);
}

/// 节拍器默认节奏（0.1s）。
pub const DEFAULT_INTERVAL: Duration = Duration::from_millis(100);
/// 两次周期之间允许的最小间隔，避免节拍器在系统繁忙时退化为忙等待。
pub const MIN_INTERVAL: Duration = Duration::from_millis(1000 / 60);

/// 协作式节拍驱动：以固定节奏调用所有注册的 [`Ticker`]。
///
/// `PrimeMetronome::global()` 暴露进程级单例，支持"从代码的任何地方注册
/// ticker"这种用法；但构造函数同样是 `pub`，测试可以创建独立实例，不必触碰全局状态。
pub struct Metronome {
    interval: Duration,
    tickers: Mutex<Vec<Weak<dyn Ticker>>>,
    last_time: Mutex<Option<Instant>>,
}

impl Metronome {
    pub fn new(interval: Duration) -> Arc<Self> {
        Arc::new(Self {
            interval,
            tickers: Mutex::new(Vec::new()),
            last_time: Mutex::new(None),
        })
    }

    pub fn add_ticker(&self, ticker: &Arc<dyn Ticker>) {
        self.tickers.lock().push(Arc::downgrade(ticker));
    }

    /// 移除与给定弱引用指向同一对象的注册；`Weak::ptr_eq` 不要求强引用仍然存活。
    pub fn remove_ticker(&self, ticker: &Weak<dyn Ticker>) {
        let mut tickers = self.tickers.lock();
        tickers.retain(|existing| !existing.ptr_eq(ticker));
    }

    /// 驱动一个完整周期：收集存活的 ticker、调用 `tick`、顺带清理已失效的弱引用。
    ///
    /// 返回本次实际调用的 ticker 数量，主要供测试断言使用。
    pub fn drive_once(&self, now: Instant) -> usize {
        let elapsed = {
            let mut last = self.last_time.lock();
            let elapsed = last.map(|prev| now.saturating_duration_since(prev)).unwrap_or_default();
            *last = Some(now);
            elapsed
        };

        let alive: Vec<Arc<dyn Ticker>> = {
            let mut tickers = self.tickers.lock();
            tickers.retain(|weak| weak.strong_count() > 0);
            tickers.iter().filter_map(Weak::upgrade).collect()
        };

        for ticker in &alive {
            let ticker = Arc::clone(ticker);
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| ticker.tick(now, elapsed)));
            if let Err(panic) = outcome {
                let message = panic_message(&panic);
                error!(target: "gate_core::ticker", %message, "ticker panicked; continuing with remaining tickers");
            }
        }
        alive.len()
    }

    /// 计算距离下一次周期应当休眠的时长：`max(interval - elapsed_since_last, MIN_INTERVAL)`。
    pub fn sleep_duration(&self, now: Instant) -> Duration {
        let elapsed_since_last = self
            .last_time
            .lock()
            .map(|prev| now.saturating_duration_since(prev))
            .unwrap_or_default();
        self.interval
            .saturating_sub(elapsed_since_last)
            .max(MIN_INTERVAL)
    }

    /// 以 `tokio::time::sleep` 在当前任务上无限期驱动该节拍器。调用方负责 `spawn` 或
    /// `select!` 这个 future；`gate.stop()` 之类的协作式退出由上层通过丢弃该 future 完成。
    pub async fn run(self: &Arc<Self>) -> ! {
        loop {
            let now = Instant::now();
            let sleep_for = self.sleep_duration(now);
            tokio::time::sleep(sleep_for).await;
            self.drive_once(Instant::now());
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_owned()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_owned()
    }
}

static PRIME_METRONOME: OnceLock<Arc<Metronome>> = OnceLock::new();

/// 进程级默认节拍器：首次 `add_ticker` 时惰性创建，生命周期与进程一致。
pub struct PrimeMetronome;

impl PrimeMetronome {
    pub fn global() -> Arc<Metronome> {
        Arc::clone(PRIME_METRONOME.get_or_init(|| Metronome::new(DEFAULT_INTERVAL)))
    }
}
