//! 连接状态机。
//!
//! # 意图（Why）
//! 发送方只能通过时间的流逝察觉对端已经沉默：`EXPIRED` 是“仍可用，试着发个心跳”，
//! `MAINTAINING` 是“心跳已发出，等待证明对端还活着”；只有维护窗口也过去了才判定失败。
//!
//! 状态本身由 `last_sent_time`/`last_received_time` 两个时间戳推导，而不是一张自由跳转的
//! 状态表——这样实现与迁移表格一一对应，也让状态机单调性可以直接断言。

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::address::Address;
use crate::channel::{Channel, ChannelState};
use crate::time::Clock;

/// 连接状态。
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ConnectionState {
    Default,
    Preparing,
    Ready,
    Maintaining,
    Expired,
    Error,
}

struct Timestamps {
    last_sent: Option<Instant>,
    last_received: Option<Instant>,
}

/// 一对相对的字节/数据报流之上的有状态端点。
///
/// `active` 标记这是否是一条由本进程主动发起的连接：只有主动连接会在 `ERROR` 之后
/// 尝试重新打开通道。被动（服务端接受的）连接在 `ERROR` 之后保持 `ERROR`，由 `Hub`
/// 负责回收。
pub struct Connection {
    remote: Address,
    local: Option<Address>,
    channel: Mutex<Arc<dyn Channel>>,
    active: bool,
    state: Mutex<ConnectionState>,
    timestamps: Mutex<Timestamps>,
    expired_after: Duration,
    maintaining_after: Duration,
}

impl Connection {
    pub fn new(
        remote: Address,
        local: Option<Address>,
        channel: Arc<dyn Channel>,
        active: bool,
        expired_after: Duration,
        maintaining_after: Duration,
    ) -> Self {
        let initial = match channel.state() {
            ChannelState::Init => ConnectionState::Default,
            _ => ConnectionState::Preparing,
        };
        Self {
            remote,
            local,
            channel: Mutex::new(channel),
            active,
            state: Mutex::new(initial),
            timestamps: Mutex::new(Timestamps {
                last_sent: None,
                last_received: None,
            }),
            expired_after,
            maintaining_after,
        }
    }

    pub fn remote(&self) -> Address {
        self.remote
    }

    pub fn local(&self) -> Option<Address> {
        self.local
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn channel(&self) -> Arc<dyn Channel> {
        Arc::clone(&self.channel.lock())
    }

    pub fn replace_channel(&self, channel: Arc<dyn Channel>) {
        *self.channel.lock() = channel;
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.lock()
    }

    /// 记录一次成功接收，并据此推进状态机：`PREPARING`/`MAINTAINING` 都会因为
    /// "收到证据" 而回到 `READY`。
    pub fn on_received(&self, now: Instant) {
        self.timestamps.lock().last_received = Some(now);
        let mut state = self.state.lock();
        if matches!(*state, ConnectionState::Preparing | ConnectionState::Maintaining) {
            *state = ConnectionState::Ready;
        }
    }

    /// 记录一次成功发送。`EXPIRED` 因为这次发送（探测心跳）转入 `MAINTAINING`；
    /// `PREPARING` 同样因为"首次发送成功"直接进入 `READY`。
    pub fn on_sent(&self, now: Instant) {
        self.timestamps.lock().last_sent = Some(now);
        let mut state = self.state.lock();
        match *state {
            ConnectionState::Preparing => *state = ConnectionState::Ready,
            ConnectionState::Expired => *state = ConnectionState::Maintaining,
            _ => {}
        }
    }

    /// I/O 错误或通道关闭：立即转入 `ERROR`，与具体处于哪个状态无关。
    pub fn on_io_error(&self) {
        *self.state.lock() = ConnectionState::Error;
    }

    /// 在每个节拍上重新评估随时间推移发生的迁移：`READY -> EXPIRED`、
    /// `MAINTAINING -> ERROR`、通道关闭时任何状态 `-> ERROR`、以及（仅主动连接）
    /// `ERROR -> DEFAULT`（一旦通道被重新打开）。返回迁移前后的状态供调用方比较。
    pub fn tick(&self, now: Instant) -> (ConnectionState, ConnectionState) {
        let before = self.state();
        let channel_state = self.channel().state();

        let mut state = self.state.lock();
        if matches!(channel_state, ChannelState::Closed) && !matches!(*state, ConnectionState::Error)
        {
            *state = ConnectionState::Error;
        } else {
            let timestamps = self.timestamps.lock();
            match *state {
                ConnectionState::Default => {
                    if !matches!(channel_state, ChannelState::Init) {
                        *state = ConnectionState::Preparing;
                    }
                }
                ConnectionState::Ready => {
                    if let Some(last_recv) = timestamps.last_received
                        && now.saturating_duration_since(last_recv) > self.expired_after
                    {
                        *state = ConnectionState::Expired;
                    }
                }
                ConnectionState::Maintaining => {
                    // the failure point is measured from last_recv, not from when the probe
                    // was sent: MAINTAINING is entered only after the expiry window has
                    // already elapsed, so the remaining budget before ERROR is the
                    // maintaining window added on top of the expiry window, both counted
                    // from last_recv.
                    if let Some(last_recv) = timestamps.last_received
                        && now.saturating_duration_since(last_recv)
                            > self.expired_after + self.maintaining_after
                    {
                        *state = ConnectionState::Error;
                    }
                }
                ConnectionState::Error => {
                    if self.active && !matches!(channel_state, ChannelState::Closed) {
                        *state = ConnectionState::Default;
                    }
                }
                ConnectionState::Preparing | ConnectionState::Expired => {}
            }
        }
        (before, *state)
    }
}

/// 便于测试注入 [`Clock`] 而不是 `Instant::now()` 的薄包装。生产路径里调用方
/// 直接拿 `Instant::now()` 调 [`Connection::tick`]；这个帮助函数只是减少样板代码。
pub fn tick_with_clock(connection: &Connection, clock: &dyn Clock) -> (ConnectionState, ConnectionState) {
    connection.tick(clock.now())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{ReadOutcome, WriteOutcome};
    use std::io;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct FakeChannel {
        closed: AtomicBool,
    }

    impl Channel for FakeChannel {
        fn state(&self) -> ChannelState {
            if self.closed.load(Ordering::SeqCst) {
                ChannelState::Closed
            } else {
                ChannelState::Alive
            }
        }
        fn local_address(&self) -> Option<Address> {
            None
        }
        fn remote_address(&self) -> Option<Address> {
            None
        }
        fn read(&self, _max_len: usize) -> io::Result<ReadOutcome> {
            Ok(ReadOutcome::WouldBlock)
        }
        fn write(&self, _data: &[u8], _destination: Option<Address>) -> io::Result<WriteOutcome> {
            Ok(WriteOutcome::Written(0))
        }
        fn close(&self) {
            self.closed.store(true, Ordering::SeqCst);
        }
    }

    fn remote() -> Address {
        Address::new("127.0.0.1".parse().unwrap(), 9394)
    }

    fn new_connection(active: bool) -> Connection {
        let channel: Arc<dyn Channel> = Arc::new(FakeChannel {
            closed: AtomicBool::new(false),
        });
        Connection::new(
            remote(),
            None,
            channel,
            active,
            Duration::from_secs(28),
            Duration::from_secs(32),
        )
    }

    #[test]
    fn ready_expires_then_recovers_through_maintaining() {
        let conn = new_connection(true);
        let t0 = Instant::now();
        conn.on_received(t0);
        assert_eq!(conn.state(), ConnectionState::Ready);

        // still silent at +29s -> EXPIRED
        let t1 = t0 + Duration::from_secs(29);
        let (_, after) = conn.tick(t1);
        assert_eq!(after, ConnectionState::Expired);

        // a probe send -> MAINTAINING
        conn.on_sent(t1);
        assert_eq!(conn.state(), ConnectionState::Maintaining);

        // reply arrives within the maintaining window -> READY
        let t2 = t1 + Duration::from_secs(10);
        conn.on_received(t2);
        assert_eq!(conn.state(), ConnectionState::Ready);
    }

    #[test]
    fn maintaining_times_out_to_error_past_60s_since_last_recv() {
        let conn = new_connection(true);
        let t0 = Instant::now();
        conn.on_received(t0);
        let t1 = t0 + Duration::from_secs(29);
        conn.tick(t1);
        conn.on_sent(t1);
        assert_eq!(conn.state(), ConnectionState::Maintaining);

        // still within the combined 60s budget (expiry + maintaining windows, since last_recv): stays MAINTAINING.
        let t2 = t0 + Duration::from_secs(45);
        let (_, still_maintaining) = conn.tick(t2);
        assert_eq!(still_maintaining, ConnectionState::Maintaining);

        // past 60s since last_recv: ERROR.
        let t3 = t0 + Duration::from_secs(61);
        let (_, after) = conn.tick(t3);
        assert_eq!(after, ConnectionState::Error);
    }

    #[test]
    fn active_connection_recovers_from_error_once_channel_reopens() {
        let conn = new_connection(true);
        conn.on_io_error();
        assert_eq!(conn.state(), ConnectionState::Error);

        let reopened: Arc<dyn Channel> = Arc::new(FakeChannel {
            closed: AtomicBool::new(false),
        });
        conn.replace_channel(reopened);
        let (_, after) = conn.tick(Instant::now());
        assert_eq!(after, ConnectionState::Default);
    }

    #[test]
    fn passive_connection_stays_in_error() {
        let conn = new_connection(false);
        conn.on_io_error();
        let (_, after) = conn.tick(Instant::now());
        assert_eq!(after, ConnectionState::Error);
    }
}
