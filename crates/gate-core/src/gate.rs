//! Gate：对外门面。
//!
//! `Gate` 拥有一个 [`Hub`]、一张 `remote → Porter` 的表，以及一个 delegate。它本身
//! 实现 [`crate::ticker::Ticker`]，注册到某个 [`Metronome`] 之后，每个节拍依次驱动
//! Hub 和所有 Porter，并把 porter 产生的事件翻译成 delegate 回调。

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tracing::{debug, warn};

use crate::address::Address;
use crate::codec::Codec;
use crate::config::GateConfig;
use crate::connection::Connection;
use crate::departure::Departure;
use crate::error::GateError;
use crate::hub::Hub;
use crate::porter::{Porter, PorterEvent, PorterStatus};
use crate::ship::{DeparturePriority, DepartureSummary, SerialNumber};
use crate::ticker::{Metronome, Ticker};

/// 上层业务实现的四个回调。默认方法体为空，调用方只需覆盖关心的那几个。
pub trait GateDelegate: Send + Sync {
    fn gate_status_changed(
        &self,
        remote: Address,
        local: Option<Address>,
        before: PorterStatus,
        after: PorterStatus,
    ) {
        let _ = (remote, local, before, after);
    }

    fn gate_received(&self, source: Address, destination: Address, body: bytes::Bytes) {
        let _ = (source, destination, body);
    }

    fn gate_sent(&self, destination: Address, summary: DepartureSummary) {
        let _ = (destination, summary);
    }

    fn gate_error(&self, remote: Address, error: GateError) {
        let _ = (remote, error);
    }
}

/// 构造新 porter 所需的编解码器；不同的协议（长度前缀流式/分片包式）通过覆盖
/// 这个钩子来决定给新连接绑定哪种编解码器。
pub trait CodecFactory: Send + Sync {
    fn create_codec(&self, remote: Address, local: Option<Address>) -> Arc<dyn Codec>;
}

struct PorterSlot {
    porter: Arc<Porter>,
    last_status: parking_lot::Mutex<PorterStatus>,
}

/// 网关公共门面。
pub struct Gate {
    hub: Arc<Hub>,
    porters: DashMap<(Address, Option<Address>), PorterSlot>,
    codec_factory: Arc<dyn CodecFactory>,
    delegate: Arc<dyn GateDelegate>,
    config: GateConfig,
    running: AtomicBool,
}

impl Gate {
    pub fn new(
        hub: Arc<Hub>,
        codec_factory: Arc<dyn CodecFactory>,
        delegate: Arc<dyn GateDelegate>,
        config: GateConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            hub,
            porters: DashMap::new(),
            codec_factory,
            delegate,
            config,
            running: AtomicBool::new(false),
        })
    }

    /// 向 `PrimeMetronome`（或调用方显式提供的任意 [`Metronome`]）注册自己。
    pub fn start(self: &Arc<Self>, metronome: &Arc<Metronome>) {
        self.running.store(true, Ordering::SeqCst);
        let ticker: Arc<dyn Ticker> = Arc::clone(self) as Arc<dyn Ticker>;
        metronome.add_ticker(&ticker);
    }

    /// 协作式停止：清除 `running` 标志；下一次 tick 会发现它，尽力 flush 待发数据
    /// 后不再推进。`Metronome` 持有的是弱引用，
    /// 一旦调用方释放最后一个 `Arc<Gate>`，注册也会自然消失。
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// 底层 [`Hub`]：传输层的被动 accept 路径（例如 TCP 服务端）需要先把新通道
    /// 登记成一条连接（`hub.adopt_passive`），再调用 [`Gate::fetch_porter`] 把它
    /// 绑成一个 porter。
    pub fn hub(&self) -> &Arc<Hub> {
        &self.hub
    }

    /// 解析或创建到 `destination` 的 porter，把 `body` 切成一个或多个分片后作为
    /// 一枚离站消息追加到它的离站厅。是否切片、切多大由
    /// `config.max_fragment_len` 决定——流式编解码器留 `None` 就永远是单分片。
    pub fn send_ship(
        &self,
        body: bytes::Bytes,
        source: Option<Address>,
        destination: Address,
        priority: DeparturePriority,
        requires_ack: bool,
    ) -> std::io::Result<SerialNumber> {
        let porter = self.fetch_porter(destination, source)?;
        let sn = SerialNumber(next_local_sn());
        porter.append_departure(Departure {
            sn,
            destination,
            priority,
            pages: split_into_pages(body, self.config.max_fragment_len),
            requires_ack,
            touch_time: Instant::now(),
            kind: crate::ship::FragmentKind::Message,
        });
        Ok(sn)
    }

    /// 返回已存在的 porter，或绑定到一条已有连接（例如服务端 `adopt_passive` 接受
    /// 的连接）并以 `create_porter` 钩子新建一个；只有在 Hub 里也找不到连接时才会
    /// 去建立一条新的主动连接。
    pub fn fetch_porter(&self, remote: Address, local: Option<Address>) -> std::io::Result<Arc<Porter>> {
        let key = (remote, local);
        if let Some(slot) = self.porters.get(&key) {
            return Ok(Arc::clone(&slot.porter));
        }

        let connection = match self.hub.connection(remote, local) {
            Some(existing) => existing,
            None => self.hub.connect(remote, local)?,
        };
        let porter = self.create_porter(connection, remote, local);
        self.porters.insert(
            key,
            PorterSlot {
                porter: Arc::clone(&porter),
                last_status: parking_lot::Mutex::new(PorterStatus::Preparing),
            },
        );
        Ok(porter)
    }

    /// 覆盖点：把一条新连接包装成 porter，绑定由 `codec_factory` 决定的编解码器。
    fn create_porter(&self, connection: Arc<Connection>, remote: Address, local: Option<Address>) -> Arc<Porter> {
        let codec = self.codec_factory.create_codec(remote, local);
        Arc::new(Porter::new(
            connection,
            codec,
            self.config.arrival_expires,
            self.config.departure_expires,
            self.config.departure_retries,
            Instant::now(),
        ))
    }

    /// 单次节拍：推进 Hub，再轮询每个 porter，最后比较状态变化并派发 delegate 回调。
    fn drive(&self, now: Instant) {
        if !self.is_running() {
            return;
        }

        self.hub.process(now);

        for entry in self.porters.iter() {
            let (remote, local) = *entry.key();
            let slot = entry.value();
            let before = *slot.last_status.lock();
            let (_did_work, events) = slot.porter.process(now);
            let after = slot.porter.status();

            for event in events {
                self.dispatch(remote, event);
            }

            if before != after {
                *slot.last_status.lock() = after;
                self.delegate.gate_status_changed(remote, local, before, after);
            }
        }
    }

    fn dispatch(&self, remote: Address, event: PorterEvent) {
        match event {
            PorterEvent::Received {
                body,
                source,
                destination,
            } => {
                debug!(%source, %destination, bytes = body.len(), "gate received");
                self.delegate.gate_received(source, destination, body);
            }
            PorterEvent::Sent { summary } => {
                self.delegate.gate_sent(remote, summary);
            }
            PorterEvent::Error(error) => {
                warn!(%remote, %error, "gate error");
                self.delegate.gate_error(remote, error);
            }
        }
    }
}

impl Ticker for Gate {
    fn tick(&self, now: Instant, _elapsed: Duration) {
        self.drive(now);
    }
}

fn next_local_sn() -> u32 {
    use std::sync::atomic::AtomicU32;
    static COUNTER: AtomicU32 = AtomicU32::new(1);
    COUNTER.fetch_add(1, Ordering::SeqCst)
}

/// 把一个消息体按 `max_fragment_len` 切成若干分片（零拷贝：每一页都是对同一块
/// 底层缓冲的廉价 `Bytes::slice`）。`None`、`0`，或者本来就不超限，都退化成单分片。
fn split_into_pages(body: bytes::Bytes, max_fragment_len: Option<usize>) -> Vec<bytes::Bytes> {
    let Some(limit) = max_fragment_len.filter(|limit| *limit > 0) else {
        return vec![body];
    };
    if body.len() <= limit {
        return vec![body];
    }

    let mut pages = Vec::with_capacity(body.len().div_ceil(limit));
    let mut offset = 0;
    while offset < body.len() {
        let end = (offset + limit).min(body.len());
        pages.push(body.slice(offset..end));
        offset = end;
    }
    pages
}
