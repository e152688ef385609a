//! connection expiry 场景的端到端集成测试。
//!
//! 不依赖任何真实传输：一个可手动投喂字节的假通道,配合手工构造的 `Instant`
//! 时间戳，让 `Gate::tick` 在毫秒级的真实耗时内走完 29s/39s 的静默窗口,断言
//! 状态机按 `Preparing -> Ready -> Expired -> Maintaining -> Ready` 的顺序
//! 推进。
//!
//! `PorterStatus`（对外可见的三态）把 `Ready`/`Maintaining`/`Expired` 都折叠成
//! `Ready`，所以这几步之间不会有 `gate_status_changed` 回调——这里直接
//! 读取 `Connection::state()` 作为事实来源，只在 `Preparing -> Ready` 与
//! 最终的 `-> Error`（此场景未触发）这类跨越对外三态边界的迁移上才会看到回调。

use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use bytes::{Bytes, BytesMut};

use gate_core::address::Address;
use gate_core::channel::{Channel, ChannelFactory, ChannelState, ReadOutcome, WriteOutcome};
use gate_core::codec::Codec;
use gate_core::config::GateConfig;
use gate_core::connection::ConnectionState;
use gate_core::error::GateError;
use gate_core::gate::{CodecFactory, Gate, GateDelegate};
use gate_core::hub::{Hub, HubKeyMode};
use gate_core::ship::{DeparturePriority, FragmentKind, IncomingFragment, OutgoingFragment, SerialNumber};
use gate_core::ticker::{Metronome, Ticker};

/// 一个可以被测试手工投喂入站字节的假通道；永不关闭，写入只是记录下来。
struct ControllableChannel {
    inbox: Mutex<VecDeque<Bytes>>,
    sent: Mutex<Vec<Bytes>>,
}

impl ControllableChannel {
    fn new() -> Self {
        Self {
            inbox: Mutex::new(VecDeque::new()),
            sent: Mutex::new(Vec::new()),
        }
    }

    fn push_inbound(&self, data: Bytes) {
        self.inbox.lock().unwrap().push_back(data);
    }
}

impl Channel for ControllableChannel {
    fn state(&self) -> ChannelState {
        ChannelState::Alive
    }
    fn local_address(&self) -> Option<Address> {
        None
    }
    fn remote_address(&self) -> Option<Address> {
        None
    }
    fn read(&self, _max_len: usize) -> io::Result<ReadOutcome> {
        match self.inbox.lock().unwrap().pop_front() {
            Some(data) => Ok(ReadOutcome::Data(data, None)),
            None => Ok(ReadOutcome::WouldBlock),
        }
    }
    fn write(&self, data: &[u8], _destination: Option<Address>) -> io::Result<WriteOutcome> {
        self.sent.lock().unwrap().push(Bytes::copy_from_slice(data));
        Ok(WriteOutcome::Written(data.len()))
    }
    fn close(&self) {}
}

/// 工厂始终返回同一个通道实例，让测试能在 `Gate::fetch_porter` 建好连接之后
/// 继续拿到它并投喂数据。
struct ControllableFactory {
    channel: Arc<ControllableChannel>,
}

impl ChannelFactory for ControllableFactory {
    fn open(&self, _local: Option<Address>) -> io::Result<Arc<dyn Channel>> {
        Ok(self.channel.clone() as Arc<dyn Channel>)
    }
    fn connect(&self, _remote: Address, _local: Option<Address>) -> io::Result<Arc<dyn Channel>> {
        Ok(self.channel.clone() as Arc<dyn Channel>)
    }
}

/// 没有任何成帧开销的编解码器：整个入站缓冲就是一条单分片消息,出站分片原样
/// 写出。够用来驱动连接状态机,不需要真实的线上格式。
struct RawCodec;

impl Codec for RawCodec {
    fn pack(&self, fragment: &OutgoingFragment) -> Result<Bytes, GateError> {
        Ok(fragment.body.clone())
    }

    fn unpack(
        &self,
        buffer: &mut BytesMut,
        source: Address,
        destination: Address,
    ) -> Result<Vec<IncomingFragment>, GateError> {
        if buffer.is_empty() {
            return Ok(Vec::new());
        }
        let body = buffer.split().freeze();
        Ok(vec![IncomingFragment {
            sn: SerialNumber(1),
            index: 0,
            total: 1,
            body,
            kind: FragmentKind::Message,
            source,
            destination,
        }])
    }

    fn check(&self, _buffer: &[u8]) -> bool {
        true
    }
}

struct RawCodecFactory;

impl CodecFactory for RawCodecFactory {
    fn create_codec(&self, _remote: Address, _local: Option<Address>) -> Arc<dyn Codec> {
        Arc::new(RawCodec)
    }
}

#[derive(Default)]
struct RecordingDelegate {
    status_changes: Mutex<Vec<(gate_core::porter::PorterStatus, gate_core::porter::PorterStatus)>>,
}

impl GateDelegate for RecordingDelegate {
    fn gate_status_changed(
        &self,
        _remote: Address,
        _local: Option<Address>,
        before: gate_core::porter::PorterStatus,
        after: gate_core::porter::PorterStatus,
    ) {
        self.status_changes.lock().unwrap().push((before, after));
    }
}

fn remote() -> Address {
    Address::new("127.0.0.1".parse().unwrap(), 9394)
}

#[test]
fn connection_expires_then_recovers_through_maintaining() {
    let channel = Arc::new(ControllableChannel::new());
    let hub = Arc::new(Hub::new(
        Arc::new(ControllableFactory {
            channel: channel.clone(),
        }),
        HubKeyMode::Distinct,
        Duration::from_secs(28),
        Duration::from_secs(32),
    ));
    let delegate = Arc::new(RecordingDelegate::default());
    let gate = Gate::new(hub.clone(), Arc::new(RawCodecFactory), delegate.clone(), GateConfig::default());
    // `start` only flips the running flag and registers a weak ticker handle; the
    // metronome itself is never driven since this test advances the gate by calling
    // `Ticker::tick` directly with synthetic timestamps.
    gate.start(&Metronome::new(Duration::from_millis(100)));
    gate.fetch_porter(remote(), None).unwrap();

    let t0 = Instant::now();

    // First bytes arrive: PREPARING -> READY.
    channel.push_inbound(Bytes::from_static(b"hello"));
    gate.tick(t0, Duration::from_millis(100));
    assert_eq!(
        hub.connection(remote(), None).unwrap().state(),
        ConnectionState::Ready
    );

    // 29s of silence: READY -> EXPIRED.
    let t1 = t0 + Duration::from_secs(29);
    gate.tick(t1, Duration::from_millis(100));
    assert_eq!(
        hub.connection(remote(), None).unwrap().state(),
        ConnectionState::Expired
    );

    // Queuing and sending a probe while EXPIRED: EXPIRED -> MAINTAINING.
    gate.send_ship(
        Bytes::from_static(b"ping"),
        None,
        remote(),
        DeparturePriority::Urgent,
        false,
    )
    .unwrap();
    gate.tick(t1, Duration::from_millis(100));
    assert_eq!(
        hub.connection(remote(), None).unwrap().state(),
        ConnectionState::Maintaining
    );

    // A reply within the maintaining window: MAINTAINING -> READY.
    let t2 = t1 + Duration::from_secs(10);
    channel.push_inbound(Bytes::from_static(b"pong"));
    gate.tick(t2, Duration::from_millis(100));
    assert_eq!(
        hub.connection(remote(), None).unwrap().state(),
        ConnectionState::Ready
    );

    // The external three-state view only ever saw PREPARING -> READY: the rest of
    // the dance stays folded inside `PorterStatus::Ready`.
    let changes = delegate.status_changes.lock().unwrap();
    assert_eq!(changes.len(), 1);
    assert_eq!(
        changes[0],
        (
            gate_core::porter::PorterStatus::Preparing,
            gate_core::porter::PorterStatus::Ready
        )
    );
}
