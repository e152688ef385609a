//! `gate-core`：协议无关的传输网关核心。
//!
//! 一个合作式节拍器（[`ticker`]）驱动任意数量的 [`gate::Gate`]；每个 Gate 拥有一个
//! [`hub::Hub`]（通道/连接注册表）和若干 [`porter::Porter`]（一条连接 + 一个编解码器
//! + 一对到站/离站厅）。业务代码只需要实现 [`gate::GateDelegate`] 和
//! [`codec::Codec`]，并通过具体传输层 crate（`gate-transport-tcp`/`gate-transport-udp`）
//! 提供 [`channel::ChannelFactory`]。
//!
//! 模块边界：
//! - [`ticker`] — 节拍驱动，唯一的真正异步挂起点。
//! - [`time`] — 可注入时钟，生产用 `SystemClock`，测试用 `MockClock`。
//! - [`address`]/[`ship`] — 地址与消息/分片的值类型。
//! - [`channel`] — 非阻塞读写契约，由传输层 crate 实现。
//! - [`connection`] — 心跳状态机。
//! - [`arrival`]/[`departure`] — 到站重组 / 离站调度重传。
//! - [`codec`] — 编解码器契约，由编解码 crate 实现。
//! - [`porter`] — 把以上几样绑定到一起，驱动一次轮询。
//! - [`hub`] — 通道/连接注册表。
//! - [`gate`] — 公共门面。
//! - [`config`]/[`error`] — 可调参数与统一错误类型。

pub mod address;
pub mod arrival;
pub mod channel;
pub mod codec;
pub mod config;
pub mod connection;
pub mod departure;
pub mod error;
pub mod gate;
pub mod hub;
pub mod porter;
pub mod ship;
pub mod ticker;
pub mod time;

/// 常用类型的一站式导入。
pub mod prelude {
    pub use crate::address::Address;
    pub use crate::channel::{Channel, ChannelFactory, ChannelState, ReadOutcome, WriteOutcome};
    pub use crate::codec::Codec;
    pub use crate::config::GateConfig;
    pub use crate::connection::{Connection, ConnectionState};
    pub use crate::error::{ErrorCategory, GateError};
    pub use crate::gate::{CodecFactory, Gate, GateDelegate};
    pub use crate::hub::{Hub, HubKeyMode};
    pub use crate::porter::{Porter, PorterStatus};
    pub use crate::ship::{DeparturePriority, FragmentKind, SerialNumber, ShipStatus};
    pub use crate::ticker::{Metronome, PrimeMetronome, Ticker};
    pub use crate::time::{Clock, SystemClock};
}
