//! Ship 模型：逻辑消息及其分片。
//!
//! `Arrival`（到站）与 `Departure`（离站）共享 `sn`/分片计数/`touch_time` 这组概念，
//! 但各自携带不同的生命周期数据，因此这里只定义共享的小类型；`Arrival` 本体见
//! [`crate::arrival`]，`Departure` 本体见 [`crate::departure`]。

use std::time::Instant;

use bytes::Bytes;

use crate::address::Address;

/// 标识单个发送方在一个实践窗口内唯一的逻辑消息序列号。
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct SerialNumber(pub u32);

impl From<u32> for SerialNumber {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

impl std::fmt::Display for SerialNumber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// 离站优先级。派生的 `Ord` 顺序与声明顺序一致，天然满足
/// `Urgent < Normal < Slower` 的全序要求。
#[derive(Clone, Copy, Debug, Eq, PartialEq, PartialOrd, Ord, Hash)]
pub enum DeparturePriority {
    Urgent,
    Normal,
    Slower,
}

impl Default for DeparturePriority {
    fn default() -> Self {
        DeparturePriority::Normal
    }
}

impl DeparturePriority {
    /// 数组下标，供 `DepartureHall` 的三条队列使用。
    pub(crate) fn index(self) -> usize {
        match self {
            DeparturePriority::Urgent => 0,
            DeparturePriority::Normal => 1,
            DeparturePriority::Slower => 2,
        }
    }
}

/// 调度器视角下一枚离站分片的状态。
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ShipStatus {
    New,
    Waiting,
    Timeout,
    Done,
    Failed,
}

/// 入站分片在包协议上携带的分类。流协议永远只产生 `Message`。
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FragmentKind {
    Message,
    Command,
    MessageAck,
    CommandAck,
}

impl FragmentKind {
    pub fn is_ack(self) -> bool {
        matches!(self, FragmentKind::MessageAck | FragmentKind::CommandAck)
    }
}

/// 编解码器 `unpack` 产出的一枚入站分片，尚未进入到站厅重组。
#[derive(Clone, Debug)]
pub struct IncomingFragment {
    pub sn: SerialNumber,
    pub index: u16,
    pub total: u16,
    pub body: Bytes,
    pub kind: FragmentKind,
    pub source: Address,
    pub destination: Address,
}

/// 交给编解码器 `pack` 的一枚离站分片的线上表示请求。
#[derive(Clone, Debug)]
pub struct OutgoingFragment {
    pub sn: SerialNumber,
    pub index: u16,
    pub total: u16,
    pub body: Bytes,
    pub kind: FragmentKind,
    pub destination: Address,
}

/// 用于 delegate 回调的离站摘要，不持有调度器内部状态。
#[derive(Clone, Debug)]
pub struct DepartureSummary {
    pub sn: SerialNumber,
    pub priority: DeparturePriority,
    pub total_fragments: u16,
    pub touch_time: Instant,
}
