//! 通道抽象。
//!
//! 生产实现（`gate-transport-tcp`/`gate-transport-udp`）把一个 Tokio 套接字封装成
//! [`Channel`]；本 crate 只定义契约与状态机，不知道具体传输协议。

use std::io;

use bytes::Bytes;

use crate::address::Address;

/// 通道生命周期：`Closed` 是终态。
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ChannelState {
    Init,
    Open,
    Alive,
    Closed,
}

/// 一次非阻塞读取的结果。“暂无数据”不是错误，因此用枚举而不是
/// `Result` 的 `Err` 分支表达它。
#[derive(Debug)]
pub enum ReadOutcome {
    /// 非阻塞读取暂时没有数据；下一个周期再试。
    WouldBlock,
    /// 流式通道读到 0 字节，对端已关闭写侧。
    Eof,
    /// 读到数据；数据报通道附带发送方地址。
    Data(Bytes, Option<Address>),
}

/// 一次非阻塞写入的结果。
#[derive(Debug)]
pub enum WriteOutcome {
    WouldBlock,
    Written(usize),
}

/// 通道能力集合：流式（TCP 风格）与数据报（UDP 风格）通过同一接口暴露，
/// 差异体现在 `write` 是否需要显式目的地址、以及 `read` 是否返回来源地址。
pub trait Channel: Send + Sync {
    fn state(&self) -> ChannelState;

    fn is_open(&self) -> bool {
        !matches!(self.state(), ChannelState::Init | ChannelState::Closed)
    }

    /// 本地地址是否已经绑定。默认以 `local_address()` 是否
    /// 存在判断；大多数传输层实现不需要覆盖。
    fn is_bound(&self) -> bool {
        self.local_address().is_some()
    }

    /// 是否已确立对端（流式通道在 `connect`/accept 之后；包式通道一般恒为
    /// `false`，因为它本来就不预先固定对端）。默认以 `remote_address()` 是否
    /// 存在判断。
    fn is_connected(&self) -> bool {
        self.remote_address().is_some()
    }

    fn is_alive(&self) -> bool {
        matches!(self.state(), ChannelState::Alive)
    }

    /// 是否可以立即进行一次有意义的读写。默认等价于 `is_alive`；数据报通道可以覆盖它以反映"绑定即可用"。
    fn is_available(&self) -> bool {
        self.is_alive()
    }

    fn is_vacant(&self) -> bool {
        !matches!(self.state(), ChannelState::Closed)
    }

    fn local_address(&self) -> Option<Address>;
    fn remote_address(&self) -> Option<Address>;

    /// 非阻塞读取至多 `max_len` 字节。流式通道忽略 `destination` 参数由来源推断；
    /// 数据报通道必须先 `bind` 才能读取。
    fn read(&self, max_len: usize) -> io::Result<ReadOutcome>;

    /// 非阻塞写入。流式通道忽略 `destination`（已通过 `connect` 固定对端）；
    /// 数据报通道要求显式给出 `destination`。
    fn write(&self, data: &[u8], destination: Option<Address>) -> io::Result<WriteOutcome>;

    /// 主动关闭通道，使其不可逆地转入 `Closed`。
    fn close(&self);
}


/// 通道工厂钩子：`Hub` 不知道具体传输协议，
/// 通过这个 trait 得到新建/绑定/连接的通道。
pub trait ChannelFactory: Send + Sync {
    /// 被动打开（监听/绑定本地地址，不指定对端）。
    fn open(&self, local: Option<Address>) -> io::Result<std::sync::Arc<dyn Channel>>;

    /// 主动连接到对端；`local` 为可选的本地绑定地址。
    fn connect(
        &self,
        remote: Address,
        local: Option<Address>,
    ) -> io::Result<std::sync::Arc<dyn Channel>>;
}
