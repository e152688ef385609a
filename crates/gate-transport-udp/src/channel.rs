use std::io;
use std::net::{SocketAddr, UdpSocket as StdUdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::BytesMut;
use tokio::net::UdpSocket as TokioUdpSocket;
use tracing::warn;

use gate_core::address::Address;
use gate_core::channel::{Channel, ChannelFactory, ChannelState, ReadOutcome, WriteOutcome};

struct UdpChannelInner {
    socket: TokioUdpSocket,
    local_addr: Address,
    closed: AtomicBool,
}

/// 数据报通道：一个已绑定的 `UdpSocket`，不固定对端。
///
/// 和 [`crate::TcpChannel`] 不同，这里 `remote_address()` 永远是 `None`——同一个
/// 绑定好的套接字要同时服务任意多个对端，"对端是谁"由每次 `read`/`write` 各自
/// 携带的地址决定,而不是通道本身的一个固定属性（呼应 `Hub` 的
/// [`gate_core::hub::HubKeyMode::CollapseLocal`]：多条虚拟连接共享同一个物理
/// 通道）。
#[derive(Clone)]
pub struct UdpChannel {
    inner: Arc<UdpChannelInner>,
}

impl UdpChannel {
    fn new(socket: TokioUdpSocket) -> io::Result<Self> {
        let local_addr = Address::from(socket.local_addr()?);
        Ok(Self {
            inner: Arc::new(UdpChannelInner {
                socket,
                local_addr,
                closed: AtomicBool::new(false),
            }),
        })
    }
}

impl Channel for UdpChannel {
    fn state(&self) -> ChannelState {
        if self.inner.closed.load(Ordering::SeqCst) {
            ChannelState::Closed
        } else {
            ChannelState::Alive
        }
    }

    /// 包式通道只要求绑定；没有"已连接"这个概念可言，默认的
    /// `is_alive` 已经足够，这里显式覆盖只是让调用方不必去读 `remote_address`。
    fn is_available(&self) -> bool {
        self.is_alive()
    }

    fn local_address(&self) -> Option<Address> {
        Some(self.inner.local_addr)
    }

    fn remote_address(&self) -> Option<Address> {
        None
    }

    fn read(&self, max_len: usize) -> io::Result<ReadOutcome> {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Ok(ReadOutcome::Eof);
        }

        let mut buf = BytesMut::zeroed(max_len);
        match self.inner.socket.try_recv_from(&mut buf) {
            Ok((n, from)) => {
                buf.truncate(n);
                Ok(ReadOutcome::Data(buf.freeze(), Some(Address::from(from))))
            }
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => Ok(ReadOutcome::WouldBlock),
            Err(err) => {
                self.inner.closed.store(true, Ordering::SeqCst);
                warn!(local = %self.inner.local_addr, error = %err, "udp recv failed");
                Err(err)
            }
        }
    }

    fn write(&self, data: &[u8], destination: Option<Address>) -> io::Result<WriteOutcome> {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "channel closed"));
        }
        let Some(destination) = destination else {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "udp write requires an explicit destination",
            ));
        };

        match self
            .inner
            .socket
            .try_send_to(data, SocketAddr::from(destination))
        {
            Ok(n) => Ok(WriteOutcome::Written(n)),
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => Ok(WriteOutcome::WouldBlock),
            Err(err) => {
                self.inner.closed.store(true, Ordering::SeqCst);
                warn!(local = %self.inner.local_addr, destination = %destination, error = %err, "udp send failed");
                Err(err)
            }
        }
    }

    fn close(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
    }
}

/// [`ChannelFactory`] 实现：`open`/`connect` 都落到同一段绑定逻辑——UDP 没有握手,
/// "连接"只是"绑定后第一次被某个远端使用"，真正的多路复用靠
/// [`gate_core::hub::HubKeyMode::CollapseLocal`] 共享同一个通道对象。
#[derive(Default)]
pub struct UdpChannelFactory;

impl UdpChannelFactory {
    pub fn new() -> Self {
        Self
    }

    fn bind(local: Option<Address>) -> io::Result<Arc<dyn Channel>> {
        let bind_addr: SocketAddr = local
            .map(SocketAddr::from)
            .unwrap_or_else(|| "0.0.0.0:0".parse().unwrap());
        let std_socket = StdUdpSocket::bind(bind_addr)?;
        std_socket.set_nonblocking(true)?;
        let tokio_socket = TokioUdpSocket::from_std(std_socket)?;
        let channel = UdpChannel::new(tokio_socket)?;
        Ok(Arc::new(channel))
    }
}

impl ChannelFactory for UdpChannelFactory {
    fn open(&self, local: Option<Address>) -> io::Result<Arc<dyn Channel>> {
        Self::bind(local)
    }

    fn connect(&self, remote: Address, local: Option<Address>) -> io::Result<Arc<dyn Channel>> {
        let _ = remote;
        Self::bind(local)
    }
}
