use std::io;
use std::net::{SocketAddr, TcpStream as StdTcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use socket2::{Domain, SockRef, Socket, Type};
use tokio::net::TcpStream as TokioTcpStream;
use tracing::{debug, warn};

use gate_core::address::Address;
use gate_core::channel::{Channel, ChannelFactory, ChannelState, ReadOutcome, WriteOutcome};

/// TCP 套接字级配置：目前只暴露 `SO_LINGER`。
#[derive(Clone, Copy, Debug, Default)]
pub struct TcpSocketConfig {
    linger: Option<Duration>,
}

impl TcpSocketConfig {
    pub const fn new() -> Self {
        Self { linger: None }
    }

    pub fn with_linger(mut self, linger: Option<Duration>) -> Self {
        self.linger = linger;
        self
    }

    pub fn linger(&self) -> Option<Duration> {
        self.linger
    }

    fn apply(&self, stream: &TokioTcpStream) -> io::Result<()> {
        SockRef::from(stream).set_linger(self.linger)
    }
}

struct TcpChannelInner {
    stream: TokioTcpStream,
    local_addr: Option<Address>,
    peer_addr: Option<Address>,
    closed: AtomicBool,
}

/// 流式通道：对一个已建立的 `TcpStream` 的非阻塞读写封装。
///
/// `try_read`/`try_write` 都只需要 `&TcpStream`，不需要互斥锁——这条连接在
/// 约定上始终只被一个 porter 独占驱动，和 `gate-core` 里其余组件"不持锁跨越
/// 调用方"的风格保持一致。
#[derive(Clone)]
pub struct TcpChannel {
    inner: Arc<TcpChannelInner>,
}

impl TcpChannel {
    fn from_tokio(stream: TokioTcpStream, config: &TcpSocketConfig) -> io::Result<Self> {
        config.apply(&stream)?;
        let local_addr = stream.local_addr().ok().map(Address::from);
        let peer_addr = stream.peer_addr().ok().map(Address::from);
        Ok(Self {
            inner: Arc::new(TcpChannelInner {
                stream,
                local_addr,
                peer_addr,
                closed: AtomicBool::new(false),
            }),
        })
    }

    /// 把一个已经由 accept 得到的 `tokio::net::TcpStream` 包装成通道（服务端路径，
    /// 参见 [`crate::serve_accept_loop`]）。
    pub fn from_accepted(stream: TokioTcpStream, config: &TcpSocketConfig) -> io::Result<Self> {
        Self::from_tokio(stream, config)
    }
}

impl Channel for TcpChannel {
    fn state(&self) -> ChannelState {
        if self.inner.closed.load(Ordering::SeqCst) {
            ChannelState::Closed
        } else {
            ChannelState::Alive
        }
    }

    fn local_address(&self) -> Option<Address> {
        self.inner.local_addr
    }

    fn remote_address(&self) -> Option<Address> {
        self.inner.peer_addr
    }

    fn read(&self, max_len: usize) -> io::Result<ReadOutcome> {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Ok(ReadOutcome::Eof);
        }

        let mut buf = BytesMut::zeroed(max_len);
        match self.inner.stream.try_read(&mut buf) {
            Ok(0) => {
                self.inner.closed.store(true, Ordering::SeqCst);
                Ok(ReadOutcome::Eof)
            }
            Ok(n) => {
                buf.truncate(n);
                Ok(ReadOutcome::Data(buf.freeze(), None))
            }
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => Ok(ReadOutcome::WouldBlock),
            Err(err) => {
                self.inner.closed.store(true, Ordering::SeqCst);
                warn!(peer = ?self.inner.peer_addr, error = %err, "tcp read failed");
                Err(err)
            }
        }
    }

    fn write(&self, data: &[u8], _destination: Option<Address>) -> io::Result<WriteOutcome> {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "channel closed"));
        }

        match self.inner.stream.try_write(data) {
            Ok(n) => Ok(WriteOutcome::Written(n)),
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => Ok(WriteOutcome::WouldBlock),
            Err(err) => {
                self.inner.closed.store(true, Ordering::SeqCst);
                warn!(peer = ?self.inner.peer_addr, error = %err, "tcp write failed");
                Err(err)
            }
        }
    }

    fn close(&self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        // Best-effort, synchronous shutdown via the raw fd so `close()` doesn't need
        // to be async; errors here are not actionable (the socket may already be gone).
        let _ = SockRef::from(&self.inner.stream).shutdown(std::net::Shutdown::Both);
        debug!(peer = ?self.inner.peer_addr, "tcp channel closed");
    }
}

/// [`ChannelFactory`] 实现：`connect` 建立一条新的出站 TCP 连接；`open` 对流式
/// 传输没有意义（监听套接字不是一个可读写的 `Channel`），由 [`crate::serve_accept_loop`]
/// 取代。
pub struct TcpChannelFactory {
    config: TcpSocketConfig,
}

impl TcpChannelFactory {
    pub fn new(config: TcpSocketConfig) -> Self {
        Self { config }
    }
}

impl Default for TcpChannelFactory {
    fn default() -> Self {
        Self::new(TcpSocketConfig::new())
    }
}

impl ChannelFactory for TcpChannelFactory {
    fn open(&self, _local: Option<Address>) -> io::Result<Arc<dyn Channel>> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "gate-transport-tcp channels are created by connect() or accept(), not open()",
        ))
    }

    /// 建立一条出站连接。这是这个 crate 里唯一一处同步阻塞的网络调用——
    /// `ChannelFactory::connect` 的签名是同步的，而建立 TCP 连接天然需要一次
    /// 往返，没有办法在不改变契约的前提下做成非阻塞。
    fn connect(&self, remote: Address, local: Option<Address>) -> io::Result<Arc<dyn Channel>> {
        let remote_addr: SocketAddr = remote.into();
        let socket = Socket::new(Domain::for_address(remote_addr), Type::STREAM, None)?;
        if let Some(local) = local {
            let local_addr: SocketAddr = local.into();
            socket.bind(&local_addr.into())?;
        }
        socket.connect(&remote_addr.into())?;
        socket.set_nonblocking(true)?;

        let std_stream: StdTcpStream = socket.into();
        let tokio_stream = TokioTcpStream::from_std(std_stream)?;
        let channel = TcpChannel::from_tokio(tokio_stream, &self.config)?;
        Ok(Arc::new(channel))
    }
}
