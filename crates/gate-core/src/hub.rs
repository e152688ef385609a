//! Hub：通道与连接的注册表。
//!
//! # 意图（Why）
//! 到底哪些字节属于哪个连接，是一张 `(remote, local)` 二元键的字典;包协议常常想让
//! 一个绑定好的套接字被多个“虚拟连接”共享（例如一个 UDP 服务器 socket 服务所有对端），
//! 这就是 [`HubKeyMode::CollapseLocal`] 存在的原因——它把连接键按 `local`
//! 折叠，而不强制每个对端各开一个物理通道。流式传输通常不需要折叠，使用
//! [`HubKeyMode::Distinct`]。
//!
//! 真正的字节读取发生在 [`crate::porter::Porter::process`]；`Hub::process` 只负责
//! 沿连接状态机推进心跳，并回收已经 `CLOSED` 的通道——两者分离是为了避免同一个
//! 套接字的数据被两处并发消费。

use std::io;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tracing::{debug, info, warn};

use crate::address::Address;
use crate::channel::{Channel, ChannelFactory, ChannelState};
use crate::connection::{Connection, ConnectionState};

/// 包协议的 Hub 常把连接键按 `local` 折叠；
/// 流协议通常保持每个 `(remote, local)` 对独立。
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum HubKeyMode {
    Distinct,
    CollapseLocal,
}

type ChannelKey = (Option<Address>, Option<Address>);
type ConnectionKey = (Address, Option<Address>);

impl HubKeyMode {
    fn channel_key(self, remote: Option<Address>, local: Option<Address>) -> ChannelKey {
        match self {
            HubKeyMode::Distinct => (remote, local),
            HubKeyMode::CollapseLocal => (None, local),
        }
    }

    /// Connections are always keyed by the full `(remote, local)` pair — each remote
    /// peer is a distinct virtual connection even when several of them share one
    /// physical channel under [`HubKeyMode::CollapseLocal`].
    fn connection_key(self, remote: Address, local: Option<Address>) -> ConnectionKey {
        let _ = self;
        (remote, local)
    }
}

/// `channels`/`connections` 两张字典的持有者，外加创建/连接所需要的传输层工厂钩子。
pub struct Hub {
    factory: Arc<dyn ChannelFactory>,
    key_mode: HubKeyMode,
    channels: DashMap<ChannelKey, Arc<dyn Channel>>,
    connections: DashMap<ConnectionKey, Arc<Connection>>,
    expired_after: Duration,
    maintaining_after: Duration,
}

impl Hub {
    pub fn new(
        factory: Arc<dyn ChannelFactory>,
        key_mode: HubKeyMode,
        expired_after: Duration,
        maintaining_after: Duration,
    ) -> Self {
        Self {
            factory,
            key_mode,
            channels: DashMap::new(),
            connections: DashMap::new(),
            expired_after,
            maintaining_after,
        }
    }

    /// 查找或创建一个被动打开的通道。
    pub fn open(
        &self,
        remote: Option<Address>,
        local: Option<Address>,
    ) -> io::Result<Arc<dyn Channel>> {
        let key = self.key_mode.channel_key(remote, local);
        if let Some(existing) = self.channels.get(&key) {
            return Ok(Arc::clone(existing.value()));
        }
        let channel = self.factory.open(local)?;
        self.channels.insert(key, Arc::clone(&channel));
        Ok(channel)
    }

    /// 查找或创建一条到 `remote` 的连接；若是新建的主动连接，立即尝试打开底层通道。
    pub fn connect(&self, remote: Address, local: Option<Address>) -> io::Result<Arc<Connection>> {
        let conn_key = self.key_mode.connection_key(remote, local);
        if let Some(existing) = self.connections.get(&conn_key) {
            return Ok(Arc::clone(existing.value()));
        }

        let channel_key = self.key_mode.channel_key(Some(remote), local);
        let channel = match self.channels.get(&channel_key) {
            Some(existing) => Arc::clone(existing.value()),
            None => {
                let channel = self.factory.connect(remote, local)?;
                self.channels.insert(channel_key, Arc::clone(&channel));
                channel
            }
        };

        let connection = Arc::new(Connection::new(
            remote,
            local,
            channel,
            true,
            self.expired_after,
            self.maintaining_after,
        ));
        self.connections.insert(conn_key, Arc::clone(&connection));
        Ok(connection)
    }

    /// 为被动接受的连接注册一条记录（例如 TCP 服务端 accept 之后）。
    pub fn adopt_passive(
        &self,
        remote: Address,
        local: Option<Address>,
        channel: Arc<dyn Channel>,
    ) -> Arc<Connection> {
        let conn_key = self.key_mode.connection_key(remote, local);
        let channel_key = self.key_mode.channel_key(Some(remote), local);
        self.channels.insert(channel_key, Arc::clone(&channel));

        let connection = Arc::new(Connection::new(
            remote,
            local,
            channel,
            false,
            self.expired_after,
            self.maintaining_after,
        ));
        self.connections.insert(conn_key, Arc::clone(&connection));
        connection
    }

    /// 移除一条连接；若对应的通道不再被任何其它连接引用，一并关闭并回收。
    pub fn disconnect(&self, remote: Address, local: Option<Address>) {
        let conn_key = self.key_mode.connection_key(remote, local);
        let Some((_, connection)) = self.connections.remove(&conn_key) else {
            return;
        };

        let channel_key = self.key_mode.channel_key(Some(remote), local);
        let still_referenced = self.connections.iter().any(|entry| {
            let (other_remote, other_local) = *entry.key();
            self.key_mode.channel_key(Some(other_remote), other_local) == channel_key
        });
        if !still_referenced {
            connection.channel().close();
            self.channels.remove(&channel_key);
        }
    }

    pub fn connection(&self, remote: Address, local: Option<Address>) -> Option<Arc<Connection>> {
        let key = self.key_mode.connection_key(remote, local);
        self.connections.get(&key).map(|entry| Arc::clone(entry.value()))
    }

    /// 每个节拍调用一次：沿每条连接推进心跳状态机，回收已经 `CLOSED` 的通道。
    /// 实际字节读写在各自的 `Porter` 里发生，这里只处理
    /// 不依赖具体数据内容的簿记工作。返回是否有任何状态发生了变化。
    pub fn process(&self, now: Instant) -> bool {
        let mut did_work = false;

        for entry in self.connections.iter() {
            let (before, after) = entry.value().tick(now);
            if before != after {
                did_work = true;
                debug!(remote = %entry.key().0, ?before, ?after, "connection state changed");
            }
        }

        let dead_channels: Vec<ChannelKey> = self
            .channels
            .iter()
            .filter(|entry| matches!(entry.value().state(), ChannelState::Closed))
            .map(|entry| *entry.key())
            .collect();
        for key in dead_channels {
            self.channels.remove(&key);
            did_work = true;
        }

        did_work
    }

    pub fn factory(&self) -> &Arc<dyn ChannelFactory> {
        &self.factory
    }

    pub fn connections_snapshot(&self) -> Vec<(ConnectionKey, Arc<Connection>)> {
        self.connections
            .iter()
            .map(|entry| (*entry.key(), Arc::clone(entry.value())))
            .collect()
    }
}

/// 主动连接失败后的固定退避重连循环。
/// 独立于 `Metronome`：这是为数不多真正需要后台任务的地方，因为重连涉及阻塞式的
/// 操作系统连接尝试，不适合塞进协作式节拍循环。
pub async fn reconnect_loop(
    hub: Arc<Hub>,
    remote: Address,
    local: Option<Address>,
    backoff: Duration,
) {
    loop {
        tokio::time::sleep(backoff).await;
        let Some(connection) = hub.connection(remote, local) else {
            return;
        };
        if !matches!(connection.state(), ConnectionState::Error) {
            continue;
        }
        match hub.factory.connect(remote, local) {
            Ok(channel) => {
                connection.replace_channel(channel);
                info!(%remote, "reconnected after error");
            }
            Err(err) => {
                warn!(%remote, error = %err, "reconnect attempt failed, will retry");
            }
        }
    }
}
