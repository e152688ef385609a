//! `gate-transport-udp`：数据报传输层，把 `tokio::net::UdpSocket` 包装成
//! [`gate_core::channel::Channel`]。
//!
//! # 意图（Why）
//! 和 `gate-transport-tcp` 一样，热路径只用非阻塞的 `try_recv_from`/`try_send_to`，
//! 不跨越 `.await` 边界，好让 `Hub`/`Porter` 在节拍循环里直接调用。UDP 没有
//! "连接"这个内核概念，所以这里的 [`UdpChannel`] 永远不固定对端——谁发来的就是
//! 谁，往哪发就显式带上目的地址，和 [`gate_core::hub::HubKeyMode::CollapseLocal`]
//! "一个物理通道服务多个虚拟连接" 的模型正好对上。
//!
//! # 实现策略（How）
//! `UdpChannelFactory::open`/`connect` 都落到同一段"绑定一个本地地址"的逻辑；
//! 绑定本身是一次同步、非阻塞的系统调用，不像 TCP 的 `connect` 那样需要握手，
//! 所以这里不需要 TCP 那样的"一次性阻塞让步"说明。

mod channel;

pub use channel::{UdpChannel, UdpChannelFactory};
