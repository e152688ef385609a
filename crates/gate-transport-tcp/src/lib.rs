//! `gate-transport-tcp`：流式传输层，把 `tokio::net::TcpStream` 包装成
//! [`gate_core::channel::Channel`]。
//!
//! # 意图（Why）
//! `gate-core` 只认识非阻塞的 `read`/`write`，不知道 TCP 本身；这个 crate 把
//! Tokio 的异步套接字适配成那套同步非阻塞契约，供 `Hub`/`Porter` 在节拍循环里
//! 直接调用,不需要 `.await`。
//!
//! # 实现策略（How）
//! 热路径（读写）完全走 `try_read`/`try_write`，不跨越 `.await` 边界；只有
//! 建立连接这一次性操作（[`TcpChannelFactory::connect`]）允许短暂阻塞——连接
//! 建立本身就需要时间，而 `ChannelFactory::connect` 的签名是同步的。服务端的
//! accept 循环走专门的异步 helper（[`serve_accept_loop`]），因为接受连接天然
//! 需要挂起等待,不适合塞进协作式节拍。

mod channel;
mod listener;

pub use channel::{TcpChannel, TcpChannelFactory, TcpSocketConfig};
pub use listener::serve_accept_loop;
