//! `gate-codec-plain`：最简单的包解码器——一个 4 字节大端长度前缀 + 原始载荷，
//! 每帧恰好对应一枚逻辑消息（`total == 1`），不携带 ACK 语义。
//!
//! # 意图（Why）
//! `gate-core` 需要至少一个流式编解码器来驱动 `gate-transport-tcp` 上的连接；
//! 长度前缀是流上定界最省事的办法,不需要转义、不需要扫描分隔符,解码端只要
//! 看够字节数就能切出一帧。
//!
//! # 行为概览（How）
//! - `pack`：写 4 字节大端长度，再写载荷；忽略分片索引/总数（调用方保证
//!   `total == 1`，因为这个编解码器从不切片）。
//! - `unpack`：从缓冲区头部反复尝试切出"长度前缀 + 载荷"，不完整的尾部留在
//!   `buffer` 里等待下一次调用；每解出一帧就分配一个
//!   本地递增的序列号，因为流式协议本身不带序列号。
//! - `check`：只要求缓冲里已经有 4 字节可读,不校验长度字段是否合理——那是
//!   `unpack` 的 `DecodeFailed` 负责的事。
//!
//! # 权衡（Trade-offs）
//! - 没有最大帧长度保护会让一个声称长度为 4GB 的恶意前缀耗尽内存，因此
//!   [`PlainCodec`] 默认带一个 `max_frame_len` 上限,超限直接判定为解码失败。

mod codec;

pub use codec::PlainCodec;
