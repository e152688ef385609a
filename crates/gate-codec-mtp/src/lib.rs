//! `gate-codec-mtp`：面向数据报传输的分片/确认包编解码器（Message Transfer
//! Protocol 的简写）——每个 UDP 数据报恰好承载一枚分片,逻辑消息可以拆成多个
//! 分片,接收方逐枚确认。
//!
//! # 意图（Why）
//! 流式编解码器（`gate-codec-plain`）靠 OS TCP 保证可靠交付,不需要关心分片或
//! 确认;数据报传输没有这个保证,所以 `gate-core` 把"分片计数/索引/确认分类"
//! 这套元数据放进了帧头——这个 crate 就是把 [`gate_core::ship::IncomingFragment`]/
//! [`gate_core::ship::OutgoingFragment`] 和这套帧头相互转换的地方。
//!
//! # 线上格式（How）
//! ```text
//! +--------+------+--------+--------+--------+-----------+-----...-----+
//! | magic  | kind |   sn   | index  | total  | body_len  |    body     |
//! | 1 byte |1 byte| 4 BE   | 2 BE   | 2 BE   |  4 BE     | body_len B  |
//! +--------+------+--------+--------+--------+-----------+-----...-----+
//! ```
//! `kind` 取自 [`gate_core::ship::FragmentKind`]：`0=Message 1=Command
//! 2=MessageAck 3=CommandAck`。一个数据报恰好是一帧,不会出现跨报文粘连,但
//! `unpack` 仍然按"可重启"的流式契约实现,不假设每次调用只喂一个完整报文。
//!
//! # 确认（Trade-offs）
//! [`MtpCodec::ack_for`] 只为非确认分片生成回执——`MESSAGE`→`MESSAGE_ACK`、
//! `COMMAND`→`COMMAND_ACK`——回执本身永远是单分片、不再要求确认,避免确认风暴
//! （确认的确认）。

mod codec;
mod frame;

pub use codec::MtpCodec;
