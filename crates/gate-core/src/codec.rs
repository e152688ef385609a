//! 编解码器契约。
//!
//! `Codec` 把字节流/数据报与 [`IncomingFragment`]/[`OutgoingFragment`] 互相转换；
//! 到站重组（多分片合并）和离站调度（优先级/重传）都在编解码器之外，分别由
//! [`crate::arrival::ArrivalHall`] 与 [`crate::departure::DepartureHall`] 负责——
//! 编解码器只管一帧的序列化形式，不关心消息级别的生命周期。

use bytes::{Bytes, BytesMut};

use crate::address::Address;
use crate::error::GateError;
use crate::ship::{IncomingFragment, OutgoingFragment};

/// 可插拔的编解码器契约。流编解码器（如 `gate-codec-plain`）永远只产生
/// `total == 1` 的分片，不需要 ACK；包编解码器（如 `gate-codec-mtp`）可以把一条
/// 逻辑消息切成多个分片，并用 `FragmentKind::*Ack` 变体承载确认。
pub trait Codec: Send + Sync {
    /// 将一枚离站分片序列化为线上字节。
    fn pack(&self, fragment: &OutgoingFragment) -> Result<Bytes, GateError>;

    /// 从累积缓冲区中解出零个或多个完整分片，并消费掉对应的字节；尾部不完整的
    /// 字节必须保留在 `buffer` 中供下一次调用继续使用。
    fn unpack(
        &self,
        buffer: &mut BytesMut,
        source: Address,
        destination: Address,
    ) -> Result<Vec<IncomingFragment>, GateError>;

    /// 探测 `buffer` 的开头是否匹配本编解码器的帧格式；供网关工厂挑选编解码器
    /// 绑定到一个新连接。不消费缓冲区。
    fn check(&self, buffer: &[u8]) -> bool;

    /// 为一枚刚到站的分片构造对应的 ACK 回执，若本协议不需要确认（例如流式编解码器）
    /// 则返回 `None`（默认行为）。包编解码器（`gate-codec-mtp`）覆盖这个方法，让
    /// `Porter` 在处理完一枚非 ACK 分片后自动把回执投进离站厅。
    fn ack_for(&self, fragment: &IncomingFragment) -> Option<OutgoingFragment> {
        let _ = fragment;
        None
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::ship::FragmentKind;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// 测试专用编解码器：长度前缀帧，`total` 永远是 1，不携带 ACK 语义。
    /// 用于练习 `Porter::process` 而无需牵扯真实传输层。
    pub struct LengthPrefixedTestCodec {
        next_sn: AtomicU32,
    }

    impl LengthPrefixedTestCodec {
        pub fn new() -> Self {
            Self {
                next_sn: AtomicU32::new(1),
            }
        }
    }

    impl Codec for LengthPrefixedTestCodec {
        fn pack(&self, fragment: &OutgoingFragment) -> Result<Bytes, GateError> {
            let mut out = BytesMut::with_capacity(4 + fragment.body.len());
            out.extend_from_slice(&(fragment.body.len() as u32).to_be_bytes());
            out.extend_from_slice(&fragment.body);
            Ok(out.freeze())
        }

        fn unpack(
            &self,
            buffer: &mut BytesMut,
            source: Address,
            destination: Address,
        ) -> Result<Vec<IncomingFragment>, GateError> {
            let mut fragments = Vec::new();
            loop {
                if buffer.len() < 4 {
                    break;
                }
                let len = u32::from_be_bytes(buffer[..4].try_into().unwrap()) as usize;
                if buffer.len() < 4 + len {
                    break;
                }
                let _ = buffer.split_to(4);
                let body = buffer.split_to(len).freeze();
                fragments.push(IncomingFragment {
                    sn: self.next_sn.fetch_add(1, Ordering::SeqCst).into(),
                    index: 0,
                    total: 1,
                    body,
                    kind: FragmentKind::Message,
                    source,
                    destination,
                });
            }
            Ok(fragments)
        }

        fn check(&self, buffer: &[u8]) -> bool {
            buffer.len() >= 4
        }
    }
}
