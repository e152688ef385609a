use std::sync::atomic::{AtomicU32, Ordering};

use bytes::{Bytes, BytesMut};

use gate_core::address::Address;
use gate_core::codec::Codec;
use gate_core::error::GateError;
use gate_core::ship::{FragmentKind, IncomingFragment, OutgoingFragment};

const LENGTH_PREFIX_LEN: usize = 4;

/// 默认的最大单帧长度：16 MiB。超过这个长度的长度前缀被当作畸形帧拒绝，
/// 避免一个错误（或恶意）的前缀让 `unpack` 无限制地等待字节填满缓冲。
const DEFAULT_MAX_FRAME_LEN: u32 = 16 * 1024 * 1024;

/// 长度前缀流式编解码器：每帧 = 4 字节大端长度 + 等长载荷,恰好对应一枚
/// `total == 1` 的逻辑消息。
///
/// 流协议本身不携带序列号,因此每解出一帧就本地分配一个单调递增的 `SerialNumber`——
/// 这个序号只在本地进程内有意义,不会出现在线上字节里,也不需要和对端协商。
pub struct PlainCodec {
    max_frame_len: u32,
    next_sn: AtomicU32,
}

impl PlainCodec {
    pub fn new() -> Self {
        Self::with_max_frame_len(DEFAULT_MAX_FRAME_LEN)
    }

    pub fn with_max_frame_len(max_frame_len: u32) -> Self {
        Self {
            max_frame_len,
            next_sn: AtomicU32::new(1),
        }
    }
}

impl Default for PlainCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Codec for PlainCodec {
    fn pack(&self, fragment: &OutgoingFragment) -> Result<Bytes, GateError> {
        let len = fragment.body.len();
        if len as u64 > self.max_frame_len as u64 {
            return Err(GateError::EncodeFailed {
                sn: fragment.sn,
                destination: fragment.destination,
                detail: format!(
                    "body of {len} bytes exceeds max_frame_len={}",
                    self.max_frame_len
                ),
            });
        }

        let mut out = BytesMut::with_capacity(LENGTH_PREFIX_LEN + len);
        out.extend_from_slice(&(len as u32).to_be_bytes());
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
            if buffer.len() < LENGTH_PREFIX_LEN {
                break;
            }

            let len = u32::from_be_bytes(buffer[..LENGTH_PREFIX_LEN].try_into().unwrap());
            if len > self.max_frame_len {
                return Err(GateError::DecodeFailed {
                    source,
                    detail: format!("frame length {len} exceeds max_frame_len={}", self.max_frame_len),
                });
            }

            let frame_len = LENGTH_PREFIX_LEN + len as usize;
            if buffer.len() < frame_len {
                break;
            }

            let _ = buffer.split_to(LENGTH_PREFIX_LEN);
            let body = buffer.split_to(len as usize).freeze();
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
        buffer.len() >= LENGTH_PREFIX_LEN
    }
}
