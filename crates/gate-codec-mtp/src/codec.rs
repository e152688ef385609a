use bytes::{Bytes, BytesMut};

use gate_core::address::Address;
use gate_core::codec::Codec;
use gate_core::error::GateError;
use gate_core::ship::{FragmentKind, IncomingFragment, OutgoingFragment};

use crate::frame::{self, Header};

/// 分片/确认包编解码器（模块级文档见 `lib.rs`）。无状态，可以在多条连接间共享。
pub struct MtpCodec;

impl MtpCodec {
    pub fn new() -> Self {
        Self
    }
}

impl Default for MtpCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Codec for MtpCodec {
    fn pack(&self, fragment: &OutgoingFragment) -> Result<Bytes, GateError> {
        let body_len: u32 = fragment.body.len().try_into().map_err(|_| GateError::EncodeFailed {
            sn: fragment.sn,
            destination: fragment.destination,
            detail: format!("body of {} bytes does not fit in a u32 length", fragment.body.len()),
        })?;

        let header = Header {
            kind: fragment.kind,
            sn: fragment.sn.0,
            index: fragment.index,
            total: fragment.total,
            body_len,
        };
        Ok(frame::encode(&header, &fragment.body))
    }

    fn unpack(
        &self,
        buffer: &mut BytesMut,
        source: Address,
        destination: Address,
    ) -> Result<Vec<IncomingFragment>, GateError> {
        let mut fragments = Vec::new();

        loop {
            match frame::try_decode(buffer) {
                Ok(Some((header, body))) => fragments.push(IncomingFragment {
                    sn: header.sn.into(),
                    index: header.index,
                    total: header.total,
                    body,
                    kind: header.kind,
                    source,
                    destination,
                }),
                Ok(None) => break,
                Err(reason) => {
                    return Err(GateError::DecodeFailed {
                        source,
                        detail: reason.to_string(),
                    });
                }
            }
        }

        Ok(fragments)
    }

    fn check(&self, buffer: &[u8]) -> bool {
        buffer.first() == Some(&frame::MAGIC)
    }

    fn ack_for(&self, fragment: &IncomingFragment) -> Option<OutgoingFragment> {
        let ack_kind = match fragment.kind {
            FragmentKind::Message => FragmentKind::MessageAck,
            FragmentKind::Command => FragmentKind::CommandAck,
            FragmentKind::MessageAck | FragmentKind::CommandAck => return None,
        };

        Some(OutgoingFragment {
            sn: fragment.sn,
            index: fragment.index,
            total: 1,
            body: Bytes::new(),
            kind: ack_kind,
            destination: fragment.source,
        })
    }
}
