use bytes::{Buf, BufMut, Bytes, BytesMut};

use gate_core::ship::FragmentKind;

pub const MAGIC: u8 = 0xE5;
pub const HEADER_LEN: usize = 1 + 1 + 4 + 2 + 2 + 4;

#[derive(Debug)]
pub struct Header {
    pub kind: FragmentKind,
    pub sn: u32,
    pub index: u16,
    pub total: u16,
    pub body_len: u32,
}

pub fn kind_to_byte(kind: FragmentKind) -> u8 {
    match kind {
        FragmentKind::Message => 0,
        FragmentKind::Command => 1,
        FragmentKind::MessageAck => 2,
        FragmentKind::CommandAck => 3,
    }
}

pub fn byte_to_kind(byte: u8) -> Option<FragmentKind> {
    match byte {
        0 => Some(FragmentKind::Message),
        1 => Some(FragmentKind::Command),
        2 => Some(FragmentKind::MessageAck),
        3 => Some(FragmentKind::CommandAck),
        _ => None,
    }
}

pub fn encode(header: &Header, body: &[u8]) -> Bytes {
    let mut out = BytesMut::with_capacity(HEADER_LEN + body.len());
    out.put_u8(MAGIC);
    out.put_u8(kind_to_byte(header.kind));
    out.put_u32(header.sn);
    out.put_u16(header.index);
    out.put_u16(header.total);
    out.put_u32(header.body_len);
    out.put_slice(body);
    out.freeze()
}

/// 尝试从 `buffer` 头部解出一个完整帧头 + 对应长度的消息体，成功时把消费掉的字节
/// 从 `buffer` 中移除。返回 `Err(reason)` 表示帧头本身是畸形的（magic 不对，或
/// `kind` 字节不是已知分类）；返回 `Ok(None)` 表示数据还不够，调用方应该停止
/// 这一轮 `unpack` 并把剩余字节留给下一次调用。
pub fn try_decode(buffer: &mut BytesMut) -> Result<Option<(Header, Bytes)>, &'static str> {
    if buffer.len() < HEADER_LEN {
        return Ok(None);
    }

    if buffer[0] != MAGIC {
        return Err("bad magic byte");
    }
    let kind = byte_to_kind(buffer[1]).ok_or("unknown fragment kind")?;

    let mut header_view = &buffer[2..HEADER_LEN];
    let sn = header_view.get_u32();
    let index = header_view.get_u16();
    let total = header_view.get_u16();
    let body_len = header_view.get_u32();

    let frame_len = HEADER_LEN + body_len as usize;
    if buffer.len() < frame_len {
        return Ok(None);
    }

    let _ = buffer.split_to(HEADER_LEN);
    let body = buffer.split_to(body_len as usize).freeze();
    Ok(Some((
        Header {
            kind,
            sn,
            index,
            total,
            body_len,
        },
        body,
    )))
}
