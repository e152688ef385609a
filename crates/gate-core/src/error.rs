//! 错误分类。
//!
//! # 意图（Why）
//! - `TransientIo`（非阻塞读写的“暂无数据/暂不可写”）不是错误，因此这里不为它设置变体；
//! - 其余类别（通道关闭、编解码失败、离站重试耗尽、到站重组超时）都需要携带足够上下文，
//!   使 delegate 能据此决定重试、告警或放弃。
//!
//! 这里沿用统一用 `thiserror` 定义错误枚举的风格，但变体更贴近
//! 传输层（通道/连接/编解码），而不是上层业务会话。

use std::fmt;

use thiserror::Error;

use crate::address::Address;
use crate::ship::SerialNumber;

/// 网关核心在各组件间传播的统一错误类型。
#[derive(Debug, Error)]
pub enum GateError {
    /// 通道因 EOF 或致命 I/O 错误转入 `CLOSED`。
    #[error("channel to {remote} closed: {detail}")]
    ChannelClosed { remote: Address, detail: String },

    /// 编解码器无法序列化一枚离站分片。
    #[error("encode failed for sn={sn} destination={destination}: {detail}")]
    EncodeFailed {
        sn: SerialNumber,
        destination: Address,
        detail: String,
    },

    /// 编解码器无法解析入站字节流/数据报中的一帧。
    #[error("decode failed from {source}: {detail}")]
    DecodeFailed { source: Address, detail: String },

    /// 离站分片的重试次数耗尽。
    #[error("departure sn={sn} to {destination} timed out after exhausting retries")]
    DepartureTimeout {
        sn: SerialNumber,
        destination: Address,
    },

    /// 到站重组超时被清理（仅记录日志，不投递给 delegate；保留此变体供审计/调试使用）。
    #[error("arrival sn={sn} from {source} purged before completion")]
    ArrivalTimeout { sn: SerialNumber, source: Address },

    /// 底层套接字操作失败，来自传输层适配 crate。
    #[error("io error during {operation}: {source}")]
    Io {
        operation: &'static str,
        #[source]
        source: std::io::Error,
    },
}

impl GateError {
    pub fn io(operation: &'static str, source: std::io::Error) -> Self {
        GateError::Io { operation, source }
    }
}

/// 便于在 `Display` 实现之外仍能快速判断错误大类（供指标打点使用）。
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ErrorCategory {
    ChannelClosed,
    Codec,
    DepartureTimeout,
    ArrivalTimeout,
    Io,
}

impl GateError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            GateError::ChannelClosed { .. } => ErrorCategory::ChannelClosed,
            GateError::EncodeFailed { .. } | GateError::DecodeFailed { .. } => {
                ErrorCategory::Codec
            }
            GateError::DepartureTimeout { .. } => ErrorCategory::DepartureTimeout,
            GateError::ArrivalTimeout { .. } => ErrorCategory::ArrivalTimeout,
            GateError::Io { .. } => ErrorCategory::Io,
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ErrorCategory::ChannelClosed => "channel_closed",
            ErrorCategory::Codec => "codec",
            ErrorCategory::DepartureTimeout => "departure_timeout",
            ErrorCategory::ArrivalTimeout => "arrival_timeout",
            ErrorCategory::Io => "io",
        };
        f.write_str(label)
    }
}
