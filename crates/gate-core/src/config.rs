//! 引擎范围内的可调参数，集中成一个配置结构体，取代散落各处的魔法数字。

use std::time::Duration;

/// 网关核心的可调参数，集中到一处，方便部署时整体覆盖。
#[derive(Clone, Copy, Debug)]
pub struct GateConfig {
    /// 节拍器节奏，默认 0.1s。
    pub metronome_interval: Duration,
    /// 两次节拍之间允许的最小间隔。
    pub min_metronome_interval: Duration,
    /// `READY -> EXPIRED` 的静默阈值，默认 28s。
    pub expired_after: Duration,
    /// `MAINTAINING -> ERROR` 的静默阈值，默认 32s。
    pub maintaining_after: Duration,
    /// 到站重组槽位的过期时间，默认 300s。
    pub arrival_expires: Duration,
    /// 离站分片一次在途等待 ACK 的超时时间，默认 120s。
    pub departure_expires: Duration,
    /// 首次发送之后允许的重传次数，默认 2。
    pub departure_retries: u8,
    /// 主动连接失败后重试前的固定退避，默认 8s。
    pub reconnect_backoff: Duration,
    /// 出站消息体按多大切片拆成多个分片。`None`（默认）表示不切片，
    /// 适用于流式编解码器；包式编解码器（`gate-codec-mtp`）绑定的 Gate 应该设一个
    /// 与线上分片头部开销匹配的上限,例如 1200 字节。
    pub max_fragment_len: Option<usize>,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            metronome_interval: crate::ticker::DEFAULT_INTERVAL,
            min_metronome_interval: crate::ticker::MIN_INTERVAL,
            expired_after: Duration::from_secs(28),
            maintaining_after: Duration::from_secs(32),
            arrival_expires: Duration::from_secs(300),
            departure_expires: Duration::from_secs(120),
            departure_retries: 2,
            reconnect_backoff: Duration::from_secs(8),
            max_fragment_len: None,
        }
    }
}
