//! Porter：绑定一条连接、一个编解码器与一对到站/离站厅。
//!
//! `Porter` 本身不知道 `Gate`/`delegate` 的存在：`process()` 把一次轮询中发生的事情
//! 收集成 [`PorterEvent`] 列表返回，由上层（`Gate::tick`）负责翻译成 delegate 回调。
//! 这样 porter 可以独立单元测试，不需要搭一个假的 delegate。

use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::BytesMut;
use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use crate::address::Address;
use crate::arrival::ArrivalHall;
use crate::channel::{ReadOutcome, WriteOutcome};
use crate::codec::Codec;
use crate::connection::{Connection, ConnectionState};
use crate::departure::{Departure, DepartureHall};
use crate::error::GateError;
use crate::ship::DepartureSummary;

/// 对外暴露的 porter 状态，从连接状态折叠而来。
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PorterStatus {
    Preparing,
    Ready,
    Error,
}

impl From<ConnectionState> for PorterStatus {
    fn from(state: ConnectionState) -> Self {
        match state {
            ConnectionState::Default | ConnectionState::Preparing => PorterStatus::Preparing,
            ConnectionState::Ready | ConnectionState::Maintaining | ConnectionState::Expired => {
                PorterStatus::Ready
            }
            ConnectionState::Error => PorterStatus::Error,
        }
    }
}

/// `process()` 一次轮询期间发生的、需要转交给 delegate 的事件。
#[derive(Debug)]
pub enum PorterEvent {
    Received {
        body: bytes::Bytes,
        source: Address,
        destination: Address,
    },
    Sent {
        summary: DepartureSummary,
    },
    Error(GateError),
}

const READ_CHUNK: usize = 64 * 1024;

pub struct Porter {
    connection: Arc<Connection>,
    codec: Arc<dyn Codec>,
    arrival_hall: Mutex<ArrivalHall>,
    departure_hall: Mutex<DepartureHall>,
    inbound: Mutex<BytesMut>,
    last_arrival_purge: Mutex<Instant>,
    last_departure_purge: Mutex<Instant>,
    purge_interval: Duration,
}

impl Porter {
    pub fn new(
        connection: Arc<Connection>,
        codec: Arc<dyn Codec>,
        arrival_expires: Duration,
        departure_timeout: Duration,
        departure_retries: u8,
        now: Instant,
    ) -> Self {
        Self {
            connection,
            codec,
            arrival_hall: Mutex::new(ArrivalHall::new(arrival_expires)),
            departure_hall: Mutex::new(DepartureHall::new(departure_timeout, departure_retries)),
            inbound: Mutex::new(BytesMut::new()),
            last_arrival_purge: Mutex::new(now),
            last_departure_purge: Mutex::new(now),
            purge_interval: Duration::from_secs(1),
        }
    }

    pub fn connection(&self) -> &Arc<Connection> {
        &self.connection
    }

    pub fn status(&self) -> PorterStatus {
        self.connection.state().into()
    }

    pub fn append_departure(&self, departure: Departure) {
        self.departure_hall.lock().append(departure);
    }

    /// 一次完整的轮询周期：先读后写，再按需清理；返回是否发生了任何实际 I/O，
    /// 以及本周期内累积的事件。
    pub fn process(&self, now: Instant) -> (bool, Vec<PorterEvent>) {
        let mut events = Vec::new();
        let mut did_work = false;

        did_work |= self.poll_inbound(now, &mut events);
        did_work |= self.poll_outbound(now, &mut events);
        self.maybe_purge(now, &mut events);

        (did_work, events)
    }

    fn poll_inbound(&self, now: Instant, events: &mut Vec<PorterEvent>) -> bool {
        let channel = self.connection.channel();
        let remote = self.connection.remote();
        let mut any = false;

        loop {
            match channel.read(READ_CHUNK) {
                Ok(ReadOutcome::WouldBlock) => break,
                Ok(ReadOutcome::Eof) => {
                    self.connection.on_io_error();
                    events.push(PorterEvent::Error(GateError::ChannelClosed {
                        remote,
                        detail: "peer closed (EOF)".to_string(),
                    }));
                    break;
                }
                Ok(ReadOutcome::Data(bytes, source_override)) => {
                    any = true;
                    self.connection.on_received(now);
                    let source = source_override.unwrap_or(remote);
                    let destination = self.connection.local().unwrap_or(remote);

                    let mut buffer = self.inbound.lock();
                    buffer.extend_from_slice(&bytes);
                    match self.codec.unpack(&mut buffer, source, destination) {
                        Ok(fragments) => {
                            drop(buffer);
                            for fragment in fragments {
                                self.handle_fragment(fragment, now, events);
                            }
                        }
                        Err(err) => {
                            drop(buffer);
                            warn!(remote = %remote, error = %err, "decode failed");
                            events.push(PorterEvent::Error(err));
                        }
                    }
                }
                Err(io_err) => {
                    self.connection.on_io_error();
                    events.push(PorterEvent::Error(GateError::io("porter_read", io_err)));
                    break;
                }
            }
        }
        any
    }

    fn handle_fragment(
        &self,
        fragment: crate::ship::IncomingFragment,
        now: Instant,
        events: &mut Vec<PorterEvent>,
    ) {
        if fragment.kind.is_ack() {
            if let Some(summary) = self
                .departure_hall
                .lock()
                .check_response(fragment.sn, fragment.index)
            {
                trace!(sn = %fragment.sn, "departure fully acknowledged");
                events.push(PorterEvent::Sent { summary });
            }
            return;
        }

        if let Some(ack) = self.codec.ack_for(&fragment) {
            self.departure_hall.lock().append(Departure {
                sn: ack.sn,
                destination: ack.destination,
                priority: crate::ship::DeparturePriority::Urgent,
                pages: vec![ack.body],
                requires_ack: false,
                touch_time: now,
                kind: ack.kind,
            });
        }

        let source = fragment.source;
        let destination = fragment.destination;
        if let Some(arrival) = self.arrival_hall.lock().assemble(fragment, now) {
            debug!(sn = %arrival.sn, %source, "arrival complete");
            events.push(PorterEvent::Received {
                body: arrival.body,
                source,
                destination,
            });
        }
    }

    fn poll_outbound(&self, now: Instant, events: &mut Vec<PorterEvent>) -> bool {
        let Some(task) = self.departure_hall.lock().next_departure(now) else {
            return false;
        };

        let outgoing = crate::ship::OutgoingFragment {
            sn: task.sn,
            index: task.index,
            total: task.total,
            body: task.body,
            kind: task.kind,
            destination: task.destination,
        };

        let bytes = match self.codec.pack(&outgoing) {
            Ok(bytes) => bytes,
            Err(err) => {
                events.push(PorterEvent::Error(err));
                return true;
            }
        };

        let channel = self.connection.channel();
        match channel.write(&bytes, Some(task.destination)) {
            Ok(WriteOutcome::Written(_)) => {
                self.connection.on_sent(now);
                self.departure_hall.lock().mark_sent(task.sn, task.index, now);
                // Ack-requiring departures only surface `Sent` once `check_response`
                // confirms the final fragment's ack arrived ; a bare
                // write is not proof of delivery for those. Engine-generated ack
                // departures (from `handle_fragment`'s `ack_for` call) never surface
                // `Sent` at all -- `gate_sent` is for the delegate's own departures,
                // not for the engine auto-acking an inbound fragment.
                if !task.kind.is_ack()
                    && !task.requires_ack
                    && (task.total == 1 || task.index + 1 == task.total)
                {
                    events.push(PorterEvent::Sent {
                        summary: DepartureSummary {
                            sn: task.sn,
                            priority: task.priority,
                            total_fragments: task.total,
                            touch_time: now,
                        },
                    });
                }
            }
            Ok(WriteOutcome::WouldBlock) => {
                debug!(sn = %task.sn, "write would block, retry next tick");
            }
            Err(io_err) => {
                self.connection.on_io_error();
                events.push(PorterEvent::Error(GateError::io("porter_write", io_err)));
            }
        }
        true
    }

    fn maybe_purge(&self, now: Instant, events: &mut Vec<PorterEvent>) {
        let mut last_arrival = self.last_arrival_purge.lock();
        if now.saturating_duration_since(*last_arrival) >= self.purge_interval {
            let purged = self.arrival_hall.lock().purge(now);
            if purged > 0 {
                debug!(count = purged, "arrival hall purged stale partials");
            }
            *last_arrival = now;
        }
        drop(last_arrival);

        let mut last_departure = self.last_departure_purge.lock();
        if now.saturating_duration_since(*last_departure) >= self.purge_interval {
            for (sn, destination) in self.departure_hall.lock().purge(now) {
                events.push(PorterEvent::Error(GateError::DepartureTimeout { sn, destination }));
            }
            *last_departure = now;
        }
    }
}
