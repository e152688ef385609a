//! 离站厅：出站分片的优先级调度与重传。
//!
//! 三条 FIFO 队列（`URGENT`/`NORMAL`/`SLOWER`）加一张在途分片表。`next_departure`
//! 先给到期待重传的在途分片，再按严格优先级从队列头部取新分片；同一优先级内部保持
//! 入队顺序。

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use bytes::Bytes;
use parking_lot::Mutex;

use crate::address::Address;
use crate::ship::{DeparturePriority, DepartureSummary, FragmentKind, SerialNumber};

/// 一枚尚未发送或正在队列中等待的离站消息：一个或多个待打包的分片体。
#[derive(Clone, Debug)]
pub struct Departure {
    pub sn: SerialNumber,
    pub destination: Address,
    pub priority: DeparturePriority,
    pub pages: Vec<Bytes>,
    pub requires_ack: bool,
    pub touch_time: Instant,
    /// The fragment kind handed to the codec on `pack` . Ordinary outbound
    /// messages use `Message`; auto-generated ack replies use `MessageAck`/
    /// `CommandAck` so the codec can tell them apart on the wire.
    pub kind: FragmentKind,
}

impl Departure {
    pub fn total_fragments(&self) -> u16 {
        self.pages.len() as u16
    }

    pub fn summary(&self) -> DepartureSummary {
        DepartureSummary {
            sn: self.sn,
            priority: self.priority,
            total_fragments: self.total_fragments(),
            touch_time: self.touch_time,
        }
    }
}

/// `next_departure` 向 `Porter` 交付的一次待发送/待重发指令。
#[derive(Clone, Debug)]
pub struct DepartureTask {
    pub sn: SerialNumber,
    pub index: u16,
    pub total: u16,
    pub body: Bytes,
    pub destination: Address,
    pub priority: DeparturePriority,
    pub is_resend: bool,
    pub requires_ack: bool,
    pub kind: FragmentKind,
}

struct InFlight {
    destination: Address,
    priority: DeparturePriority,
    total: u16,
    body: Bytes,
    kind: FragmentKind,
    retries_left: u8,
    expired_time: Instant,
}

/// 离站厅本体：不持有任何锁，由其所有者（一个 `Porter`，在单节拍器配置下）独占访问。
pub struct DepartureHall {
    queues: [VecDeque<Departure>; 3],
    pending_fragments: HashMap<(SerialNumber, u16), ()>,
    in_flight: HashMap<(SerialNumber, u16), InFlight>,
    sn_meta: HashMap<SerialNumber, DepartureSummary>,
    timeout: Duration,
    max_retries: u8,
}

impl DepartureHall {
    pub fn new(timeout: Duration, max_retries: u8) -> Self {
        Self {
            queues: [VecDeque::new(), VecDeque::new(), VecDeque::new()],
            pending_fragments: HashMap::new(),
            in_flight: HashMap::new(),
            sn_meta: HashMap::new(),
            timeout,
            max_retries,
        }
    }

    /// 入队一枚新的离站消息。
    pub fn append(&mut self, departure: Departure) {
        let total = departure.total_fragments();
        if departure.requires_ack {
            self.sn_meta.insert(departure.sn, departure.summary());
        }
        for index in 0..total {
            self.pending_fragments.insert((departure.sn, index), ());
        }
        self.queues[departure.priority.index()].push_back(departure);
    }

    /// 取出下一个该发送的分片：优先处理到期的在途重传，否则取最高优先级队列头部的
    /// 下一枚未发分片。
    pub fn next_departure(&mut self, now: Instant) -> Option<DepartureTask> {
        if let Some(task) = self.next_retry(now) {
            return Some(task);
        }
        self.next_fresh_fragment()
    }

    fn next_retry(&mut self, now: Instant) -> Option<DepartureTask> {
        let due_key = self
            .in_flight
            .iter()
            .find(|(_, record)| record.expired_time <= now && record.retries_left > 0)
            .map(|(key, _)| *key);

        let (sn, index) = due_key?;
        let record = self.in_flight.get_mut(&(sn, index))?;
        record.retries_left -= 1;
        record.expired_time = now + self.timeout;
        Some(DepartureTask {
            sn,
            index,
            total: record.total,
            body: record.body.clone(),
            destination: record.destination,
            priority: record.priority,
            is_resend: true,
            requires_ack: true,
            kind: record.kind,
        })
    }

    fn next_fresh_fragment(&mut self) -> Option<DepartureTask> {
        for bucket in self.queues.iter_mut() {
            let Some(departure) = bucket.front_mut() else {
                continue;
            };
            let total = departure.total_fragments();
            let Some(index) = (0..total).find(|i| {
                self.pending_fragments
                    .contains_key(&(departure.sn, *i))
            }) else {
                bucket.pop_front();
                continue;
            };

            let sn = departure.sn;
            let destination = departure.destination;
            let priority = departure.priority;
            let requires_ack = departure.requires_ack;
            let kind = departure.kind;
            let body = departure.pages[index as usize].clone();
            self.pending_fragments.remove(&(sn, index));

            if requires_ack {
                let now = departure.touch_time;
                self.in_flight.insert(
                    (sn, index),
                    InFlight {
                        destination,
                        priority,
                        total,
                        body: body.clone(),
                        kind,
                        retries_left: self.max_retries,
                        expired_time: now + self.timeout,
                    },
                );
            }

            let all_dispatched = (0..total).all(|i| !self.pending_fragments.contains_key(&(sn, i)));
            if all_dispatched {
                bucket.pop_front();
            }

            return Some(DepartureTask {
                sn,
                index,
                total,
                body,
                destination,
                priority,
                is_resend: false,
                requires_ack,
                kind,
            });
        }
        None
    }

    /// 刷新一个即将发出的分片的在途超时基准（每次实际写入底层通道后调用，确保
    /// `expired_time` 以真实发送时刻为准，而不是入队时刻）。
    pub fn mark_sent(&mut self, sn: SerialNumber, index: u16, now: Instant) {
        if let Some(record) = self.in_flight.get_mut(&(sn, index)) {
            record.expired_time = now + self.timeout;
        }
    }

    /// 当编解码器判定某个入站分片是针对 `(sn, fragment)` 的 ACK 时调用。
    /// 多次投递同一个 ACK 是幂等的：只有第一次会真正移除在途记录。
    /// 只有当一个 sn 的所有分片都确认完毕时才返回该离站消息的摘要，交付
    /// `gate_sent`——这正是需要 ACK 的离站消息只在最后一次确认到达后才触发
    /// `Sent` 事件，而不是在第一次写入时就触发的地方。
    pub fn check_response(&mut self, sn: SerialNumber, fragment_index: u16) -> Option<DepartureSummary> {
        let key = (sn, fragment_index);
        if self.in_flight.remove(&key).is_none() {
            return None; // already acked or never in flight: no-op
        }

        let summary = self.sn_meta.get(&sn)?;
        let total = summary.total_fragments;
        let all_acked = (0..total).all(|i| !self.in_flight.contains_key(&(sn, i)))
            && (0..total).all(|i| !self.pending_fragments.contains_key(&(sn, i)));
        if all_acked {
            self.sn_meta.remove(&sn)
        } else {
            None
        }
    }

    /// 清理重试耗尽且已过期的在途记录，返回其 `(sn, destination)` 供调用方触发
    /// `gate_error(DepartureTimeout)`。
    pub fn purge(&mut self, now: Instant) -> Vec<(SerialNumber, Address)> {
        let expired: Vec<(SerialNumber, u16)> = self
            .in_flight
            .iter()
            .filter(|(_, record)| record.retries_left == 0 && record.expired_time <= now)
            .map(|(key, _)| *key)
            .collect();

        let mut failures = Vec::new();
        for key in expired {
            if let Some(record) = self.in_flight.remove(&key) {
                failures.push((key.0, record.destination));
            }
        }
        failures
    }

    pub fn is_empty(&self) -> bool {
        self.queues.iter().all(VecDeque::is_empty) && self.in_flight.is_empty()
    }
}

/// 多节拍器部署下的 [`DepartureHall`]：同一组操作，外加一把 `parking_lot::Mutex`。
pub struct LockedDock {
    inner: Mutex<DepartureHall>,
}

impl LockedDock {
    pub fn new(timeout: Duration, max_retries: u8) -> Self {
        Self {
            inner: Mutex::new(DepartureHall::new(timeout, max_retries)),
        }
    }

    pub fn append(&self, departure: Departure) {
        self.inner.lock().append(departure);
    }

    pub fn next_departure(&self, now: Instant) -> Option<DepartureTask> {
        self.inner.lock().next_departure(now)
    }

    pub fn mark_sent(&self, sn: SerialNumber, index: u16, now: Instant) {
        self.inner.lock().mark_sent(sn, index, now);
    }

    pub fn check_response(&self, sn: SerialNumber, fragment_index: u16) -> Option<DepartureSummary> {
        self.inner.lock().check_response(sn, fragment_index)
    }

    pub fn purge(&self, now: Instant) -> Vec<(SerialNumber, Address)> {
        self.inner.lock().purge(now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(port: u16) -> Address {
        Address::new("127.0.0.1".parse().unwrap(), port)
    }

    fn departure(sn: u32, priority: DeparturePriority, requires_ack: bool) -> Departure {
        Departure {
            sn: SerialNumber(sn),
            destination: addr(9000),
            priority,
            pages: vec![Bytes::from_static(b"payload")],
            requires_ack,
            touch_time: Instant::now(),
            kind: FragmentKind::Message,
        }
    }

    #[test]
    fn urgent_then_normal_then_slower_priority_order() {
        let mut hall = DepartureHall::new(Duration::from_secs(120), 2);
        hall.append(departure(1, DeparturePriority::Slower, false));
        hall.append(departure(2, DeparturePriority::Normal, false));
        hall.append(departure(3, DeparturePriority::Urgent, false));

        let now = Instant::now();
        let first = hall.next_departure(now).unwrap();
        let second = hall.next_departure(now).unwrap();
        let third = hall.next_departure(now).unwrap();
        assert_eq!(first.sn, SerialNumber(3));
        assert_eq!(second.sn, SerialNumber(2));
        assert_eq!(third.sn, SerialNumber(1));
    }

    #[test]
    fn priority_under_load() {
        let mut hall = DepartureHall::new(Duration::from_secs(120), 2);
        for i in 0..100 {
            hall.append(departure(i, DeparturePriority::Slower, false));
        }
        hall.append(departure(999, DeparturePriority::Urgent, false));

        let next = hall.next_departure(Instant::now()).unwrap();
        assert_eq!(next.sn, SerialNumber(999));
    }

    #[test]
    fn retry_budget_exhausts_then_times_out() {
        let mut hall = DepartureHall::new(Duration::from_secs(10), 2);
        hall.append(departure(1, DeparturePriority::Normal, true));

        let t0 = Instant::now();
        let first = hall.next_departure(t0).unwrap();
        assert!(!first.is_resend);

        // before timeout: nothing due
        assert!(hall.next_departure(t0 + Duration::from_secs(1)).is_none());

        let t1 = t0 + Duration::from_secs(11);
        let retry1 = hall.next_departure(t1).unwrap();
        assert!(retry1.is_resend);

        let t2 = t1 + Duration::from_secs(11);
        let retry2 = hall.next_departure(t2).unwrap();
        assert!(retry2.is_resend);

        // retries exhausted: no further attempts
        let t3 = t2 + Duration::from_secs(11);
        assert!(hall.next_departure(t3).is_none());

        let failures = hall.purge(t3);
        assert_eq!(failures, vec![(SerialNumber(1), addr(9000))]);
    }

    #[test]
    fn repeated_ack_delivery_is_idempotent() {
        let mut hall = DepartureHall::new(Duration::from_secs(120), 2);
        hall.append(departure(1, DeparturePriority::Normal, true));
        hall.next_departure(Instant::now()).unwrap();

        let summary = hall.check_response(SerialNumber(1), 0).unwrap();
        assert_eq!(summary.sn, SerialNumber(1));
        assert_eq!(summary.total_fragments, 1);
        assert!(hall.check_response(SerialNumber(1), 0).is_none());
    }

    #[test]
    fn sent_event_withheld_until_every_fragment_of_a_multi_fragment_ack_departure_is_acked() {
        let mut hall = DepartureHall::new(Duration::from_secs(120), 2);
        hall.append(Departure {
            sn: SerialNumber(7),
            destination: addr(9000),
            priority: DeparturePriority::Normal,
            pages: vec![Bytes::from_static(b"a"), Bytes::from_static(b"b")],
            requires_ack: true,
            touch_time: Instant::now(),
            kind: FragmentKind::Message,
        });

        let now = Instant::now();
        let first = hall.next_departure(now).unwrap();
        let second = hall.next_departure(now).unwrap();
        assert_eq!((first.index, second.index), (0, 1));

        // acking only the first fragment must not yet surface a summary.
        assert!(hall.check_response(SerialNumber(7), 0).is_none());
        let summary = hall.check_response(SerialNumber(7), 1).unwrap();
        assert_eq!(summary.total_fragments, 2);
    }
}
