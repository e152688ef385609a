//! 到站厅：入站分片重组。
//!
//! 契约：在同一个 `sn` 内部，分片可以按任意顺序到达；到站厅永远不会交付一个不完整的
//! 消息体。单分片消息（`total == 1`）立即完成，不经过任何中间态。

use std::collections::VecDeque;
use std::time::Instant;

use bytes::{Bytes, BytesMut};

use crate::address::Address;
use crate::ship::{IncomingFragment, SerialNumber};

/// 一枚完整到站消息。
#[derive(Clone, Debug)]
pub struct Arrival {
    pub sn: SerialNumber,
    pub source: Address,
    pub destination: Address,
    pub total: u16,
    pub body: Bytes,
    pub touch_time: Instant,
}

struct Slot {
    total: u16,
    pages: Vec<Option<Bytes>>,
    received_count: u16,
    source: Address,
    destination: Address,
    touch_time: Instant,
}

impl Slot {
    fn new(total: u16, source: Address, destination: Address, now: Instant) -> Self {
        Self {
            total,
            pages: vec![None; total as usize],
            received_count: 0,
            source,
            destination,
            touch_time: now,
        }
    }

    fn is_complete(&self) -> bool {
        self.received_count == self.total
    }

    fn assemble(&self) -> Bytes {
        let mut out = BytesMut::new();
        for page in &self.pages {
            if let Some(bytes) = page {
                out.extend_from_slice(bytes);
            }
        }
        out.freeze()
    }
}

/// 按 `(sender, sn)` 键入的重组缓冲区，外加一个插入顺序列表——仅用于记账
/// （例如未来按年龄排序枚举槽位），`purge` 的过期判定本身是对 `slots` 的全量
/// 扫描，不依赖这份顺序。
pub struct ArrivalHall {
    slots: std::collections::HashMap<(Address, SerialNumber), Slot>,
    insertion_order: VecDeque<(Address, SerialNumber)>,
    expires: std::time::Duration,
}

impl ArrivalHall {
    pub fn new(expires: std::time::Duration) -> Self {
        Self {
            slots: std::collections::HashMap::new(),
            insertion_order: VecDeque::new(),
            expires,
        }
    }

    /// 吸收一枚入站分片；若它补全了所在的消息，返回组装好的 [`Arrival`]
    /// 并移除内部状态；否则返回 `None`。
    pub fn assemble(&mut self, fragment: IncomingFragment, now: Instant) -> Option<Arrival> {
        let key = (fragment.source, fragment.sn);

        if fragment.total <= 1 {
            // 单分片消息：无需经过槽位，立即交付。
            self.slots.remove(&key);
            return Some(Arrival {
                sn: fragment.sn,
                source: fragment.source,
                destination: fragment.destination,
                total: 1,
                body: fragment.body,
                touch_time: now,
            });
        }

        let is_new = !self.slots.contains_key(&key);
        let slot = self.slots.entry(key).or_insert_with(|| {
            Slot::new(fragment.total, fragment.source, fragment.destination, now)
        });
        if is_new {
            self.insertion_order.push_back(key);
        }

        slot.touch_time = now;
        let index = fragment.index as usize;
        if index < slot.pages.len() && slot.pages[index].is_none() {
            slot.pages[index] = Some(fragment.body);
            slot.received_count += 1;
        }

        if slot.is_complete() {
            let Some(slot) = self.slots.remove(&key) else {
                return None;
            };
            Some(Arrival {
                sn: key.1,
                source: slot.source,
                destination: slot.destination,
                total: slot.total,
                body: slot.assemble(),
                touch_time: now,
            })
        } else {
            None
        }
    }

    /// 清理超过 `expires` 仍未完成的重组槽位；被清理的分片静默丢弃。
    /// 返回被清理的槽位数量，供调用方决定是否记录日志。
    ///
    /// 必须对全部槽位做一次完整扫描，不能只看 `insertion_order` 的队首：一个
    /// 更早插入、但仍在陆续收到分片的槽位会不断刷新自己的 `touch_time`
    /// （见 `assemble` 第 103 行），如果只在队首遇到未过期槽位就提前 `break`，
    /// 它会挡住排在它后面、已经真正过期的槽位，导致那些槽位永远不被清理。
    pub fn purge(&mut self, now: Instant) -> usize {
        let expires = self.expires;
        let before = self.slots.len();
        self.slots
            .retain(|_, slot| now.saturating_duration_since(slot.touch_time) <= expires);
        let purged = before - self.slots.len();
        if purged > 0 {
            let slots = &self.slots;
            self.insertion_order.retain(|key| slots.contains_key(key));
        }
        purged
    }

    /// 供测试检查槽位是否仍存在。
    #[cfg(test)]
    pub fn contains(&self, source: Address, sn: SerialNumber) -> bool {
        self.slots.contains_key(&(source, sn))
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ship::FragmentKind;

    fn addr(port: u16) -> Address {
        Address::new("127.0.0.1".parse().unwrap(), port)
    }

    fn fragment(sn: u32, index: u16, total: u16, body: &str) -> IncomingFragment {
        IncomingFragment {
            sn: SerialNumber(sn),
            index,
            total,
            body: Bytes::copy_from_slice(body.as_bytes()),
            kind: FragmentKind::Message,
            source: addr(9000),
            destination: addr(9394),
        }
    }

    #[test]
    fn reassembles_fragments_regardless_of_arrival_order() {
        let mut hall = ArrivalHall::new(std::time::Duration::from_secs(300));
        let now = Instant::now();
        // "hello" split into 3 fragments, delivered out of order: frag2, frag0, frag1.
        assert!(hall.assemble(fragment(42, 2, 3, "o"), now).is_none());
        assert!(hall.assemble(fragment(42, 0, 3, "he"), now).is_none());
        let arrival = hall
            .assemble(fragment(42, 1, 3, "ll"), now)
            .expect("completes on the last missing fragment");
        assert_eq!(arrival.body, Bytes::from_static(b"hello"));
    }

    #[test]
    fn single_fragment_message_completes_immediately() {
        let mut hall = ArrivalHall::new(std::time::Duration::from_secs(300));
        let arrival = hall
            .assemble(fragment(7, 0, 1, "hello"), Instant::now())
            .expect("single fragment ships complete immediately");
        assert_eq!(arrival.body, Bytes::from_static(b"hello"));
    }

    #[test]
    fn purge_drops_stale_partials_silently() {
        let mut hall = ArrivalHall::new(std::time::Duration::from_secs(300));
        let t0 = Instant::now();
        hall.assemble(fragment(99, 0, 4, "a"), t0);
        assert!(hall.contains(addr(9000), SerialNumber(99)));

        let later = t0 + std::time::Duration::from_secs(301);
        // an unrelated fragment triggers the purge scan
        hall.assemble(fragment(100, 0, 1, "unrelated"), later);
        hall.purge(later);
        assert!(!hall.contains(addr(9000), SerialNumber(99)));
    }

    #[test]
    fn purge_evicts_a_stale_slot_behind_an_older_but_still_active_one() {
        let mut hall = ArrivalHall::new(std::time::Duration::from_secs(300));
        let t0 = Instant::now();
        // sn=1 is inserted first but keeps getting fresh fragments, so its
        // touch_time is refreshed and it never becomes the stale one.
        hall.assemble(fragment(1, 0, 4, "a"), t0);

        // sn=2 is inserted second, right behind sn=1 in insertion order, and then
        // never touched again: it is the one that should actually expire.
        let t1 = t0 + std::time::Duration::from_secs(1);
        hall.assemble(fragment(2, 0, 4, "a"), t1);

        let t2 = t1 + std::time::Duration::from_secs(299);
        // sn=1 keeps receiving fragments, refreshing its touch_time past sn=2's
        // expiry, but sn=1 is still ahead of sn=2 in insertion_order.
        hall.assemble(fragment(1, 1, 4, "b"), t2);
        assert!(!hall.contains(addr(9000), SerialNumber(1)));
        assert!(hall.contains(addr(9000), SerialNumber(2)));

        let t3 = t2 + std::time::Duration::from_secs(2);
        hall.purge(t3);

        // sn=2 must be purged even though it sits behind the still-fresh sn=1 in
        // insertion order.
        assert!(hall.contains(addr(9000), SerialNumber(1)));
        assert!(!hall.contains(addr(9000), SerialNumber(2)));
    }
}
