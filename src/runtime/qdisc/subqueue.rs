use std::collections::VecDeque;

use crate::model::packet::Packet;
use crate::runtime::qdisc::core::QueueStats;

pub const DEFAULT_WEIGHT: i32 = 100;
/// Bytes of quota granted per unit of weight each round.
pub const SERVICE_UNIT: i64 = 15;

#[derive(Debug)]
pub struct SubQueue<P> {
    packets: VecDeque<P>,
    bytes: u64,
    weight: i32,
    quota: i64,
    xmit_packets: u64,
    xmit_bytes: u64,
    drop_packets: u64,
    drop_bytes: u64,
}

impl<P> Default for SubQueue<P> {
    fn default() -> Self {
        Self {
            packets: VecDeque::new(),
            bytes: 0,
            weight: DEFAULT_WEIGHT,
            quota: 0,
            xmit_packets: 0,
            xmit_bytes: 0,
            drop_packets: 0,
            drop_bytes: 0,
        }
    }
}

impl<P: Packet> SubQueue<P> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_tail(&mut self, packet: P) {
        self.bytes += packet.len_bytes();
        self.packets.push_back(packet);
    }

    pub fn pop_head(&mut self) -> Option<P> {
        let packet = self.packets.pop_front()?;
        self.bytes -= packet.len_bytes();
        Some(packet)
    }

    pub fn peek_head(&self) -> Option<&P> {
        self.packets.front()
    }

    pub fn is_empty(&self) -> bool {
        self.packets.is_empty()
    }

    pub fn len(&self) -> usize {
        self.packets.len()
    }

    pub fn bytes(&self) -> u64 {
        self.bytes
    }

    pub fn weight(&self) -> i32 {
        self.weight
    }

    pub fn set_weight(&mut self, weight: i32) -> i32 {
        std::mem::replace(&mut self.weight, weight)
    }

    pub fn quota(&self) -> i64 {
        self.quota
    }

    pub fn grant_quota(&mut self) {
        self.quota += self.round_grant();
    }

    pub fn reset_quota(&mut self) {
        self.quota = 0;
    }

    pub fn round_grant(&self) -> i64 {
        i64::from(self.weight) * SERVICE_UNIT
    }

    /// Pops the head for transmission, charging it to this round's quota.
    pub fn transmit_head(&mut self) -> Option<P> {
        let packet = self.pop_head()?;
        let len = packet.len_bytes();
        self.quota -= len as i64;
        self.xmit_packets += 1;
        self.xmit_bytes += len;
        Some(packet)
    }

    /// Pops the head and counts it as dropped. Returns the dropped length.
    pub fn drop_head(&mut self) -> Option<u64> {
        let packet = self.pop_head()?;
        let len = packet.len_bytes();
        self.drop_packets += 1;
        self.drop_bytes += len;
        Some(len)
    }

    /// Drops every queued packet. Returns `(packets, bytes)` dropped.
    pub fn flush(&mut self) -> (u64, u64) {
        let mut packets = 0;
        let mut bytes = 0;
        while let Some(len) = self.drop_head() {
            packets += 1;
            bytes += len;
        }
        self.quota = 0;
        (packets, bytes)
    }

    pub fn stats(&self) -> QueueStats {
        QueueStats {
            bytes: self.bytes,
            weight: self.weight,
            xmit_packets: self.xmit_packets,
            xmit_bytes: self.xmit_bytes,
            drop_packets: self.drop_packets,
            drop_bytes: self.drop_bytes,
        }
    }
}
