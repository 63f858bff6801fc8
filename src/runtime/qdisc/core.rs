use std::collections::BTreeMap;

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Queued,
    /// The packet's own queue lost a packet to overload shedding.
    Backpressure,
}

impl EnqueueOutcome {
    pub fn is_backpressure(self) -> bool {
        self == EnqueueOutcome::Backpressure
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub bytes: u64,
    pub weight: i32,
    pub xmit_packets: u64,
    pub xmit_bytes: u64,
    pub drop_packets: u64,
    pub drop_bytes: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct QueueDiscStats {
    pub n_total_received_packets: u64,
    pub n_total_received_bytes: u64,
    pub n_total_enqueued_packets: u64,
    pub n_total_enqueued_bytes: u64,
    pub n_total_dequeued_packets: u64,
    pub n_total_dequeued_bytes: u64,
    pub n_total_dropped_packets: u64,
    pub n_total_dropped_bytes: u64,
    pub dropped_packets: BTreeMap<String, u64>,
    pub dropped_bytes: BTreeMap<String, u64>,
}

impl QueueDiscStats {
    pub fn record_received(&mut self, bytes: u64) {
        self.n_total_received_packets += 1;
        self.n_total_received_bytes += bytes;
    }

    pub fn record_enqueued(&mut self, bytes: u64) {
        self.n_total_enqueued_packets += 1;
        self.n_total_enqueued_bytes += bytes;
    }

    pub fn record_dequeued(&mut self, bytes: u64) {
        self.n_total_dequeued_packets += 1;
        self.n_total_dequeued_bytes += bytes;
    }

    pub fn record_drops(&mut self, packets: u64, bytes: u64, reason: &str) {
        if packets == 0 {
            return;
        }
        self.n_total_dropped_packets += packets;
        self.n_total_dropped_bytes += bytes;
        *self.dropped_packets.entry(reason.to_string()).or_insert(0) += packets;
        *self.dropped_bytes.entry(reason.to_string()).or_insert(0) += bytes;
    }

    pub fn dropped_bytes_for(&self, reason: &str) -> u64 {
        self.dropped_bytes.get(reason).copied().unwrap_or(0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DisciplineSnapshot {
    pub num_queues: usize,
    pub high_water_mark: u64,
    pub policy: String,
    pub total_bytes: u64,
    pub active_queues: usize,
    pub totals: QueueDiscStats,
    pub queues: Vec<QueueStats>,
}
