use tracing::{debug, info, trace};

use crate::model::flow::FlowKey;
use crate::model::packet::Packet;
use crate::runtime::qdisc::active_list::ActiveList;
use crate::runtime::qdisc::classifier::{classify, HashPolicy};
use crate::runtime::qdisc::core::{
    DisciplineSnapshot, EnqueueOutcome, QueueDiscStats, QueueStats,
};
use crate::runtime::qdisc::error::WfqError;
use crate::runtime::qdisc::subqueue::SubQueue;

pub const DEFAULT_QUEUES: usize = 256;
pub const MAX_QUEUES: usize = 2048;
pub const DEFAULT_HIGH_WATER_MARK: u64 = 64 * 1024;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum QueueCount {
    #[default]
    Default,
    Exact(usize),
}

impl QueueCount {
    pub fn resolve(self) -> Result<usize, WfqError> {
        match self {
            QueueCount::Default => Ok(DEFAULT_QUEUES),
            QueueCount::Exact(n) if (1..=MAX_QUEUES).contains(&n) => Ok(n),
            QueueCount::Exact(n) => Err(WfqError::InvalidConfig(format!(
                "queue count {n} outside [1, {MAX_QUEUES}]"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DisciplineConfig {
    pub num_queues: QueueCount,
    pub high_water_mark: u64,
    pub policy: HashPolicy,
}

impl Default for DisciplineConfig {
    fn default() -> Self {
        Self {
            num_queues: QueueCount::Default,
            high_water_mark: DEFAULT_HIGH_WATER_MARK,
            policy: HashPolicy::default(),
        }
    }
}

impl DisciplineConfig {
    /// Checks every field and returns the resolved queue count.
    pub fn validate(&self) -> Result<usize, WfqError> {
        check_high_water_mark(self.high_water_mark)?;
        self.num_queues.resolve()
    }
}

/// Weighted fair queueing discipline for one interface.
///
/// Packets are hashed into per-flow sub-queues. Non-empty sub-queues form a
/// ring that is served round-robin, each visit granting the queue a byte
/// quota proportional to its weight. When the total backlog exceeds the
/// high-water mark, head packets are shed from whichever active queue holds
/// the most bytes per unit of weight.
///
/// Callers serialize access; see [`DisciplineRegistry`](super::DisciplineRegistry).
#[derive(Debug)]
pub struct WfqDiscipline<P> {
    queues: Vec<SubQueue<P>>,
    active: ActiveList,
    policy: HashPolicy,
    total_bytes: u64,
    high_water_mark: u64,
    stats: QueueDiscStats,
}

impl<P: Packet> WfqDiscipline<P> {
    pub const OVERLOAD_SHED_DROP: &'static str = "overload shed";
    pub const PURGE_DROP: &'static str = "purge";

    pub fn attach(cfg: DisciplineConfig) -> Result<Self, WfqError> {
        let num_queues = cfg.validate()?;
        let queues = allocate_queues(num_queues)?;
        info!(
            "wfq attach: queues={} high_water_mark={} policy={}",
            num_queues, cfg.high_water_mark, cfg.policy
        );
        Ok(Self {
            queues,
            active: ActiveList::with_slots(num_queues),
            policy: cfg.policy,
            total_bytes: 0,
            high_water_mark: cfg.high_water_mark,
            stats: QueueDiscStats::default(),
        })
    }

    /// Flushes every queue and tears the discipline down. Returns the bytes
    /// that were still queued.
    pub fn detach(mut self) -> u64 {
        let purged = self.purge();
        info!("wfq detach: purged_bytes={purged}");
        purged
    }

    pub fn num_queues(&self) -> usize {
        self.queues.len()
    }

    pub fn high_water_mark(&self) -> u64 {
        self.high_water_mark
    }

    pub fn policy(&self) -> HashPolicy {
        self.policy
    }

    pub fn total_bytes(&self) -> u64 {
        self.total_bytes
    }

    pub fn active_queue_count(&self) -> usize {
        self.active.len()
    }

    pub fn is_active(&self, index: usize) -> bool {
        self.active.contains(index)
    }

    pub fn stats(&self) -> &QueueDiscStats {
        &self.stats
    }

    pub fn lookup_index(&self, key: Option<&FlowKey>) -> usize {
        classify(key, self.policy, self.queues.len())
    }

    pub fn enqueue(&mut self, packet: P, key: Option<&FlowKey>) -> EnqueueOutcome {
        let index = self.lookup_index(key);
        self.admit(index, packet)
    }

    /// Admits a packet whose queue index was computed by the caller.
    pub fn enqueue_to(&mut self, index: usize, packet: P) -> Result<EnqueueOutcome, WfqError> {
        self.check_index(index)?;
        Ok(self.admit(index, packet))
    }

    fn admit(&mut self, index: usize, packet: P) -> EnqueueOutcome {
        let len = packet.len_bytes();
        self.stats.record_received(len);

        let queue = &mut self.queues[index];
        let was_idle = queue.is_empty();
        queue.push_tail(packet);
        let depth = queue.len();
        self.total_bytes += len;

        if was_idle {
            // Only the first active queue may send right away; a joiner waits
            // for the cursor to come round to it.
            if self.active.is_empty() {
                self.queues[index].grant_quota();
            } else {
                self.queues[index].reset_quota();
            }
            self.active.push_tail(index);
        }

        // The arrival sits at the tail, so it only goes once everything
        // ahead of it in its queue has been shed.
        let shed_from_arrival_queue = self.shed_overload(index);
        if shed_from_arrival_queue < depth {
            self.stats.record_enqueued(len);
        }
        if shed_from_arrival_queue > 0 {
            EnqueueOutcome::Backpressure
        } else {
            EnqueueOutcome::Queued
        }
    }

    /// Drops head packets until the backlog fits under the high-water mark.
    /// Returns how many of the victims came from queue `arrived`.
    fn shed_overload(&mut self, arrived: usize) -> usize {
        let mut shed_from_arrived = 0;
        while self.total_bytes > self.high_water_mark {
            let Some(victim) = self.worst_active_queue() else {
                break;
            };
            let Some(len) = self.queues[victim].drop_head() else {
                break;
            };
            self.total_bytes -= len;
            self.stats.record_drops(1, len, Self::OVERLOAD_SHED_DROP);
            trace!(
                "wfq shed: queue={} len={} total_bytes={}",
                victim,
                len,
                self.total_bytes
            );
            if victim == arrived {
                shed_from_arrived += 1;
            }
            if self.queues[victim].is_empty() {
                let was_cursor = self.active.cursor() == Some(victim);
                if let Some(next) = self.active.remove(victim) {
                    if was_cursor {
                        self.queues[next].grant_quota();
                    }
                }
            }
        }
        shed_from_arrived
    }

    fn worst_active_queue(&self) -> Option<usize> {
        self.active.iter().fold(None, |worst, idx| match worst {
            Some(w) if !self.heavier(idx, w) => Some(w),
            _ => Some(idx),
        })
    }

    // bytes/weight of `a` strictly above that of `b`
    fn heavier(&self, a: usize, b: usize) -> bool {
        let (qa, qb) = (&self.queues[a], &self.queues[b]);
        u128::from(qa.bytes()) * weight_u128(qb.weight())
            > u128::from(qb.bytes()) * weight_u128(qa.weight())
    }

    /// The packet the next [`dequeue`](Self::dequeue) would return.
    pub fn peek(&self) -> Option<&P> {
        if self.total_bytes == 0 {
            return None;
        }
        let ring_len = self.active.len() as u64;
        let mut best: Option<(u64, usize)> = None;
        for (pos, idx) in self.active.iter().enumerate() {
            let queue = &self.queues[idx];
            let grants_needed = if queue.quota() > 0 {
                0
            } else {
                (-queue.quota() / queue.round_grant().max(1) + 1) as u64
            };
            // The cursor is checked before its first grant, everyone else
            // is granted on arrival of the cursor.
            let laps = if pos == 0 {
                grants_needed
            } else {
                grants_needed.saturating_sub(1)
            };
            let visit = laps * ring_len + pos as u64;
            if best.map_or(true, |(at, _)| visit < at) {
                best = Some((visit, idx));
            }
        }
        best.and_then(|(_, idx)| self.queues[idx].peek_head())
    }

    pub fn dequeue(&mut self) -> Option<P> {
        if self.total_bytes == 0 || self.active.is_empty() {
            return None;
        }
        let mut idx = self.active.cursor()?;
        while self.queues[idx].quota() <= 0 {
            idx = self.active.advance()?;
            self.queues[idx].grant_quota();
        }

        let packet = self.queues[idx].transmit_head()?;
        let len = packet.len_bytes();
        self.total_bytes -= len;
        self.stats.record_dequeued(len);

        if self.queues[idx].is_empty() {
            if let Some(next) = self.active.remove(idx) {
                self.queues[next].grant_quota();
            }
        }
        Some(packet)
    }

    /// Drops every queued packet. Returns the number of bytes dropped.
    pub fn purge(&mut self) -> u64 {
        let mut dropped_packets = 0;
        let mut dropped_bytes = 0;
        for queue in &mut self.queues {
            let (packets, bytes) = queue.flush();
            dropped_packets += packets;
            dropped_bytes += bytes;
        }
        self.active.clear();
        self.total_bytes = 0;
        self.stats
            .record_drops(dropped_packets, dropped_bytes, Self::PURGE_DROP);
        dropped_bytes
    }

    /// Applies a full configuration. Nothing changes unless every field is
    /// valid and the queue array could be allocated.
    pub fn configure(&mut self, cfg: DisciplineConfig) -> Result<(), WfqError> {
        let num_queues = cfg.validate()?;
        if num_queues != self.queues.len() {
            self.resize(QueueCount::Exact(num_queues))?;
        }
        self.set_high_water_mark(cfg.high_water_mark)?;
        self.set_policy(cfg.policy);
        Ok(())
    }

    /// Replaces the queue array, flushing all queued packets and per-queue
    /// counters. Returns the bytes purged.
    pub fn resize(&mut self, num_queues: QueueCount) -> Result<u64, WfqError> {
        let n = num_queues.resolve()?;
        let queues = allocate_queues(n)?;
        let purged = self.purge();
        info!(
            "wfq resize: queues {} -> {} purged_bytes={}",
            self.queues.len(),
            n,
            purged
        );
        self.queues = queues;
        self.active = ActiveList::with_slots(n);
        Ok(purged)
    }

    pub fn set_high_water_mark(&mut self, high_water_mark: u64) -> Result<(), WfqError> {
        check_high_water_mark(high_water_mark)?;
        if high_water_mark != self.high_water_mark {
            debug!(
                "wfq high_water_mark {} -> {}",
                self.high_water_mark, high_water_mark
            );
        }
        self.high_water_mark = high_water_mark;
        Ok(())
    }

    pub fn set_policy(&mut self, policy: HashPolicy) {
        if policy != self.policy {
            debug!("wfq hash policy {} -> {}", self.policy, policy);
        }
        self.policy = policy;
    }

    /// Returns the previous weight. Quota and backlog are left as they are.
    pub fn set_weight(&mut self, index: usize, weight: i32) -> Result<i32, WfqError> {
        self.check_index(index)?;
        if weight <= 0 {
            return Err(WfqError::InvalidWeight(weight));
        }
        let prev = self.queues[index].set_weight(weight);
        debug!("wfq queue {index} weight {prev} -> {weight}");
        Ok(prev)
    }

    pub fn get_stats(&self, index: usize) -> Result<QueueStats, WfqError> {
        self.check_index(index)?;
        Ok(self.queues[index].stats())
    }

    pub fn snapshot(&self) -> DisciplineSnapshot {
        DisciplineSnapshot {
            num_queues: self.queues.len(),
            high_water_mark: self.high_water_mark,
            policy: self.policy.to_string(),
            total_bytes: self.total_bytes,
            active_queues: self.active.len(),
            totals: self.stats.clone(),
            queues: self.queues.iter().map(SubQueue::stats).collect(),
        }
    }

    fn check_index(&self, index: usize) -> Result<(), WfqError> {
        if index >= self.queues.len() {
            return Err(WfqError::InvalidIndex {
                index,
                num_queues: self.queues.len(),
            });
        }
        Ok(())
    }
}

fn allocate_queues<P: Packet>(n: usize) -> Result<Vec<SubQueue<P>>, WfqError> {
    let mut queues = Vec::new();
    queues
        .try_reserve_exact(n)
        .map_err(|_| WfqError::OutOfMemory { requested: n })?;
    queues.extend((0..n).map(|_| SubQueue::new()));
    Ok(queues)
}

fn check_high_water_mark(high_water_mark: u64) -> Result<(), WfqError> {
    if high_water_mark == 0 {
        return Err(WfqError::InvalidConfig(
            "high_water_mark must be positive".to_string(),
        ));
    }
    Ok(())
}

fn weight_u128(weight: i32) -> u128 {
    u128::from(weight.max(1) as u32)
}

#[cfg(test)]
mod tests {
    use std::net::{IpAddr, Ipv4Addr};

    use crate::model::flow::FlowKey;
    use crate::model::packet::{Packet, QueueDiscItem};
    use crate::runtime::qdisc::subqueue::DEFAULT_WEIGHT;

    use super::*;

    fn disc(
        num_queues: usize,
        high_water_mark: u64,
        policy: HashPolicy,
    ) -> WfqDiscipline<QueueDiscItem> {
        WfqDiscipline::attach(DisciplineConfig {
            num_queues: QueueCount::Exact(num_queues),
            high_water_mark,
            policy,
        })
        .expect("valid config")
    }

    fn item(len: u32, seq: usize) -> QueueDiscItem {
        QueueDiscItem::new(len, None).with_tag("seq", &seq.to_string())
    }

    fn dst_key(last: u8) -> FlowKey {
        FlowKey::to_destination(IpAddr::V4(Ipv4Addr::new(10, 0, 0, last)))
    }

    fn queue_of(packet: &QueueDiscItem) -> Option<&str> {
        packet.tag("queue")
    }

    fn assert_invariants(d: &WfqDiscipline<QueueDiscItem>) {
        let mut sum = 0;
        for idx in 0..d.num_queues() {
            let stats = d.get_stats(idx).expect("index in range");
            sum += stats.bytes;
            assert_eq!(d.is_active(idx), stats.bytes > 0, "membership of queue {idx}");
        }
        assert_eq!(d.total_bytes(), sum);
    }

    // Small deterministic generator so workloads are reproducible.
    struct Lcg(u64);

    impl Lcg {
        fn next(&mut self, bound: u64) -> u64 {
            self.0 = self
                .0
                .wrapping_mul(6364136223846793005)
                .wrapping_add(1442695040888963407);
            (self.0 >> 33) % bound
        }
    }

    #[test]
    fn single_queue_sheds_down_to_high_water_mark() {
        let mut d = disc(1, 500, HashPolicy::Full);
        let mut outcomes = Vec::new();
        for seq in 0..6 {
            outcomes.push(d.enqueue(item(100, seq), None));
        }
        assert!(outcomes[..5].iter().all(|o| *o == EnqueueOutcome::Queued));
        assert_eq!(outcomes[5], EnqueueOutcome::Backpressure);

        let stats = d.get_stats(0).expect("queue 0");
        assert_eq!(stats.bytes, 500);
        assert_eq!(stats.drop_bytes, 100);
        assert_eq!(stats.drop_packets, 1);
        assert_eq!(d.total_bytes(), 500);
        // the head (oldest) packet is the one shed
        assert_eq!(d.peek().and_then(|p| p.tag("seq")), Some("1"));
        assert_eq!(
            d.stats().dropped_bytes_for(WfqDiscipline::<QueueDiscItem>::OVERLOAD_SHED_DROP),
            100
        );
    }

    #[test]
    fn two_flows_by_destination_share_equally() {
        let mut d = disc(2, DEFAULT_HIGH_WATER_MARK, HashPolicy::ByDestination);
        for seq in 0..5 {
            d.enqueue(item(100, seq).with_tag("queue", "0"), Some(&dst_key(2)));
            d.enqueue(item(100, seq).with_tag("queue", "1"), Some(&dst_key(3)));
        }
        assert_eq!(d.get_stats(0).expect("queue 0").bytes, 500);
        assert_eq!(d.get_stats(1).expect("queue 1").bytes, 500);

        let order: Vec<String> = std::iter::from_fn(|| d.dequeue())
            .map(|p| queue_of(&p).unwrap_or_default().to_string())
            .collect();
        assert_eq!(order, ["0", "0", "0", "0", "0", "1", "1", "1", "1", "1"]);
        assert_eq!(
            d.get_stats(0).expect("queue 0").xmit_bytes,
            d.get_stats(1).expect("queue 1").xmit_bytes
        );
        assert_invariants(&d);
    }

    #[test]
    fn mtu_sized_packets_alternate_between_equal_weights() {
        let mut d = disc(2, DEFAULT_HIGH_WATER_MARK, HashPolicy::ByDestination);
        for seq in 0..5 {
            d.enqueue(item(1500, seq).with_tag("queue", "0"), Some(&dst_key(2)));
            d.enqueue(item(1500, seq).with_tag("queue", "1"), Some(&dst_key(3)));
        }
        let order: Vec<String> = std::iter::from_fn(|| d.dequeue())
            .map(|p| queue_of(&p).unwrap_or_default().to_string())
            .collect();
        assert_eq!(order, ["0", "1", "0", "1", "0", "1", "0", "1", "0", "1"]);
    }

    #[test]
    fn resize_flushes_and_remaps_into_new_range() {
        let mut d = disc(2, DEFAULT_HIGH_WATER_MARK, HashPolicy::ByDestination);
        for seq in 0..4 {
            d.enqueue(item(300, seq), Some(&dst_key(seq as u8)));
        }
        d.dequeue().expect("one packet transmitted");
        assert!(d.total_bytes() > 0);

        d.configure(DisciplineConfig {
            num_queues: QueueCount::Exact(4),
            high_water_mark: DEFAULT_HIGH_WATER_MARK,
            policy: HashPolicy::ByDestination,
        })
        .expect("resize to 4");

        assert_eq!(d.num_queues(), 4);
        assert_eq!(d.total_bytes(), 0);
        assert_eq!(d.active_queue_count(), 0);
        for idx in 0..4 {
            assert_eq!(
                d.get_stats(idx).expect("queue stats"),
                QueueStats {
                    weight: DEFAULT_WEIGHT,
                    ..QueueStats::default()
                }
            );
        }
        for last in 0..=255u8 {
            assert!(d.lookup_index(Some(&dst_key(last))) < 4);
        }
        assert!(d.dequeue().is_none());
        assert_eq!(
            d.stats()
                .dropped_bytes_for(WfqDiscipline::<QueueDiscItem>::PURGE_DROP),
            900
        );
    }

    #[test]
    fn negative_weight_is_rejected() {
        let mut d = disc(2, DEFAULT_HIGH_WATER_MARK, HashPolicy::Full);
        assert_eq!(d.set_weight(0, -1), Err(WfqError::InvalidWeight(-1)));
        assert_eq!(d.set_weight(0, 0), Err(WfqError::InvalidWeight(0)));
        assert_eq!(d.get_stats(0).expect("queue 0").weight, DEFAULT_WEIGHT);
        assert_eq!(
            d.set_weight(2, 10),
            Err(WfqError::InvalidIndex {
                index: 2,
                num_queues: 2
            })
        );
        assert_eq!(d.set_weight(1, 10), Ok(DEFAULT_WEIGHT));
        assert_eq!(d.set_weight(1, 20), Ok(10));
    }

    #[test]
    fn empty_dequeue_changes_nothing() {
        let mut d = disc(4, 1000, HashPolicy::Full);
        let before = d.snapshot();
        assert!(d.peek().is_none());
        assert!(d.dequeue().is_none());
        assert_eq!(d.snapshot(), before);
    }

    #[test]
    fn weighted_service_converges_to_weight_ratio() {
        let mut d = disc(2, 1_000_000, HashPolicy::Full);
        d.set_weight(1, 10).expect("set weight");
        for seq in 0..2000 {
            d.enqueue_to(0, item(100, seq)).expect("queue 0");
            d.enqueue_to(1, item(100, seq)).expect("queue 1");
        }
        for _ in 0..1100 {
            d.dequeue().expect("saturated queues");
        }
        let heavy = d.get_stats(0).expect("queue 0").xmit_bytes as f64;
        let light = d.get_stats(1).expect("queue 1").xmit_bytes as f64;
        let ratio = heavy / light;
        assert!((9.0..=11.0).contains(&ratio), "ratio {ratio}");
        assert_eq!(d.stats().n_total_dropped_packets, 0);
    }

    #[test]
    fn new_flow_waits_for_the_cursor() {
        let mut d = disc(2, DEFAULT_HIGH_WATER_MARK, HashPolicy::Full);
        for seq in 0..10 {
            d.enqueue_to(0, item(1000, seq).with_tag("queue", "0"))
                .expect("queue 0");
        }
        let first = d.dequeue().expect("first");
        assert_eq!(queue_of(&first), Some("0"));

        d.enqueue_to(1, item(1000, 0).with_tag("queue", "1"))
            .expect("queue 1");
        assert_eq!(d.get_stats(1).expect("queue 1").xmit_bytes, 0);

        // queue 0 still has 500 bytes of quota left in this round
        let second = d.dequeue().expect("second");
        assert_eq!(queue_of(&second), Some("0"));
        let third = d.dequeue().expect("third");
        assert_eq!(queue_of(&third), Some("1"));
    }

    #[test]
    fn high_water_mark_change_is_not_retroactive() {
        let mut d = disc(1, 1000, HashPolicy::Full);
        for seq in 0..8 {
            d.enqueue(item(100, seq), None);
        }
        d.set_high_water_mark(300).expect("valid mark");
        assert_eq!(d.total_bytes(), 800);
        assert_eq!(d.enqueue(item(100, 8), None), EnqueueOutcome::Backpressure);
        assert_eq!(d.total_bytes(), 300);
        assert_eq!(d.get_stats(0).expect("queue 0").drop_packets, 6);
        assert!(d.set_high_water_mark(0).is_err());
        assert_eq!(d.high_water_mark(), 300);
    }

    #[test]
    fn shedding_targets_largest_backlog_per_weight() {
        let mut d = disc(3, 2000, HashPolicy::Full);
        d.set_weight(1, 400).expect("weight");
        for seq in 0..6 {
            d.enqueue_to(0, item(200, seq)).expect("queue 0");
            d.enqueue_to(1, item(200, seq)).expect("queue 1");
        }
        // queue 1 holds more bytes but has four times the weight
        assert_eq!(d.get_stats(0).expect("queue 0").drop_packets, 2);
        assert_eq!(d.get_stats(0).expect("queue 0").bytes, 800);
        assert_eq!(d.get_stats(1).expect("queue 1").drop_packets, 0);
        assert_eq!(d.get_stats(1).expect("queue 1").bytes, 1200);

        let outcome = d.enqueue_to(2, item(400, 0)).expect("queue 2");
        assert_eq!(outcome, EnqueueOutcome::Queued);
        assert_eq!(d.total_bytes(), 2000);
        assert_eq!(d.get_stats(0).expect("queue 0").drop_packets, 4);
        assert_eq!(d.get_stats(2).expect("queue 2").bytes, 400);
        assert_invariants(&d);
    }

    #[test]
    fn shedding_can_empty_the_cursor_queue() {
        let mut d = disc(2, 1000, HashPolicy::Full);
        d.enqueue_to(0, item(600, 0).with_tag("queue", "0"))
            .expect("queue 0");
        let outcome = d
            .enqueue_to(1, item(900, 0).with_tag("queue", "1"))
            .expect("queue 1");
        // queue 1 has the larger backlog and loses its only packet
        assert_eq!(outcome, EnqueueOutcome::Backpressure);
        assert!(!d.is_active(1));

        let outcome = d
            .enqueue_to(1, item(300, 1).with_tag("queue", "1"))
            .expect("queue 1");
        assert_eq!(outcome, EnqueueOutcome::Queued);
        d.set_high_water_mark(500).expect("mark");
        d.enqueue_to(1, item(100, 2).with_tag("queue", "1"))
            .expect("queue 1");
        // queue 0 (the cursor) was drained by shedding
        assert!(!d.is_active(0));
        assert_invariants(&d);
        let next = d.dequeue().expect("queue 1 packet");
        assert_eq!(queue_of(&next), Some("1"));
    }

    #[test]
    fn successor_keeps_its_turn_when_shedding_drains_the_cursor() {
        let mut d = disc(3, 1000, HashPolicy::Full);
        d.enqueue_to(0, item(900, 0).with_tag("queue", "0"))
            .expect("queue 0");
        d.enqueue_to(1, item(50, 0).with_tag("queue", "1"))
            .expect("queue 1");
        d.enqueue_to(2, item(50, 0).with_tag("queue", "2"))
            .expect("queue 2");
        let outcome = d
            .enqueue_to(2, item(60, 1).with_tag("queue", "2"))
            .expect("queue 2");
        // queue 0 held the cursor and loses its only packet
        assert_eq!(outcome, EnqueueOutcome::Queued);
        assert!(!d.is_active(0));
        assert_eq!(d.total_bytes(), 160);
        assert_invariants(&d);

        assert_eq!(d.peek().and_then(queue_of), Some("1"));
        let order: Vec<String> = std::iter::from_fn(|| d.dequeue())
            .map(|p| queue_of(&p).unwrap_or_default().to_string())
            .collect();
        assert_eq!(order, ["1", "2", "2"]);
    }

    #[test]
    fn emptied_queue_rejoins_behind_the_cursor() {
        let mut d = disc(2, DEFAULT_HIGH_WATER_MARK, HashPolicy::Full);
        d.enqueue_to(0, item(100, 0).with_tag("queue", "0"))
            .expect("queue 0");
        d.dequeue().expect("queue 0 packet");
        // queue 0 left the ring with unused quota
        assert_eq!(d.active_queue_count(), 0);

        d.enqueue_to(1, item(100, 0).with_tag("queue", "1"))
            .expect("queue 1");
        d.enqueue_to(0, item(100, 1).with_tag("queue", "0"))
            .expect("queue 0");
        let order: Vec<String> = std::iter::from_fn(|| d.dequeue())
            .map(|p| queue_of(&p).unwrap_or_default().to_string())
            .collect();
        assert_eq!(order, ["1", "0"]);
    }

    #[test]
    fn shed_arrival_is_received_but_not_enqueued() {
        let mut d = disc(2, 1000, HashPolicy::Full);
        d.enqueue_to(0, item(600, 0)).expect("queue 0");
        let outcome = d.enqueue_to(1, item(900, 0)).expect("queue 1");
        assert_eq!(outcome, EnqueueOutcome::Backpressure);

        let totals = d.stats();
        assert_eq!(totals.n_total_received_packets, 2);
        assert_eq!(totals.n_total_received_bytes, 1500);
        assert_eq!(totals.n_total_enqueued_packets, 1);
        assert_eq!(totals.n_total_enqueued_bytes, 600);
        assert_eq!(totals.n_total_dropped_bytes, 900);

        // an older packet shed ahead of the arrival does not undo its admission
        let mut d = disc(1, 500, HashPolicy::Full);
        for seq in 0..6 {
            d.enqueue(item(100, seq), None);
        }
        assert_eq!(d.stats().n_total_received_packets, 6);
        assert_eq!(d.stats().n_total_enqueued_packets, 6);
        assert_eq!(d.stats().n_total_dropped_packets, 1);
    }

    #[test]
    fn policy_change_does_not_reclassify_backlog() {
        let mut d = disc(16, DEFAULT_HIGH_WATER_MARK, HashPolicy::ByDestination);
        let key = FlowKey::new(
            IpAddr::V4(Ipv4Addr::new(172, 16, 0, 9)),
            IpAddr::V4(Ipv4Addr::new(10, 1, 2, 3)),
            5353,
            53,
            17,
        );
        let before = d.lookup_index(Some(&key));
        d.enqueue(item(120, 0), Some(&key));
        d.set_policy(HashPolicy::BySourcePort);
        assert_eq!(d.get_stats(before).expect("queue").bytes, 120);
        assert_eq!(d.total_bytes(), 120);
        assert_eq!(d.lookup_index(Some(&key)), d.lookup_index(Some(&key)));
    }

    #[test]
    fn invalid_configure_leaves_state_untouched() {
        let mut d = disc(2, 900, HashPolicy::ByDestination);
        d.enqueue(item(100, 0), None);
        let before = d.snapshot();
        for cfg in [
            DisciplineConfig {
                num_queues: QueueCount::Exact(0),
                high_water_mark: 900,
                policy: HashPolicy::Full,
            },
            DisciplineConfig {
                num_queues: QueueCount::Exact(MAX_QUEUES + 1),
                high_water_mark: 900,
                policy: HashPolicy::Full,
            },
            DisciplineConfig {
                num_queues: QueueCount::Exact(8),
                high_water_mark: 0,
                policy: HashPolicy::Full,
            },
        ] {
            assert!(matches!(d.configure(cfg), Err(WfqError::InvalidConfig(_))));
        }
        assert_eq!(d.snapshot(), before);

        d.configure(DisciplineConfig {
            num_queues: QueueCount::Default,
            high_water_mark: 900,
            policy: HashPolicy::Full,
        })
        .expect("default size");
        assert_eq!(d.num_queues(), DEFAULT_QUEUES);
    }

    #[test]
    fn configure_with_same_size_keeps_backlog() {
        let mut d = disc(2, 900, HashPolicy::ByDestination);
        d.enqueue(item(100, 0), None);
        d.configure(DisciplineConfig {
            num_queues: QueueCount::Exact(2),
            high_water_mark: 1200,
            policy: HashPolicy::Full,
        })
        .expect("reconfigure");
        assert_eq!(d.total_bytes(), 100);
        assert_eq!(d.high_water_mark(), 1200);
        assert_eq!(d.policy(), HashPolicy::Full);
    }

    #[test]
    fn purge_and_detach_report_dropped_bytes() {
        let mut d = disc(4, DEFAULT_HIGH_WATER_MARK, HashPolicy::ByDestination);
        for seq in 0..6 {
            d.enqueue(item(250, seq), Some(&dst_key(seq as u8)));
        }
        assert_eq!(d.purge(), 1500);
        assert_eq!(d.total_bytes(), 0);
        assert_eq!(d.active_queue_count(), 0);
        assert_eq!(d.purge(), 0);

        d.enqueue(item(70, 0), None);
        assert_eq!(d.get_stats(0).expect("queue 0").bytes, 70);
        assert_eq!(d.detach(), 70);
    }

    #[test]
    fn invariants_hold_under_mixed_load() {
        let mut rng = Lcg(7);
        let mut d = disc(8, 6000, HashPolicy::ByDestination);
        d.set_weight(3, 25).expect("weight");
        d.set_weight(5, 300).expect("weight");
        for seq in 0..5000 {
            if rng.next(3) < 2 {
                let len = 40 + rng.next(1460) as u32;
                let key = dst_key(rng.next(32) as u8);
                d.enqueue(item(len, seq), Some(&key));
                assert!(d.total_bytes() <= d.high_water_mark());
            } else {
                let expected = d.peek().cloned();
                let got = d.dequeue();
                assert_eq!(got, expected);
            }
            assert_invariants(&d);
        }
        while let Some(expected) = d.peek().cloned() {
            assert_eq!(d.dequeue(), Some(expected));
        }
        assert_eq!(d.total_bytes(), 0);
        assert_invariants(&d);
    }

    #[test]
    fn peek_matches_dequeue_with_oversized_packets() {
        let mut d = disc(3, 1_000_000, HashPolicy::Full);
        d.set_weight(2, 1).expect("weight");
        for seq in 0..4 {
            d.enqueue_to(0, item(9000, seq)).expect("queue 0");
            d.enqueue_to(1, item(64, seq)).expect("queue 1");
            d.enqueue_to(2, item(4000, seq)).expect("queue 2");
        }
        let mut sent = 0u64;
        while let Some(expected) = d.peek().cloned() {
            let got = d.dequeue().expect("peeked packet");
            sent += got.len_bytes();
            assert_eq!(got, expected);
        }
        assert_eq!(sent, 4 * (9000 + 64 + 4000));
    }

    #[test]
    fn enqueue_to_rejects_out_of_range_index() {
        let mut d = disc(2, 1000, HashPolicy::Full);
        assert_eq!(
            d.enqueue_to(5, item(10, 0)),
            Err(WfqError::InvalidIndex {
                index: 5,
                num_queues: 2
            })
        );
        assert_eq!(d.total_bytes(), 0);
        assert_eq!(d.stats().n_total_received_packets, 0);
        assert!(matches!(d.get_stats(9), Err(WfqError::InvalidIndex { .. })));
    }
}
