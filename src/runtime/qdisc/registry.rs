use std::collections::BTreeMap;

use parking_lot::{Mutex, RwLock};
use tracing::info;

use crate::model::flow::FlowKey;
use crate::model::packet::Packet;
use crate::runtime::qdisc::core::{DisciplineSnapshot, EnqueueOutcome, QueueStats};
use crate::runtime::qdisc::error::WfqError;
use crate::runtime::qdisc::wfq::{DisciplineConfig, WfqDiscipline};

/// Owns one discipline per interface.
///
/// Every call into a discipline holds that discipline's mutex, so calls on
/// the same interface are serialized while different interfaces proceed
/// independently. Attach and detach take the map's write lock.
pub struct DisciplineRegistry<P> {
    disciplines: RwLock<BTreeMap<String, Mutex<WfqDiscipline<P>>>>,
}

impl<P> Default for DisciplineRegistry<P> {
    fn default() -> Self {
        Self {
            disciplines: RwLock::new(BTreeMap::new()),
        }
    }
}

impl<P: Packet> DisciplineRegistry<P> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attach(&self, iface: &str, cfg: DisciplineConfig) -> Result<(), WfqError> {
        let mut guard = self.disciplines.write();
        if guard.contains_key(iface) {
            return Err(WfqError::AlreadyAttached(iface.to_string()));
        }
        let discipline = WfqDiscipline::attach(cfg)?;
        guard.insert(iface.to_string(), Mutex::new(discipline));
        info!("wfq attached to {iface}");
        Ok(())
    }

    /// Flushes and removes the interface's discipline. Returns purged bytes.
    pub fn detach(&self, iface: &str) -> Result<u64, WfqError> {
        let discipline = self
            .disciplines
            .write()
            .remove(iface)
            .ok_or_else(|| WfqError::NotAttached(iface.to_string()))?;
        let purged = discipline.into_inner().detach();
        info!("wfq detached from {iface}");
        Ok(purged)
    }

    /// Detaches every interface. Returns the total bytes purged.
    pub fn destroy_all(&self) -> u64 {
        let drained = std::mem::take(&mut *self.disciplines.write());
        let count = drained.len();
        let purged: u64 = drained
            .into_values()
            .map(|discipline| discipline.into_inner().detach())
            .sum();
        info!("wfq registry destroyed: interfaces={count} purged_bytes={purged}");
        purged
    }

    pub fn is_attached(&self, iface: &str) -> bool {
        self.disciplines.read().contains_key(iface)
    }

    pub fn interfaces(&self) -> Vec<String> {
        self.disciplines.read().keys().cloned().collect()
    }

    pub fn with_discipline<R>(
        &self,
        iface: &str,
        f: impl FnOnce(&mut WfqDiscipline<P>) -> R,
    ) -> Result<R, WfqError> {
        let guard = self.disciplines.read();
        let discipline = guard
            .get(iface)
            .ok_or_else(|| WfqError::NotAttached(iface.to_string()))?;
        let mut locked = discipline.lock();
        Ok(f(&mut *locked))
    }

    pub fn enqueue(
        &self,
        iface: &str,
        packet: P,
        key: Option<&FlowKey>,
    ) -> Result<EnqueueOutcome, WfqError> {
        self.with_discipline(iface, |d| d.enqueue(packet, key))
    }

    pub fn dequeue(&self, iface: &str) -> Result<Option<P>, WfqError> {
        self.with_discipline(iface, WfqDiscipline::dequeue)
    }

    pub fn purge(&self, iface: &str) -> Result<u64, WfqError> {
        self.with_discipline(iface, WfqDiscipline::purge)
    }

    pub fn configure(&self, iface: &str, cfg: DisciplineConfig) -> Result<(), WfqError> {
        self.with_discipline(iface, |d| d.configure(cfg))?
    }

    pub fn set_weight(&self, iface: &str, index: usize, weight: i32) -> Result<i32, WfqError> {
        self.with_discipline(iface, |d| d.set_weight(index, weight))?
    }

    pub fn get_stats(&self, iface: &str, index: usize) -> Result<QueueStats, WfqError> {
        self.with_discipline(iface, |d| d.get_stats(index))?
    }

    pub fn lookup_index(&self, iface: &str, key: Option<&FlowKey>) -> Result<usize, WfqError> {
        self.with_discipline(iface, |d| d.lookup_index(key))
    }

    pub fn snapshot(&self, iface: &str) -> Result<DisciplineSnapshot, WfqError> {
        self.with_discipline(iface, |d| d.snapshot())
    }
}
