use std::collections::BTreeSet;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{debug, info};

use crate::model::packet::Packet;
use crate::runtime::config::{WfqConfig, WfqProfile};
use crate::runtime::qdisc::core::DisciplineSnapshot;
use crate::runtime::qdisc::error::WfqError;
use crate::runtime::qdisc::registry::DisciplineRegistry;

/// Control-plane glue: turns configured profiles into attach, configure and
/// set-weight calls on the registry.
pub struct WfqController<P> {
    registry: Arc<DisciplineRegistry<P>>,
    cfg: WfqConfig,
}

impl<P: Packet> WfqController<P> {
    pub fn new(registry: Arc<DisciplineRegistry<P>>, cfg: &WfqConfig) -> Self {
        Self {
            registry,
            cfg: cfg.clone(),
        }
    }

    pub fn registry(&self) -> &Arc<DisciplineRegistry<P>> {
        &self.registry
    }

    pub fn configured_interfaces(&self) -> Vec<String> {
        self.cfg.interfaces.keys().cloned().collect()
    }

    pub fn apply_to_interfaces(&self, ifaces: &[String]) -> Result<()> {
        let unique_ifaces: BTreeSet<&str> = ifaces
            .iter()
            .map(|name| name.trim())
            .filter(|name| !name.is_empty())
            .collect();

        for iface in unique_ifaces {
            self.apply_for_interface(iface)?;
        }
        Ok(())
    }

    pub fn apply_for_interface(&self, iface: &str) -> Result<()> {
        if let Some(profile) = self.cfg.profile_for(iface) {
            return self.apply_profile_for_interface(iface, profile);
        }
        debug!("no wfq profile for {iface}, leaving it unmanaged");
        Ok(())
    }

    /// Attaches a discipline if the interface has none, then applies the
    /// profile's sizing, policy and weights under a single lock.
    pub fn apply_profile_for_interface(&self, iface: &str, profile: &WfqProfile) -> Result<()> {
        if !self.registry.is_attached(iface) {
            match self.registry.attach(iface, profile.discipline) {
                Ok(()) | Err(WfqError::AlreadyAttached(_)) => {}
                Err(err) => {
                    return Err(err).with_context(|| format!("failed to attach wfq to {iface}"))
                }
            }
        }
        self.registry
            .with_discipline(iface, |d| -> Result<(), WfqError> {
                d.configure(profile.discipline)?;
                for (index, weight) in &profile.weights {
                    d.set_weight(*index, *weight)?;
                }
                Ok(())
            })
            .and_then(|applied| applied)
            .with_context(|| format!("failed to apply wfq profile to {iface}"))?;
        info!(
            "wfq profile applied to {iface}: queues={:?} high_water_mark={} policy={} weights={}",
            profile.discipline.num_queues,
            profile.discipline.high_water_mark,
            profile.discipline.policy,
            profile.weights.len()
        );
        Ok(())
    }

    /// Detaches the interface's discipline, if any. Returns purged bytes.
    pub fn clear_for_interface(&self, iface: &str) -> Result<u64> {
        match self.registry.detach(iface) {
            Ok(purged) => Ok(purged),
            Err(WfqError::NotAttached(_)) => Ok(0),
            Err(err) => Err(err).with_context(|| format!("failed to detach wfq from {iface}")),
        }
    }

    pub fn stats_for_interface(&self, iface: &str) -> Result<DisciplineSnapshot> {
        self.registry
            .snapshot(iface)
            .with_context(|| format!("failed to read wfq stats for {iface}"))
    }
}
