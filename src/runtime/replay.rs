use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;
use std::str::FromStr;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::model::flow::FlowKey;
use crate::model::packet::{Packet, QueueDiscItem};
use crate::runtime::qdisc::classifier::HashPolicy;
use crate::runtime::qdisc::controller::WfqController;
use crate::runtime::qdisc::core::DisciplineSnapshot;
use crate::runtime::qdisc::wfq::{DisciplineConfig, QueueCount};

const QUEUE_TAG: &str = "queue";

fn default_count() -> usize {
    1
}

fn default_repeat() -> u32 {
    1
}

/// One step of a recorded or synthetic workload.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum TraceEvent {
    Enqueue {
        iface: String,
        len: u32,
        #[serde(default)]
        flow: Option<FlowKey>,
        #[serde(default = "default_repeat")]
        repeat: u32,
    },
    Dequeue {
        iface: String,
        #[serde(default = "default_count")]
        count: usize,
    },
    SetWeight {
        iface: String,
        index: usize,
        weight: i32,
    },
    Configure {
        iface: String,
        #[serde(default)]
        queues: Option<usize>,
        #[serde(default)]
        high_water_mark: Option<u64>,
        #[serde(default)]
        policy: Option<String>,
    },
    Purge {
        iface: String,
    },
}

impl TraceEvent {
    pub fn iface(&self) -> &str {
        match self {
            TraceEvent::Enqueue { iface, .. }
            | TraceEvent::Dequeue { iface, .. }
            | TraceEvent::SetWeight { iface, .. }
            | TraceEvent::Configure { iface, .. }
            | TraceEvent::Purge { iface } => iface,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawTrace {
    #[serde(default)]
    events: Vec<TraceEvent>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct InterfaceReport {
    pub enqueued_packets: u64,
    pub backpressure_events: u64,
    pub transmitted_packets: u64,
    pub transmitted_bytes: u64,
    pub purged_bytes: u64,
    /// Queue index of every transmitted packet, in transmit order.
    pub transmit_order: Vec<usize>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ReplayReport {
    pub interfaces: BTreeMap<String, InterfaceReport>,
    pub snapshots: BTreeMap<String, DisciplineSnapshot>,
}

pub fn load_trace(path: &Path) -> Result<Vec<TraceEvent>> {
    let raw_text = fs::read_to_string(path)
        .with_context(|| format!("failed to read trace file {}", path.display()))?;
    parse_trace(&raw_text).with_context(|| format!("invalid trace {}", path.display()))
}

pub fn parse_trace(text: &str) -> Result<Vec<TraceEvent>> {
    let raw: RawTrace = serde_yaml::from_str(text).context("failed to parse trace yaml")?;
    Ok(raw.events)
}

/// Interfaces referenced by a trace, in name order.
pub fn trace_interfaces(events: &[TraceEvent]) -> Vec<String> {
    events
        .iter()
        .map(|event| event.iface().trim().to_string())
        .filter(|name| !name.is_empty())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

pub fn replay(
    controller: &WfqController<QueueDiscItem>,
    events: &[TraceEvent],
) -> Result<ReplayReport> {
    let registry = controller.registry();
    let mut report = ReplayReport::default();

    for (step, event) in events.iter().enumerate() {
        let iface = event.iface();
        let entry = report.interfaces.entry(iface.to_string()).or_default();
        match event {
            TraceEvent::Enqueue {
                len, flow, repeat, ..
            } => {
                for _ in 0..*repeat {
                    let outcome = registry
                        .with_discipline(iface, |d| {
                            let index = d.lookup_index(flow.as_ref());
                            let item = QueueDiscItem::new(*len, *flow)
                                .with_tag(QUEUE_TAG, &index.to_string());
                            d.enqueue_to(index, item)
                        })
                        .and_then(|outcome| outcome)
                        .with_context(|| format!("trace step {step}: enqueue on {iface}"))?;
                    entry.enqueued_packets += 1;
                    if outcome.is_backpressure() {
                        entry.backpressure_events += 1;
                    }
                }
            }
            TraceEvent::Dequeue { count, .. } => {
                for _ in 0..*count {
                    let Some(packet) = registry
                        .dequeue(iface)
                        .with_context(|| format!("trace step {step}: dequeue on {iface}"))?
                    else {
                        debug!("trace step {step}: {iface} ran dry");
                        break;
                    };
                    entry.transmitted_packets += 1;
                    entry.transmitted_bytes += packet.len_bytes();
                    if let Some(index) = packet.tag(QUEUE_TAG).and_then(|raw| raw.parse().ok()) {
                        entry.transmit_order.push(index);
                    }
                }
            }
            TraceEvent::SetWeight { index, weight, .. } => {
                registry
                    .set_weight(iface, *index, *weight)
                    .with_context(|| format!("trace step {step}: set_weight on {iface}"))?;
            }
            TraceEvent::Configure {
                queues,
                high_water_mark,
                policy,
                ..
            } => {
                let policy = policy
                    .as_deref()
                    .map(HashPolicy::from_str)
                    .transpose()
                    .map_err(anyhow::Error::msg)?;
                registry
                    .with_discipline(iface, |d| {
                        d.configure(DisciplineConfig {
                            num_queues: QueueCount::Exact(queues.unwrap_or(d.num_queues())),
                            high_water_mark: high_water_mark.unwrap_or(d.high_water_mark()),
                            policy: policy.unwrap_or(d.policy()),
                        })
                    })
                    .and_then(|applied| applied)
                    .with_context(|| format!("trace step {step}: configure on {iface}"))?;
            }
            TraceEvent::Purge { .. } => {
                let purged = registry
                    .purge(iface)
                    .with_context(|| format!("trace step {step}: purge on {iface}"))?;
                if purged > 0 {
                    warn!("trace step {step}: purged {purged} bytes on {iface}");
                }
                entry.purged_bytes += purged;
            }
        }
    }

    for iface in registry.interfaces() {
        let snapshot = controller.stats_for_interface(&iface)?;
        report.snapshots.insert(iface, snapshot);
    }
    Ok(report)
}
