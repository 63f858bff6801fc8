use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::str::FromStr;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::runtime::qdisc::classifier::HashPolicy;
use crate::runtime::qdisc::wfq::{DisciplineConfig, QueueCount, DEFAULT_HIGH_WATER_MARK};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WfqProfile {
    pub discipline: DisciplineConfig,
    pub weights: BTreeMap<usize, i32>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WfqConfig {
    pub default: Option<WfqProfile>,
    pub interfaces: BTreeMap<String, WfqProfile>,
}

impl WfqConfig {
    pub fn profile_for(&self, iface: &str) -> Option<&WfqProfile> {
        self.interfaces.get(iface).or(self.default.as_ref())
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawQueues {
    Count(usize),
    Named(String),
}

#[derive(Debug, Deserialize, Default)]
struct RawProfile {
    queues: Option<RawQueues>,
    high_water_mark: Option<u64>,
    policy: Option<String>,
    weights: Option<BTreeMap<String, i32>>,
}

#[derive(Debug, Deserialize, Default)]
struct RawWfq {
    default: Option<RawProfile>,
    #[serde(default)]
    interfaces: BTreeMap<String, RawProfile>,
}

#[derive(Debug, Deserialize, Default)]
struct RawConfig {
    wfq: Option<RawWfq>,
}

pub fn load_wfq_config(path: &Path) -> Result<WfqConfig> {
    let raw_text = fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    parse_wfq_config(&raw_text)
        .with_context(|| format!("invalid wfq config {}", path.display()))
}

pub fn parse_wfq_config(text: &str) -> Result<WfqConfig> {
    let raw_cfg: RawConfig =
        serde_yaml::from_str(text).context("failed to parse wfq config yaml")?;
    let raw_wfq = raw_cfg.wfq.unwrap_or_default();

    let default = raw_wfq
        .default
        .map(|raw| parse_profile(raw).context("invalid default profile"))
        .transpose()?;

    let mut interfaces = BTreeMap::new();
    for (iface, raw) in raw_wfq.interfaces {
        let name = iface.trim().to_string();
        if name.is_empty() {
            anyhow::bail!("interface name must not be empty");
        }
        let profile =
            parse_profile(raw).with_context(|| format!("invalid profile for interface {name}"))?;
        interfaces.insert(name, profile);
    }

    Ok(WfqConfig {
        default,
        interfaces,
    })
}

fn parse_profile(raw: RawProfile) -> Result<WfqProfile> {
    let num_queues = match raw.queues {
        None => QueueCount::Default,
        Some(RawQueues::Count(n)) => QueueCount::Exact(n),
        Some(RawQueues::Named(name)) if name.trim().eq_ignore_ascii_case("default") => {
            QueueCount::Default
        }
        Some(RawQueues::Named(name)) => anyhow::bail!("invalid queue count: {name}"),
    };
    let policy = raw
        .policy
        .as_deref()
        .map(HashPolicy::from_str)
        .transpose()
        .map_err(anyhow::Error::msg)?
        .unwrap_or_default();
    let discipline = DisciplineConfig {
        num_queues,
        high_water_mark: raw.high_water_mark.unwrap_or(DEFAULT_HIGH_WATER_MARK),
        policy,
    };
    let num_queues = discipline.validate()?;

    let weights = parse_index_key_map(raw.weights.unwrap_or_default())?;
    for (index, weight) in &weights {
        if *index >= num_queues {
            anyhow::bail!("weight for queue {index} but only {num_queues} queues configured");
        }
        if *weight <= 0 {
            anyhow::bail!("weight for queue {index} must be positive, got {weight}");
        }
    }

    Ok(WfqProfile {
        discipline,
        weights,
    })
}

fn parse_index_key_map(raw: BTreeMap<String, i32>) -> Result<BTreeMap<usize, i32>> {
    let mut out = BTreeMap::new();
    for (key, value) in raw {
        let parsed = key
            .trim()
            .parse::<usize>()
            .with_context(|| format!("invalid queue index key: {key}"))?;
        out.insert(parsed, value);
    }
    Ok(out)
}
