use std::fmt;
use std::str::FromStr;

use crate::model::flow::FlowKey;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum HashPolicy {
    ByDestination,
    BySourcePort,
    #[default]
    Full,
}

impl HashPolicy {
    pub fn as_str(self) -> &'static str {
        match self {
            HashPolicy::ByDestination => "dstaddr",
            HashPolicy::BySourcePort => "srcport",
            HashPolicy::Full => "full",
        }
    }
}

impl fmt::Display for HashPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HashPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "dstaddr" | "dst" | "by_destination" => Ok(Self::ByDestination),
            "srcport" | "sport" | "by_source_port" => Ok(Self::BySourcePort),
            "full" | "all" => Ok(Self::Full),
            other => Err(format!("unsupported wfq hash policy: {other}")),
        }
    }
}

/// Maps a flow to a queue index in `[0, num_queues)`. Packets without a
/// key land in queue 0.
pub fn classify(key: Option<&FlowKey>, policy: HashPolicy, num_queues: usize) -> usize {
    let Some(key) = key else {
        return 0;
    };
    let n = num_queues.max(1) as u32;
    let val = match policy {
        HashPolicy::ByDestination => fold(key.dst_word()),
        HashPolicy::BySourcePort => fold(u32::from(key.src_port)),
        HashPolicy::Full => {
            let ports = (u32::from(key.src_port) << 16) | u32::from(key.dst_port);
            fold(key.dst_word() ^ key.src_word() ^ ports ^ u32::from(key.protocol))
        }
    };
    (val % n) as usize
}

fn fold(val: u32) -> u32 {
    val ^ (val >> 8) ^ (val >> 16) ^ (val >> 24)
}
