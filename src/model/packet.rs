use std::collections::BTreeMap;

use crate::model::flow::FlowKey;

/// Opaque packet handle: the discipline only ever looks at its length.
pub trait Packet {
    fn len_bytes(&self) -> u64;
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueDiscItem {
    pub packet_len_bytes: u32,
    pub flow: Option<FlowKey>,
    pub metadata: BTreeMap<String, String>,
}

impl QueueDiscItem {
    pub fn new(packet_len_bytes: u32, flow: Option<FlowKey>) -> Self {
        Self {
            packet_len_bytes,
            flow,
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_tag(mut self, key: &str, value: &str) -> Self {
        self.metadata.insert(key.to_string(), value.to_string());
        self
    }

    pub fn tag(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).map(String::as_str)
    }
}

impl Packet for QueueDiscItem {
    fn len_bytes(&self) -> u64 {
        u64::from(self.packet_len_bytes)
    }
}
