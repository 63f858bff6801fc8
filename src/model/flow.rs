use std::net::{IpAddr, Ipv4Addr};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressFamily {
    Inet,
    Inet6,
}

/// Addressing fields extracted from a packet by the network stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FlowKey {
    pub src: IpAddr,
    pub dst: IpAddr,
    #[serde(default)]
    pub src_port: u16,
    #[serde(default)]
    pub dst_port: u16,
    #[serde(default)]
    pub protocol: u8,
}

impl FlowKey {
    pub fn new(src: IpAddr, dst: IpAddr, src_port: u16, dst_port: u16, protocol: u8) -> Self {
        Self {
            src,
            dst,
            src_port,
            dst_port,
            protocol,
        }
    }

    pub fn to_destination(dst: IpAddr) -> Self {
        Self::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), dst, 0, 0, 0)
    }

    pub fn family(&self) -> AddressFamily {
        match self.dst {
            IpAddr::V4(_) => AddressFamily::Inet,
            IpAddr::V6(_) => AddressFamily::Inet6,
        }
    }

    pub fn src_word(&self) -> u32 {
        address_word(&self.src)
    }

    pub fn dst_word(&self) -> u32 {
        address_word(&self.dst)
    }
}

// IPv6 addresses are reduced to a single word by XOR-ing their four 32-bit words.
fn address_word(addr: &IpAddr) -> u32 {
    match addr {
        IpAddr::V4(v4) => u32::from(*v4),
        IpAddr::V6(v6) => {
            let bits = u128::from(*v6);
            (bits as u32) ^ ((bits >> 32) as u32) ^ ((bits >> 64) as u32) ^ ((bits >> 96) as u32)
        }
    }
}
