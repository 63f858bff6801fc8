pub mod flow;
pub mod packet;

pub use flow::{AddressFamily, FlowKey};
pub use packet::{Packet, QueueDiscItem};
