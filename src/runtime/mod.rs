pub mod config;
pub mod qdisc;
pub mod replay;
