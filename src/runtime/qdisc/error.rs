use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WfqError {
    #[error("invalid wfq config: {0}")]
    InvalidConfig(String),
    #[error("queue index {index} out of range, discipline has {num_queues} queues")]
    InvalidIndex { index: usize, num_queues: usize },
    #[error("invalid weight {0}, weights must be positive")]
    InvalidWeight(i32),
    #[error("failed to allocate {requested} queues")]
    OutOfMemory { requested: usize },
    #[error("interface {0} already has a wfq discipline attached")]
    AlreadyAttached(String),
    #[error("interface {0} has no wfq discipline attached")]
    NotAttached(String),
}
