pub mod active_list;
pub mod classifier;
pub mod controller;
pub mod core;
pub mod error;
pub mod registry;
pub mod subqueue;
pub mod wfq;

pub use active_list::ActiveList;
pub use classifier::{classify, HashPolicy};
pub use controller::WfqController;
pub use self::core::{DisciplineSnapshot, EnqueueOutcome, QueueDiscStats, QueueStats};
pub use error::WfqError;
pub use registry::DisciplineRegistry;
pub use subqueue::SubQueue;
pub use wfq::{DisciplineConfig, QueueCount, WfqDiscipline};
