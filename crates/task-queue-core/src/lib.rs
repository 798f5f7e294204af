mod task;
mod store;
mod error;

pub use task::{Task, TaskId, TaskState, LeasedTask};
pub use store::{Queue, QueueStore, StoreStats};
pub use error::{TaskError, Result};

/// Largest payload accepted by `ADD`, in bytes.
pub const MAX_PAYLOAD_SIZE: usize = 1_000_000;

/// Default lease visibility timeout in seconds.
pub const DEFAULT_VISIBILITY_TIMEOUT_SECS: u64 = 300;
