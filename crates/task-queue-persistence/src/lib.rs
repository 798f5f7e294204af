mod snapshot;

pub use snapshot::{Snapshot, QueueRecord, TaskRecord, TaskStateRecord, SNAPSHOT_VERSION};

use std::path::Path;
use task_queue_core::QueueStore;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Unsupported snapshot version {found} (this build reads up to {supported})")]
    UnsupportedVersion { found: u32, supported: u32 },

    #[error("Duplicate task id in snapshot: {0}")]
    DuplicateTaskId(uuid::Uuid),

    #[error("Corrupt snapshot: {0}")]
    Corrupt(String),
}

pub type Result<T> = std::result::Result<T, PersistenceError>;

/// Write the whole store to `path`, replacing any previous snapshot atomically.
pub fn save(path: impl AsRef<Path>, store: &QueueStore) -> Result<()> {
    Snapshot::capture(store).write_to(path)
}

/// Restore a store from `path`. A missing file yields an empty store.
pub fn load(path: impl AsRef<Path>) -> Result<QueueStore> {
    match Snapshot::read_from(path)? {
        Some(snapshot) => snapshot.into_store(),
        None => Ok(QueueStore::new()),
    }
}
