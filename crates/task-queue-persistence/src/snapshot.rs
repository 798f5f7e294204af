use crate::{PersistenceError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::Path;
use task_queue_core::{Queue, QueueStore, Task, TaskState};
use tempfile::NamedTempFile;
use tracing::{debug, info};
use uuid::Uuid;

/// Current on-disk schema version.
///
/// Bump when a change cannot be expressed as a new `#[serde(default)]` field.
pub const SNAPSHOT_VERSION: u32 = 1;

/// Serialized form of the whole queue store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub version: u32,

    /// When the snapshot was taken
    #[serde(default)]
    pub saved_at: Option<DateTime<Utc>>,

    #[serde(default)]
    pub queues: Vec<QueueRecord>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueRecord {
    pub name: String,

    /// Available tasks, front of the queue first
    #[serde(default)]
    pub pending: Vec<TaskRecord>,

    /// Leased tasks in lease order
    #[serde(default)]
    pub leased: Vec<TaskRecord>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStateRecord {
    Available,
    Leased,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub id: Uuid,
    pub length: usize,
    pub data: String,
    pub state: TaskStateRecord,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub leased_at: Option<DateTime<Utc>>,
}

impl From<&Task> for TaskRecord {
    fn from(task: &Task) -> Self {
        let state = match task.state() {
            TaskState::Available => TaskStateRecord::Available,
            TaskState::Leased { .. } => TaskStateRecord::Leased,
        };

        TaskRecord {
            id: task.id(),
            length: task.length(),
            data: task.data().to_string(),
            state,
            leased_at: task.leased_at(),
        }
    }
}

impl TaskRecord {
    fn into_task(self, expected: TaskStateRecord) -> Result<Task> {
        if self.state != expected {
            return Err(PersistenceError::Corrupt(format!(
                "task {} is {:?} but stored with {:?} tasks",
                self.id, self.state, expected
            )));
        }

        if self.length != self.data.len() {
            return Err(PersistenceError::Corrupt(format!(
                "task {} declares {} bytes but holds {}",
                self.id,
                self.length,
                self.data.len()
            )));
        }

        let state = match (self.state, self.leased_at) {
            (TaskStateRecord::Available, _) => TaskState::Available,
            (TaskStateRecord::Leased, Some(leased_at)) => TaskState::Leased { leased_at },
            (TaskStateRecord::Leased, None) => {
                return Err(PersistenceError::Corrupt(format!(
                    "leased task {} has no lease timestamp",
                    self.id
                )));
            }
        };

        Ok(Task::restore(self.id, self.length, self.data, state))
    }
}

impl Snapshot {
    /// Copy the current contents of `store`
    pub fn capture(store: &QueueStore) -> Self {
        let queues = store
            .queues()
            .map(|(name, queue)| QueueRecord {
                name: name.to_string(),
                pending: queue.pending().map(TaskRecord::from).collect(),
                leased: queue.leased().map(TaskRecord::from).collect(),
            })
            .collect();

        Snapshot {
            version: SNAPSHOT_VERSION,
            saved_at: Some(Utc::now()),
            queues,
        }
    }

    /// Rebuild a store, validating ids and the pending/leased partition
    pub fn into_store(self) -> Result<QueueStore> {
        if self.version > SNAPSHOT_VERSION {
            return Err(PersistenceError::UnsupportedVersion {
                found: self.version,
                supported: SNAPSHOT_VERSION,
            });
        }

        let mut store = QueueStore::new();
        let mut seen = HashSet::new();

        for record in self.queues {
            let mut pending = Vec::with_capacity(record.pending.len());
            for task in record.pending {
                if !seen.insert(task.id) {
                    return Err(PersistenceError::DuplicateTaskId(task.id));
                }
                pending.push(task.into_task(TaskStateRecord::Available)?);
            }

            let mut leased = Vec::with_capacity(record.leased.len());
            for task in record.leased {
                if !seen.insert(task.id) {
                    return Err(PersistenceError::DuplicateTaskId(task.id));
                }
                leased.push(task.into_task(TaskStateRecord::Leased)?);
            }

            store.insert_queue(record.name, Queue::from_parts(pending, leased));
        }

        Ok(store)
    }

    /// Write to `path` through a uniquely named sibling temp file and a rename.
    ///
    /// Concurrent writers never share a temp file; the last rename wins.
    pub fn write_to(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        let dir = match path.parent().filter(|p| !p.as_os_str().is_empty()) {
            Some(parent) => {
                fs::create_dir_all(parent)?;
                parent
            }
            None => Path::new("."),
        };

        let bytes = serde_json::to_vec(self)?;

        // Dropped (and removed) on any error before the rename
        let mut file = NamedTempFile::new_in(dir)?;
        file.write_all(&bytes)?;
        file.as_file().sync_all()?;
        file.persist(path).map_err(|e| e.error)?;

        info!(
            "Saved snapshot with {} queue(s) to {:?} ({} bytes)",
            self.queues.len(),
            path,
            bytes.len()
        );
        Ok(())
    }

    /// Read from `path`; `Ok(None)` if the file does not exist
    pub fn read_from(path: impl AsRef<Path>) -> Result<Option<Self>> {
        let path = path.as_ref();

        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("No snapshot at {:?}", path);
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };

        let snapshot: Snapshot = serde_json::from_slice(&bytes)?;
        info!(
            "Read snapshot version {} with {} queue(s) from {:?}",
            snapshot.version,
            snapshot.queues.len(),
            path
        );
        Ok(Some(snapshot))
    }
}
