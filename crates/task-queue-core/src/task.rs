use crate::{TaskError, Result, MAX_PAYLOAD_SIZE};
use chrono::{DateTime, Duration, Utc};
use std::fmt;
use uuid::Uuid;

/// Unique identifier for a task
pub type TaskId = Uuid;

/// Lifecycle state of a task.
///
/// The lease timestamp lives inside `Leased`, so a leased task can never be
/// observed without one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    /// Waiting in a queue's pending sequence
    Available,
    /// Handed to a worker and awaiting `ACK`
    Leased { leased_at: DateTime<Utc> },
}

impl TaskState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskState::Available => "available",
            TaskState::Leased { .. } => "leased",
        }
    }
}

/// A unit of work: immutable payload plus lifecycle state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Task {
    id: TaskId,
    length: usize,
    data: String,
    state: TaskState,
}

impl Task {
    /// Create a new available task, checking the declared length against the payload.
    pub fn new(length: usize, data: impl Into<String>) -> Result<Self> {
        let data = data.into();

        if length > MAX_PAYLOAD_SIZE {
            return Err(TaskError::PayloadTooLarge {
                max: MAX_PAYLOAD_SIZE,
                actual: length,
            });
        }

        if length != data.len() {
            return Err(TaskError::LengthMismatch {
                declared: length,
                actual: data.len(),
            });
        }

        Ok(Task {
            id: Uuid::new_v4(),
            length,
            data,
            state: TaskState::Available,
        })
    }

    /// Rebuild a task from previously persisted parts.
    ///
    /// No validation is performed beyond what the caller already did when the
    /// task was first created.
    pub fn restore(id: TaskId, length: usize, data: String, state: TaskState) -> Self {
        Task { id, length, data, state }
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn length(&self) -> usize {
        self.length
    }

    pub fn data(&self) -> &str {
        &self.data
    }

    pub fn state(&self) -> TaskState {
        self.state
    }

    pub fn is_leased(&self) -> bool {
        matches!(self.state, TaskState::Leased { .. })
    }

    /// When the current lease started, if any
    pub fn leased_at(&self) -> Option<DateTime<Utc>> {
        match self.state {
            TaskState::Leased { leased_at } => Some(leased_at),
            TaskState::Available => None,
        }
    }

    /// Mark task as leased to a worker
    pub(crate) fn lease(&mut self, now: DateTime<Utc>) {
        debug_assert!(!self.is_leased(), "task {} leased twice", self.id);
        self.state = TaskState::Leased { leased_at: now };
    }

    /// Return a leased task to the available pool
    pub(crate) fn release(&mut self) {
        debug_assert!(self.is_leased(), "released task {} was not leased", self.id);
        self.state = TaskState::Available;
    }

    /// Whether the lease has been held longer than `timeout` as of `now`
    pub fn lease_expired(&self, now: DateTime<Utc>, timeout: Duration) -> bool {
        match self.state {
            TaskState::Leased { leased_at } => now - leased_at > timeout,
            TaskState::Available => false,
        }
    }
}

/// The view of a task handed to a worker by `GET`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeasedTask {
    pub id: TaskId,
    pub length: usize,
    pub data: String,
}

impl From<&Task> for LeasedTask {
    fn from(task: &Task) -> Self {
        LeasedTask {
            id: task.id,
            length: task.length,
            data: task.data.clone(),
        }
    }
}

impl fmt::Display for LeasedTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.id, self.length, self.data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_creation() {
        let task = Task::new(5, "hello").unwrap();
        assert_eq!(task.length(), 5);
        assert_eq!(task.data(), "hello");
        assert_eq!(task.state(), TaskState::Available);
        assert!(task.leased_at().is_none());
    }

    #[test]
    fn test_length_mismatch_rejected() {
        let err = Task::new(10, "abc").unwrap_err();
        assert_eq!(err, TaskError::LengthMismatch { declared: 10, actual: 3 });
    }

    #[test]
    fn test_length_counts_bytes() {
        // "é" is two bytes in UTF-8
        assert!(Task::new(2, "é").is_ok());
        assert!(Task::new(1, "é").is_err());
    }

    #[test]
    fn test_payload_size_limit() {
        let at_limit = "x".repeat(MAX_PAYLOAD_SIZE);
        assert!(Task::new(MAX_PAYLOAD_SIZE, at_limit).is_ok());

        let too_large = "x".repeat(MAX_PAYLOAD_SIZE + 1);
        let err = Task::new(MAX_PAYLOAD_SIZE + 1, too_large).unwrap_err();
        assert!(matches!(err, TaskError::PayloadTooLarge { .. }));
    }

    #[test]
    fn test_small_payloads_accepted() {
        assert!(Task::new(0, "").is_ok());
        assert!(Task::new(1, "a").is_ok());
    }

    #[test]
    fn test_lease_and_release() {
        let mut task = Task::new(3, "abc").unwrap();
        let now = Utc::now();

        task.lease(now);
        assert!(task.is_leased());
        assert_eq!(task.leased_at(), Some(now));

        assert!(!task.lease_expired(now + Duration::seconds(10), Duration::seconds(10)));
        assert!(task.lease_expired(now + Duration::seconds(11), Duration::seconds(10)));

        task.release();
        assert_eq!(task.state(), TaskState::Available);
        assert!(!task.lease_expired(now + Duration::days(1), Duration::seconds(10)));
    }

    #[test]
    fn test_leased_task_display() {
        let task = Task::new(11, "hello world").unwrap();
        let view = LeasedTask::from(&task);
        assert_eq!(view.to_string(), format!("{} 11 hello world", task.id()));
    }
}
