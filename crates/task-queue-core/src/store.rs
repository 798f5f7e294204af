use crate::{LeasedTask, Result, Task, TaskId};
use chrono::{DateTime, Duration, Utc};
use std::collections::{BTreeMap, VecDeque};
use tracing::{debug, warn};

/// A named queue: FIFO pending tasks plus the tasks currently leased out.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Queue {
    pending: VecDeque<Task>,
    /// Kept in lease order so expired leases re-enter `pending` in FIFO order
    leased: Vec<Task>,
}

impl Queue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a queue from a persisted pending/leased partition.
    ///
    /// Panics if a task sits in the wrong partition for its state.
    pub fn from_parts(pending: Vec<Task>, leased: Vec<Task>) -> Self {
        assert!(
            pending.iter().all(|t| !t.is_leased()),
            "pending partition contains a leased task"
        );
        assert!(
            leased.iter().all(Task::is_leased),
            "leased partition contains an available task"
        );

        Queue {
            pending: pending.into(),
            leased,
        }
    }

    pub fn pending(&self) -> impl Iterator<Item = &Task> {
        self.pending.iter()
    }

    pub fn leased(&self) -> impl Iterator<Item = &Task> {
        self.leased.iter()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn leased_len(&self) -> usize {
        self.leased.len()
    }

    /// Total tasks held by this queue
    pub fn len(&self) -> usize {
        self.pending.len() + self.leased.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn contains(&self, task_id: &TaskId) -> bool {
        self.pending.iter().any(|t| t.id() == *task_id)
            || self.leased.iter().any(|t| t.id() == *task_id)
    }

    fn remove(&mut self, task_id: &TaskId) -> Option<Task> {
        if let Some(pos) = self.pending.iter().position(|t| t.id() == *task_id) {
            return self.pending.remove(pos);
        }

        if let Some(pos) = self.leased.iter().position(|t| t.id() == *task_id) {
            return Some(self.leased.remove(pos));
        }

        None
    }

    fn requeue_expired(&mut self, now: DateTime<Utc>, timeout: Duration) -> usize {
        let mut requeued = 0;
        let mut still_leased = Vec::with_capacity(self.leased.len());

        for mut task in self.leased.drain(..) {
            assert!(task.is_leased(), "task {} in leased set without a lease", task.id());

            if task.lease_expired(now, timeout) {
                task.release();
                self.pending.push_back(task);
                requeued += 1;
            } else {
                still_leased.push(task);
            }
        }

        self.leased = still_leased;
        requeued
    }
}

/// Point-in-time counters over the whole store
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub queues: usize,
    pub pending: usize,
    pub leased: usize,
}

/// Owns every named queue and every task in the broker.
///
/// Not internally synchronized; the broker serializes access.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueStore {
    queues: BTreeMap<String, Queue>,
}

impl QueueStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a queue under `name`, replacing any queue already there
    pub fn insert_queue(&mut self, name: impl Into<String>, queue: Queue) {
        self.queues.insert(name.into(), queue);
    }

    pub fn queue(&self, name: &str) -> Option<&Queue> {
        self.queues.get(name)
    }

    /// Iterate queues in name order
    pub fn queues(&self) -> impl Iterator<Item = (&str, &Queue)> {
        self.queues.iter().map(|(name, queue)| (name.as_str(), queue))
    }

    fn queue_mut(&mut self, name: &str) -> &mut Queue {
        if !self.queues.contains_key(name) {
            debug!("Creating queue {}", name);
        }
        self.queues.entry(name.to_string()).or_default()
    }

    /// Append a new task to the back of `queue`, creating the queue if needed.
    pub fn add_task(&mut self, queue: &str, length: usize, data: &str) -> Result<TaskId> {
        let task = Task::new(length, data)?;
        let task_id = task.id();

        self.queue_mut(queue).pending.push_back(task);

        debug!("Added task {} to queue {}", task_id, queue);
        Ok(task_id)
    }

    /// Lease the oldest available task in `queue`.
    pub fn get_task(&mut self, queue: &str) -> Option<LeasedTask> {
        self.get_task_at(queue, Utc::now())
    }

    /// Same as [`get_task`](Self::get_task) with an explicit lease timestamp.
    pub fn get_task_at(&mut self, queue: &str, now: DateTime<Utc>) -> Option<LeasedTask> {
        let q = self.queue_mut(queue);
        let mut task = q.pending.pop_front()?;

        task.lease(now);
        let view = LeasedTask::from(&task);
        q.leased.push(task);

        debug!("Leased task {} from queue {}", view.id, queue);
        Some(view)
    }

    /// Remove a task, leased or not. Returns `false` if it does not exist.
    pub fn ack_task(&mut self, queue: &str, task_id: &TaskId) -> bool {
        let Some(q) = self.queues.get_mut(queue) else {
            return false;
        };

        match q.remove(task_id) {
            Some(task) => {
                debug!("Acknowledged task {} ({}) in queue {}", task_id, task.state().as_str(), queue);
                true
            }
            None => false,
        }
    }

    /// Whether `queue` currently holds the task, leased or not.
    pub fn check_task(&self, queue: &str, task_id: &TaskId) -> bool {
        self.queues
            .get(queue)
            .map(|q| q.contains(task_id))
            .unwrap_or(false)
    }

    /// Return every lease older than `timeout` to the back of its queue.
    ///
    /// Returns the number of tasks made available again.
    pub fn sweep_expired(&mut self, now: DateTime<Utc>, timeout: Duration) -> usize {
        let mut total = 0;

        for (name, queue) in self.queues.iter_mut() {
            let requeued = queue.requeue_expired(now, timeout);
            if requeued > 0 {
                warn!("Lease expired for {} task(s) in queue {}, requeued", requeued, name);
            }
            total += requeued;
        }

        total
    }

    pub fn stats(&self) -> StoreStats {
        self.queues.values().fold(
            StoreStats {
                queues: self.queues.len(),
                ..Default::default()
            },
            |mut stats, q| {
                stats.pending += q.pending_len();
                stats.leased += q.leased_len();
                stats
            },
        )
    }

    /// Total tasks across all queues
    pub fn len(&self) -> usize {
        let stats = self.stats();
        stats.pending + stats.leased
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
