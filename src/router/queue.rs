//! Pending-execution queue
//!
//! Ordered by descending priority; equal priorities keep arrival order.
//! Insertion is a linear scan, which is fine at the queue depths the
//! router sees.

use crate::types::{ModelResult, Parameters};
use tokio::sync::oneshot;

/// A request waiting for capacity
#[derive(Debug)]
pub struct QueuedExecution {
    pub tool_name: String,
    pub parameters: Parameters,
    pub priority: i32,
    pub execution_id: String,
    /// Owning backend, resolved at submission
    pub backend: String,
    /// Resolved exactly once: with the real result, a cancellation, or a
    /// backend-gone failure
    pub responder: oneshot::Sender<ModelResult>,
}

#[derive(Debug, Default)]
pub struct PendingQueue {
    entries: Vec<QueuedExecution>,
}

impl PendingQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert before the first entry with strictly lower priority; returns
    /// the insertion position
    pub fn push(&mut self, entry: QueuedExecution) -> usize {
        let position = self
            .entries
            .iter()
            .position(|queued| queued.priority < entry.priority)
            .unwrap_or(self.entries.len());
        self.entries.insert(position, entry);
        position
    }

    /// Remove the head of the queue
    pub fn pop(&mut self) -> Option<QueuedExecution> {
        if self.entries.is_empty() {
            None
        } else {
            Some(self.entries.remove(0))
        }
    }

    pub fn remove(&mut self, execution_id: &str) -> Option<QueuedExecution> {
        let index = self
            .entries
            .iter()
            .position(|queued| queued.execution_id == execution_id)?;
        Some(self.entries.remove(index))
    }

    /// Zero-based position and entry for `execution_id`
    pub fn find(&self, execution_id: &str) -> Option<(usize, &QueuedExecution)> {
        self.entries
            .iter()
            .enumerate()
            .find(|(_, queued)| queued.execution_id == execution_id)
    }

    pub fn contains(&self, execution_id: &str) -> bool {
        self.find(execution_id).is_some()
    }

    /// Take every entry owned by `backend`, keeping the rest in order
    pub fn drain_backend(&mut self, backend: &str) -> Vec<QueuedExecution> {
        let (drained, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut self.entries)
            .into_iter()
            .partition(|queued| queued.backend == backend);
        self.entries = kept;
        drained
    }

    /// Drop entries whose caller stopped waiting; returns how many went
    pub fn prune_abandoned(&mut self) -> usize {
        let before = self.entries.len();
        self.entries.retain(|queued| !queued.responder.is_closed());
        before - self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
