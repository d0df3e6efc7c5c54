//! Per-conversation generation tasks.
//!
//! At most one task runs per conversation. Registering a new one cancels
//! and replaces whatever was there. A finishing task removes itself only if
//! it is still the registered one, so a late cleanup from a replaced task
//! never evicts its successor.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

struct GenerationTask {
    id: u64,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

pub struct GenerationTasks {
    tasks: DashMap<Uuid, GenerationTask>,
    active: watch::Sender<HashSet<Uuid>>,
    next_id: AtomicU64,
}

impl Default for GenerationTasks {
    fn default() -> Self {
        Self::new()
    }
}

impl GenerationTasks {
    pub fn new() -> Self {
        Self {
            tasks: DashMap::new(),
            active: watch::Sender::new(HashSet::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Reserve a task id and a fresh cancellation token.
    pub fn prepare(&self) -> (u64, CancellationToken) {
        (
            self.next_id.fetch_add(1, Ordering::Relaxed),
            CancellationToken::new(),
        )
    }

    /// Install a spawned task, cancelling the one it replaces. Returns
    /// whether a previous task was replaced.
    pub fn install(
        &self,
        conversation_id: Uuid,
        id: u64,
        cancel: CancellationToken,
        handle: JoinHandle<()>,
    ) -> bool {
        let previous = self
            .tasks
            .insert(conversation_id, GenerationTask { id, cancel, handle });
        self.active.send_modify(|set| {
            set.insert(conversation_id);
        });
        match previous {
            Some(prev) => {
                prev.cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// Cancel the running task, if any. The task keeps its slot until it
    /// unwinds and calls [`GenerationTasks::finish`].
    pub fn cancel(&self, conversation_id: Uuid) -> bool {
        match self.tasks.get(&conversation_id) {
            Some(task) => {
                task.cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// Called by a task as its last act. Returns whether the slot was freed.
    pub fn finish(&self, conversation_id: Uuid, id: u64) -> bool {
        let removed = self
            .tasks
            .remove_if(&conversation_id, |_, t| t.id == id)
            .is_some();
        if removed {
            self.active.send_modify(|set| {
                set.remove(&conversation_id);
            });
        }
        removed
    }

    pub fn is_running(&self, conversation_id: Uuid) -> bool {
        self.tasks.contains_key(&conversation_id)
    }

    /// Number of registered tasks that have not yet completed.
    pub fn live_count(&self, conversation_id: Uuid) -> usize {
        self.tasks
            .get(&conversation_id)
            .map(|t| usize::from(!t.handle.is_finished()))
            .unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn watch_active(&self) -> watch::Receiver<HashSet<Uuid>> {
        self.active.subscribe()
    }

    /// Cancel every task. Used on shutdown.
    pub fn cancel_all(&self) {
        for task in self.tasks.iter() {
            task.cancel.cancel();
        }
    }
}
