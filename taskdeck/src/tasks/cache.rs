//! In-memory snapshot that consumers read.
//!
//! [`TaskCache`] holds exactly one canonical list, one loading flag and one
//! error slot. Refreshes are tagged with a monotonic generation: starting a
//! refresh or an optimistic mutation bumps it, and a refresh result is only
//! applied if its generation is still current. A superseded response can
//! therefore never overwrite newer state.

use parking_lot::Mutex;
use tokio::sync::mpsc;

use taskdeck_proto::task::{Task, TaskId};

use crate::gateway::GatewayError;

/// Change notifications delivered to [`TaskCache::subscribe`] listeners.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheEvent {
    /// The canonical list was replaced or patched; carries the new length.
    SnapshotChanged(usize),
    /// The loading flag flipped.
    LoadingChanged(bool),
    /// The error slot changed; carries the rendered error, if any.
    ErrorChanged(Option<String>),
}

/// Handle for one in-flight refresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefreshTicket(u64);

/// Result of handing a refresh result back to the cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// The merged list replaced the snapshot.
    Applied {
        /// Number of tasks now in the snapshot.
        count: usize,
    },
    /// The fetch failed; the snapshot is untouched and the error slot set.
    Failed(GatewayError),
    /// A newer refresh or mutation started meanwhile; the result was dropped.
    Superseded,
}

#[derive(Debug, Default)]
struct CacheState {
    tasks: Vec<Task>,
    loading: bool,
    error: Option<GatewayError>,
    generation: u64,
    listeners: Vec<mpsc::UnboundedSender<CacheEvent>>,
}

impl CacheState {
    fn publish(&mut self, event: &CacheEvent) {
        self.listeners.retain(|tx| tx.send(event.clone()).is_ok());
    }

    fn set_loading(&mut self, loading: bool) {
        if self.loading != loading {
            self.loading = loading;
            self.publish(&CacheEvent::LoadingChanged(loading));
        }
    }

    fn set_error(&mut self, error: Option<GatewayError>) {
        if self.error != error {
            let rendered = error.as_ref().map(ToString::to_string);
            self.error = error;
            self.publish(&CacheEvent::ErrorChanged(rendered));
        }
    }

    fn set_tasks(&mut self, tasks: Vec<Task>) {
        self.tasks = tasks;
        let len = self.tasks.len();
        self.publish(&CacheEvent::SnapshotChanged(len));
    }
}

/// Single-writer store of the canonical list.
///
/// Writers are the reconciler and the mutation coordinator; reads are
/// unrestricted. No lock is held across an `.await`.
#[derive(Debug, Default)]
pub struct TaskCache {
    state: Mutex<CacheState>,
}

impl TaskCache {
    /// Creates an empty cache (not loading, no error).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of the canonical list.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Task> {
        self.state.lock().tasks.clone()
    }

    /// Replaces the canonical list.
    pub fn set_snapshot(&self, tasks: Vec<Task>) {
        self.state.lock().set_tasks(tasks);
    }

    /// Sets or clears the error slot.
    pub fn set_error(&self, error: Option<GatewayError>) {
        self.state.lock().set_error(error);
    }

    /// Returns the current error, if any.
    #[must_use]
    pub fn error(&self) -> Option<GatewayError> {
        self.state.lock().error.clone()
    }

    /// Returns `true` while the current refresh is in flight.
    #[must_use]
    pub fn is_loading(&self) -> bool {
        self.state.lock().loading
    }

    /// Registers a listener for [`CacheEvent`]s.
    ///
    /// Dropping the receiver unsubscribes it.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<CacheEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.state.lock().listeners.push(tx);
        rx
    }

    /// Applies `f` to the canonical list under the lock and notifies listeners.
    pub fn update<R>(&self, f: impl FnOnce(&mut Vec<Task>) -> R) -> R {
        let mut state = self.state.lock();
        let result = f(&mut state.tasks);
        let len = state.tasks.len();
        state.publish(&CacheEvent::SnapshotChanged(len));
        result
    }

    /// Puts the entry for `id` back to how it was in `before`.
    ///
    /// Any current entry with `id` is removed; if `before` had one, it is
    /// reinserted right after its nearest predecessor (in `before`) that is
    /// still present. Entries for other ids are left alone, so a rollback
    /// never undoes a concurrent optimistic change elsewhere. When nothing
    /// else changed, the result equals `before` exactly.
    pub fn restore_entry(&self, before: &[Task], id: TaskId) {
        self.update(|tasks| {
            tasks.retain(|t| t.id != id);
            let Some(pos) = before.iter().position(|t| t.id == id) else {
                return;
            };
            let index = before[..pos]
                .iter()
                .rev()
                .find_map(|prev| tasks.iter().position(|t| t.id == prev.id))
                .map_or(0, |i| i + 1);
            tasks.insert(index, before[pos].clone());
        });
    }

    /// Returns `true` if a task with `id` is in the canonical list.
    #[must_use]
    pub fn contains(&self, id: TaskId) -> bool {
        self.state.lock().tasks.iter().any(|t| t.id == id)
    }

    /// Returns the task with `id`, if present.
    #[must_use]
    pub fn get(&self, id: TaskId) -> Option<Task> {
        self.state.lock().tasks.iter().find(|t| t.id == id).cloned()
    }

    /// Returns every id in the canonical list.
    #[must_use]
    pub fn ids(&self) -> Vec<TaskId> {
        self.state.lock().tasks.iter().map(|t| t.id).collect()
    }

    /// Current refresh generation.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.state.lock().generation
    }

    /// Starts a refresh: bumps the generation and raises the loading flag.
    pub fn begin_refresh(&self) -> RefreshTicket {
        let mut state = self.state.lock();
        state.generation += 1;
        state.set_loading(true);
        RefreshTicket(state.generation)
    }

    /// Invalidates every in-flight refresh without starting a new one.
    ///
    /// Called when an optimistic mutation enters Pending. Returns `true` if a
    /// refresh was in flight; its result is lost and the caller owes a reload.
    pub fn supersede_refreshes(&self) -> bool {
        let mut state = self.state.lock();
        let was_loading = state.loading;
        state.generation += 1;
        state.set_loading(false);
        was_loading
    }

    /// Hands back the result of a refresh started with `ticket`.
    ///
    /// The generation check and the write happen under one lock, so no
    /// writer can slip in between them.
    pub fn complete_refresh(
        &self,
        ticket: RefreshTicket,
        result: Result<Vec<Task>, GatewayError>,
    ) -> RefreshOutcome {
        let mut state = self.state.lock();
        if ticket.0 != state.generation {
            return RefreshOutcome::Superseded;
        }
        state.set_loading(false);
        match result {
            Ok(tasks) => {
                let count = tasks.len();
                state.set_error(None);
                state.set_tasks(tasks);
                RefreshOutcome::Applied { count }
            }
            Err(e) => {
                state.set_error(Some(e.clone()));
                RefreshOutcome::Failed(e)
            }
        }
    }
}
