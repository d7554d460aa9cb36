//! Consumer-facing entry point.
//!
//! [`TaskSession`] wires a key-value store, an overlay, a cache and a
//! gateway together and exposes the query and mutation surface a UI needs:
//! read the canonical list, watch loading and error state, refresh, and
//! add / update / delete optimistically.

use std::sync::Arc;

use tokio::sync::mpsc;

use taskdeck_proto::task::{StatusFilter, Task, TaskDraft, TaskId, TaskPatch};

use crate::gateway::{GatewayError, TaskGateway};
use crate::storage::KeyValueStore;
use crate::tasks::{
    CacheEvent, MutationCoordinator, MutationEvent, OverlayStore, RefreshOutcome, TaskCache,
    TaskError,
};

/// Tunables for a [`TaskSession`].
#[derive(Debug, Clone)]
pub struct SessionSettings {
    /// Fields a draft must carry before it is accepted.
    pub required_fields: Vec<String>,
    /// Capacity of the mutation event channel.
    pub event_buffer: usize,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            required_fields: vec!["todo".to_string()],
            event_buffer: 64,
        }
    }
}

/// One user's view of the task list.
pub struct TaskSession<S: KeyValueStore, G: TaskGateway> {
    overlay: Arc<OverlayStore<S>>,
    cache: Arc<TaskCache>,
    coordinator: MutationCoordinator<S, G>,
}

impl<S: KeyValueStore, G: TaskGateway> TaskSession<S, G> {
    /// Creates a session over `store` and `gateway`.
    ///
    /// The cache starts empty; call [`refresh`](Self::refresh) to load it.
    /// Returns the session and the receiver for [`MutationEvent`]s.
    pub fn new(
        store: S,
        gateway: G,
        settings: SessionSettings,
    ) -> (Self, mpsc::Receiver<MutationEvent>) {
        let overlay = Arc::new(OverlayStore::new(store));
        let cache = Arc::new(TaskCache::new());
        let (coordinator, events) = MutationCoordinator::new(
            Arc::clone(&overlay),
            Arc::clone(&cache),
            Arc::new(gateway),
            settings.required_fields,
            settings.event_buffer,
        );
        let session = Self {
            overlay,
            cache,
            coordinator,
        };
        (session, events)
    }

    /// The canonical list.
    #[must_use]
    pub fn get_tasks(&self) -> Vec<Task> {
        self.cache.snapshot()
    }

    /// The canonical list narrowed to one status, in canonical order.
    #[must_use]
    pub fn get_tasks_filtered(&self, filter: StatusFilter) -> Vec<Task> {
        filter.apply(&self.cache.snapshot())
    }

    /// `true` while a refresh is in flight.
    #[must_use]
    pub fn is_loading(&self) -> bool {
        self.cache.is_loading()
    }

    /// Error of the last failed refresh, cleared by the next successful one.
    #[must_use]
    pub fn get_error(&self) -> Option<GatewayError> {
        self.cache.error()
    }

    /// Re-fetches the remote list and merges it with the overlay.
    pub async fn refresh(&self) -> RefreshOutcome {
        self.coordinator.reconciler().refresh().await
    }

    /// Adds a task optimistically.
    ///
    /// # Errors
    ///
    /// [`TaskError::Validation`] before any change, or
    /// [`TaskError::Remote`] after rollback.
    pub async fn add_task(&self, draft: TaskDraft) -> Result<Task, TaskError> {
        self.coordinator.add_task(draft).await
    }

    /// Updates a task optimistically.
    ///
    /// # Errors
    ///
    /// [`TaskError::NotFound`] or [`TaskError::MutationInFlight`] before any
    /// change, or [`TaskError::Remote`] after rollback.
    pub async fn update_task(&self, id: TaskId, patch: TaskPatch) -> Result<Task, TaskError> {
        self.coordinator.update_task(id, patch).await
    }

    /// Deletes a task optimistically. The deletion is remembered locally
    /// even if the server keeps listing the task.
    ///
    /// # Errors
    ///
    /// [`TaskError::MutationInFlight`] before any change, or
    /// [`TaskError::Remote`] after rollback.
    pub async fn delete_task(&self, id: TaskId) -> Result<(), TaskError> {
        self.coordinator.delete_task(id).await
    }

    /// Registers a listener for snapshot, loading and error changes.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<CacheEvent> {
        self.cache.subscribe()
    }

    /// The underlying coordinator, for callers that drive the Pending and
    /// settle halves separately.
    pub const fn coordinator(&self) -> &MutationCoordinator<S, G> {
        &self.coordinator
    }

    /// The persisted overlay.
    pub fn overlay(&self) -> &OverlayStore<S> {
        &self.overlay
    }
}
