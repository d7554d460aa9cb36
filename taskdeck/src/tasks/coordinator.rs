//! Optimistic add / update / delete.
//!
//! Every mutation runs the same small state machine:
//!
//! ```text
//! Idle -> Pending (cache + overlay changed) -> Committed | RolledBack
//! ```
//!
//! The Pending half (`begin_*`) is synchronous: it validates, captures the
//! pre-mutation snapshot, applies the optimistic change to the cache and
//! the persisted overlay, and returns a ticket. The second half
//! (`settle_*`) performs the remote call and commits or rolls back.
//! [`MutationEvent`]s are emitted on every transition so a UI can show
//! pending / success / failure notices.
//!
//! At most one mutation per task id is in flight; a second one on the same
//! id fails with [`TaskError::MutationInFlight`] before touching any state.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use uuid::Uuid;

use taskdeck_proto::task::{Task, TaskDraft, TaskId, TaskPatch};

use crate::gateway::{GatewayError, TaskGateway};
use crate::storage::KeyValueStore;

use super::TaskError;
use super::cache::TaskCache;
use super::merge::next_temp_id;
use super::overlay::{AddedEntry, OverlayStore};
use super::refresh::Reconciler;

/// Identifier of one optimistic operation (UUID v7, time-ordered).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OpId(Uuid);

impl OpId {
    fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl fmt::Display for OpId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Which mutation an event belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationKind {
    /// Optimistic create.
    Add,
    /// Optimistic partial update.
    Update,
    /// Optimistic delete.
    Delete,
}

impl fmt::Display for MutationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Add => write!(f, "add"),
            Self::Update => write!(f, "update"),
            Self::Delete => write!(f, "delete"),
        }
    }
}

/// Transaction state reported in a [`MutationEvent`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MutationPhase {
    /// The optimistic change is visible; the remote call is outstanding.
    Pending,
    /// The remote call succeeded.
    Committed,
    /// The remote call failed and the optimistic change was undone.
    RolledBack {
        /// Rendered remote error.
        reason: String,
    },
}

/// Notification emitted on every mutation state transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutationEvent {
    /// Operation this event belongs to.
    pub op_id: OpId,
    /// Kind of mutation.
    pub kind: MutationKind,
    /// Task the mutation targets (the temp id for adds, until commit).
    pub task_id: TaskId,
    /// New state.
    pub phase: MutationPhase,
}

#[derive(Debug, Default)]
struct InFlight {
    ids: HashSet<TaskId>,
    last_temp: Option<TaskId>,
}

/// Releases a task id from the in-flight set when dropped.
#[derive(Debug)]
struct InFlightGuard {
    state: Arc<Mutex<InFlight>>,
    id: TaskId,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.state.lock().ids.remove(&self.id);
    }
}

/// Fields shared by every pending ticket.
#[derive(Debug)]
struct Ticket {
    op_id: OpId,
    task_id: TaskId,
    before: Vec<Task>,
    /// A refresh was cancelled when this mutation went Pending.
    reload: bool,
    _guard: InFlightGuard,
}

/// An add in the Pending state.
#[derive(Debug)]
#[must_use = "a pending add must be settled"]
pub struct PendingAdd {
    ticket: Ticket,
    draft: TaskDraft,
}

impl PendingAdd {
    /// Operation id.
    pub const fn op_id(&self) -> OpId {
        self.ticket.op_id
    }

    /// Temp id the optimistic task was given.
    pub const fn temp_id(&self) -> TaskId {
        self.ticket.task_id
    }
}

/// An update in the Pending state.
#[derive(Debug)]
#[must_use = "a pending update must be settled"]
pub struct PendingUpdate {
    ticket: Ticket,
    patch: TaskPatch,
    added_before: Option<AddedEntry>,
}

impl PendingUpdate {
    /// Operation id.
    pub const fn op_id(&self) -> OpId {
        self.ticket.op_id
    }

    /// Target task.
    pub const fn task_id(&self) -> TaskId {
        self.ticket.task_id
    }
}

/// A delete in the Pending state.
#[derive(Debug)]
#[must_use = "a pending delete must be settled"]
pub struct PendingDelete {
    ticket: Ticket,
    added_before: Option<AddedEntry>,
    newly_marked: bool,
}

impl PendingDelete {
    /// Operation id.
    pub const fn op_id(&self) -> OpId {
        self.ticket.op_id
    }

    /// Target task.
    pub const fn task_id(&self) -> TaskId {
        self.ticket.task_id
    }
}

/// Applies optimistic mutations to the cache and overlay, then confirms
/// them against the remote gateway.
///
/// The coordinator and the [`Reconciler`] are the only writers of the cache
/// and the overlay.
pub struct MutationCoordinator<S: KeyValueStore, G: TaskGateway> {
    overlay: Arc<OverlayStore<S>>,
    cache: Arc<TaskCache>,
    gateway: Arc<G>,
    reconciler: Reconciler<S, G>,
    in_flight: Arc<Mutex<InFlight>>,
    required_fields: Vec<String>,
    event_tx: mpsc::Sender<MutationEvent>,
}

impl<S: KeyValueStore, G: TaskGateway> MutationCoordinator<S, G> {
    /// Creates a coordinator.
    ///
    /// Returns the coordinator and a receiver for [`MutationEvent`]s. Events
    /// are dropped (with a debug log) when the receiver lags by more than
    /// `event_buffer` entries.
    pub fn new(
        overlay: Arc<OverlayStore<S>>,
        cache: Arc<TaskCache>,
        gateway: Arc<G>,
        required_fields: Vec<String>,
        event_buffer: usize,
    ) -> (Self, mpsc::Receiver<MutationEvent>) {
        let (event_tx, event_rx) = mpsc::channel(event_buffer.max(1));
        let reconciler = Reconciler::new(
            Arc::clone(&overlay),
            Arc::clone(&cache),
            Arc::clone(&gateway),
        );
        let coordinator = Self {
            overlay,
            cache,
            gateway,
            reconciler,
            in_flight: Arc::new(Mutex::new(InFlight::default())),
            required_fields,
            event_tx,
        };
        (coordinator, event_rx)
    }

    /// The reconciler sharing this coordinator's cache and overlay.
    pub const fn reconciler(&self) -> &Reconciler<S, G> {
        &self.reconciler
    }

    /// Returns `true` if a mutation on `id` is pending.
    #[must_use]
    pub fn is_in_flight(&self, id: TaskId) -> bool {
        self.in_flight.lock().ids.contains(&id)
    }

    // -- add ----------------------------------------------------------------

    /// Validates `draft` and makes it visible under a fresh temp id.
    ///
    /// The optimistic task is appended to the cache and to the added set.
    ///
    /// # Errors
    ///
    /// [`TaskError::Validation`] if a required field is missing; nothing is
    /// changed in that case.
    pub fn begin_add(&self, draft: TaskDraft) -> Result<PendingAdd, TaskError> {
        draft.validate(self.required_fields.as_slice())?;

        let mut in_flight = self.in_flight.lock();
        let known = self
            .cache
            .ids()
            .into_iter()
            .chain(self.overlay.added().into_iter().map(|t| t.id))
            .chain(self.overlay.deleted())
            .chain(in_flight.ids.iter().copied())
            .chain(in_flight.last_temp);
        let temp_id = next_temp_id(known);
        in_flight.last_temp = Some(temp_id);
        in_flight.ids.insert(temp_id);
        drop(in_flight);

        let before = self.cache.snapshot();
        let reload = self.cache.supersede_refreshes();
        let task = Task::from_draft(temp_id, draft.clone());
        self.cache.update(|tasks| tasks.push(task.clone()));
        self.overlay.push_added(task);

        let ticket = self.ticket(temp_id, before, reload);
        tracing::debug!(op_id = %ticket.op_id, %temp_id, "add pending");
        self.emit(&ticket, MutationKind::Add, MutationPhase::Pending);
        Ok(PendingAdd { ticket, draft })
    }

    /// Creates the task remotely and commits or rolls back.
    ///
    /// On success, returns the task as it now appears in the cache (under
    /// the server id when that id was free, otherwise under the temp id).
    ///
    /// # Errors
    ///
    /// [`TaskError::Remote`] after rolling back.
    pub async fn settle_add(&self, pending: PendingAdd) -> Result<Task, TaskError> {
        let PendingAdd { ticket, draft } = pending;
        let temp_id = ticket.task_id;

        match self.gateway.create(&draft).await {
            Ok(created) => {
                let final_id = self.adopt_server_id(temp_id, created.id);
                tracing::info!(
                    op_id = %ticket.op_id,
                    %temp_id,
                    server_id = %created.id,
                    %final_id,
                    "add committed"
                );
                self.emit_with_id(&ticket, final_id, MutationKind::Add, MutationPhase::Committed);
                let task = self
                    .cache
                    .get(final_id)
                    .unwrap_or_else(|| Task::from_draft(final_id, draft));
                drop(ticket);
                self.reconciler.refresh().await;
                Ok(task)
            }
            Err(e) => {
                self.overlay.remove_added(temp_id);
                self.cache.restore_entry(&ticket.before, temp_id);
                let err = self.roll_back(&ticket, MutationKind::Add, e);
                self.reload_if_superseded(ticket).await;
                Err(err)
            }
        }
    }

    /// Runs [`begin_add`](Self::begin_add) and [`settle_add`](Self::settle_add).
    ///
    /// # Errors
    ///
    /// See the two halves.
    pub async fn add_task(&self, draft: TaskDraft) -> Result<Task, TaskError> {
        let pending = self.begin_add(draft)?;
        self.settle_add(pending).await
    }

    /// Relabels the temp entry to `server_id` unless that id is already in
    /// use locally. Returns the id the task ends up under.
    fn adopt_server_id(&self, temp_id: TaskId, server_id: TaskId) -> TaskId {
        if server_id == temp_id {
            return temp_id;
        }
        let in_cache = self.cache.contains(server_id);
        let in_added = self.overlay.added().iter().any(|t| t.id == server_id);
        let in_deleted = self.overlay.deleted_set().contains(&server_id);
        if in_cache || in_added || in_deleted {
            tracing::warn!(
                %temp_id,
                %server_id,
                in_cache,
                in_added,
                in_deleted,
                "server id already known locally, keeping temp id"
            );
            return temp_id;
        }
        if !self.overlay.relabel_added(temp_id, server_id) {
            return temp_id;
        }
        self.cache.update(|tasks| {
            if let Some(task) = tasks.iter_mut().find(|t| t.id == temp_id) {
                task.id = server_id;
            }
        });
        server_id
    }

    // -- update -------------------------------------------------------------

    /// Applies `patch` optimistically to the cache entry and, if present,
    /// the added-set entry for `id`.
    ///
    /// # Errors
    ///
    /// [`TaskError::NotFound`] if `id` is not in the canonical list;
    /// [`TaskError::MutationInFlight`] if another mutation on `id` is
    /// pending. Nothing is changed in either case.
    pub fn begin_update(&self, id: TaskId, patch: TaskPatch) -> Result<PendingUpdate, TaskError> {
        let mut in_flight = self.in_flight.lock();
        if !self.cache.contains(id) {
            return Err(TaskError::NotFound(id));
        }
        if !in_flight.ids.insert(id) {
            return Err(TaskError::MutationInFlight(id));
        }
        drop(in_flight);

        let before = self.cache.snapshot();
        let added_before = self.overlay.added_entry(id);
        let reload = self.cache.supersede_refreshes();
        self.cache.update(|tasks| {
            if let Some(task) = tasks.iter_mut().find(|t| t.id == id) {
                task.apply_patch(&patch);
            }
        });
        if added_before.is_some() {
            self.overlay.patch_added(id, &patch);
        }

        let ticket = self.ticket(id, before, reload);
        tracing::debug!(op_id = %ticket.op_id, task_id = %id, "update pending");
        self.emit(&ticket, MutationKind::Update, MutationPhase::Pending);
        Ok(PendingUpdate {
            ticket,
            patch,
            added_before,
        })
    }

    /// Sends the update and commits or rolls back.
    ///
    /// # Errors
    ///
    /// [`TaskError::Remote`] after rolling back.
    pub async fn settle_update(&self, pending: PendingUpdate) -> Result<Task, TaskError> {
        let PendingUpdate {
            ticket,
            patch,
            added_before,
        } = pending;
        let id = ticket.task_id;

        match self.gateway.update(id, &patch).await {
            Ok(remote) => {
                tracing::info!(op_id = %ticket.op_id, task_id = %id, "update committed");
                self.emit(&ticket, MutationKind::Update, MutationPhase::Committed);
                let task = self.cache.get(id).unwrap_or(remote);
                drop(ticket);
                self.reconciler.refresh().await;
                Ok(task)
            }
            Err(e) => {
                if let Some(entry) = added_before {
                    self.overlay.restore_added(entry);
                }
                self.cache.restore_entry(&ticket.before, id);
                let err = self.roll_back(&ticket, MutationKind::Update, e);
                self.reload_if_superseded(ticket).await;
                Err(err)
            }
        }
    }

    /// Runs [`begin_update`](Self::begin_update) and
    /// [`settle_update`](Self::settle_update).
    ///
    /// # Errors
    ///
    /// See the two halves.
    pub async fn update_task(&self, id: TaskId, patch: TaskPatch) -> Result<Task, TaskError> {
        let pending = self.begin_update(id, patch)?;
        self.settle_update(pending).await
    }

    // -- delete -------------------------------------------------------------

    /// Removes `id` from the cache and the added set and records it in the
    /// deleted-id set.
    ///
    /// The deletion marker is persisted before the remote call and is kept
    /// after a successful commit.
    ///
    /// # Errors
    ///
    /// [`TaskError::MutationInFlight`] if another mutation on `id` is
    /// pending.
    pub fn begin_delete(&self, id: TaskId) -> Result<PendingDelete, TaskError> {
        if !self.in_flight.lock().ids.insert(id) {
            return Err(TaskError::MutationInFlight(id));
        }

        let before = self.cache.snapshot();
        let reload = self.cache.supersede_refreshes();
        self.cache.update(|tasks| tasks.retain(|t| t.id != id));
        let added_before = self.overlay.remove_added(id);
        let newly_marked = self.overlay.mark_deleted(id);

        let ticket = self.ticket(id, before, reload);
        tracing::debug!(op_id = %ticket.op_id, task_id = %id, "delete pending");
        self.emit(&ticket, MutationKind::Delete, MutationPhase::Pending);
        Ok(PendingDelete {
            ticket,
            added_before,
            newly_marked,
        })
    }

    /// Sends the delete and commits or rolls back.
    ///
    /// A server that no longer knows the id counts as a successful delete.
    /// A commit does not refresh unless the Pending step cancelled one.
    ///
    /// # Errors
    ///
    /// [`TaskError::Remote`] after rolling back.
    pub async fn settle_delete(&self, pending: PendingDelete) -> Result<(), TaskError> {
        let PendingDelete {
            ticket,
            added_before,
            newly_marked,
        } = pending;
        let id = ticket.task_id;

        match self.gateway.delete(id).await {
            Ok(()) | Err(GatewayError::NotFound(_)) => {
                tracing::info!(op_id = %ticket.op_id, task_id = %id, "delete committed");
                self.emit(&ticket, MutationKind::Delete, MutationPhase::Committed);
                self.reload_if_superseded(ticket).await;
                Ok(())
            }
            Err(e) => {
                if newly_marked {
                    self.overlay.unmark_deleted(id);
                }
                if let Some(entry) = added_before {
                    self.overlay.restore_added(entry);
                }
                self.cache.restore_entry(&ticket.before, id);
                let err = self.roll_back(&ticket, MutationKind::Delete, e);
                self.reload_if_superseded(ticket).await;
                Err(err)
            }
        }
    }

    /// Runs [`begin_delete`](Self::begin_delete) and
    /// [`settle_delete`](Self::settle_delete).
    ///
    /// # Errors
    ///
    /// See the two halves.
    pub async fn delete_task(&self, id: TaskId) -> Result<(), TaskError> {
        let pending = self.begin_delete(id)?;
        self.settle_delete(pending).await
    }

    // -- helpers ------------------------------------------------------------

    fn ticket(&self, task_id: TaskId, before: Vec<Task>, reload: bool) -> Ticket {
        Ticket {
            op_id: OpId::new(),
            task_id,
            before,
            reload,
            _guard: InFlightGuard {
                state: Arc::clone(&self.in_flight),
                id: task_id,
            },
        }
    }

    /// Releases the ticket, then re-runs the refresh its Pending step
    /// cancelled, if any. Commits of adds and updates refresh anyway.
    async fn reload_if_superseded(&self, ticket: Ticket) {
        let (op_id, reload) = (ticket.op_id, ticket.reload);
        drop(ticket);
        if reload {
            tracing::debug!(%op_id, "reloading after superseded refresh");
            self.reconciler.refresh().await;
        }
    }

    fn roll_back(&self, ticket: &Ticket, kind: MutationKind, error: GatewayError) -> TaskError {
        tracing::warn!(
            op_id = %ticket.op_id,
            %kind,
            task_id = %ticket.task_id,
            error = %error,
            "remote call failed, rolled back"
        );
        self.emit(
            ticket,
            kind,
            MutationPhase::RolledBack {
                reason: error.to_string(),
            },
        );
        TaskError::Remote(error)
    }

    fn emit(&self, ticket: &Ticket, kind: MutationKind, phase: MutationPhase) {
        self.emit_with_id(ticket, ticket.task_id, kind, phase);
    }

    fn emit_with_id(
        &self,
        ticket: &Ticket,
        task_id: TaskId,
        kind: MutationKind,
        phase: MutationPhase,
    ) {
        let event = MutationEvent {
            op_id: ticket.op_id,
            kind,
            task_id,
            phase,
        };
        if let Err(e) = self.event_tx.try_send(event) {
            tracing::debug!(op_id = %ticket.op_id, error = %e, "mutation event dropped");
        }
    }
}
