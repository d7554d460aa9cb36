//! Client-side reconciliation engine for `TaskDeck`.
//!
//! The remote task API is untrusted: deletes may not stick and creates may
//! not show up in later lists. This module keeps a persisted overlay of
//! local corrections ([`overlay`]), merges it over every remote fetch
//! ([`merge`], [`refresh`]), publishes one canonical list ([`cache`]) and
//! applies user edits optimistically with exact rollback ([`coordinator`]).

pub mod cache;
pub mod coordinator;
pub mod merge;
pub mod overlay;
pub mod refresh;

pub use cache::{CacheEvent, RefreshOutcome, TaskCache};
pub use coordinator::{MutationCoordinator, MutationEvent, MutationKind, MutationPhase, OpId};
pub use merge::reconcile;
pub use overlay::OverlayStore;
pub use refresh::Reconciler;

use thiserror::Error;

use taskdeck_proto::task::{TaskId, ValidationError};

use crate::gateway::GatewayError;

/// Errors returned by task mutations.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TaskError {
    /// The payload is missing a required field; nothing was changed.
    #[error("invalid task: {0}")]
    Validation(#[from] ValidationError),
    /// The task is not in the canonical list.
    #[error("task not found: {0}")]
    NotFound(TaskId),
    /// Another mutation on this task is still pending.
    #[error("task {0} already has a pending change")]
    MutationInFlight(TaskId),
    /// The remote call failed and the optimistic change was rolled back.
    #[error("remote call failed: {0}")]
    Remote(#[from] GatewayError),
}
