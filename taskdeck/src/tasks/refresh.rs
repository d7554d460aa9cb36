//! Refresh pipeline: fetch the remote list, merge with the overlay, publish.

use std::sync::Arc;

use taskdeck_proto::task::Task;

use crate::gateway::TaskGateway;
use crate::storage::KeyValueStore;

use super::cache::{RefreshOutcome, TaskCache};
use super::merge::reconcile;
use super::overlay::OverlayStore;

/// Re-derives the canonical list from a fresh remote fetch and the overlay.
pub struct Reconciler<S: KeyValueStore, G: TaskGateway> {
    overlay: Arc<OverlayStore<S>>,
    cache: Arc<TaskCache>,
    gateway: Arc<G>,
}

impl<S: KeyValueStore, G: TaskGateway> Clone for Reconciler<S, G> {
    fn clone(&self) -> Self {
        Self {
            overlay: Arc::clone(&self.overlay),
            cache: Arc::clone(&self.cache),
            gateway: Arc::clone(&self.gateway),
        }
    }
}

impl<S: KeyValueStore, G: TaskGateway> Reconciler<S, G> {
    /// Creates a reconciler over shared overlay, cache and gateway handles.
    pub const fn new(
        overlay: Arc<OverlayStore<S>>,
        cache: Arc<TaskCache>,
        gateway: Arc<G>,
    ) -> Self {
        Self {
            overlay,
            cache,
            gateway,
        }
    }

    /// Merges `remote` with the current overlay without touching the cache.
    #[must_use]
    pub fn merge(&self, remote: &[Task]) -> Vec<Task> {
        reconcile(remote, &self.overlay.added(), &self.overlay.deleted_set())
    }

    /// Fetches the remote list and replaces the snapshot with the merge.
    ///
    /// The overlay is read after the fetch resolves, so any optimistic change
    /// made while the request was in flight is included. If another refresh
    /// or a mutation started meanwhile, the result is discarded.
    pub async fn refresh(&self) -> RefreshOutcome {
        let ticket = self.cache.begin_refresh();
        tracing::debug!(?ticket, "refresh started");

        let result = self
            .gateway
            .list()
            .await
            .map(|remote| self.merge(&remote));

        let outcome = self.cache.complete_refresh(ticket, result);
        match &outcome {
            RefreshOutcome::Applied { count } => {
                tracing::info!(count, "refresh applied");
            }
            RefreshOutcome::Failed(e) => {
                tracing::warn!(error = %e, "refresh failed, keeping previous snapshot");
            }
            RefreshOutcome::Superseded => {
                tracing::warn!(?ticket, "stale refresh discarded");
            }
        }
        outcome
    }
}
