//! Persisted local corrections layered over remote state.
//!
//! The [`OverlayStore`] owns two independent containers kept in a
//! [`KeyValueStore`] as JSON:
//! - the *added set* (`localTasks`): full task records created locally,
//!   in insertion order
//! - the *deleted-id set* (`deletedTaskIds`): ids that must never appear
//!   in the merged view
//!
//! Every write goes straight through to the backing store. A malformed value
//! under either key reads as empty. Writes are read-modify-write cycles over
//! a whole container, so they are serialized by a lock local to the overlay.

use std::collections::HashSet;

use parking_lot::Mutex;
use taskdeck_proto::task::{Task, TaskId, TaskPatch};

use crate::storage::KeyValueStore;

/// Storage key of the added set.
pub const ADDED_KEY: &str = "localTasks";

/// Storage key of the deleted-id set.
pub const DELETED_KEY: &str = "deletedTaskIds";

/// Position and contents of an added-set entry, captured for rollback.
#[derive(Debug, Clone, PartialEq)]
pub struct AddedEntry {
    /// Index in insertion order at capture time.
    pub index: usize,
    /// The task record.
    pub task: Task,
}

/// Added set plus deleted-id set over a key-value store.
///
/// Only the mutation coordinator and the reconciler write through this
/// type; reads are unrestricted.
#[derive(Debug)]
pub struct OverlayStore<S: KeyValueStore> {
    store: S,
    /// Held across each read-modify-write.
    writes: Mutex<()>,
}

impl<S: KeyValueStore> OverlayStore<S> {
    /// Wraps a key-value store.
    #[must_use]
    pub fn new(store: S) -> Self {
        Self {
            store,
            writes: Mutex::new(()),
        }
    }

    /// Borrows the backing store.
    #[must_use]
    pub const fn store(&self) -> &S {
        &self.store
    }

    // -- added set ----------------------------------------------------------

    /// Returns the added set in insertion order.
    #[must_use]
    pub fn added(&self) -> Vec<Task> {
        self.read_json(ADDED_KEY)
    }

    /// Returns the added-set entry for `id`, with its position.
    #[must_use]
    pub fn added_entry(&self, id: TaskId) -> Option<AddedEntry> {
        self.added()
            .into_iter()
            .enumerate()
            .find(|(_, t)| t.id == id)
            .map(|(index, task)| AddedEntry { index, task })
    }

    /// Appends a task to the added set.
    ///
    /// If an entry with the same id already exists it is replaced in place,
    /// so ids stay unique within the set.
    pub fn push_added(&self, task: Task) {
        let _writing = self.writes.lock();
        let mut added = self.added();
        match added.iter_mut().find(|t| t.id == task.id) {
            Some(existing) => *existing = task,
            None => added.push(task),
        }
        self.write_json(ADDED_KEY, &added);
    }

    /// Shallow-patches the added-set entry for `id`. Returns `false` if
    /// there is no such entry.
    pub fn patch_added(&self, id: TaskId, patch: &TaskPatch) -> bool {
        let _writing = self.writes.lock();
        let mut added = self.added();
        let Some(task) = added.iter_mut().find(|t| t.id == id) else {
            return false;
        };
        task.apply_patch(patch);
        self.write_json(ADDED_KEY, &added);
        true
    }

    /// Removes the added-set entry for `id`, returning it with its position.
    pub fn remove_added(&self, id: TaskId) -> Option<AddedEntry> {
        let _writing = self.writes.lock();
        let mut added = self.added();
        let index = added.iter().position(|t| t.id == id)?;
        let task = added.remove(index);
        self.write_json(ADDED_KEY, &added);
        Some(AddedEntry { index, task })
    }

    /// Puts a captured entry back.
    ///
    /// An entry that still exists (same id) is overwritten in place;
    /// otherwise it is reinserted at its captured index, clamped to the
    /// current length.
    pub fn restore_added(&self, entry: AddedEntry) {
        let _writing = self.writes.lock();
        let mut added = self.added();
        if let Some(existing) = added.iter_mut().find(|t| t.id == entry.task.id) {
            *existing = entry.task;
        } else {
            let index = entry.index.min(added.len());
            added.insert(index, entry.task);
        }
        self.write_json(ADDED_KEY, &added);
    }

    /// Changes the id of the added-set entry `from` to `to`.
    ///
    /// Returns `false` (and changes nothing) if `from` is absent or `to`
    /// is already used by another entry.
    pub fn relabel_added(&self, from: TaskId, to: TaskId) -> bool {
        let _writing = self.writes.lock();
        let mut added = self.added();
        if from != to && added.iter().any(|t| t.id == to) {
            return false;
        }
        let Some(task) = added.iter_mut().find(|t| t.id == from) else {
            return false;
        };
        task.id = to;
        self.write_json(ADDED_KEY, &added);
        true
    }

    // -- deleted-id set -----------------------------------------------------

    /// Returns the deleted ids in the order they were recorded.
    #[must_use]
    pub fn deleted(&self) -> Vec<TaskId> {
        self.read_json(DELETED_KEY)
    }

    /// Returns the deleted ids as a set.
    #[must_use]
    pub fn deleted_set(&self) -> HashSet<TaskId> {
        self.deleted().into_iter().collect()
    }

    /// Records `id` as deleted. Returns `true` if it was not already recorded.
    pub fn mark_deleted(&self, id: TaskId) -> bool {
        let _writing = self.writes.lock();
        let mut deleted = self.deleted();
        if deleted.contains(&id) {
            return false;
        }
        deleted.push(id);
        self.write_json(DELETED_KEY, &deleted);
        true
    }

    /// Forgets a deletion marker. Returns `true` if it was present.
    pub fn unmark_deleted(&self, id: TaskId) -> bool {
        let _writing = self.writes.lock();
        let mut deleted = self.deleted();
        let before = deleted.len();
        deleted.retain(|d| *d != id);
        if deleted.len() == before {
            return false;
        }
        self.write_json(DELETED_KEY, &deleted);
        true
    }

    // -- helpers ------------------------------------------------------------

    fn read_json<T: serde::de::DeserializeOwned>(&self, key: &str) -> Vec<T> {
        let Some(raw) = self.store.get(key) else {
            return Vec::new();
        };
        serde_json::from_str(&raw).unwrap_or_else(|e| {
            tracing::warn!(key, error = %e, "malformed overlay entry, treating as empty");
            Vec::new()
        })
    }

    fn write_json<T: serde::Serialize>(&self, key: &str, values: &[T]) {
        match serde_json::to_string(values) {
            Ok(raw) => self.store.set(key, &raw),
            Err(e) => tracing::warn!(key, error = %e, "failed to encode overlay entry"),
        }
    }
}
