//! Pure merge functions for building the canonical task list.
//!
//! The remote list is treated as possibly stale and incomplete; the overlay
//! is the best available truth for anything the user just did. Merging is
//! shadowing, never field-by-field: a local record with the same id as a
//! remote one replaces it entirely.
//!
//! Guarantees of [`reconcile`]:
//! - no deleted id appears in the output
//! - every added id that is not deleted appears exactly once, as the
//!   added-set version
//! - ids are unique
//! - added tasks come first, then unshadowed remote tasks, each group in
//!   source order

use std::collections::HashSet;
use std::hash::BuildHasher;

use taskdeck_proto::task::{Task, TaskId};

/// Merges a remote snapshot with the overlay into the canonical list.
///
/// Duplicate ids inside either input keep their first occurrence.
#[must_use]
pub fn reconcile<S: BuildHasher>(
    remote: &[Task],
    added: &[Task],
    deleted: &HashSet<TaskId, S>,
) -> Vec<Task> {
    let mut seen: HashSet<TaskId> = HashSet::with_capacity(added.len() + remote.len());
    added
        .iter()
        .chain(remote)
        .filter(|task| !deleted.contains(&task.id) && seen.insert(task.id))
        .cloned()
        .collect()
}

/// Returns the next temp id: one past the largest known id, and never below 1.
///
/// Nothing lies past `i64::MAX`, so when that id is taken the lowest unused
/// positive id is returned instead.
#[must_use]
pub fn next_temp_id<I: IntoIterator<Item = TaskId>>(known: I) -> TaskId {
    let mut positive: Vec<i64> = known
        .into_iter()
        .map(TaskId::get)
        .filter(|&id| id > 0)
        .collect();
    match positive.iter().max() {
        None => TaskId::new(1),
        Some(&max) if max < i64::MAX => TaskId::new(max + 1),
        Some(_) => {
            positive.sort_unstable();
            positive.dedup();
            let mut free = 1;
            for id in positive {
                if id != free {
                    break;
                }
                free = free.saturating_add(1);
            }
            TaskId::new(free)
        }
    }
}

/// Returns `true` if every id in `tasks` is distinct.
#[must_use]
pub fn ids_unique(tasks: &[Task]) -> bool {
    let mut seen = HashSet::with_capacity(tasks.len());
    tasks.iter().all(|t| seen.insert(t.id))
}
