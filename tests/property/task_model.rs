//! Property-based tests for the task model and wire decoding.
//!
//! Uses proptest to verify:
//! 1. Random bytes never cause a panic in the decoders (they return `Err`).
//! 2. A patch overwrites exactly its own keys and never the id.
//! 3. The per-status filters partition the list.
//! 4. Status names parse regardless of case and separators.
//! 5. Fields the client does not interpret survive a decode.

use proptest::prelude::*;
use serde_json::{Map, Value, json};

use taskdeck_proto::task::{StatusFilter, Task, TaskId, TaskPatch, TaskStatus};
use taskdeck_proto::wire;

// --- Strategies ---

fn arb_value() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::from),
        any::<i32>().prop_map(Value::from),
        "[a-zA-Z0-9 ]{0,12}".prop_map(Value::from),
    ]
}

/// Field maps over a small key space so tasks and patches overlap.
fn arb_fields() -> impl Strategy<Value = Map<String, Value>> {
    prop::collection::btree_map("(todo|completed|status|userId|note|id)", arb_value(), 0..6)
        .prop_map(|m| m.into_iter().collect())
}

fn arb_task() -> impl Strategy<Value = Task> {
    (any::<i64>(), arb_fields()).prop_map(|(id, mut fields)| {
        fields.remove("id");
        Task {
            id: TaskId::new(id),
            fields,
        }
    })
}

fn arb_status() -> impl Strategy<Value = TaskStatus> {
    prop_oneof![
        Just(TaskStatus::ToDo),
        Just(TaskStatus::InProgress),
        Just(TaskStatus::Done),
    ]
}

// --- Properties ---

proptest! {
    #[test]
    fn decoders_never_panic(bytes in prop::collection::vec(any::<u8>(), 0..256)) {
        let _ = wire::decode_list(&bytes);
        let _ = wire::decode_task(&bytes);
    }

    #[test]
    fn patch_overwrites_only_its_keys(task in arb_task(), patch in arb_fields()) {
        let mut patched = task.clone();
        patched.apply_patch(&TaskPatch::from(patch.clone()));

        prop_assert_eq!(patched.id, task.id);
        for (key, value) in &patched.fields {
            match patch.get(key) {
                Some(new) if key != "id" => prop_assert_eq!(value, new),
                _ => prop_assert_eq!(Some(value), task.fields.get(key)),
            }
        }
    }

    #[test]
    fn status_filters_partition_the_list(tasks in prop::collection::vec(arb_task(), 0..20)) {
        let all = StatusFilter::All.apply(&tasks);
        prop_assert_eq!(all.len(), tasks.len());
        let split: usize = [TaskStatus::ToDo, TaskStatus::InProgress, TaskStatus::Done]
            .into_iter()
            .map(|s| StatusFilter::Only(s).apply(&tasks).len())
            .sum();
        prop_assert_eq!(split, tasks.len());
    }

    #[test]
    fn status_names_parse_loosely(status in arb_status(), upper in any::<bool>(), sep in "[ _-]") {
        let name = status.as_str().replace(' ', &sep);
        let name = if upper { name.to_uppercase() } else { name.to_lowercase() };
        prop_assert_eq!(name.parse::<TaskStatus>().ok(), Some(status));
        prop_assert_eq!(name.parse::<StatusFilter>().ok(), Some(StatusFilter::Only(status)));
    }

    #[test]
    fn uninterpreted_fields_survive_decode(id in 1i64..10_000, extra in arb_value()) {
        let body = json!({"id": id, "todo": "t", "customField": extra.clone()});
        let task = wire::decode_task(body.to_string().as_bytes()).unwrap_or_else(|e| panic!("{e}"));
        prop_assert_eq!(task.id, TaskId::new(id));
        prop_assert_eq!(task.field("customField"), Some(&extra));
    }
}
