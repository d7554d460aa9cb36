//! In-memory todo table behind the stub API.
//!
//! By default the [`TodoStore`] behaves like a public demo API: writes are
//! answered as if they succeeded but are not kept, so a later list still
//! shows the old data. With `persist_writes` enabled it behaves like a
//! regular server. Tests can queue error statuses per [`Endpoint`].

use std::collections::{HashMap, VecDeque};

use serde_json::Value;
use tokio::sync::RwLock;

use taskdeck_proto::task::{Fields, Task, TaskDraft, TaskId, TaskPatch};

/// Routes the stub serves, used as failure-injection keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Endpoint {
    /// `GET /todos`
    List,
    /// `GET /todos/{id}`
    Get,
    /// `POST /todos/add`
    Add,
    /// `PUT /todos/{id}`
    Update,
    /// `DELETE /todos/{id}`
    Delete,
    /// `POST /auth/login`
    Login,
}

#[derive(Debug, Default)]
struct TodoTable {
    todos: Vec<Task>,
    next_id: i64,
    failures: HashMap<Endpoint, VecDeque<u16>>,
    last_authorization: Option<String>,
}

/// Todo table shared by the stub's request handlers.
///
/// Thread-safe via [`RwLock`].
#[derive(Debug)]
pub struct TodoStore {
    table: RwLock<TodoTable>,
    persist_writes: bool,
}

impl Default for TodoStore {
    fn default() -> Self {
        Self::new(false)
    }
}

impl TodoStore {
    /// Creates an empty table.
    #[must_use]
    pub fn new(persist_writes: bool) -> Self {
        Self::with_todos(Vec::new(), persist_writes)
    }

    /// Creates a table holding `todos`; new ids continue after the largest one.
    #[must_use]
    pub fn with_todos(todos: Vec<Task>, persist_writes: bool) -> Self {
        let next_id = todos.iter().map(|t| t.id.get()).max().unwrap_or(0).saturating_add(1);
        Self {
            table: RwLock::new(TodoTable {
                todos,
                next_id,
                ..TodoTable::default()
            }),
            persist_writes,
        }
    }

    /// Creates a table with `count` generated sample todos (ids `1..=count`).
    #[must_use]
    pub fn seeded(count: usize, persist_writes: bool) -> Self {
        let count = i64::try_from(count).unwrap_or(i64::MAX);
        let todos = (1..=count).map(sample_todo).collect();
        Self::with_todos(todos, persist_writes)
    }

    /// Whether writes change what later reads return.
    #[must_use]
    pub const fn persists_writes(&self) -> bool {
        self.persist_writes
    }

    /// All todos in insertion order.
    pub async fn list(&self) -> Vec<Task> {
        self.table.read().await.todos.clone()
    }

    /// One todo by id.
    pub async fn get(&self, id: TaskId) -> Option<Task> {
        self.table
            .read()
            .await
            .todos
            .iter()
            .find(|t| t.id == id)
            .cloned()
    }

    /// Creates a todo and returns it with its assigned id.
    ///
    /// Without persistence the same id is handed out again next time.
    pub async fn add(&self, draft: TaskDraft) -> Task {
        let mut table = self.table.write().await;
        let task = Task::from_draft(TaskId::new(table.next_id), draft);
        if self.persist_writes {
            table.next_id += 1;
            table.todos.push(task.clone());
        }
        tracing::debug!(id = %task.id, persisted = self.persist_writes, "todo added");
        task
    }

    /// Applies `patch` to a todo and returns the result, or `None` if the id
    /// is unknown.
    pub async fn update(&self, id: TaskId, patch: &TaskPatch) -> Option<Task> {
        let mut table = self.table.write().await;
        let existing = table.todos.iter_mut().find(|t| t.id == id)?;
        let mut updated = existing.clone();
        updated.apply_patch(patch);
        if self.persist_writes {
            *existing = updated.clone();
        }
        tracing::debug!(%id, persisted = self.persist_writes, "todo updated");
        Some(updated)
    }

    /// Deletes a todo and returns it, or `None` if the id is unknown.
    pub async fn delete(&self, id: TaskId) -> Option<Task> {
        let mut table = self.table.write().await;
        let index = table.todos.iter().position(|t| t.id == id)?;
        let task = if self.persist_writes {
            table.todos.remove(index)
        } else {
            table.todos[index].clone()
        };
        tracing::debug!(%id, persisted = self.persist_writes, "todo deleted");
        Some(task)
    }

    /// Makes the next request to `endpoint` fail with `status`.
    pub async fn fail_next(&self, endpoint: Endpoint, status: u16) {
        self.table
            .write()
            .await
            .failures
            .entry(endpoint)
            .or_default()
            .push_back(status);
    }

    /// Takes the queued failure status for `endpoint`, if any.
    pub async fn take_failure(&self, endpoint: Endpoint) -> Option<u16> {
        self.table
            .write()
            .await
            .failures
            .get_mut(&endpoint)
            .and_then(VecDeque::pop_front)
    }

    /// Records the `Authorization` header of the latest request.
    pub async fn record_authorization(&self, header: Option<String>) {
        self.table.write().await.last_authorization = header;
    }

    /// `Authorization` header of the latest request.
    pub async fn last_authorization(&self) -> Option<String> {
        self.table.read().await.last_authorization.clone()
    }
}

fn sample_todo(id: i64) -> Task {
    let mut fields = Fields::new();
    fields.insert("todo".into(), Value::from(format!("Sample task {id}")));
    fields.insert("completed".into(), Value::from(id % 3 == 0));
    fields.insert("userId".into(), Value::from(id % 10 + 1));
    Task {
        id: TaskId::new(id),
        fields,
    }
}
