//! Task data model for `TaskDeck`.
//!
//! A [`Task`] carries exactly one field the engine understands, its
//! [`TaskId`]. Everything else is an opaque JSON payload owned by the
//! remote API and the presentation layer, so the model never assumes a
//! fixed schema beyond `id`.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Wire name of the identifier field.
pub const ID_FIELD: &str = "id";

/// Field holding the task text on the default API.
pub const TEXT_FIELD: &str = "todo";

/// Alternate text field used by form-style payloads.
pub const TITLE_FIELD: &str = "title";

/// Boolean completion flag on the default API.
pub const COMPLETED_FIELD: &str = "completed";

/// Free-form workflow status (`To Do`, `In Progress`, `Done`).
pub const STATUS_FIELD: &str = "status";

/// Opaque domain payload of a task.
pub type Fields = Map<String, Value>;

/// Integer task identifier, assigned either by the server or by the local
/// temp-id allocator (never both for the same task).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(i64);

impl TaskId {
    /// Wraps a raw integer identifier.
    #[must_use]
    pub const fn new(raw: i64) -> Self {
        Self(raw)
    }

    /// Returns the raw integer value.
    #[must_use]
    pub const fn get(self) -> i64 {
        self.0
    }

    /// Returns the identifier immediately after this one.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0.saturating_add(1))
    }
}

impl From<i64> for TaskId {
    fn from(raw: i64) -> Self {
        Self(raw)
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for TaskId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse().map(Self)
    }
}

/// Errors raised before any state change when a payload is incomplete.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    /// A required field is absent, `null`, or blank.
    #[error("{0} is required")]
    MissingField(String),
    /// A status string did not name a known status.
    #[error("unknown status: {0}")]
    UnknownStatus(String),
}

/// A task as exposed by the canonical list.
///
/// Only `id` is interpreted; the remaining keys are flattened into
/// [`fields`](Self::fields) and round-trip untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Unique identifier.
    pub id: TaskId,
    /// Domain payload (everything except `id`).
    #[serde(flatten)]
    pub fields: Fields,
}

impl Task {
    /// Builds a task from an identifier and a draft payload.
    #[must_use]
    pub fn from_draft(id: TaskId, draft: TaskDraft) -> Self {
        Self {
            id,
            fields: draft.into_fields(),
        }
    }

    /// Returns a raw payload field.
    #[must_use]
    pub fn field(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// Returns the task text, preferring `todo` over `title`.
    #[must_use]
    pub fn text(&self) -> Option<&str> {
        self.fields
            .get(TEXT_FIELD)
            .or_else(|| self.fields.get(TITLE_FIELD))
            .and_then(Value::as_str)
    }

    /// Returns the boolean completion flag (`false` when absent).
    #[must_use]
    pub fn completed(&self) -> bool {
        self.fields
            .get(COMPLETED_FIELD)
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    /// Derives the workflow status.
    ///
    /// An explicit `status` string wins; otherwise `completed == true`
    /// maps to [`TaskStatus::Done`] and anything else to [`TaskStatus::ToDo`].
    #[must_use]
    pub fn status(&self) -> TaskStatus {
        self.fields
            .get(STATUS_FIELD)
            .and_then(Value::as_str)
            .and_then(|s| s.parse().ok())
            .unwrap_or(if self.completed() {
                TaskStatus::Done
            } else {
                TaskStatus::ToDo
            })
    }

    /// Shallow-overwrites top-level fields with the patch contents.
    ///
    /// An `id` key in the patch is ignored; ids are never rewritten by updates.
    pub fn apply_patch(&mut self, patch: &TaskPatch) {
        for (key, value) in patch.fields() {
            if key == ID_FIELD {
                continue;
            }
            self.fields.insert(key.clone(), value.clone());
        }
    }
}

/// Payload for a new task: every domain field, no `id`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskDraft(Fields);

impl TaskDraft {
    /// Creates an empty draft.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style field setter.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(key, value);
        self
    }

    /// Sets a field. Setting `id` is a no-op.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        let key = key.into();
        if key != ID_FIELD {
            self.0.insert(key, value.into());
        }
    }

    /// Borrows the payload.
    #[must_use]
    pub const fn fields(&self) -> &Fields {
        &self.0
    }

    /// Consumes the draft, returning its payload.
    #[must_use]
    pub fn into_fields(self) -> Fields {
        self.0
    }

    /// Checks that every required field is present, non-null and, for
    /// strings, not blank.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::MissingField`] naming the first missing field.
    pub fn validate<S: AsRef<str>>(&self, required: &[S]) -> Result<(), ValidationError> {
        for name in required {
            let name = name.as_ref();
            let present = match self.0.get(name) {
                None | Some(Value::Null) => false,
                Some(Value::String(s)) => !s.trim().is_empty(),
                Some(_) => true,
            };
            if !present {
                return Err(ValidationError::MissingField(name.to_string()));
            }
        }
        Ok(())
    }
}

impl From<Fields> for TaskDraft {
    fn from(mut fields: Fields) -> Self {
        fields.remove(ID_FIELD);
        Self(fields)
    }
}

/// Partial payload applied as a shallow field overwrite.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskPatch(Fields);

impl TaskPatch {
    /// Creates an empty patch.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style field setter.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(key, value);
        self
    }

    /// Sets a field. Setting `id` is a no-op.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        let key = key.into();
        if key != ID_FIELD {
            self.0.insert(key, value.into());
        }
    }

    /// Borrows the payload.
    #[must_use]
    pub const fn fields(&self) -> &Fields {
        &self.0
    }

    /// Returns `true` if the patch changes nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Fields> for TaskPatch {
    fn from(mut fields: Fields) -> Self {
        fields.remove(ID_FIELD);
        Self(fields)
    }
}

/// Workflow status shown by the task list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskStatus {
    /// Not started.
    #[serde(rename = "To Do")]
    ToDo,
    /// Being worked on.
    #[serde(rename = "In Progress")]
    InProgress,
    /// Finished.
    #[serde(rename = "Done")]
    Done,
}

impl TaskStatus {
    /// Display label, identical to the wire value.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ToDo => "To Do",
            Self::InProgress => "In Progress",
            Self::Done => "Done",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s
            .trim()
            .chars()
            .filter(|c| !matches!(c, ' ' | '-' | '_'))
            .flat_map(char::to_lowercase)
            .collect();
        match normalized.as_str() {
            "todo" => Ok(Self::ToDo),
            "inprogress" => Ok(Self::InProgress),
            "done" => Ok(Self::Done),
            _ => Err(ValidationError::UnknownStatus(s.to_string())),
        }
    }
}

/// Status filter applied on top of the canonical list.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StatusFilter {
    /// Keep every task.
    #[default]
    All,
    /// Keep tasks with the given status.
    Only(TaskStatus),
}

impl StatusFilter {
    /// Returns `true` if the task passes the filter.
    #[must_use]
    pub fn matches(self, task: &Task) -> bool {
        match self {
            Self::All => true,
            Self::Only(status) => task.status() == status,
        }
    }

    /// Filters a list, preserving order.
    #[must_use]
    pub fn apply(self, tasks: &[Task]) -> Vec<Task> {
        tasks.iter().filter(|t| self.matches(t)).cloned().collect()
    }
}

impl FromStr for StatusFilter {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.trim().eq_ignore_ascii_case("all") {
            Ok(Self::All)
        } else {
            s.parse().map(Self::Only)
        }
    }
}
