//! JSON wire format for the remote task API.
//!
//! The list endpoint wraps tasks in an envelope (`{"todos": [...], ...}`);
//! create/update answer with a bare task object; login answers with a user
//! profile plus bearer token. A list response without a `todos` key is
//! treated as an empty list.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::task::Task;

/// Envelope key holding the task array in list responses.
pub const LIST_KEY: &str = "todos";

/// Error type for wire encode/decode operations.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// Serialization or deserialization failed.
    #[error("serialization error: {0}")]
    Serialization(String),
    /// The body parsed as JSON but not into the expected shape.
    #[error("unexpected response shape: {0}")]
    UnexpectedShape(String),
}

/// Paged list envelope returned by `GET /todos`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TodoPage {
    /// Tasks on this page.
    #[serde(default)]
    pub todos: Vec<Task>,
    /// Total number of tasks on the server.
    #[serde(default)]
    pub total: u64,
    /// Offset of the first task on this page.
    #[serde(default)]
    pub skip: u64,
    /// Page size.
    #[serde(default)]
    pub limit: u64,
}

impl TodoPage {
    /// Wraps a full list as a single page.
    #[must_use]
    pub fn single(todos: Vec<Task>) -> Self {
        let len = todos.len() as u64;
        Self {
            todos,
            total: len,
            skip: 0,
            limit: len,
        }
    }
}

/// Credentials posted to `POST /auth/login`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginRequest {
    /// Account name.
    pub username: String,
    /// Account password.
    pub password: String,
}

/// Profile of the signed-in user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    /// Server-side user id, also sent as `userId` on create.
    pub id: i64,
    /// Account name.
    pub username: String,
    /// Contact address, if the server returned one.
    #[serde(default)]
    pub email: Option<String>,
}

/// Successful login response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginResponse {
    /// The signed-in user.
    #[serde(flatten)]
    pub user: UserProfile,
    /// Bearer credential attached to subsequent requests.
    #[serde(rename = "accessToken", alias = "token")]
    pub access_token: String,
}

/// Encodes any wire value as JSON bytes.
///
/// # Errors
///
/// Returns `CodecError::Serialization` if the value cannot be serialized.
pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, CodecError> {
    serde_json::to_vec(value).map_err(|e| CodecError::Serialization(e.to_string()))
}

/// Decodes a wire value from JSON bytes.
///
/// # Errors
///
/// Returns `CodecError::Serialization` if the bytes are not valid JSON for `T`.
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, CodecError> {
    serde_json::from_slice(bytes).map_err(|e| CodecError::Serialization(e.to_string()))
}

/// Decodes the task array out of a list response body.
///
/// A JSON object without a `todos` key (or with `null`) yields an empty list.
///
/// # Errors
///
/// Returns `CodecError::Serialization` for invalid JSON, and
/// `CodecError::UnexpectedShape` if the body is not an object, `todos` is
/// not an array, or an element lacks an integer `id`.
pub fn decode_list(bytes: &[u8]) -> Result<Vec<Task>, CodecError> {
    let body: Value = decode(bytes)?;
    let Value::Object(mut envelope) = body else {
        return Err(CodecError::UnexpectedShape(
            "list response is not an object".into(),
        ));
    };
    match envelope.remove(LIST_KEY) {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(todos @ Value::Array(_)) => serde_json::from_value(todos)
            .map_err(|e| CodecError::UnexpectedShape(format!("bad task in list: {e}"))),
        Some(other) => Err(CodecError::UnexpectedShape(format!(
            "`{LIST_KEY}` is not an array: {other}"
        ))),
    }
}

/// Decodes a single task body (create/update responses).
///
/// # Errors
///
/// Returns `CodecError::UnexpectedShape` if the body is not a task object.
pub fn decode_task(bytes: &[u8]) -> Result<Task, CodecError> {
    let body: Value = decode(bytes)?;
    serde_json::from_value(body).map_err(|e| CodecError::UnexpectedShape(e.to_string()))
}
