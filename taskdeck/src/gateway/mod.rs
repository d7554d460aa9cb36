//! Remote task API abstraction for `TaskDeck`.
//!
//! Defines the [`TaskGateway`] trait that every remote implementation must
//! satisfy. Concrete implementations include:
//! - [`http::HttpGateway`]: JSON over HTTP against the real API
//! - [`scripted::ScriptedGateway`]: in-process server table with failure
//!   injection and call gating, for tests
//!
//! The remote API is eventually consistent: a successful `delete` or
//! `create` is not guaranteed to show up in a later `list`. Callers must
//! not treat gateway success as proof of server state.

pub mod http;
pub mod scripted;

use std::fmt;

use taskdeck_proto::task::{Task, TaskDraft, TaskId, TaskPatch};
use taskdeck_proto::wire::{CodecError, LoginRequest, LoginResponse};

/// Gateway operation, used for logging, failure injection and gating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GatewayOp {
    /// `list()`
    List,
    /// `create(draft)`
    Create,
    /// `update(id, patch)`
    Update,
    /// `delete(id)`
    Delete,
    /// `login(credentials)`
    Login,
}

impl fmt::Display for GatewayOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::List => write!(f, "list"),
            Self::Create => write!(f, "create"),
            Self::Update => write!(f, "update"),
            Self::Delete => write!(f, "delete"),
            Self::Login => write!(f, "login"),
        }
    }
}

/// Errors surfaced by any gateway call.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GatewayError {
    /// Network unreachable, connection reset, or timeout.
    #[error("transport error: {0}")]
    Transport(String),

    /// The server answered with a non-2xx status.
    #[error("server error {status}: {body}")]
    Server {
        /// HTTP status code.
        status: u16,
        /// Response body (possibly truncated).
        body: String,
    },

    /// The mutation target no longer exists on the server.
    #[error("task {0} not found on server")]
    NotFound(TaskId),

    /// The response body did not have the expected shape.
    #[error("parse error: {0}")]
    Parse(String),
}

impl From<CodecError> for GatewayError {
    fn from(e: CodecError) -> Self {
        Self::Parse(e.to_string())
    }
}

/// Async client for the remote task API.
///
/// # Invariant
///
/// Implementations never touch local state; they only translate calls to
/// the remote API and normalize failures into [`GatewayError`].
pub trait TaskGateway: Send + Sync {
    /// Fetches the server's current task list.
    fn list(&self) -> impl std::future::Future<Output = Result<Vec<Task>, GatewayError>> + Send;

    /// Creates a task; the server assigns its id.
    fn create(
        &self,
        draft: &TaskDraft,
    ) -> impl std::future::Future<Output = Result<Task, GatewayError>> + Send;

    /// Applies a partial update to a task.
    ///
    /// Fails with [`GatewayError::NotFound`] if the server no longer has `id`.
    fn update(
        &self,
        id: TaskId,
        patch: &TaskPatch,
    ) -> impl std::future::Future<Output = Result<Task, GatewayError>> + Send;

    /// Deletes a task. Success does not guarantee the id is gone from a
    /// later [`list`](Self::list).
    fn delete(
        &self,
        id: TaskId,
    ) -> impl std::future::Future<Output = Result<(), GatewayError>> + Send;

    /// Exchanges credentials for a user profile and bearer token.
    fn login(
        &self,
        request: &LoginRequest,
    ) -> impl std::future::Future<Output = Result<LoginResponse, GatewayError>> + Send;
}
