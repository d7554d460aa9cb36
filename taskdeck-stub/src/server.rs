//! HTTP routes of the stub task API.
//!
//! | Method | Path | Response |
//! |---|---|---|
//! | `GET` | `/todos` | `{"todos": [...], "total", "skip", "limit"}` |
//! | `GET` | `/todos/{id}` | task, or 404 |
//! | `POST` | `/todos/add` | created task (400 without `todo`) |
//! | `PUT` | `/todos/{id}` | updated task, or 404 |
//! | `DELETE` | `/todos/{id}` | task plus `isDeleted: true`, or 404 |
//! | `POST` | `/auth/login` | user profile plus `accessToken` |
//!
//! Error bodies are `{"message": "..."}`.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{Value, json};

use taskdeck_proto::task::{TEXT_FIELD, TaskDraft, TaskId, TaskPatch};
use taskdeck_proto::wire::{LoginRequest, LoginResponse, TodoPage, UserProfile};

use crate::store::{Endpoint, TodoStore};

/// Builds the router over a shared [`TodoStore`].
pub fn router(store: Arc<TodoStore>) -> Router {
    Router::new()
        .route("/todos", get(list_todos))
        .route("/todos/add", post(add_todo))
        .route(
            "/todos/{id}",
            get(get_todo).put(update_todo).delete(delete_todo),
        )
        .route("/auth/login", post(login))
        .with_state(store)
}

/// Starts the stub server with a pre-configured [`TodoStore`].
///
/// Returns the bound address (useful with port 0) and a handle to the
/// serving task.
///
/// # Errors
///
/// Returns an error if the address cannot be bound.
pub async fn start_server_with_state(
    addr: &str,
    store: Arc<TodoStore>,
) -> Result<
    (std::net::SocketAddr, tokio::task::JoinHandle<()>),
    Box<dyn std::error::Error + Send + Sync>,
> {
    let app = router(store);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let bound_addr = listener.local_addr()?;

    let handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!(error = %e, "stub server error");
        }
    });

    Ok((bound_addr, handle))
}

/// Starts the stub server on `127.0.0.1:0` with an empty, non-persistent
/// store.
///
/// # Errors
///
/// Returns an error if no local port can be bound.
pub async fn start_server() -> Result<
    (std::net::SocketAddr, tokio::task::JoinHandle<()>),
    Box<dyn std::error::Error + Send + Sync>,
> {
    start_server_with_state("127.0.0.1:0", Arc::new(TodoStore::default())).await
}

fn message(status: StatusCode, text: impl Into<String>) -> Response {
    (status, Json(json!({ "message": text.into() }))).into_response()
}

/// Records the caller's credential and applies any queued failure.
async fn preamble(store: &TodoStore, endpoint: Endpoint, headers: &HeaderMap) -> Option<Response> {
    let authorization = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    store.record_authorization(authorization).await;

    let status = store.take_failure(endpoint).await?;
    let status = StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    tracing::info!(?endpoint, status = status.as_u16(), "injected failure");
    Some(message(status, "injected failure"))
}

fn parse_id(raw: &str) -> Result<TaskId, Response> {
    raw.parse()
        .map_err(|_| message(StatusCode::BAD_REQUEST, format!("Invalid todo id '{raw}'")))
}

fn not_found(id: TaskId) -> Response {
    message(StatusCode::NOT_FOUND, format!("Todo with id '{id}' not found"))
}

async fn list_todos(State(store): State<Arc<TodoStore>>, headers: HeaderMap) -> Response {
    if let Some(failure) = preamble(&store, Endpoint::List, &headers).await {
        return failure;
    }
    Json(TodoPage::single(store.list().await)).into_response()
}

async fn get_todo(
    State(store): State<Arc<TodoStore>>,
    Path(raw): Path<String>,
    headers: HeaderMap,
) -> Response {
    if let Some(failure) = preamble(&store, Endpoint::Get, &headers).await {
        return failure;
    }
    let id = match parse_id(&raw) {
        Ok(id) => id,
        Err(response) => return response,
    };
    match store.get(id).await {
        Some(task) => Json(task).into_response(),
        None => not_found(id),
    }
}

async fn add_todo(
    State(store): State<Arc<TodoStore>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    if let Some(failure) = preamble(&store, Endpoint::Add, &headers).await {
        return failure;
    }
    let Value::Object(fields) = body else {
        return message(StatusCode::BAD_REQUEST, "Request body must be an object");
    };
    let draft = TaskDraft::from(fields);
    if draft.validate(&[TEXT_FIELD]).is_err() {
        return message(StatusCode::BAD_REQUEST, "Todo is required");
    }
    let task = store.add(draft).await;
    (StatusCode::CREATED, Json(task)).into_response()
}

async fn update_todo(
    State(store): State<Arc<TodoStore>>,
    Path(raw): Path<String>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    if let Some(failure) = preamble(&store, Endpoint::Update, &headers).await {
        return failure;
    }
    let id = match parse_id(&raw) {
        Ok(id) => id,
        Err(response) => return response,
    };
    let Value::Object(fields) = body else {
        return message(StatusCode::BAD_REQUEST, "Request body must be an object");
    };
    match store.update(id, &TaskPatch::from(fields)).await {
        Some(task) => Json(task).into_response(),
        None => not_found(id),
    }
}

async fn delete_todo(
    State(store): State<Arc<TodoStore>>,
    Path(raw): Path<String>,
    headers: HeaderMap,
) -> Response {
    if let Some(failure) = preamble(&store, Endpoint::Delete, &headers).await {
        return failure;
    }
    let id = match parse_id(&raw) {
        Ok(id) => id,
        Err(response) => return response,
    };
    let Some(task) = store.delete(id).await else {
        return not_found(id);
    };
    let mut body = match serde_json::to_value(&task) {
        Ok(value) => value,
        Err(e) => return message(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    };
    if let Value::Object(map) = &mut body {
        map.insert("isDeleted".into(), Value::Bool(true));
    }
    Json(body).into_response()
}

async fn login(
    State(store): State<Arc<TodoStore>>,
    headers: HeaderMap,
    Json(request): Json<LoginRequest>,
) -> Response {
    if let Some(failure) = preamble(&store, Endpoint::Login, &headers).await {
        return failure;
    }
    if request.username.trim().is_empty() || request.password.is_empty() {
        return message(StatusCode::BAD_REQUEST, "Username and password required");
    }
    tracing::info!(username = %request.username, "login");
    Json(LoginResponse {
        user: UserProfile {
            id: 1,
            username: request.username.clone(),
            email: Some(format!("{}@example.com", request.username)),
        },
        access_token: format!("stub-{}", request.username),
    })
    .into_response()
}
