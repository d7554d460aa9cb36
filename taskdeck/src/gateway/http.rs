//! HTTP implementation of [`TaskGateway`] using `reqwest`.
//!
//! Endpoint layout (relative to the configured base URL):
//!
//! | Call | Request |
//! |---|---|
//! | `list` | `GET todos` |
//! | `create` | `POST todos/add` (draft + `userId`) |
//! | `update` | `PUT todos/{id}` |
//! | `delete` | `DELETE todos/{id}` |
//! | `login` | `POST auth/login` |
//!
//! A bearer credential, when configured, is attached to every request.

use std::time::Duration;

use reqwest::{RequestBuilder, StatusCode};
use serde_json::Value;
use url::Url;

use taskdeck_proto::task::{Task, TaskDraft, TaskId, TaskPatch};
use taskdeck_proto::wire::{self, LoginRequest, LoginResponse};

use super::{GatewayError, GatewayOp, TaskGateway};

/// Wire name of the owner field added to create requests.
const USER_ID_FIELD: &str = "userId";

/// Longest response body kept in a [`GatewayError::Server`].
const MAX_ERROR_BODY: usize = 512;

/// JSON-over-HTTP task gateway.
#[derive(Debug, Clone)]
pub struct HttpGateway {
    client: reqwest::Client,
    base_url: Url,
    credential: Option<String>,
    user_id: i64,
    timeout: Duration,
}

impl HttpGateway {
    /// Creates a gateway rooted at `base_url` with a per-request timeout.
    ///
    /// The base path is treated as a directory, so `https://host/api` and
    /// `https://host/api/` both resolve `todos` to `https://host/api/todos`.
    #[must_use]
    pub fn new(base_url: Url, timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: directory_url(base_url),
            credential: None,
            user_id: 1,
            timeout,
        }
    }

    /// Attaches a bearer credential to every subsequent request.
    #[must_use]
    pub fn with_credential(mut self, token: Option<String>) -> Self {
        self.credential = token.filter(|t| !t.is_empty());
        self
    }

    /// Sets the `userId` sent with create requests.
    #[must_use]
    pub const fn with_user_id(mut self, user_id: i64) -> Self {
        self.user_id = user_id;
        self
    }

    /// The normalized base URL.
    #[must_use]
    pub const fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> Result<Url, GatewayError> {
        self.base_url
            .join(path)
            .map_err(|e| GatewayError::Transport(format!("invalid endpoint {path}: {e}")))
    }

    /// Sends a request and returns the status plus raw body.
    ///
    /// Non-2xx statuses other than 404 become [`GatewayError::Server`]; a 404
    /// is returned to the caller, which knows which id it concerned.
    async fn execute(
        &self,
        op: GatewayOp,
        request: RequestBuilder,
    ) -> Result<(StatusCode, Vec<u8>), GatewayError> {
        let request = match &self.credential {
            Some(token) => request.bearer_auth(token),
            None => request,
        };

        let response = request.timeout(self.timeout).send().await.map_err(|e| {
            tracing::warn!(%op, error = %e, "request failed before a response");
            transport_error(&e)
        })?;

        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|e| transport_error(&e))?
            .to_vec();

        tracing::debug!(%op, status = status.as_u16(), bytes = body.len(), "response received");

        if status.is_success() || status == StatusCode::NOT_FOUND {
            Ok((status, body))
        } else {
            Err(GatewayError::Server {
                status: status.as_u16(),
                body: truncate_body(&body),
            })
        }
    }
}

impl TaskGateway for HttpGateway {
    async fn list(&self) -> Result<Vec<Task>, GatewayError> {
        let url = self.endpoint("todos")?;
        let (status, body) = self
            .execute(GatewayOp::List, self.client.get(url))
            .await?;
        if status == StatusCode::NOT_FOUND {
            return Err(GatewayError::Server {
                status: status.as_u16(),
                body: truncate_body(&body),
            });
        }
        Ok(wire::decode_list(&body)?)
    }

    async fn create(&self, draft: &TaskDraft) -> Result<Task, GatewayError> {
        let url = self.endpoint("todos/add")?;
        let mut payload = draft.fields().clone();
        payload
            .entry(USER_ID_FIELD)
            .or_insert_with(|| Value::from(self.user_id));
        let (status, body) = self
            .execute(GatewayOp::Create, self.client.post(url).json(&payload))
            .await?;
        if status == StatusCode::NOT_FOUND {
            return Err(GatewayError::Server {
                status: status.as_u16(),
                body: truncate_body(&body),
            });
        }
        Ok(wire::decode_task(&body)?)
    }

    async fn update(&self, id: TaskId, patch: &TaskPatch) -> Result<Task, GatewayError> {
        let url = self.endpoint(&format!("todos/{id}"))?;
        let (status, body) = self
            .execute(GatewayOp::Update, self.client.put(url).json(patch.fields()))
            .await?;
        if status == StatusCode::NOT_FOUND {
            return Err(GatewayError::NotFound(id));
        }
        Ok(wire::decode_task(&body)?)
    }

    async fn delete(&self, id: TaskId) -> Result<(), GatewayError> {
        let url = self.endpoint(&format!("todos/{id}"))?;
        let (status, _) = self
            .execute(GatewayOp::Delete, self.client.delete(url))
            .await?;
        if status == StatusCode::NOT_FOUND {
            return Err(GatewayError::NotFound(id));
        }
        Ok(())
    }

    async fn login(&self, request: &LoginRequest) -> Result<LoginResponse, GatewayError> {
        let url = self.endpoint("auth/login")?;
        let (status, body) = self
            .execute(GatewayOp::Login, self.client.post(url).json(request))
            .await?;
        if status == StatusCode::NOT_FOUND {
            return Err(GatewayError::Server {
                status: status.as_u16(),
                body: truncate_body(&body),
            });
        }
        Ok(wire::decode(&body)?)
    }
}

fn transport_error(e: &reqwest::Error) -> GatewayError {
    if e.is_timeout() {
        GatewayError::Transport(format!("request timed out: {e}"))
    } else if e.is_connect() {
        GatewayError::Transport(format!("connection failed: {e}"))
    } else {
        GatewayError::Transport(e.to_string())
    }
}

fn truncate_body(body: &[u8]) -> String {
    let text = String::from_utf8_lossy(body);
    text.chars().take(MAX_ERROR_BODY).collect()
}

/// Ensures the URL path ends with `/` so relative joins append to it.
fn directory_url(mut url: Url) -> Url {
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    url
}
