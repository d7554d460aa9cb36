//! Integration tests for `HttpGateway` against the stub task server.
//!
//! Each test binds the stub on an ephemeral port with its own `TodoStore`,
//! so tests can run in parallel.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::sync::Arc;
use std::time::Duration;

use url::Url;

use taskdeck::gateway::http::HttpGateway;
use taskdeck::gateway::{GatewayError, TaskGateway};
use taskdeck::session::{SessionSettings, TaskSession};
use taskdeck::storage::MemoryStore;
use taskdeck_proto::task::{TaskDraft, TaskId, TaskPatch};
use taskdeck_proto::wire::LoginRequest;
use taskdeck_stub::server::start_server_with_state;
use taskdeck_stub::store::{Endpoint, TodoStore};

// ---------------------------------------------------------------------------
// Helper functions
// ---------------------------------------------------------------------------

/// Starts a stub over `store` and returns a gateway pointed at it.
async fn connect(store: &Arc<TodoStore>) -> HttpGateway {
    let (addr, _handle) = start_server_with_state("127.0.0.1:0", Arc::clone(store))
        .await
        .expect("failed to start stub server");
    let base = Url::parse(&format!("http://{addr}")).unwrap();
    HttpGateway::new(base, Duration::from_secs(5))
}

fn ids(tasks: &[taskdeck_proto::task::Task]) -> Vec<i64> {
    tasks.iter().map(|t| t.id.get()).collect()
}

// ===========================================================================
// Gateway calls
// ===========================================================================

#[tokio::test]
async fn list_decodes_envelope() {
    let store = Arc::new(TodoStore::seeded(3, false));
    let gateway = connect(&store).await;

    let tasks = gateway.list().await.unwrap();
    assert_eq!(ids(&tasks), vec![1, 2, 3]);
    assert_eq!(tasks[0].text(), Some("Sample task 1"));
    assert!(tasks[2].completed());
}

#[tokio::test]
async fn create_sends_user_id_and_returns_server_id() {
    let store = Arc::new(TodoStore::seeded(2, true));
    let gateway = connect(&store).await.with_user_id(7);

    let created = gateway
        .create(&TaskDraft::new().with("todo", "write tests").with("completed", false))
        .await
        .unwrap();
    assert_eq!(created.id, TaskId::new(3));
    assert_eq!(created.field("userId"), Some(&serde_json::Value::from(7)));

    let stored = store.get(TaskId::new(3)).await.unwrap();
    assert_eq!(stored.text(), Some("write tests"));
}

#[tokio::test]
async fn create_without_text_is_server_error() {
    let store = Arc::new(TodoStore::default());
    let gateway = connect(&store).await;

    let err = gateway
        .create(&TaskDraft::new().with("completed", true))
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::Server { status: 400, .. }));
}

#[tokio::test]
async fn update_and_delete_of_unknown_id_are_not_found() {
    let store = Arc::new(TodoStore::seeded(1, true));
    let gateway = connect(&store).await;

    let err = gateway
        .update(TaskId::new(42), &TaskPatch::new().with("completed", true))
        .await
        .unwrap_err();
    assert_eq!(err, GatewayError::NotFound(TaskId::new(42)));

    let err = gateway.delete(TaskId::new(42)).await.unwrap_err();
    assert_eq!(err, GatewayError::NotFound(TaskId::new(42)));
}

#[tokio::test]
async fn update_returns_patched_task() {
    let store = Arc::new(TodoStore::seeded(2, true));
    let gateway = connect(&store).await;

    let updated = gateway
        .update(TaskId::new(1), &TaskPatch::new().with("completed", true))
        .await
        .unwrap();
    assert!(updated.completed());
    assert_eq!(updated.text(), Some("Sample task 1"));
    assert!(store.get(TaskId::new(1)).await.unwrap().completed());
}

#[tokio::test]
async fn injected_status_becomes_server_error() {
    let store = Arc::new(TodoStore::seeded(1, false));
    store.fail_next(Endpoint::List, 503).await;
    let gateway = connect(&store).await;

    let err = gateway.list().await.unwrap_err();
    assert!(matches!(err, GatewayError::Server { status: 503, .. }));
    // The failure is consumed.
    assert_eq!(gateway.list().await.unwrap().len(), 1);
}

#[tokio::test]
async fn credential_is_sent_as_bearer() {
    let store = Arc::new(TodoStore::default());
    let gateway = connect(&store)
        .await
        .with_credential(Some("abc123".to_string()));

    gateway.list().await.unwrap();
    assert_eq!(
        store.last_authorization().await.as_deref(),
        Some("Bearer abc123")
    );
}

#[tokio::test]
async fn no_credential_sends_no_header() {
    let store = Arc::new(TodoStore::default());
    let gateway = connect(&store).await.with_credential(None);

    gateway.list().await.unwrap();
    assert_eq!(store.last_authorization().await, None);
}

#[tokio::test]
async fn login_returns_token_and_profile() {
    let store = Arc::new(TodoStore::default());
    let gateway = connect(&store).await;

    let response = gateway
        .login(&LoginRequest {
            username: "emily".into(),
            password: "pw".into(),
        })
        .await
        .unwrap();
    assert_eq!(response.access_token, "stub-emily");
    assert_eq!(response.user.username, "emily");
    assert_eq!(response.user.id, 1);
}

#[tokio::test]
async fn unreachable_stub_is_transport_error() {
    let store = Arc::new(TodoStore::default());
    let (addr, handle) = start_server_with_state("127.0.0.1:0", Arc::clone(&store))
        .await
        .unwrap();
    handle.abort();
    let _ = handle.await;

    let gateway = HttpGateway::new(
        Url::parse(&format!("http://{addr}")).unwrap(),
        Duration::from_secs(2),
    );
    assert!(matches!(
        gateway.list().await,
        Err(GatewayError::Transport(_))
    ));
}

// ===========================================================================
// Session over HTTP
// ===========================================================================

#[tokio::test]
async fn session_hides_deletes_the_server_forgets() {
    // Non-persistent stub: deletes answer 200 but the todo keeps being listed.
    let store = Arc::new(TodoStore::seeded(3, false));
    let gateway = connect(&store).await;
    let (session, _events) = TaskSession::new(
        Arc::new(MemoryStore::new()),
        gateway,
        SessionSettings::default(),
    );
    session.refresh().await;
    assert_eq!(ids(&session.get_tasks()), vec![1, 2, 3]);

    session.delete_task(TaskId::new(2)).await.unwrap();
    session.refresh().await;
    assert_eq!(ids(&session.get_tasks()), vec![1, 3]);
    assert_eq!(store.list().await.len(), 3);
}

#[tokio::test]
async fn session_keeps_adds_the_server_forgets() {
    let store = Arc::new(TodoStore::seeded(2, false));
    let gateway = connect(&store).await;
    let (session, _events) = TaskSession::new(
        Arc::new(MemoryStore::new()),
        gateway,
        SessionSettings::default(),
    );
    session.refresh().await;

    let added = session
        .add_task(TaskDraft::new().with("todo", "local only"))
        .await
        .unwrap();
    assert_eq!(added.id, TaskId::new(3));

    let tasks = session.get_tasks();
    assert_eq!(ids(&tasks), vec![3, 1, 2]);
    assert_eq!(tasks[0].text(), Some("local only"));
    assert_eq!(store.list().await.len(), 2);
}

#[tokio::test]
async fn session_rolls_back_when_stub_fails() {
    let store = Arc::new(TodoStore::seeded(2, false));
    let gateway = connect(&store).await;
    let (session, _events) = TaskSession::new(
        Arc::new(MemoryStore::new()),
        gateway,
        SessionSettings::default(),
    );
    session.refresh().await;
    let before = session.get_tasks();

    store.fail_next(Endpoint::Update, 500).await;
    let result = session
        .update_task(TaskId::new(1), TaskPatch::new().with("completed", true))
        .await;
    assert!(result.is_err());
    assert_eq!(session.get_tasks(), before);
}
