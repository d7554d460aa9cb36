//! Integration tests for the optimistic mutation flow.
//!
//! Drives the coordinator, reconciler and cache over a `ScriptedGateway`
//! whose server table, failures and response timing are under test control.

#![allow(clippy::expect_used, clippy::unwrap_used, clippy::similar_names)]

use std::sync::Arc;

use serde_json::json;
use tokio::sync::mpsc;

use taskdeck::gateway::scripted::ScriptedGateway;
use taskdeck::gateway::{GatewayError, GatewayOp};
use taskdeck::session::{SessionSettings, TaskSession};
use taskdeck::storage::{KeyValueStore, MemoryStore};
use taskdeck::tasks::overlay::{ADDED_KEY, DELETED_KEY};
use taskdeck::tasks::{
    MutationCoordinator, MutationEvent, MutationKind, MutationPhase, OverlayStore, RefreshOutcome,
    TaskCache, TaskError,
};
use taskdeck_proto::task::{Task, TaskDraft, TaskId, TaskPatch};

// ---------------------------------------------------------------------------
// Helper functions
// ---------------------------------------------------------------------------

fn task(id: i64, text: &str) -> Task {
    serde_json::from_value(json!({"id": id, "todo": text, "completed": false})).unwrap()
}

fn ids(tasks: &[Task]) -> Vec<i64> {
    tasks.iter().map(|t| t.id.get()).collect()
}

struct Harness {
    coordinator: MutationCoordinator<MemoryStore, ScriptedGateway>,
    events: mpsc::Receiver<MutationEvent>,
    overlay: Arc<OverlayStore<MemoryStore>>,
    cache: Arc<TaskCache>,
    gateway: Arc<ScriptedGateway>,
}

impl Harness {
    /// Builds the engine over `gateway` and loads the cache with one refresh.
    async fn start(gateway: ScriptedGateway) -> Self {
        let harness = Self::unloaded(gateway);
        harness.refresh().await;
        harness
    }

    /// Builds the engine with an empty cache.
    fn unloaded(gateway: ScriptedGateway) -> Self {
        let overlay = Arc::new(OverlayStore::new(MemoryStore::new()));
        let cache = Arc::new(TaskCache::new());
        let gateway = Arc::new(gateway);
        let (coordinator, events) = MutationCoordinator::new(
            Arc::clone(&overlay),
            Arc::clone(&cache),
            Arc::clone(&gateway),
            vec!["todo".to_string()],
            64,
        );
        Self {
            coordinator,
            events,
            overlay,
            cache,
            gateway,
        }
    }

    async fn refresh(&self) -> RefreshOutcome {
        self.coordinator.reconciler().refresh().await
    }

    fn drain(&mut self) -> Vec<MutationEvent> {
        let mut out = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            out.push(event);
        }
        out
    }
}

// ===========================================================================
// Reconciliation scenarios
// ===========================================================================

#[tokio::test]
async fn deleted_remote_task_never_shows() {
    let store = Arc::new(MemoryStore::new());
    store.set(DELETED_KEY, "[1]");
    let (session, _events) = TaskSession::new(
        Arc::clone(&store),
        ScriptedGateway::with_tasks(vec![task(1, "a")]),
        SessionSettings::default(),
    );
    session.refresh().await;
    assert!(session.get_tasks().is_empty());
}

#[tokio::test]
async fn locally_added_task_shows_without_server_copy() {
    let store = Arc::new(MemoryStore::new());
    store.set(ADDED_KEY, r#"[{"id":101,"todo":"x","completed":false}]"#);
    let (session, _events) = TaskSession::new(
        Arc::clone(&store),
        ScriptedGateway::new(),
        SessionSettings::default(),
    );
    session.refresh().await;
    assert_eq!(session.get_tasks(), vec![task(101, "x")]);
}

#[tokio::test]
async fn failed_add_reverts_to_prior_list() {
    let gateway = ScriptedGateway::with_tasks(vec![task(5, "a")]);
    gateway.fail_next(GatewayOp::Create, GatewayError::Transport("offline".into()));
    let mut h = Harness::start(gateway).await;
    let before = h.cache.snapshot();

    let pending = h
        .coordinator
        .begin_add(TaskDraft::new().with("todo", "y").with("completed", false))
        .unwrap();
    assert_eq!(ids(&h.cache.snapshot()), vec![5, 6]);
    assert_eq!(h.cache.snapshot()[1], task(6, "y"));
    assert_eq!(ids(&h.overlay.added()), vec![6]);

    let err = h.coordinator.settle_add(pending).await.unwrap_err();
    assert!(matches!(err, TaskError::Remote(GatewayError::Transport(_))));
    assert_eq!(h.cache.snapshot(), before);
    assert!(h.overlay.added().is_empty());

    let phases: Vec<_> = h.drain().into_iter().map(|e| e.phase).collect();
    assert_eq!(phases.len(), 2);
    assert_eq!(phases[0], MutationPhase::Pending);
    assert!(matches!(&phases[1], MutationPhase::RolledBack { reason } if reason.contains("offline")));
    // No refresh was cancelled, so the rollback does not fetch.
    assert_eq!(h.gateway.calls(GatewayOp::List), 1);
}

#[tokio::test]
async fn deletion_survives_server_that_keeps_listing() {
    let gateway = ScriptedGateway::with_tasks(vec![task(5, "a"), task(7, "b")]).forgetful();
    let mut h = Harness::start(gateway).await;

    h.coordinator.delete_task(TaskId::new(5)).await.unwrap();
    assert_eq!(ids(&h.cache.snapshot()), vec![7]);
    assert_eq!(h.overlay.deleted(), vec![TaskId::new(5)]);

    // The server still lists 5.
    assert_eq!(ids(&h.gateway.server_tasks()), vec![5, 7]);
    h.refresh().await;
    assert_eq!(ids(&h.cache.snapshot()), vec![7]);
    assert_eq!(h.overlay.deleted(), vec![TaskId::new(5)]);

    let events = h.drain();
    assert!(events.iter().all(|e| e.kind == MutationKind::Delete));
    assert_eq!(events.last().unwrap().phase, MutationPhase::Committed);
}

// ===========================================================================
// Rollback exactness
// ===========================================================================

#[tokio::test]
async fn failed_update_restores_snapshot_exactly() {
    let gateway = ScriptedGateway::with_tasks(vec![task(1, "a"), task(2, "b"), task(3, "c")]);
    gateway.fail_next(GatewayOp::Update, GatewayError::Server {
        status: 500,
        body: "boom".into(),
    });
    let h = Harness::start(gateway).await;
    let before = h.cache.snapshot();

    let result = h
        .coordinator
        .update_task(
            TaskId::new(2),
            TaskPatch::new().with("todo", "changed").with("completed", true),
        )
        .await;
    assert!(matches!(
        result,
        Err(TaskError::Remote(GatewayError::Server { status: 500, .. }))
    ));
    assert_eq!(h.cache.snapshot(), before);
}

#[tokio::test]
async fn failed_delete_restores_snapshot_and_overlay() {
    let gateway = ScriptedGateway::with_tasks(vec![task(1, "a"), task(2, "b"), task(3, "c")]);
    gateway.fail_next(GatewayOp::Delete, GatewayError::Transport("reset".into()));
    let h = Harness::start(gateway).await;
    let before = h.cache.snapshot();

    let pending = h.coordinator.begin_delete(TaskId::new(2)).unwrap();
    assert_eq!(ids(&h.cache.snapshot()), vec![1, 3]);
    assert_eq!(h.overlay.deleted(), vec![TaskId::new(2)]);

    assert!(h.coordinator.settle_delete(pending).await.is_err());
    assert_eq!(h.cache.snapshot(), before);
    assert!(h.overlay.deleted().is_empty());
}

#[tokio::test]
async fn failed_delete_of_local_task_restores_added_entry() {
    let gateway = ScriptedGateway::new().forgetful();
    let h = Harness::start(gateway).await;
    let added = h
        .coordinator
        .add_task(TaskDraft::new().with("todo", "mine"))
        .await
        .unwrap();
    let before_cache = h.cache.snapshot();
    let before_added = h.overlay.added();

    h.gateway
        .fail_next(GatewayOp::Delete, GatewayError::Transport("reset".into()));
    let pending = h.coordinator.begin_delete(added.id).unwrap();
    assert!(h.overlay.added().is_empty());

    assert!(h.coordinator.settle_delete(pending).await.is_err());
    assert_eq!(h.cache.snapshot(), before_cache);
    assert_eq!(h.overlay.added(), before_added);
}

#[tokio::test]
async fn rollback_leaves_other_pending_changes_alone() {
    let gateway = ScriptedGateway::with_tasks(vec![task(1, "a"), task(2, "b")]);
    let h = Harness::start(gateway).await;
    h.gateway.hold(GatewayOp::Update);
    h.gateway
        .fail_next(GatewayOp::Update, GatewayError::Transport("down".into()));

    let update = h
        .coordinator
        .begin_update(TaskId::new(1), TaskPatch::new().with("todo", "a2"))
        .unwrap();
    let delete = h.coordinator.begin_delete(TaskId::new(2)).unwrap();
    assert_eq!(ids(&h.cache.snapshot()), vec![1]);

    h.coordinator.settle_delete(delete).await.unwrap();
    h.gateway.release(GatewayOp::Update);
    assert!(h.coordinator.settle_update(update).await.is_err());

    // Task 1 is back to its original text; the committed delete of 2 stays.
    assert_eq!(h.cache.snapshot(), vec![task(1, "a")]);
}

// ===========================================================================
// Temp ids
// ===========================================================================

#[tokio::test]
async fn sequential_pending_adds_get_distinct_increasing_ids() {
    let gateway = ScriptedGateway::with_tasks(vec![task(3, "a"), task(150, "b")]);
    let h = Harness::start(gateway).await;

    let mut pendings = Vec::new();
    for i in 0..5 {
        let pending = h
            .coordinator
            .begin_add(TaskDraft::new().with("todo", format!("t{i}")))
            .unwrap();
        pendings.push(pending);
    }
    let temp_ids: Vec<i64> = pendings.iter().map(|p| p.temp_id().get()).collect();
    assert_eq!(temp_ids, vec![151, 152, 153, 154, 155]);
    assert_eq!(h.cache.snapshot().len(), 7);
    drop(pendings);
}

#[tokio::test]
async fn temp_ids_never_repeat_after_rollback() {
    let gateway = ScriptedGateway::with_tasks(vec![task(1, "a")]);
    gateway.fail_next(GatewayOp::Create, GatewayError::Transport("x".into()));
    let h = Harness::start(gateway).await;

    let first = h.coordinator.begin_add(TaskDraft::new().with("todo", "y")).unwrap();
    let first_id = first.temp_id();
    assert!(h.coordinator.settle_add(first).await.is_err());

    h.gateway.hold(GatewayOp::Create);
    let second = h.coordinator.begin_add(TaskDraft::new().with("todo", "z")).unwrap();
    assert!(second.temp_id() > first_id);
    drop(second);
}

#[tokio::test]
async fn committed_add_takes_free_server_id() {
    let gateway = ScriptedGateway::with_tasks(vec![task(1, "a"), task(2, "b")]);
    let mut h = Harness::start(gateway).await;
    // An old deletion marker pushes the temp id above the server's next id.
    h.overlay.mark_deleted(TaskId::new(50));

    let pending = h.coordinator.begin_add(TaskDraft::new().with("todo", "c")).unwrap();
    assert_eq!(pending.temp_id(), TaskId::new(51));
    let committed = h.coordinator.settle_add(pending).await.unwrap();
    assert_eq!(committed.id, TaskId::new(3));

    assert_eq!(ids(&h.overlay.added()), vec![3]);
    assert_eq!(ids(&h.cache.snapshot()), vec![3, 1, 2]);

    let events = h.drain();
    assert_eq!(events[0].task_id, TaskId::new(51));
    assert_eq!(events[1].task_id, TaskId::new(3));
    assert_eq!(events[1].phase, MutationPhase::Committed);
}

#[tokio::test]
async fn colliding_server_id_keeps_temp_id() {
    // A forgetful server hands out the same id for every create.
    let gateway = ScriptedGateway::with_tasks(vec![task(1, "a"), task(2, "b")]).forgetful();
    let h = Harness::start(gateway).await;

    let first = h
        .coordinator
        .add_task(TaskDraft::new().with("todo", "c"))
        .await
        .unwrap();
    assert_eq!(first.id, TaskId::new(3));

    let second = h
        .coordinator
        .add_task(TaskDraft::new().with("todo", "d"))
        .await
        .unwrap();
    assert_eq!(second.id, TaskId::new(4));

    assert_eq!(ids(&h.overlay.added()), vec![3, 4]);
    assert_eq!(ids(&h.cache.snapshot()), vec![3, 4, 1, 2]);
    assert_eq!(h.cache.get(TaskId::new(4)).unwrap().text(), Some("d"));
}

// ===========================================================================
// Concurrency
// ===========================================================================

#[tokio::test]
async fn same_id_mutations_are_serialized() {
    let gateway = ScriptedGateway::with_tasks(vec![task(1, "a"), task(2, "b")]);
    let h = Harness::start(gateway).await;
    h.gateway.hold(GatewayOp::Update);

    let first = h
        .coordinator
        .begin_update(TaskId::new(1), TaskPatch::new().with("todo", "a2"))
        .unwrap();
    let rejected = h
        .coordinator
        .begin_update(TaskId::new(1), TaskPatch::new().with("todo", "a3"));
    assert_eq!(
        rejected.unwrap_err(),
        TaskError::MutationInFlight(TaskId::new(1))
    );
    // A different id is not blocked.
    let other = h
        .coordinator
        .begin_update(TaskId::new(2), TaskPatch::new().with("todo", "b2"))
        .unwrap();

    h.gateway.open(GatewayOp::Update);
    h.coordinator.settle_update(first).await.unwrap();
    h.coordinator.settle_update(other).await.unwrap();
    assert!(!h.coordinator.is_in_flight(TaskId::new(1)));
    assert!(h
        .coordinator
        .begin_update(TaskId::new(1), TaskPatch::new().with("todo", "a4"))
        .is_ok());
}

#[tokio::test]
async fn older_refresh_cannot_overwrite_newer_one() {
    let gateway = ScriptedGateway::with_tasks(vec![task(1, "old")]);
    let h = Harness::start(gateway).await;
    h.gateway.hold(GatewayOp::List);

    let first = {
        let reconciler = h.coordinator.reconciler().clone();
        tokio::spawn(async move { reconciler.refresh().await })
    };
    h.gateway.wait_for_calls(GatewayOp::List, 2).await;

    h.gateway.set_server_tasks(vec![task(1, "new"), task(2, "added")]);
    let second = {
        let reconciler = h.coordinator.reconciler().clone();
        tokio::spawn(async move { reconciler.refresh().await })
    };
    h.gateway.wait_for_calls(GatewayOp::List, 3).await;

    // The older response resolves first and is discarded.
    h.gateway.release(GatewayOp::List);
    assert_eq!(first.await.unwrap(), RefreshOutcome::Superseded);
    assert_eq!(h.cache.snapshot(), vec![task(1, "old")]);
    assert!(h.cache.is_loading());

    h.gateway.release(GatewayOp::List);
    assert_eq!(second.await.unwrap(), RefreshOutcome::Applied { count: 2 });
    assert_eq!(h.cache.snapshot(), vec![task(1, "new"), task(2, "added")]);
    assert!(!h.cache.is_loading());
}

#[tokio::test]
async fn pending_mutation_discards_in_flight_refresh() {
    let gateway = ScriptedGateway::with_tasks(vec![task(1, "a"), task(2, "b")]);
    let h = Harness::start(gateway).await;
    h.gateway.hold(GatewayOp::List);

    let refresh = {
        let reconciler = h.coordinator.reconciler().clone();
        tokio::spawn(async move { reconciler.refresh().await })
    };
    h.gateway.wait_for_calls(GatewayOp::List, 2).await;

    let pending = h.coordinator.begin_delete(TaskId::new(2)).unwrap();
    h.gateway.release(GatewayOp::List);
    assert_eq!(refresh.await.unwrap(), RefreshOutcome::Superseded);
    assert_eq!(ids(&h.cache.snapshot()), vec![1]);
    assert!(!h.cache.is_loading());

    // The committed delete reloads what its Pending step cancelled.
    h.gateway.open(GatewayOp::List);
    h.coordinator.settle_delete(pending).await.unwrap();
    assert_eq!(h.gateway.calls(GatewayOp::List), 3);
    assert_eq!(ids(&h.cache.snapshot()), vec![1]);
}

#[tokio::test]
async fn failed_add_reloads_the_list_it_cancelled() {
    let gateway = ScriptedGateway::with_tasks(vec![task(1, "a"), task(2, "b")]);
    let h = Harness::unloaded(gateway);
    h.gateway.hold(GatewayOp::List);

    let initial = {
        let reconciler = h.coordinator.reconciler().clone();
        tokio::spawn(async move { reconciler.refresh().await })
    };
    h.gateway.wait_for_calls(GatewayOp::List, 1).await;

    h.gateway
        .fail_next(GatewayOp::Create, GatewayError::Transport("offline".into()));
    let (result, ()) = tokio::join!(
        h.coordinator.add_task(TaskDraft::new().with("todo", "c")),
        async {
            h.gateway.wait_for_calls(GatewayOp::List, 2).await;
            h.gateway.open(GatewayOp::List);
        }
    );
    assert!(result.is_err());
    assert_eq!(initial.await.unwrap(), RefreshOutcome::Superseded);

    assert_eq!(ids(&h.cache.snapshot()), vec![1, 2]);
    assert!(!h.cache.is_loading());
    assert!(h.cache.error().is_none());
}

#[tokio::test]
async fn refresh_after_pending_sees_optimistic_change() {
    let gateway = ScriptedGateway::with_tasks(vec![task(1, "a")]);
    let h = Harness::start(gateway).await;
    h.gateway.hold(GatewayOp::Create);

    let pending = h
        .coordinator
        .begin_add(TaskDraft::new().with("todo", "local"))
        .unwrap();
    h.refresh().await;
    assert_eq!(ids(&h.cache.snapshot()), vec![2, 1]);
    drop(pending);
}

#[tokio::test]
async fn failed_refresh_keeps_list_and_overlay() {
    let gateway = ScriptedGateway::with_tasks(vec![task(1, "a")]);
    let h = Harness::start(gateway).await;
    h.coordinator.delete_task(TaskId::new(1)).await.unwrap();

    h.gateway
        .fail_next(GatewayOp::List, GatewayError::Parse("not json".into()));
    let outcome = h.refresh().await;
    assert!(matches!(outcome, RefreshOutcome::Failed(GatewayError::Parse(_))));
    assert!(h.cache.snapshot().is_empty());
    assert_eq!(h.overlay.deleted(), vec![TaskId::new(1)]);
    assert!(matches!(h.cache.error(), Some(GatewayError::Parse(_))));
}

#[tokio::test]
async fn update_commit_refreshes_from_server() {
    let gateway = ScriptedGateway::with_tasks(vec![task(1, "a")]);
    let h = Harness::start(gateway).await;
    let list_calls = h.gateway.calls(GatewayOp::List);

    let updated = h
        .coordinator
        .update_task(TaskId::new(1), TaskPatch::new().with("todo", "a2"))
        .await
        .unwrap();
    assert_eq!(updated.text(), Some("a2"));
    assert_eq!(h.gateway.calls(GatewayOp::List), list_calls + 1);
    assert_eq!(h.cache.snapshot(), vec![task(1, "a2")]);

    // Deletes do not refresh.
    h.coordinator.delete_task(TaskId::new(1)).await.unwrap();
    assert_eq!(h.gateway.calls(GatewayOp::List), list_calls + 1);
}
