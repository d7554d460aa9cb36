//! Scripted gateway for testing.
//!
//! [`ScriptedGateway`] keeps a server-side task table in process and lets
//! tests shape its behavior:
//! - queue failures per operation with [`fail_next`](ScriptedGateway::fail_next)
//! - make writes "forgetful" so creates/updates/deletes succeed without
//!   showing up in later lists (the behavior the overlay compensates for)
//! - hold calls at a gate and release them one at a time, to force
//!   response ordering
//!
//! Responses are computed when the call arrives and delivered when its gate
//! opens, like a slow network in front of a fast server.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Semaphore;

use taskdeck_proto::task::{Task, TaskDraft, TaskId, TaskPatch};
use taskdeck_proto::wire::{LoginRequest, LoginResponse, UserProfile};

use super::{GatewayError, GatewayOp, TaskGateway};

#[derive(Debug)]
struct ServerTable {
    tasks: Vec<Task>,
    next_id: i64,
    forgetful: bool,
    failures: HashMap<GatewayOp, VecDeque<GatewayError>>,
    calls: HashMap<GatewayOp, usize>,
}

/// In-process [`TaskGateway`] with failure injection and call gating.
#[derive(Debug)]
pub struct ScriptedGateway {
    table: Mutex<ServerTable>,
    gates: Mutex<HashMap<GatewayOp, Arc<Semaphore>>>,
}

impl Default for ScriptedGateway {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedGateway {
    /// Creates a gateway with an empty server table.
    #[must_use]
    pub fn new() -> Self {
        Self::with_tasks(Vec::new())
    }

    /// Creates a gateway whose server table starts with `tasks`.
    ///
    /// Server-assigned ids continue after the largest seeded id.
    #[must_use]
    pub fn with_tasks(tasks: Vec<Task>) -> Self {
        let next_id = tasks.iter().map(|t| t.id.get()).max().unwrap_or(0) + 1;
        Self {
            table: Mutex::new(ServerTable {
                tasks,
                next_id,
                forgetful: false,
                failures: HashMap::new(),
                calls: HashMap::new(),
            }),
            gates: Mutex::new(HashMap::new()),
        }
    }

    /// Makes writes succeed without changing what `list` returns.
    ///
    /// Creates then always answer with the same id (the next free one),
    /// mirroring APIs that simulate writes.
    #[must_use]
    pub fn forgetful(self) -> Self {
        self.table.lock().forgetful = true;
        self
    }

    /// Queues `error` as the result of the next call to `op`.
    pub fn fail_next(&self, op: GatewayOp, error: GatewayError) {
        self.table
            .lock()
            .failures
            .entry(op)
            .or_default()
            .push_back(error);
    }

    /// Replaces the server table contents.
    pub fn set_server_tasks(&self, tasks: Vec<Task>) {
        self.table.lock().tasks = tasks;
    }

    /// Returns the server table contents.
    #[must_use]
    pub fn server_tasks(&self) -> Vec<Task> {
        self.table.lock().tasks.clone()
    }

    /// Number of calls made to `op` so far (including held ones).
    #[must_use]
    pub fn calls(&self, op: GatewayOp) -> usize {
        self.table.lock().calls.get(&op).copied().unwrap_or(0)
    }

    /// Holds every subsequent call to `op` until released.
    pub fn hold(&self, op: GatewayOp) {
        self.gates
            .lock()
            .entry(op)
            .or_insert_with(|| Arc::new(Semaphore::new(0)));
    }

    /// Releases the oldest held call to `op`.
    pub fn release(&self, op: GatewayOp) {
        if let Some(gate) = self.gates.lock().get(&op) {
            gate.add_permits(1);
        }
    }

    /// Removes the gate for `op`, releasing all held calls.
    pub fn open(&self, op: GatewayOp) {
        if let Some(gate) = self.gates.lock().remove(&op) {
            gate.close();
        }
    }

    /// Yields until at least `n` calls to `op` have arrived.
    pub async fn wait_for_calls(&self, op: GatewayOp, n: usize) {
        while self.calls(op) < n {
            tokio::task::yield_now().await;
        }
    }

    /// Registers the call and takes its scripted failure, if any.
    fn arrive(&self, op: GatewayOp) -> Option<GatewayError> {
        let mut table = self.table.lock();
        *table.calls.entry(op).or_default() += 1;
        table.failures.get_mut(&op).and_then(VecDeque::pop_front)
    }

    async fn pass_gate(&self, op: GatewayOp) {
        let gate = self.gates.lock().get(&op).cloned();
        if let Some(gate) = gate {
            // A closed gate means it was opened for good.
            if let Ok(permit) = gate.acquire().await {
                permit.forget();
            }
        }
    }

    async fn respond<T>(&self, op: GatewayOp, result: Result<T, GatewayError>) -> Result<T, GatewayError> {
        self.pass_gate(op).await;
        result
    }
}

impl TaskGateway for ScriptedGateway {
    async fn list(&self) -> Result<Vec<Task>, GatewayError> {
        let result = match self.arrive(GatewayOp::List) {
            Some(e) => Err(e),
            None => Ok(self.server_tasks()),
        };
        self.respond(GatewayOp::List, result).await
    }

    async fn create(&self, draft: &TaskDraft) -> Result<Task, GatewayError> {
        let result = match self.arrive(GatewayOp::Create) {
            Some(e) => Err(e),
            None => {
                let mut table = self.table.lock();
                let task = Task::from_draft(TaskId::new(table.next_id), draft.clone());
                if !table.forgetful {
                    table.next_id += 1;
                    table.tasks.push(task.clone());
                }
                Ok(task)
            }
        };
        self.respond(GatewayOp::Create, result).await
    }

    async fn update(&self, id: TaskId, patch: &TaskPatch) -> Result<Task, GatewayError> {
        let result = match self.arrive(GatewayOp::Update) {
            Some(e) => Err(e),
            None => {
                let mut table = self.table.lock();
                let forgetful = table.forgetful;
                match table.tasks.iter_mut().find(|t| t.id == id) {
                    Some(task) => {
                        let mut updated = task.clone();
                        updated.apply_patch(patch);
                        if !forgetful {
                            *task = updated.clone();
                        }
                        Ok(updated)
                    }
                    None => Err(GatewayError::NotFound(id)),
                }
            }
        };
        self.respond(GatewayOp::Update, result).await
    }

    async fn delete(&self, id: TaskId) -> Result<(), GatewayError> {
        let result = match self.arrive(GatewayOp::Delete) {
            Some(e) => Err(e),
            None => {
                let mut table = self.table.lock();
                match table.tasks.iter().position(|t| t.id == id) {
                    Some(index) => {
                        if !table.forgetful {
                            table.tasks.remove(index);
                        }
                        Ok(())
                    }
                    None => Err(GatewayError::NotFound(id)),
                }
            }
        };
        self.respond(GatewayOp::Delete, result).await
    }

    async fn login(&self, request: &LoginRequest) -> Result<LoginResponse, GatewayError> {
        let result = match self.arrive(GatewayOp::Login) {
            Some(e) => Err(e),
            None if request.username.is_empty() || request.password.is_empty() => {
                Err(GatewayError::Server {
                    status: 400,
                    body: "Username and password required".into(),
                })
            }
            None => Ok(LoginResponse {
                user: UserProfile {
                    id: 1,
                    username: request.username.clone(),
                    email: None,
                },
                access_token: format!("scripted-{}", request.username),
            }),
        };
        self.respond(GatewayOp::Login, result).await
    }
}
