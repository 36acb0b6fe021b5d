//! Task and entity descriptions shared across the wire and the
//! master's bookkeeping.

use crate::ids::{ExecutorId, FrameworkId, TaskId, WorkerId};
use crate::resources::Resources;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Task lifecycle states. The last five are terminal: once entered,
/// a task never leaves them.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskState {
    Staging,
    Starting,
    Running,
    Finished,
    Failed,
    Killed,
    Lost,
    Error,
}

impl TaskState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskState::Finished
                | TaskState::Failed
                | TaskState::Killed
                | TaskState::Lost
                | TaskState::Error
        )
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TaskState::Staging => "TASK_STAGING",
            TaskState::Starting => "TASK_STARTING",
            TaskState::Running => "TASK_RUNNING",
            TaskState::Finished => "TASK_FINISHED",
            TaskState::Failed => "TASK_FAILED",
            TaskState::Killed => "TASK_KILLED",
            TaskState::Lost => "TASK_LOST",
            TaskState::Error => "TASK_ERROR",
        };
        write!(f, "{}", name)
    }
}

/// Who generated a status update.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum StatusSource {
    Master,
    Worker,
    Executor,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum StatusReason {
    Reconciliation,
    WorkerRemoved,
    WorkerDisconnected,
    TaskInvalid,
    TaskUnauthorized,
    TaskUnknown,
    InvalidOffers,
    FrameworkRemoved,
    ExecutorTerminated,
    GcError,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TaskStatus {
    pub task_id: TaskId,
    pub state: TaskState,
    pub message: Option<String>,
    pub source: StatusSource,
    pub reason: Option<StatusReason>,
    pub worker_id: Option<WorkerId>,
    pub executor_id: Option<ExecutorId>,
    pub data: Vec<u8>,
    pub timestamp: f64,
}

/// A status update in flight between worker, master and framework.
/// The uuid survives until the framework acknowledges a terminal
/// update; `latest_state` carries the worker's most recent view when
/// it differs from the (possibly older, unacknowledged) `status`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StatusUpdate {
    pub framework_id: FrameworkId,
    pub worker_id: Option<WorkerId>,
    pub status: TaskStatus,
    pub latest_state: Option<TaskState>,
    pub uuid: String,
    pub timestamp: f64,
}

impl StatusUpdate {
    /// Build a master-originated update the way every master code path
    /// does: fresh uuid, source MASTER unless overridden in `status`.
    pub fn from_master(
        framework_id: FrameworkId,
        worker_id: Option<WorkerId>,
        task_id: TaskId,
        state: TaskState,
        message: &str,
        reason: Option<StatusReason>,
        executor_id: Option<ExecutorId>,
        timestamp: f64,
    ) -> Self {
        StatusUpdate {
            framework_id,
            worker_id: worker_id.clone(),
            status: TaskStatus {
                task_id,
                state,
                message: Some(message.to_string()),
                source: StatusSource::Master,
                reason,
                worker_id,
                executor_id,
                data: Vec::new(),
                timestamp,
            },
            latest_state: None,
            uuid: uuid::Uuid::new_v4().to_string(),
            timestamp,
        }
    }
}

impl fmt::Display for StatusUpdate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} for task {} of framework {}",
            self.status.state, self.status.task_id, self.framework_id
        )
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CommandInfo {
    pub value: String,
    pub user: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ExecutorInfo {
    pub executor_id: ExecutorId,
    pub framework_id: Option<FrameworkId>,
    pub command: CommandInfo,
    pub resources: Resources,
}

/// A task as described by the framework at launch time.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TaskInfo {
    pub task_id: TaskId,
    pub name: String,
    pub worker_id: WorkerId,
    pub resources: Resources,
    pub command: Option<CommandInfo>,
    pub executor: Option<ExecutorInfo>,
}

/// A task as tracked by the master. Owned by the worker entry; the
/// framework holds an index into its worker's map.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Task {
    pub task_id: TaskId,
    pub name: String,
    pub framework_id: FrameworkId,
    pub worker_id: WorkerId,
    pub executor_id: Option<ExecutorId>,
    pub resources: Resources,
    pub state: TaskState,
    /// Last state carried by an unacknowledged status update.
    pub status_update_state: Option<TaskState>,
    pub status_update_uuid: Option<String>,
    pub statuses: Vec<TaskStatus>,
}

impl Task {
    pub fn from_info(info: &TaskInfo, framework_id: FrameworkId) -> Self {
        Task {
            task_id: info.task_id.clone(),
            name: info.name.clone(),
            framework_id,
            worker_id: info.worker_id.clone(),
            executor_id: info.executor.as_ref().map(|e| e.executor_id.clone()),
            resources: info.resources.clone(),
            state: TaskState::Staging,
            status_update_state: None,
            status_update_uuid: None,
            statuses: Vec::new(),
        }
    }

    /// The state reconciliation answers with: the unacknowledged
    /// status-update state when one exists, else the tracked state.
    pub fn latest_state(&self) -> TaskState {
        self.status_update_state.unwrap_or(self.state)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Attribute {
    pub name: String,
    pub value: String,
}

/// A worker as described at (re-)registration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WorkerInfo {
    pub id: Option<WorkerId>,
    pub hostname: String,
    pub resources: Resources,
    pub attributes: Vec<Attribute>,
    pub checkpoint: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FrameworkInfo {
    pub id: Option<FrameworkId>,
    pub name: String,
    pub user: String,
    pub role: String,
    pub principal: Option<String>,
    pub failover_timeout_secs: f64,
    pub checkpoint: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MasterInfo {
    pub id: String,
    pub address: String,
}

/// Offer filters a framework attaches when declining resources.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Filters {
    pub refuse_seconds: f64,
}

impl Default for Filters {
    fn default() -> Self {
        // Matches the default refuse interval frameworks get when they
        // decline without an explicit filter.
        Filters {
            refuse_seconds: 5.0,
        }
    }
}
