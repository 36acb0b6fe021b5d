//! Protocol messages between master, frameworks and workers
//!
//! One enum covers the whole protocol, mirroring how commands are
//! modeled elsewhere in the crate: every wire message is a variant
//! carrying exactly its required fields. The transport is the
//! in-process router; anything speaking this enum can participate.

use crate::ids::{ExecutorId, FrameworkId, OfferId, TaskId, WorkerId};
use crate::resources::Resources;
use crate::state::{
    Attribute, ExecutorInfo, Filters, FrameworkInfo, MasterInfo, StatusUpdate, Task, TaskInfo,
    TaskStatus, WorkerInfo,
};
use serde::{Deserialize, Serialize};

/// An offer as sent to a framework.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OfferData {
    pub offer_id: OfferId,
    pub framework_id: FrameworkId,
    pub worker_id: WorkerId,
    pub hostname: String,
    pub resources: Resources,
    pub attributes: Vec<Attribute>,
    pub executor_ids: Vec<ExecutorId>,
}

/// Master's view of unreported tasks, sent inside `WorkerReregistered`
/// for the worker to reconcile.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReconcileTasksRequest {
    pub framework_id: FrameworkId,
    pub statuses: Vec<TaskStatus>,
}

/// Completed-framework archive a worker reports on re-registration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CompletedFrameworkArchive {
    pub framework_id: FrameworkId,
    pub tasks: Vec<Task>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum Protocol {
    // --- Framework -> Master ---
    RegisterFramework {
        framework: FrameworkInfo,
    },
    ReregisterFramework {
        framework: FrameworkInfo,
        failover: bool,
    },
    UnregisterFramework {
        framework_id: FrameworkId,
    },
    DeactivateFramework {
        framework_id: FrameworkId,
    },
    /// Empty `tasks` declines the offers.
    LaunchTasks {
        framework_id: FrameworkId,
        tasks: Vec<TaskInfo>,
        filters: Filters,
        offer_ids: Vec<OfferId>,
    },
    ReviveOffers {
        framework_id: FrameworkId,
    },
    KillTask {
        framework_id: FrameworkId,
        task_id: TaskId,
    },
    StatusUpdateAcknowledgement {
        worker_id: WorkerId,
        framework_id: FrameworkId,
        task_id: TaskId,
        uuid: String,
    },
    ReconcileTasks {
        framework_id: FrameworkId,
        statuses: Vec<TaskStatus>,
    },
    /// Data for one of the framework's executors, relayed via master.
    FrameworkToExecutor {
        worker_id: WorkerId,
        framework_id: FrameworkId,
        executor_id: ExecutorId,
        data: Vec<u8>,
    },

    // --- Master -> Framework ---
    FrameworkRegistered {
        framework_id: FrameworkId,
        master: MasterInfo,
    },
    FrameworkReregistered {
        framework_id: FrameworkId,
        master: MasterInfo,
    },
    FrameworkError {
        message: String,
    },
    ResourceOffers {
        offers: Vec<OfferData>,
        worker_addresses: Vec<String>,
    },
    RescindResourceOffer {
        offer_id: OfferId,
    },
    LostWorker {
        worker_id: WorkerId,
    },

    // --- Worker -> Master ---
    RegisterWorker {
        worker: WorkerInfo,
        version: String,
    },
    ReregisterWorker {
        worker: WorkerInfo,
        executors: Vec<ExecutorInfo>,
        tasks: Vec<Task>,
        completed_frameworks: Vec<CompletedFrameworkArchive>,
        version: String,
    },
    UnregisterWorker {
        worker_id: WorkerId,
    },
    /// `ack_address` is empty when no acknowledgement is expected.
    StatusUpdate {
        update: StatusUpdate,
        ack_address: String,
    },
    ExitedExecutor {
        worker_id: WorkerId,
        framework_id: FrameworkId,
        executor_id: ExecutorId,
        status: i32,
    },
    PongWorker,

    // --- Master -> Worker ---
    WorkerRegistered {
        worker_id: WorkerId,
    },
    WorkerReregistered {
        worker_id: WorkerId,
        reconciliations: Vec<ReconcileTasksRequest>,
    },
    RunTask {
        framework_id: FrameworkId,
        framework: FrameworkInfo,
        framework_address: String,
        task: TaskInfo,
    },
    /// Sent on framework failover so workers learn the new address.
    UpdateFramework {
        framework_id: FrameworkId,
        framework_address: String,
    },
    ShutdownFramework {
        framework_id: FrameworkId,
    },
    PingWorker {
        connected: bool,
    },

    // --- Either direction ---
    /// Forwarded `KillTask` (master -> worker) reuses the variant above.
    /// Instructs the peer process to exit.
    Shutdown {
        message: String,
    },
}

impl Protocol {
    /// Short message name for logs and drop counters.
    pub fn name(&self) -> &'static str {
        match self {
            Protocol::RegisterFramework { .. } => "RegisterFramework",
            Protocol::ReregisterFramework { .. } => "ReregisterFramework",
            Protocol::UnregisterFramework { .. } => "UnregisterFramework",
            Protocol::DeactivateFramework { .. } => "DeactivateFramework",
            Protocol::LaunchTasks { .. } => "LaunchTasks",
            Protocol::ReviveOffers { .. } => "ReviveOffers",
            Protocol::KillTask { .. } => "KillTask",
            Protocol::StatusUpdateAcknowledgement { .. } => "StatusUpdateAcknowledgement",
            Protocol::ReconcileTasks { .. } => "ReconcileTasks",
            Protocol::FrameworkToExecutor { .. } => "FrameworkToExecutor",
            Protocol::FrameworkRegistered { .. } => "FrameworkRegistered",
            Protocol::FrameworkReregistered { .. } => "FrameworkReregistered",
            Protocol::FrameworkError { .. } => "FrameworkError",
            Protocol::ResourceOffers { .. } => "ResourceOffers",
            Protocol::RescindResourceOffer { .. } => "RescindResourceOffer",
            Protocol::LostWorker { .. } => "LostWorker",
            Protocol::RegisterWorker { .. } => "RegisterWorker",
            Protocol::ReregisterWorker { .. } => "ReregisterWorker",
            Protocol::UnregisterWorker { .. } => "UnregisterWorker",
            Protocol::StatusUpdate { .. } => "StatusUpdate",
            Protocol::ExitedExecutor { .. } => "ExitedExecutor",
            Protocol::PongWorker => "PongWorker",
            Protocol::WorkerRegistered { .. } => "WorkerRegistered",
            Protocol::WorkerReregistered { .. } => "WorkerReregistered",
            Protocol::RunTask { .. } => "RunTask",
            Protocol::UpdateFramework { .. } => "UpdateFramework",
            Protocol::ShutdownFramework { .. } => "ShutdownFramework",
            Protocol::PingWorker { .. } => "PingWorker",
            Protocol::Shutdown { .. } => "Shutdown",
        }
    }
}
