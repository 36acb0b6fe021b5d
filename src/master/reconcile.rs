//! Reconciliation
//!
//! Two protocols converge master and participants on authoritative
//! task state. When a worker re-registers, the master diffs the
//! worker's report against its own view: version-tagged workers are
//! asked to reconcile unreported tasks, legacy workers get the tasks
//! declared lost outright. When a framework asks, the master answers
//! from its registries; the only silent case is a task on a worker
//! that is still in a transitional state.

use crate::actor::Pid;
use crate::ids::{ExecutorId, FrameworkId, TaskId, WorkerId};
use crate::master::Master;
use crate::messages::{Protocol, ReconcileTasksRequest};
use crate::state::{
    ExecutorInfo, StatusReason, StatusSource, StatusUpdate, Task, TaskState, TaskStatus,
};
use slog::{info, warn};
use std::collections::HashSet;

impl Master {
    /// Worker-side reconciliation on re-registration. Sends the
    /// `WorkerReregistered` reply, including the master's view of any
    /// task the worker failed to report.
    pub(crate) fn reconcile_worker(
        &mut self,
        worker_id: &WorkerId,
        executors: &[ExecutorInfo],
        tasks: &[Task],
    ) {
        let reported: HashSet<(FrameworkId, TaskId)> = tasks
            .iter()
            .map(|task| (task.framework_id.clone(), task.task_id.clone()))
            .collect();

        let (worker_pid, version_tagged) = {
            let Some(worker) = self.workers.get(worker_id) else {
                return;
            };
            (worker.pid.clone(), worker.version.is_some())
        };

        let mut reconciliations: Vec<ReconcileTasksRequest> = Vec::new();

        let framework_ids: Vec<FrameworkId> = self
            .workers
            .get(worker_id)
            .map(|worker| worker.tasks.keys().cloned().collect())
            .unwrap_or_default();

        for framework_id in framework_ids {
            let mut statuses: Vec<TaskStatus> = Vec::new();

            let task_ids: Vec<TaskId> = self
                .workers
                .get(worker_id)
                .and_then(|worker| worker.tasks.get(&framework_id))
                .map(|tasks| tasks.keys().cloned().collect())
                .unwrap_or_default();

            for task_id in task_ids {
                if reported.contains(&(framework_id.clone(), task_id.clone())) {
                    continue;
                }

                warn!(
                    self.logger,
                    "Task unknown to the worker during re-registration";
                    "task_id" => %task_id, "framework_id" => %framework_id,
                    "worker_id" => %worker_id,
                    "action" => if version_tagged { "reconciling" } else { "sending TASK_LOST" }
                );

                if version_tagged {
                    // Ask the worker to reconcile; the task stays put
                    // until a corrective update arrives.
                    let (state, executor_id) = self
                        .workers
                        .get(worker_id)
                        .and_then(|worker| worker.get_task(&framework_id, &task_id))
                        .map(|task| (task.latest_state(), task.executor_id.clone()))
                        .unwrap_or((TaskState::Lost, None));
                    statuses.push(TaskStatus {
                        task_id: task_id.clone(),
                        state,
                        message: Some("Reconciliation request".to_string()),
                        source: StatusSource::Master,
                        reason: Some(StatusReason::Reconciliation),
                        worker_id: Some(worker_id.clone()),
                        executor_id,
                        data: Vec::new(),
                        timestamp: self.clock.now_secs(),
                    });
                } else {
                    // Legacy worker: declare the task lost and drop it.
                    let executor_id = self
                        .workers
                        .get(worker_id)
                        .and_then(|worker| worker.get_task(&framework_id, &task_id))
                        .and_then(|task| task.executor_id.clone());
                    let update = StatusUpdate::from_master(
                        framework_id.clone(),
                        Some(worker_id.clone()),
                        task_id.clone(),
                        TaskState::Lost,
                        "Task is unknown to the worker",
                        Some(StatusReason::TaskUnknown),
                        executor_id,
                        self.clock.now_secs(),
                    );
                    self.update_task(&update);
                    self.remove_task(&framework_id, worker_id, &task_id);
                    self.forward_update(update, "", &framework_id);
                }
            }

            if version_tagged && !statuses.is_empty() {
                reconciliations.push(ReconcileTasksRequest {
                    framework_id,
                    statuses,
                });
            }
        }

        self.send_to(
            &worker_pid,
            Protocol::WorkerReregistered {
                worker_id: worker_id.clone(),
                reconciliations,
            },
        );

        // Executors the worker did not report are gone; reclaim their
        // resources.
        let reported_executors: HashSet<(FrameworkId, ExecutorId)> = executors
            .iter()
            .filter_map(|executor| {
                executor
                    .framework_id
                    .clone()
                    .map(|framework_id| (framework_id, executor.executor_id.clone()))
            })
            .collect();

        let known_executors: Vec<(FrameworkId, ExecutorId)> = self
            .workers
            .get(worker_id)
            .map(|worker| {
                worker
                    .executors
                    .iter()
                    .flat_map(|(framework_id, executors)| {
                        executors
                            .keys()
                            .map(move |executor_id| (framework_id.clone(), executor_id.clone()))
                    })
                    .collect()
            })
            .unwrap_or_default();

        for (framework_id, executor_id) in known_executors {
            if !reported_executors.contains(&(framework_id.clone(), executor_id.clone())) {
                warn!(
                    self.logger,
                    "Executor possibly unknown to the worker; removing";
                    "executor_id" => %executor_id, "framework_id" => %framework_id,
                    "worker_id" => %worker_id
                );
                self.remove_executor(worker_id, &framework_id, &executor_id);
            }
        }

        // Kills that may never have reached the worker are re-sent.
        for task in tasks {
            let marked_killed = self
                .workers
                .get(worker_id)
                .and_then(|worker| worker.killed_tasks.get(&task.framework_id))
                .map(|killed| killed.contains(&task.task_id))
                .unwrap_or(false);
            if !task.state.is_terminal() && marked_killed {
                warn!(
                    self.logger,
                    "Worker re-registered with a task that should be killed; killing it now";
                    "task_id" => %task.task_id, "worker_id" => %worker_id
                );
                self.send_to(
                    &worker_pid,
                    Protocol::KillTask {
                        framework_id: task.framework_id.clone(),
                        task_id: task.task_id.clone(),
                    },
                );
            }
        }

        // The worker may still be running frameworks this master has
        // already completed; tear them down.
        let reported_frameworks: HashSet<FrameworkId> = tasks
            .iter()
            .map(|task| task.framework_id.clone())
            .collect();
        let completed_to_shutdown: Vec<FrameworkId> = self
            .frameworks
            .completed
            .iter()
            .filter(|framework| reported_frameworks.contains(&framework.id))
            .map(|framework| framework.id.clone())
            .collect();
        for framework_id in completed_to_shutdown {
            warn!(
                self.logger,
                "Worker re-registered with completed framework; shutting it down on the worker";
                "framework_id" => %framework_id, "worker_id" => %worker_id
            );
            self.send_to(&worker_pid, Protocol::ShutdownFramework { framework_id });
        }
    }

    /// Framework-side reconciliation request.
    pub(crate) fn reconcile_tasks(
        &mut self,
        from: Pid,
        framework_id: FrameworkId,
        statuses: Vec<TaskStatus>,
    ) {
        self.metrics.messages_reconcile_tasks += 1;

        let Some(framework) = self.frameworks.get(&framework_id) else {
            warn!(
                self.logger,
                "Unknown framework attempted to reconcile tasks";
                "framework_id" => %framework_id, "from" => %from
            );
            return;
        };
        if framework.pid != from {
            warn!(
                self.logger,
                "Ignoring reconcile from unexpected address";
                "framework_id" => %framework_id, "from" => %from
            );
            return;
        }

        self.perform_reconciliation(&framework_id, statuses);
    }

    pub(crate) fn perform_reconciliation(
        &mut self,
        framework_id: &FrameworkId,
        statuses: Vec<TaskStatus>,
    ) {
        if statuses.is_empty() {
            self.implicit_reconciliation(framework_id);
        } else {
            self.explicit_reconciliation(framework_id, statuses);
        }
    }

    /// Implicit: answer with the latest state of every pending and
    /// known task. Pure reads; running it twice yields identical
    /// updates and no state change.
    fn implicit_reconciliation(&mut self, framework_id: &FrameworkId) {
        info!(
            self.logger,
            "Performing implicit task state reconciliation";
            "framework_id" => %framework_id
        );

        let mut updates: Vec<StatusUpdate> = Vec::new();
        {
            let Some(framework) = self.frameworks.get(framework_id) else {
                return;
            };

            for (task_id, task_info) in &framework.pending_tasks {
                updates.push(StatusUpdate::from_master(
                    framework_id.clone(),
                    Some(task_info.worker_id.clone()),
                    task_id.clone(),
                    TaskState::Staging,
                    "Reconciliation: Latest task state",
                    Some(StatusReason::Reconciliation),
                    None,
                    self.clock.now_secs(),
                ));
            }

            for (task_id, worker_id) in &framework.tasks {
                let Some(task) = self
                    .workers
                    .get(worker_id)
                    .and_then(|worker| worker.get_task(framework_id, task_id))
                else {
                    continue;
                };
                updates.push(StatusUpdate::from_master(
                    framework_id.clone(),
                    Some(worker_id.clone()),
                    task_id.clone(),
                    task.latest_state(),
                    "Reconciliation: Latest task state",
                    Some(StatusReason::Reconciliation),
                    task.executor_id.clone(),
                    self.clock.now_secs(),
                ));
            }
        }

        for update in updates {
            self.forward_update(update, "", framework_id);
        }
    }

    /// Explicit: answer each requested task individually.
    fn explicit_reconciliation(&mut self, framework_id: &FrameworkId, statuses: Vec<TaskStatus>) {
        info!(
            self.logger,
            "Performing explicit task state reconciliation";
            "framework_id" => %framework_id, "tasks" => statuses.len()
        );

        let mut updates: Vec<StatusUpdate> = Vec::new();
        {
            let Some(framework) = self.frameworks.get(framework_id) else {
                return;
            };

            for status in statuses {
                let task_id = status.task_id.clone();
                let requested_worker = status.worker_id.clone();

                let update = if let Some(task_info) = framework.pending_tasks.get(&task_id) {
                    // Known but pending.
                    Some(StatusUpdate::from_master(
                        framework_id.clone(),
                        Some(task_info.worker_id.clone()),
                        task_id,
                        TaskState::Staging,
                        "Reconciliation: Latest task state",
                        Some(StatusReason::Reconciliation),
                        None,
                        self.clock.now_secs(),
                    ))
                } else if let Some(worker_id) = framework.tasks.get(&task_id) {
                    // Known and launched: answer the latest state.
                    let task = self
                        .workers
                        .get(worker_id)
                        .and_then(|worker| worker.get_task(framework_id, &task_id));
                    task.map(|task| {
                        StatusUpdate::from_master(
                            framework_id.clone(),
                            Some(worker_id.clone()),
                            task_id.clone(),
                            task.latest_state(),
                            "Reconciliation: Latest task state",
                            Some(StatusReason::Reconciliation),
                            task.executor_id.clone(),
                            self.clock.now_secs(),
                        )
                    })
                } else if requested_worker
                    .as_ref()
                    .map(|worker_id| self.workers.registered.contains_key(worker_id))
                    .unwrap_or(false)
                {
                    // Unknown task on a registered worker.
                    Some(StatusUpdate::from_master(
                        framework_id.clone(),
                        requested_worker.clone(),
                        task_id,
                        TaskState::Lost,
                        "Reconciliation: Task is unknown to the worker",
                        Some(StatusReason::Reconciliation),
                        None,
                        self.clock.now_secs(),
                    ))
                } else if self.workers.transitioning(requested_worker.as_ref()) {
                    // The worker's fate is undecided; stay silent
                    // rather than guess.
                    info!(
                        self.logger,
                        "Dropping reconciliation; worker is transitional";
                        "task_id" => %task_id, "framework_id" => %framework_id
                    );
                    None
                } else {
                    // Unknown task, unknown worker.
                    Some(StatusUpdate::from_master(
                        framework_id.clone(),
                        requested_worker.clone(),
                        task_id,
                        TaskState::Lost,
                        "Reconciliation: Task is unknown",
                        Some(StatusReason::Reconciliation),
                        None,
                        self.clock.now_secs(),
                    ))
                };

                if let Some(update) = update {
                    updates.push(update);
                }
            }
        }

        for update in updates {
            self.forward_update(update, "", framework_id);
        }
    }
}
