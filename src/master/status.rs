//! Status-update routing
//!
//! Updates flow worker -> master -> framework. The master forwards
//! first, then folds the update into its own copy of the task: state
//! never regresses out of terminal, consecutive same-state statuses
//! coalesce, and resources are recovered exactly once on the first
//! terminal transition. Terminal tasks survive until their update is
//! acknowledged (or immediately vanish when no acknowledgement is
//! expected).

use crate::actor::Pid;
use crate::ids::{FrameworkId, TaskId, WorkerId};
use crate::master::Master;
use crate::messages::Protocol;
use crate::state::StatusUpdate;
use slog::{info, warn};

impl Master {
    pub(crate) fn status_update(&mut self, from: Pid, update: StatusUpdate, ack_address: String) {
        self.metrics.messages_status_update += 1;

        let Some(worker_id) = update.worker_id.clone() else {
            warn!(self.logger, "Ignoring status update without a worker id");
            self.metrics.invalid_status_updates += 1;
            return;
        };

        if self.workers.removed.contains(&worker_id) {
            // Frameworks already saw this worker's tasks as lost; the
            // worker must shut down.
            warn!(
                self.logger,
                "Ignoring status update from removed worker; asking it to shut down";
                "worker_id" => %worker_id
            );
            self.send_to(
                &from,
                Protocol::Shutdown {
                    message: "Status update from unknown worker".to_string(),
                },
            );
            self.metrics.invalid_status_updates += 1;
            return;
        }

        if self.workers.get(&worker_id).is_none() {
            warn!(
                self.logger,
                "Ignoring status update from unknown worker";
                "worker_id" => %worker_id
            );
            self.metrics.invalid_status_updates += 1;
            return;
        }

        let framework_id = update.framework_id.clone();
        if self.frameworks.get(&framework_id).is_none() {
            warn!(
                self.logger,
                "Ignoring status update; framework is unknown";
                "framework_id" => %framework_id
            );
            self.metrics.invalid_status_updates += 1;
            return;
        }

        // Forward to the framework before touching local state.
        self.forward_update(update.clone(), &ack_address, &framework_id);

        let task_known = self
            .workers
            .get(&worker_id)
            .and_then(|worker| worker.get_task(&framework_id, &update.status.task_id))
            .is_some();
        if !task_known {
            warn!(
                self.logger,
                "Could not look up task for status update";
                "task_id" => %update.status.task_id, "worker_id" => %worker_id
            );
            self.metrics.invalid_status_updates += 1;
            return;
        }

        info!(self.logger, "Status update"; "update" => %update, "worker_id" => %worker_id);
        self.update_task(&update);

        // No acknowledgement expected: the terminal task goes now.
        let terminal = self
            .workers
            .get(&worker_id)
            .and_then(|worker| worker.get_task(&framework_id, &update.status.task_id))
            .map(|task| task.state.is_terminal())
            .unwrap_or(false);
        if terminal && ack_address.is_empty() {
            self.remove_task(&framework_id, &worker_id, &update.status.task_id);
        }

        self.metrics.valid_status_updates += 1;
    }

    /// Fold an update into the master's copy of the task. Recovers
    /// resources and runs both entities' terminated bookkeeping on the
    /// first transition into a terminal state.
    pub(crate) fn update_task(&mut self, update: &StatusUpdate) {
        let Some(worker_id) = update.worker_id.clone() else {
            return;
        };
        let framework_id = update.framework_id.clone();
        let task_id = update.status.task_id.clone();

        let (terminated, task_snapshot) = {
            let Some(worker) = self.workers.get_mut(&worker_id) else {
                return;
            };
            let Some(task) = worker.get_task_mut(&framework_id, &task_id) else {
                return;
            };

            // Out-of-order updates must not resurrect a terminal task
            // or corrupt accounting.
            if task.state.is_terminal() && !update.status.state.is_terminal() {
                warn!(
                    self.logger,
                    "Ignoring out of order status update";
                    "task_id" => %task_id, "state" => %task.state, "update" => %update.status.state
                );
                return;
            }

            let next_state = update.latest_state.unwrap_or(update.status.state);
            let terminated = !task.state.is_terminal() && next_state.is_terminal();
            task.state = next_state;

            task.status_update_state = Some(update.status.state);
            task.status_update_uuid = Some(update.uuid.clone());

            // Consecutive same-state statuses coalesce; bulky payloads
            // are dropped to bound memory.
            if task
                .statuses
                .last()
                .map(|status| status.state == update.status.state)
                .unwrap_or(false)
            {
                task.statuses.pop();
            }
            let mut status = update.status.clone();
            status.data.clear();
            task.statuses.push(status);

            (terminated, task.clone())
        };

        if terminated {
            self.metrics.count_terminal_state(task_snapshot.state);
            self.allocator.recover_resources(
                &framework_id,
                &worker_id,
                &task_snapshot.resources,
                None,
            );
            if let Some(worker) = self.workers.get_mut(&worker_id) {
                worker.task_terminated(&task_snapshot);
            }
            if let Some(framework) = self.frameworks.get_mut(&framework_id) {
                framework.task_terminated(&task_snapshot);
            }
        }
    }

    /// Remove a task from both sides. Non-terminal removals recover
    /// the resources that were never released by a terminal update.
    pub(crate) fn remove_task(
        &mut self,
        framework_id: &FrameworkId,
        worker_id: &WorkerId,
        task_id: &TaskId,
    ) {
        let Some(task) = self
            .workers
            .get_mut(worker_id)
            .and_then(|worker| worker.remove_task(framework_id, task_id))
        else {
            return;
        };

        if !task.state.is_terminal() {
            warn!(
                self.logger,
                "Removing task in non-terminal state";
                "task_id" => %task_id, "state" => %task.state
            );
            self.allocator
                .recover_resources(framework_id, worker_id, &task.resources, None);
        }

        if let Some(framework) = self.frameworks.get_mut(framework_id) {
            framework.remove_task(&task);
        }
    }

    pub(crate) fn status_update_acknowledgement(
        &mut self,
        from: Pid,
        worker_id: WorkerId,
        framework_id: FrameworkId,
        task_id: TaskId,
        uuid: String,
    ) {
        self.metrics.messages_status_update_acknowledgement += 1;

        let Some(framework) = self.frameworks.get(&framework_id) else {
            self.metrics.invalid_status_update_acknowledgements += 1;
            return;
        };
        if framework.pid != from {
            warn!(
                self.logger,
                "Ignoring status update acknowledgement from unexpected address";
                "framework_id" => %framework_id, "from" => %from
            );
            self.metrics.invalid_status_update_acknowledgements += 1;
            return;
        }

        let Some(worker) = self.workers.get(&worker_id) else {
            self.metrics.invalid_status_update_acknowledgements += 1;
            return;
        };
        if !worker.connected {
            warn!(
                self.logger,
                "Cannot forward acknowledgement to disconnected worker";
                "worker_id" => %worker_id
            );
            self.metrics.invalid_status_update_acknowledgements += 1;
            return;
        }
        let worker_pid = worker.pid.clone();

        if let Some(task) = worker.get_task(&framework_id, &task_id) {
            let Some(update_state) = task.status_update_state else {
                // An acknowledgement for an update this master never
                // sent (it predates failover). The worker will retry
                // the update, so dropping the acknowledgement is safe.
                warn!(
                    self.logger,
                    "Ignoring status update acknowledgement; no update was sent by this master";
                    "task_id" => %task_id, "framework_id" => %framework_id
                );
                self.metrics.invalid_status_update_acknowledgements += 1;
                return;
            };

            if update_state.is_terminal() && task.status_update_uuid.as_deref() == Some(&uuid) {
                self.remove_task(&framework_id, &worker_id, &task_id);
            }
        }

        info!(
            self.logger,
            "Forwarding status update acknowledgement";
            "task_id" => %task_id, "framework_id" => %framework_id, "worker_id" => %worker_id
        );
        self.send_to(
            &worker_pid,
            Protocol::StatusUpdateAcknowledgement {
                worker_id,
                framework_id,
                task_id,
                uuid,
            },
        );
        self.metrics.valid_status_update_acknowledgements += 1;
    }

    /// Send an update to its framework. `acknowledgee` travels with
    /// the message so the framework knows where to send the ack; empty
    /// means none is expected.
    pub(crate) fn forward_update(
        &mut self,
        update: StatusUpdate,
        acknowledgee: &str,
        framework_id: &FrameworkId,
    ) {
        let Some(framework) = self.frameworks.get(framework_id) else {
            return;
        };
        let pid = framework.pid.clone();
        self.send_to(
            &pid,
            Protocol::StatusUpdate {
                update,
                ack_address: acknowledgee.to_string(),
            },
        );
    }
}
