//! Master counters
//!
//! Single-writer: only the master actor increments these, so plain
//! integers suffice. Gauges derived from registry state (task counts,
//! uptime) are computed on demand by their owners.

#[derive(Debug, Default)]
pub struct Metrics {
    // Message counters, one per inbound message kind.
    pub messages_register_framework: u64,
    pub messages_reregister_framework: u64,
    pub messages_unregister_framework: u64,
    pub messages_deactivate_framework: u64,
    pub messages_launch_tasks: u64,
    pub messages_decline_offers: u64,
    pub messages_revive_offers: u64,
    pub messages_kill_task: u64,
    pub messages_status_update: u64,
    pub messages_status_update_acknowledgement: u64,
    pub messages_reconcile_tasks: u64,
    pub messages_framework_to_executor: u64,
    pub messages_register_worker: u64,
    pub messages_reregister_worker: u64,
    pub messages_unregister_worker: u64,
    pub messages_exited_executor: u64,

    /// Messages dropped by admission (non-leader, unrecovered, or
    /// rate-limit capacity).
    pub dropped_messages: u64,

    pub valid_status_updates: u64,
    pub invalid_status_updates: u64,
    pub valid_status_update_acknowledgements: u64,
    pub invalid_status_update_acknowledgements: u64,
    pub valid_framework_messages: u64,
    pub invalid_framework_messages: u64,

    pub framework_registrations: u64,
    pub framework_reregistrations: u64,
    pub worker_registrations: u64,
    pub worker_reregistrations: u64,
    pub worker_removals: u64,
    pub worker_shutdowns: u64,
    pub recovery_worker_removals: u64,

    pub tasks_finished: u64,
    pub tasks_failed: u64,
    pub tasks_killed: u64,
    pub tasks_lost: u64,
    pub tasks_error: u64,
}

impl Metrics {
    pub fn new() -> Self {
        Metrics::default()
    }

    pub fn count_terminal_state(&mut self, state: crate::state::TaskState) {
        use crate::state::TaskState;
        match state {
            TaskState::Finished => self.tasks_finished += 1,
            TaskState::Failed => self.tasks_failed += 1,
            TaskState::Killed => self.tasks_killed += 1,
            TaskState::Lost => self.tasks_lost += 1,
            TaskState::Error => self.tasks_error += 1,
            _ => {}
        }
    }
}
