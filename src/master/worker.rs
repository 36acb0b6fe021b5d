//! Worker registry
//!
//! A registered worker owns its `Task` values; frameworks hold an
//! index into them. Alongside the registered map the registry keeps
//! the disjoint lifecycle sets: workers recovered from the registry
//! awaiting re-registration, addresses with admission in flight,
//! workers being readmitted, workers being removed, and a bounded LRU
//! of removed ids used to fence out zombies. A worker id is in at most
//! one of these at any time.

use crate::actor::clock::Timer;
use crate::actor::Pid;
use crate::ids::{ExecutorId, FrameworkId, OfferId, TaskId, WorkerId};
use crate::master::config::MAX_REMOVED_WORKERS;
use crate::resources::Resources;
use crate::state::{ExecutorInfo, Task, WorkerInfo};
use lru::LruCache;
use std::collections::{HashMap, HashSet};
use std::num::NonZeroUsize;
use std::time::Duration;

pub struct Worker {
    pub id: WorkerId,
    pub info: WorkerInfo,
    pub pid: Pid,
    pub version: Option<String>,
    pub connected: bool,
    pub active: bool,
    pub registered_time: Duration,
    pub reregistered_time: Option<Duration>,

    pub executors: HashMap<FrameworkId, HashMap<ExecutorId, ExecutorInfo>>,
    pub tasks: HashMap<FrameworkId, HashMap<TaskId, Task>>,
    /// Kill requests not yet confirmed; retried when the worker
    /// re-registers still running the task.
    pub killed_tasks: HashMap<FrameworkId, HashSet<TaskId>>,
    pub offers: HashSet<OfferId>,

    pub used_resources: HashMap<FrameworkId, Resources>,
    pub offered_resources: Resources,

    pub missed_pings: u32,
    pub ping_timer: Option<Timer>,
}

impl Worker {
    pub fn new(
        id: WorkerId,
        info: WorkerInfo,
        pid: Pid,
        version: Option<String>,
        registered_time: Duration,
    ) -> Self {
        Worker {
            id,
            info,
            pid,
            version,
            connected: true,
            active: true,
            registered_time,
            reregistered_time: None,
            executors: HashMap::new(),
            tasks: HashMap::new(),
            killed_tasks: HashMap::new(),
            offers: HashSet::new(),
            used_resources: HashMap::new(),
            offered_resources: Resources::new(),
            missed_pings: 0,
            ping_timer: None,
        }
    }

    pub fn checkpointing(&self) -> bool {
        self.info.checkpoint
    }

    pub fn resources(&self) -> &Resources {
        &self.info.resources
    }

    pub fn get_task(&self, framework_id: &FrameworkId, task_id: &TaskId) -> Option<&Task> {
        self.tasks.get(framework_id)?.get(task_id)
    }

    pub fn get_task_mut(
        &mut self,
        framework_id: &FrameworkId,
        task_id: &TaskId,
    ) -> Option<&mut Task> {
        self.tasks.get_mut(framework_id)?.get_mut(task_id)
    }

    pub fn add_task(&mut self, task: Task) {
        // Terminal tasks (reported on re-registration) hold no
        // resources; their terminal update already released them.
        if !task.state.is_terminal() {
            self.used_resources
                .entry(task.framework_id.clone())
                .or_default()
                .add_all(&task.resources);
        }
        self.tasks
            .entry(task.framework_id.clone())
            .or_default()
            .insert(task.task_id.clone(), task);
    }

    /// Release a terminated task's resources. The task stays in the
    /// map until its terminal update is acknowledged.
    pub fn task_terminated(&mut self, task: &Task) {
        if let Some(used) = self.used_resources.get_mut(&task.framework_id) {
            used.subtract_all(&task.resources);
            if used.is_empty() {
                self.used_resources.remove(&task.framework_id);
            }
        }
        if let Some(killed) = self.killed_tasks.get_mut(&task.framework_id) {
            killed.remove(&task.task_id);
            if killed.is_empty() {
                self.killed_tasks.remove(&task.framework_id);
            }
        }
    }

    pub fn remove_task(&mut self, framework_id: &FrameworkId, task_id: &TaskId) -> Option<Task> {
        let per_framework = self.tasks.get_mut(framework_id)?;
        let task = per_framework.remove(task_id)?;
        if per_framework.is_empty() {
            self.tasks.remove(framework_id);
        }

        // Resources of a terminal task were already released.
        if !task.state.is_terminal() {
            if let Some(used) = self.used_resources.get_mut(framework_id) {
                used.subtract_all(&task.resources);
                if used.is_empty() {
                    self.used_resources.remove(framework_id);
                }
            }
        }

        if let Some(killed) = self.killed_tasks.get_mut(framework_id) {
            killed.remove(task_id);
            if killed.is_empty() {
                self.killed_tasks.remove(framework_id);
            }
        }

        Some(task)
    }

    pub fn add_offer(&mut self, offer_id: OfferId, resources: &Resources) {
        self.offers.insert(offer_id);
        self.offered_resources.add_all(resources);
    }

    pub fn remove_offer(&mut self, offer_id: &OfferId, resources: &Resources) {
        if self.offers.remove(offer_id) {
            self.offered_resources.subtract_all(resources);
        }
    }

    pub fn has_executor(&self, framework_id: &FrameworkId, executor_id: &ExecutorId) -> bool {
        self.executors
            .get(framework_id)
            .map_or(false, |executors| executors.contains_key(executor_id))
    }

    pub fn add_executor(&mut self, framework_id: &FrameworkId, executor: ExecutorInfo) {
        self.used_resources
            .entry(framework_id.clone())
            .or_default()
            .add_all(&executor.resources);
        self.executors
            .entry(framework_id.clone())
            .or_default()
            .insert(executor.executor_id.clone(), executor);
    }

    pub fn remove_executor(
        &mut self,
        framework_id: &FrameworkId,
        executor_id: &ExecutorId,
    ) -> Option<ExecutorInfo> {
        let per_framework = self.executors.get_mut(framework_id)?;
        let executor = per_framework.remove(executor_id)?;
        if per_framework.is_empty() {
            self.executors.remove(framework_id);
        }
        if let Some(used) = self.used_resources.get_mut(framework_id) {
            used.subtract_all(&executor.resources);
            if used.is_empty() {
                self.used_resources.remove(framework_id);
            }
        }
        Some(executor)
    }

    /// Executors across all frameworks, for the per-worker cap.
    pub fn executor_count(&self) -> usize {
        self.executors.values().map(|e| e.len()).sum()
    }

    /// Sum of resources in use across frameworks.
    pub fn total_used_resources(&self) -> Resources {
        let mut total = Resources::new();
        for used in self.used_resources.values() {
            total.add_all(used);
        }
        total
    }
}

pub struct Workers {
    pub registered: HashMap<WorkerId, Worker>,
    /// Recovered from the registry; must re-register within the window.
    pub recovered: HashMap<WorkerId, WorkerInfo>,
    /// Addresses with a registration (admission) in flight.
    pub registering: HashSet<Pid>,
    /// Ids with a re-registration (readmission) in flight.
    pub reregistering: HashSet<WorkerId>,
    /// Ids being removed from the registry.
    pub removing: HashSet<WorkerId>,
    /// Removed ids, to reject zombie traffic. Shrinks only by LRU
    /// eviction.
    pub removed: LruCache<WorkerId, ()>,
    /// Fires when the recovered set's re-registration window closes.
    pub recovered_timer: Option<Timer>,
}

impl Workers {
    pub fn new() -> Self {
        Workers {
            registered: HashMap::new(),
            recovered: HashMap::new(),
            registering: HashSet::new(),
            reregistering: HashSet::new(),
            removing: HashSet::new(),
            removed: LruCache::new(NonZeroUsize::new(MAX_REMOVED_WORKERS).unwrap()),
            recovered_timer: None,
        }
    }

    pub fn get(&self, id: &WorkerId) -> Option<&Worker> {
        self.registered.get(id)
    }

    pub fn get_mut(&mut self, id: &WorkerId) -> Option<&mut Worker> {
        self.registered.get_mut(id)
    }

    pub fn id_by_pid(&self, pid: &Pid) -> Option<WorkerId> {
        self.registered
            .values()
            .find(|worker| &worker.pid == pid)
            .map(|worker| worker.id.clone())
    }

    /// Whether the given worker (or, with None, any worker) is in a
    /// transitional state where questions about it cannot be answered.
    pub fn transitioning(&self, worker_id: Option<&WorkerId>) -> bool {
        match worker_id {
            Some(id) => {
                self.recovered.contains_key(id)
                    || self.reregistering.contains(id)
                    || self.removing.contains(id)
            }
            None => {
                !self.recovered.is_empty()
                    || !self.reregistering.is_empty()
                    || !self.removing.is_empty()
            }
        }
    }
}

impl Default for Workers {
    fn default() -> Self {
        Workers::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{TaskInfo, TaskState};

    fn worker() -> Worker {
        Worker::new(
            WorkerId::from("w1"),
            WorkerInfo {
                id: Some(WorkerId::from("w1")),
                hostname: "host1".to_string(),
                resources: Resources::parse("cpus:4;mem:1024", "*").unwrap(),
                attributes: Vec::new(),
                checkpoint: false,
            },
            Pid::new("worker(1)", "host1:5051"),
            Some("0.21.0".to_string()),
            Duration::ZERO,
        )
    }

    fn task(id: &str, resources: &str) -> Task {
        Task::from_info(
            &TaskInfo {
                task_id: TaskId::from(id),
                name: id.to_string(),
                worker_id: WorkerId::from("w1"),
                resources: Resources::parse(resources, "*").unwrap(),
                command: None,
                executor: None,
            },
            FrameworkId::from("f1"),
        )
    }

    #[test]
    fn test_task_accounting() {
        let mut worker = worker();
        worker.add_task(task("t1", "cpus:1;mem:256"));
        worker.add_task(task("t2", "cpus:1;mem:256"));

        let used = worker.total_used_resources();
        assert_eq!(used.cpus(), 2.0);
        assert_eq!(used.mem(), 512.0);

        worker.remove_task(&FrameworkId::from("f1"), &TaskId::from("t1"));
        assert_eq!(worker.total_used_resources().cpus(), 1.0);
    }

    #[test]
    fn test_terminated_task_releases_resources_once() {
        let mut worker = worker();
        let mut t = task("t1", "cpus:2");
        worker.add_task(t.clone());

        t.state = TaskState::Finished;
        worker.task_terminated(&t);
        assert!(worker.total_used_resources().is_empty());

        // Removing the now-terminal task must not subtract again.
        if let Some(tracked) = worker.get_task_mut(&FrameworkId::from("f1"), &TaskId::from("t1")) {
            tracked.state = TaskState::Finished;
        }
        worker.remove_task(&FrameworkId::from("f1"), &TaskId::from("t1"));
        assert!(worker.total_used_resources().is_empty());
    }

    #[test]
    fn test_transitioning_states() {
        let mut workers = Workers::new();
        assert!(!workers.transitioning(None));

        workers
            .recovered
            .insert(WorkerId::from("w9"), worker().info);
        assert!(workers.transitioning(None));
        assert!(workers.transitioning(Some(&WorkerId::from("w9"))));
        assert!(!workers.transitioning(Some(&WorkerId::from("other"))));
    }

    #[test]
    fn test_removed_cache_is_bounded() {
        let mut workers = Workers::new();
        workers.removed.put(WorkerId::from("w1"), ());
        assert!(workers.removed.contains(&WorkerId::from("w1")));
    }
}
