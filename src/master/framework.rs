//! Framework registry
//!
//! Frameworks index tasks by id but do not own them (the worker entry
//! does); removal walks both sides. A framework lives either in the
//! registered map or in the bounded completed ring, never both. The
//! principals map is the single place that maps a transport address
//! back to a principal for rate limiting and metrics.

use crate::actor::Pid;
use crate::ids::{ExecutorId, FrameworkId, OfferId, TaskId, WorkerId};
use crate::master::config::{MAX_COMPLETED_FRAMEWORKS, MAX_COMPLETED_TASKS_PER_FRAMEWORK};
use crate::resources::Resources;
use crate::state::{ExecutorInfo, FrameworkInfo, Task, TaskInfo};
use std::collections::{HashMap, HashSet, VecDeque};
use std::time::Duration;

pub struct Framework {
    pub id: FrameworkId,
    pub info: FrameworkInfo,
    pub pid: Pid,
    pub connected: bool,
    pub active: bool,
    pub registered_time: Duration,
    pub reregistered_time: Option<Duration>,
    pub unregistered_time: Option<Duration>,

    /// Tasks validated but awaiting authorization; not yet launched.
    pub pending_tasks: HashMap<TaskId, TaskInfo>,
    /// Index into the owning worker's task map.
    pub tasks: HashMap<TaskId, WorkerId>,
    pub completed_tasks: VecDeque<Task>,

    pub offers: HashSet<OfferId>,
    pub executors: HashMap<WorkerId, HashMap<ExecutorId, ExecutorInfo>>,

    pub used_resources: Resources,
    pub offered_resources: Resources,
}

impl Framework {
    pub fn new(
        id: FrameworkId,
        info: FrameworkInfo,
        pid: Pid,
        registered_time: Duration,
    ) -> Self {
        Framework {
            id,
            info,
            pid,
            connected: true,
            active: true,
            registered_time,
            reregistered_time: None,
            unregistered_time: None,
            pending_tasks: HashMap::new(),
            tasks: HashMap::new(),
            completed_tasks: VecDeque::new(),
            offers: HashSet::new(),
            executors: HashMap::new(),
            used_resources: Resources::new(),
            offered_resources: Resources::new(),
        }
    }

    pub fn has_task(&self, task_id: &TaskId) -> bool {
        self.tasks.contains_key(task_id)
    }

    pub fn add_task(&mut self, task: &Task) {
        self.tasks
            .insert(task.task_id.clone(), task.worker_id.clone());
        if !task.state.is_terminal() {
            self.used_resources.add_all(&task.resources);
        }
    }

    pub fn task_terminated(&mut self, task: &Task) {
        self.used_resources.subtract_all(&task.resources);
    }

    /// Drop the index entry and archive the task in the completed
    /// ring. Live (non-terminal) removals also release resources.
    pub fn remove_task(&mut self, task: &Task) {
        self.tasks.remove(&task.task_id);
        if !task.state.is_terminal() {
            self.used_resources.subtract_all(&task.resources);
        }
        self.add_completed_task(task.clone());
    }

    pub fn add_completed_task(&mut self, task: Task) {
        if self.completed_tasks.len() >= MAX_COMPLETED_TASKS_PER_FRAMEWORK {
            self.completed_tasks.pop_front();
        }
        self.completed_tasks.push_back(task);
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

    pub fn has_executor(&self, worker_id: &WorkerId, executor_id: &ExecutorId) -> bool {
        self.executors
            .get(worker_id)
            .map_or(false, |executors| executors.contains_key(executor_id))
    }

    pub fn add_executor(&mut self, worker_id: &WorkerId, executor: ExecutorInfo) {
        self.used_resources.add_all(&executor.resources);
        self.executors
            .entry(worker_id.clone())
            .or_default()
            .insert(executor.executor_id.clone(), executor);
    }

    pub fn remove_executor(&mut self, worker_id: &WorkerId, executor_id: &ExecutorId) {
        if let Some(per_worker) = self.executors.get_mut(worker_id) {
            if let Some(executor) = per_worker.remove(executor_id) {
                self.used_resources.subtract_all(&executor.resources);
            }
            if per_worker.is_empty() {
                self.executors.remove(worker_id);
            }
        }
    }

    pub fn failover_timeout(&self) -> Duration {
        // Negative or non-finite timeouts fall back to no grace at all.
        let secs = self.info.failover_timeout_secs;
        if secs.is_finite() && secs > 0.0 {
            Duration::from_secs_f64(secs)
        } else {
            Duration::ZERO
        }
    }
}

pub struct Frameworks {
    pub registered: HashMap<FrameworkId, Framework>,
    /// Completed frameworks, evicted oldest-first.
    pub completed: VecDeque<Framework>,
    /// Transport address -> principal of *registered* frameworks.
    /// Value is None for frameworks that did not specify one.
    pub principals: HashMap<Pid, Option<String>>,
}

impl Frameworks {
    pub fn new() -> Self {
        Frameworks {
            registered: HashMap::new(),
            completed: VecDeque::new(),
            principals: HashMap::new(),
        }
    }

    pub fn get(&self, id: &FrameworkId) -> Option<&Framework> {
        self.registered.get(id)
    }

    pub fn get_mut(&mut self, id: &FrameworkId) -> Option<&mut Framework> {
        self.registered.get_mut(id)
    }

    pub fn completed_contains(&self, id: &FrameworkId) -> bool {
        self.completed.iter().any(|framework| &framework.id == id)
    }

    pub fn archive(&mut self, framework: Framework) {
        if self.completed.len() >= MAX_COMPLETED_FRAMEWORKS {
            self.completed.pop_front();
        }
        self.completed.push_back(framework);
    }

    pub fn id_by_pid(&self, pid: &Pid) -> Option<FrameworkId> {
        self.registered
            .values()
            .find(|framework| &framework.pid == pid)
            .map(|framework| framework.id.clone())
    }
}

impl Default for Frameworks {
    fn default() -> Self {
        Frameworks::new()
    }
}
