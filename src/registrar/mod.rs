//! Registrar client
//!
//! The registrar durably admits and removes workers through the
//! external coordinator. The master treats every mutation as
//! authoritative: a worker is only fully registered or removed once
//! the registrar acknowledged the operation.
//!
//! `apply` resolves to `true` when the operation took effect and
//! `false` when it was a no-op tolerated by non-strict mode (admit of
//! an admitted worker, readmit of an unknown worker, remove of an
//! unknown worker). In strict mode those same cases fail instead.

use crate::eventual::Eventual;
use crate::ids::WorkerId;
use crate::state::WorkerInfo;
use parking_lot::Mutex;
use std::collections::HashMap;

#[derive(Clone, Debug, Default)]
pub struct Registry {
    pub workers: Vec<WorkerInfo>,
}

#[derive(Clone, Debug)]
pub enum Operation {
    AdmitWorker(WorkerInfo),
    ReadmitWorker(WorkerInfo),
    RemoveWorker(WorkerInfo),
}

pub trait Registrar: Send + Sync {
    /// Recover previously-admitted workers. They must re-register
    /// within the configured window or be removed.
    fn recover(&self) -> Eventual<Registry>;

    fn apply(&self, operation: Operation) -> Eventual<bool>;
}

/// Reference registrar keeping the registry in memory. The durable
/// backend is an external collaborator; this implementation carries
/// the exact admit/readmit/remove semantics the master depends on.
pub struct InMemoryRegistrar {
    strict: bool,
    workers: Mutex<HashMap<WorkerId, WorkerInfo>>,
}

impl InMemoryRegistrar {
    pub fn new(strict: bool) -> Self {
        InMemoryRegistrar {
            strict,
            workers: Mutex::new(HashMap::new()),
        }
    }

    /// Seed the registry, e.g. with workers admitted by a previous
    /// master epoch.
    pub fn with_workers(strict: bool, workers: Vec<WorkerInfo>) -> Self {
        let registrar = InMemoryRegistrar::new(strict);
        {
            let mut map = registrar.workers.lock();
            for info in workers {
                let id = info.id.clone().expect("seeded worker without an id");
                map.insert(id, info);
            }
        }
        registrar
    }

    pub fn contains(&self, id: &WorkerId) -> bool {
        self.workers.lock().contains_key(id)
    }
}

impl Registrar for InMemoryRegistrar {
    fn recover(&self) -> Eventual<Registry> {
        let workers = self.workers.lock().values().cloned().collect();
        Eventual::ready(Registry { workers })
    }

    fn apply(&self, operation: Operation) -> Eventual<bool> {
        let mut workers = self.workers.lock();
        match operation {
            Operation::AdmitWorker(info) => {
                let Some(id) = info.id.clone() else {
                    return Eventual::failed("cannot admit a worker without an id");
                };
                if workers.contains_key(&id) {
                    if self.strict {
                        Eventual::failed(format!("worker {} is already admitted", id))
                    } else {
                        Eventual::ready(false)
                    }
                } else {
                    workers.insert(id, info);
                    Eventual::ready(true)
                }
            }
            Operation::ReadmitWorker(info) => {
                let Some(id) = info.id.clone() else {
                    return Eventual::failed("cannot readmit a worker without an id");
                };
                if workers.contains_key(&id) {
                    workers.insert(id, info);
                    Eventual::ready(true)
                } else if self.strict {
                    Eventual::failed(format!("worker {} is not admitted", id))
                } else {
                    Eventual::ready(false)
                }
            }
            Operation::RemoveWorker(info) => {
                let Some(id) = info.id.clone() else {
                    return Eventual::failed("cannot remove a worker without an id");
                };
                if workers.remove(&id).is_some() {
                    Eventual::ready(true)
                } else if self.strict {
                    Eventual::failed(format!("worker {} is not admitted", id))
                } else {
                    Eventual::ready(false)
                }
            }
        }
    }
}
