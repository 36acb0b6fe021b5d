//! Allocator client
//!
//! The allocator decides which worker's resources are offered to which
//! framework; its policy is out of core. The master keeps it informed
//! of every entity and accounting change and receives resource bundles
//! back through the offer callback, which re-enters the master as an
//! ordinary dispatch.

use crate::ids::{FrameworkId, WorkerId};
use crate::resources::{Resource, Resources};
use crate::state::{Filters, FrameworkInfo, WorkerInfo};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// Invoked by the allocator to publish resource bundles for one
/// framework; the master turns each entry into an offer.
pub type OfferCallback =
    Arc<dyn Fn(FrameworkId, HashMap<WorkerId, Resources>) + Send + Sync>;

pub trait Allocator: Send {
    fn initialize(&mut self, roles: Vec<String>, offers: OfferCallback);

    fn add_framework(&mut self, id: &FrameworkId, info: &FrameworkInfo, used: &Resources);
    fn remove_framework(&mut self, id: &FrameworkId);
    fn activate_framework(&mut self, id: &FrameworkId);
    fn deactivate_framework(&mut self, id: &FrameworkId);

    fn add_worker(
        &mut self,
        id: &WorkerId,
        info: &WorkerInfo,
        total: &Resources,
        used: &HashMap<FrameworkId, Resources>,
    );
    fn remove_worker(&mut self, id: &WorkerId);
    fn activate_worker(&mut self, id: &WorkerId);
    fn deactivate_worker(&mut self, id: &WorkerId);

    /// Return resources the framework declined, left unused, or lost.
    fn recover_resources(
        &mut self,
        framework_id: &FrameworkId,
        worker_id: &WorkerId,
        resources: &Resources,
        filters: Option<Filters>,
    );

    /// An implicit allocation change, e.g. a persistent disk acquired
    /// at task launch.
    fn transform_allocation(
        &mut self,
        framework_id: &FrameworkId,
        worker_id: &WorkerId,
        acquired: &[Resource],
    );

    fn update_whitelist(&mut self, hosts: Option<Vec<String>>);
    fn revive_offers(&mut self, framework_id: &FrameworkId);
    fn request_resources(&mut self, framework_id: &FrameworkId, requests: Vec<Resources>);
}

/// One recorded recover_resources call, for assertions.
#[derive(Clone, Debug)]
pub struct RecoveredResources {
    pub framework_id: FrameworkId,
    pub worker_id: WorkerId,
    pub resources: Resources,
    pub filters: Option<Filters>,
}

#[derive(Default)]
pub struct ManualAllocatorState {
    pub offer_callback: Option<OfferCallback>,
    pub frameworks: Vec<FrameworkId>,
    pub workers: Vec<WorkerId>,
    pub recovered: Vec<RecoveredResources>,
    pub transformed: Vec<(FrameworkId, WorkerId, Vec<Resource>)>,
    pub revived: Vec<FrameworkId>,
    pub whitelist: Option<Vec<String>>,
}

/// An allocator with no policy at all: it records every notification
/// and only produces offers when told to. Drives the offer engine in
/// tests and standalone setups.
#[derive(Clone, Default)]
pub struct ManualAllocator {
    state: Arc<Mutex<ManualAllocatorState>>,
}

impl ManualAllocator {
    pub fn new() -> Self {
        ManualAllocator::default()
    }

    pub fn state(&self) -> Arc<Mutex<ManualAllocatorState>> {
        self.state.clone()
    }

    /// Publish resource bundles through the master's offer callback.
    pub fn offer(&self, framework_id: FrameworkId, resources: HashMap<WorkerId, Resources>) {
        let callback = self
            .state
            .lock()
            .offer_callback
            .clone()
            .expect("allocator is not initialized");
        callback(framework_id, resources);
    }

    /// Total resources recovered for (framework, worker), summed over
    /// every recover_resources call.
    pub fn total_recovered(&self, framework_id: &FrameworkId, worker_id: &WorkerId) -> Resources {
        let state = self.state.lock();
        let mut total = Resources::new();
        for entry in &state.recovered {
            if &entry.framework_id == framework_id && &entry.worker_id == worker_id {
                total.add_all(&entry.resources);
            }
        }
        total
    }
}

impl Allocator for ManualAllocator {
    fn initialize(&mut self, _roles: Vec<String>, offers: OfferCallback) {
        self.state.lock().offer_callback = Some(offers);
    }

    fn add_framework(&mut self, id: &FrameworkId, _info: &FrameworkInfo, _used: &Resources) {
        self.state.lock().frameworks.push(id.clone());
    }

    fn remove_framework(&mut self, id: &FrameworkId) {
        self.state.lock().frameworks.retain(|f| f != id);
    }

    fn activate_framework(&mut self, _id: &FrameworkId) {}

    fn deactivate_framework(&mut self, _id: &FrameworkId) {}

    fn add_worker(
        &mut self,
        id: &WorkerId,
        _info: &WorkerInfo,
        _total: &Resources,
        _used: &HashMap<FrameworkId, Resources>,
    ) {
        self.state.lock().workers.push(id.clone());
    }

    fn remove_worker(&mut self, id: &WorkerId) {
        self.state.lock().workers.retain(|w| w != id);
    }

    fn activate_worker(&mut self, _id: &WorkerId) {}

    fn deactivate_worker(&mut self, _id: &WorkerId) {}

    fn recover_resources(
        &mut self,
        framework_id: &FrameworkId,
        worker_id: &WorkerId,
        resources: &Resources,
        filters: Option<Filters>,
    ) {
        self.state.lock().recovered.push(RecoveredResources {
            framework_id: framework_id.clone(),
            worker_id: worker_id.clone(),
            resources: resources.clone(),
            filters,
        });
    }

    fn transform_allocation(
        &mut self,
        framework_id: &FrameworkId,
        worker_id: &WorkerId,
        acquired: &[Resource],
    ) {
        self.state.lock().transformed.push((
            framework_id.clone(),
            worker_id.clone(),
            acquired.to_vec(),
        ));
    }

    fn update_whitelist(&mut self, hosts: Option<Vec<String>>) {
        self.state.lock().whitelist = hosts;
    }

    fn revive_offers(&mut self, framework_id: &FrameworkId) {
        self.state.lock().revived.push(framework_id.clone());
    }

    fn request_resources(&mut self, _framework_id: &FrameworkId, _requests: Vec<Resources>) {}
}
