//! Offer engine
//!
//! Offers are created here from allocator publications and destroyed
//! here on accept, rescind, or timeout; nothing else touches the offer
//! map. Each offer is indexed on both its framework and its worker,
//! and has at most one outcome.

use crate::ids::{ExecutorId, FrameworkId, OfferId, WorkerId};
use crate::master::Master;
use crate::messages::{OfferData, Protocol};
use crate::resources::{Resources, EPHEMERAL_PORTS};
use crate::state::{Attribute, Filters};
use slog::{info, warn};
use std::collections::HashMap;

pub struct Offer {
    pub id: OfferId,
    pub framework_id: FrameworkId,
    pub worker_id: WorkerId,
    pub hostname: String,
    pub resources: Resources,
    pub attributes: Vec<Attribute>,
    pub executor_ids: Vec<ExecutorId>,
}

impl Master {
    /// Allocator publication: turn per-worker resource bundles into
    /// offers and send one batch to the framework.
    pub(crate) fn offer(
        &mut self,
        framework_id: FrameworkId,
        resources: HashMap<WorkerId, Resources>,
    ) {
        let framework_alive = self
            .frameworks
            .get(&framework_id)
            .map(|framework| framework.active)
            .unwrap_or(false);
        if !framework_alive {
            warn!(
                self.logger,
                "Returning offered resources; framework terminated or inactive";
                "framework_id" => %framework_id
            );
            for (worker_id, offered) in resources {
                self.allocator
                    .recover_resources(&framework_id, &worker_id, &offered, None);
            }
            return;
        }

        let mut batch: Vec<OfferData> = Vec::new();
        let mut worker_addresses: Vec<String> = Vec::new();

        for (worker_id, offered) in resources {
            let Some(worker) = self.workers.get(&worker_id) else {
                warn!(
                    self.logger,
                    "Returning offered resources; worker is not valid";
                    "worker_id" => %worker_id
                );
                self.allocator
                    .recover_resources(&framework_id, &worker_id, &offered, None);
                continue;
            };

            // A checkpointing framework may only see checkpointing
            // workers.
            let framework_checkpoints = self
                .frameworks
                .get(&framework_id)
                .map(|framework| framework.info.checkpoint)
                .unwrap_or(false);
            if framework_checkpoints && !worker.info.checkpoint {
                warn!(
                    self.logger,
                    "Returning offered resources; worker does not checkpoint";
                    "worker_id" => %worker_id, "framework_id" => %framework_id
                );
                self.allocator
                    .recover_resources(&framework_id, &worker_id, &offered, None);
                continue;
            }

            // The allocator may race with worker deactivation.
            if !worker.active {
                warn!(
                    self.logger,
                    "Returning offered resources; worker is deactivated";
                    "worker_id" => %worker_id
                );
                self.allocator
                    .recover_resources(&framework_id, &worker_id, &offered, None);
                continue;
            }

            // Saturated workers take no further executors; a default
            // filter makes the allocator back off.
            if let Some(cap) = self.config.max_executors_per_worker {
                if worker.executor_count() >= cap {
                    warn!(
                        self.logger,
                        "Returning offered resources; worker has reached its executor limit";
                        "worker_id" => %worker_id, "limit" => cap
                    );
                    self.allocator.recover_resources(
                        &framework_id,
                        &worker_id,
                        &offered,
                        Some(Filters::default()),
                    );
                    continue;
                }
            }

            let offer_id = self.minter.offer_id();
            let worker = self.workers.get(&worker_id).unwrap();
            let offer = Offer {
                id: offer_id.clone(),
                framework_id: framework_id.clone(),
                worker_id: worker_id.clone(),
                hostname: worker.info.hostname.clone(),
                resources: offered.clone(),
                attributes: worker.info.attributes.clone(),
                executor_ids: worker
                    .executors
                    .get(&framework_id)
                    .map(|executors| executors.keys().cloned().collect())
                    .unwrap_or_default(),
            };
            let worker_pid = worker.pid.to_string();

            // Ephemeral ports stay in the offer for accounting but
            // are invisible to the framework.
            let visible = offered.without(EPHEMERAL_PORTS);

            batch.push(OfferData {
                offer_id: offer_id.clone(),
                framework_id: framework_id.clone(),
                worker_id: worker_id.clone(),
                hostname: offer.hostname.clone(),
                resources: visible,
                attributes: offer.attributes.clone(),
                executor_ids: offer.executor_ids.clone(),
            });
            worker_addresses.push(worker_pid);

            self.frameworks
                .get_mut(&framework_id)
                .unwrap()
                .add_offer(offer_id.clone(), &offered);
            self.workers
                .get_mut(&worker_id)
                .unwrap()
                .add_offer(offer_id.clone(), &offered);
            self.offers.insert(offer_id.clone(), offer);

            if let Some(timeout) = self.config.offer_timeout {
                let handle = self.handle.clone();
                let id = offer_id.clone();
                let timer = self.clock.delay(timeout, move || {
                    handle.dispatch("offer_timeout", move |master| master.offer_timeout(id));
                });
                self.offer_timers.insert(offer_id, timer);
            }
        }

        if batch.is_empty() {
            return;
        }

        info!(
            self.logger,
            "Sending offers to framework";
            "offers" => batch.len(), "framework_id" => %framework_id
        );
        let framework_pid = self.frameworks.get(&framework_id).unwrap().pid.clone();
        self.send_to(
            &framework_pid,
            Protocol::ResourceOffers {
                offers: batch,
                worker_addresses,
            },
        );
    }

    /// Destroy an offer, unindexing it from both entities. With
    /// `rescind` the framework is told the offer is void.
    pub(crate) fn remove_offer(&mut self, offer_id: &OfferId, rescind: bool) {
        let Some(offer) = self.offers.remove(offer_id) else {
            return;
        };

        if let Some(framework) = self.frameworks.get_mut(&offer.framework_id) {
            framework.remove_offer(offer_id, &offer.resources);
        }
        if let Some(worker) = self.workers.get_mut(&offer.worker_id) {
            worker.remove_offer(offer_id, &offer.resources);
        }

        if rescind {
            if let Some(framework) = self.frameworks.get(&offer.framework_id) {
                let pid = framework.pid.clone();
                self.send_to(
                    &pid,
                    Protocol::RescindResourceOffer {
                        offer_id: offer_id.clone(),
                    },
                );
            }
        }

        if let Some(timer) = self.offer_timers.remove(offer_id) {
            timer.cancel();
        }
    }

    /// An unused offer expired: reclaim it and rescind.
    pub(crate) fn offer_timeout(&mut self, offer_id: OfferId) {
        if let Some(offer) = self.offers.get(&offer_id) {
            let (framework_id, worker_id, resources) = (
                offer.framework_id.clone(),
                offer.worker_id.clone(),
                offer.resources.clone(),
            );
            self.allocator
                .recover_resources(&framework_id, &worker_id, &resources, None);
            self.remove_offer(&offer_id, true);
        }
    }
}
