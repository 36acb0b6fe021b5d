//! The master actor
//!
//! One actor owns every registry map; handlers run mutually exclusive
//! on its mailbox, so no locks guard the maps. A handler may only
//! suspend by observing an eventual (registrar apply, authorization,
//! rate-limit grant, timer) whose completion re-enters the mailbox as
//! a dispatch; after every such hop the handler re-validates that the
//! entities it touched still exist.
//!
//! Top-level states: Follower until elected, Recovering until the
//! registry is replayed, then Leader. Losing leadership while leading
//! is deliberately fatal so that at most one master ever acts.

pub mod config;
pub mod framework;
pub mod metrics;
pub mod offer;
pub mod reconcile;
pub mod status;
pub mod validation;
pub mod worker;

use crate::actor::clock::{Clock, Timer};
use crate::actor::{Envelope, Pid, Router};
use crate::allocator::{Allocator, OfferCallback};
use crate::authorizer::Authorizer;
use crate::detector::{Contender, Detector};
use crate::eventual::{collect, Eventual};
use crate::ids::{ExecutorId, FrameworkId, IdMinter, MasterId, OfferId, TaskId, WorkerId};
use crate::messages::{CompletedFrameworkArchive, Protocol};
use crate::ratelimit::BoundedRateLimiter;
use crate::registrar::{Operation, Registrar, Registry};
use crate::resources::Resources;
use crate::state::{
    Filters, FrameworkInfo, MasterInfo, StatusReason, StatusUpdate, Task, TaskInfo, TaskState,
    WorkerInfo,
};
use slog::{error, info, warn, Logger};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use config::MasterConfig;
use framework::{Framework, Frameworks};
use metrics::Metrics;
use offer::Offer;
use worker::{Worker, Workers};

/// Why the master process must exit. Anything but `Terminated` maps to
/// a non-zero exit code.
#[derive(Clone, Debug, PartialEq)]
pub enum MasterExit {
    /// Lost leadership while leading; only one master may act.
    LostLeadership,
    ElectionFailed(String),
    RecoveryFailed(String),
    /// A registrar mutation failed; durability is broken.
    RegistrarFailure(String),
    /// Too many recovered workers missed the re-registration window.
    RemovalLimitExceeded {
        stragglers: usize,
        total: usize,
        limit: String,
    },
    Terminated,
}

pub enum MasterEvent {
    Inbound(Envelope),
    Dispatch {
        name: &'static str,
        action: Box<dyn FnOnce(&mut Master) + Send>,
    },
}

/// Cheap handle for re-entering the master's mailbox from callbacks
/// and timers.
#[derive(Clone)]
pub struct MasterHandle {
    tx: mpsc::UnboundedSender<MasterEvent>,
}

impl MasterHandle {
    pub fn dispatch<F: FnOnce(&mut Master) + Send + 'static>(&self, name: &'static str, action: F) {
        let _ = self.tx.send(MasterEvent::Dispatch {
            name,
            action: Box::new(action),
        });
    }

    /// Ask the master to stop cleanly.
    pub fn terminate(&self) {
        self.dispatch("terminate", |master| {
            master.exit = Some(MasterExit::Terminated);
        });
    }
}

pub struct Master {
    pub(crate) logger: Logger,
    pub(crate) config: MasterConfig,
    pub(crate) info: MasterInfo,
    pub(crate) pid: Pid,
    pub(crate) clock: Clock,
    pub(crate) router: Router,
    pub(crate) handle: MasterHandle,
    events: mpsc::UnboundedReceiver<MasterEvent>,

    pub(crate) registrar: Arc<dyn Registrar>,
    pub(crate) allocator: Box<dyn Allocator>,
    pub(crate) authorizer: Option<Arc<dyn Authorizer>>,
    pub(crate) contender: Arc<dyn Contender>,
    pub(crate) detector: Arc<dyn Detector>,

    pub(crate) leader: Option<MasterInfo>,
    /// Registry recovery finished; messages may be admitted.
    pub(crate) recovered: bool,
    recovery_started: bool,
    /// Size of the recovered set when recovery completed, for the
    /// removal safety limit.
    recovery_worker_count: usize,

    pub(crate) workers: Workers,
    pub(crate) frameworks: Frameworks,
    pub(crate) offers: HashMap<OfferId, Offer>,
    pub(crate) offer_timers: HashMap<OfferId, Timer>,

    /// Per-principal admission. A None value means the principal is
    /// configured as unthrottled.
    limiters: HashMap<String, Option<BoundedRateLimiter>>,
    default_limiter: Option<BoundedRateLimiter>,

    pub(crate) minter: IdMinter,
    pub(crate) metrics: Metrics,
    pub(crate) exit: Option<MasterExit>,
}

impl Master {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: MasterConfig,
        clock: Clock,
        router: Router,
        registrar: Arc<dyn Registrar>,
        mut allocator: Box<dyn Allocator>,
        authorizer: Option<Arc<dyn Authorizer>>,
        contender: Arc<dyn Contender>,
        detector: Arc<dyn Detector>,
        logger: Logger,
    ) -> Result<Master, config::ConfigError> {
        config.validate()?;

        let master_id = MasterId::generate(&config.hostname, config.port);
        let info = MasterInfo {
            id: master_id.0.clone(),
            address: config.address(),
        };
        let pid = Pid::new("master", config.address());

        let (tx, events) = mpsc::unbounded_channel();
        let handle = MasterHandle { tx };

        // Inbound traffic enters the same mailbox as dispatches.
        let inbound = handle.clone();
        router.register(pid.clone(), move |envelope| {
            let _ = inbound.tx.send(MasterEvent::Inbound(envelope));
        });

        // Allocator publications re-enter as ordinary dispatches.
        let offer_handle = handle.clone();
        let offer_callback: OfferCallback = Arc::new(move |framework_id, resources| {
            offer_handle.dispatch("offer", move |master| master.offer(framework_id, resources));
        });
        allocator.initialize(config.roles.clone(), offer_callback);
        allocator.update_whitelist(config.whitelist.clone());

        let mut limiters = HashMap::new();
        let mut default_limiter = None;
        if let Some(rate_limits) = &config.rate_limits {
            for limit in &rate_limits.limits {
                let limiter = limit
                    .qps
                    .map(|qps| BoundedRateLimiter::new(clock.clone(), qps, limit.capacity));
                limiters.insert(limit.principal.clone(), limiter);
            }
            default_limiter = rate_limits.aggregate_default_qps.map(|qps| {
                BoundedRateLimiter::new(clock.clone(), qps, rate_limits.aggregate_default_capacity)
            });
        }

        info!(logger, "Master started"; "id" => %master_id, "address" => config.address());

        let mut master = Master {
            logger,
            config,
            info,
            pid,
            clock,
            router,
            handle,
            events,
            registrar,
            allocator,
            authorizer,
            contender,
            detector,
            leader: None,
            recovered: false,
            recovery_started: false,
            recovery_worker_count: 0,
            workers: Workers::new(),
            frameworks: Frameworks::new(),
            offers: HashMap::new(),
            offer_timers: HashMap::new(),
            limiters,
            default_limiter,
            minter: IdMinter::new(master_id),
            metrics: Metrics::new(),
            exit: None,
        };

        // Stand for election immediately so candidacy and detection
        // land in the mailbox ahead of any peer traffic.
        master.start_election();
        Ok(master)
    }

    pub fn handle(&self) -> MasterHandle {
        self.handle.clone()
    }

    pub fn master_info(&self) -> MasterInfo {
        self.info.clone()
    }

    pub fn self_pid(&self) -> Pid {
        self.pid.clone()
    }

    pub fn elected(&self) -> bool {
        self.leader.as_ref() == Some(&self.info)
    }

    /// Run until a fatal condition or explicit termination.
    pub async fn run(mut self) -> MasterExit {
        while self.exit.is_none() {
            match self.events.recv().await {
                Some(MasterEvent::Inbound(Envelope::Message { from, message })) => {
                    self.visit_message(from, message);
                }
                Some(MasterEvent::Inbound(Envelope::Exited { pid })) => {
                    self.visit_exited(pid);
                }
                Some(MasterEvent::Dispatch { action, .. }) => {
                    action(&mut self);
                }
                None => break,
            }
        }

        let exit = self.exit.clone().unwrap_or(MasterExit::Terminated);
        match &exit {
            MasterExit::LostLeadership => {
                error!(self.logger, "Lost leadership... committing suicide!");
            }
            MasterExit::RemovalLimitExceeded {
                stragglers,
                total,
                limit,
            } => {
                error!(
                    self.logger,
                    "Post-recovery worker removal limit exceeded";
                    "stragglers" => stragglers, "recovered" => total, "limit" => limit
                );
            }
            _ => {}
        }
        exit
    }

    // ---------------------------------------------------------------
    // Election and recovery
    // ---------------------------------------------------------------

    fn start_election(&mut self) {
        let handle = self.handle.clone();
        self.contender.contend().on_any(move |candidacy| {
            handle.dispatch("contended", move |master| master.contended(candidacy));
        });

        let handle = self.handle.clone();
        self.detector.detect(None).on_any(move |leader| {
            handle.dispatch("detected", move |master| master.detected(leader));
        });
    }

    fn contended(&mut self, candidacy: Eventual<Eventual<()>>) {
        if let Some(message) = candidacy.failure() {
            self.exit = Some(MasterExit::ElectionFailed(format!(
                "Failed to contend: {}",
                message
            )));
            return;
        }
        let Some(lost) = candidacy.get() else {
            return;
        };
        let handle = self.handle.clone();
        lost.on_any(move |result| {
            handle.dispatch("lost_candidacy", move |master| master.lost_candidacy(result));
        });
    }

    fn lost_candidacy(&mut self, lost: Eventual<()>) {
        if let Some(message) = lost.failure() {
            self.exit = Some(MasterExit::ElectionFailed(format!(
                "Failed to watch for candidacy: {}",
                message
            )));
            return;
        }
        if self.elected() {
            self.exit = Some(MasterExit::LostLeadership);
            return;
        }

        info!(self.logger, "Lost candidacy as a follower; contending again");
        let handle = self.handle.clone();
        self.contender.contend().on_any(move |candidacy| {
            handle.dispatch("contended", move |master| master.contended(candidacy));
        });
    }

    fn detected(&mut self, detection: Eventual<Option<MasterInfo>>) {
        if let Some(message) = detection.failure() {
            self.exit = Some(MasterExit::ElectionFailed(format!(
                "Failed to detect the leading master: {}",
                message
            )));
            return;
        }

        let was_elected = self.elected();
        self.leader = detection.get().flatten();

        info!(
            self.logger,
            "New leader detected";
            "leader" => self.leader.as_ref().map(|l| l.address.clone()).unwrap_or_else(|| "none".to_string())
        );

        if was_elected && !self.elected() {
            self.exit = Some(MasterExit::LostLeadership);
            return;
        }

        if self.elected() && !was_elected {
            info!(self.logger, "Elected as the leading master");
            self.recover_registry();
        }

        // Keep detecting.
        let handle = self.handle.clone();
        self.detector.detect(self.leader.clone()).on_any(move |leader| {
            handle.dispatch("detected", move |master| master.detected(leader));
        });
    }

    fn recover_registry(&mut self) {
        if self.recovery_started {
            return;
        }
        self.recovery_started = true;

        info!(self.logger, "Recovering from the registry");
        let handle = self.handle.clone();
        self.registrar.recover().on_any(move |registry| {
            handle.dispatch("recovered", move |master| master.registry_recovered(registry));
        });
    }

    fn registry_recovered(&mut self, registry: Eventual<Registry>) {
        if let Some(message) = registry.failure() {
            self.exit = Some(MasterExit::RecoveryFailed(message));
            return;
        }
        let Some(registry) = registry.get() else {
            self.exit = Some(MasterExit::RecoveryFailed("recovery discarded".to_string()));
            return;
        };

        for info in &registry.workers {
            if let Some(id) = &info.id {
                self.workers.recovered.insert(id.clone(), info.clone());
            }
        }
        self.recovery_worker_count = self.workers.recovered.len();

        let handle = self.handle.clone();
        self.workers.recovered_timer = Some(self.clock.delay(
            self.config.worker_reregister_timeout,
            move || {
                handle.dispatch("recovered_workers_timeout", |master| {
                    master.recovered_workers_timeout();
                });
            },
        ));

        self.recovered = true;
        info!(
            self.logger,
            "Recovered workers from the registry";
            "workers" => registry.workers.len(),
            "reregister_timeout" => ?self.config.worker_reregister_timeout
        );
    }

    fn recovered_workers_timeout(&mut self) {
        let limit = self.config.removal_limit_fraction().unwrap_or(1.0);
        let stragglers = self.workers.recovered.len();
        if self.recovery_worker_count > 0 {
            let fraction = stragglers as f64 / self.recovery_worker_count as f64;
            if fraction > limit {
                self.exit = Some(MasterExit::RemovalLimitExceeded {
                    stragglers,
                    total: self.recovery_worker_count,
                    limit: self.config.recovery_worker_removal_limit.clone(),
                });
                return;
            }
        }

        let stale: Vec<(WorkerId, WorkerInfo)> = self.workers.recovered.drain().collect();
        for (id, info) in stale {
            warn!(
                self.logger,
                "Worker did not re-register within the timeout; removing it";
                "worker_id" => %id, "hostname" => &info.hostname
            );
            self.metrics.recovery_worker_removals += 1;
            self.workers.removing.insert(id.clone());

            let handle = self.handle.clone();
            let worker_id = id.clone();
            self.registrar
                .apply(Operation::RemoveWorker(info))
                .on_any(move |removed| {
                    handle.dispatch("removed_recovered_worker", move |master| {
                        master.removed_recovered_worker(worker_id, removed);
                    });
                });
        }
    }

    fn removed_recovered_worker(&mut self, worker_id: WorkerId, removed: Eventual<bool>) {
        self.workers.removing.remove(&worker_id);
        if let Some(message) = removed.failure() {
            self.exit = Some(MasterExit::RegistrarFailure(format!(
                "Failed to remove worker {}: {}",
                worker_id, message
            )));
            return;
        }
        self.workers.removed.put(worker_id, ());
        self.metrics.worker_removals += 1;
    }

    // ---------------------------------------------------------------
    // Message admission
    // ---------------------------------------------------------------

    fn visit_message(&mut self, from: Pid, message: Protocol) {
        let is_registered_framework = self.frameworks.principals.contains_key(&from);
        let principal = self
            .frameworks
            .principals
            .get(&from)
            .cloned()
            .unwrap_or(None);

        // All traffic is dropped while not leading or not recovered.
        if !self.elected() {
            self.metrics.dropped_messages += 1;
            return;
        }
        if !self.recovered {
            self.metrics.dropped_messages += 1;
            return;
        }

        // Per-principal throttling for registered-framework traffic.
        if let Some(principal) = principal.clone().filter(|p| self.limiters.contains_key(p)) {
            if let Some(Some(limiter)) = self.limiters.get_mut(&principal) {
                if limiter.has_capacity() {
                    limiter.pending += 1;
                    let handle = self.handle.clone();
                    let key = Some(principal);
                    limiter.limiter.acquire().on_ready(move |_| {
                        handle.dispatch("throttled", move |master| {
                            master.throttled(from, message, key);
                        });
                    });
                } else {
                    let capacity = limiter.capacity.unwrap_or(0);
                    self.exceeded_capacity(&from, &message, principal.as_str(), capacity);
                }
                return;
            }
            // Principal configured as unthrottled.
            self.handle_message(from, message);
            return;
        }

        if is_registered_framework {
            if let Some(limiter) = self.default_limiter.as_mut() {
                if limiter.has_capacity() {
                    limiter.pending += 1;
                    let handle = self.handle.clone();
                    limiter.limiter.acquire().on_ready(move |_| {
                        handle.dispatch("throttled", move |master| {
                            master.throttled(from, message, None);
                        });
                    });
                } else {
                    let capacity = limiter.capacity.unwrap_or(0);
                    let principal = principal.as_deref().unwrap_or("").to_string();
                    self.exceeded_capacity(&from, &message, &principal, capacity);
                }
                return;
            }
        }

        self.handle_message(from, message);
    }

    fn throttled(&mut self, from: Pid, message: Protocol, principal: Option<String>) {
        match principal {
            Some(principal) => {
                if let Some(Some(limiter)) = self.limiters.get_mut(&principal) {
                    limiter.pending = limiter.pending.saturating_sub(1);
                }
            }
            None => {
                if let Some(limiter) = self.default_limiter.as_mut() {
                    limiter.pending = limiter.pending.saturating_sub(1);
                }
            }
        }
        self.handle_message(from, message);
    }

    fn exceeded_capacity(&mut self, from: &Pid, message: &Protocol, principal: &str, capacity: u64) {
        warn!(
            self.logger,
            "Dropping message: capacity exceeded";
            "message" => message.name(), "from" => %from, "principal" => principal, "capacity" => capacity
        );
        self.metrics.dropped_messages += 1;
        self.send_to(
            from,
            Protocol::FrameworkError {
                message: format!(
                    "Message {} dropped: capacity({}) exceeded",
                    message.name(),
                    capacity
                ),
            },
        );
    }

    fn visit_exited(&mut self, pid: Pid) {
        // Exited events ride the same limiter so ordering with
        // messages from the same address is preserved, but they never
        // consume capacity.
        let principal = self
            .frameworks
            .principals
            .get(&pid)
            .cloned()
            .unwrap_or(None);
        let is_registered_framework = self.frameworks.principals.contains_key(&pid);

        if let Some(principal) = principal.filter(|p| self.limiters.contains_key(p)) {
            if let Some(Some(limiter)) = self.limiters.get_mut(&principal) {
                let handle = self.handle.clone();
                limiter.limiter.acquire().on_ready(move |_| {
                    handle.dispatch("exited", move |master| master.exited(pid));
                });
                return;
            }
        } else if is_registered_framework {
            if let Some(limiter) = self.default_limiter.as_mut() {
                let handle = self.handle.clone();
                limiter.limiter.acquire().on_ready(move |_| {
                    handle.dispatch("exited", move |master| master.exited(pid));
                });
                return;
            }
        }

        self.exited(pid);
    }

    fn handle_message(&mut self, from: Pid, message: Protocol) {
        match message {
            Protocol::RegisterFramework { framework } => self.register_framework(from, framework),
            Protocol::ReregisterFramework {
                framework,
                failover,
            } => self.reregister_framework(from, framework, failover),
            Protocol::UnregisterFramework { framework_id } => {
                self.unregister_framework(from, framework_id)
            }
            Protocol::DeactivateFramework { framework_id } => {
                self.deactivate_framework(from, framework_id)
            }
            Protocol::LaunchTasks {
                framework_id,
                tasks,
                filters,
                offer_ids,
            } => self.launch_tasks(from, framework_id, tasks, filters, offer_ids),
            Protocol::ReviveOffers { framework_id } => self.revive_offers(from, framework_id),
            Protocol::KillTask {
                framework_id,
                task_id,
            } => self.kill_task(from, framework_id, task_id),
            Protocol::StatusUpdateAcknowledgement {
                worker_id,
                framework_id,
                task_id,
                uuid,
            } => self.status_update_acknowledgement(from, worker_id, framework_id, task_id, uuid),
            Protocol::ReconcileTasks {
                framework_id,
                statuses,
            } => self.reconcile_tasks(from, framework_id, statuses),
            Protocol::FrameworkToExecutor {
                worker_id,
                framework_id,
                executor_id,
                data,
            } => self.framework_to_executor(from, worker_id, framework_id, executor_id, data),
            Protocol::RegisterWorker { worker, version } => {
                self.register_worker(from, worker, version)
            }
            Protocol::ReregisterWorker {
                worker,
                executors,
                tasks,
                completed_frameworks,
                version,
            } => self.reregister_worker(
                from,
                worker,
                executors,
                tasks,
                completed_frameworks,
                version,
            ),
            Protocol::UnregisterWorker { worker_id } => self.unregister_worker(from, worker_id),
            Protocol::StatusUpdate {
                update,
                ack_address,
            } => self.status_update(from, update, ack_address),
            Protocol::ExitedExecutor {
                worker_id,
                framework_id,
                executor_id,
                status,
            } => self.exited_executor(from, worker_id, framework_id, executor_id, status),
            Protocol::PongWorker => self.pong_worker(from),
            other => {
                warn!(
                    self.logger,
                    "Dropping unexpected message";
                    "message" => other.name(), "from" => %from
                );
                self.metrics.dropped_messages += 1;
            }
        }
    }

    // ---------------------------------------------------------------
    // Framework lifecycle
    // ---------------------------------------------------------------

    fn register_framework(&mut self, from: Pid, info: FrameworkInfo) {
        self.metrics.messages_register_framework += 1;
        info!(
            self.logger,
            "Received registration request";
            "framework" => &info.name, "from" => %from
        );

        let handle = self.handle.clone();
        let info_ = info.clone();
        self.validate_framework(&info).on_any(move |validation| {
            handle.dispatch("register_framework", move |master| {
                master.finish_register_framework(from, info_, validation);
            });
        });
    }

    fn finish_register_framework(
        &mut self,
        from: Pid,
        info: FrameworkInfo,
        validation: Eventual<Option<String>>,
    ) {
        if let Some(message) = Self::validation_error(&validation) {
            info!(
                self.logger,
                "Refusing framework registration";
                "framework" => &info.name, "reason" => &message
            );
            self.send_to(&from, Protocol::FrameworkError { message });
            return;
        }

        // A framework retrying registration gets its acknowledgement
        // resent rather than a second registration.
        if let Some(existing) = self.frameworks.id_by_pid(&from) {
            info!(
                self.logger,
                "Framework already registered; resending acknowledgement";
                "framework_id" => %existing
            );
            let message = Protocol::FrameworkRegistered {
                framework_id: existing,
                master: self.info.clone(),
            };
            self.send_to(&from, message);
            return;
        }

        if info.user == "root" && !self.config.root_submissions {
            self.send_to(
                &from,
                Protocol::FrameworkError {
                    message: "User 'root' is not allowed to run frameworks".to_string(),
                },
            );
            return;
        }

        let id = self.minter.framework_id();
        let mut info = info;
        info.id = Some(id.clone());
        let framework = Framework::new(id.clone(), info, from.clone(), self.clock.now());

        info!(self.logger, "Registering framework"; "framework_id" => %id, "pid" => %from);
        self.add_framework(framework);
        self.metrics.framework_registrations += 1;

        self.send_to(
            &from,
            Protocol::FrameworkRegistered {
                framework_id: id,
                master: self.info.clone(),
            },
        );
    }

    fn reregister_framework(&mut self, from: Pid, info: FrameworkInfo, failover: bool) {
        self.metrics.messages_reregister_framework += 1;

        let Some(id) = info.id.clone() else {
            self.send_to(
                &from,
                Protocol::FrameworkError {
                    message: "Framework reregistering without a framework id".to_string(),
                },
            );
            return;
        };

        if self.frameworks.completed_contains(&id) {
            warn!(
                self.logger,
                "Completed framework attempted to re-register";
                "framework_id" => %id
            );
            self.send_to(
                &from,
                Protocol::FrameworkError {
                    message: "Completed framework attempted to re-register".to_string(),
                },
            );
            return;
        }

        let handle = self.handle.clone();
        let info_ = info.clone();
        self.validate_framework(&info).on_any(move |validation| {
            handle.dispatch("reregister_framework", move |master| {
                master.finish_reregister_framework(from, info_, failover, validation);
            });
        });
    }

    fn finish_reregister_framework(
        &mut self,
        from: Pid,
        info: FrameworkInfo,
        failover: bool,
        validation: Eventual<Option<String>>,
    ) {
        if let Some(message) = Self::validation_error(&validation) {
            self.send_to(&from, Protocol::FrameworkError { message });
            return;
        }

        let id = info.id.clone().expect("checked before validation");
        let now = self.clock.now();

        if self.frameworks.registered.contains_key(&id) {
            {
                let framework = self.frameworks.get_mut(&id).unwrap();
                framework.reregistered_time = Some(now);
            }

            if failover {
                info!(self.logger, "Framework failed over"; "framework_id" => %id);
                self.failover_framework(&id, from.clone());
            } else {
                let registered_pid = self.frameworks.get(&id).unwrap().pid.clone();
                if from != registered_pid {
                    warn!(
                        self.logger,
                        "Disallowing re-registration from unexpected address";
                        "framework_id" => %id, "from" => %from, "registered" => %registered_pid
                    );
                    self.send_to(
                        &from,
                        Protocol::FrameworkError {
                            message: "Framework failed over".to_string(),
                        },
                    );
                    return;
                }

                // The scheduler may have replied to offers the master
                // never saw applied; drop them all.
                let offer_ids: Vec<OfferId> = self
                    .frameworks
                    .get(&id)
                    .unwrap()
                    .offers
                    .iter()
                    .cloned()
                    .collect();
                for offer_id in offer_ids {
                    if let Some(offer) = self.offers.get(&offer_id) {
                        let (fid, wid, resources) = (
                            offer.framework_id.clone(),
                            offer.worker_id.clone(),
                            offer.resources.clone(),
                        );
                        self.allocator
                            .recover_resources(&fid, &wid, &resources, None);
                    }
                    self.remove_offer(&offer_id, true);
                }

                let framework = self.frameworks.get_mut(&id).unwrap();
                framework.connected = true;
                let needs_activation = !framework.active;
                if needs_activation {
                    framework.active = true;
                    self.allocator.activate_framework(&id);
                }

                self.metrics.framework_reregistrations += 1;
                self.send_to(
                    &from,
                    Protocol::FrameworkReregistered {
                        framework_id: id.clone(),
                        master: self.info.clone(),
                    },
                );
            }
        } else {
            // A scheduler reconnecting to a newly-elected master:
            // adopt tasks and executors that re-registered workers
            // already reported for it.
            let mut framework = Framework::new(id.clone(), info, from.clone(), now);
            framework.reregistered_time = Some(now);

            for worker in self.workers.registered.values() {
                if let Some(tasks) = worker.tasks.get(&id) {
                    for task in tasks.values() {
                        framework.add_task(task);
                    }
                }
                if let Some(executors) = worker.executors.get(&id) {
                    for executor in executors.values() {
                        framework.add_executor(&worker.id, executor.clone());
                    }
                }
            }

            info!(self.logger, "Re-registering framework"; "framework_id" => %id, "pid" => %from);
            self.add_framework(framework);
            self.metrics.framework_reregistrations += 1;

            self.send_to(
                &from,
                Protocol::FrameworkRegistered {
                    framework_id: id.clone(),
                    master: self.info.clone(),
                },
            );
        }

        // Broadcast the (possibly new) framework address to every
        // worker; executors may be running without active tasks.
        let worker_pids: Vec<Pid> = self
            .workers
            .registered
            .values()
            .map(|worker| worker.pid.clone())
            .collect();
        for pid in worker_pids {
            self.send_to(
                &pid,
                Protocol::UpdateFramework {
                    framework_id: id.clone(),
                    framework_address: from.to_string(),
                },
            );
        }
    }

    fn unregister_framework(&mut self, from: Pid, framework_id: FrameworkId) {
        self.metrics.messages_unregister_framework += 1;
        info!(self.logger, "Asked to unregister framework"; "framework_id" => %framework_id);

        if let Some(framework) = self.frameworks.get(&framework_id) {
            if framework.pid == from {
                self.remove_framework(&framework_id);
            } else {
                warn!(
                    self.logger,
                    "Ignoring unregister from unexpected address";
                    "framework_id" => %framework_id, "from" => %from
                );
            }
        }
    }

    fn deactivate_framework(&mut self, from: Pid, framework_id: FrameworkId) {
        self.metrics.messages_deactivate_framework += 1;

        let Some(framework) = self.frameworks.get(&framework_id) else {
            warn!(
                self.logger,
                "Ignoring deactivate for unknown framework";
                "framework_id" => %framework_id
            );
            return;
        };
        if framework.pid != from {
            warn!(
                self.logger,
                "Ignoring deactivate from unexpected address";
                "framework_id" => %framework_id, "from" => %from
            );
            return;
        }
        self.deactivate_framework_entity(&framework_id);
    }

    /// Stop offering to the framework and pull back outstanding offers.
    pub(crate) fn deactivate_framework_entity(&mut self, framework_id: &FrameworkId) {
        info!(self.logger, "Deactivating framework"; "framework_id" => %framework_id);

        let Some(framework) = self.frameworks.get_mut(framework_id) else {
            return;
        };
        framework.active = false;
        let offer_ids: Vec<OfferId> = framework.offers.iter().cloned().collect();

        self.allocator.deactivate_framework(framework_id);

        for offer_id in offer_ids {
            if let Some(offer) = self.offers.get(&offer_id) {
                let (fid, wid, resources) = (
                    offer.framework_id.clone(),
                    offer.worker_id.clone(),
                    offer.resources.clone(),
                );
                self.allocator
                    .recover_resources(&fid, &wid, &resources, None);
            }
            self.remove_offer(&offer_id, true);
        }
    }

    pub(crate) fn disconnect_framework(&mut self, framework_id: &FrameworkId) {
        info!(self.logger, "Disconnecting framework"; "framework_id" => %framework_id);
        if let Some(framework) = self.frameworks.get_mut(framework_id) {
            framework.connected = false;
        }
        self.deactivate_framework_entity(framework_id);
    }

    fn add_framework(&mut self, framework: Framework) {
        let id = framework.id.clone();
        let pid = framework.pid.clone();
        let principal = framework.info.principal.clone();

        self.allocator
            .add_framework(&id, &framework.info, &framework.used_resources);
        self.frameworks.registered.insert(id, framework);
        self.frameworks.principals.insert(pid.clone(), principal);
        self.router.link(&self.pid, &pid);
    }

    /// Replace the framework's address after a scheduler failover.
    fn failover_framework(&mut self, framework_id: &FrameworkId, new_pid: Pid) {
        let Some(framework) = self.frameworks.get_mut(framework_id) else {
            return;
        };
        let old_pid = framework.pid.clone();

        // An older instance at a different address gets shut down.
        if old_pid != new_pid {
            self.send_to(
                &old_pid,
                Protocol::FrameworkError {
                    message: "Framework failed over".to_string(),
                },
            );
        }

        let framework = self.frameworks.get_mut(framework_id).unwrap();
        framework.pid = new_pid.clone();
        self.router.link(&self.pid, &new_pid);

        self.send_to(
            &new_pid,
            Protocol::FrameworkRegistered {
                framework_id: framework_id.clone(),
                master: self.info.clone(),
            },
        );

        // Pull back outstanding offers after the address swap so the
        // allocator may immediately re-offer to the new scheduler.
        let offer_ids: Vec<OfferId> = self
            .frameworks
            .get(framework_id)
            .unwrap()
            .offers
            .iter()
            .cloned()
            .collect();
        for offer_id in offer_ids {
            if let Some(offer) = self.offers.get(&offer_id) {
                let (fid, wid, resources) = (
                    offer.framework_id.clone(),
                    offer.worker_id.clone(),
                    offer.resources.clone(),
                );
                self.allocator
                    .recover_resources(&fid, &wid, &resources, None);
            }
            self.remove_offer(&offer_id, true);
        }

        let framework = self.frameworks.get_mut(framework_id).unwrap();
        framework.connected = true;
        if !framework.active {
            framework.active = true;
            self.allocator.activate_framework(framework_id);
        }

        // Re-key the principal mapping to the new address.
        if old_pid != new_pid {
            if let Some(principal) = self.frameworks.principals.remove(&old_pid) {
                self.frameworks.principals.insert(new_pid, principal);
            }
        }
    }

    pub(crate) fn remove_framework(&mut self, framework_id: &FrameworkId) {
        info!(self.logger, "Removing framework"; "framework_id" => %framework_id);

        let Some(framework) = self.frameworks.get(framework_id) else {
            return;
        };
        if framework.active {
            self.allocator.deactivate_framework(framework_id);
        }

        // Tell every worker to tear the framework down.
        let worker_pids: Vec<Pid> = self
            .workers
            .registered
            .values()
            .map(|worker| worker.pid.clone())
            .collect();
        for pid in worker_pids {
            self.send_to(
                &pid,
                Protocol::ShutdownFramework {
                    framework_id: framework_id.clone(),
                },
            );
        }

        self.frameworks
            .get_mut(framework_id)
            .unwrap()
            .pending_tasks
            .clear();

        // The framework's tasks are implicitly killed; mark and remove
        // without sending updates to the (gone) scheduler.
        let task_index: Vec<(TaskId, WorkerId)> = self
            .frameworks
            .get(framework_id)
            .unwrap()
            .tasks
            .iter()
            .map(|(task_id, worker_id)| (task_id.clone(), worker_id.clone()))
            .collect();
        for (task_id, worker_id) in task_index {
            let executor_id = self
                .workers
                .get(&worker_id)
                .and_then(|worker| worker.get_task(framework_id, &task_id))
                .and_then(|task| task.executor_id.clone());
            let update = StatusUpdate::from_master(
                framework_id.clone(),
                Some(worker_id.clone()),
                task_id.clone(),
                TaskState::Killed,
                &format!("Framework {} removed", framework_id),
                Some(StatusReason::FrameworkRemoved),
                executor_id,
                self.clock.now_secs(),
            );
            self.update_task(&update);
            self.remove_task(framework_id, &worker_id, &task_id);
        }

        // Pull back offers.
        let offer_ids: Vec<OfferId> = self
            .frameworks
            .get(framework_id)
            .unwrap()
            .offers
            .iter()
            .cloned()
            .collect();
        for offer_id in offer_ids {
            if let Some(offer) = self.offers.get(&offer_id) {
                let (fid, wid, resources) = (
                    offer.framework_id.clone(),
                    offer.worker_id.clone(),
                    offer.resources.clone(),
                );
                self.allocator
                    .recover_resources(&fid, &wid, &resources, None);
            }
            self.remove_offer(&offer_id, false);
        }

        // Remove executors for correct accounting.
        let executor_index: Vec<(WorkerId, ExecutorId)> = self
            .frameworks
            .get(framework_id)
            .unwrap()
            .executors
            .iter()
            .flat_map(|(worker_id, executors)| {
                executors
                    .keys()
                    .map(move |executor_id| (worker_id.clone(), executor_id.clone()))
            })
            .collect();
        for (worker_id, executor_id) in executor_index {
            self.remove_executor(&worker_id, framework_id, &executor_id);
        }

        let mut framework = self.frameworks.registered.remove(framework_id).unwrap();
        framework.unregistered_time = Some(self.clock.now());
        self.frameworks.principals.remove(&framework.pid);
        self.allocator.remove_framework(framework_id);
        self.frameworks.archive(framework);
    }

    fn framework_failover_timeout(
        &mut self,
        framework_id: FrameworkId,
        reregistered_time: Option<Duration>,
    ) {
        let timed_out = match self.frameworks.get(&framework_id) {
            // Unchanged re-registration time means the framework never
            // came back within the window.
            Some(framework) => {
                !framework.connected && framework.reregistered_time == reregistered_time
            }
            None => false,
        };
        if timed_out {
            info!(
                self.logger,
                "Framework failover timeout; removing framework";
                "framework_id" => %framework_id
            );
            self.remove_framework(&framework_id);
        }
    }

    fn validate_framework(&self, info: &FrameworkInfo) -> Eventual<Option<String>> {
        if !self.config.roles.contains(&info.role) {
            return Eventual::ready(Some(format!("Role '{}' is invalid", info.role)));
        }
        match &self.authorizer {
            None => Eventual::ready(None),
            Some(authorizer) => {
                let role = info.role.clone();
                self.with_authorization_timeout(
                    authorizer.authorize_register_framework(info.principal.as_deref(), &info.role),
                )
                .then(move |authorized| {
                    if authorized {
                        None
                    } else {
                        Some(format!("Not authorized to use role '{}'", role))
                    }
                })
            }
        }
    }

    /// Bound an authorization request in time. On expiry the in-flight
    /// request is discarded (the authorizer must treat that as
    /// idempotent) and the result fails.
    fn with_authorization_timeout(&self, authorization: Eventual<bool>) -> Eventual<bool> {
        authorization.after(
            &self.clock,
            config::AUTHORIZATION_TIMEOUT,
            |original| {
                original.discard();
                Eventual::failed("Authorization timed out")
            },
        )
    }

    fn validation_error(validation: &Eventual<Option<String>>) -> Option<String> {
        if let Some(message) = validation.failure() {
            return Some(format!("Authorization failure: {}", message));
        }
        match validation.get() {
            Some(None) => None,
            Some(Some(message)) => Some(message),
            None => Some("Authorization discarded".to_string()),
        }
    }

    // ---------------------------------------------------------------
    // Task launch
    // ---------------------------------------------------------------

    fn launch_tasks(
        &mut self,
        from: Pid,
        framework_id: FrameworkId,
        tasks: Vec<TaskInfo>,
        filters: Filters,
        offer_ids: Vec<OfferId>,
    ) {
        if tasks.is_empty() {
            self.metrics.messages_decline_offers += 1;
        } else {
            self.metrics.messages_launch_tasks += 1;
        }

        let Some(framework) = self.frameworks.get(&framework_id) else {
            warn!(
                self.logger,
                "Ignoring launch for unknown framework";
                "framework_id" => %framework_id
            );
            return;
        };
        if framework.pid != from {
            warn!(
                self.logger,
                "Ignoring launch from unexpected address";
                "framework_id" => %framework_id, "from" => %from
            );
            return;
        }

        // Validate the offers, then remove them regardless: an offer
        // has exactly one outcome.
        let error = if offer_ids.is_empty() {
            Some("No offers specified".to_string())
        } else {
            validation::validate_offers(self, &framework_id, &offer_ids)
        };

        let mut offered = Resources::new();
        let mut worker_id: Option<WorkerId> = None;
        for offer_id in &offer_ids {
            if let Some(offer) = self.offers.get(offer_id) {
                worker_id = Some(offer.worker_id.clone());
                offered.add_all(&offer.resources);
                if error.is_some() {
                    let (fid, wid, resources) = (
                        offer.framework_id.clone(),
                        offer.worker_id.clone(),
                        offer.resources.clone(),
                    );
                    self.allocator
                        .recover_resources(&fid, &wid, &resources, None);
                }
                self.remove_offer(offer_id, false);
            }
        }

        if let Some(error) = error {
            warn!(
                self.logger,
                "Launch used invalid offers";
                "framework_id" => %framework_id, "error" => &error
            );
            for task in &tasks {
                let update = StatusUpdate::from_master(
                    framework_id.clone(),
                    None,
                    task.task_id.clone(),
                    TaskState::Lost,
                    &format!("Task launched with invalid offers: {}", error),
                    Some(StatusReason::InvalidOffers),
                    None,
                    self.clock.now_secs(),
                );
                self.metrics.tasks_lost += 1;
                self.forward_update(update, "", &framework_id);
            }
            return;
        }

        // Offer validation passed, so every referenced offer existed
        // and they all named the same worker.
        let Some(worker_id) = worker_id else {
            return;
        };

        if tasks.is_empty() {
            // Decline: hand the resources straight back.
            self.allocator
                .recover_resources(&framework_id, &worker_id, &offered, Some(filters));
            return;
        }

        // Authorize every task; tasks wait in pending until decided.
        let authorizations: Vec<Eventual<bool>> = tasks
            .iter()
            .map(|task| self.authorize_task(task, &framework_id))
            .collect();

        let framework = self.frameworks.get_mut(&framework_id).unwrap();
        for task in &tasks {
            framework
                .pending_tasks
                .entry(task.task_id.clone())
                .or_insert_with(|| task.clone());
        }

        let handle = self.handle.clone();
        collect(authorizations).on_any(move |results| {
            handle.dispatch("launch_tasks", move |master| {
                master.finish_launch_tasks(framework_id, worker_id, tasks, offered, filters, results);
            });
        });
    }

    #[allow(clippy::too_many_arguments)]
    fn finish_launch_tasks(
        &mut self,
        framework_id: FrameworkId,
        worker_id: WorkerId,
        tasks: Vec<TaskInfo>,
        offered: Resources,
        filters: Filters,
        authorizations: Eventual<Vec<Result<bool, crate::eventual::EventualError>>>,
    ) {
        let authorizations = authorizations.get().unwrap_or_default();

        if self.frameworks.get(&framework_id).is_none() {
            warn!(
                self.logger,
                "Framework disappeared before launch";
                "framework_id" => %framework_id
            );
            self.allocator
                .recover_resources(&framework_id, &worker_id, &offered, None);
            return;
        }

        let worker_alive = self
            .workers
            .get(&worker_id)
            .map(|worker| worker.connected)
            .unwrap_or(false);
        if !worker_alive {
            let removed = self.workers.get(&worker_id).is_none();
            for task in &tasks {
                self.frameworks
                    .get_mut(&framework_id)
                    .unwrap()
                    .pending_tasks
                    .remove(&task.task_id);
                let update = StatusUpdate::from_master(
                    framework_id.clone(),
                    Some(worker_id.clone()),
                    task.task_id.clone(),
                    TaskState::Lost,
                    if removed {
                        "Worker removed"
                    } else {
                        "Worker disconnected"
                    },
                    Some(if removed {
                        StatusReason::WorkerRemoved
                    } else {
                        StatusReason::WorkerDisconnected
                    }),
                    None,
                    self.clock.now_secs(),
                );
                self.metrics.tasks_lost += 1;
                self.forward_update(update, "", &framework_id);
            }
            self.allocator
                .recover_resources(&framework_id, &worker_id, &offered, None);
            return;
        }

        // Offered resources may be transformed by implicit persistent
        // disk acquisition as tasks launch.
        let mut transformed = offered;
        let mut used = Resources::new();

        for (index, task) in tasks.iter().enumerate() {
            let pending = self
                .frameworks
                .get_mut(&framework_id)
                .unwrap()
                .pending_tasks
                .remove(&task.task_id)
                .is_some();

            let authorization = authorizations
                .get(index)
                .cloned()
                .unwrap_or(Err(crate::eventual::EventualError::Discarded));

            let auth_error = match authorization {
                Ok(true) => None,
                Ok(false) => Some(format!(
                    "Not authorized to launch as user '{}'",
                    self.task_user(task, &framework_id)
                )),
                Err(error) => Some(format!("Authorization failure: {}", error)),
            };
            if let Some(message) = auth_error {
                let update = StatusUpdate::from_master(
                    framework_id.clone(),
                    Some(worker_id.clone()),
                    task.task_id.clone(),
                    TaskState::Error,
                    &message,
                    Some(StatusReason::TaskUnauthorized),
                    None,
                    self.clock.now_secs(),
                );
                self.metrics.tasks_error += 1;
                self.forward_update(update, "", &framework_id);
                continue;
            }

            // Validate against the running view of the batch.
            let validation_error = {
                let framework = self.frameworks.get(&framework_id).unwrap();
                let worker = self.workers.get(&worker_id).unwrap();
                validation::validate_task(&validation::TaskValidationContext {
                    task,
                    framework,
                    worker,
                    offered: &transformed,
                    used: &used,
                })
            };
            if let Some(message) = validation_error {
                let update = StatusUpdate::from_master(
                    framework_id.clone(),
                    Some(worker_id.clone()),
                    task.task_id.clone(),
                    TaskState::Error,
                    &message,
                    Some(StatusReason::TaskInvalid),
                    None,
                    self.clock.now_secs(),
                );
                self.metrics.tasks_error += 1;
                self.forward_update(update, "", &framework_id);
                continue;
            }

            // A task killed while pending is skipped; its resources
            // stay in the unused remainder below.
            if !pending {
                continue;
            }

            let consumed = self.add_task(task, &framework_id, &worker_id);
            used.add_all(&consumed);

            match validation::acquire_persistent_disks(&transformed, &used) {
                Ok((next, acquired)) => {
                    transformed = next;
                    if !acquired.is_empty() {
                        self.allocator
                            .transform_allocation(&framework_id, &worker_id, &acquired);
                    }
                }
                Err(message) => {
                    // Validation vouched for the transformation.
                    panic!("persistent disk acquisition failed after validation: {}", message);
                }
            }

            let (framework_info, framework_address) = {
                let framework = self.frameworks.get(&framework_id).unwrap();
                (framework.info.clone(), framework.pid.to_string())
            };
            let worker_pid = self.workers.get(&worker_id).unwrap().pid.clone();

            info!(
                self.logger,
                "Launching task";
                "task_id" => %task.task_id, "framework_id" => %framework_id,
                "worker_id" => %worker_id, "resources" => %task.resources
            );
            self.send_to(
                &worker_pid,
                Protocol::RunTask {
                    framework_id: framework_id.clone(),
                    framework: framework_info,
                    framework_address,
                    task: task.clone(),
                },
            );
        }

        let unused = transformed.minus(&used);
        if !unused.is_empty() {
            self.allocator
                .recover_resources(&framework_id, &worker_id, &unused, Some(filters));
        }
    }

    fn authorize_task(&self, task: &TaskInfo, framework_id: &FrameworkId) -> Eventual<bool> {
        let Some(authorizer) = &self.authorizer else {
            return Eventual::ready(true);
        };
        let principal = self
            .frameworks
            .get(framework_id)
            .and_then(|framework| framework.info.principal.clone());
        let user = self.task_user(task, framework_id);
        self.with_authorization_timeout(authorizer.authorize_run_task(principal.as_deref(), &user))
    }

    fn task_user(&self, task: &TaskInfo, framework_id: &FrameworkId) -> String {
        if let Some(command) = &task.command {
            if let Some(user) = &command.user {
                return user.clone();
            }
        }
        if let Some(executor) = &task.executor {
            if let Some(user) = &executor.command.user {
                return user.clone();
            }
        }
        self.frameworks
            .get(framework_id)
            .map(|framework| framework.info.user.clone())
            .unwrap_or_default()
    }

    /// Record a launched task on both the worker and the framework,
    /// returning the resources consumed (task plus any new executor).
    fn add_task(&mut self, info: &TaskInfo, framework_id: &FrameworkId, worker_id: &WorkerId) -> Resources {
        let mut consumed = info.resources.clone();

        let new_executor = match &info.executor {
            Some(executor)
                if !self
                    .workers
                    .get(worker_id)
                    .map(|worker| worker.has_executor(framework_id, &executor.executor_id))
                    .unwrap_or(false) =>
            {
                Some(executor.clone())
            }
            _ => None,
        };

        if let Some(executor) = new_executor {
            consumed.add_all(&executor.resources);
            self.workers
                .get_mut(worker_id)
                .unwrap()
                .add_executor(framework_id, executor.clone());
            self.frameworks
                .get_mut(framework_id)
                .unwrap()
                .add_executor(worker_id, executor);
        }

        let task = Task::from_info(info, framework_id.clone());
        self.frameworks
            .get_mut(framework_id)
            .unwrap()
            .add_task(&task);
        self.workers.get_mut(worker_id).unwrap().add_task(task);

        consumed
    }

    fn revive_offers(&mut self, from: Pid, framework_id: FrameworkId) {
        self.metrics.messages_revive_offers += 1;
        let Some(framework) = self.frameworks.get(&framework_id) else {
            return;
        };
        if framework.pid != from {
            return;
        }
        info!(self.logger, "Reviving offers"; "framework_id" => %framework_id);
        self.allocator.revive_offers(&framework_id);
    }

    fn kill_task(&mut self, from: Pid, framework_id: FrameworkId, task_id: TaskId) {
        self.metrics.messages_kill_task += 1;
        info!(
            self.logger,
            "Asked to kill task";
            "task_id" => %task_id, "framework_id" => %framework_id
        );

        let Some(framework) = self.frameworks.get_mut(&framework_id) else {
            warn!(
                self.logger,
                "Ignoring kill for unknown framework";
                "framework_id" => %framework_id
            );
            return;
        };
        if framework.pid != from {
            warn!(
                self.logger,
                "Ignoring kill from unexpected address";
                "framework_id" => %framework_id, "from" => %from
            );
            return;
        }

        // A pending task dies before it launches; the launch path
        // recovers its resources when it finds it gone.
        if framework.pending_tasks.remove(&task_id).is_some() {
            let update = StatusUpdate::from_master(
                framework_id.clone(),
                None,
                task_id,
                TaskState::Killed,
                "Killed pending task",
                None,
                None,
                self.clock.now_secs(),
            );
            self.forward_update(update, "", &framework_id);
            return;
        }

        let Some(worker_id) = framework.tasks.get(&task_id).cloned() else {
            // Unknown task: answer through reconciliation, which
            // stays silent for transitional workers.
            warn!(
                self.logger,
                "Cannot kill unknown task; reconciling";
                "task_id" => %task_id, "framework_id" => %framework_id
            );
            let status = crate::state::TaskStatus {
                task_id,
                state: TaskState::Lost,
                message: None,
                source: crate::state::StatusSource::Master,
                reason: None,
                worker_id: None,
                executor_id: None,
                data: Vec::new(),
                timestamp: self.clock.now_secs(),
            };
            self.perform_reconciliation(&framework_id, vec![status]);
            return;
        };

        // Remember the kill; re-sent if the worker re-registers still
        // running the task.
        let (worker_pid, worker_connected) = {
            let worker = self.workers.get_mut(&worker_id).expect("task on unknown worker");
            worker
                .killed_tasks
                .entry(framework_id.clone())
                .or_default()
                .insert(task_id.clone());
            (worker.pid.clone(), worker.connected)
        };

        if worker_connected {
            self.send_to(
                &worker_pid,
                Protocol::KillTask {
                    framework_id,
                    task_id,
                },
            );
        } else {
            warn!(
                self.logger,
                "Worker disconnected; kill will be retried on re-registration";
                "task_id" => %task_id, "worker_id" => %worker_id
            );
        }
    }

    fn framework_to_executor(
        &mut self,
        from: Pid,
        worker_id: WorkerId,
        framework_id: FrameworkId,
        executor_id: ExecutorId,
        data: Vec<u8>,
    ) {
        self.metrics.messages_framework_to_executor += 1;

        let Some(framework) = self.frameworks.get(&framework_id) else {
            self.metrics.invalid_framework_messages += 1;
            return;
        };
        if framework.pid != from {
            self.metrics.invalid_framework_messages += 1;
            return;
        }
        let Some(worker) = self.workers.get(&worker_id) else {
            self.metrics.invalid_framework_messages += 1;
            return;
        };
        if !worker.connected {
            self.metrics.invalid_framework_messages += 1;
            return;
        }

        let worker_pid = worker.pid.clone();
        self.send_to(
            &worker_pid,
            Protocol::FrameworkToExecutor {
                worker_id,
                framework_id,
                executor_id,
                data,
            },
        );
        self.metrics.valid_framework_messages += 1;
    }

    // ---------------------------------------------------------------
    // Worker lifecycle
    // ---------------------------------------------------------------

    fn register_worker(&mut self, from: Pid, info: WorkerInfo, version: String) {
        self.metrics.messages_register_worker += 1;

        // A worker retrying registration gets the acknowledgement
        // resent; a disconnected one is removed first so it can
        // register fresh.
        if let Some(existing) = self.workers.id_by_pid(&from) {
            let connected = self.workers.get(&existing).unwrap().connected;
            if connected {
                self.send_to(
                    &from,
                    Protocol::WorkerRegistered {
                        worker_id: existing,
                    },
                );
                return;
            }
            info!(
                self.logger,
                "Removing old disconnected worker; a registration attempt is underway";
                "worker_id" => %existing
            );
            self.remove_worker(&existing);
        }

        if self.workers.registering.contains(&from) {
            return;
        }
        self.workers.registering.insert(from.clone());

        let mut info = info;
        let id = self.minter.worker_id();
        info.id = Some(id.clone());

        info!(
            self.logger,
            "Registering worker";
            "worker_id" => %id, "pid" => %from, "hostname" => &info.hostname
        );

        let handle = self.handle.clone();
        let version = if version.is_empty() {
            None
        } else {
            Some(version)
        };
        let info_ = info.clone();
        self.registrar
            .apply(Operation::AdmitWorker(info))
            .on_any(move |admit| {
                handle.dispatch("register_worker", move |master| {
                    master.finish_register_worker(info_, from, version, admit);
                });
            });
    }

    fn finish_register_worker(
        &mut self,
        info: WorkerInfo,
        from: Pid,
        version: Option<String>,
        admit: Eventual<bool>,
    ) {
        self.workers.registering.remove(&from);
        let id = info.id.clone().expect("admitted worker without an id");

        if let Some(message) = admit.failure() {
            self.exit = Some(MasterExit::RegistrarFailure(format!(
                "Failed to admit worker {}: {}",
                id, message
            )));
            return;
        }
        if admit.get() != Some(true) {
            // The registry knows this id, so we minted a duplicate.
            error!(
                self.logger,
                "Worker was not admitted; asking it to shut down";
                "worker_id" => %id
            );
            self.workers.removed.put(id.clone(), ());
            self.send_to(
                &from,
                Protocol::Shutdown {
                    message: format!(
                        "Worker attempted to register but got duplicate worker id {}",
                        id
                    ),
                },
            );
            return;
        }

        let worker = Worker::new(id.clone(), info, from.clone(), version, self.clock.now());
        self.metrics.worker_registrations += 1;
        self.add_worker(worker, Vec::new());

        self.send_to(&from, Protocol::WorkerRegistered { worker_id: id });
    }

    fn reregister_worker(
        &mut self,
        from: Pid,
        info: WorkerInfo,
        executors: Vec<crate::state::ExecutorInfo>,
        tasks: Vec<Task>,
        completed_frameworks: Vec<CompletedFrameworkArchive>,
        version: String,
    ) {
        self.metrics.messages_reregister_worker += 1;

        let Some(id) = info.id.clone() else {
            self.send_to(
                &from,
                Protocol::Shutdown {
                    message: "Worker attempted to re-register without an id".to_string(),
                },
            );
            return;
        };

        if self.workers.removed.contains(&id) {
            // Frameworks were already told this worker's tasks were
            // lost; it must not come back.
            warn!(
                self.logger,
                "Removed worker attempted to re-register; shutting it down";
                "worker_id" => %id
            );
            self.send_to(
                &from,
                Protocol::Shutdown {
                    message: "Worker attempted to re-register after removal".to_string(),
                },
            );
            return;
        }

        if self.workers.registered.contains_key(&id) {
            info!(self.logger, "Re-registering worker"; "worker_id" => %id, "pid" => %from);
            {
                let worker = self.workers.get_mut(&id).unwrap();
                worker.reregistered_time = Some(self.clock.now());
                worker.pid = from.clone();
            }
            self.router.link(&self.pid, &from);

            // Reconcile and answer with WorkerReregistered.
            self.reconcile_worker(&id, &executors, &tasks);

            let reactivate = {
                let worker = self.workers.get_mut(&id).unwrap();
                if !worker.connected {
                    worker.connected = true;
                    worker.active = true;
                    worker.missed_pings = 0;
                    true
                } else {
                    false
                }
            };
            if reactivate {
                self.allocator.activate_worker(&id);
            }

            self.send_framework_addresses(&id, &tasks);
            return;
        }

        // No longer waiting on this worker's re-registration window.
        self.workers.recovered.remove(&id);

        if self.workers.reregistering.contains(&id) {
            return;
        }
        self.workers.reregistering.insert(id.clone());

        info!(
            self.logger,
            "Re-registering worker via the registry";
            "worker_id" => %id, "pid" => %from
        );

        let handle = self.handle.clone();
        let version = if version.is_empty() {
            None
        } else {
            Some(version)
        };
        let info_ = info.clone();
        self.registrar
            .apply(Operation::ReadmitWorker(info))
            .on_any(move |readmit| {
                handle.dispatch("reregister_worker", move |master| {
                    master.finish_reregister_worker(
                        info_,
                        from,
                        executors,
                        tasks,
                        completed_frameworks,
                        version,
                        readmit,
                    );
                });
            });
    }

    #[allow(clippy::too_many_arguments)]
    fn finish_reregister_worker(
        &mut self,
        info: WorkerInfo,
        from: Pid,
        executors: Vec<crate::state::ExecutorInfo>,
        tasks: Vec<Task>,
        completed_frameworks: Vec<CompletedFrameworkArchive>,
        version: Option<String>,
        readmit: Eventual<bool>,
    ) {
        let id = info.id.clone().expect("readmitted worker without an id");
        self.workers.reregistering.remove(&id);

        if let Some(message) = readmit.failure() {
            self.exit = Some(MasterExit::RegistrarFailure(format!(
                "Failed to readmit worker {}: {}",
                id, message
            )));
            return;
        }
        if readmit.get() != Some(true) {
            warn!(
                self.logger,
                "Worker could not be readmitted; shutting it down";
                "worker_id" => %id
            );
            self.workers.removed.put(id.clone(), ());
            self.send_to(
                &from,
                Protocol::Shutdown {
                    message: format!(
                        "Worker attempted to re-register with unknown worker id {}",
                        id
                    ),
                },
            );
            return;
        }

        let mut worker = Worker::new(id.clone(), info, from.clone(), version, self.clock.now());
        worker.reregistered_time = Some(self.clock.now());

        for executor in executors {
            let Some(framework_id) = executor.framework_id.clone() else {
                error!(
                    self.logger,
                    "Worker re-registered an executor without a framework id";
                    "worker_id" => %id, "executor_id" => %executor.executor_id
                );
                continue;
            };
            worker.add_executor(&framework_id, executor);
        }
        for task in &tasks {
            worker.add_task(task.clone());
        }

        self.metrics.worker_reregistrations += 1;
        self.add_worker(worker, completed_frameworks);

        self.send_to(
            &from,
            Protocol::WorkerReregistered {
                worker_id: id.clone(),
                reconciliations: Vec::new(),
            },
        );

        self.send_framework_addresses(&id, &tasks);
    }

    /// Tell the worker the current address of every framework whose
    /// tasks it reported.
    fn send_framework_addresses(&mut self, worker_id: &WorkerId, tasks: &[Task]) {
        let worker_pid = match self.workers.get(worker_id) {
            Some(worker) => worker.pid.clone(),
            None => return,
        };
        let mut sent = std::collections::HashSet::new();
        for task in tasks {
            if !sent.insert(task.framework_id.clone()) {
                continue;
            }
            if let Some(framework) = self.frameworks.get(&task.framework_id) {
                let message = Protocol::UpdateFramework {
                    framework_id: task.framework_id.clone(),
                    framework_address: framework.pid.to_string(),
                };
                self.send_to(&worker_pid, message);
            }
        }
    }

    fn add_worker(&mut self, worker: Worker, completed_frameworks: Vec<CompletedFrameworkArchive>) {
        let id = worker.id.clone();
        let pid = worker.pid.clone();

        self.workers.removed.pop(&id);
        self.router.link(&self.pid, &pid);

        // Adopt the worker's executors and tasks into frameworks that
        // have already (re-)registered.
        for (framework_id, executors) in &worker.executors {
            if let Some(framework) = self.frameworks.get_mut(framework_id) {
                for executor in executors.values() {
                    framework.add_executor(&id, executor.clone());
                }
            }
        }
        for (framework_id, tasks) in &worker.tasks {
            if let Some(framework) = self.frameworks.get_mut(framework_id) {
                for task in tasks.values() {
                    framework.add_task(task);
                }
            } else {
                for task in tasks.values() {
                    warn!(
                        self.logger,
                        "Possibly orphaned task on worker";
                        "task_id" => %task.task_id, "framework_id" => %framework_id, "worker_id" => %id
                    );
                }
            }
        }
        for archive in completed_frameworks {
            if let Some(framework) = self.frameworks.get_mut(&archive.framework_id) {
                for task in archive.tasks {
                    framework.add_completed_task(task);
                }
            }
        }

        self.allocator.add_worker(
            &id,
            &worker.info,
            &worker.info.resources,
            &worker.used_resources,
        );

        self.workers.registered.insert(id.clone(), worker);
        self.schedule_ping(&id);
    }

    fn unregister_worker(&mut self, from: Pid, worker_id: WorkerId) {
        self.metrics.messages_unregister_worker += 1;
        info!(self.logger, "Asked to unregister worker"; "worker_id" => %worker_id);

        if let Some(worker) = self.workers.get(&worker_id) {
            if worker.pid == from {
                self.remove_worker(&worker_id);
            }
        }
    }

    /// Remove a worker entirely: tasks are lost, executors and offers
    /// reclaimed, and the registry mutation drives the final
    /// notifications.
    pub(crate) fn remove_worker(&mut self, worker_id: &WorkerId) {
        let Some(mut worker) = self.workers.registered.remove(worker_id) else {
            return;
        };
        info!(
            self.logger,
            "Removing worker";
            "worker_id" => %worker_id, "hostname" => &worker.info.hostname
        );

        if let Some(timer) = worker.ping_timer.take() {
            timer.cancel();
        }

        // Remove first so the allocator cannot re-offer what we are
        // about to recover.
        self.allocator.remove_worker(worker_id);

        // Transition tasks to lost, building updates to send only
        // after the registry acknowledged the removal.
        let mut updates = Vec::new();
        for (framework_id, tasks) in std::mem::take(&mut worker.tasks) {
            for (_, mut task) in tasks {
                let was_terminal = task.state.is_terminal();
                let update = StatusUpdate::from_master(
                    framework_id.clone(),
                    Some(worker_id.clone()),
                    task.task_id.clone(),
                    TaskState::Lost,
                    &format!("Worker {} removed", worker.info.hostname),
                    Some(StatusReason::WorkerRemoved),
                    task.executor_id.clone(),
                    self.clock.now_secs(),
                );

                task.state = TaskState::Lost;
                task.status_update_state = Some(TaskState::Lost);
                task.status_update_uuid = Some(update.uuid.clone());
                task.statuses.push(update.status.clone());

                if !was_terminal {
                    self.metrics.tasks_lost += 1;
                    self.allocator.recover_resources(
                        &framework_id,
                        worker_id,
                        &task.resources,
                        None,
                    );
                }
                if let Some(framework) = self.frameworks.get_mut(&framework_id) {
                    if !was_terminal {
                        framework.task_terminated(&task);
                    }
                    framework.remove_task(&task);
                }

                updates.push(update);
            }
        }

        for (framework_id, executors) in std::mem::take(&mut worker.executors) {
            for (executor_id, executor) in executors {
                self.allocator.recover_resources(
                    &framework_id,
                    worker_id,
                    &executor.resources,
                    None,
                );
                if let Some(framework) = self.frameworks.get_mut(&framework_id) {
                    framework.remove_executor(worker_id, &executor_id);
                }
            }
        }

        for offer_id in worker.offers.iter().cloned().collect::<Vec<_>>() {
            if let Some(offer) = self.offers.get(&offer_id) {
                let (fid, wid, resources) = (
                    offer.framework_id.clone(),
                    offer.worker_id.clone(),
                    offer.resources.clone(),
                );
                self.allocator
                    .recover_resources(&fid, &wid, &resources, None);
            }
            self.remove_offer(&offer_id, true);
        }

        self.workers.removing.insert(worker_id.clone());
        self.workers.removed.put(worker_id.clone(), ());

        let handle = self.handle.clone();
        let info = worker.info.clone();
        let worker_id_ = worker_id.clone();
        self.registrar
            .apply(Operation::RemoveWorker(info))
            .on_any(move |removed| {
                handle.dispatch("removed_worker", move |master| {
                    master.finish_remove_worker(worker_id_, updates, removed);
                });
            });
    }

    fn finish_remove_worker(
        &mut self,
        worker_id: WorkerId,
        updates: Vec<StatusUpdate>,
        removed: Eventual<bool>,
    ) {
        self.workers.removing.remove(&worker_id);

        if let Some(message) = removed.failure() {
            self.exit = Some(MasterExit::RegistrarFailure(format!(
                "Failed to remove worker {}: {}",
                worker_id, message
            )));
            return;
        }
        if removed.get() != Some(true) {
            self.exit = Some(MasterExit::RegistrarFailure(format!(
                "Worker {} was already removed from the registry",
                worker_id
            )));
            return;
        }

        self.metrics.worker_removals += 1;
        info!(self.logger, "Removed worker"; "worker_id" => %worker_id);

        // Now the removal is durable, tell the frameworks.
        for update in updates {
            let framework_id = update.framework_id.clone();
            if self.frameworks.get(&framework_id).is_none() {
                warn!(
                    self.logger,
                    "Dropping update for unknown framework";
                    "framework_id" => %framework_id
                );
                continue;
            }
            self.forward_update(update, "", &framework_id);
        }

        let framework_pids: Vec<Pid> = self
            .frameworks
            .registered
            .values()
            .map(|framework| framework.pid.clone())
            .collect();
        for pid in framework_pids {
            self.send_to(
                &pid,
                Protocol::LostWorker {
                    worker_id: worker_id.clone(),
                },
            );
        }
    }

    pub(crate) fn shutdown_worker(&mut self, worker_id: &WorkerId, message: &str) {
        let Some(worker) = self.workers.get(worker_id) else {
            return;
        };
        warn!(
            self.logger,
            "Shutting down worker";
            "worker_id" => %worker_id, "reason" => message
        );
        let pid = worker.pid.clone();
        self.metrics.worker_shutdowns += 1;
        self.send_to(
            &pid,
            Protocol::Shutdown {
                message: message.to_string(),
            },
        );
        self.remove_worker(worker_id);
    }

    fn exited_executor(
        &mut self,
        from: Pid,
        worker_id: WorkerId,
        framework_id: FrameworkId,
        executor_id: ExecutorId,
        status: i32,
    ) {
        self.metrics.messages_exited_executor += 1;

        if self.workers.removed.contains(&worker_id) {
            self.send_to(
                &from,
                Protocol::Shutdown {
                    message: "Executor exited message from unknown worker".to_string(),
                },
            );
            return;
        }
        let Some(worker) = self.workers.get(&worker_id) else {
            return;
        };
        if !worker.has_executor(&framework_id, &executor_id) {
            warn!(
                self.logger,
                "Ignoring unknown exited executor";
                "executor_id" => %executor_id, "framework_id" => %framework_id, "worker_id" => %worker_id
            );
            return;
        }

        info!(
            self.logger,
            "Executor exited";
            "executor_id" => %executor_id, "framework_id" => %framework_id,
            "worker_id" => %worker_id, "status" => status
        );
        self.remove_executor(&worker_id, &framework_id, &executor_id);
    }

    /// Drop an executor from both sides and return its resources.
    pub(crate) fn remove_executor(
        &mut self,
        worker_id: &WorkerId,
        framework_id: &FrameworkId,
        executor_id: &ExecutorId,
    ) {
        let Some(worker) = self.workers.get_mut(worker_id) else {
            return;
        };
        let Some(executor) = worker.remove_executor(framework_id, executor_id) else {
            return;
        };
        self.allocator
            .recover_resources(framework_id, worker_id, &executor.resources, None);
        if let Some(framework) = self.frameworks.get_mut(framework_id) {
            framework.remove_executor(worker_id, executor_id);
        }
    }

    // ---------------------------------------------------------------
    // Worker health
    // ---------------------------------------------------------------

    fn schedule_ping(&mut self, worker_id: &WorkerId) {
        let handle = self.handle.clone();
        let id = worker_id.clone();
        let timer = self.clock.delay(self.config.ping_interval, move || {
            handle.dispatch("ping_worker", move |master| master.ping_worker(id));
        });
        if let Some(worker) = self.workers.get_mut(worker_id) {
            if let Some(previous) = worker.ping_timer.replace(timer) {
                previous.cancel();
            }
        }
    }

    fn ping_worker(&mut self, worker_id: WorkerId) {
        let Some(worker) = self.workers.get_mut(&worker_id) else {
            return;
        };

        if worker.missed_pings >= self.config.max_missed_pings {
            self.shutdown_worker(&worker_id, "health check timed out");
            return;
        }

        worker.missed_pings += 1;
        let pid = worker.pid.clone();
        let connected = worker.connected;
        self.send_to(&pid, Protocol::PingWorker { connected });
        self.schedule_ping(&worker_id);
    }

    fn pong_worker(&mut self, from: Pid) {
        if let Some(worker_id) = self.workers.id_by_pid(&from) {
            if let Some(worker) = self.workers.get_mut(&worker_id) {
                worker.missed_pings = 0;
            }
        }
    }

    // ---------------------------------------------------------------
    // Disconnection
    // ---------------------------------------------------------------

    fn exited(&mut self, pid: Pid) {
        if let Some(framework_id) = self.frameworks.id_by_pid(&pid) {
            info!(self.logger, "Framework disconnected"; "framework_id" => %framework_id);
            self.disconnect_framework(&framework_id);

            let (failover_timeout, snapshot) = {
                let framework = self.frameworks.get(&framework_id).unwrap();
                (framework.failover_timeout(), framework.reregistered_time)
            };
            info!(
                self.logger,
                "Giving framework time to failover";
                "framework_id" => %framework_id, "timeout" => ?failover_timeout
            );

            let handle = self.handle.clone();
            let id = framework_id.clone();
            self.clock.delay(failover_timeout, move || {
                handle.dispatch("framework_failover_timeout", move |master| {
                    master.framework_failover_timeout(id, snapshot);
                });
            });
            return;
        }

        if let Some(worker_id) = self.workers.id_by_pid(&pid) {
            info!(self.logger, "Worker disconnected"; "worker_id" => %worker_id);

            let (checkpointing, connected) = {
                let worker = self.workers.get(&worker_id).unwrap();
                (worker.checkpointing(), worker.connected)
            };

            if !checkpointing {
                // Non-checkpointing workers cannot recover their
                // tasks; remove immediately.
                info!(
                    self.logger,
                    "Removing disconnected worker because it is not checkpointing";
                    "worker_id" => %worker_id
                );
                self.remove_worker(&worker_id);
            } else if connected {
                self.disconnect_worker(&worker_id);

                // Evict every non-checkpointing framework from this
                // worker; their executors cannot survive the restart.
                let mut framework_ids: Vec<FrameworkId> = {
                    let worker = self.workers.get(&worker_id).unwrap();
                    worker
                        .tasks
                        .keys()
                        .chain(worker.executors.keys())
                        .cloned()
                        .collect()
                };
                framework_ids.sort();
                framework_ids.dedup();

                for framework_id in framework_ids {
                    let evict = self
                        .frameworks
                        .get(&framework_id)
                        .map(|framework| !framework.info.checkpoint)
                        .unwrap_or(false);
                    if evict {
                        self.remove_framework_from_worker(&worker_id, &framework_id);
                    }
                }
            } else {
                warn!(
                    self.logger,
                    "Ignoring duplicate disconnection for checkpointing worker";
                    "worker_id" => %worker_id
                );
            }
        }
    }

    fn disconnect_worker(&mut self, worker_id: &WorkerId) {
        info!(self.logger, "Disconnecting worker"; "worker_id" => %worker_id);
        if let Some(worker) = self.workers.get_mut(worker_id) {
            worker.connected = false;
        }
        self.deactivate_worker_entity(worker_id);
    }

    pub(crate) fn deactivate_worker_entity(&mut self, worker_id: &WorkerId) {
        let Some(worker) = self.workers.get_mut(worker_id) else {
            return;
        };
        worker.active = false;
        let offer_ids: Vec<OfferId> = worker.offers.iter().cloned().collect();

        self.allocator.deactivate_worker(worker_id);

        for offer_id in offer_ids {
            if let Some(offer) = self.offers.get(&offer_id) {
                let (fid, wid, resources) = (
                    offer.framework_id.clone(),
                    offer.worker_id.clone(),
                    offer.resources.clone(),
                );
                self.allocator
                    .recover_resources(&fid, &wid, &resources, None);
            }
            self.remove_offer(&offer_id, true);
        }
    }

    /// Evict one framework from one worker: tasks become lost and
    /// executors are reclaimed, while the worker itself stays.
    fn remove_framework_from_worker(&mut self, worker_id: &WorkerId, framework_id: &FrameworkId) {
        info!(
            self.logger,
            "Removing framework from disconnected worker";
            "framework_id" => %framework_id, "worker_id" => %worker_id
        );

        let (task_ids, hostname) = {
            let Some(worker) = self.workers.get(worker_id) else {
                return;
            };
            (
                worker
                    .tasks
                    .get(framework_id)
                    .map(|tasks| tasks.keys().cloned().collect::<Vec<_>>())
                    .unwrap_or_default(),
                worker.info.hostname.clone(),
            )
        };

        for task_id in task_ids {
            let executor_id = self
                .workers
                .get(worker_id)
                .and_then(|worker| worker.get_task(framework_id, &task_id))
                .and_then(|task| task.executor_id.clone());
            let update = StatusUpdate::from_master(
                framework_id.clone(),
                Some(worker_id.clone()),
                task_id.clone(),
                TaskState::Lost,
                &format!("Worker {} disconnected", hostname),
                Some(StatusReason::WorkerDisconnected),
                executor_id,
                self.clock.now_secs(),
            );
            self.update_task(&update);
            self.remove_task(framework_id, worker_id, &task_id);
            self.forward_update(update, "", framework_id);
        }

        let executor_ids: Vec<ExecutorId> = self
            .workers
            .get(worker_id)
            .and_then(|worker| worker.executors.get(framework_id))
            .map(|executors| executors.keys().cloned().collect())
            .unwrap_or_default();
        for executor_id in executor_ids {
            self.remove_executor(worker_id, framework_id, &executor_id);
        }
    }

    // ---------------------------------------------------------------
    // Shared helpers
    // ---------------------------------------------------------------

    pub(crate) fn send_to(&self, to: &Pid, message: Protocol) {
        // A missing endpoint is not an error here; exited() handles
        // the consequences of a peer going away.
        let _ = self.router.send(&self.pid, to, message);
    }

    // ---------------------------------------------------------------
    // Introspection (the state surface exposed to operators)
    // ---------------------------------------------------------------

    pub fn framework_ids(&self) -> Vec<FrameworkId> {
        self.frameworks.registered.keys().cloned().collect()
    }

    pub fn completed_framework_ids(&self) -> Vec<FrameworkId> {
        self.frameworks
            .completed
            .iter()
            .map(|framework| framework.id.clone())
            .collect()
    }

    pub fn worker_ids(&self) -> Vec<WorkerId> {
        self.workers.registered.keys().cloned().collect()
    }

    pub fn worker_connected(&self, worker_id: &WorkerId) -> Option<bool> {
        self.workers.get(worker_id).map(|worker| worker.connected)
    }

    pub fn worker_used_resources(&self, worker_id: &WorkerId) -> Resources {
        self.workers
            .get(worker_id)
            .map(|worker| worker.total_used_resources())
            .unwrap_or_default()
    }

    pub fn offer_count(&self) -> usize {
        self.offers.len()
    }

    pub fn framework_task_ids(&self, framework_id: &FrameworkId) -> Vec<TaskId> {
        self.frameworks
            .get(framework_id)
            .map(|framework| framework.tasks.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn pending_task_ids(&self, framework_id: &FrameworkId) -> Vec<TaskId> {
        self.frameworks
            .get(framework_id)
            .map(|framework| framework.pending_tasks.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn completed_task_ids(&self, framework_id: &FrameworkId) -> Vec<TaskId> {
        self.frameworks
            .registered
            .get(framework_id)
            .into_iter()
            .chain(
                self.frameworks
                    .completed
                    .iter()
                    .filter(|framework| &framework.id == framework_id),
            )
            .flat_map(|framework| {
                framework
                    .completed_tasks
                    .iter()
                    .map(|task| task.task_id.clone())
            })
            .collect()
    }

    pub fn task_state(&self, framework_id: &FrameworkId, task_id: &TaskId) -> Option<TaskState> {
        let framework = self.frameworks.get(framework_id)?;
        let worker_id = framework.tasks.get(task_id)?;
        self.workers
            .get(worker_id)
            .and_then(|worker| worker.get_task(framework_id, task_id))
            .map(|task| task.state)
    }

    pub fn worker_task_count(&self, worker_id: &WorkerId) -> usize {
        self.workers
            .get(worker_id)
            .map(|worker| worker.tasks.values().map(|tasks| tasks.len()).sum())
            .unwrap_or(0)
    }

    pub fn dropped_messages(&self) -> u64 {
        self.metrics.dropped_messages
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }
}
