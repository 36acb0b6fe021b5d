//! Shared harness: a master wired to an in-process router with a
//! paused clock, plus fake schedulers and workers driven from tests.

#![allow(dead_code)]

use fleetmaster::allocator::ManualAllocator;
use fleetmaster::detector::{StandaloneContender, StandaloneDetector};
use fleetmaster::ids::{FrameworkId, OfferId, WorkerId};
use fleetmaster::master::Master;
use fleetmaster::messages::{OfferData, Protocol};
use fleetmaster::registrar::InMemoryRegistrar;
use fleetmaster::resources::Resources;
use fleetmaster::state::{FrameworkInfo, MasterInfo, WorkerInfo};
use fleetmaster::{Clock, Envelope, MasterConfig, MasterExit, MasterHandle, Pid, Router};
use slog::{o, Drain};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

pub fn test_logger() -> slog::Logger {
    let decorator = slog_term::PlainDecorator::new(slog_term::TestStdoutWriter);
    let drain = slog_term::FullFormat::new(decorator).build().fuse();
    let drain = std::sync::Mutex::new(drain).fuse();
    slog::Logger::root(drain, o!())
}

pub struct TestCluster {
    pub clock: Clock,
    pub router: Router,
    pub allocator: ManualAllocator,
    pub detector: Arc<StandaloneDetector>,
    pub contender: Arc<StandaloneContender>,
    pub registrar: Arc<InMemoryRegistrar>,
    pub handle: MasterHandle,
    pub master_pid: Pid,
    pub master_info: MasterInfo,
    pub join: JoinHandle<MasterExit>,
}

impl TestCluster {
    pub async fn start(config: MasterConfig) -> TestCluster {
        Self::start_with_registrar(
            config.clone(),
            Arc::new(InMemoryRegistrar::new(config.registry_strict)),
        )
        .await
    }

    pub async fn start_with_registrar(
        config: MasterConfig,
        registrar: Arc<InMemoryRegistrar>,
    ) -> TestCluster {
        let clock = Clock::paused();
        let router = Router::new();
        let allocator = ManualAllocator::new();
        let detector = Arc::new(StandaloneDetector::new());
        let contender = Arc::new(StandaloneContender::new());

        let master = Master::new(
            config,
            clock.clone(),
            router.clone(),
            registrar.clone(),
            Box::new(allocator.clone()),
            None,
            contender.clone(),
            detector.clone(),
            test_logger(),
        )
        .expect("valid master config");

        let handle = master.handle();
        let master_pid = master.self_pid();
        let master_info = master.master_info();

        detector.appoint(Some(master_info.clone()));
        let join = tokio::spawn(master.run());

        let cluster = TestCluster {
            clock,
            router,
            allocator,
            detector,
            contender,
            registrar,
            handle,
            master_pid,
            master_info,
            join,
        };
        // Let election and registry recovery complete.
        cluster.settle().await;
        cluster
    }

    /// Wait until every event enqueued so far has been processed.
    pub async fn settle(&self) {
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.handle.dispatch("settle", move |_| {
            let _ = tx.send(());
        });
        let _ = tokio::time::timeout(Duration::from_secs(5), rx).await;
    }

    /// Run a closure on the master actor and return its result.
    pub async fn inspect<T, F>(&self, f: F) -> T
    where
        T: Send + 'static,
        F: FnOnce(&mut Master) -> T + Send + 'static,
    {
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.handle.dispatch("inspect", move |master| {
            let _ = tx.send(f(master));
        });
        tokio::time::timeout(Duration::from_secs(5), rx)
            .await
            .expect("master did not answer")
            .expect("master dropped the probe")
    }

    /// Advance the paused clock and let resulting work drain.
    pub async fn advance(&self, duration: Duration) {
        self.clock.advance(duration);
        self.settle().await;
    }
}

/// A scheduler endpoint under test control.
pub struct FakeScheduler {
    pub pid: Pid,
    router: Router,
    master_pid: Pid,
    rx: mpsc::UnboundedReceiver<Envelope>,
}

impl FakeScheduler {
    pub fn new(cluster: &TestCluster, name: &str, address: &str) -> FakeScheduler {
        let pid = Pid::new(name, address);
        let rx = cluster.router.register_mailbox(pid.clone());
        FakeScheduler {
            pid,
            router: cluster.router.clone(),
            master_pid: cluster.master_pid.clone(),
            rx,
        }
    }

    pub fn send(&self, message: Protocol) {
        assert!(
            self.router.send(&self.pid, &self.master_pid, message),
            "master endpoint is gone"
        );
    }

    /// Simulate this endpoint's transport going away.
    pub fn disconnect(&self) {
        self.router.unregister(&self.pid);
    }

    pub async fn recv(&mut self) -> Protocol {
        match tokio::time::timeout(Duration::from_secs(5), self.rx.recv())
            .await
            .expect("timed out waiting for a message")
            .expect("endpoint mailbox closed")
        {
            Envelope::Message { message, .. } => message,
            Envelope::Exited { pid } => panic!("unexpected exited event for {}", pid),
        }
    }

    /// The next message, if one is already queued.
    pub fn try_recv(&mut self) -> Option<Protocol> {
        match self.rx.try_recv() {
            Ok(Envelope::Message { message, .. }) => Some(message),
            _ => None,
        }
    }

    pub async fn register(&mut self, info: FrameworkInfo) -> FrameworkId {
        self.send(Protocol::RegisterFramework { framework: info });
        match self.recv().await {
            Protocol::FrameworkRegistered { framework_id, .. } => framework_id,
            other => panic!("expected FrameworkRegistered, got {:?}", other),
        }
    }

    /// Receive one offer batch and return its offers.
    pub async fn expect_offers(&mut self) -> Vec<OfferData> {
        match self.recv().await {
            Protocol::ResourceOffers { offers, .. } => offers,
            other => panic!("expected ResourceOffers, got {:?}", other),
        }
    }
}

/// A worker endpoint under test control.
pub struct FakeWorker {
    pub pid: Pid,
    pub info: WorkerInfo,
    router: Router,
    master_pid: Pid,
    rx: mpsc::UnboundedReceiver<Envelope>,
}

impl FakeWorker {
    pub fn new(cluster: &TestCluster, name: &str, address: &str, info: WorkerInfo) -> FakeWorker {
        let pid = Pid::new(name, address);
        let rx = cluster.router.register_mailbox(pid.clone());
        FakeWorker {
            pid,
            info,
            router: cluster.router.clone(),
            master_pid: cluster.master_pid.clone(),
            rx,
        }
    }

    pub fn send(&self, message: Protocol) {
        assert!(
            self.router.send(&self.pid, &self.master_pid, message),
            "master endpoint is gone"
        );
    }

    pub fn disconnect(&self) {
        self.router.unregister(&self.pid);
    }

    pub async fn recv(&mut self) -> Protocol {
        match tokio::time::timeout(Duration::from_secs(5), self.rx.recv())
            .await
            .expect("timed out waiting for a message")
            .expect("endpoint mailbox closed")
        {
            Envelope::Message { message, .. } => message,
            Envelope::Exited { pid } => panic!("unexpected exited event for {}", pid),
        }
    }

    pub fn try_recv(&mut self) -> Option<Protocol> {
        match self.rx.try_recv() {
            Ok(Envelope::Message { message, .. }) => Some(message),
            _ => None,
        }
    }

    pub async fn register(&mut self) -> WorkerId {
        self.send(Protocol::RegisterWorker {
            worker: self.info.clone(),
            version: "0.1.0".to_string(),
        });
        match self.recv().await {
            Protocol::WorkerRegistered { worker_id } => {
                self.info.id = Some(worker_id.clone());
                worker_id
            }
            other => panic!("expected WorkerRegistered, got {:?}", other),
        }
    }
}

pub fn framework_info(name: &str, role: &str) -> FrameworkInfo {
    FrameworkInfo {
        id: None,
        name: name.to_string(),
        user: "svc".to_string(),
        role: role.to_string(),
        principal: None,
        failover_timeout_secs: 0.0,
        checkpoint: false,
    }
}

pub fn worker_info(hostname: &str, resources: &str) -> WorkerInfo {
    WorkerInfo {
        id: None,
        hostname: hostname.to_string(),
        resources: Resources::parse(resources, "*").unwrap(),
        attributes: Vec::new(),
        checkpoint: false,
    }
}

/// Publish a single-worker offer through the allocator and hand back
/// the offer the scheduler received.
pub async fn offer_to(
    cluster: &TestCluster,
    scheduler: &mut FakeScheduler,
    framework_id: &FrameworkId,
    worker_id: &WorkerId,
    resources: &str,
) -> OfferData {
    let mut bundle = HashMap::new();
    bundle.insert(
        worker_id.clone(),
        Resources::parse(resources, "*").unwrap(),
    );
    cluster.allocator.offer(framework_id.clone(), bundle);
    cluster.settle().await;

    let mut offers = scheduler.expect_offers().await;
    assert_eq!(offers.len(), 1);
    offers.remove(0)
}

pub fn offer_ids(offers: &[OfferData]) -> Vec<OfferId> {
    offers.iter().map(|offer| offer.offer_id.clone()).collect()
}
