//! Worker lifecycle: registration, the two-case disconnection policy,
//! zombie fencing, and ping-based health checking.

mod common;

use common::*;
use fleetmaster::ids::TaskId;
use fleetmaster::messages::Protocol;
use fleetmaster::resources::Resources;
use fleetmaster::state::{CommandInfo, Filters, StatusReason, TaskInfo, TaskState};
use fleetmaster::MasterConfig;
use std::time::Duration;

fn task(id: &str, worker_id: &fleetmaster::ids::WorkerId, resources: &str) -> TaskInfo {
    TaskInfo {
        task_id: TaskId::from(id),
        name: id.to_string(),
        worker_id: worker_id.clone(),
        resources: Resources::parse(resources, "*").unwrap(),
        command: Some(CommandInfo {
            value: "sleep 100".to_string(),
            user: None,
        }),
        executor: None,
    }
}

#[tokio::test]
async fn test_register_assigns_epoch_scoped_id() {
    let cluster = TestCluster::start(MasterConfig::default()).await;
    let mut worker = FakeWorker::new(
        &cluster,
        "worker",
        "10.0.0.3:5051",
        worker_info("host3", "cpus:4;mem:1024"),
    );

    let worker_id = worker.register().await;
    assert!(worker_id.as_str().contains("-S0"));
    assert!(cluster.registrar.contains(&worker_id));

    let ids = cluster.inspect(|m| m.worker_ids()).await;
    assert_eq!(ids, vec![worker_id]);
}

#[tokio::test]
async fn test_retried_registration_resends_acknowledgement() {
    let cluster = TestCluster::start(MasterConfig::default()).await;
    let mut worker = FakeWorker::new(
        &cluster,
        "worker",
        "10.0.0.3:5051",
        worker_info("host3", "cpus:4;mem:1024"),
    );

    let first = worker.register().await;

    // The same worker retries; no new id is minted.
    worker.send(Protocol::RegisterWorker {
        worker: worker_info("host3", "cpus:4;mem:1024"),
        version: "0.1.0".to_string(),
    });
    match worker.recv().await {
        Protocol::WorkerRegistered { worker_id } => assert_eq!(worker_id, first),
        other => panic!("expected WorkerRegistered, got {:?}", other),
    }

    assert_eq!(cluster.inspect(|m| m.worker_ids()).await.len(), 1);
}

#[tokio::test]
async fn test_rescind_on_worker_disconnect() {
    let cluster = TestCluster::start(MasterConfig::default()).await;
    let mut scheduler = FakeScheduler::new(&cluster, "scheduler", "10.0.0.2:53000");
    let mut worker = FakeWorker::new(
        &cluster,
        "worker",
        "10.0.0.3:5051",
        worker_info("host3", "cpus:4;mem:1024"),
    );

    let framework_id = scheduler.register(framework_info("analytics", "*")).await;
    let worker_id = worker.register().await;

    let offer = offer_to(
        &cluster,
        &mut scheduler,
        &framework_id,
        &worker_id,
        "cpus:4;mem:1024",
    )
    .await;

    // Launch a task so the removal also produces a TASK_LOST.
    scheduler.send(Protocol::LaunchTasks {
        framework_id: framework_id.clone(),
        tasks: vec![task("t1", &worker_id, "cpus:1;mem:256")],
        filters: Filters::default(),
        offer_ids: vec![offer.offer_id],
    });
    cluster.settle().await;
    assert!(matches!(worker.recv().await, Protocol::RunTask { .. }));

    // A second offer is outstanding when the worker's transport dies.
    let outstanding = offer_to(
        &cluster,
        &mut scheduler,
        &framework_id,
        &worker_id,
        "cpus:3;mem:768",
    )
    .await;

    worker.disconnect();
    cluster.settle().await;

    // Non-checkpointing: removed outright.
    assert!(cluster.inspect(|m| m.worker_ids()).await.is_empty());

    // The scheduler hears about all of it: the rescind, the lost
    // task, and the lost worker.
    let mut saw_rescind = false;
    let mut saw_lost_task = false;
    let mut saw_lost_worker = false;
    for _ in 0..3 {
        match scheduler.recv().await {
            Protocol::RescindResourceOffer { offer_id } => {
                assert_eq!(offer_id, outstanding.offer_id);
                saw_rescind = true;
            }
            Protocol::StatusUpdate { update, .. } => {
                assert_eq!(update.status.state, TaskState::Lost);
                assert_eq!(update.status.reason, Some(StatusReason::WorkerRemoved));
                saw_lost_task = true;
            }
            Protocol::LostWorker {
                worker_id: lost_id,
            } => {
                assert_eq!(lost_id, worker_id);
                saw_lost_worker = true;
            }
            other => panic!("unexpected message {:?}", other),
        }
    }
    assert!(saw_rescind && saw_lost_task && saw_lost_worker);

    // Worker removal recovered both the offer and the task resources.
    let recovered = cluster.allocator.total_recovered(&framework_id, &worker_id);
    assert!(recovered.contains(&Resources::parse("cpus:4;mem:1024", "*").unwrap()));
}

#[tokio::test]
async fn test_checkpointing_worker_retained_on_disconnect() {
    let cluster = TestCluster::start(MasterConfig::default()).await;
    let mut scheduler = FakeScheduler::new(&cluster, "scheduler", "10.0.0.2:53000");

    let mut info = worker_info("host3", "cpus:4;mem:1024");
    info.checkpoint = true;
    let mut worker = FakeWorker::new(&cluster, "worker", "10.0.0.3:5051", info);

    // The framework does not checkpoint, so it gets evicted from the
    // worker while the worker itself survives.
    let framework_id = scheduler.register(framework_info("analytics", "*")).await;
    let worker_id = worker.register().await;

    let offer = offer_to(
        &cluster,
        &mut scheduler,
        &framework_id,
        &worker_id,
        "cpus:4;mem:1024",
    )
    .await;
    scheduler.send(Protocol::LaunchTasks {
        framework_id: framework_id.clone(),
        tasks: vec![task("t1", &worker_id, "cpus:1;mem:256")],
        filters: Filters::default(),
        offer_ids: vec![offer.offer_id],
    });
    cluster.settle().await;
    assert!(matches!(worker.recv().await, Protocol::RunTask { .. }));

    worker.disconnect();
    cluster.settle().await;

    // Worker retained but disconnected.
    let wid = worker_id.clone();
    assert_eq!(
        cluster.inspect(move |m| m.worker_connected(&wid)).await,
        Some(false)
    );

    // The non-checkpointing framework's task went lost.
    match scheduler.recv().await {
        Protocol::StatusUpdate { update, .. } => {
            assert_eq!(update.status.state, TaskState::Lost);
            assert_eq!(
                update.status.reason,
                Some(StatusReason::WorkerDisconnected)
            );
        }
        other => panic!("unexpected message {:?}", other),
    }

    let wid = worker_id.clone();
    assert_eq!(cluster.inspect(move |m| m.worker_task_count(&wid)).await, 0);
}

#[tokio::test]
async fn test_removed_worker_cannot_reregister() {
    let cluster = TestCluster::start(MasterConfig::default()).await;
    let mut worker = FakeWorker::new(
        &cluster,
        "worker",
        "10.0.0.3:5051",
        worker_info("host3", "cpus:4;mem:1024"),
    );
    let worker_id = worker.register().await;

    worker.send(Protocol::UnregisterWorker {
        worker_id: worker_id.clone(),
    });
    cluster.settle().await;
    assert!(cluster.inspect(|m| m.worker_ids()).await.is_empty());

    // Re-registration from the zombie is fenced with a shutdown.
    let mut info = worker_info("host3", "cpus:4;mem:1024");
    info.id = Some(worker_id);
    worker.send(Protocol::ReregisterWorker {
        worker: info,
        executors: Vec::new(),
        tasks: Vec::new(),
        completed_frameworks: Vec::new(),
        version: "0.1.0".to_string(),
    });

    match worker.recv().await {
        Protocol::Shutdown { message } => {
            assert!(message.contains("re-register after removal"));
        }
        other => panic!("expected Shutdown, got {:?}", other),
    }
}

#[tokio::test]
async fn test_missed_pings_shut_worker_down() {
    let cluster = TestCluster::start(MasterConfig::default()).await;
    let mut worker = FakeWorker::new(
        &cluster,
        "worker",
        "10.0.0.3:5051",
        worker_info("host3", "cpus:4;mem:1024"),
    );
    worker.register().await;

    // Never answer a ping; after the tolerated misses the master
    // shuts the worker down.
    let mut shutdown = false;
    for _ in 0..8 {
        cluster.advance(Duration::from_secs(15)).await;
        while let Some(message) = worker.try_recv() {
            match message {
                Protocol::PingWorker { .. } => {}
                Protocol::Shutdown { message } => {
                    assert!(message.contains("health check"));
                    shutdown = true;
                }
                other => panic!("unexpected message {:?}", other),
            }
        }
        if shutdown {
            break;
        }
    }
    assert!(shutdown);
    assert!(cluster.inspect(|m| m.worker_ids()).await.is_empty());
}

#[tokio::test]
async fn test_answered_pings_keep_worker_alive() {
    let cluster = TestCluster::start(MasterConfig::default()).await;
    let mut worker = FakeWorker::new(
        &cluster,
        "worker",
        "10.0.0.3:5051",
        worker_info("host3", "cpus:4;mem:1024"),
    );
    worker.register().await;

    for _ in 0..10 {
        cluster.advance(Duration::from_secs(15)).await;
        while let Some(message) = worker.try_recv() {
            match message {
                Protocol::PingWorker { .. } => worker.send(Protocol::PongWorker),
                other => panic!("unexpected message {:?}", other),
            }
        }
        cluster.settle().await;
    }

    assert_eq!(cluster.inspect(|m| m.worker_ids()).await.len(), 1);
}
