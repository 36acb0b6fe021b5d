//! Task launch: the happy path, validation failures, declines, and
//! the acknowledgement-driven end of a task's life.

mod common;

use common::*;
use fleetmaster::ids::TaskId;
use fleetmaster::messages::Protocol;
use fleetmaster::resources::Resources;
use fleetmaster::state::{
    CommandInfo, Filters, StatusReason, StatusSource, StatusUpdate, TaskInfo, TaskState,
    TaskStatus,
};
use fleetmaster::MasterConfig;

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
async fn test_happy_path_launch() {
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

    scheduler.send(Protocol::LaunchTasks {
        framework_id: framework_id.clone(),
        tasks: vec![task("t1", &worker_id, "cpus:1;mem:256")],
        filters: Filters {
            refuse_seconds: 5.0,
        },
        offer_ids: vec![offer.offer_id.clone()],
    });
    cluster.settle().await;

    // The worker is told to run the task.
    match worker.recv().await {
        Protocol::RunTask { task, .. } => assert_eq!(task.task_id, TaskId::from("t1")),
        other => panic!("expected RunTask, got {:?}", other),
    }

    // The task is tracked on both the framework and the worker.
    let fid = framework_id.clone();
    let wid = worker_id.clone();
    let (framework_tasks, worker_tasks, state) = cluster
        .inspect(move |master| {
            (
                master.framework_task_ids(&fid),
                master.worker_task_count(&wid),
                master.task_state(&fid, &TaskId::from("t1")),
            )
        })
        .await;
    assert_eq!(framework_tasks, vec![TaskId::from("t1")]);
    assert_eq!(worker_tasks, 1);
    assert_eq!(state, Some(TaskState::Staging));

    // The residual goes back to the allocator, filters attached.
    let recovered = cluster.allocator.total_recovered(&framework_id, &worker_id);
    assert_eq!(recovered, Resources::parse("cpus:3;mem:768", "*").unwrap());

    // No rescind was sent.
    assert!(scheduler.try_recv().is_none());
    assert_eq!(cluster.inspect(|m| m.offer_count()).await, 0);
}

#[tokio::test]
async fn test_duplicate_task_id_rejects_second() {
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

    scheduler.send(Protocol::LaunchTasks {
        framework_id: framework_id.clone(),
        tasks: vec![
            task("t1", &worker_id, "cpus:1;mem:256"),
            task("t1", &worker_id, "cpus:1;mem:256"),
        ],
        filters: Filters::default(),
        offer_ids: vec![offer.offer_id.clone()],
    });
    cluster.settle().await;

    // First instance launches.
    assert!(matches!(worker.recv().await, Protocol::RunTask { .. }));
    assert!(worker.try_recv().is_none());

    // Second instance is refused with a per-task error.
    match scheduler.recv().await {
        Protocol::StatusUpdate { update, .. } => {
            assert_eq!(update.status.state, TaskState::Error);
            assert_eq!(update.status.reason, Some(StatusReason::TaskInvalid));
            assert!(update
                .status
                .message
                .as_deref()
                .unwrap_or("")
                .contains("duplicate ID"));
        }
        other => panic!("expected StatusUpdate, got {:?}", other),
    }

    // The batch accounted the offer only once: one task launched,
    // the rest of the offer recovered.
    let recovered = cluster.allocator.total_recovered(&framework_id, &worker_id);
    assert_eq!(recovered, Resources::parse("cpus:3;mem:768", "*").unwrap());
}

#[tokio::test]
async fn test_task_exceeding_offer_is_rejected() {
    let cluster = TestCluster::start(MasterConfig::default()).await;
    let mut scheduler = FakeScheduler::new(&cluster, "scheduler", "10.0.0.2:53000");
    let mut worker = FakeWorker::new(
        &cluster,
        "worker",
        "10.0.0.3:5051",
        worker_info("host3", "cpus:2;mem:512"),
    );

    let framework_id = scheduler.register(framework_info("analytics", "*")).await;
    let worker_id = worker.register().await;
    let offer = offer_to(
        &cluster,
        &mut scheduler,
        &framework_id,
        &worker_id,
        "cpus:2;mem:512",
    )
    .await;

    scheduler.send(Protocol::LaunchTasks {
        framework_id: framework_id.clone(),
        tasks: vec![task("big", &worker_id, "cpus:8;mem:4096")],
        filters: Filters::default(),
        offer_ids: vec![offer.offer_id.clone()],
    });
    cluster.settle().await;

    match scheduler.recv().await {
        Protocol::StatusUpdate { update, .. } => {
            assert_eq!(update.status.state, TaskState::Error);
            assert_eq!(update.status.reason, Some(StatusReason::TaskInvalid));
        }
        other => panic!("expected StatusUpdate, got {:?}", other),
    }
    assert!(worker.try_recv().is_none());

    // Everything goes back to the allocator.
    let recovered = cluster.allocator.total_recovered(&framework_id, &worker_id);
    assert_eq!(recovered, Resources::parse("cpus:2;mem:512", "*").unwrap());
}

#[tokio::test]
async fn test_decline_returns_resources_with_filters() {
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

    scheduler.send(Protocol::LaunchTasks {
        framework_id: framework_id.clone(),
        tasks: Vec::new(),
        filters: Filters {
            refuse_seconds: 30.0,
        },
        offer_ids: vec![offer.offer_id],
    });
    cluster.settle().await;

    let state = cluster.allocator.state();
    let recovered = {
        let state = state.lock();
        state.recovered.last().cloned().expect("resources recovered")
    };
    assert_eq!(
        recovered.resources,
        Resources::parse("cpus:4;mem:1024", "*").unwrap()
    );
    assert_eq!(recovered.filters.map(|f| f.refuse_seconds), Some(30.0));
    assert_eq!(cluster.inspect(|m| m.offer_count()).await, 0);
}

#[tokio::test]
async fn test_launch_with_unknown_offer_is_lost() {
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

    scheduler.send(Protocol::LaunchTasks {
        framework_id: framework_id.clone(),
        tasks: vec![task("t1", &worker_id, "cpus:1")],
        filters: Filters::default(),
        offer_ids: vec![fleetmaster::ids::OfferId::from("bogus-offer")],
    });
    cluster.settle().await;

    match scheduler.recv().await {
        Protocol::StatusUpdate { update, .. } => {
            assert_eq!(update.status.state, TaskState::Lost);
            assert_eq!(update.status.reason, Some(StatusReason::InvalidOffers));
            assert_eq!(update.status.source, StatusSource::Master);
        }
        other => panic!("expected StatusUpdate, got {:?}", other),
    }
}

#[tokio::test]
async fn test_terminal_update_and_acknowledgement_remove_task() {
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

    scheduler.send(Protocol::LaunchTasks {
        framework_id: framework_id.clone(),
        tasks: vec![task("t1", &worker_id, "cpus:1;mem:256")],
        filters: Filters::default(),
        offer_ids: vec![offer.offer_id],
    });
    cluster.settle().await;
    assert!(matches!(worker.recv().await, Protocol::RunTask { .. }));

    // Worker reports the task finished, expecting an acknowledgement.
    let uuid = uuid::Uuid::new_v4().to_string();
    worker.send(Protocol::StatusUpdate {
        update: StatusUpdate {
            framework_id: framework_id.clone(),
            worker_id: Some(worker_id.clone()),
            status: TaskStatus {
                task_id: TaskId::from("t1"),
                state: TaskState::Finished,
                message: None,
                source: StatusSource::Worker,
                reason: None,
                worker_id: Some(worker_id.clone()),
                executor_id: None,
                data: Vec::new(),
                timestamp: 0.0,
            },
            latest_state: None,
            uuid: uuid.clone(),
            timestamp: 0.0,
        },
        ack_address: worker.pid.to_string(),
    });
    cluster.settle().await;

    // Forwarded to the framework; task terminal but retained until
    // the acknowledgement arrives.
    match scheduler.recv().await {
        Protocol::StatusUpdate { update, .. } => {
            assert_eq!(update.status.state, TaskState::Finished);
        }
        other => panic!("expected StatusUpdate, got {:?}", other),
    }

    let fid = framework_id.clone();
    let state = cluster
        .inspect(move |m| m.task_state(&fid, &TaskId::from("t1")))
        .await;
    assert_eq!(state, Some(TaskState::Finished));

    // Resources were recovered exactly once on the terminal
    // transition.
    let wid = worker_id.clone();
    let used = cluster.inspect(move |m| m.worker_used_resources(&wid)).await;
    assert!(used.is_empty());

    // Acknowledge: the task is removed and the ack forwarded.
    scheduler.send(Protocol::StatusUpdateAcknowledgement {
        worker_id: worker_id.clone(),
        framework_id: framework_id.clone(),
        task_id: TaskId::from("t1"),
        uuid,
    });
    cluster.settle().await;

    assert!(matches!(
        worker.recv().await,
        Protocol::StatusUpdateAcknowledgement { .. }
    ));
    let fid = framework_id.clone();
    assert_eq!(
        cluster.inspect(move |m| m.framework_task_ids(&fid)).await,
        Vec::<TaskId>::new()
    );
    let fid = framework_id.clone();
    assert_eq!(
        cluster.inspect(move |m| m.completed_task_ids(&fid)).await,
        vec![TaskId::from("t1")]
    );
}

#[tokio::test]
async fn test_unregister_leaves_no_residual_state() {
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

    scheduler.send(Protocol::LaunchTasks {
        framework_id: framework_id.clone(),
        tasks: vec![task("t1", &worker_id, "cpus:1;mem:256")],
        filters: Filters::default(),
        offer_ids: vec![offer.offer_id],
    });
    cluster.settle().await;
    assert!(matches!(worker.recv().await, Protocol::RunTask { .. }));

    scheduler.send(Protocol::UnregisterFramework {
        framework_id: framework_id.clone(),
    });
    cluster.settle().await;

    // The worker is told to tear the framework down.
    assert!(matches!(
        worker.recv().await,
        Protocol::ShutdownFramework { .. }
    ));

    let fid = framework_id.clone();
    let wid = worker_id.clone();
    let (registered, completed, offers, worker_tasks, used) = cluster
        .inspect(move |m| {
            (
                m.framework_ids(),
                m.completed_framework_ids(),
                m.offer_count(),
                m.worker_task_count(&wid),
                m.worker_used_resources(&wid),
            )
        })
        .await;
    assert!(registered.is_empty());
    assert_eq!(completed, vec![fid]);
    assert_eq!(offers, 0);
    assert_eq!(worker_tasks, 0);
    assert!(used.is_empty());

    // The task's resources went back to the allocator.
    let recovered = cluster.allocator.total_recovered(&framework_id, &worker_id);
    assert_eq!(
        recovered,
        Resources::parse("cpus:4;mem:1024", "*").unwrap()
    );
}
