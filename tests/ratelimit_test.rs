//! Per-principal message admission: FIFO throttling, capacity
//! overflow, and the drop counters.

mod common;

use common::*;
use fleetmaster::ids::TaskId;
use fleetmaster::master::config::{RateLimit, RateLimits};
use fleetmaster::messages::Protocol;
use fleetmaster::state::{StatusSource, TaskState, TaskStatus};
use fleetmaster::MasterConfig;
use std::time::Duration;

fn limited_config(principal: &str, qps: f64, capacity: Option<u64>) -> MasterConfig {
    MasterConfig {
        rate_limits: Some(RateLimits {
            limits: vec![RateLimit {
                principal: principal.to_string(),
                qps: Some(qps),
                capacity,
            }],
            aggregate_default_qps: None,
            aggregate_default_capacity: None,
        }),
        ..Default::default()
    }
}

fn probe(id: &str) -> TaskStatus {
    TaskStatus {
        task_id: TaskId::from(id),
        state: TaskState::Running,
        message: None,
        source: StatusSource::Master,
        reason: None,
        worker_id: None,
        executor_id: None,
        data: Vec::new(),
        timestamp: 0.0,
    }
}

#[tokio::test]
async fn test_capacity_overflow_drops_with_error() {
    let cluster = TestCluster::start(limited_config("analytics", 1.0, Some(2))).await;
    let mut scheduler = FakeScheduler::new(&cluster, "scheduler", "10.0.0.2:53000");

    let mut info = framework_info("analytics", "*");
    info.principal = Some("analytics".to_string());
    let framework_id = scheduler.register(info).await;

    let dropped_before = cluster.inspect(|m| m.dropped_messages()).await;

    // Three messages in one tick: the first two are admitted in
    // order, the third exceeds capacity.
    for id in ["q1", "q2", "q3"] {
        scheduler.send(Protocol::ReconcileTasks {
            framework_id: framework_id.clone(),
            statuses: vec![probe(id)],
        });
    }
    cluster.settle().await;

    // The overflow is detected while the first message still sits in
    // the dispatch queue, so the error surfaces first.
    match scheduler.recv().await {
        Protocol::FrameworkError { message } => {
            assert!(message.contains("capacity(2) exceeded"), "{}", message);
        }
        other => panic!("unexpected message {:?}", other),
    }

    // The first message was admitted and answered.
    match scheduler.recv().await {
        Protocol::StatusUpdate { update, .. } => {
            assert_eq!(update.status.task_id, TaskId::from("q1"));
        }
        other => panic!("unexpected message {:?}", other),
    }

    let dropped_after = cluster.inspect(|m| m.dropped_messages()).await;
    assert_eq!(dropped_after - dropped_before, 1);

    // The second message is admitted at the configured rate.
    assert!(scheduler.try_recv().is_none());
    cluster.advance(Duration::from_secs(1)).await;
    match scheduler.recv().await {
        Protocol::StatusUpdate { update, .. } => {
            assert_eq!(update.status.task_id, TaskId::from("q2"));
        }
        other => panic!("unexpected message {:?}", other),
    }

    // Later traffic flows again, one message per second.
    scheduler.send(Protocol::ReconcileTasks {
        framework_id: framework_id.clone(),
        statuses: vec![probe("q4")],
    });
    cluster.settle().await;
    assert!(scheduler.try_recv().is_none());
    cluster.advance(Duration::from_secs(1)).await;
    match scheduler.recv().await {
        Protocol::StatusUpdate { update, .. } => {
            assert_eq!(update.status.task_id, TaskId::from("q4"));
        }
        other => panic!("unexpected message {:?}", other),
    }
}

#[tokio::test]
async fn test_admission_is_fifo_per_principal() {
    let cluster = TestCluster::start(limited_config("analytics", 1.0, None)).await;
    let mut scheduler = FakeScheduler::new(&cluster, "scheduler", "10.0.0.2:53000");

    let mut info = framework_info("analytics", "*");
    info.principal = Some("analytics".to_string());
    let framework_id = scheduler.register(info).await;

    for id in ["a", "b", "c", "d"] {
        scheduler.send(Protocol::ReconcileTasks {
            framework_id: framework_id.clone(),
            statuses: vec![probe(id)],
        });
    }
    cluster.settle().await;

    let mut order = Vec::new();
    for _ in 0..4 {
        while let Some(message) = scheduler.try_recv() {
            if let Protocol::StatusUpdate { update, .. } = message {
                order.push(update.status.task_id.as_str().to_string());
            }
        }
        cluster.advance(Duration::from_secs(1)).await;
    }
    while let Some(message) = scheduler.try_recv() {
        if let Protocol::StatusUpdate { update, .. } = message {
            order.push(update.status.task_id.as_str().to_string());
        }
    }

    assert_eq!(order, vec!["a", "b", "c", "d"]);
}

#[tokio::test]
async fn test_unprincipalled_traffic_uses_default_limiter() {
    let config = MasterConfig {
        rate_limits: Some(RateLimits {
            limits: Vec::new(),
            aggregate_default_qps: Some(1.0),
            aggregate_default_capacity: Some(1),
        }),
        ..Default::default()
    };
    let cluster = TestCluster::start(config).await;
    let mut scheduler = FakeScheduler::new(&cluster, "scheduler", "10.0.0.2:53000");

    // No principal: the aggregate default applies.
    let framework_id = scheduler.register(framework_info("analytics", "*")).await;

    for id in ["q1", "q2"] {
        scheduler.send(Protocol::ReconcileTasks {
            framework_id: framework_id.clone(),
            statuses: vec![probe(id)],
        });
    }
    cluster.settle().await;

    match scheduler.recv().await {
        Protocol::FrameworkError { message } => {
            assert!(message.contains("capacity(1) exceeded"), "{}", message);
        }
        other => panic!("unexpected message {:?}", other),
    }
    match scheduler.recv().await {
        Protocol::StatusUpdate { update, .. } => {
            assert_eq!(update.status.task_id, TaskId::from("q1"));
        }
        other => panic!("unexpected message {:?}", other),
    }
}

#[tokio::test]
async fn test_unlimited_principals_are_not_throttled() {
    let cluster = TestCluster::start(MasterConfig::default()).await;
    let mut scheduler = FakeScheduler::new(&cluster, "scheduler", "10.0.0.2:53000");
    let framework_id = scheduler.register(framework_info("analytics", "*")).await;

    // No limits configured at all: a burst is answered in full.
    for id in ["a", "b", "c", "d", "e"] {
        scheduler.send(Protocol::ReconcileTasks {
            framework_id: framework_id.clone(),
            statuses: vec![probe(id)],
        });
    }
    cluster.settle().await;

    let mut answers = 0;
    while let Some(message) = scheduler.try_recv() {
        assert!(matches!(message, Protocol::StatusUpdate { .. }));
        answers += 1;
    }
    assert_eq!(answers, 5);
}
