mod common;

use std::time::Duration;

use chrono::Utc;
use serial_test::serial;

use common::harness;
use jobagent::broker::{QueueName, TaskBroker, AUTOMATION_SERVICE};
use jobagent::payloads::WorkerHeartbeat;
use jobagent::store::{ApplicationStatus, ApplicationStore};

/// Simulate a worker crash: the task is consumed (destructively) and no
/// outcome will ever arrive.
async fn crash_worker_mid_task(h: &common::Harness) -> i64 {
    let outcome = h.dispatcher.trigger_application(h.role_id).await.unwrap();
    h.broker
        .consume(QueueName::JobApplication, Duration::ZERO)
        .await
        .unwrap()
        .expect("task was queued");

    h.store
        .backdate_application(
            outcome.application_id,
            Utc::now() - chrono::Duration::minutes(15),
        )
        .await;

    outcome.application_id
}

#[tokio::test]
#[serial]
async fn stuck_application_is_failed_and_retried() {
    let h = harness().await;
    let application_id = crash_worker_mid_task(&h).await;

    let reaped = h.dispatcher.maintenance_once().await.unwrap();
    assert_eq!(reaped, 1);

    // Failed, then immediately re-published: budget had room.
    let app = h.store.get_application(application_id).await.unwrap().unwrap();
    assert_eq!(app.status, ApplicationStatus::Submitting);
    assert_eq!(app.attempts, 2);
    assert_eq!(app.error_message.as_deref(), Some("worker lost"));
    assert_eq!(
        h.broker.queue_len(QueueName::JobApplication).await.unwrap(),
        1
    );
}

#[tokio::test]
#[serial]
async fn fresh_heartbeat_claiming_the_task_blocks_the_reaper() {
    let h = harness().await;

    let outcome = h.dispatcher.trigger_application(h.role_id).await.unwrap();
    let task = h
        .broker
        .consume(QueueName::JobApplication, Duration::ZERO)
        .await
        .unwrap()
        .unwrap();
    h.store
        .backdate_application(
            outcome.application_id,
            Utc::now() - chrono::Duration::minutes(15),
        )
        .await;

    // A slow but alive worker is still on this exact task.
    let hb = WorkerHeartbeat {
        timestamp: Utc::now(),
        status: "working".into(),
        in_flight_task_id: Some(task.id.clone()),
    };
    h.broker
        .heartbeat(AUTOMATION_SERVICE, serde_json::to_value(&hb).unwrap())
        .await
        .unwrap();

    let reaped = h.dispatcher.maintenance_once().await.unwrap();
    assert_eq!(reaped, 0);

    let app = h.store.get_application(outcome.application_id).await.unwrap().unwrap();
    assert_eq!(app.status, ApplicationStatus::Submitting);
}

#[tokio::test]
#[serial]
async fn attempts_budget_makes_the_last_failure_terminal() {
    let h = harness().await;
    let application_id = crash_worker_mid_task(&h).await;

    // Two recoveries exhaust the budget of three publishes...
    for _ in 0..2 {
        h.dispatcher.maintenance_once().await.unwrap();
        h.broker
            .consume(QueueName::JobApplication, Duration::ZERO)
            .await
            .unwrap()
            .expect("retry was re-published");
        h.store
            .backdate_application(application_id, Utc::now() - chrono::Duration::minutes(15))
            .await;
    }

    // ...so the third loss is terminal: no re-publish, user notified.
    h.dispatcher.maintenance_once().await.unwrap();

    let app = h.store.get_application(application_id).await.unwrap().unwrap();
    assert_eq!(app.status, ApplicationStatus::Error);
    assert_eq!(app.attempts, 3);
    assert_eq!(
        h.broker.queue_len(QueueName::JobApplication).await.unwrap(),
        0
    );

    h.dispatcher.drain_notifications_once().await.unwrap();
    let sent = h.sms.sent().await;
    assert_eq!(sent.len(), 1);
    assert!(sent[0].1.contains("worker lost"));
}
