mod common;

use std::time::Duration;

use chrono::Utc;

use common::harness;
use jobagent::broker::{QueueName, TaskBroker};
use jobagent::payloads::{ReportedStatus, TaskPayload, UpdateJobStatusTask};
use jobagent::store::{ApplicationStatus, ApplicationStore};

async fn publish_update(
    harness: &common::Harness,
    application_id: i64,
    status: ReportedStatus,
    notes: Option<&str>,
    error_message: Option<&str>,
) {
    let update = UpdateJobStatusTask {
        job_id: harness.role_id,
        application_id,
        status,
        notes: notes.map(str::to_string),
        error_message: error_message.map(str::to_string),
        screenshot_url: None,
        submitted_at: Some(Utc::now()),
    };
    harness
        .broker
        .publish(
            QueueName::UpdateJobStatus,
            serde_json::to_value(&update).unwrap(),
            0,
        )
        .await
        .unwrap();
}

#[tokio::test]
async fn happy_path_reaches_submitted_with_notification() {
    let h = harness().await;

    let outcome = h.dispatcher.trigger_application(h.role_id).await.unwrap();
    assert!(!outcome.reused);
    let task_id = outcome.task_id.clone().expect("task published");

    // The application is in flight with documents and the task id recorded.
    let app = h
        .store
        .get_application(outcome.application_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(app.status, ApplicationStatus::Submitting);
    assert_eq!(app.queue_task_id.as_deref(), Some(task_id.as_str()));
    assert!(app.resume_url.is_some());
    assert!(app.cover_letter_url.is_some());

    // The published payload carries user data and decrypted credentials.
    let task = h
        .broker
        .consume(QueueName::JobApplication, Duration::ZERO)
        .await
        .unwrap()
        .expect("job_application task queued");
    let payload = match TaskPayload::decode(&task).unwrap() {
        TaskPayload::JobApplication(p) => p,
        other => panic!("wrong payload: {other:?}"),
    };
    assert_eq!(payload.application_id, outcome.application_id);
    assert_eq!(payload.user_data.name, "Ada Lovelace");
    assert_eq!(
        payload.credentials.as_ref().map(|c| c.password.as_str()),
        Some("hunter2")
    );

    // Worker reports success.
    publish_update(
        &h,
        outcome.application_id,
        ReportedStatus::Applied,
        Some("Application received, ref XYZ"),
        None,
    )
    .await;
    h.dispatcher.drain_status_once().await.unwrap();

    let app = h
        .store
        .get_application(outcome.application_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(app.status, ApplicationStatus::Submitted);
    assert!(app.submitted_at.is_some());
    assert!(app.queue_task_id.is_none());
    assert!(app.resume_url.is_some() && app.cover_letter_url.is_some());

    // Derived notification goes out through the queue, not inline.
    h.dispatcher.drain_notifications_once().await.unwrap();
    let sent = h.sms.sent().await;
    assert_eq!(sent.len(), 1);
    assert!(sent[0].1.contains("✅"));
    assert!(sent[0].1.contains("Application received, ref XYZ"));
}

#[tokio::test]
async fn rapid_double_trigger_reuses_the_active_application() {
    let h = harness().await;

    let first = h.dispatcher.trigger_application(h.role_id).await.unwrap();
    let second = h.dispatcher.trigger_application(h.role_id).await.unwrap();

    assert_eq!(first.application_id, second.application_id);
    assert!(second.reused);
    assert_eq!(first.task_id, second.task_id);

    // Only one task was ever published.
    assert_eq!(
        h.broker.queue_len(QueueName::JobApplication).await.unwrap(),
        1
    );
}

#[tokio::test]
async fn redelivered_applied_update_is_a_no_op() {
    let h = harness().await;

    let outcome = h.dispatcher.trigger_application(h.role_id).await.unwrap();
    h.broker
        .consume(QueueName::JobApplication, Duration::ZERO)
        .await
        .unwrap();

    publish_update(
        &h,
        outcome.application_id,
        ReportedStatus::Applied,
        Some("ref ABC"),
        None,
    )
    .await;
    h.dispatcher.drain_status_once().await.unwrap();

    let first = h
        .store
        .get_application(outcome.application_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(first.status, ApplicationStatus::Submitted);

    // Broker redelivers the same result after ack loss.
    publish_update(
        &h,
        outcome.application_id,
        ReportedStatus::Applied,
        Some("ref ABC"),
        None,
    )
    .await;
    h.dispatcher.drain_status_once().await.unwrap();

    let second = h
        .store
        .get_application(outcome.application_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(second.status, ApplicationStatus::Submitted);
    assert_eq!(second.submitted_at, first.submitted_at);

    // Exactly one notification, no duplicate SMS.
    h.dispatcher.drain_notifications_once().await.unwrap();
    h.dispatcher.drain_notifications_once().await.unwrap();
    assert_eq!(h.sms.sent().await.len(), 1);
}

#[tokio::test]
async fn failed_update_is_terminal_with_error_preserved() {
    let h = harness().await;

    let outcome = h.dispatcher.trigger_application(h.role_id).await.unwrap();
    h.broker
        .consume(QueueName::JobApplication, Duration::ZERO)
        .await
        .unwrap();

    publish_update(
        &h,
        outcome.application_id,
        ReportedStatus::Failed,
        None,
        Some("form submit timed out"),
    )
    .await;
    h.dispatcher.drain_status_once().await.unwrap();

    let app = h
        .store
        .get_application(outcome.application_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(app.status, ApplicationStatus::Error);
    assert_eq!(app.error_message.as_deref(), Some("form submit timed out"));

    h.dispatcher.drain_notifications_once().await.unwrap();
    let sent = h.sms.sent().await;
    assert_eq!(sent.len(), 1);
    assert!(sent[0].1.contains("❌"));
    assert!(sent[0].1.contains("form submit timed out"));
}

#[tokio::test]
async fn update_for_unknown_application_goes_to_dead_letter() {
    let h = harness().await;

    publish_update(&h, 9999, ReportedStatus::Applied, None, None).await;
    h.dispatcher.drain_status_once().await.unwrap();

    assert_eq!(h.store.dead_letter_count().await, 1);
    // Nothing to notify about.
    h.dispatcher.drain_notifications_once().await.unwrap();
    assert!(h.sms.sent().await.is_empty());
}

#[tokio::test]
async fn malformed_status_update_goes_to_dead_letter() {
    let h = harness().await;

    h.broker
        .publish(
            QueueName::UpdateJobStatus,
            serde_json::json!({"status": "definitely-not-a-status"}),
            0,
        )
        .await
        .unwrap();
    h.dispatcher.drain_status_once().await.unwrap();

    assert_eq!(h.store.dead_letter_count().await, 1);
}
