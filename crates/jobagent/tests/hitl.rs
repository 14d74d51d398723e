mod common;

use common::{harness, sample_posting, USER_NUMBER};
use jobagent::broker::{QueueName, TaskBroker};
use jobagent::dispatcher::DispatchError;
use jobagent::store::{ApplicationStatus, ApplicationStore};

#[tokio::test]
async fn reply_without_open_approval_is_stored_and_answered_with_help() {
    let h = harness().await;

    h.hitl
        .handle_inbound(USER_NUMBER, "sure, sounds good")
        .await
        .unwrap();

    assert_eq!(h.store.unmatched_inbound_count().await, 1);

    h.dispatcher.drain_notifications_once().await.unwrap();
    let sent = h.sms.sent().await;
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].0, USER_NUMBER);
    assert!(sent[0].1.contains("Job Agent Commands"));
}

#[tokio::test]
async fn help_and_status_commands_reply() {
    let h = harness().await;

    h.hitl.handle_inbound(USER_NUMBER, "help").await.unwrap();
    h.hitl.handle_inbound(USER_NUMBER, "STATUS").await.unwrap();

    h.dispatcher.drain_notifications_once().await.unwrap();
    h.dispatcher.drain_notifications_once().await.unwrap();

    let sent = h.sms.sent().await;
    assert_eq!(sent.len(), 2);
    assert!(sent[0].1.contains("Job Agent Commands"));
    assert!(sent[1].1.contains("0 applications need your input"));
}

#[tokio::test]
async fn report_command_summarizes_the_pipeline() {
    let h = harness().await;
    h.dispatcher.trigger_application(h.role_id).await.unwrap();

    h.hitl.handle_inbound(USER_NUMBER, "report").await.unwrap();

    h.dispatcher.drain_notifications_once().await.unwrap();
    let sent = h.sms.sent().await;
    assert_eq!(sent.len(), 1);
    assert!(sent[0].1.contains("Daily report") || sent[0].1.contains("📊"));
    assert!(sent[0].1.contains("Applications: 1"));
}

#[tokio::test]
async fn stop_pauses_triggering_until_start() {
    let h = harness().await;

    h.hitl.handle_inbound(USER_NUMBER, "stop").await.unwrap();
    let err = h.dispatcher.trigger_application(h.role_id).await.unwrap_err();
    assert!(matches!(err, DispatchError::Paused));

    h.hitl.handle_inbound(USER_NUMBER, "start").await.unwrap();
    let outcome = h.dispatcher.trigger_application(h.role_id).await.unwrap();
    assert!(outcome.task_id.is_some());
}

#[tokio::test]
async fn posting_url_is_ingested_and_auto_applied() {
    let h = harness().await;

    let url = "https://boards.example.com/jobs/platform-engineer";
    h.scraper.add_fixture(url, sample_posting()).await;

    h.hitl.handle_inbound(USER_NUMBER, url).await.unwrap();

    // One task in flight for the new role.
    assert_eq!(
        h.broker.queue_len(QueueName::JobApplication).await.unwrap(),
        1
    );
    let apps = h.store.list_applications(None).await.unwrap();
    assert_eq!(apps.len(), 1);
    assert_eq!(apps[0].status, ApplicationStatus::Submitting);
    assert_eq!(apps[0].company_name, "Initech");

    h.dispatcher.drain_notifications_once().await.unwrap();
    let sent = h.sms.sent().await;
    assert!(sent[0].1.contains("Platform Engineer"));
}

#[tokio::test]
async fn unreadable_posting_gets_an_apologetic_reply() {
    let h = harness().await;

    h.hitl
        .handle_inbound(USER_NUMBER, "https://boards.example.com/jobs/unknown")
        .await
        .unwrap();

    h.dispatcher.drain_notifications_once().await.unwrap();
    let sent = h.sms.sent().await;
    assert_eq!(sent.len(), 1);
    assert!(sent[0].1.contains("Couldn't read"));

    // Nothing was queued.
    assert_eq!(
        h.broker.queue_len(QueueName::JobApplication).await.unwrap(),
        0
    );
}
