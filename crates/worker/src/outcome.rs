//! Terminal outcome publication.
//!
//! Exactly one of: `update_job_status(applied)`, `update_job_status(failed)`,
//! or the `update_job_status(waiting_approval)` + `approval_request` pair.
//! Transient failures with retry budget left re-enter the queue instead,
//! with exponential backoff; a re-publish is not a terminal outcome.

use serde_json::json;

use jobagent::broker::{BrokerError, QueueName, QueueTask, TaskBroker};
use jobagent::payloads::{
    ApprovalRequestTask, JobApplicationTask, ReportedStatus, UpdateJobStatusTask,
};

use crate::runner::{retry_delay_secs, Outcome};

#[derive(Debug, PartialEq, Eq)]
pub enum Disposition {
    /// A terminal outcome was published.
    Terminal,
    /// The task was re-published for another attempt.
    Requeued { delay_secs: u64 },
}

pub async fn publish_outcome(
    broker: &dyn TaskBroker,
    task: &QueueTask,
    payload: &JobApplicationTask,
    outcome: Outcome,
    max_retries: u32,
) -> Result<Disposition, BrokerError> {
    match outcome {
        Outcome::Success {
            confirmation_message,
            submitted_at,
            screenshot_url,
        } => {
            let update = UpdateJobStatusTask {
                job_id: payload.job_id,
                application_id: payload.application_id,
                status: ReportedStatus::Applied,
                notes: confirmation_message.clone(),
                error_message: None,
                screenshot_url,
                submitted_at: Some(submitted_at),
            };
            broker
                .publish(
                    QueueName::UpdateJobStatus,
                    serde_json::to_value(&update)?,
                    0,
                )
                .await?;

            broker
                .publish_result(
                    &task.id,
                    json!({
                        "status": "applied",
                        "application_id": payload.application_id,
                        "confirmation_message": confirmation_message,
                        "submitted_at": submitted_at.to_rfc3339(),
                    }),
                )
                .await?;

            tracing::info!(
                task_id = %task.id,
                application_id = payload.application_id,
                "application submitted"
            );
            Ok(Disposition::Terminal)
        }

        Outcome::NeedsApproval {
            question,
            state_blob,
            screenshot_url,
            context,
        } => {
            let update = UpdateJobStatusTask {
                job_id: payload.job_id,
                application_id: payload.application_id,
                status: ReportedStatus::WaitingApproval,
                notes: None,
                error_message: None,
                screenshot_url: screenshot_url.clone(),
                submitted_at: None,
            };
            broker
                .publish(
                    QueueName::UpdateJobStatus,
                    serde_json::to_value(&update)?,
                    0,
                )
                .await?;

            let approval = ApprovalRequestTask {
                job_id: payload.job_id,
                application_id: payload.application_id,
                question,
                current_state: state_blob,
                screenshot_url,
                context: Some(context),
            };
            broker
                .publish(
                    QueueName::ApprovalRequest,
                    serde_json::to_value(&approval)?,
                    0,
                )
                .await?;

            tracing::info!(
                task_id = %task.id,
                application_id = payload.application_id,
                "paused for user approval"
            );
            Ok(Disposition::Terminal)
        }

        Outcome::Failure(error) => {
            if error.is_transient() && task.retries < max_retries {
                let delay_secs = retry_delay_secs(task.retries);
                tracing::warn!(
                    task_id = %task.id,
                    retries = task.retries,
                    delay_secs,
                    error = %error,
                    "transient failure; re-queueing"
                );

                tokio::time::sleep(std::time::Duration::from_secs(delay_secs)).await;

                let mut retry = task.clone();
                retry.retries += 1;
                broker.publish_task(&retry).await?;
                return Ok(Disposition::Requeued { delay_secs });
            }

            let update = UpdateJobStatusTask {
                job_id: payload.job_id,
                application_id: payload.application_id,
                status: ReportedStatus::Failed,
                notes: None,
                error_message: Some(error.to_string()),
                screenshot_url: None,
                submitted_at: None,
            };
            broker
                .publish(
                    QueueName::UpdateJobStatus,
                    serde_json::to_value(&update)?,
                    0,
                )
                .await?;

            broker
                .publish_result(
                    &task.id,
                    json!({
                        "status": "failed",
                        "application_id": payload.application_id,
                        "error_message": error.to_string(),
                    }),
                )
                .await?;

            tracing::error!(
                task_id = %task.id,
                application_id = payload.application_id,
                error = %error,
                "application failed"
            );
            Ok(Disposition::Terminal)
        }
    }
}
