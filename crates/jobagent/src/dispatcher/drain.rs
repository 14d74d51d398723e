//! Result drain: apply worker outcomes to the store and derive user
//! notifications. At-least-once delivery means every handler is written to
//! be redelivery-safe.

use serde_json::json;

use crate::broker::{QueueName, QueueTask};
use crate::payloads::{ApprovalRequestTask, ReportedStatus, SendNotificationTask, TaskPayload};
use crate::store::{AppEvent, ApplicationStatus, RoleStatus};

use super::{messages, DispatchError, Dispatcher};

const NOTIFY_MAX_RETRIES: u32 = 3;

impl Dispatcher {
    pub async fn drain_status_once(&self) -> Result<(), DispatchError> {
        let Some(task) = self
            .broker
            .consume(QueueName::UpdateJobStatus, self.settings.consume_block)
            .await?
        else {
            return Ok(());
        };

        self.handle_status_update(&task).await
    }

    pub async fn drain_approval_once(&self) -> Result<(), DispatchError> {
        let Some(task) = self
            .broker
            .consume(QueueName::ApprovalRequest, self.settings.consume_block)
            .await?
        else {
            return Ok(());
        };

        self.handle_approval_request(&task).await
    }

    /// The only path that touches the SMS gateway.
    pub async fn drain_notifications_once(&self) -> Result<(), DispatchError> {
        let Some(task) = self
            .broker
            .consume(QueueName::SendNotification, self.settings.consume_block)
            .await?
        else {
            return Ok(());
        };

        let payload = match TaskPayload::decode(&task) {
            Ok(TaskPayload::SendNotification(p)) => p,
            Ok(_) | Err(_) => {
                self.store
                    .record_dead_letter(&task.task_type, &task.payload, "malformed notification")
                    .await?;
                return Ok(());
            }
        };

        let Some(to) = payload.to.clone().or_else(|| self.sms.default_recipient()) else {
            tracing::warn!("dropping notification: no recipient configured");
            return Ok(());
        };

        if let Err(e) = self.sms.send(&to, &payload.body).await {
            if task.retries < NOTIFY_MAX_RETRIES {
                tracing::warn!(error = %e, retries = task.retries, "sms send failed; re-queueing");
                let mut retry = task.clone();
                retry.retries += 1;
                self.broker.publish_task(&retry).await?;
            } else {
                tracing::error!(error = %e, "sms send failed permanently; dropping");
            }
        }

        Ok(())
    }

    pub async fn handle_status_update(&self, task: &QueueTask) -> Result<(), DispatchError> {
        let payload = match TaskPayload::decode(task) {
            Ok(TaskPayload::UpdateJobStatus(p)) => p,
            Ok(_) | Err(_) => {
                self.store
                    .record_dead_letter(&task.task_type, &task.payload, "malformed status update")
                    .await?;
                return Ok(());
            }
        };

        let _guard = self.lock_application(payload.application_id).await;

        let Some(app) = self.store.get_application(payload.application_id).await? else {
            tracing::warn!(
                application_id = payload.application_id,
                "status update for unknown application"
            );
            self.store
                .record_dead_letter(&task.task_type, &task.payload, "unknown application_id")
                .await?;
            return Ok(());
        };

        // Idempotency shield: a redelivered result for an application that
        // already left SUBMITTING is a no-op.
        if app.status != ApplicationStatus::Submitting {
            tracing::info!(
                application_id = app.id,
                status = %app.status,
                reported = ?payload.status,
                "ignoring status update for non-submitting application"
            );
            return Ok(());
        }

        let role = self.store.get_role(app.role_id).await?;
        let (role_title, company) = match &role {
            Some(role) => (
                role.title.clone(),
                self.store.company_name(role.company_id).await?,
            ),
            None => ("unknown role".to_string(), "unknown company".to_string()),
        };

        self.store
            .set_result_fields(
                app.id,
                payload.notes.as_deref(),
                payload.screenshot_url.as_deref(),
            )
            .await?;

        match payload.status {
            ReportedStatus::Applied => {
                let submitted_at = payload.submitted_at.unwrap_or_else(chrono::Utc::now);
                self.store
                    .apply_event(app.id, AppEvent::WorkerApplied { submitted_at })
                    .await?;

                if let Some(role) = &role {
                    self.store
                        .set_role_status(role.id, RoleStatus::Applied)
                        .await?;
                }

                self.enqueue_notification(messages::applied(
                    &role_title,
                    &company,
                    payload.notes.as_deref(),
                ))
                .await?;
            }
            ReportedStatus::Failed => {
                let error_message = payload
                    .error_message
                    .clone()
                    .unwrap_or_else(|| "submission failed".to_string());

                self.store
                    .apply_event(
                        app.id,
                        AppEvent::WorkerFailed {
                            error_message: error_message.clone(),
                        },
                    )
                    .await?;

                // Terminal failure regresses the role so it can be re-ranked.
                if let Some(role) = &role {
                    if role.status == RoleStatus::Applying {
                        self.store
                            .set_role_status(role.id, RoleStatus::Ranked)
                            .await?;
                    }
                }

                self.enqueue_notification(messages::failed(&role_title, &company, &error_message))
                    .await?;
            }
            ReportedStatus::WaitingApproval => {
                self.store
                    .apply_event(app.id, AppEvent::WorkerWaitingApproval)
                    .await?;
            }
            ReportedStatus::NeedsUserInfo => {
                self.store
                    .apply_event(app.id, AppEvent::WorkerNeedsUserInfo)
                    .await?;
            }
        }

        tracing::info!(
            application_id = app.id,
            reported = ?payload.status,
            "status update applied"
        );
        Ok(())
    }

    pub async fn handle_approval_request(&self, task: &QueueTask) -> Result<(), DispatchError> {
        let payload = match TaskPayload::decode(task) {
            Ok(TaskPayload::ApprovalRequest(p)) => p,
            Ok(_) | Err(_) => {
                self.store
                    .record_dead_letter(&task.task_type, &task.payload, "malformed approval request")
                    .await?;
                return Ok(());
            }
        };

        let _guard = self.lock_application(payload.application_id).await;

        let Some(app) = self.store.get_application(payload.application_id).await? else {
            self.store
                .record_dead_letter(&task.task_type, &task.payload, "unknown application_id")
                .await?;
            return Ok(());
        };

        // Redelivery of the same question must not re-ask the user.
        let already_recorded = app
            .approval_context
            .as_ref()
            .and_then(|c| c.get("question"))
            .and_then(|q| q.as_str())
            .map(|q| q == payload.question)
            .unwrap_or(false);
        if already_recorded {
            tracing::info!(
                application_id = app.id,
                "ignoring redelivered approval request"
            );
            return Ok(());
        }

        self.record_approval(app.id, &payload).await?;

        let (role_title, company) = match self.store.get_role(app.role_id).await? {
            Some(role) => (
                role.title.clone(),
                self.store.company_name(role.company_id).await?,
            ),
            None => ("unknown role".to_string(), "unknown company".to_string()),
        };

        self.enqueue_notification(messages::approval_needed(
            &role_title,
            &company,
            &payload.question,
            payload.screenshot_url.as_deref(),
        ))
        .await?;

        tracing::info!(application_id = app.id, "approval request recorded");
        Ok(())
    }

    async fn record_approval(
        &self,
        application_id: i64,
        payload: &ApprovalRequestTask,
    ) -> Result<(), DispatchError> {
        // Everything needed to resume without re-scraping.
        let context = json!({
            "question": payload.question,
            "current_state": payload.current_state,
            "screenshot_url": payload.screenshot_url,
            "context": payload.context,
            "requested_at": chrono::Utc::now().to_rfc3339(),
        });

        self.store
            .record_approval_context(application_id, context)
            .await?;

        if let Some(url) = payload.screenshot_url.as_deref() {
            self.store
                .set_result_fields(application_id, None, Some(url))
                .await?;
        }

        Ok(())
    }

    pub(crate) async fn enqueue_notification(&self, body: String) -> Result<(), DispatchError> {
        let payload = SendNotificationTask { body, to: None };
        self.broker
            .publish(
                QueueName::SendNotification,
                serde_json::to_value(&payload)?,
                0,
            )
            .await?;
        Ok(())
    }
}
