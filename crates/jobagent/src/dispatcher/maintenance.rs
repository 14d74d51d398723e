//! Maintenance scan: recover applications whose worker died mid-task.
//!
//! A consume is destructive, so a worker crash between consume and outcome
//! publication loses the task. The scan finds SUBMITTING applications that
//! have not been touched within the stale window and whose task the worker
//! heartbeat does not claim, marks them failed, and republishes while the
//! attempts budget lasts.

use chrono::Utc;

use crate::broker::AUTOMATION_SERVICE;
use crate::payloads::WorkerHeartbeat;
use crate::store::AppEvent;

use super::{messages, DispatchError, Dispatcher};

pub const WORKER_LOST: &str = "worker lost";

impl Dispatcher {
    /// One scan pass. Returns how many applications were recovered.
    pub async fn maintenance_once(&self) -> Result<u64, DispatchError> {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(self.settings.stale_after)
                .unwrap_or_else(|_| chrono::Duration::seconds(600));

        let stale = self.store.stale_submitting(cutoff).await?;
        if stale.is_empty() {
            return Ok(0);
        }

        let heartbeat: Option<WorkerHeartbeat> = self
            .broker
            .last_heartbeat(AUTOMATION_SERVICE)
            .await?
            .and_then(|v| serde_json::from_value(v).ok());

        let mut reaped = 0;
        for app in stale {
            let _guard = self.lock_application(app.id).await;

            // A result may have landed between the scan and the lock.
            let Some(app) = self.store.get_application(app.id).await? else {
                continue;
            };
            if app.status != crate::store::ApplicationStatus::Submitting {
                continue;
            }

            // A fresh heartbeat naming this task means the worker is still
            // on it; leave it alone.
            let claimed = heartbeat
                .as_ref()
                .and_then(|hb| hb.in_flight_task_id.as_deref())
                .zip(app.queue_task_id.as_deref())
                .map(|(hb_task, app_task)| hb_task == app_task)
                .unwrap_or(false);
            if claimed {
                continue;
            }

            let app = self
                .store
                .apply_event(
                    app.id,
                    AppEvent::WorkerFailed {
                        error_message: WORKER_LOST.to_string(),
                    },
                )
                .await?;
            reaped += 1;

            tracing::warn!(
                application_id = app.id,
                attempts = app.attempts,
                "stuck application marked failed"
            );

            if app.attempts < self.settings.attempts_cap {
                let role = self
                    .store
                    .get_role(app.role_id)
                    .await?
                    .ok_or(DispatchError::NotFound("role"))?;
                let profile = self
                    .store
                    .default_profile()
                    .await?
                    .ok_or(DispatchError::NotFound("profile"))?;

                let task_id = self.publish_application(&app, &role, &profile).await?;
                tracing::info!(
                    application_id = app.id,
                    task_id = %task_id,
                    "stuck application retried"
                );
            } else {
                // BudgetExceeded: terminal, user gets the bad news.
                let (role_title, company) = match self.store.get_role(app.role_id).await? {
                    Some(role) => (
                        role.title.clone(),
                        self.store.company_name(role.company_id).await?,
                    ),
                    None => ("unknown role".to_string(), "unknown company".to_string()),
                };

                self.enqueue_notification(messages::failed(&role_title, &company, WORKER_LOST))
                    .await?;
            }
        }

        Ok(reaped)
    }
}
