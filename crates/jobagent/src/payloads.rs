//! Queue message schemas shared between the dispatcher and the automation
//! worker. All payloads are UTF-8 JSON; consumers ignore unknown fields so
//! either side can grow the schema first.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::broker::{BrokerError, QueueName, QueueTask};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserData {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    pub email: String,
    pub phone: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resume_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cover_letter_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub linkedin_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub github_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub portfolio_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub website: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub zip_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_role: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub experience_years: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub education: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skills: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preferred_work_arrangement: Option<WorkArrangement>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub availability: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub salary_expectation: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub headline: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkArrangement {
    Remote,
    Hybrid,
    Onsite,
}

/// Plaintext site credentials. These cross the broker only inside a
/// `job_application` payload and must never be echoed into results, logs
/// or any other queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskCredentials {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AiInstructions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub focus_areas: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avoid_topics: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobApplicationTask {
    pub job_id: i64,
    pub job_url: String,
    pub company: String,
    pub title: String,
    pub application_id: i64,
    pub user_data: UserData,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credentials: Option<TaskCredentials>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_answers: Option<BTreeMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ai_instructions: Option<AiInstructions>,
    /// Serialized page state from a paused run; opaque to the dispatcher.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resume_from: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportedStatus {
    Applied,
    Failed,
    WaitingApproval,
    NeedsUserInfo,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateJobStatusTask {
    pub job_id: i64,
    pub application_id: i64,
    pub status: ReportedStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub screenshot_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub submitted_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApprovalPageContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub form_fields: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalRequestTask {
    pub job_id: i64,
    pub application_id: i64,
    pub question: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_state: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub screenshot_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<ApprovalPageContext>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendNotificationTask {
    pub body: String,
    /// Destination number; the gateway falls back to the configured default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
}

/// Liveness record published on `heartbeat:automation` every 30 seconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerHeartbeat {
    pub timestamp: DateTime<Utc>,
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub in_flight_task_id: Option<String>,
}

/// Tagged union over every queue's payload, for exhaustive matching in
/// consumers.
#[derive(Debug, Clone)]
pub enum TaskPayload {
    JobApplication(JobApplicationTask),
    UpdateJobStatus(UpdateJobStatusTask),
    ApprovalRequest(ApprovalRequestTask),
    SendNotification(SendNotificationTask),
}

impl TaskPayload {
    pub fn queue(&self) -> QueueName {
        match self {
            TaskPayload::JobApplication(_) => QueueName::JobApplication,
            TaskPayload::UpdateJobStatus(_) => QueueName::UpdateJobStatus,
            TaskPayload::ApprovalRequest(_) => QueueName::ApprovalRequest,
            TaskPayload::SendNotification(_) => QueueName::SendNotification,
        }
    }

    pub fn to_value(&self) -> Result<Value, serde_json::Error> {
        match self {
            TaskPayload::JobApplication(p) => serde_json::to_value(p),
            TaskPayload::UpdateJobStatus(p) => serde_json::to_value(p),
            TaskPayload::ApprovalRequest(p) => serde_json::to_value(p),
            TaskPayload::SendNotification(p) => serde_json::to_value(p),
        }
    }

    pub fn decode(task: &QueueTask) -> Result<Self, PayloadError> {
        let queue = task
            .queue()
            .map_err(|e| PayloadError::UnknownQueue(e.to_string()))?;
        Self::decode_for(queue, task.payload.clone())
    }

    pub fn decode_for(queue: QueueName, payload: Value) -> Result<Self, PayloadError> {
        let decoded = match queue {
            QueueName::JobApplication => {
                TaskPayload::JobApplication(serde_json::from_value(payload)?)
            }
            QueueName::UpdateJobStatus => {
                TaskPayload::UpdateJobStatus(serde_json::from_value(payload)?)
            }
            QueueName::ApprovalRequest => {
                TaskPayload::ApprovalRequest(serde_json::from_value(payload)?)
            }
            QueueName::SendNotification => {
                TaskPayload::SendNotification(serde_json::from_value(payload)?)
            }
        };
        Ok(decoded)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PayloadError {
    #[error("{0}")]
    UnknownQueue(String),
    #[error("malformed payload: {0}")]
    Malformed(#[from] serde_json::Error),
}

impl From<BrokerError> for PayloadError {
    fn from(e: BrokerError) -> Self {
        PayloadError::UnknownQueue(e.to_string())
    }
}
