use std::collections::BTreeMap;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoleStatus {
    Sourced,
    Ranked,
    Applying,
    Applied,
    Ignored,
}

impl RoleStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RoleStatus::Sourced => "sourced",
            RoleStatus::Ranked => "ranked",
            RoleStatus::Applying => "applying",
            RoleStatus::Applied => "applied",
            RoleStatus::Ignored => "ignored",
        }
    }
}

impl FromStr for RoleStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sourced" => Ok(RoleStatus::Sourced),
            "ranked" => Ok(RoleStatus::Ranked),
            "applying" => Ok(RoleStatus::Applying),
            "applied" => Ok(RoleStatus::Applied),
            "ignored" => Ok(RoleStatus::Ignored),
            other => Err(format!("invalid role status: {other}")),
        }
    }
}

impl std::fmt::Display for RoleStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplicationStatus {
    Draft,
    NeedsUserInfo,
    ReadyToSubmit,
    Submitting,
    WaitingApproval,
    Submitted,
    Error,
    Rejected,
    Interview,
    Offer,
    Closed,
}

impl ApplicationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApplicationStatus::Draft => "draft",
            ApplicationStatus::NeedsUserInfo => "needs_user_info",
            ApplicationStatus::ReadyToSubmit => "ready_to_submit",
            ApplicationStatus::Submitting => "submitting",
            ApplicationStatus::WaitingApproval => "waiting_approval",
            ApplicationStatus::Submitted => "submitted",
            ApplicationStatus::Error => "error",
            ApplicationStatus::Rejected => "rejected",
            ApplicationStatus::Interview => "interview",
            ApplicationStatus::Offer => "offer",
            ApplicationStatus::Closed => "closed",
        }
    }

    /// An active application blocks creating another one for the same
    /// profile/role pair.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            ApplicationStatus::Draft
                | ApplicationStatus::NeedsUserInfo
                | ApplicationStatus::ReadyToSubmit
                | ApplicationStatus::Submitting
                | ApplicationStatus::WaitingApproval
        )
    }
}

impl FromStr for ApplicationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(ApplicationStatus::Draft),
            "needs_user_info" => Ok(ApplicationStatus::NeedsUserInfo),
            "ready_to_submit" => Ok(ApplicationStatus::ReadyToSubmit),
            "submitting" => Ok(ApplicationStatus::Submitting),
            "waiting_approval" => Ok(ApplicationStatus::WaitingApproval),
            "submitted" => Ok(ApplicationStatus::Submitted),
            "error" => Ok(ApplicationStatus::Error),
            "rejected" => Ok(ApplicationStatus::Rejected),
            "interview" => Ok(ApplicationStatus::Interview),
            "offer" => Ok(ApplicationStatus::Offer),
            "closed" => Ok(ApplicationStatus::Closed),
            other => Err(format!("invalid application status: {other}")),
        }
    }
}

impl std::fmt::Display for ApplicationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Profile {
    pub id: i64,
    pub headline: String,
    pub summary: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserPreference {
    pub id: i64,
    pub profile_id: i64,
    pub key: String,
    pub value: String,
    pub last_updated: DateTime<Utc>,
}

/// The password field holds the authenticated-ciphertext envelope, never
/// plaintext.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credential {
    pub id: i64,
    pub profile_id: i64,
    pub site_hostname: String,
    pub username: String,
    pub encrypted_password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Company {
    pub id: i64,
    pub name: String,
    pub website: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Role {
    pub id: i64,
    pub company_id: i64,
    pub title: String,
    pub description: String,
    pub posting_url: String,
    pub unique_hash: String,
    pub status: RoleStatus,
    pub rank_score: Option<f64>,
    pub rank_rationale: Option<String>,
    pub location: Option<String>,
    pub requirements: Option<String>,
    pub salary_range: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewRole {
    pub title: String,
    pub description: String,
    pub posting_url: String,
    pub company_name: String,
    pub location: Option<String>,
    pub requirements: Option<String>,
    pub salary_range: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Application {
    pub id: i64,
    pub role_id: i64,
    pub profile_id: i64,
    pub status: ApplicationStatus,
    /// Broker id of the in-flight (or paused) task.
    pub queue_task_id: Option<String>,
    /// Dispatcher-level attempt counter, orthogonal to worker retries.
    pub attempts: i32,
    pub resume_url: Option<String>,
    pub cover_letter_url: Option<String>,
    pub custom_answers: BTreeMap<String, String>,
    pub approval_context: Option<Value>,
    pub screenshot_url: Option<String>,
    pub error_message: Option<String>,
    pub notes: Option<String>,
    pub submitted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Row shape for `GET /applications`.
#[derive(Debug, Clone, Serialize)]
pub struct ApplicationListItem {
    pub id: i64,
    pub role_title: String,
    pub company_name: String,
    pub status: ApplicationStatus,
    pub created_at: DateTime<Utc>,
    pub submitted_at: Option<DateTime<Utc>>,
}
