//! The application state machine, centralized so every handler goes through
//! the same `(state, event) -> state` function instead of scattering status
//! writes.

use chrono::{DateTime, Utc};

use super::model::ApplicationStatus;

#[derive(Debug, Clone)]
pub enum AppEvent {
    /// Resume and cover-letter URLs are populated.
    DocumentsReady,
    /// A `job_application` task was published; the id is stored atomically
    /// with the transition.
    TaskPublished { task_id: String },
    /// Worker reported `applied`.
    WorkerApplied { submitted_at: DateTime<Utc> },
    /// Worker paused for a user answer. The task id is kept: it tracks the
    /// paused conversation, not a live task.
    WorkerWaitingApproval,
    /// Worker cannot proceed without out-of-band user info.
    WorkerNeedsUserInfo,
    /// Worker reported terminal failure (or maintenance declared the worker
    /// lost).
    WorkerFailed { error_message: String },
    /// User answered; a fresh task was published with the reply merged in.
    ApprovalResumed { task_id: String },
    /// User-driven post-submission bookkeeping.
    UserAdvanced { to: ApplicationStatus },
}

impl AppEvent {
    pub fn name(&self) -> &'static str {
        match self {
            AppEvent::DocumentsReady => "documents_ready",
            AppEvent::TaskPublished { .. } => "task_published",
            AppEvent::WorkerApplied { .. } => "worker_applied",
            AppEvent::WorkerWaitingApproval => "worker_waiting_approval",
            AppEvent::WorkerNeedsUserInfo => "worker_needs_user_info",
            AppEvent::WorkerFailed { .. } => "worker_failed",
            AppEvent::ApprovalResumed { .. } => "approval_resumed",
            AppEvent::UserAdvanced { .. } => "user_advanced",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("illegal transition: {event} from {from}")]
pub struct IllegalTransition {
    pub from: ApplicationStatus,
    pub event: &'static str,
}

pub fn apply(
    state: ApplicationStatus,
    event: &AppEvent,
) -> Result<ApplicationStatus, IllegalTransition> {
    use ApplicationStatus as S;

    let next = match (state, event) {
        (S::Draft, AppEvent::DocumentsReady) => S::ReadyToSubmit,

        // Error is re-enterable: a dispatcher retry republishes the task.
        (S::ReadyToSubmit | S::Error, AppEvent::TaskPublished { .. }) => S::Submitting,

        (S::Submitting, AppEvent::WorkerApplied { .. }) => S::Submitted,
        (S::Submitting, AppEvent::WorkerWaitingApproval) => S::WaitingApproval,
        (S::Submitting, AppEvent::WorkerNeedsUserInfo) => S::NeedsUserInfo,
        (S::Submitting, AppEvent::WorkerFailed { .. }) => S::Error,

        (S::WaitingApproval, AppEvent::ApprovalResumed { .. }) => S::Submitting,

        (S::Submitted, AppEvent::UserAdvanced { to: to @ (S::Interview | S::Rejected) }) => *to,
        (S::Interview, AppEvent::UserAdvanced { to: to @ (S::Offer | S::Rejected) }) => *to,
        (S::Offer | S::Rejected, AppEvent::UserAdvanced { to: to @ S::Closed }) => *to,

        (from, event) => {
            return Err(IllegalTransition {
                from,
                event: event.name(),
            })
        }
    };

    Ok(next)
}
