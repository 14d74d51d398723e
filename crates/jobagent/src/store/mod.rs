//! Transactional persistence for profiles, roles and applications.
//!
//! The port is consumed by the dispatcher only; workers never touch the
//! store directly — their writes arrive as queue messages.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;

pub mod memory;
pub mod model;
pub mod pg;
pub mod transitions;

pub use memory::MemoryStore;
pub use model::{
    Application, ApplicationListItem, ApplicationStatus, Company, Credential, NewRole, Profile,
    Role, RoleStatus, UserPreference,
};
pub use pg::PgStore;
pub use transitions::{apply as apply_transition, AppEvent, IllegalTransition};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error(transparent)]
    IllegalTransition(#[from] IllegalTransition),
    #[error("{0}")]
    Conflict(String),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Database(_))
    }
}

#[async_trait]
pub trait ApplicationStore: Send + Sync {
    // --- profile ---

    async fn upsert_profile(&self, headline: &str, summary: &str) -> Result<i64, StoreError>;

    /// Single-user deployment: the one profile, if any.
    async fn default_profile(&self) -> Result<Option<Profile>, StoreError>;

    async fn set_preference(
        &self,
        profile_id: i64,
        key: &str,
        value: &str,
    ) -> Result<(), StoreError>;

    async fn preference(&self, profile_id: i64, key: &str)
        -> Result<Option<String>, StoreError>;

    async fn preferences(&self, profile_id: i64) -> Result<BTreeMap<String, String>, StoreError>;

    // --- credentials (ciphertext only crosses this boundary) ---

    async fn store_credential(
        &self,
        profile_id: i64,
        site_hostname: &str,
        username: &str,
        encrypted_password: &str,
    ) -> Result<(), StoreError>;

    async fn credential_for_host(
        &self,
        profile_id: i64,
        hostname: &str,
    ) -> Result<Option<Credential>, StoreError>;

    // --- companies and roles ---

    async fn get_or_create_company(&self, name: &str) -> Result<Company, StoreError>;

    /// Insert the role, or refresh an existing one matched by unique hash.
    /// A re-scraped role regresses `ranked -> sourced`. Returns the role and
    /// whether it was created.
    async fn upsert_role(&self, new_role: NewRole) -> Result<(Role, bool), StoreError>;

    async fn get_role(&self, role_id: i64) -> Result<Option<Role>, StoreError>;

    async fn set_role_status(&self, role_id: i64, status: RoleStatus) -> Result<(), StoreError>;

    async fn set_role_rank(
        &self,
        role_id: i64,
        score: f64,
        rationale: &str,
    ) -> Result<(), StoreError>;

    async fn company_name(&self, company_id: i64) -> Result<String, StoreError>;

    // --- applications ---

    async fn active_application(
        &self,
        profile_id: i64,
        role_id: i64,
    ) -> Result<Option<Application>, StoreError>;

    async fn create_application(
        &self,
        profile_id: i64,
        role_id: i64,
    ) -> Result<Application, StoreError>;

    async fn get_application(&self, id: i64) -> Result<Option<Application>, StoreError>;

    async fn list_applications(
        &self,
        status: Option<ApplicationStatus>,
    ) -> Result<Vec<ApplicationListItem>, StoreError>;

    /// Run the state machine under row-level locking. Field side effects
    /// (task id, submitted_at, error_message) are applied atomically with
    /// the status change.
    async fn apply_event(&self, id: i64, event: AppEvent) -> Result<Application, StoreError>;

    async fn set_artifacts(
        &self,
        id: i64,
        resume_url: &str,
        cover_letter_url: &str,
    ) -> Result<(), StoreError>;

    async fn set_result_fields(
        &self,
        id: i64,
        notes: Option<&str>,
        screenshot_url: Option<&str>,
    ) -> Result<(), StoreError>;

    async fn record_approval_context(&self, id: i64, context: Value) -> Result<(), StoreError>;

    async fn merge_custom_answer(
        &self,
        id: i64,
        question: &str,
        answer: &str,
    ) -> Result<(), StoreError>;

    /// Bump the dispatcher-level attempts counter; returns the new value.
    async fn increment_attempts(&self, id: i64) -> Result<i32, StoreError>;

    /// Applications stuck in SUBMITTING whose last update predates `cutoff`.
    async fn stale_submitting(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<Application>, StoreError>;

    /// The approval that has been waiting the longest for this profile.
    async fn oldest_waiting_approval(
        &self,
        profile_id: i64,
    ) -> Result<Option<Application>, StoreError>;

    // --- operational records ---

    async fn record_unmatched_inbound(
        &self,
        from_number: &str,
        body: &str,
    ) -> Result<(), StoreError>;

    /// Dead-letter log for results referencing unknown applications.
    async fn record_dead_letter(
        &self,
        queue: &str,
        payload: &Value,
        reason: &str,
    ) -> Result<(), StoreError>;

    async fn status_counts(&self) -> Result<Vec<(ApplicationStatus, i64)>, StoreError>;

    async fn ping(&self) -> Result<(), StoreError>;
}
