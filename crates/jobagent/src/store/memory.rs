//! In-memory store adapter backing the test suite and local development.
//! Semantics mirror the Postgres adapter, including the state-machine
//! enforcement and the active-application uniqueness rule.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::RwLock;

use crate::security::role_unique_hash;

use super::model::*;
use super::transitions::{self, AppEvent};
use super::{ApplicationStore, StoreError};

#[derive(Default)]
struct Inner {
    next_id: i64,
    profiles: BTreeMap<i64, Profile>,
    preferences: Vec<UserPreference>,
    credentials: Vec<Credential>,
    companies: BTreeMap<i64, Company>,
    roles: BTreeMap<i64, Role>,
    applications: BTreeMap<i64, Application>,
    unmatched_inbound: Vec<(String, String, DateTime<Utc>)>,
    dead_letters: Vec<(String, Value, String, DateTime<Utc>)>,
}

impl Inner {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }
}

#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Test hook: backdate an application's `updated_at` so the maintenance
    /// scan sees it as stale.
    pub async fn backdate_application(&self, id: i64, updated_at: DateTime<Utc>) {
        let mut inner = self.inner.write().await;
        if let Some(app) = inner.applications.get_mut(&id) {
            app.updated_at = updated_at;
        }
    }

    pub async fn unmatched_inbound_count(&self) -> usize {
        self.inner.read().await.unmatched_inbound.len()
    }

    pub async fn dead_letter_count(&self) -> usize {
        self.inner.read().await.dead_letters.len()
    }
}

#[async_trait]
impl ApplicationStore for MemoryStore {
    async fn upsert_profile(&self, headline: &str, summary: &str) -> Result<i64, StoreError> {
        let mut inner = self.inner.write().await;
        let now = Utc::now();

        if let Some(profile) = inner.profiles.values_mut().next() {
            profile.headline = headline.to_string();
            profile.summary = summary.to_string();
            profile.updated_at = now;
            return Ok(profile.id);
        }

        let id = inner.next_id();
        inner.profiles.insert(
            id,
            Profile {
                id,
                headline: headline.to_string(),
                summary: summary.to_string(),
                created_at: now,
                updated_at: now,
            },
        );
        Ok(id)
    }

    async fn default_profile(&self) -> Result<Option<Profile>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner.profiles.values().next().cloned())
    }

    async fn set_preference(
        &self,
        profile_id: i64,
        key: &str,
        value: &str,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        let now = Utc::now();

        if let Some(pref) = inner
            .preferences
            .iter_mut()
            .find(|p| p.profile_id == profile_id && p.key == key)
        {
            pref.value = value.to_string();
            pref.last_updated = now;
            return Ok(());
        }

        let id = inner.next_id();
        inner.preferences.push(UserPreference {
            id,
            profile_id,
            key: key.to_string(),
            value: value.to_string(),
            last_updated: now,
        });
        Ok(())
    }

    async fn preference(
        &self,
        profile_id: i64,
        key: &str,
    ) -> Result<Option<String>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner
            .preferences
            .iter()
            .find(|p| p.profile_id == profile_id && p.key == key)
            .map(|p| p.value.clone()))
    }

    async fn preferences(&self, profile_id: i64) -> Result<BTreeMap<String, String>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner
            .preferences
            .iter()
            .filter(|p| p.profile_id == profile_id)
            .map(|p| (p.key.clone(), p.value.clone()))
            .collect())
    }

    async fn store_credential(
        &self,
        profile_id: i64,
        site_hostname: &str,
        username: &str,
        encrypted_password: &str,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;

        if let Some(cred) = inner
            .credentials
            .iter_mut()
            .find(|c| c.profile_id == profile_id && c.site_hostname == site_hostname)
        {
            cred.username = username.to_string();
            cred.encrypted_password = encrypted_password.to_string();
            return Ok(());
        }

        let id = inner.next_id();
        inner.credentials.push(Credential {
            id,
            profile_id,
            site_hostname: site_hostname.to_string(),
            username: username.to_string(),
            encrypted_password: encrypted_password.to_string(),
        });
        Ok(())
    }

    async fn credential_for_host(
        &self,
        profile_id: i64,
        hostname: &str,
    ) -> Result<Option<Credential>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner
            .credentials
            .iter()
            .find(|c| c.profile_id == profile_id && c.site_hostname == hostname)
            .cloned())
    }

    async fn get_or_create_company(&self, name: &str) -> Result<Company, StoreError> {
        let normalized = name.trim().to_lowercase();
        let mut inner = self.inner.write().await;

        if let Some(company) = inner
            .companies
            .values()
            .find(|c| c.name.trim().to_lowercase() == normalized)
        {
            return Ok(company.clone());
        }

        let id = inner.next_id();
        let company = Company {
            id,
            name: name.trim().to_string(),
            website: None,
        };
        inner.companies.insert(id, company.clone());
        Ok(company)
    }

    async fn upsert_role(&self, new_role: NewRole) -> Result<(Role, bool), StoreError> {
        let company = self.get_or_create_company(&new_role.company_name).await?;
        let hash = role_unique_hash(&company.name, &new_role.title);

        let mut inner = self.inner.write().await;

        if let Some(role) = inner.roles.values_mut().find(|r| r.unique_hash == hash) {
            role.description = new_role.description;
            role.posting_url = new_role.posting_url;
            role.location = new_role.location;
            role.requirements = new_role.requirements;
            role.salary_range = new_role.salary_range;
            if role.status == RoleStatus::Ranked {
                role.status = RoleStatus::Sourced;
            }
            return Ok((role.clone(), false));
        }

        let id = inner.next_id();
        let role = Role {
            id,
            company_id: company.id,
            title: new_role.title,
            description: new_role.description,
            posting_url: new_role.posting_url,
            unique_hash: hash,
            status: RoleStatus::Sourced,
            rank_score: None,
            rank_rationale: None,
            location: new_role.location,
            requirements: new_role.requirements,
            salary_range: new_role.salary_range,
            created_at: Utc::now(),
        };
        inner.roles.insert(id, role.clone());
        Ok((role, true))
    }

    async fn get_role(&self, role_id: i64) -> Result<Option<Role>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner.roles.get(&role_id).cloned())
    }

    async fn set_role_status(&self, role_id: i64, status: RoleStatus) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        let role = inner
            .roles
            .get_mut(&role_id)
            .ok_or(StoreError::NotFound("role"))?;
        role.status = status;
        Ok(())
    }

    async fn set_role_rank(
        &self,
        role_id: i64,
        score: f64,
        rationale: &str,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        let role = inner
            .roles
            .get_mut(&role_id)
            .ok_or(StoreError::NotFound("role"))?;
        role.rank_score = Some(score.clamp(0.0, 1.0));
        role.rank_rationale = Some(rationale.to_string());
        if role.status == RoleStatus::Sourced {
            role.status = RoleStatus::Ranked;
        }
        Ok(())
    }

    async fn company_name(&self, company_id: i64) -> Result<String, StoreError> {
        let inner = self.inner.read().await;
        inner
            .companies
            .get(&company_id)
            .map(|c| c.name.clone())
            .ok_or(StoreError::NotFound("company"))
    }

    async fn active_application(
        &self,
        profile_id: i64,
        role_id: i64,
    ) -> Result<Option<Application>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner
            .applications
            .values()
            .find(|a| a.profile_id == profile_id && a.role_id == role_id && a.status.is_active())
            .cloned())
    }

    async fn create_application(
        &self,
        profile_id: i64,
        role_id: i64,
    ) -> Result<Application, StoreError> {
        let mut inner = self.inner.write().await;

        let existing_active = inner
            .applications
            .values()
            .any(|a| a.profile_id == profile_id && a.role_id == role_id && a.status.is_active());
        if existing_active {
            return Err(StoreError::Conflict(format!(
                "active application already exists for profile {profile_id} role {role_id}"
            )));
        }

        let now = Utc::now();
        let id = inner.next_id();
        let app = Application {
            id,
            role_id,
            profile_id,
            status: ApplicationStatus::Draft,
            queue_task_id: None,
            attempts: 0,
            resume_url: None,
            cover_letter_url: None,
            custom_answers: BTreeMap::new(),
            approval_context: None,
            screenshot_url: None,
            error_message: None,
            notes: None,
            submitted_at: None,
            created_at: now,
            updated_at: now,
        };
        inner.applications.insert(id, app.clone());
        Ok(app)
    }

    async fn get_application(&self, id: i64) -> Result<Option<Application>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner.applications.get(&id).cloned())
    }

    async fn list_applications(
        &self,
        status: Option<ApplicationStatus>,
    ) -> Result<Vec<ApplicationListItem>, StoreError> {
        let inner = self.inner.read().await;

        let mut items = Vec::new();
        for app in inner.applications.values() {
            if let Some(filter) = status {
                if app.status != filter {
                    continue;
                }
            }

            let role = inner.roles.get(&app.role_id);
            let company = role.and_then(|r| inner.companies.get(&r.company_id));

            items.push(ApplicationListItem {
                id: app.id,
                role_title: role.map(|r| r.title.clone()).unwrap_or_default(),
                company_name: company.map(|c| c.name.clone()).unwrap_or_default(),
                status: app.status,
                created_at: app.created_at,
                submitted_at: app.submitted_at,
            });
        }

        items.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(items)
    }

    async fn apply_event(&self, id: i64, event: AppEvent) -> Result<Application, StoreError> {
        let mut inner = self.inner.write().await;
        let app = inner
            .applications
            .get_mut(&id)
            .ok_or(StoreError::NotFound("application"))?;

        let next = transitions::apply(app.status, &event)?;
        app.status = next;
        app.updated_at = Utc::now();

        match event {
            AppEvent::TaskPublished { task_id } | AppEvent::ApprovalResumed { task_id } => {
                app.queue_task_id = Some(task_id);
            }
            AppEvent::WorkerApplied { submitted_at } => {
                app.submitted_at = Some(submitted_at);
                app.queue_task_id = None;
            }
            AppEvent::WorkerWaitingApproval => {
                // task id retained: it names the paused conversation
            }
            AppEvent::WorkerNeedsUserInfo => {
                app.queue_task_id = None;
            }
            AppEvent::WorkerFailed { error_message } => {
                app.error_message = Some(error_message);
                app.queue_task_id = None;
            }
            AppEvent::DocumentsReady | AppEvent::UserAdvanced { .. } => {}
        }

        Ok(app.clone())
    }

    async fn set_artifacts(
        &self,
        id: i64,
        resume_url: &str,
        cover_letter_url: &str,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        let app = inner
            .applications
            .get_mut(&id)
            .ok_or(StoreError::NotFound("application"))?;
        app.resume_url = Some(resume_url.to_string());
        app.cover_letter_url = Some(cover_letter_url.to_string());
        app.updated_at = Utc::now();
        Ok(())
    }

    async fn set_result_fields(
        &self,
        id: i64,
        notes: Option<&str>,
        screenshot_url: Option<&str>,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        let app = inner
            .applications
            .get_mut(&id)
            .ok_or(StoreError::NotFound("application"))?;
        if let Some(notes) = notes {
            app.notes = Some(notes.to_string());
        }
        if let Some(url) = screenshot_url {
            app.screenshot_url = Some(url.to_string());
        }
        app.updated_at = Utc::now();
        Ok(())
    }

    async fn record_approval_context(&self, id: i64, context: Value) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        let app = inner
            .applications
            .get_mut(&id)
            .ok_or(StoreError::NotFound("application"))?;
        app.approval_context = Some(context);
        app.updated_at = Utc::now();
        Ok(())
    }

    async fn merge_custom_answer(
        &self,
        id: i64,
        question: &str,
        answer: &str,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        let app = inner
            .applications
            .get_mut(&id)
            .ok_or(StoreError::NotFound("application"))?;
        app.custom_answers
            .insert(question.to_string(), answer.to_string());
        app.updated_at = Utc::now();
        Ok(())
    }

    async fn increment_attempts(&self, id: i64) -> Result<i32, StoreError> {
        let mut inner = self.inner.write().await;
        let app = inner
            .applications
            .get_mut(&id)
            .ok_or(StoreError::NotFound("application"))?;
        app.attempts += 1;
        Ok(app.attempts)
    }

    async fn stale_submitting(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<Application>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner
            .applications
            .values()
            .filter(|a| a.status == ApplicationStatus::Submitting && a.updated_at < cutoff)
            .cloned()
            .collect())
    }

    async fn oldest_waiting_approval(
        &self,
        profile_id: i64,
    ) -> Result<Option<Application>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner
            .applications
            .values()
            .filter(|a| {
                a.profile_id == profile_id && a.status == ApplicationStatus::WaitingApproval
            })
            .min_by_key(|a| a.updated_at)
            .cloned())
    }

    async fn record_unmatched_inbound(
        &self,
        from_number: &str,
        body: &str,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        inner
            .unmatched_inbound
            .push((from_number.to_string(), body.to_string(), Utc::now()));
        Ok(())
    }

    async fn record_dead_letter(
        &self,
        queue: &str,
        payload: &Value,
        reason: &str,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        inner.dead_letters.push((
            queue.to_string(),
            payload.clone(),
            reason.to_string(),
            Utc::now(),
        ));
        Ok(())
    }

    async fn status_counts(&self) -> Result<Vec<(ApplicationStatus, i64)>, StoreError> {
        let inner = self.inner.read().await;
        let mut counts: BTreeMap<&'static str, (ApplicationStatus, i64)> = BTreeMap::new();
        for app in inner.applications.values() {
            counts
                .entry(app.status.as_str())
                .and_modify(|(_, n)| *n += 1)
                .or_insert((app.status, 1));
        }
        Ok(counts.into_values().collect())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}
