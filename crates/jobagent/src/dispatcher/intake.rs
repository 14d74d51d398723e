//! Trigger intake: turn an HTTP or SMS request into a published
//! `job_application` task and a SUBMITTING application.

use secrecy::ExposeSecret;

use crate::broker::QueueName;
use crate::external::RoleDetails;
use crate::payloads::{
    AiInstructions, JobApplicationTask, TaskCredentials, UserData, WorkArrangement,
};
use crate::store::{
    AppEvent, Application, ApplicationStatus, NewRole, Profile, Role, RoleStatus,
};

use super::{DispatchError, Dispatcher, TriggerOutcome};

pub const PAUSE_PREFERENCE: &str = "automation_paused";

impl Dispatcher {
    /// Create or reuse the active application for a role and publish its
    /// task. A second trigger while one is in flight returns the existing
    /// application without publishing again.
    pub async fn trigger_application(&self, role_id: i64) -> Result<TriggerOutcome, DispatchError> {
        let profile = self
            .store
            .default_profile()
            .await?
            .ok_or(DispatchError::NotFound("profile"))?;

        let role = self
            .store
            .get_role(role_id)
            .await?
            .ok_or(DispatchError::NotFound("role"))?;

        if self.automation_paused(profile.id).await? {
            return Err(DispatchError::Paused);
        }

        let app = match self.store.active_application(profile.id, role.id).await? {
            Some(existing) => {
                if matches!(
                    existing.status,
                    ApplicationStatus::Submitting
                        | ApplicationStatus::WaitingApproval
                        | ApplicationStatus::NeedsUserInfo
                ) {
                    tracing::info!(
                        application_id = existing.id,
                        status = %existing.status,
                        "reusing in-flight application"
                    );
                    return Ok(TriggerOutcome {
                        application_id: existing.id,
                        task_id: existing.queue_task_id,
                        reused: true,
                    });
                }
                existing
            }
            None => self.store.create_application(profile.id, role.id).await?,
        };

        let task_id = self.publish_application(&app, &role, &profile).await?;

        Ok(TriggerOutcome {
            application_id: app.id,
            task_id: Some(task_id),
            reused: false,
        })
    }

    /// Merge a user's approval answer and put the paused application back in
    /// flight with the saved page state.
    pub async fn resume_application(
        &self,
        application_id: i64,
        reply: &str,
    ) -> Result<String, DispatchError> {
        let _guard = self.lock_application(application_id).await;

        let app = self
            .store
            .get_application(application_id)
            .await?
            .ok_or(DispatchError::NotFound("application"))?;

        if app.status != ApplicationStatus::WaitingApproval {
            return Err(DispatchError::NotAwaitingApproval(application_id));
        }

        let context = app.approval_context.clone().unwrap_or_default();
        let question = context
            .get("question")
            .and_then(|v| v.as_str())
            .unwrap_or("Pending question")
            .to_string();
        let resume_from = context
            .get("current_state")
            .and_then(|v| v.as_str())
            .map(str::to_string);

        self.store
            .merge_custom_answer(application_id, &question, reply.trim())
            .await?;

        let app = self
            .store
            .get_application(application_id)
            .await?
            .ok_or(DispatchError::NotFound("application"))?;
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

        let mut payload = self.assemble_task(&app, &role, &profile).await?;
        payload.resume_from = resume_from;

        let value = serde_json::to_value(&payload)?;
        // Resumed answers jump ahead of fresh triggers.
        let task_id = self
            .broker
            .publish(QueueName::JobApplication, value, 1)
            .await?;

        self.store
            .apply_event(
                application_id,
                AppEvent::ApprovalResumed {
                    task_id: task_id.clone(),
                },
            )
            .await?;

        tracing::info!(application_id, task_id = %task_id, "approval answer re-published");
        Ok(task_id)
    }

    /// Scrape a posting URL, upsert its role and immediately trigger an
    /// application for it.
    pub async fn ingest_role_url(&self, url: &str) -> Result<TriggerOutcome, DispatchError> {
        let details = self.scraper.scrape(url).await?;
        let role = self.upsert_scraped_role(url, details).await?;
        self.trigger_application(role.id).await
    }

    pub async fn upsert_scraped_role(
        &self,
        url: &str,
        details: RoleDetails,
    ) -> Result<Role, DispatchError> {
        let (role, created) = self
            .store
            .upsert_role(NewRole {
                title: details.title,
                description: details.description.unwrap_or_default(),
                posting_url: url.to_string(),
                company_name: details.company_name,
                location: details.location,
                requirements: details.requirements,
                salary_range: details.salary_range,
            })
            .await?;

        tracing::info!(role_id = role.id, created, "role ingested");
        Ok(role)
    }

    pub async fn automation_paused(&self, profile_id: i64) -> Result<bool, DispatchError> {
        let paused = self
            .store
            .preference(profile_id, PAUSE_PREFERENCE)
            .await?
            .map(|v| v == "true")
            .unwrap_or(false);
        Ok(paused)
    }

    pub async fn set_automation_paused(
        &self,
        profile_id: i64,
        paused: bool,
    ) -> Result<(), DispatchError> {
        self.store
            .set_preference(profile_id, PAUSE_PREFERENCE, if paused { "true" } else { "false" })
            .await?;
        Ok(())
    }

    /// Shared publish path for fresh triggers and maintenance retries:
    /// ensure documents, assemble the payload (decrypting credentials last),
    /// publish, and transition to SUBMITTING with the new task id.
    pub(crate) async fn publish_application(
        &self,
        app: &Application,
        role: &Role,
        profile: &Profile,
    ) -> Result<String, DispatchError> {
        let mut app = app.clone();

        if app.resume_url.is_none() || app.cover_letter_url.is_none() {
            let company_name = self.store.company_name(role.company_id).await?;
            let urls = self
                .documents
                .render(app.id, &role.title, &company_name)
                .await?;
            self.store
                .set_artifacts(app.id, &urls.resume_url, &urls.cover_letter_url)
                .await?;
            app.resume_url = Some(urls.resume_url);
            app.cover_letter_url = Some(urls.cover_letter_url);
        }

        if app.status == ApplicationStatus::Draft {
            app = self.store.apply_event(app.id, AppEvent::DocumentsReady).await?;
        }

        let payload = self.assemble_task(&app, role, profile).await?;
        let value = serde_json::to_value(&payload)?;

        let task_id = self
            .broker
            .publish(QueueName::JobApplication, value, 0)
            .await?;

        self.store
            .apply_event(
                app.id,
                AppEvent::TaskPublished {
                    task_id: task_id.clone(),
                },
            )
            .await?;
        self.store.increment_attempts(app.id).await?;
        self.store.set_role_status(role.id, RoleStatus::Applying).await?;

        tracing::info!(
            application_id = app.id,
            role_id = role.id,
            task_id = %task_id,
            "job application task published"
        );
        Ok(task_id)
    }

    /// Build the task payload. Credentials are decrypted here, immediately
    /// before publication; the plaintext lives only inside this payload.
    pub(crate) async fn assemble_task(
        &self,
        app: &Application,
        role: &Role,
        profile: &Profile,
    ) -> Result<JobApplicationTask, DispatchError> {
        let prefs = self.store.preferences(profile.id).await?;
        let company_name = self.store.company_name(role.company_id).await?;

        let get = |key: &str| prefs.get(key).cloned();

        let user_data = UserData {
            name: get("name").unwrap_or_else(|| {
                let first = get("first_name").unwrap_or_default();
                let last = get("last_name").unwrap_or_default();
                format!("{first} {last}").trim().to_string()
            }),
            first_name: get("first_name"),
            last_name: get("last_name"),
            email: get("email").unwrap_or_default(),
            phone: get("phone").unwrap_or_default(),
            resume_url: app.resume_url.clone(),
            cover_letter_url: app.cover_letter_url.clone(),
            linkedin_url: get("linkedin_url"),
            github_url: get("github_url"),
            portfolio_url: get("portfolio_url"),
            website: get("website"),
            address: get("address"),
            city: get("city"),
            state: get("state"),
            zip_code: get("zip_code"),
            country: get("country"),
            current_role: get("current_role"),
            experience_years: get("experience_years"),
            education: get("education"),
            skills: get("skills")
                .map(|s| s.split(',').map(|x| x.trim().to_string()).collect()),
            preferred_work_arrangement: get("preferred_work_arrangement").and_then(|v| {
                match v.as_str() {
                    "remote" => Some(WorkArrangement::Remote),
                    "hybrid" => Some(WorkArrangement::Hybrid),
                    "onsite" => Some(WorkArrangement::Onsite),
                    _ => None,
                }
            }),
            availability: get("availability"),
            salary_expectation: get("salary_expectation"),
            summary: Some(profile.summary.clone()),
            headline: Some(profile.headline.clone()),
        };

        let ai_instructions = {
            let tone = get("ai_tone");
            let focus_areas = get("ai_focus_areas")
                .map(|s| s.split(',').map(|x| x.trim().to_string()).collect());
            let avoid_topics = get("ai_avoid_topics")
                .map(|s| s.split(',').map(|x| x.trim().to_string()).collect());

            if tone.is_none() && focus_areas.is_none() && avoid_topics.is_none() {
                None
            } else {
                Some(AiInstructions {
                    tone,
                    focus_areas,
                    avoid_topics,
                })
            }
        };

        let credentials = match site_hostname(&role.posting_url) {
            Some(host) => match self.store.credential_for_host(profile.id, &host).await? {
                Some(cred) => {
                    // I5: a decryption failure aborts the publish outright.
                    let password = self.cipher.decrypt(&cred.encrypted_password)?;
                    Some(TaskCredentials {
                        username: cred.username,
                        password: password.expose_secret().to_string(),
                    })
                }
                None => None,
            },
            None => None,
        };

        Ok(JobApplicationTask {
            job_id: role.id,
            job_url: role.posting_url.clone(),
            company: company_name,
            title: role.title.clone(),
            application_id: app.id,
            user_data,
            credentials,
            custom_answers: if app.custom_answers.is_empty() {
                None
            } else {
                Some(app.custom_answers.clone())
            },
            ai_instructions,
            resume_from: None,
        })
    }
}

fn site_hostname(posting_url: &str) -> Option<String> {
    url::Url::parse(posting_url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_string))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hostname_extraction() {
        assert_eq!(
            site_hostname("https://jobs.example.com/roles/42?ref=x"),
            Some("jobs.example.com".to_string())
        );
        assert_eq!(site_hostname("not a url"), None);
    }
}
