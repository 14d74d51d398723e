//! The bounded agentic form-filling loop.
//!
//! One task in, exactly one terminal outcome out: success, needs-approval,
//! or failure. The loop never retries internally past its budgets; the
//! caller decides whether a transient failure re-enters the queue.

use chrono::{DateTime, Utc};
use secrecy::SecretString;

use jobagent::payloads::{ApprovalPageContext, JobApplicationTask};

use crate::form;
use crate::session::{
    BrowserSession, PageAnalyzer, PageKind, QuestionAnswer, SessionError,
};

#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error("{0}")]
    Transient(String),
    #[error("{0}")]
    Task(String),
    #[error("task deadline exceeded")]
    Deadline,
}

impl WorkerError {
    pub fn is_transient(&self) -> bool {
        matches!(self, WorkerError::Transient(_))
    }
}

impl From<SessionError> for WorkerError {
    fn from(e: SessionError) -> Self {
        if e.is_transient() {
            WorkerError::Transient(e.to_string())
        } else {
            WorkerError::Task(e.to_string())
        }
    }
}

#[derive(Debug)]
pub enum Outcome {
    Success {
        confirmation_message: Option<String>,
        submitted_at: DateTime<Utc>,
        screenshot_url: Option<String>,
    },
    NeedsApproval {
        question: String,
        state_blob: Option<String>,
        screenshot_url: Option<String>,
        context: ApprovalPageContext,
    },
    Failure(WorkerError),
}

#[derive(Clone, Copy, Debug)]
pub struct RunLimits {
    pub max_steps: u32,
    pub max_field_attempts: u32,
}

impl Default for RunLimits {
    fn default() -> Self {
        Self {
            max_steps: 10,
            max_field_attempts: 3,
        }
    }
}

pub struct TaskRunner<'a> {
    analyzer: &'a dyn PageAnalyzer,
    limits: RunLimits,
}

impl<'a> TaskRunner<'a> {
    pub fn new(analyzer: &'a dyn PageAnalyzer, limits: RunLimits) -> Self {
        Self { analyzer, limits }
    }

    pub async fn run(
        &self,
        task: &JobApplicationTask,
        session: &mut dyn BrowserSession,
    ) -> Outcome {
        match self.drive(task, session).await {
            Ok(outcome) => outcome,
            Err(e) => Outcome::Failure(e),
        }
    }

    async fn drive(
        &self,
        task: &JobApplicationTask,
        session: &mut dyn BrowserSession,
    ) -> Result<Outcome, WorkerError> {
        // A paused run resumes from its serialized state instead of
        // re-navigating (and re-answering) from scratch.
        match &task.resume_from {
            Some(blob) => session.restore_state(blob).await?,
            None => session.goto(&task.job_url).await?,
        }

        let mut unknown_streak = 0u32;

        for step in 0..self.limits.max_steps {
            let observation = self.observe_with_retries(session).await?;
            let analysis = self.analyzer.analyze(&observation).await?;

            tracing::debug!(step, kind = ?analysis.kind, url = %observation.url, "page analyzed");

            if analysis.kind != PageKind::Unknown {
                unknown_streak = 0;
            }

            match analysis.kind {
                PageKind::JobDescription => {
                    session.click_apply().await?;
                }
                PageKind::Login => {
                    let Some(credentials) = &task.credentials else {
                        return Err(WorkerError::Task(
                            "login required but no credentials on file".to_string(),
                        ));
                    };
                    let password = SecretString::from(credentials.password.clone());
                    session.login(&credentials.username, &password).await?;
                }
                PageKind::ApplicationForm | PageKind::MultiStep => {
                    if let Some(outcome) = self
                        .fill_form(
                            task,
                            session,
                            &analysis.fields,
                            &analysis.custom_questions,
                            observation.has_password_field,
                        )
                        .await?
                    {
                        return Ok(outcome);
                    }
                    session.submit().await?;
                }
                PageKind::Confirmation => {
                    let screenshot_url = if observation.has_password_field {
                        None
                    } else {
                        session.screenshot().await.unwrap_or(None)
                    };
                    return Ok(Outcome::Success {
                        confirmation_message: analysis.confirmation_text,
                        submitted_at: Utc::now(),
                        screenshot_url,
                    });
                }
                PageKind::Unknown => {
                    unknown_streak += 1;
                    if unknown_streak >= self.limits.max_field_attempts {
                        return Err(WorkerError::Task(format!(
                            "page not recognized after {unknown_streak} looks: {}",
                            observation.url
                        )));
                    }
                }
            }
        }

        Err(WorkerError::Task(format!(
            "no confirmation after {} steps",
            self.limits.max_steps
        )))
    }

    /// Fill standard fields and uploads, then resolve custom questions.
    /// Returns `Some(NeedsApproval)` when a question must go to the user.
    async fn fill_form(
        &self,
        task: &JobApplicationTask,
        session: &mut dyn BrowserSession,
        fields: &[crate::session::FormField],
        custom_questions: &[String],
        on_password_page: bool,
    ) -> Result<Option<Outcome>, WorkerError> {
        for field in fields {
            if field.is_upload {
                let label = field.label.to_lowercase();
                let file_url = if label.contains("cover") {
                    task.user_data.cover_letter_url.as_deref()
                } else {
                    task.user_data.resume_url.as_deref()
                };
                if let Some(url) = file_url {
                    self.upload_with_attempts(session, &field.label, url).await?;
                }
                continue;
            }

            if let Some(value) = form::map_standard_field(&field.label, &task.user_data) {
                self.fill_with_attempts(session, &field.label, &value).await?;
            } else if field.required {
                tracing::debug!(label = %field.label, "required field has no standard mapping");
            }
        }

        for question in custom_questions {
            match form::resolve_question(question, task, self.analyzer).await? {
                QuestionAnswer::Answer { text, confidence } => {
                    tracing::info!(question = %question, confidence, "custom question answered");
                    self.fill_with_attempts(session, question, &text).await?;
                }
                QuestionAnswer::NeedsHuman => {
                    // Suspend: capture everything needed to resume later,
                    // then let the session go. Never screenshot a password
                    // page.
                    let screenshot_url = if on_password_page {
                        None
                    } else {
                        session.screenshot().await.unwrap_or(None)
                    };
                    let state_blob = session.serialize_state().await.ok();
                    let observation = session.observe().await.ok();

                    return Ok(Some(Outcome::NeedsApproval {
                        question: question.clone(),
                        state_blob,
                        screenshot_url,
                        context: ApprovalPageContext {
                            page_title: observation.as_ref().and_then(|o| o.title.clone()),
                            page_url: observation.map(|o| o.url),
                            form_fields: Some(
                                fields.iter().map(|f| f.label.clone()).collect(),
                            ),
                        },
                    }));
                }
            }
        }

        Ok(None)
    }

    async fn observe_with_retries(
        &self,
        session: &mut dyn BrowserSession,
    ) -> Result<crate::session::PageObservation, WorkerError> {
        let mut last_err = None;
        for _ in 0..self.limits.max_field_attempts {
            match session.observe().await {
                Ok(obs) => return Ok(obs),
                Err(e) if e.is_transient() => last_err = Some(e),
                Err(e) => return Err(e.into()),
            }
        }
        Err(last_err
            .map(WorkerError::from)
            .unwrap_or_else(|| WorkerError::Task("observe failed".to_string())))
    }

    async fn fill_with_attempts(
        &self,
        session: &mut dyn BrowserSession,
        label: &str,
        value: &str,
    ) -> Result<(), WorkerError> {
        let mut last_err = None;
        for _ in 0..self.limits.max_field_attempts {
            match session.fill_field(label, value).await {
                Ok(()) => return Ok(()),
                Err(e) if e.is_transient() => last_err = Some(e),
                Err(e) => return Err(e.into()),
            }
        }
        Err(last_err
            .map(WorkerError::from)
            .unwrap_or_else(|| WorkerError::Task("fill failed".to_string())))
    }

    async fn upload_with_attempts(
        &self,
        session: &mut dyn BrowserSession,
        label: &str,
        file_url: &str,
    ) -> Result<(), WorkerError> {
        let mut last_err = None;
        for _ in 0..self.limits.max_field_attempts {
            match session.upload_file(label, file_url).await {
                Ok(()) => return Ok(()),
                Err(e) if e.is_transient() => last_err = Some(e),
                Err(e) => return Err(e.into()),
            }
        }
        Err(last_err
            .map(WorkerError::from)
            .unwrap_or_else(|| WorkerError::Task("upload failed".to_string())))
    }
}

/// Exponential backoff before re-publishing a transiently failed task.
pub fn retry_delay_secs(retries: u32) -> u64 {
    let exp = retries.min(5);
    (1u64 << exp).min(30)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_and_caps_at_thirty() {
        assert_eq!(retry_delay_secs(0), 1);
        assert_eq!(retry_delay_secs(1), 2);
        assert_eq!(retry_delay_secs(2), 4);
        assert_eq!(retry_delay_secs(4), 16);
        assert_eq!(retry_delay_secs(5), 30);
        assert_eq!(retry_delay_secs(12), 30);
    }
}
