//! Ports onto the browser-automation sidecar.
//!
//! `BrowserSession` drives one live page; `PageAnalyzer` classifies what the
//! page currently shows and resolves questions the form asks. Production
//! adapters live in `stagehand.rs`; the test suite scripts both.

use async_trait::async_trait;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};

use jobagent::payloads::UserData;

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("transient automation error: {0}")]
    Transient(String),
    #[error("automation failed: {0}")]
    Fatal(String),
    #[error("browser command timed out")]
    Timeout,
}

impl SessionError {
    pub fn is_transient(&self) -> bool {
        matches!(self, SessionError::Transient(_) | SessionError::Timeout)
    }
}

/// Raw view of the current page, before classification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageObservation {
    pub url: String,
    #[serde(default)]
    pub title: Option<String>,
    pub content: String,
    /// Screenshots are suppressed while this is set.
    #[serde(default)]
    pub has_password_field: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PageKind {
    JobDescription,
    ApplicationForm,
    Login,
    MultiStep,
    Confirmation,
    Unknown,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FormField {
    pub label: String,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub is_upload: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageAnalysis {
    pub kind: PageKind,
    #[serde(default)]
    pub fields: Vec<FormField>,
    #[serde(default)]
    pub custom_questions: Vec<String>,
    #[serde(default)]
    pub confirmation_text: Option<String>,
}

/// Outcome of classifying one custom question against the profile.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum QuestionAnswer {
    Answer { text: String, confidence: f64 },
    NeedsHuman,
}

#[async_trait]
pub trait BrowserSession: Send {
    async fn goto(&mut self, url: &str) -> Result<(), SessionError>;

    async fn observe(&mut self) -> Result<PageObservation, SessionError>;

    /// Click the posting's apply affordance.
    async fn click_apply(&mut self) -> Result<(), SessionError>;

    /// Authenticate on a login wall. The password is typed, never logged.
    async fn login(&mut self, username: &str, password: &SecretString)
        -> Result<(), SessionError>;

    async fn fill_field(&mut self, label: &str, value: &str) -> Result<(), SessionError>;

    async fn upload_file(&mut self, label: &str, file_url: &str) -> Result<(), SessionError>;

    /// Click next/submit on the current form step.
    async fn submit(&mut self) -> Result<(), SessionError>;

    /// Capture and upload a screenshot; returns its URL.
    async fn screenshot(&mut self) -> Result<Option<String>, SessionError>;

    /// Serialize enough page state to resume after an approval pause.
    async fn serialize_state(&mut self) -> Result<String, SessionError>;

    async fn restore_state(&mut self, blob: &str) -> Result<(), SessionError>;

    async fn close(&mut self) -> Result<(), SessionError>;
}

#[async_trait]
pub trait PageAnalyzer: Send + Sync {
    async fn analyze(&self, observation: &PageObservation) -> Result<PageAnalysis, SessionError>;

    /// Classify a custom question the profile data might answer.
    async fn classify_question(
        &self,
        question: &str,
        user_data: &UserData,
    ) -> Result<QuestionAnswer, SessionError>;
}
