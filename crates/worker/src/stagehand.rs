//! HTTP adapters onto the browser-automation sidecar. Each session maps to
//! one sidecar browser context; commands are JSON POSTs with the configured
//! timeout.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use jobagent::payloads::UserData;

use crate::session::{
    BrowserSession, PageAnalysis, PageAnalyzer, PageObservation, QuestionAnswer, SessionError,
};

#[derive(Clone)]
pub struct StagehandClient {
    client: reqwest::Client,
    base_url: String,
}

impl StagehandClient {
    pub fn new(base_url: impl Into<String>, timeout_ms: u64) -> Result<Self, SessionError> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_millis(timeout_ms))
            .build()
            .map_err(|e| SessionError::Fatal(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.into(),
        })
    }

    /// Open a fresh browser context on the sidecar.
    pub async fn open_session(&self) -> Result<StagehandSession, SessionError> {
        #[derive(Deserialize)]
        struct Opened {
            session_id: String,
        }

        let opened: Opened = self.post("/sessions", &serde_json::json!({})).await?;
        Ok(StagehandSession {
            client: self.clone(),
            session_id: opened.session_id,
        })
    }

    async fn post<B: Serialize, R: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<R, SessionError> {
        let url = format!("{}{}", self.base_url.trim_end_matches('/'), path);

        let response = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(classify_reqwest)?;

        let status = response.status();
        if status.is_server_error() {
            return Err(SessionError::Transient(format!("sidecar returned {status}")));
        }
        if !status.is_success() {
            return Err(SessionError::Fatal(format!("sidecar returned {status}")));
        }

        response.json().await.map_err(classify_reqwest)
    }
}

fn classify_reqwest(e: reqwest::Error) -> SessionError {
    if e.is_timeout() {
        SessionError::Timeout
    } else if e.is_connect() || e.is_request() {
        SessionError::Transient(e.to_string())
    } else {
        SessionError::Fatal(e.to_string())
    }
}

pub struct StagehandSession {
    client: StagehandClient,
    session_id: String,
}

impl StagehandSession {
    fn path(&self, suffix: &str) -> String {
        format!("/sessions/{}/{suffix}", self.session_id)
    }
}

#[derive(Deserialize)]
struct Ack {
    #[allow(dead_code)]
    #[serde(default)]
    ok: bool,
}

#[async_trait]
impl BrowserSession for StagehandSession {
    async fn goto(&mut self, url: &str) -> Result<(), SessionError> {
        let _: Ack = self
            .client
            .post(&self.path("navigate"), &serde_json::json!({ "url": url }))
            .await?;
        Ok(())
    }

    async fn observe(&mut self) -> Result<PageObservation, SessionError> {
        self.client
            .post(&self.path("observe"), &serde_json::json!({}))
            .await
    }

    async fn click_apply(&mut self) -> Result<(), SessionError> {
        let _: Ack = self
            .client
            .post(
                &self.path("act"),
                &serde_json::json!({ "action": "click_apply" }),
            )
            .await?;
        Ok(())
    }

    async fn login(
        &mut self,
        username: &str,
        password: &SecretString,
    ) -> Result<(), SessionError> {
        // The cleartext leaves process memory only here, inside the login
        // command body.
        let _: Ack = self
            .client
            .post(
                &self.path("login"),
                &serde_json::json!({
                    "username": username,
                    "password": password.expose_secret(),
                }),
            )
            .await?;
        Ok(())
    }

    async fn fill_field(&mut self, label: &str, value: &str) -> Result<(), SessionError> {
        let _: Ack = self
            .client
            .post(
                &self.path("fill"),
                &serde_json::json!({ "label": label, "value": value }),
            )
            .await?;
        Ok(())
    }

    async fn upload_file(&mut self, label: &str, file_url: &str) -> Result<(), SessionError> {
        let _: Ack = self
            .client
            .post(
                &self.path("upload"),
                &serde_json::json!({ "label": label, "file_url": file_url }),
            )
            .await?;
        Ok(())
    }

    async fn submit(&mut self) -> Result<(), SessionError> {
        let _: Ack = self
            .client
            .post(&self.path("act"), &serde_json::json!({ "action": "submit" }))
            .await?;
        Ok(())
    }

    async fn screenshot(&mut self) -> Result<Option<String>, SessionError> {
        #[derive(Deserialize)]
        struct Shot {
            #[serde(default)]
            url: Option<String>,
        }

        let shot: Shot = self
            .client
            .post(&self.path("screenshot"), &serde_json::json!({}))
            .await?;
        Ok(shot.url)
    }

    async fn serialize_state(&mut self) -> Result<String, SessionError> {
        #[derive(Deserialize)]
        struct State {
            blob: String,
        }

        let state: State = self
            .client
            .post(&self.path("state/export"), &serde_json::json!({}))
            .await?;
        Ok(state.blob)
    }

    async fn restore_state(&mut self, blob: &str) -> Result<(), SessionError> {
        let _: Ack = self
            .client
            .post(
                &self.path("state/restore"),
                &serde_json::json!({ "blob": blob }),
            )
            .await?;
        Ok(())
    }

    async fn close(&mut self) -> Result<(), SessionError> {
        let _: Ack = self
            .client
            .post(&self.path("close"), &serde_json::json!({}))
            .await?;
        Ok(())
    }
}

/// The analyzer endpoints are stateless; one client serves every session.
#[async_trait]
impl PageAnalyzer for StagehandClient {
    async fn analyze(&self, observation: &PageObservation) -> Result<PageAnalysis, SessionError> {
        self.post("/analyze", observation).await
    }

    async fn classify_question(
        &self,
        question: &str,
        user_data: &UserData,
    ) -> Result<QuestionAnswer, SessionError> {
        self.post(
            "/classify-question",
            &serde_json::json!({
                "question": question,
                "user_data": user_data,
            }),
        )
        .await
    }
}
