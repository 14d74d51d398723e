//! Ports for the opaque external collaborators: posting scraper/extractor,
//! document renderer and role ranker. The HTTP adapters are thin clients on
//! sidecar services; the static adapters back the test suite.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

#[derive(Debug, thiserror::Error)]
pub enum ExternalError {
    #[error("{service} request failed: {message}")]
    Service { service: &'static str, message: String },
    #[error("no fixture for {0}")]
    NoFixture(String),
}

/// Structured details extracted from a job posting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoleDetails {
    pub title: String,
    pub company_name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub requirements: Option<String>,
    #[serde(default)]
    pub salary_range: Option<String>,
    #[serde(default)]
    pub skills: Vec<String>,
}

#[async_trait]
pub trait RoleScraper: Send + Sync {
    async fn scrape(&self, url: &str) -> Result<RoleDetails, ExternalError>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RankResult {
    pub score: f64,
    pub rationale: String,
}

#[async_trait]
pub trait RoleRanker: Send + Sync {
    async fn rank(&self, description: &str, profile_summary: &str)
        -> Result<RankResult, ExternalError>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentUrls {
    pub resume_url: String,
    pub cover_letter_url: String,
}

/// Renders tailored artifacts and uploads them to object storage; only the
/// resulting URLs come back.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn render(
        &self,
        application_id: i64,
        role_title: &str,
        company_name: &str,
    ) -> Result<DocumentUrls, ExternalError>;

    async fn ping(&self) -> Result<(), ExternalError>;
}

/// HTTP adapter shared by the three ports; each call is one JSON POST to the
/// sidecar.
pub struct HttpCollaborators {
    client: reqwest::Client,
    base_url: String,
}

impl HttpCollaborators {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }

    async fn post_json<B: Serialize, R: for<'de> Deserialize<'de>>(
        &self,
        service: &'static str,
        path: &str,
        body: &B,
    ) -> Result<R, ExternalError> {
        let url = format!("{}{}", self.base_url.trim_end_matches('/'), path);

        let response = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| ExternalError::Service {
                service,
                message: e.to_string(),
            })?;

        if !response.status().is_success() {
            return Err(ExternalError::Service {
                service,
                message: format!("status {}", response.status()),
            });
        }

        response.json().await.map_err(|e| ExternalError::Service {
            service,
            message: e.to_string(),
        })
    }
}

#[async_trait]
impl RoleScraper for HttpCollaborators {
    async fn scrape(&self, url: &str) -> Result<RoleDetails, ExternalError> {
        #[derive(Serialize)]
        struct Req<'a> {
            url: &'a str,
            only_main_content: bool,
        }

        self.post_json(
            "scraper",
            "/scrape",
            &Req {
                url,
                only_main_content: true,
            },
        )
        .await
    }
}

#[async_trait]
impl RoleRanker for HttpCollaborators {
    async fn rank(
        &self,
        description: &str,
        profile_summary: &str,
    ) -> Result<RankResult, ExternalError> {
        #[derive(Serialize)]
        struct Req<'a> {
            description: &'a str,
            profile_summary: &'a str,
        }

        self.post_json(
            "ranker",
            "/rank",
            &Req {
                description,
                profile_summary,
            },
        )
        .await
    }
}

#[async_trait]
impl DocumentStore for HttpCollaborators {
    async fn render(
        &self,
        application_id: i64,
        role_title: &str,
        company_name: &str,
    ) -> Result<DocumentUrls, ExternalError> {
        #[derive(Serialize)]
        struct Req<'a> {
            application_id: i64,
            role_title: &'a str,
            company_name: &'a str,
        }

        self.post_json(
            "documents",
            "/documents/render",
            &Req {
                application_id,
                role_title,
                company_name,
            },
        )
        .await
    }

    async fn ping(&self) -> Result<(), ExternalError> {
        let url = format!("{}/health", self.base_url.trim_end_matches('/'));
        self.client
            .get(&url)
            .send()
            .await
            .map_err(|e| ExternalError::Service {
                service: "documents",
                message: e.to_string(),
            })?
            .error_for_status()
            .map_err(|e| ExternalError::Service {
                service: "documents",
                message: e.to_string(),
            })?;
        Ok(())
    }
}

/// Fixture-backed scraper for tests.
#[derive(Default)]
pub struct StaticScraper {
    fixtures: Mutex<HashMap<String, RoleDetails>>,
}

impl StaticScraper {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_fixture(&self, url: impl Into<String>, details: RoleDetails) {
        self.fixtures.lock().await.insert(url.into(), details);
    }
}

#[async_trait]
impl RoleScraper for StaticScraper {
    async fn scrape(&self, url: &str) -> Result<RoleDetails, ExternalError> {
        self.fixtures
            .lock()
            .await
            .get(url)
            .cloned()
            .ok_or_else(|| ExternalError::NoFixture(url.to_string()))
    }
}

/// Deterministic renderer used by tests: URLs are derived from the
/// application id.
#[derive(Default)]
pub struct StaticDocumentStore;

#[async_trait]
impl DocumentStore for StaticDocumentStore {
    async fn render(
        &self,
        application_id: i64,
        _role_title: &str,
        _company_name: &str,
    ) -> Result<DocumentUrls, ExternalError> {
        Ok(DocumentUrls {
            resume_url: format!("https://blobs.local/resumes/{application_id}.pdf"),
            cover_letter_url: format!("https://blobs.local/cover-letters/{application_id}.pdf"),
        })
    }

    async fn ping(&self) -> Result<(), ExternalError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn static_scraper_returns_fixtures_or_errors() {
        let scraper = StaticScraper::new();
        scraper
            .add_fixture(
                "https://boards.example.com/jobs/1",
                RoleDetails {
                    title: "Engineer".into(),
                    company_name: "Acme".into(),
                    description: None,
                    location: None,
                    requirements: None,
                    salary_range: None,
                    skills: vec![],
                },
            )
            .await;

        let details = scraper
            .scrape("https://boards.example.com/jobs/1")
            .await
            .unwrap();
        assert_eq!(details.company_name, "Acme");

        assert!(matches!(
            scraper.scrape("https://boards.example.com/jobs/2").await,
            Err(ExternalError::NoFixture(_))
        ));
    }
}
