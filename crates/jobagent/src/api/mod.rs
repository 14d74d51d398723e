//! Dispatcher HTTP surface.

use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Form, Json, Router};
use serde::{Deserialize, Serialize};

use crate::dispatcher::{DispatchError, Dispatcher};
use crate::health::{self, OverallStatus};
use crate::hitl::{original_webhook_url, HitlController, WebhookValidator};
use crate::store::{ApplicationListItem, ApplicationStatus};

pub mod rate;

pub use rate::RateGuard;

const PROFILE_INGEST_PER_MINUTE: u32 = 5;

#[derive(Clone)]
pub struct ApiState {
    pub dispatcher: Arc<Dispatcher>,
    pub hitl: Arc<HitlController>,
    pub api_key: String,
    pub webhook_validator: Option<WebhookValidator>,
    pub ingest_rate: Arc<RateGuard>,
}

impl ApiState {
    pub fn new(
        dispatcher: Arc<Dispatcher>,
        hitl: Arc<HitlController>,
        api_key: String,
        webhook_validator: Option<WebhookValidator>,
    ) -> Self {
        Self {
            dispatcher,
            hitl,
            api_key,
            webhook_validator,
            ingest_rate: Arc::new(RateGuard::new(PROFILE_INGEST_PER_MINUTE)),
        }
    }
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/ingest/profile", post(ingest_profile))
        .route("/jobs/apply/:role_id", post(apply_for_role))
        .route("/applications", get(list_applications))
        .route("/health", get(health_check))
        .route("/webhooks/sms", post(sms_webhook))
        .with_state(state)
}

fn check_api_key(state: &ApiState, headers: &HeaderMap) -> Result<(), (StatusCode, String)> {
    let presented = headers
        .get("x-api-key")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();

    if presented != state.api_key {
        return Err((StatusCode::FORBIDDEN, "Invalid API Key".to_string()));
    }
    Ok(())
}

fn dispatch_err(e: DispatchError) -> (StatusCode, String) {
    match &e {
        DispatchError::NotFound(what) => (StatusCode::NOT_FOUND, format!("{what} not found")),
        DispatchError::Paused => (StatusCode::CONFLICT, e.to_string()),
        DispatchError::NotAwaitingApproval(_) => (StatusCode::CONFLICT, e.to_string()),
        _ => {
            tracing::error!(error = %e, "request failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal error".to_string(),
            )
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ProfileIngestRequest {
    pub headline: String,
    pub summary: String,
    #[serde(default)]
    pub preferences: BTreeMap<String, String>,
}

#[derive(Debug, Serialize)]
pub struct ProfileIngestResponse {
    pub status: &'static str,
    pub profile_id: i64,
}

pub async fn ingest_profile(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Json(body): Json<ProfileIngestRequest>,
) -> Result<Json<ProfileIngestResponse>, (StatusCode, String)> {
    check_api_key(&state, &headers)?;

    let caller = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .unwrap_or("local")
        .trim()
        .to_string();

    if !state.ingest_rate.check(&caller) {
        return Err((
            StatusCode::TOO_MANY_REQUESTS,
            "rate limit exceeded: 5/minute".to_string(),
        ));
    }

    let store = state.dispatcher.store();
    let profile_id = store
        .upsert_profile(&body.headline, &body.summary)
        .await
        .map_err(|e| dispatch_err(e.into()))?;

    for (key, value) in &body.preferences {
        store
            .set_preference(profile_id, key, value)
            .await
            .map_err(|e| dispatch_err(e.into()))?;
    }

    tracing::info!(profile_id, "profile ingested");
    Ok(Json(ProfileIngestResponse {
        status: "success",
        profile_id,
    }))
}

#[derive(Debug, Serialize)]
pub struct ApplyResponse {
    pub status: &'static str,
    pub task_id: Option<String>,
    pub application_id: i64,
}

pub async fn apply_for_role(
    State(state): State<ApiState>,
    Path(role_id): Path<i64>,
    headers: HeaderMap,
) -> Result<Json<ApplyResponse>, (StatusCode, String)> {
    check_api_key(&state, &headers)?;

    let outcome = state
        .dispatcher
        .trigger_application(role_id)
        .await
        .map_err(dispatch_err)?;

    Ok(Json(ApplyResponse {
        status: if outcome.reused { "in_flight" } else { "queued" },
        task_id: outcome.task_id,
        application_id: outcome.application_id,
    }))
}

#[derive(Debug, Deserialize)]
pub struct ApplicationsQuery {
    pub status: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ApplicationsResponse {
    pub applications: Vec<ApplicationListItem>,
}

pub async fn list_applications(
    State(state): State<ApiState>,
    Query(query): Query<ApplicationsQuery>,
) -> Result<Json<ApplicationsResponse>, (StatusCode, String)> {
    let filter = match query.status.as_deref() {
        Some(raw) => Some(ApplicationStatus::from_str(raw).map_err(|_| {
            (
                StatusCode::BAD_REQUEST,
                format!("invalid status filter: {raw}"),
            )
        })?),
        None => None,
    };

    let applications = state
        .dispatcher
        .store()
        .list_applications(filter)
        .await
        .map_err(|e| dispatch_err(e.into()))?;

    Ok(Json(ApplicationsResponse { applications }))
}

pub async fn health_check(State(state): State<ApiState>) -> Response {
    let report = health::check(
        state.dispatcher.store(),
        state.dispatcher.broker(),
        state.dispatcher.documents(),
        state.dispatcher.sms(),
    )
    .await;

    let code = match report.status {
        OverallStatus::Ok => StatusCode::OK,
        OverallStatus::Degraded => StatusCode::PARTIAL_CONTENT,
        OverallStatus::Critical => StatusCode::SERVICE_UNAVAILABLE,
    };

    (code, Json(report)).into_response()
}

pub async fn sms_webhook(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Form(form): Form<BTreeMap<String, String>>,
) -> Response {
    let Some(validator) = &state.webhook_validator else {
        // Without a configured auth token the webhook cannot be verified;
        // answer 204 so the gateway stops retrying, but process nothing.
        tracing::error!("webhook validator not configured; dropping inbound sms");
        return StatusCode::NO_CONTENT.into_response();
    };

    let url = original_webhook_url(
        headers.get("x-forwarded-proto").and_then(|v| v.to_str().ok()),
        headers.get("x-forwarded-host").and_then(|v| v.to_str().ok()),
        headers.get("host").and_then(|v| v.to_str().ok()),
        "/webhooks/sms",
    );

    let signature = headers
        .get("x-twilio-signature-256")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();

    if !validator.validate(&url, &form, signature) {
        tracing::warn!(url = %url, "invalid webhook signature");
        return (StatusCode::FORBIDDEN, "invalid signature").into_response();
    }

    let from = form.get("From").cloned().unwrap_or_default();
    let body = form.get("Body").cloned().unwrap_or_default();

    if let Err(e) = state.hitl.handle_inbound(&from, &body).await {
        tracing::error!(error = %e, "sms webhook processing failed");
        return (StatusCode::INTERNAL_SERVER_ERROR, "webhook processing failed")
            .into_response();
    }

    StatusCode::NO_CONTENT.into_response()
}
