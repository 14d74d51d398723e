//! Aggregate health probe backing `GET /health`.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;

use crate::broker::{TaskBroker, AUTOMATION_SERVICE};
use crate::external::DocumentStore;
use crate::notify::SmsGateway;
use crate::store::ApplicationStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OverallStatus {
    Ok,
    Degraded,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceHealth {
    Healthy,
    Unhealthy,
    NotConfigured,
}

#[derive(Debug, Serialize)]
pub struct HealthReport {
    pub status: OverallStatus,
    pub services: BTreeMap<&'static str, ServiceHealth>,
}

pub async fn check(
    store: &Arc<dyn ApplicationStore>,
    broker: &Arc<dyn TaskBroker>,
    documents: &Arc<dyn DocumentStore>,
    sms: &Arc<dyn SmsGateway>,
) -> HealthReport {
    let mut services = BTreeMap::new();

    let store_ok = store.ping().await.is_ok();
    services.insert(
        "store",
        if store_ok {
            ServiceHealth::Healthy
        } else {
            ServiceHealth::Unhealthy
        },
    );

    let broker_ok = broker.ping().await.is_ok();
    services.insert(
        "broker",
        if broker_ok {
            ServiceHealth::Healthy
        } else {
            ServiceHealth::Unhealthy
        },
    );

    let blob_ok = documents.ping().await.is_ok();
    services.insert(
        "blob",
        if blob_ok {
            ServiceHealth::Healthy
        } else {
            ServiceHealth::Unhealthy
        },
    );

    services.insert(
        "sms",
        if sms.is_configured() {
            ServiceHealth::Healthy
        } else {
            ServiceHealth::NotConfigured
        },
    );

    // Worker liveness: no fresh heartbeat within the TTL reads as unhealthy.
    let automation_ok = matches!(broker.last_heartbeat(AUTOMATION_SERVICE).await, Ok(Some(_)));
    services.insert(
        "automation",
        if automation_ok {
            ServiceHealth::Healthy
        } else {
            ServiceHealth::Unhealthy
        },
    );

    let status = if !store_ok {
        OverallStatus::Critical
    } else if !broker_ok || !blob_ok || !automation_ok {
        OverallStatus::Degraded
    } else {
        OverallStatus::Ok
    };

    HealthReport { status, services }
}
