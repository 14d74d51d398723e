//! Worker liveness: publish `heartbeat:automation` every 30 seconds with
//! the current status and in-flight task id. The dispatcher's maintenance
//! loop and the health endpoint read the keyed record.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use jobagent::broker::{TaskBroker, AUTOMATION_SERVICE};
use jobagent::payloads::WorkerHeartbeat;

#[derive(Default)]
pub struct WorkerState {
    status: Mutex<String>,
    in_flight: Mutex<Option<String>>,
}

impl WorkerState {
    pub fn new() -> Self {
        Self {
            status: Mutex::new("idle".to_string()),
            in_flight: Mutex::new(None),
        }
    }

    pub async fn set_status(&self, status: &str) {
        *self.status.lock().await = status.to_string();
    }

    pub async fn set_in_flight(&self, task_id: Option<String>) {
        *self.in_flight.lock().await = task_id;
    }

    pub async fn snapshot(&self) -> WorkerHeartbeat {
        WorkerHeartbeat {
            timestamp: Utc::now(),
            status: self.status.lock().await.clone(),
            in_flight_task_id: self.in_flight.lock().await.clone(),
        }
    }
}

pub async fn beat_once(broker: &dyn TaskBroker, state: &WorkerState) {
    let snapshot = state.snapshot().await;
    match serde_json::to_value(&snapshot) {
        Ok(value) => {
            if let Err(e) = broker.heartbeat(AUTOMATION_SERVICE, value).await {
                tracing::warn!(error = %e, "heartbeat publish failed");
            }
        }
        Err(e) => tracing::error!(error = %e, "heartbeat encode failed"),
    }
}

pub async fn run_heartbeat(
    broker: Arc<dyn TaskBroker>,
    state: Arc<WorkerState>,
    interval: Duration,
    cancel: CancellationToken,
) {
    loop {
        beat_once(broker.as_ref(), &state).await;

        tokio::select! {
            _ = cancel.cancelled() => {
                state.set_status("shutting_down").await;
                beat_once(broker.as_ref(), &state).await;
                break;
            }
            _ = tokio::time::sleep(interval) => {}
        }
    }
}
