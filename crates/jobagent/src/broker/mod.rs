//! Named FIFO task queues over a durable KV store.
//!
//! Queue names are a closed set; publishing to anything else is rejected at
//! the type level (and at parse time for wire strings). Delivery is
//! at-least-once: a consumer crash between `consume` and its side effect
//! loses the task unless the consumer re-publishes it.

use std::collections::BTreeMap;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

pub mod memory;
pub mod redis;

pub use memory::MemoryBroker;
pub use redis::RedisBroker;

/// Result records live for one hour; heartbeats go stale after two minutes.
pub const RESULT_TTL: Duration = Duration::from_secs(60 * 60);
pub const HEARTBEAT_TTL: Duration = Duration::from_secs(120);

/// Service name the automation worker heartbeats under.
pub const AUTOMATION_SERVICE: &str = "automation";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum QueueName {
    JobApplication,
    UpdateJobStatus,
    ApprovalRequest,
    SendNotification,
}

impl QueueName {
    pub const ALL: [QueueName; 4] = [
        QueueName::JobApplication,
        QueueName::UpdateJobStatus,
        QueueName::ApprovalRequest,
        QueueName::SendNotification,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            QueueName::JobApplication => "job_application",
            QueueName::UpdateJobStatus => "update_job_status",
            QueueName::ApprovalRequest => "approval_request",
            QueueName::SendNotification => "send_notification",
        }
    }

    pub fn key(&self) -> String {
        format!("tasks:{}", self.as_str())
    }
}

impl FromStr for QueueName {
    type Err = BrokerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "job_application" => Ok(QueueName::JobApplication),
            "update_job_status" => Ok(QueueName::UpdateJobStatus),
            "approval_request" => Ok(QueueName::ApprovalRequest),
            "send_notification" => Ok(QueueName::SendNotification),
            other => Err(BrokerError::UnknownQueue(other.to_string())),
        }
    }
}

impl std::fmt::Display for QueueName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One broker message. The wire format is stable JSON shared with every
/// consumer; unknown fields are ignored on decode.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueTask {
    pub id: String,
    #[serde(rename = "type")]
    pub task_type: String,
    pub payload: Value,
    #[serde(default)]
    pub retries: u32,
    #[serde(default)]
    pub created_at: String,
    #[serde(default)]
    pub priority: i64,
}

impl QueueTask {
    pub fn new(queue: QueueName, payload: Value, priority: i64) -> Self {
        Self {
            id: new_task_id(queue),
            task_type: queue.as_str().to_string(),
            payload,
            retries: 0,
            created_at: Utc::now().to_rfc3339(),
            priority,
        }
    }

    pub fn queue(&self) -> Result<QueueName, BrokerError> {
        self.task_type.parse()
    }
}

/// Opaque, globally unique task id: `<queue>_<unix_ts>_<8 hex chars>`.
pub fn new_task_id(queue: QueueName) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!(
        "{}_{}_{}",
        queue.as_str(),
        Utc::now().timestamp(),
        &suffix[..8]
    )
}

#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    #[error("unknown queue type: {0}")]
    UnknownQueue(String),
    #[error("broker serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("redis error: {0}")]
    Redis(#[from] ::redis::RedisError),
}

impl BrokerError {
    /// Transient infrastructure errors are retried by callers with backoff;
    /// the rest indicate caller bugs.
    pub fn is_transient(&self) -> bool {
        matches!(self, BrokerError::Redis(_))
    }
}

#[async_trait]
pub trait TaskBroker: Send + Sync {
    /// Append a new task to the tail of the queue. Returns its task id.
    async fn publish(
        &self,
        queue: QueueName,
        payload: Value,
        priority: i64,
    ) -> Result<String, BrokerError>;

    /// Re-publish an existing task envelope verbatim (retry path: the id and
    /// bumped retry counter survive).
    async fn publish_task(&self, task: &QueueTask) -> Result<(), BrokerError>;

    /// Destructive pop from the head, blocking up to `timeout`
    /// (zero = non-blocking).
    async fn consume(
        &self,
        queue: QueueName,
        timeout: Duration,
    ) -> Result<Option<QueueTask>, BrokerError>;

    /// Store a result record keyed by task id (60-minute TTL).
    async fn publish_result(&self, task_id: &str, payload: Value) -> Result<(), BrokerError>;

    async fn fetch_result(&self, task_id: &str) -> Result<Option<Value>, BrokerError>;

    /// Fire-and-forget pub/sub broadcast.
    async fn publish_channel(&self, channel: &str, payload: Value) -> Result<(), BrokerError>;

    /// Publish a heartbeat: broadcast on `heartbeat:<service>` and refresh
    /// the keyed liveness record (120-second TTL).
    async fn heartbeat(&self, service: &str, payload: Value) -> Result<(), BrokerError>;

    /// Latest heartbeat record for a service, if still fresh.
    async fn last_heartbeat(&self, service: &str) -> Result<Option<Value>, BrokerError>;

    async fn queue_len(&self, queue: QueueName) -> Result<u64, BrokerError>;

    /// Depth of every queue in one snapshot.
    async fn queue_stats(&self) -> Result<BTreeMap<QueueName, u64>, BrokerError>;

    async fn ping(&self) -> Result<(), BrokerError>;
}
