//! Redis-backed broker adapter.
//!
//! Queues are sorted sets scored by `-priority * STRIDE + seq`, so ZPOPMIN
//! yields strict FIFO within a priority class and higher priority first
//! across classes. Result and heartbeat records are plain TTL'd keys, so
//! liveness is queryable without subscribing.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde_json::Value;

use super::{BrokerError, QueueName, QueueTask, TaskBroker, HEARTBEAT_TTL, RESULT_TTL};

/// Spread between priority classes. Sequence numbers stay far below this,
/// so priority always dominates the score.
const PRIORITY_STRIDE: i64 = 1_000_000_000_000;

#[derive(Clone)]
pub struct RedisBroker {
    conn: ConnectionManager,
}

impl RedisBroker {
    pub async fn connect(redis_url: &str) -> Result<Self, BrokerError> {
        let client = redis::Client::open(redis_url)?;
        let conn = ConnectionManager::new(client).await?;
        Ok(Self { conn })
    }

    fn result_key(task_id: &str) -> String {
        format!("task_results:{task_id}")
    }

    fn heartbeat_key(service: &str) -> String {
        format!("heartbeat:{service}")
    }

    async fn push(&self, queue: QueueName, task: &QueueTask) -> Result<(), BrokerError> {
        let mut conn = self.conn.clone();

        let seq: i64 = conn.incr(format!("{}:seq", queue.key()), 1).await?;
        let score = -(task.priority * PRIORITY_STRIDE) + seq;

        let member = serde_json::to_string(task)?;
        let _: i64 = conn.zadd(queue.key(), member, score).await?;
        Ok(())
    }
}

#[async_trait]
impl TaskBroker for RedisBroker {
    async fn publish(
        &self,
        queue: QueueName,
        payload: Value,
        priority: i64,
    ) -> Result<String, BrokerError> {
        let task = QueueTask::new(queue, payload, priority);
        self.push(queue, &task).await?;

        tracing::debug!(task_id = %task.id, queue = %queue, "published task");
        Ok(task.id)
    }

    async fn publish_task(&self, task: &QueueTask) -> Result<(), BrokerError> {
        let queue = task.queue()?;
        self.push(queue, task).await
    }

    async fn consume(
        &self,
        queue: QueueName,
        timeout: Duration,
    ) -> Result<Option<QueueTask>, BrokerError> {
        let mut conn = self.conn.clone();

        let popped: Option<(String, String, f64)> = if timeout.is_zero() {
            let entries: Vec<(String, f64)> = conn.zpopmin(queue.key(), 1).await?;
            entries
                .into_iter()
                .next()
                .map(|(member, score)| (queue.key(), member, score))
        } else {
            conn.bzpopmin(queue.key(), timeout.as_secs_f64()).await?
        };

        let Some((_, member, _)) = popped else {
            return Ok(None);
        };

        let task: QueueTask = serde_json::from_str(&member)?;
        tracing::debug!(task_id = %task.id, queue = %queue, "consumed task");
        Ok(Some(task))
    }

    async fn publish_result(&self, task_id: &str, payload: Value) -> Result<(), BrokerError> {
        let mut conn = self.conn.clone();
        let body = serde_json::to_string(&payload)?;
        let _: () = conn
            .set_ex(Self::result_key(task_id), body, RESULT_TTL.as_secs())
            .await?;
        Ok(())
    }

    async fn fetch_result(&self, task_id: &str) -> Result<Option<Value>, BrokerError> {
        let mut conn = self.conn.clone();
        let body: Option<String> = conn.get(Self::result_key(task_id)).await?;
        match body {
            Some(body) => Ok(Some(serde_json::from_str(&body)?)),
            None => Ok(None),
        }
    }

    async fn publish_channel(&self, channel: &str, payload: Value) -> Result<(), BrokerError> {
        let mut conn = self.conn.clone();
        let body = serde_json::to_string(&payload)?;
        let _: i64 = conn.publish(channel, body).await?;
        Ok(())
    }

    async fn heartbeat(&self, service: &str, payload: Value) -> Result<(), BrokerError> {
        let channel = Self::heartbeat_key(service);
        self.publish_channel(&channel, payload.clone()).await?;

        let mut conn = self.conn.clone();
        let body = serde_json::to_string(&payload)?;
        let _: () = conn
            .set_ex(channel, body, HEARTBEAT_TTL.as_secs())
            .await?;
        Ok(())
    }

    async fn last_heartbeat(&self, service: &str) -> Result<Option<Value>, BrokerError> {
        let mut conn = self.conn.clone();
        let body: Option<String> = conn.get(Self::heartbeat_key(service)).await?;
        match body {
            Some(body) => Ok(Some(serde_json::from_str(&body)?)),
            None => Ok(None),
        }
    }

    async fn queue_len(&self, queue: QueueName) -> Result<u64, BrokerError> {
        let mut conn = self.conn.clone();
        let len: u64 = conn.zcard(queue.key()).await?;
        Ok(len)
    }

    async fn queue_stats(&self) -> Result<BTreeMap<QueueName, u64>, BrokerError> {
        let mut conn = self.conn.clone();

        // One pipelined round trip so the snapshot is taken at a single
        // point in time.
        let mut pipe = redis::pipe();
        for queue in QueueName::ALL {
            pipe.zcard(queue.key());
        }
        let counts: Vec<u64> = pipe.query_async(&mut conn).await?;

        Ok(QueueName::ALL.into_iter().zip(counts).collect())
    }

    async fn ping(&self) -> Result<(), BrokerError> {
        let mut conn = self.conn.clone();
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }
}
