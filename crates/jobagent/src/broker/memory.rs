//! In-process broker adapter with the same ordering and TTL semantics as
//! the Redis one. Used by the test suite and local development.

use std::collections::{BTreeMap, HashMap};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{Mutex, Notify};

use super::{BrokerError, QueueName, QueueTask, TaskBroker, HEARTBEAT_TTL, RESULT_TTL};

#[derive(Default)]
struct Inner {
    seq: u64,
    // Keyed by (-priority, seq): BTreeMap iteration order is pop order.
    queues: HashMap<QueueName, BTreeMap<(i64, u64), QueueTask>>,
    results: HashMap<String, (Value, Instant)>,
    heartbeats: HashMap<String, (Value, Instant)>,
    channels: Vec<(String, Value)>,
}

#[derive(Default)]
pub struct MemoryBroker {
    inner: Mutex<Inner>,
    notify: Notify,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything broadcast via `publish_channel` (and heartbeats), in order.
    pub async fn channel_log(&self) -> Vec<(String, Value)> {
        self.inner.lock().await.channels.clone()
    }

    /// Test hook: age a heartbeat record so it reads as stale.
    pub async fn age_heartbeat(&self, service: &str, age: Duration) {
        let mut inner = self.inner.lock().await;
        match Instant::now().checked_sub(age) {
            Some(past) => {
                if let Some((_, at)) = inner.heartbeats.get_mut(service) {
                    *at = past;
                }
            }
            // Process younger than the requested age: expiry and eviction
            // are indistinguishable to readers.
            None => {
                inner.heartbeats.remove(service);
            }
        }
    }

    async fn pop(&self, queue: QueueName) -> Option<QueueTask> {
        let mut inner = self.inner.lock().await;
        let entries = inner.queues.get_mut(&queue)?;
        let key = *entries.keys().next()?;
        entries.remove(&key)
    }
}

#[async_trait]
impl TaskBroker for MemoryBroker {
    async fn publish(
        &self,
        queue: QueueName,
        payload: Value,
        priority: i64,
    ) -> Result<String, BrokerError> {
        let task = QueueTask::new(queue, payload, priority);
        let id = task.id.clone();
        self.publish_task(&task).await?;
        Ok(id)
    }

    async fn publish_task(&self, task: &QueueTask) -> Result<(), BrokerError> {
        let queue = task.queue()?;

        let mut inner = self.inner.lock().await;
        inner.seq += 1;
        let key = (-task.priority, inner.seq);
        inner.queues.entry(queue).or_default().insert(key, task.clone());
        drop(inner);

        self.notify.notify_waiters();
        Ok(())
    }

    async fn consume(
        &self,
        queue: QueueName,
        timeout: Duration,
    ) -> Result<Option<QueueTask>, BrokerError> {
        let deadline = Instant::now() + timeout;

        loop {
            if let Some(task) = self.pop(queue).await {
                return Ok(Some(task));
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }

            let _ = tokio::time::timeout(deadline - now, self.notify.notified()).await;
        }
    }

    async fn publish_result(&self, task_id: &str, payload: Value) -> Result<(), BrokerError> {
        let mut inner = self.inner.lock().await;
        inner
            .results
            .insert(task_id.to_string(), (payload, Instant::now()));
        Ok(())
    }

    async fn fetch_result(&self, task_id: &str) -> Result<Option<Value>, BrokerError> {
        let inner = self.inner.lock().await;
        Ok(inner
            .results
            .get(task_id)
            .filter(|(_, at)| at.elapsed() < RESULT_TTL)
            .map(|(v, _)| v.clone()))
    }

    async fn publish_channel(&self, channel: &str, payload: Value) -> Result<(), BrokerError> {
        let mut inner = self.inner.lock().await;
        inner.channels.push((channel.to_string(), payload));
        Ok(())
    }

    async fn heartbeat(&self, service: &str, payload: Value) -> Result<(), BrokerError> {
        let mut inner = self.inner.lock().await;
        inner.channels.push((
            format!("heartbeat:{service}"),
            payload.clone(),
        ));
        inner
            .heartbeats
            .insert(service.to_string(), (payload, Instant::now()));
        Ok(())
    }

    async fn last_heartbeat(&self, service: &str) -> Result<Option<Value>, BrokerError> {
        let inner = self.inner.lock().await;
        Ok(inner
            .heartbeats
            .get(service)
            .filter(|(_, at)| at.elapsed() < HEARTBEAT_TTL)
            .map(|(v, _)| v.clone()))
    }

    async fn queue_len(&self, queue: QueueName) -> Result<u64, BrokerError> {
        let inner = self.inner.lock().await;
        Ok(inner.queues.get(&queue).map(|q| q.len() as u64).unwrap_or(0))
    }

    async fn queue_stats(&self) -> Result<BTreeMap<QueueName, u64>, BrokerError> {
        let inner = self.inner.lock().await;
        Ok(QueueName::ALL
            .into_iter()
            .map(|queue| {
                let len = inner.queues.get(&queue).map(|q| q.len() as u64).unwrap_or(0);
                (queue, len)
            })
            .collect())
    }

    async fn ping(&self) -> Result<(), BrokerError> {
        Ok(())
    }
}
