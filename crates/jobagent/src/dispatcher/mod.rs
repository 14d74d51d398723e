//! The orchestration core: owns all writes to the application store and
//! drives the state machine from queue results.
//!
//! Three logical loops run concurrently per process: trigger intake (HTTP /
//! SMS entry points call into it), result drain, and maintenance. Within
//! one application, results are serialized by a keyed mutex; across
//! applications nothing is ordered.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::broker::{BrokerError, TaskBroker};
use crate::external::{DocumentStore, ExternalError, RoleScraper};
use crate::notify::SmsGateway;
use crate::payloads::PayloadError;
use crate::security::{CredentialCipher, CryptoError};
use crate::store::{ApplicationStore, StoreError};

mod drain;
mod intake;
mod maintenance;
pub mod messages;
mod report;

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("automation is paused; send 'start' to resume")]
    Paused,
    #[error("application {0} is not awaiting approval")]
    NotAwaitingApproval(i64),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Broker(#[from] BrokerError),
    #[error(transparent)]
    Crypto(#[from] CryptoError),
    #[error(transparent)]
    Payload(#[from] PayloadError),
    #[error(transparent)]
    External(#[from] ExternalError),
    #[error("payload encode failed: {0}")]
    Encode(#[from] serde_json::Error),
}

#[derive(Debug, Clone)]
pub struct TriggerOutcome {
    pub application_id: i64,
    pub task_id: Option<String>,
    pub reused: bool,
}

#[derive(Clone, Debug)]
pub struct DispatcherSettings {
    /// Dispatcher-level publish budget per application.
    pub attempts_cap: i32,
    /// SUBMITTING age after which the maintenance loop intervenes.
    pub stale_after: Duration,
    /// Blocking window for queue consumption (kept short so shutdown
    /// signals are observed promptly).
    pub consume_block: Duration,
}

impl Default for DispatcherSettings {
    fn default() -> Self {
        Self {
            attempts_cap: 3,
            stale_after: Duration::from_secs(600),
            consume_block: Duration::from_secs(5),
        }
    }
}

pub struct Dispatcher {
    pub(crate) store: Arc<dyn ApplicationStore>,
    pub(crate) broker: Arc<dyn TaskBroker>,
    pub(crate) sms: Arc<dyn SmsGateway>,
    pub(crate) documents: Arc<dyn DocumentStore>,
    pub(crate) scraper: Arc<dyn RoleScraper>,
    pub(crate) cipher: CredentialCipher,
    pub(crate) settings: DispatcherSettings,
    // Entries are pruned on release; the table never outgrows the set of
    // applications with a result currently being handled.
    app_locks: std::sync::Mutex<HashMap<i64, Arc<Mutex<()>>>>,
}

/// Holds one application's mutex. Dropping it releases the mutex and evicts
/// the table entry unless another task is still queued on it.
pub(crate) struct AppLockGuard<'a> {
    dispatcher: &'a Dispatcher,
    id: i64,
    lock: Arc<Mutex<()>>,
    guard: Option<tokio::sync::OwnedMutexGuard<()>>,
}

impl Drop for AppLockGuard<'_> {
    fn drop(&mut self) {
        // Release the mutex before touching the table.
        self.guard.take();

        let mut locks = self
            .dispatcher
            .app_locks
            .lock()
            .expect("application lock table poisoned");
        if let Some(entry) = locks.get(&self.id) {
            // Two known holders remain: the table and this guard. Anything
            // above that is a task waiting on the same application, and the
            // entry must survive for it.
            if Arc::ptr_eq(entry, &self.lock) && Arc::strong_count(entry) == 2 {
                locks.remove(&self.id);
            }
        }
    }
}

impl Dispatcher {
    pub fn new(
        store: Arc<dyn ApplicationStore>,
        broker: Arc<dyn TaskBroker>,
        sms: Arc<dyn SmsGateway>,
        documents: Arc<dyn DocumentStore>,
        scraper: Arc<dyn RoleScraper>,
        cipher: CredentialCipher,
        settings: DispatcherSettings,
    ) -> Self {
        Self {
            store,
            broker,
            sms,
            documents,
            scraper,
            cipher,
            settings,
            app_locks: std::sync::Mutex::new(HashMap::new()),
        }
    }

    pub fn store(&self) -> &Arc<dyn ApplicationStore> {
        &self.store
    }

    pub fn broker(&self) -> &Arc<dyn TaskBroker> {
        &self.broker
    }

    pub fn sms(&self) -> &Arc<dyn SmsGateway> {
        &self.sms
    }

    pub fn documents(&self) -> &Arc<dyn DocumentStore> {
        &self.documents
    }

    /// Per-application mutex: results for one application are handled one at
    /// a time even when both drain loops hold a message for it.
    pub(crate) async fn lock_application(&self, id: i64) -> AppLockGuard<'_> {
        let lock = {
            let mut locks = self
                .app_locks
                .lock()
                .expect("application lock table poisoned");
            locks.entry(id).or_insert_with(|| Arc::new(Mutex::new(()))).clone()
        };
        let guard = lock.clone().lock_owned().await;

        AppLockGuard {
            dispatcher: self,
            id,
            lock,
            guard: Some(guard),
        }
    }

    /// Drive the result-drain loops until cancelled.
    pub async fn run_drain(self: Arc<Self>, cancel: CancellationToken) {
        let status = {
            let this = self.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                while !cancel.is_cancelled() {
                    if let Err(e) = this.drain_status_once().await {
                        if e.is_transient() {
                            tracing::warn!(error = %e, "status drain hiccup; backing off");
                            tokio::time::sleep(Duration::from_secs(1)).await;
                        } else {
                            tracing::error!(error = %e, "status drain failed");
                        }
                    }
                }
            })
        };

        let approvals = {
            let this = self.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                while !cancel.is_cancelled() {
                    if let Err(e) = this.drain_approval_once().await {
                        if e.is_transient() {
                            tracing::warn!(error = %e, "approval drain hiccup; backing off");
                            tokio::time::sleep(Duration::from_secs(1)).await;
                        } else {
                            tracing::error!(error = %e, "approval drain failed");
                        }
                    }
                }
            })
        };

        let notifications = {
            let this = self.clone();
            tokio::spawn(async move {
                while !cancel.is_cancelled() {
                    if let Err(e) = this.drain_notifications_once().await {
                        tracing::warn!(error = %e, "notification drain failed");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            })
        };

        let _ = tokio::join!(status, approvals, notifications);
    }

    /// Drive the maintenance scan until cancelled.
    pub async fn run_maintenance(self: Arc<Self>, cancel: CancellationToken, interval: Duration) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(interval) => {}
            }

            match self.maintenance_once().await {
                Ok(reaped) if reaped > 0 => {
                    tracing::info!(reaped, "maintenance recovered stuck applications");
                }
                Ok(_) => {}
                Err(e) => tracing::error!(error = %e, "maintenance scan failed"),
            }
        }
    }
}

impl DispatchError {
    pub fn is_transient(&self) -> bool {
        match self {
            DispatchError::Store(e) => e.is_transient(),
            DispatchError::Broker(e) => e.is_transient(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::MemoryBroker;
    use crate::external::{StaticDocumentStore, StaticScraper};
    use crate::notify::MemorySmsGateway;
    use crate::store::MemoryStore;

    fn dispatcher() -> Dispatcher {
        Dispatcher::new(
            Arc::new(MemoryStore::new()),
            Arc::new(MemoryBroker::new()),
            Arc::new(MemorySmsGateway::new("+15550009999")),
            Arc::new(StaticDocumentStore),
            Arc::new(StaticScraper::new()),
            CredentialCipher::from_bytes([1u8; 32]),
            DispatcherSettings::default(),
        )
    }

    #[tokio::test]
    async fn application_locks_are_pruned_after_release() {
        let d = dispatcher();

        {
            let _a = d.lock_application(1).await;
            let _b = d.lock_application(2).await;
            assert_eq!(d.app_locks.lock().unwrap().len(), 2);
        }

        assert!(d.app_locks.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn contended_locks_survive_until_the_last_release() {
        let d = Arc::new(dispatcher());

        let first = d.lock_application(7).await;

        let waiter = {
            let d = d.clone();
            tokio::spawn(async move {
                let _guard = d.lock_application(7).await;
            })
        };

        // Let the waiter queue up on the same entry.
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(d.app_locks.lock().unwrap().len(), 1);

        drop(first);
        waiter.await.unwrap();

        assert!(d.app_locks.lock().unwrap().is_empty());
    }
}
