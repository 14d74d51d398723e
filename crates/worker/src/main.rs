use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use jobagent::broker::{QueueName, RedisBroker, TaskBroker};
use jobagent::payloads::TaskPayload;

use jobagent_worker::config::WorkerConfig;
use jobagent_worker::heartbeat::{self, WorkerState};
use jobagent_worker::outcome::publish_outcome;
use jobagent_worker::runner::{Outcome, RunLimits, TaskRunner, WorkerError};
use jobagent_worker::session::BrowserSession;
use jobagent_worker::stagehand::StagehandClient;

#[tokio::main]
async fn main() {
    let cfg = match WorkerConfig::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("worker startup failed: {e}");
            std::process::exit(1);
        }
    };

    jobagent::observability::init_tracing(cfg.log_json);

    let broker: Arc<dyn TaskBroker> = match RedisBroker::connect(&cfg.redis_url).await {
        Ok(broker) => Arc::new(broker),
        Err(e) => {
            tracing::error!(error = %e, "broker connection failed");
            std::process::exit(1);
        }
    };

    let stagehand = match StagehandClient::new(&cfg.stagehand_url, cfg.stagehand_timeout_ms) {
        Ok(client) => client,
        Err(e) => {
            tracing::error!(error = %e, "stagehand client init failed");
            std::process::exit(1);
        }
    };

    tracing::info!(
        worker_id = %cfg.worker_id,
        stagehand = %cfg.stagehand_url,
        "automation worker starting"
    );

    let cancel = install_shutdown_handler();
    let state = Arc::new(WorkerState::new());

    let heartbeat_task = tokio::spawn(heartbeat::run_heartbeat(
        broker.clone(),
        state.clone(),
        Duration::from_secs(cfg.heartbeat_interval_secs),
        cancel.clone(),
    ));

    if let Err(e) = work_loop(&cfg, broker.clone(), stagehand, state, cancel.clone()).await {
        tracing::error!(error = %e, "worker loop failed");
        let _ = heartbeat_task.await;
        std::process::exit(2);
    }

    let _ = heartbeat_task.await;
    tracing::info!("automation worker stopped");
}

async fn work_loop(
    cfg: &WorkerConfig,
    broker: Arc<dyn TaskBroker>,
    stagehand: StagehandClient,
    state: Arc<WorkerState>,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    let limits = RunLimits {
        max_steps: cfg.max_steps,
        max_field_attempts: cfg.max_field_attempts,
    };

    loop {
        if cancel.is_cancelled() {
            break;
        }

        // Keep the block short so a shutdown signal is observed promptly.
        let consumed = tokio::select! {
            _ = cancel.cancelled() => break,
            res = broker.consume(
                QueueName::JobApplication,
                Duration::from_secs(cfg.consume_block_secs),
            ) => res,
        };

        let task = match consumed {
            Ok(Some(task)) => task,
            Ok(None) => continue,
            Err(e) => {
                tracing::warn!(error = %e, "consume failed; backing off");
                tokio::time::sleep(Duration::from_secs(2)).await;
                continue;
            }
        };

        let payload = match TaskPayload::decode(&task) {
            Ok(TaskPayload::JobApplication(p)) => p,
            Ok(_) | Err(_) => {
                tracing::error!(task_id = %task.id, "malformed job_application task dropped");
                continue;
            }
        };

        state.set_status("working").await;
        state.set_in_flight(Some(task.id.clone())).await;
        heartbeat::beat_once(broker.as_ref(), &state).await;

        tracing::info!(
            task_id = %task.id,
            application_id = payload.application_id,
            retries = task.retries,
            "task started"
        );

        let mut session = match stagehand.open_session().await {
            Ok(session) => session,
            Err(e) => {
                let outcome = Outcome::Failure(WorkerError::Transient(e.to_string()));
                if let Err(e) =
                    publish_outcome(broker.as_ref(), &task, &payload, outcome, cfg.max_retries)
                        .await
                {
                    tracing::error!(error = %e, "outcome publish failed");
                }
                state.set_in_flight(None).await;
                state.set_status("idle").await;
                continue;
            }
        };

        let deadline = Duration::from_secs(cfg.task_deadline_secs);
        let outcome = {
            let runner = TaskRunner::new(&stagehand, limits);
            let work = runner.run(&payload, &mut session);
            tokio::pin!(work);

            tokio::select! {
                out = tokio::time::timeout(deadline, &mut work) => match out {
                    Ok(out) => out,
                    // Wall-clock ceiling: terminal, not retried.
                    Err(_) => Outcome::Failure(WorkerError::Deadline),
                },
                _ = cancel.cancelled() => {
                    // Finish the in-flight task within the shutdown grace.
                    match tokio::time::timeout(
                        Duration::from_secs(cfg.shutdown_grace_secs),
                        &mut work,
                    ).await {
                        Ok(out) => out,
                        Err(_) => Outcome::Failure(WorkerError::Transient(
                            "worker shutting down".to_string(),
                        )),
                    }
                }
            }
        };

        // The session never survives an outcome; an approval pause must not
        // retain the page.
        if let Err(e) = session.close().await {
            tracing::debug!(error = %e, "session close failed");
        }

        if let Err(e) =
            publish_outcome(broker.as_ref(), &task, &payload, outcome, cfg.max_retries).await
        {
            tracing::error!(task_id = %task.id, error = %e, "outcome publish failed");
        }

        state.set_in_flight(None).await;
        state.set_status("idle").await;
    }

    Ok(())
}

fn install_shutdown_handler() -> CancellationToken {
    let token = CancellationToken::new();
    let token_clone = token.clone();

    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();

        #[cfg(unix)]
        {
            let mut sigterm =
                tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                    .expect("failed to install SIGTERM handler");
            tokio::select! {
                _ = ctrl_c => tracing::info!("received SIGINT, shutting down"),
                _ = sigterm.recv() => tracing::info!("received SIGTERM, shutting down"),
            }
        }
        #[cfg(not(unix))]
        {
            let _ = ctrl_c.await;
            tracing::info!("received ctrl-c, shutting down");
        }

        token_clone.cancel();
    });

    token
}
