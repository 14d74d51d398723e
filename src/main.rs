use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use jobagent::broker::{RedisBroker, TaskBroker};
use jobagent::config::Config;
use jobagent::dispatcher::{Dispatcher, DispatcherSettings};
use jobagent::external::{DocumentStore, HttpCollaborators, RoleScraper};
use jobagent::hitl::{HitlController, WebhookValidator};
use jobagent::notify::{HttpSmsGateway, SmsGateway};
use jobagent::security::CredentialCipher;
use jobagent::store::{ApplicationStore, PgStore};
use jobagent::{api, db, observability};

#[tokio::main]
async fn main() {
    let cfg = match Config::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("dispatcher startup failed: {e}");
            std::process::exit(1);
        }
    };

    observability::init_tracing(cfg.log_json);

    let parts = match build(&cfg).await {
        Ok(parts) => parts,
        Err(e) => {
            tracing::error!(error = %e, "dispatcher startup failed");
            std::process::exit(1);
        }
    };

    if let Err(e) = serve(cfg, parts).await {
        tracing::error!(error = %e, "dispatcher terminated abnormally");
        std::process::exit(2);
    }
}

struct Parts {
    dispatcher: Arc<Dispatcher>,
    api_state: api::ApiState,
    listener: tokio::net::TcpListener,
}

async fn build(cfg: &Config) -> anyhow::Result<Parts> {
    let cipher = CredentialCipher::from_base64(&cfg.encryption_key)?;

    let pool = db::make_pool(&cfg.database_url).await?;
    if cfg.migrate_on_startup {
        db::run_migrations(&pool).await?;
    }

    let store: Arc<dyn ApplicationStore> = Arc::new(PgStore::new(pool));
    let broker: Arc<dyn TaskBroker> = Arc::new(RedisBroker::connect(&cfg.redis_url).await?);
    let sms: Arc<dyn SmsGateway> = Arc::new(HttpSmsGateway::new(cfg.sms.clone()));

    let collaborators = Arc::new(HttpCollaborators::new(cfg.stagehand_url.clone()));
    let documents: Arc<dyn DocumentStore> = collaborators.clone();
    let scraper: Arc<dyn RoleScraper> = collaborators;

    let settings = DispatcherSettings {
        attempts_cap: cfg.attempts_cap,
        stale_after: Duration::from_secs(cfg.stale_after_secs as u64),
        consume_block: Duration::from_secs(cfg.consume_block_secs),
    };

    let dispatcher = Arc::new(Dispatcher::new(
        store, broker, sms, documents, scraper, cipher, settings,
    ));
    let hitl = Arc::new(HitlController::new(dispatcher.clone()));

    let webhook_validator = cfg
        .sms
        .auth_token
        .as_ref()
        .map(|token| WebhookValidator::new(token.clone()));
    if webhook_validator.is_none() {
        tracing::warn!("TWILIO_AUTH_TOKEN not set; sms webhooks will be dropped");
    }

    let api_state = api::ApiState::new(
        dispatcher.clone(),
        hitl,
        cfg.api_key.clone(),
        webhook_validator,
    );

    let listener = tokio::net::TcpListener::bind(&cfg.api_addr).await?;
    tracing::info!(addr = %cfg.api_addr, "dispatcher api listening");

    Ok(Parts {
        dispatcher,
        api_state,
        listener,
    })
}

async fn serve(_cfg: Config, parts: Parts) -> anyhow::Result<()> {
    let cancel = install_shutdown_handler();

    let app = api::router(parts.api_state);
    let api_cancel = cancel.clone();
    let api_task = tokio::spawn(async move {
        axum::serve(parts.listener, app)
            .with_graceful_shutdown(api_cancel.cancelled_owned())
            .await
    });

    let drain_task = tokio::spawn(parts.dispatcher.clone().run_drain(cancel.clone()));
    let maintenance_task = tokio::spawn(
        parts
            .dispatcher
            .clone()
            .run_maintenance(cancel.clone(), Duration::from_secs(60)),
    );

    cancel.cancelled().await;
    tracing::info!("shutdown requested; draining in-flight results");

    // Drain budget before giving up on in-flight work.
    let drain_all = async {
        let _ = drain_task.await;
        let _ = maintenance_task.await;
        let _ = api_task.await;
    };
    if tokio::time::timeout(Duration::from_secs(30), drain_all)
        .await
        .is_err()
    {
        tracing::warn!("drain budget exhausted; exiting anyway");
    }

    tracing::info!("dispatcher stopped");
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
                _ = ctrl_c => tracing::info!("received SIGINT, initiating graceful shutdown"),
                _ = sigterm.recv() => tracing::info!("received SIGTERM, initiating graceful shutdown"),
            }
        }
        #[cfg(not(unix))]
        {
            let _ = ctrl_c.await;
            tracing::info!("received ctrl-c, initiating graceful shutdown");
        }

        token_clone.cancel();
    });

    token
}
