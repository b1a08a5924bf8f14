//! Build trigger detection service.
//!
//! Wires the trigger store, VCS gateway, notifier, and manager together
//! and runs the configured number of detection workers until shutdown.

mod config;

use buildpulse_trigger::{
    BuildNotifier, BuildTriggerManager, DetectionOutcome, LogBuildNotifier, NatsBuildNotifier,
    NatsNotifierConfig, PgTriggerStore, ScheduledTriggerProcessor, VcsTriggerProcessor,
};
use buildpulse_vcs::{GitHttpGateway, VcsGateway};
use config::DetectorConfig;
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration from environment
    let config = DetectorConfig::from_env().expect("failed to load configuration");
    tracing::info!("Loaded configuration");

    // Create database connection pool
    let db_pool = PgPoolOptions::new()
        .max_connections(config.detection.workers as u32 + 1)
        .connect(&config.database_url)
        .await
        .expect("failed to connect to database");

    // Run migrations
    tracing::info!("Running database migrations...");
    sqlx::migrate!("./migrations")
        .run(&db_pool)
        .await
        .expect("failed to run migrations");

    let gateway: Arc<dyn VcsGateway> = Arc::new(
        GitHttpGateway::new(Duration::from_secs(config.vcs.request_timeout_seconds))
            .expect("failed to build vcs gateway"),
    );

    let notifier: Arc<dyn BuildNotifier> = match &config.nats {
        Some(nats) => {
            tracing::info!(url = nats.url, "Connecting build notifier to NATS");
            Arc::new(
                NatsBuildNotifier::new(NatsNotifierConfig::new(&nats.url))
                    .await
                    .expect("failed to connect to NATS"),
            )
        }
        None => {
            tracing::warn!("No NATS configured, build notifications will only be logged");
            Arc::new(LogBuildNotifier)
        }
    };

    let manager = Arc::new(BuildTriggerManager::new(
        PgTriggerStore::new(db_pool),
        Arc::new(VcsTriggerProcessor::new(gateway.clone(), notifier.clone())),
        Arc::new(ScheduledTriggerProcessor::new(gateway, notifier)),
        chrono::Duration::seconds(config.trigger.next_execution_delay_on_error_seconds as i64),
    ));

    let poll_interval = Duration::from_secs(config.detection.poll_interval_seconds);
    for worker in 0..config.detection.workers {
        let manager = manager.clone();
        tokio::spawn(async move {
            detection_loop(manager, poll_interval, worker).await;
        });
    }
    tracing::info!(
        workers = config.detection.workers,
        poll_interval_seconds = config.detection.poll_interval_seconds,
        "Detection workers started"
    );

    shutdown_signal().await;
    tracing::info!("Shutting down");
}

/// One detection worker: poll on the configured interval, and after
/// claiming a trigger poll again immediately in case more are due.
async fn detection_loop(manager: Arc<BuildTriggerManager>, poll_interval: Duration, worker: usize) {
    let mut interval = tokio::time::interval(poll_interval);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        interval.tick().await;

        loop {
            match manager.detect_and_process().await {
                Ok(DetectionOutcome::Idle) => break,
                Ok(DetectionOutcome::Processed { .. } | DetectionOutcome::Failed { .. }) => {
                    // Outcome details are logged by the manager.
                }
                Err(e) => {
                    tracing::error!(worker, error = %e, "Detection cycle failed");
                    break;
                }
            }
        }
    }
}

/// Resolves on SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install ctrl-c handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install sigterm handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}
