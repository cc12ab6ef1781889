use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use safety_alert_bot::actions::SERVICE_NAME;
use safety_alert_bot::dispatcher::AlertDispatcher;
use safety_alert_bot::driver_names::{DriverDirectory, DriverNameCache, PlaceholderDirectory};
use safety_alert_bot::motive_client::MotiveClient;
use safety_alert_bot::telegram_client::TelegramClient;
use safety_alert_bot::web::{self, AppState};
use safety_alert_bot::{AppConfig, metrics, telemetry};

#[tracing::instrument(skip_all)]
pub async fn handle_serve(interface: &str, port: u16, enable_metrics: bool) -> Result<()> {
    let config = AppConfig::from_env()?;
    let _sentry_guard = telemetry::init_sentry(&config);
    info!(?config, "Configuration loaded");

    let http = reqwest::Client::builder()
        .user_agent(concat!("safety-alert-bot/", env!("CARGO_PKG_VERSION")))
        .connect_timeout(Duration::from_secs(5))
        .build()
        .context("Failed to build HTTP client")?;

    let directory: Arc<dyn DriverDirectory> = match &config.motive_api_key {
        Some(api_key) => Arc::new(MotiveClient::new(
            http.clone(),
            config.motive_api_base_url.clone(),
            api_key.clone(),
        )),
        None => {
            warn!("MOTIVE_API_KEY not set, drivers will be labelled by id");
            Arc::new(PlaceholderDirectory)
        }
    };
    let driver_names = DriverNameCache::new(directory);

    let sender = Arc::new(TelegramClient::new(
        http,
        config.telegram_api_base_url.clone(),
        config.telegram_bot_token.clone(),
    ));

    let dispatcher = AlertDispatcher::start(
        config.dispatcher,
        config.telegram_chat_id.clone(),
        driver_names,
        sender,
    );

    let mut state = AppState::new(config.webhook_secret.clone(), dispatcher.clone());
    if enable_metrics {
        state = state.with_metrics(metrics::init_metrics()?);
        tokio::spawn(metrics::process_metrics_task());
    }

    info!("Starting {}", SERVICE_NAME);
    web::start_web_server(interface, port, state, shutdown_signal()).await?;

    // Server has stopped accepting requests; let queued alerts go out
    dispatcher.close();
    if !dispatcher.drain(config.shutdown_drain).await {
        warn!(
            queued = dispatcher.queue_depth(),
            "Shutting down with undelivered alerts"
        );
    }
    dispatcher.abort();

    info!("Graceful shutdown complete");
    Ok(())
}

/// Resolves on Ctrl+C, or SIGTERM on Unix
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!("Unable to listen for Ctrl+C: {}", err);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                warn!("Unable to listen for SIGTERM: {}", err);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Received shutdown signal, initiating graceful shutdown...");
}
