use anyhow::Context;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use warden::adapters::{build_notifier, BinanceFeed};
use warden::config::{AppConfig, Credentials, LoggingConfig};
use warden::error::WardenError;
use warden::exchange::{BinanceClient, PaperExchange, TradingApi};
use warden::strategy::{MomentumScorer, NoForecast};
use warden::supervisor::{Collaborators, Supervisor};

/// Files, environment, CLI override, then validation
pub fn load_config(dir: &Path, force_dry_run: bool) -> anyhow::Result<AppConfig> {
    let mut config = AppConfig::load_from(dir)
        .with_context(|| format!("failed to load configuration from {}", dir.display()))?;
    if force_dry_run {
        config.dry_run.enabled = true;
    }
    config.validate().map_err(WardenError::InvalidConfig)?;
    Ok(config)
}

pub fn init_logging(cfg: &LoggingConfig) {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("{},warden=debug", cfg.level)));

    let log_dir = std::env::var("WARDEN_LOG_DIR").unwrap_or_else(|_| "logs".to_string());

    // `rolling::daily` panics if it cannot create its first file, so check writability first
    let file_layer = if std::fs::create_dir_all(&log_dir).is_ok() {
        let probe = Path::new(&log_dir).join(".warden_write_test");
        match std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&probe)
        {
            Ok(_) => {
                let _ = std::fs::remove_file(&probe);
                let appender = tracing_appender::rolling::daily(&log_dir, "warden.log");
                let (writer, guard) = tracing_appender::non_blocking(appender);
                // lives for the whole process
                Box::leak(Box::new(guard));
                Some(
                    tracing_subscriber::fmt::layer()
                        .with_writer(writer)
                        .with_ansi(false)
                        .with_target(true),
                )
            }
            Err(e) => {
                eprintln!(
                    "Warning: Could not write to log directory {} ({}), file logging disabled",
                    log_dir, e
                );
                None
            }
        }
    } else {
        eprintln!(
            "Warning: Could not create log directory {}, file logging disabled",
            log_dir
        );
        None
    };

    let json_console = cfg
        .json
        .then(|| tracing_subscriber::fmt::layer().json().with_target(true));
    let text_console = (!cfg.json).then(|| {
        tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false)
    });

    let file_logging_enabled = file_layer.is_some();
    tracing_subscriber::registry()
        .with(filter)
        .with(json_console)
        .with(text_console)
        .with(file_layer)
        .init();

    if file_logging_enabled {
        info!(log_dir = %log_dir, "file logging enabled");
    }
}

fn build_trading_api(config: &AppConfig) -> anyhow::Result<Arc<dyn TradingApi>> {
    let credentials = if config.dry_run.enabled {
        Credentials::from_env().ok()
    } else {
        Some(Credentials::from_env().context("live trading needs API credentials")?)
    };
    let binance: Arc<dyn TradingApi> = Arc::new(BinanceClient::new(&config.exchange, credentials)?);

    if config.dry_run.enabled {
        warn!(
            starting_quote = %config.dry_run.starting_quote,
            taker_fee = %config.dry_run.taker_fee,
            "DRY RUN: orders are simulated against live prices"
        );
        return Ok(Arc::new(PaperExchange::new(
            binance,
            config.exchange.quote_asset.clone(),
            config.dry_run.starting_quote,
            config.dry_run.taker_fee,
        )));
    }
    Ok(binance)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => error!("Failed to install SIGTERM handler: {}", e),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

pub async fn run(config: AppConfig) -> anyhow::Result<()> {
    let api = build_trading_api(&config)?;
    let parts = Collaborators {
        api,
        feed: Arc::new(BinanceFeed::new(
            config.exchange.ws_url.clone(),
            Duration::from_secs(config.exchange.connect_timeout_secs),
        )),
        scorer: Arc::new(MomentumScorer::from_config(&config.signal)),
        forecasts: Arc::new(NoForecast),
        notifier: build_notifier(
            config.notifications.webhook_url.as_deref(),
            Duration::from_secs(config.notifications.timeout_secs),
        ),
    };

    let shutdown = CancellationToken::new();
    let supervisor = Supervisor::build(config, parts, shutdown.clone())
        .await
        .context("startup failed")?;

    tokio::spawn(async move {
        shutdown_signal().await;
        info!("shutdown signal received");
        shutdown.cancel();
    });

    supervisor.run().await?;
    Ok(())
}
