// src/main.rs

//! # Dropwatch Main Entry Point
//!
//! Loads configuration, initializes logging, and launches either the uploader
//! (directory watchers plus the upload/key HTTP service) or the webhook relay.

use anyhow::Result;
use std::sync::Arc;
use tokio::sync::watch;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use dropwatch::chat::SlackClient;
use dropwatch::config::{AppConfig, Mode};
use dropwatch::credentials::CredentialStore;
use dropwatch::dispatcher::Dispatcher;
use dropwatch::relay::Relay;
use dropwatch::systemd::SystemdUnit;
use dropwatch::watcher::DirectoryWatcher;
use dropwatch::{sinks, web};

/// The main entry point for the Dropwatch application.
///
/// This function performs the following steps:
/// 1. Loads and validates the configuration from CLI, file, and environment.
/// 2. Prints a systemd unit and exits, if asked to.
/// 3. Initializes the tracing subscriber for logging.
/// 4. Spawns the tasks for the selected mode.
/// 5. Waits for a Ctrl-C signal to initiate graceful shutdown of all tasks.
#[tokio::main]
async fn main() -> Result<()> {
    let (app_config, cli_args) = match AppConfig::load() {
        Ok(loaded) => loaded,
        Err(e) => {
            eprintln!("Error loading configuration: {}", e);
            std::process::exit(1);
        }
    };
    if let Err(e) = app_config.validate() {
        eprintln!("Configuration error: {}", e);
        std::process::exit(1);
    }

    if cli_args.systemd_unit {
        print!("{}", SystemdUnit::for_current_process(&cli_args)?.render());
        return Ok(());
    }

    // Initialize tracing subscriber for logging with environment filter and max level.
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&app_config.log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_max_level(tracing::Level::TRACE)
        .with_writer(std::io::stderr) // Log to stderr
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .expect("Setting default tracing subscriber failed");

    tracing::info!("Dropwatch starting in {:?} mode", app_config.mode);
    let app_config = Arc::new(app_config);

    // Shutdown signal channel for graceful shutdown of all tasks.
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let tasks = match app_config.mode {
        Mode::Uploader => start_uploader(&app_config, &shutdown_rx)?,
        Mode::Relay => start_relay(&app_config, &shutdown_rx)?,
    };

    // Wait for Ctrl-C signal to initiate shutdown.
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            tracing::info!("Ctrl-C received, initiating shutdown...");
        }
        Err(err) => {
            tracing::error!("Failed to listen for Ctrl-C signal: {}", err);
        }
    }

    // Signal all tasks to shutdown.
    if shutdown_tx.send(true).is_err() {
        tracing::error!("Failed to send shutdown signal");
    }

    // Wait for all tasks to complete.
    for task in tasks {
        if let Err(e) = task.await {
            tracing::error!("A task panicked or exited with error: {}", e);
        }
    }

    tracing::info!("Dropwatch shut down gracefully.");
    Ok(())
}

/// Spawns one watcher per directory plus the upload/key HTTP service.
fn start_uploader(
    app_config: &Arc<AppConfig>,
    shutdown_rx: &watch::Receiver<bool>,
) -> Result<Vec<tokio::task::JoinHandle<()>>> {
    app_config.ensure_directories()?;

    let slack = Arc::new(SlackClient::new(
        app_config.slack_api_url.clone(),
        app_config.slack_token.clone().unwrap_or_default(),
        app_config.slack_channel.clone().unwrap_or_default(),
        app_config.slack_team_id.clone(),
        app_config.http_timeout,
    )?);
    let dispatcher = Arc::new(Dispatcher::new(
        slack.clone(),
        app_config.processed_dir.clone(),
        app_config.discard_dir.clone(),
    ));
    let credentials = Arc::new(CredentialStore::new(
        app_config.credentials_dir.clone(),
        slack,
    ));

    let mut tasks = Vec::new();
    for dir in &app_config.watch_dirs {
        let watcher = DirectoryWatcher::new(dir.clone(), Arc::clone(&dispatcher))
            .with_rescan_interval(app_config.rescan_interval);
        let watcher_shutdown_rx = shutdown_rx.clone();
        tasks.push(tokio::spawn(async move {
            if let Err(e) = watcher.run(watcher_shutdown_rx).await {
                tracing::error!("Watcher exited with error: {}", e);
            }
        }));
    }

    let router = web::upload_router(web::UploadState {
        credentials,
        uploads_dir: app_config.uploads_dir.clone(),
    });
    let web_addr = app_config.web_addr.clone();
    let web_shutdown_rx = shutdown_rx.clone();
    tasks.push(tokio::spawn(async move {
        if let Err(e) = web::start_server(&web_addr, router, web_shutdown_rx).await {
            tracing::error!("Web server exited with error: {}", e);
        }
    }));
    Ok(tasks)
}

/// Spawns the webhook relay HTTP service.
fn start_relay(
    app_config: &Arc<AppConfig>,
    shutdown_rx: &watch::Receiver<bool>,
) -> Result<Vec<tokio::task::JoinHandle<()>>> {
    let sinks = sinks::from_config(app_config)?;
    tracing::info!(
        "Relaying to sinks: {:?}",
        sinks.iter().map(|s| s.name()).collect::<Vec<_>>()
    );
    let relay = Arc::new(Relay::new(
        app_config.webhook_secret.clone().unwrap_or_default(),
        app_config.topic_filter.clone(),
        app_config.message_suffix.clone(),
        sinks,
    ));

    let router = web::relay_router(web::RelayState { relay });
    let web_addr = app_config.web_addr.clone();
    let web_shutdown_rx = shutdown_rx.clone();
    Ok(vec![tokio::spawn(async move {
        if let Err(e) = web::start_server(&web_addr, router, web_shutdown_rx).await {
            tracing::error!("Web server exited with error: {}", e);
        }
    })])
}
