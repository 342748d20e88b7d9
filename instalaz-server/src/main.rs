//! instalaz-server - Dashboard server and slot scheduler
//!
//! Serves the onboarding and management endpoints and, in the same process,
//! runs the scheduler that publishes at the configured daily slots.

use anyhow::Context;
use clap::Parser;
use instalaz_server::build_router;
use instalaz_server::state::AppState;
use libinstalaz::logging::{LogFormat, LoggingConfig};
use libinstalaz::service::InstalazService;
use libinstalaz::Config;
use std::future::Future;
use std::path::PathBuf;
use tokio::sync::watch;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "instalaz-server")]
#[command(version)]
#[command(about = "Dashboard server and scheduler for automated Instagram posting")]
#[command(long_about = "\
instalaz-server - Dashboard server and scheduler for automated Instagram posting

DESCRIPTION:
    instalaz-server runs the Instalaz dashboard API and the daily slot
    scheduler in one process.

    Accounts are connected through Facebook login (/onboarding), their
    content is read from static file hosts, and a carousel or reel is
    published at each enabled slot (morning, afternoon, evening, night).

USAGE:
    # Run with the default configuration
    instalaz-server

    # Listen on all interfaces, port 8080
    instalaz-server --host 0.0.0.0 --port 8080

    # Serve the dashboard only; no scheduled publishing
    instalaz-server --no-scheduler

SIGNALS:
    SIGTERM, SIGINT - Graceful shutdown (in-flight requests complete)

CONFIGURATION:
    Configuration file: ~/.config/instalaz/config.toml (or $INSTALAZ_CONFIG)
    Database location: ~/.local/share/instalaz/instalaz.db

    [server]
    host = \"127.0.0.1\"
    port = 5000
    public_url = \"http://localhost:5000\"

    [schedule]
    settings_file = \"schedule_settings.json\"
    tick = \"30s\"

ENVIRONMENT:
    FACEBOOK_APP_ID, FACEBOOK_APP_SECRET   Facebook App credentials
    INSTALAZ_SECRET_KEY                    Signs OAuth state values
    TELEGRAM_BOT_TOKEN, TELEGRAM_CHAT_ID   Publish notifications
    INSTALAZ_LOG_FORMAT, INSTALAZ_LOG_LEVEL

EXIT CODES:
    0 - Clean shutdown
    1 - Runtime or configuration error
")]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Address to bind (overrides config)
    #[arg(long)]
    host: Option<String>,

    /// Port to bind (overrides config)
    #[arg(short, long)]
    port: Option<u16>,

    /// Serve the dashboard without running the scheduler
    #[arg(long)]
    no_scheduler: bool,

    /// Log output format: text, json or pretty
    #[arg(long, value_name = "FORMAT")]
    log_format: Option<LogFormat>,

    /// Enable verbose logging to stderr
    #[arg(short, long)]
    verbose: bool,

    /// Evaluate the schedule once, print the report and exit (for testing)
    #[arg(long, hide = true)]
    once: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    LoggingConfig::from_env(cli.log_format, cli.verbose).init();

    let mut config = match &cli.config {
        Some(path) => Config::load_from_path(path)
            .with_context(|| format!("Failed to load {}", path.display()))?,
        None => Config::load_or_default()?,
    };
    if let Some(host) = cli.host {
        config.server.host = host;
    }
    if let Some(port) = cli.port {
        config.server.port = port;
    }
    let addr = format!("{}:{}", config.server.host, config.server.port);

    let service = InstalazService::from_config(config).await?;
    let state = AppState::new(service)?;

    if cli.once {
        let report = state.scheduler.tick().await?;
        for check in state.scheduler.check_tokens().await? {
            info!(?check, "Token checked");
        }
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    info!("instalaz-server starting");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let signal = shutdown_signal()?;
    tokio::spawn(async move {
        signal.await;
        let _ = shutdown_tx.send(true);
    });

    let scheduler_task = if cli.no_scheduler {
        info!("Scheduler disabled");
        None
    } else {
        let scheduler = state.scheduler.clone();
        let rx = shutdown_rx.clone();
        Some(tokio::spawn(async move { scheduler.run(rx).await }))
    };

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("Listening on http://{}", addr);

    let mut rx = shutdown_rx;
    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(async move {
            let _ = rx.wait_for(|stop| *stop).await;
        })
        .await?;

    if let Some(task) = scheduler_task {
        task.await?;
    }

    info!("instalaz-server stopped");
    Ok(())
}

/// Resolves on the first SIGINT or SIGTERM
#[cfg(unix)]
fn shutdown_signal() -> anyhow::Result<impl Future<Output = ()>> {
    use futures::StreamExt;
    use signal_hook::consts::{SIGINT, SIGTERM};
    use signal_hook_tokio::Signals;

    let mut signals = Signals::new([SIGINT, SIGTERM]).context("Signal setup failed")?;
    Ok(async move {
        if let Some(signal) = signals.next().await {
            info!(signal, "Received shutdown signal, stopping gracefully...");
        }
    })
}

#[cfg(not(unix))]
fn shutdown_signal() -> anyhow::Result<impl Future<Output = ()>> {
    Ok(async {
        let _ = tokio::signal::ctrl_c().await;
        info!("Received shutdown signal, stopping gracefully...");
    })
}
