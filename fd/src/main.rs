//! FlowDaemon launcher
//!
//! Exit codes: 0 clean shutdown, 1 startup configuration error (config file
//! present but malformed), 2 port/socket binding failure for mandatory
//! services.

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use eyre::{Context, Result};
use tracing::{debug, info, warn};

use flowdaemon::bus::EngineBus;
use flowdaemon::cli::{Cli, Command, get_log_path};
use flowdaemon::config::{AppConfig, ConfigError};
use flowdaemon::events::RunStatus;
use flowdaemon::hotkey::{HotkeyBindings, HotkeyBridge};
use flowdaemon::ipc;
use flowdaemon::workflow::Workflow;

const EXIT_CONFIG_ERROR: i32 = 1;
const EXIT_BIND_ERROR: i32 = 2;

fn setup_logging(cli_log_level: Option<&str>) -> Result<()> {
    let log_path = get_log_path();
    if let Some(dir) = log_path.parent() {
        fs::create_dir_all(dir).context("Failed to create log directory")?;
    }

    let level = match cli_log_level.map(str::to_uppercase).as_deref() {
        Some("TRACE") => tracing::Level::TRACE,
        Some("DEBUG") => tracing::Level::DEBUG,
        Some("INFO") | None => tracing::Level::INFO,
        Some("WARN") | Some("WARNING") => tracing::Level::WARN,
        Some("ERROR") => tracing::Level::ERROR,
        Some(other) => {
            eprintln!("Warning: unknown log-level '{other}', defaulting to INFO");
            tracing::Level::INFO
        }
    };

    let log_file = fs::File::create(&log_path).context("Failed to create log file")?;
    tracing_subscriber::fmt()
        .with_writer(log_file)
        .with_ansi(false)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .init();

    info!("Logging initialized (level: {:?})", level);
    Ok(())
}

/// Load config; a malformed file is a startup error with exit code 1.
fn load_config(path: Option<&PathBuf>) -> AppConfig {
    match AppConfig::load(path.map(PathBuf::as_path)) {
        Ok(config) => config,
        Err(e @ ConfigError::Malformed { .. }) | Err(e @ ConfigError::Io { .. }) => {
            eprintln!("Configuration error: {e}");
            std::process::exit(EXIT_CONFIG_ERROR);
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.log_level.as_deref()).context("Failed to setup logging")?;
    let config = load_config(cli.config.as_ref());

    match cli.command {
        Some(Command::Run {
            workflow,
            headless,
            events,
        }) => cmd_run(config, &workflow, headless, events).await,
        Some(Command::Serve) | None => cmd_serve(config).await,
        Some(Command::Stop) => cmd_stop().await,
        Some(Command::Ping) => cmd_ping().await,
        Some(Command::Config) => {
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(())
        }
    }
}

/// Batch mode: run one workflow file to completion in-process.
async fn cmd_run(config: AppConfig, path: &PathBuf, headless: bool, events: bool) -> Result<()> {
    debug!(?path, headless, "cmd_run: called");
    let json = fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let workflow = Workflow::from_json(&json).context("Failed to parse workflow")?;
    let workflow_id = workflow.id.clone();

    let bus = Arc::new(EngineBus::new(config));

    // Optional event echo for scripting around batch runs.
    let printer = if events {
        let mut rx = bus.event_bus().subscribe();
        Some(tokio::spawn(async move {
            while let Ok(event) = rx.recv().await {
                if let Ok(json) = serde_json::to_string(&event) {
                    println!("{json}");
                }
            }
        }))
    } else {
        None
    };

    println!("Running workflow {workflow_id}");
    let (run_id, handle) = bus.start_run(workflow, headless, None).map_err(|e| eyre::eyre!("{e}"))?;
    debug!(%run_id, "cmd_run: started");

    // Ctrl+C requests a cooperative stop; the scheduler winds down.
    let stopper = {
        let bus = bus.clone();
        let workflow_id = workflow_id.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupt received, stopping run");
                bus.stop_run(&workflow_id).await;
            }
        })
    };

    let summary = handle.await.context("Run task failed")?;
    stopper.abort();
    if let Some(printer) = printer {
        // Give the printer a moment to drain, then stop it.
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        printer.abort();
    }

    match summary.status {
        RunStatus::Completed => {
            println!(
                "Completed: {} nodes executed, {} failed",
                summary.executed_count, summary.failed_count
            );
            Ok(())
        }
        RunStatus::Stopped => {
            println!("Stopped after {} nodes", summary.executed_count);
            Ok(())
        }
        RunStatus::Failed => {
            println!(
                "Failed after {} nodes: {}",
                summary.executed_count,
                summary.error.as_deref().unwrap_or("unknown error")
            );
            std::process::exit(1);
        }
    }
}

/// Daemon mode: control socket, telemetry streaming, hotkey bridge.
async fn cmd_serve(config: AppConfig) -> Result<()> {
    info!("Daemon starting...");
    let bus = Arc::new(EngineBus::new(config));

    // The control socket is mandatory; binding failure is exit code 2.
    let (listener, socket_path) = match ipc::create_listener() {
        Ok(bound) => bound,
        Err(e) => {
            eprintln!("Failed to bind control socket: {e}");
            std::process::exit(EXIT_BIND_ERROR);
        }
    };
    info!(?socket_path, "control socket listening");

    let (shutdown_tx, shutdown_rx) = tokio::sync::mpsc::channel::<()>(1);

    // Hotkey bridge: dedicated OS thread feeding the bus.
    let (hotkey_tx, mut hotkey_rx) = tokio::sync::mpsc::channel(16);
    let mut bridge = HotkeyBridge::start(HotkeyBindings::default(), hotkey_tx);
    let hotkey_bus = bus.clone();
    let hotkey_task = tokio::spawn(async move {
        while let Some(command) = hotkey_rx.recv().await {
            hotkey_bus.handle_hotkey(command).await;
        }
    });

    let serve_task = tokio::spawn(ipc::serve(listener, bus.clone(), shutdown_tx.clone(), shutdown_rx));

    println!("FlowDaemon running (socket: {})", socket_path.display());

    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut sigint = signal(SignalKind::interrupt())?;
        let mut sigterm = signal(SignalKind::terminate())?;
        tokio::select! {
            _ = sigint.recv() => {
                warn!("SIGINT received");
            }
            _ = sigterm.recv() => {
                warn!("SIGTERM received");
            }
            _ = shutdown_tx.closed() => {
                debug!("shutdown requested over control channel");
            }
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
    }

    info!("Daemon shutting down...");
    bus.shutdown().await;
    bridge.stop();
    hotkey_task.abort();
    serve_task.abort();
    ipc::cleanup_socket(&socket_path);
    debug!("shutdown complete");
    Ok(())
}

async fn cmd_stop() -> Result<()> {
    let client = ipc::DaemonClient::new();
    if !client.socket_exists() {
        println!("FlowDaemon is not running");
        return Ok(());
    }
    match client.shutdown().await {
        Ok(()) => println!("FlowDaemon asked to shut down"),
        Err(e) => println!("Failed to reach daemon: {e}"),
    }
    Ok(())
}

async fn cmd_ping() -> Result<()> {
    let client = ipc::DaemonClient::new();
    if !client.socket_exists() {
        println!("FlowDaemon is not running (no socket)");
        return Ok(());
    }
    match client.ping().await {
        Ok(version) => {
            println!("Daemon is alive and responsive");
            println!("Version: {version}");
        }
        Err(e) => {
            println!("Socket exists but the daemon is not responding");
            println!("Error: {e}");
        }
    }
    Ok(())
}
