//! GP Sync - keep a host transport in step with Guitar Pro
//!
//! Runs the reconciliation loop against a simulated console host, or probes
//! the external application once for diagnostics.

use anyhow::{Context, Result};
use clap::Parser;
use colored::*;
use gp_sync::config::{AppConfig, ConfigWatcher};
use gp_sync::external::ExternalTransport;
use gp_sync::paths::AppPaths;
use gp_sync::probe::SystemProvider;
use gp_sync::sync::ReconciliationEngine;
use gp_sync::transport::ConsoleTransport;
use std::path::Path;
use std::time::{Duration, Instant};
use tokio::time::{Interval, MissedTickBehavior};
use tracing::{error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// GP Sync - mirror the Guitar Pro transport into a host
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file (default: detected app directory)
    #[arg(short, long)]
    config: Option<String>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(short, long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Write console logs as JSON lines
    #[arg(long)]
    json_logs: bool,

    /// Read one external snapshot, print it and exit
    #[arg(long)]
    probe_once: bool,

    /// Print the merged layout table and exit
    #[arg(long)]
    list_layouts: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let args = Args::parse();
    let paths = AppPaths::detect();
    let config_missing = paths.ensure_directories()?;

    let _log_guard = init_logging(&args.log_level, args.json_logs, &paths.logs_dir)?;

    info!("Starting GP Sync v{}...", env!("CARGO_PKG_VERSION"));
    info!("📁 {:?} mode, data in {}", paths.mode, paths.base_dir().display());
    if config_missing && args.config.is_none() {
        info!("No config at {}, defaults will be written", paths.config.display());
    }

    let config_path = match &args.config {
        Some(path) => path.clone(),
        None => {
            let path = paths.config.to_string_lossy().to_string();
            if config_missing {
                AppConfig::default().save(&path).await?;
                info!("📝 Wrote default configuration to {}", path);
            }
            path
        }
    };
    info!("Configuration file: {}", config_path);

    if args.list_layouts {
        let config = with_default_layouts(AppConfig::load(&config_path).await?, &paths);
        return list_layouts(&config).await;
    }

    if args.probe_once {
        let config = with_default_layouts(AppConfig::load(&config_path).await?, &paths);
        return probe_once(&config).await;
    }

    run(config_path, &paths).await
}

/// Reconciliation loop until Ctrl+C
async fn run(config_path: String, paths: &AppPaths) -> Result<()> {
    let (mut watcher, config) = ConfigWatcher::new(config_path).await?;
    let config = with_default_layouts(config, paths);

    let layouts = config.layout_table().await?;
    let mut external = ExternalTransport::new(SystemProvider::new(), config.external.process_name.clone(), layouts)
        .with_pinned_version(config.external.layout_version.clone());
    let mut engine = ReconciliationEngine::new(config.sync.clone(), config.host.clone());
    let mut host = ConsoleTransport::new("console");

    let mut interval = poll_interval(config.sync.poll_interval_ms);
    let mut last_tick = Instant::now();

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    info!(
        "🚀 Mirroring {} every {} ms (Ctrl+C to stop)",
        config.external.process_name, config.sync.poll_interval_ms
    );

    loop {
        tokio::select! {
            _ = interval.tick() => {
                let now = Instant::now();
                host.advance(now.duration_since(last_tick).as_secs_f64());
                last_tick = now;

                if let Err(e) = engine.tick(&mut external, &mut host) {
                    error!("Tick aborted: {}", e);
                }
            }

            Some(new_config) = watcher.next_config() => {
                let new_config = with_default_layouts(new_config, paths);
                match new_config.layout_table().await {
                    Ok(layouts) => {
                        external.reconfigure(
                            &new_config.external.process_name,
                            layouts,
                            new_config.external.layout_version.clone(),
                        );
                        if new_config.sync.poll_interval_ms != engine.settings().poll_interval_ms {
                            interval = poll_interval(new_config.sync.poll_interval_ms);
                        }
                        engine.apply_settings(new_config.sync, new_config.host);
                        info!("✅ New configuration applied");
                    }
                    Err(e) => warn!("Ignoring configuration update: {:#}", e),
                }
            }

            _ = &mut shutdown => break,
        }
    }

    let stats = engine.stats();
    info!(
        "🛑 Stopped after {} ticks ({} unavailable): {} loop updates, {} position corrections, {} rate changes, {} starts, {} stops",
        stats.ticks,
        stats.unavailable_ticks,
        stats.loop_updates,
        stats.position_corrections,
        stats.rate_changes,
        stats.starts,
        stats.stops
    );
    Ok(())
}

async fn probe_once(config: &AppConfig) -> Result<()> {
    let layouts = config.layout_table().await?;
    let mut external = ExternalTransport::new(SystemProvider::new(), config.external.process_name.clone(), layouts)
        .with_pinned_version(config.external.layout_version.clone());

    let readout = external
        .read()
        .with_context(|| format!("Failed to read {}", config.external.process_name))?;

    println!("\n{}", "=== External Transport ===".bold().cyan());
    println!("  Process: {} (pid {})", config.external.process_name.green(), readout.pid);
    println!(
        "  Version: {}",
        readout.process_version.as_deref().unwrap_or("unknown").yellow()
    );
    println!("  Layout:  {}", readout.layout_version.yellow());
    println!("\n{}", "Snapshot:".bold());
    println!("{}", serde_json::to_string_pretty(&readout.state)?);
    Ok(())
}

async fn list_layouts(config: &AppConfig) -> Result<()> {
    let table = config.layout_table().await?;

    println!("\n{}", "=== Memory Layouts ===".bold().cyan());
    for layout in table.iter() {
        let pinned = config.external.layout_version.as_deref() == Some(layout.version.as_str());
        println!(
            "  {} ({:?}){}",
            layout.version.green(),
            layout.pointer_width,
            if pinned { " [pinned]".yellow().to_string() } else { String::new() }
        );
    }

    println!("\n{}", "Table:".bold());
    print!("{}", serde_yaml::to_string(&table).context("Failed to serialize layout table")?);
    Ok(())
}

/// Pick up `layouts.yaml` beside the config when none is configured
fn with_default_layouts(mut config: AppConfig, paths: &AppPaths) -> AppConfig {
    if config.external.layouts_file.is_none() {
        config.external.layouts_file = paths
            .existing_layouts()
            .map(|path| path.to_string_lossy().to_string());
    }
    config
}

fn poll_interval(millis: u64) -> Interval {
    let mut interval = tokio::time::interval(Duration::from_millis(millis));
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    interval
}

fn init_logging(level: &str, json: bool, logs_dir: &Path) -> Result<WorkerGuard> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    let (file_writer, guard) = tracing_appender::non_blocking(tracing_appender::rolling::daily(logs_dir, "gp-sync.log"));
    let file_layer = tracing_subscriber::fmt::layer()
        .with_ansi(false)
        .with_target(false)
        .with_writer(file_writer);

    let registry = tracing_subscriber::registry().with(filter).with(file_layer);

    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_target(false))
            .init();
    } else {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_thread_names(false),
            )
            .init();
    }

    Ok(guard)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for Ctrl+C: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
