//! `avhub` – runs the avionics data-exchange hub.
//!
//! 1. Loads `avhub.toml` (or `AVHUB_CONFIG`); defaults apply when absent.
//! 2. Loads the point definitions and builds the registry and value store.
//! 3. Configures every `[[plugins]]` entry from the built-in catalog and
//!    starts them in order.
//! 4. Waits for Ctrl-C, then stops the plugins in reverse order.

mod config;
mod telemetry;

use std::process::ExitCode;
use std::sync::Arc;

use avhub_plugin::{LifecycleState, PluginCatalog, PluginManager, StopOutcome};
use avhub_points::PointRegistry;
use avhub_store::ValueStore;
use avhub_types::HubError;
use colored::Colorize;
use tokio::sync::Notify;
use tracing::{error, info, warn};

fn main() -> ExitCode {
    let _guard = telemetry::init_tracing("avhub");

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("{} failed to start runtime: {e}", "error:".red().bold());
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "hub terminated");
            eprintln!("{} {e}", "error:".red().bold());
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<(), HubError> {
    let path = config::config_path();
    let cfg = match config::load()? {
        Some(cfg) => {
            info!(path = %path.display(), plugins = cfg.plugins.len(), "config loaded");
            cfg
        }
        None => {
            warn!(path = %path.display(), "no config file; running with defaults");
            config::from_env()
        }
    };

    let registry = Arc::new(PointRegistry::load(&cfg.definitions)?);
    let store = Arc::new(ValueStore::new(Arc::clone(&registry)));

    let catalog = PluginCatalog::with_builtins();
    let mut manager = PluginManager::new(cfg.stop_timeout());
    for spec in &cfg.plugins {
        manager.configure(&catalog, &spec.kind, &spec.name, &spec.options, None)?;
    }

    let shutdown = Arc::new(Notify::new());
    let trigger = Arc::clone(&shutdown);
    if let Err(e) = ctrlc::set_handler(move || {
        println!();
        println!("{}", "Ctrl-C received, stopping plugins …".yellow().bold());
        trigger.notify_one();
    }) {
        warn!(error = %e, "failed to install Ctrl-C handler; stop the process with a signal instead");
    }

    if let Err(e) = manager.start_all(&store) {
        manager.stop_all().await;
        return Err(e);
    }
    print_status(&manager, registry.len());

    shutdown.notified().await;

    for (name, outcome) in manager.stop_all().await {
        let label = match outcome {
            StopOutcome::Cooperative => "stopped".green(),
            StopOutcome::Aborted => "aborted".red(),
            StopOutcome::Detached => "detached (blocked)".red().bold(),
            StopOutcome::NotStarted => "not started".dimmed(),
            StopOutcome::AlreadyStopped => "already stopped".yellow(),
        };
        println!("  {name:<width$} {label}", width = avhub_plugin::NAME_COLUMN_WIDTH);
    }
    println!("{}", "avhub stopped.".bold());
    Ok(())
}

fn print_status(manager: &PluginManager, points: usize) {
    println!(
        "{} {} points, {} plugins",
        "avhub running:".bold().cyan(),
        points,
        manager.len()
    );
    for (name, kind, state) in manager.states() {
        let state = match state {
            LifecycleState::Running => state.to_string().green(),
            LifecycleState::Created => state.to_string().dimmed(),
            LifecycleState::Stopped => state.to_string().red(),
        };
        println!("  {name:<width$} {kind:<14} {state}", width = avhub_plugin::NAME_COLUMN_WIDTH);
    }
}
