//! HoyoBot CLI - run the bot host
//!
//! The stock `hoyobot` binary registers no plugin entry points, so every
//! package it discovers fails with an unknown entry point. Plugins are Rust
//! types compiled into the host: build a custom binary that fills a
//! [`PluginRegistry`] and hands it to [`RuntimeBuilder::with_registry`].

mod cli;

use clap::Parser;
use cli::{Cli, Commands};
use hoyo_runtime::plugin::{discover, resolve_load_order};
use hoyo_runtime::{
    EXIT_STARTUP_FAILURE, PluginRegistry, QueueListener, RuntimeBuilder, RuntimeOptions,
    ShutdownHandle,
};
use std::path::Path;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

fn main() {
    let cli = Cli::parse();

    // Initialize logging: --verbose forces debug, otherwise RUST_LOG or info
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let code = match &cli.command {
        Some(Commands::Plugins) => match list_plugins(&cli.plugins) {
            Ok(()) => 0,
            Err(err) => {
                error!("{:#}", err);
                1
            }
        },
        Some(Commands::Run { tick_ms, max_inbound }) => run_host(&cli, *tick_ms, *max_inbound),
        None => {
            let defaults = RuntimeOptions::default();
            run_host(
                &cli,
                defaults.tick_interval.as_millis() as u64,
                defaults.max_inbound_per_tick,
            )
        }
    };
    std::process::exit(code);
}

fn run_host(cli: &Cli, tick_ms: u64, max_inbound: usize) -> i32 {
    let shutdown = ShutdownHandle::new();
    if let Err(err) = watch_ctrl_c(shutdown.clone()) {
        warn!("Ctrl-C handler not installed: {:#}", err);
    }

    // Plugins are compiled in; packages only carry descriptors and resources.
    let registry = PluginRegistry::new();

    let started = RuntimeBuilder::new(QueueListener::new())
        .with_config_path(&cli.config)
        .with_plugin_root(&cli.plugins)
        .with_registry(registry)
        .with_options(RuntimeOptions {
            tick_interval: Duration::from_millis(tick_ms.max(1)),
            max_inbound_per_tick: max_inbound,
        })
        .with_shutdown(shutdown)
        .start();

    match started {
        Ok(mut runtime) => runtime.run(),
        Err(report) => {
            error!("HoyoBot failed to start: {:?}", report);
            EXIT_STARTUP_FAILURE
        }
    }
}

/// Request shutdown on the first Ctrl-C.
fn watch_ctrl_c(shutdown: ShutdownHandle) -> anyhow::Result<()> {
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    std::thread::Builder::new()
        .name("hoyobot-signal".into())
        .spawn(move || {
            rt.block_on(async {
                match tokio::signal::ctrl_c().await {
                    Ok(()) => {
                        info!("Received Ctrl-C");
                        shutdown.request();
                    }
                    Err(err) => warn!("Failed to listen for Ctrl-C: {}", err),
                }
            });
        })?;
    Ok(())
}

fn list_plugins(dir: &Path) -> anyhow::Result<()> {
    let discovery = discover(dir)?;
    let descriptors: Vec<_> = discovery
        .packages
        .iter()
        .map(|package| package.descriptor().clone())
        .collect();
    let plan = resolve_load_order(&descriptors);

    println!("Load order ({} of {}):", plan.order.len(), descriptors.len());
    for (position, name) in plan.order.iter().enumerate() {
        if let Some(descriptor) = descriptors.iter().find(|d| &d.name == name) {
            println!(
                "  {:>2}. {} v{} ({})",
                position + 1,
                descriptor.name,
                descriptor.version,
                descriptor.entry_point
            );
        }
    }

    let failures: Vec<String> = discovery
        .failures
        .iter()
        .chain(plan.failures.iter())
        .map(ToString::to_string)
        .collect();
    if !failures.is_empty() {
        println!("Rejected:");
        for failure in failures {
            println!("  - {}", failure);
        }
    }
    Ok(())
}
