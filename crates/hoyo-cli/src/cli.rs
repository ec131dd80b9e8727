//! CLI command definitions using clap

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// HoyoBot - chat bot proxy host
#[derive(Parser)]
#[command(name = "hoyobot")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Host configuration file, created with defaults if missing
    #[arg(short = 'c', long, global = true, env = "HOYOBOT_CONFIG", default_value = "bot.yml")]
    pub config: PathBuf,

    /// Directory scanned for plugin packages
    #[arg(short = 'p', long, global = true, env = "HOYOBOT_PLUGINS", default_value = "plugins")]
    pub plugins: PathBuf,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Start the host and tick until interrupted (default)
    Run {
        /// Milliseconds per tick
        #[arg(long, default_value_t = 1)]
        tick_ms: u64,

        /// Inbound items published per tick at most
        #[arg(long, default_value_t = 256)]
        max_inbound: usize,
    },

    /// List plugin packages and the order they would load in
    Plugins,
}
