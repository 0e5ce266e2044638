//! CLI argument definitions

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// post-relay: relay new posts from social sources and feeds into Telegram
#[derive(Parser, Debug)]
#[command(name = "post-relay")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Poll sources and deliver new posts
    Run(RunArgs),

    /// Configuration management
    Config(ConfigArgs),

    /// Validate configuration and show status
    Doctor(DoctorArgs),

    /// Inspect or reset stored cursors
    State(StateArgs),
}

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Log what would be delivered; state is kept in memory only
    #[arg(long, conflicts_with = "outbox")]
    pub dry_run: bool,

    /// Process one poll cycle and exit
    #[arg(long)]
    pub once: bool,

    /// Append posts to a JSONL file instead of sending them to Telegram
    #[arg(long)]
    pub outbox: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommands,
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommands {
    /// Generate example configuration file
    Init {
        /// Path to write config file
        #[arg(long, default_value = "./config.toml")]
        path: PathBuf,

        /// Overwrite existing file
        #[arg(long)]
        force: bool,
    },
}

#[derive(Args, Debug)]
pub struct DoctorArgs {
    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct StateArgs {
    #[command(subcommand)]
    pub command: StateCommands,
}

#[derive(Subcommand, Debug)]
pub enum StateCommands {
    /// List stored cursors and the number of delivered posts
    Cursors {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Forget the cursor of one source (delivered posts stay deduplicated)
    Reset {
        /// Source identifier, e.g. `feed:https://example.com/rss`
        source_id: String,
    },
}
