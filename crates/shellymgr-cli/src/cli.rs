use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(
    name = "shellymgr",
    about = "Fleet control plane for Shelly-class smart relays",
    version
)]
pub struct Cli {
    /// Control plane base URL for client commands.
    #[arg(long, env = "SHELLYMGR_URL", global = true, default_value = "http://127.0.0.1:8080")]
    pub server: String,

    /// Admin key for client commands.
    #[arg(long, env = "SHELLYMGR_TOKEN", global = true)]
    pub token: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the control plane server.
    Serve {
        #[arg(long, default_value = "0.0.0.0")]
        bind: String,

        #[arg(long, default_value_t = 8080)]
        port: u16,

        /// PostgreSQL connection string; omit for the in-memory store.
        #[arg(long, env = "SHELLYMGR_DATABASE_URL")]
        database_url: Option<String>,

        /// Force the in-memory (ephemeral) store.
        #[arg(long)]
        ephemeral: bool,

        /// Base directory for archives, backups, and GitOps trees.
        #[arg(long, default_value = "./data")]
        data_dir: PathBuf,

        /// Generate a fresh admin key even if one exists.
        #[arg(long)]
        rotate_token: bool,
    },

    /// Run a provisioning agent against the control plane.
    Agent {
        /// Agent id; defaults to the hostname.
        #[arg(long)]
        id: Option<String>,

        #[arg(long, default_value_t = 30)]
        poll_interval_secs: u64,

        /// Use the mock network manager instead of nmcli.
        #[arg(long)]
        mock_network: bool,
    },

    /// Trigger an export on the server.
    Export {
        #[arg(long, default_value = "archive")]
        plugin: String,

        #[arg(long, default_value = "sma")]
        format: String,

        /// Plugin config as inline JSON.
        #[arg(long)]
        config: Option<String>,
    },

    /// Import a file through a sync plugin on the server.
    Import {
        #[arg(long, default_value = "archive")]
        plugin: String,

        #[arg(long, default_value = "sma")]
        format: String,

        /// Path of the archive or tree to import (as seen by the server).
        file: PathBuf,

        /// Compute changes without applying them.
        #[arg(long)]
        dry_run: bool,
    },

    /// Show fleet and subsystem health.
    Status,

    /// Manage export schedules.
    Schedule {
        #[command(subcommand)]
        command: ScheduleCommand,
    },
}

#[derive(Debug, Subcommand)]
pub enum ScheduleCommand {
    /// List schedules.
    List,
    /// Trigger a schedule now.
    Run { id: i64 },
}
