mod cli;
mod commands;
mod output;

use anyhow::Result;
use clap::Parser;
use cli::{Cli, Command, ScheduleCommand};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Serve {
            bind,
            port,
            database_url,
            ephemeral,
            data_dir,
            rotate_token,
        } => {
            commands::serve(bind, port, database_url, ephemeral, data_dir, rotate_token).await
        }
        Command::Agent { id, poll_interval_secs, mock_network } => {
            commands::agent(cli.server, cli.token, id, poll_interval_secs, mock_network).await
        }
        Command::Export { plugin, format, config } => {
            commands::export(cli.server, cli.token, plugin, format, config).await
        }
        Command::Import { plugin, format, file, dry_run } => {
            commands::import(cli.server, cli.token, plugin, format, file, dry_run).await
        }
        Command::Status => commands::status(cli.server, cli.token).await,
        Command::Schedule { command } => match command {
            ScheduleCommand::List => commands::schedule_list(cli.server, cli.token).await,
            ScheduleCommand::Run { id } => {
                commands::schedule_run(cli.server, cli.token, id).await
            }
        },
    }
}
