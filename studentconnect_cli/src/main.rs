mod cli;
mod render;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use studentconnect_client::config::{API_URL_ENV, DATA_DIR_ENV};
use studentconnect_client::{telemetry, ClientConfig, ClientPaths};

#[derive(Parser)]
#[command(author, version, about = "StudentConnect terminal client")]
struct Args {
    /// Backend base URL
    #[arg(long, env = API_URL_ENV)]
    api_url: Option<String>,
    /// Directory holding the persisted session
    #[arg(long, env = DATA_DIR_ENV)]
    data_dir: Option<PathBuf>,
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Start the interactive shell (default)
    Shell,
    /// Run a single shell command and exit, e.g. `exec feed type=jobs`
    Exec {
        #[arg(trailing_var_arg = true, allow_hyphen_values = true, required = true)]
        command: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    telemetry::init_tracing();

    let args = Args::parse();

    let mut config = ClientConfig::from_env().context("invalid client configuration")?;
    if let Some(api_url) = args.api_url {
        config = config
            .with_api_url(api_url)
            .context("invalid --api-url")?;
    }
    if let Some(dir) = args.data_dir {
        config = config.with_paths(ClientPaths::from_base_dir(dir));
    }
    tracing::debug!(
        api_url = %config.api_url,
        storage = %config.paths.local_storage.display(),
        "client configured"
    );

    let session = studentconnect_client::connect(&config)?;
    session.restore().await;

    match args.command.unwrap_or(Command::Shell) {
        Command::Shell => cli::run_shell(session).await,
        Command::Exec { command } => cli::run_once(session, &command).await,
    }
}
