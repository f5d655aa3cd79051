use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use projector::config::ProjectorConfig;
use projector::logging;

mod cmd;

#[derive(Parser)]
#[command(name = "projector")]
#[command(version, about = "Projects the activity log into dashboard read models")]
pub struct Cli {
    /// Log at debug level
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Configuration file (defaults to ./projector.toml when present)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Index storage URL: memory://, sqlite://<path> or a path
    #[arg(long, global = true)]
    pub storage: Option<String>,

    /// Activity log database
    #[arg(long, global = true)]
    pub activities_db: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Serve the HTTP query surface
    Serve {
        /// Address to listen on, e.g. 127.0.0.1:8888
        #[arg(long)]
        listen: Option<String>,
    },
    /// Run one catch-up pass and exit
    Update,
    /// Refresh and print a projection as JSON
    Show {
        #[command(subcommand)]
        command: ShowCommands,
    },
    /// Append activities from a JSON-lines file to the activity log
    Ingest {
        /// One activity object per line
        file: PathBuf,
    },
    /// View or validate configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Clone)]
pub enum ShowCommands {
    /// An organization with all of its project cards
    Organization { uuid: String },
    /// The card of a single project
    Card { project_uuid: String },
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    /// Print the effective configuration as TOML
    Show,
    /// Validate configuration and show any warnings
    Validate,
}

fn resolve_config(cli: &Cli) -> Result<ProjectorConfig> {
    let mut config = ProjectorConfig::load(cli.config.as_deref())?;
    if let Some(storage) = &cli.storage {
        config.storage.url = storage.clone();
    }
    if let Some(database) = &cli.activities_db {
        config.activities.database = database.clone();
    }
    if let Commands::Serve {
        listen: Some(listen),
    } = &cli.command
    {
        config.server.listen = listen.clone();
    }
    if cli.verbose {
        config.logging.level = "debug".to_string();
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = resolve_config(&cli)?;

    let _log_guard = logging::init(
        &config.logging.level,
        config.logging.format,
        config.logging.directory.as_deref(),
    )?;

    match &cli.command {
        Commands::Serve { .. } => cmd::cmd_serve(&config).await?,
        Commands::Update => cmd::cmd_update(&config)?,
        Commands::Show { command } => cmd::cmd_show(&config, command)?,
        Commands::Ingest { file } => cmd::cmd_ingest(&config, file)?,
        Commands::Config { command } => cmd::cmd_config(&config, command.clone())?,
    }

    Ok(())
}
