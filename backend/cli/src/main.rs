mod client;
mod serve_cmd;
mod status_cmd;
mod sync_cmd;
mod terminal_output;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};

use vibestudy_config::{config_dir, config_file_path, load_and_prepare};

#[derive(Parser)]
#[command(name = "vibestudy")]
#[command(about = "VibeStudy progress gateway and sync client")]
#[command(version)]
struct Cli {
    /// Config file (default: ~/.vibestudy/config.yaml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the progress gateway
    Serve {
        /// Port to bind the HTTP server to
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Push one progress change to the gateway
    Sync {
        #[command(subcommand)]
        action: SyncAction,
    },
    /// Show stored progress for a day
    Progress {
        #[arg(long)]
        day: u32,
    },
    /// Show gateway health and the effective configuration
    Status,
}

#[derive(Subcommand)]
pub(crate) enum SyncAction {
    /// Overwrite the day's code snapshot
    Code(TextArgs),
    /// Overwrite the day's notes
    Notes(TextArgs),
    /// Overwrite the day's recap answer
    Recap(TextArgs),
    /// Mark one task done (or not done with --undone)
    Task {
        #[arg(long)]
        day: u32,
        #[arg(long)]
        task_id: String,
        #[arg(long)]
        undone: bool,
    },
    /// Mark the day complete
    Complete {
        #[arg(long)]
        day: u32,
    },
}

#[derive(Args)]
pub(crate) struct TextArgs {
    #[arg(long)]
    pub day: u32,
    /// Inline content
    #[arg(long, conflicts_with = "file", required_unless_present = "file")]
    pub text: Option<String>,
    /// Read content from a file
    #[arg(long)]
    pub file: Option<PathBuf>,
}

impl TextArgs {
    pub(crate) async fn content(&self) -> Result<String> {
        match (&self.text, &self.file) {
            (Some(text), _) => Ok(text.clone()),
            (None, Some(path)) => tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("Failed to read {}", path.display())),
            (None, None) => anyhow::bail!("either --text or --file is required"),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(|| config_file_path(&config_dir()));
    let config = load_and_prepare(&config_path)
        .await
        .with_context(|| format!("Invalid configuration in {}", config_path.display()))?;

    let logging = config.logging();
    vibestudy_logging::init_logger(
        logging.dir.as_deref().unwrap_or("logs"),
        logging.level.as_deref().unwrap_or("info"),
        logging.json.unwrap_or(false),
    )?;

    match cli.command {
        Commands::Serve { port } => serve_cmd::run(config, port).await,
        Commands::Sync { action } => sync_cmd::run(&config, action).await,
        Commands::Progress { day } => sync_cmd::show_progress(&config, day).await,
        Commands::Status => status_cmd::run(&config_path, &config).await,
    }
}
