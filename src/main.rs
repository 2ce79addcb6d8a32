use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::Mutex;
use tracing::{info, Level};
use tracing_subscriber::{self, EnvFilter};

mod cli;
mod client;
mod config;
mod dropdown;
mod plotting;
mod search;
mod table;
mod workflow;

use cli::commands::{
    DownloadCommand, ExploreCommand, GraphCommand, IndicatorsCommand, OptionsCommand, PromptCommand,
    ShowCommand,
};
use config::Config;

const INTERACTIVE_LOG: &str = "wb_explorer_interactive.log";

#[derive(Parser)]
#[command(name = "wb-explorer")]
#[command(about = "Browse World Bank indicator data from an explorer backend")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// YAML config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Backend base url (overrides config and WB_EXPLORER_BASE_URL)
    #[arg(long, global = true)]
    base_url: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Interactive explorer with dropdowns, results table and chart
    Explore(ExploreCommand),
    /// Step-by-step selection with terminal prompts
    Prompt(PromptCommand),
    /// List the indicators the backend offers
    Indicators(IndicatorsCommand),
    /// List the countries or years available for an indicator
    Options(OptionsCommand),
    /// Fetch and print results for an indicator/type/option
    Show(ShowCommand),
    /// Download the result set as CSV
    Download(DownloadCommand),
    /// Ask the backend to generate its interactive graph
    Graph(GraphCommand),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging with filtered levels
    let base_level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    let http_filter = "hyper=error,reqwest=error,rustls=error,h2=error,tower=error";
    let filter = EnvFilter::new(format!(
        "wb_explorer={},{}",
        if cli.verbose { "debug" } else { "info" },
        http_filter
    ));

    // The TUI owns the terminal, so its logs go to a file instead
    if matches!(cli.command, Commands::Explore(_)) {
        let log_file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(INTERACTIVE_LOG)
            .with_context(|| format!("opening {}", INTERACTIVE_LOG))?;
        tracing_subscriber::fmt()
            .with_max_level(base_level)
            .with_env_filter(filter)
            .with_ansi(false)
            .with_writer(Mutex::new(log_file))
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_max_level(base_level)
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }

    info!("Starting wb-explorer v{}", env!("CARGO_PKG_VERSION"));

    let config = Config::load(cli.config.as_deref(), cli.base_url.as_deref())?;
    info!("🌍 Backend: {}", config.base_url);

    match cli.command {
        Commands::Explore(cmd) => cmd.execute(config).await,
        Commands::Prompt(cmd) => cmd.execute(config).await,
        Commands::Indicators(cmd) => cmd.execute(config).await,
        Commands::Options(cmd) => cmd.execute(config).await,
        Commands::Show(cmd) => cmd.execute(config).await,
        Commands::Download(cmd) => cmd.execute(config).await,
        Commands::Graph(cmd) => cmd.execute(config).await,
    }
}
