use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

mod cmd;

#[derive(Parser)]
#[command(name = "autoplay")]
#[command(version, about = "Autoplay orchestration for game art generation")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Emit logs as JSON lines on stderr
    #[arg(long, global = true)]
    pub log_json: bool,

    #[arg(long, global = true)]
    pub project_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run every configured phase against the simulated studio
    Run(RunArgs),
    /// View or validate configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Args, Clone)]
pub struct RunArgs {
    #[arg(long, default_value = "Untitled Game")]
    pub name: String,

    #[arg(long, default_value = "")]
    pub vision: String,

    #[arg(long, default_value = "")]
    pub theme: String,

    /// Sketch images to save
    #[arg(long, default_value = "2")]
    pub sketches: u32,

    /// Gameplay images to save
    #[arg(long, default_value = "2")]
    pub gameplay: u32,

    #[arg(long)]
    pub no_poster: bool,

    #[arg(long)]
    pub no_hud: bool,

    /// Iteration budget per orchestrator run. Overrides autoplay.toml.
    #[arg(long)]
    pub max_iterations: Option<u32>,

    /// Orchestrator restarts allowed per phase. Overrides autoplay.toml.
    #[arg(long)]
    pub max_restarts: Option<u32>,

    /// Cycle safety net in seconds. Overrides autoplay.toml and the environment.
    #[arg(long)]
    pub cycle_timeout: Option<u64>,

    /// Polish time box in seconds. Overrides autoplay.toml and the environment.
    #[arg(long)]
    pub polish_timeout: Option<u64>,

    /// Simulated latency per service call, in milliseconds
    #[arg(long, default_value = "150")]
    pub latency_ms: u64,

    /// Times the simulated evaluator rejects each prompt before approving it
    #[arg(long, default_value = "1")]
    pub rejections: u32,

    /// Skip writing an audit record
    #[arg(long)]
    pub no_audit: bool,

    /// Print the final state as JSON on stdout
    #[arg(long)]
    pub json: bool,
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    /// Show the effective settings
    Show,
    /// Validate autoplay.toml
    Validate,
    /// Write a default autoplay.toml
    Init,
}

fn init_tracing(verbose: bool, json: bool) {
    let fallback_level = if verbose { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(fallback_level))
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);
    let _ = if json {
        builder.json().try_init()
    } else {
        builder.compact().try_init()
    };
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.log_json);

    let project_dir = match cli.project_dir.clone() {
        Some(dir) => dir,
        None => std::env::current_dir().context("Failed to get current directory")?,
    };

    match &cli.command {
        Commands::Run(args) => cmd::cmd_run(&project_dir, args).await?,
        Commands::Config { command } => cmd::cmd_config(&project_dir, command.clone())?,
    }

    Ok(())
}
