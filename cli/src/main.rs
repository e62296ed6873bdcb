use std::path::PathBuf;
use std::process;

use clap::{Parser, Subcommand};
use tallyctl::commands::{self, ConfigArgs, ServeArgs, SimulateArgs};
use tallyctl::error::{self, Result};
use tallyctl::logging::initialize_logging;
use tallyman_recorder::RecorderConfig;
use tracing::{debug, info};

#[derive(Parser)]
#[command(name = "tallyctl")]
#[command(about = "Tallyman CLI - recording server, load simulator and configuration for the tallyman recorder")]
#[command(version)]
#[command(long_about = "
Tallyman CLI (tallyctl) receives recording sessions from instrumented programs,
drives the recorder with synthetic load and manages recorder configuration.

Examples:
  tallyctl serve --port 6002 --once                 # Replay one recording session
  tallyctl simulate --threads 8 --strategy buffered # Exercise the buffered pipeline
  tallyctl config init                              # Write the default configuration
  tallyctl config show                              # Show the effective configuration
")]
struct Cli {
    /// Configuration file path
    #[arg(short, long, global = true, env = "TALLYMAN_CONFIG")]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Receive recording sessions over TCP and report them
    Serve(ServeArgs),

    /// Manage recorder configuration
    Config(ConfigArgs),

    /// Drive a recorder strategy with synthetic load
    Simulate(SimulateArgs),
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}", error::format_error(&e));
            process::exit(e.exit_code());
        }
    };

    let _guard = match initialize_logging(&config.logging) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to initialize logging: {e:#}");
            process::exit(1);
        }
    };
    info!("Tallyman CLI started");

    if let Err(e) = run_command(cli, config).await {
        eprintln!("{}", error::format_error(&e));
        process::exit(e.exit_code());
    }
}

async fn run_command(cli: Cli, config: RecorderConfig) -> Result<()> {
    match cli.command {
        Commands::Serve(args) => commands::serve::run(args, config).await,
        Commands::Config(args) => commands::config::run(args, &config, cli.config.as_deref()),
        Commands::Simulate(args) => {
            tokio::task::spawn_blocking(move || commands::simulate::run(args, config))
                .await
                .map_err(|e| error::CliError::Worker(e.to_string()))?
        }
    }
}

/// Config file, then environment, then command line flags
fn load_config(cli: &Cli) -> Result<RecorderConfig> {
    let mut config = match &cli.config {
        Some(path) if !path.exists() => {
            return Err(error::CliError::Config(tallyman_recorder::ConfigError::FileNotFound {
                path: path.display().to_string(),
            }))
        }
        Some(path) => RecorderConfig::load_with_fallback(Some(path))?,
        None => {
            let default_path = RecorderConfig::default_config_path().ok();
            RecorderConfig::load_with_fallback(default_path)?
        }
    };

    if let Some(level) = &cli.log_level {
        config.logging.level = level.clone();
    }
    if cli.json_logs {
        config.logging.json = true;
    }
    config.validate()?;
    debug!(strategy = ?config.recording.strategy, "Configuration loaded");
    Ok(config)
}
