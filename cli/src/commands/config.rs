use std::path::{Path, PathBuf};

use clap::Args;
use tallyman_recorder::RecorderConfig;
use tracing::info;

use crate::error::{CliError, Result};

#[derive(Args, Debug)]
pub struct ConfigArgs {
    /// Configuration action
    #[command(subcommand)]
    pub action: ConfigAction,
}

#[derive(clap::Subcommand, Debug)]
pub enum ConfigAction {
    /// Show the effective configuration
    Show {
        /// Show the configuration file path only
        #[arg(long)]
        path: bool,
    },

    /// Validate a configuration file
    Validate {
        /// Configuration file path (defaults to the active one)
        #[arg(short, long)]
        file: Option<PathBuf>,
    },

    /// Write a default configuration file
    Init {
        /// Target path (defaults to the user configuration directory)
        #[arg(short, long)]
        file: Option<PathBuf>,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

pub fn run(args: ConfigArgs, config: &RecorderConfig, config_path: Option<&Path>) -> Result<()> {
    match args.action {
        ConfigAction::Show { path } => show_config(config, config_path, path),
        ConfigAction::Validate { file } => {
            let file = file.or_else(|| config_path.map(Path::to_path_buf));
            let report = validate_config(file.as_deref())?;
            println!("{report}");
            Ok(())
        }
        ConfigAction::Init { file, force } => {
            let file = match file {
                Some(file) => file,
                None => RecorderConfig::default_config_path()?,
            };
            init_config(&file, force)?;
            println!("Wrote default configuration to {}", file.display());
            Ok(())
        }
    }
}

fn show_config(config: &RecorderConfig, config_path: Option<&Path>, path_only: bool) -> Result<()> {
    if path_only {
        match config_path {
            Some(path) => println!("{}", path.display()),
            None => println!("(defaults)"),
        }
        return Ok(());
    }
    print!("{}", toml::to_string_pretty(config)?);
    Ok(())
}

/// Loads and validates `file`, or the defaults plus environment without one
pub fn validate_config(file: Option<&Path>) -> Result<String> {
    let config = match file {
        Some(file) => RecorderConfig::from_file(file)?,
        None => RecorderConfig::from_env()?,
    };
    config.validate()?;
    let source = file.map_or_else(|| "defaults".to_string(), |file| file.display().to_string());
    info!(%source, "Configuration validated");
    Ok(format!("Configuration is valid: {source}"))
}

/// Writes the default configuration to `file`
pub fn init_config(file: &Path, force: bool) -> Result<()> {
    if file.exists() && !force {
        return Err(CliError::FileExists {
            path: file.display().to_string(),
        });
    }
    RecorderConfig::default().save_to_file(file)?;
    Ok(())
}
