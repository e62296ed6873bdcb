use tallyman_recorder::{ConfigError, RecorderError, WireError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CliError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Recorder error: {0}")]
    Recorder(#[from] RecorderError),

    #[error("Wire format error: {0}")]
    Wire(#[from] WireError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::ser::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("File already exists: {path}")]
    FileExists { path: String },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Worker failed: {0}")]
    Worker(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl CliError {
    pub fn exit_code(&self) -> i32 {
        match self {
            CliError::Config(_) => 1,
            CliError::Io(_) => 2,
            CliError::Wire(_) | CliError::Protocol(_) => 3,
            CliError::Recorder(_) | CliError::Worker(_) => 4,
            CliError::FileExists { .. } => 5,
            CliError::InvalidArgument(_) => 6,
            _ => 1,
        }
    }
}

pub type Result<T> = std::result::Result<T, CliError>;

/// Format error for user-friendly display
pub fn format_error(error: &CliError) -> String {
    match error {
        CliError::Config(e) => {
            format!("Configuration Error: {e}\n\nTry running 'tallyctl config validate' to check your configuration.")
        }
        CliError::FileExists { path } => {
            format!("File Exists: {path}\n\nPass --force to overwrite it.")
        }
        CliError::Wire(e) => {
            format!("Wire Format Error: {e}\n\nThe sender does not speak the tallyman event protocol.")
        }
        _ => error.to_string(),
    }
}
