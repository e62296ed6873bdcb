//! Library side of `tallyctl`: the recording server, the load simulator and
//! configuration management on top of `tallyman-recorder`.

pub mod commands;
pub mod error;
pub mod logging;

pub use error::{CliError, Result};
