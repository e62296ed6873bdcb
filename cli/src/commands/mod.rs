pub mod config;
pub mod serve;
pub mod simulate;

pub use config::{ConfigAction, ConfigArgs};
pub use serve::{ReplayReport, ServeArgs};
pub use simulate::{SimulateArgs, SimulationSummary, StrategyArg};
