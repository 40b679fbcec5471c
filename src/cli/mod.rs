pub mod commands;
pub mod handlers;
pub mod output;

pub use commands::{CliArgs, Commands, DetectArgs, HealthArgs, RunArgs};
pub use output::{DetectionOutput, HealthStatus, OutputFormat, OutputFormatter};
