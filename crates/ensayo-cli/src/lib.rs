//! Ensayador CLI library
//!
//! Command-line front end for the [`ensayo`] scenario runner: argument
//! parsing, logging setup, console progress and the command handlers.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

mod commands;
mod config;
mod error;
pub mod handlers;
mod logging;
mod output;

pub use commands::{
    Cli, ColorArg, Commands, FormatArg, ListArgs, ModeArg, ReportFormat, RunArgs, SelectionArgs,
    ValidateArgs,
};
pub use config::{CliConfig, ColorChoice, Verbosity};
pub use error::{CliError, CliResult};
pub use logging::init_logging;
pub use output::ProgressReporter;
