//! Probecov CLI Library
//!
//! Command-line front end for the Probecov coverage engine. Every command
//! wires library operations together; no coverage logic lives here.

#![warn(missing_docs)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]

mod commands;
mod error;
pub mod handlers;
pub mod logging;
mod output;

pub use commands::{AnalyzeArgs, Cli, Commands, InfoArgs, InstrumentArgs, MergeArgs, ModeArg};
pub use error::{CliError, CliResult};
pub use output::Reporter;
