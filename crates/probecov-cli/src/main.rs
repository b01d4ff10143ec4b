//! Probecov CLI
//!
//! ## Usage
//!
//! ```bash
//! probecov instrument target/classes -o target/instrumented
//! probecov merge 'runs/*.exec' -o all.exec
//! probecov analyze target/classes --exec all.exec > coverage.json
//! probecov info all.exec
//! ```

use clap::Parser;
use probecov_cli::handlers::{
    analyze::run_analyze, info::run_info, instrument::run_instrument, merge::run_merge,
};
use probecov_cli::logging::initialize_logging;
use probecov_cli::{Cli, CliResult, Commands, Reporter};
use std::process::ExitCode;

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run() -> CliResult<()> {
    let cli = Cli::parse();
    initialize_logging(cli.verbose, cli.quiet);
    let reporter = Reporter::new(cli.quiet);

    match cli.command {
        Commands::Instrument(args) => run_instrument(&args, &reporter),
        Commands::Analyze(args) => run_analyze(&args, &reporter),
        Commands::Merge(args) => run_merge(&args, &reporter),
        Commands::Info(args) => run_info(&args),
    }
}
