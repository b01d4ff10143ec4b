//! CLI command definitions using clap

use clap::{Args, Parser, Subcommand, ValueEnum};
use probecov::ProbeMode;
use std::path::PathBuf;

/// Probecov: instrument class files, merge execution data and analyze coverage
#[derive(Parser, Debug)]
#[command(name = "probecov")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Quiet mode (suppress non-error output)
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Subcommand to run
    #[command(subcommand)]
    pub command: Commands,
}

/// CLI subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Insert probes into class files
    Instrument(InstrumentArgs),

    /// Compute coverage of class files against execution data
    Analyze(AnalyzeArgs),

    /// Merge execution data files into one
    Merge(MergeArgs),

    /// Print the sessions and classes recorded in execution data files
    Info(InfoArgs),
}

/// Probe representation on the command line
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ModeArg {
    /// One flag per probe
    #[default]
    Flags,
    /// One hit counter per probe
    Counts,
}

impl From<ModeArg> for ProbeMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Flags => Self::Exists,
            ModeArg::Counts => Self::Count,
        }
    }
}

/// Arguments for the instrument command
#[derive(Args, Debug)]
pub struct InstrumentArgs {
    /// Class file, jar, or directory of class files and jars
    pub input: PathBuf,

    /// Output directory
    #[arg(short, long)]
    pub output: PathBuf,

    /// Probe representation (overrides the config file)
    #[arg(long, value_enum)]
    pub mode: Option<ModeArg>,

    /// JSON instrumentation config
    #[arg(long)]
    pub config: Option<PathBuf>,
}

/// Arguments for the analyze command
#[derive(Args, Debug)]
pub struct AnalyzeArgs {
    /// Class files, jars or directories
    #[arg(required = true)]
    pub classes: Vec<PathBuf>,

    /// Execution data files (glob patterns allowed)
    #[arg(short, long = "exec")]
    pub exec: Vec<String>,

    /// Bundle name in the report
    #[arg(long, default_value = "bundle")]
    pub name: String,

    /// Report synthetic classes and methods too
    #[arg(long)]
    pub include_synthetic: bool,

    /// JSON analysis config
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Print the whole coverage tree instead of a summary
    #[arg(long)]
    pub full: bool,
}

/// Arguments for the merge command
#[derive(Args, Debug)]
pub struct MergeArgs {
    /// Execution data files (glob patterns allowed)
    #[arg(required = true)]
    pub inputs: Vec<String>,

    /// Merged output file
    #[arg(short, long)]
    pub output: PathBuf,
}

/// Arguments for the info command
#[derive(Args, Debug)]
pub struct InfoArgs {
    /// Execution data files (glob patterns allowed)
    #[arg(required = true)]
    pub inputs: Vec<String>,
}
