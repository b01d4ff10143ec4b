//! Probecov: bytecode coverage engine for JVM class files
//!
//! Probecov inserts boolean (or counting) probes into compiled classes,
//! collects the probe arrays at runtime, and rebuilds a hierarchical
//! coverage report by replaying the same control-flow analysis over the
//! unmodified classes.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                    PROBECOV Architecture                        │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  class bytes ──► flow (probe ids) ──► instr ──► instrumented    │
//! │                       │                            │            │
//! │                       │                      runtime (probes)   │
//! │                       │                            │            │
//! │                       ▼                            ▼            │
//! │                  analysis ◄──────────── data (exec files)       │
//! │                       │                                         │
//! │                       ▼                                         │
//! │         Bundle / Package / SourceFile / Class / Method          │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use probecov::{Analyzer, CoverageBuilder, ExecFileLoader};
//! use std::path::Path;
//!
//! # fn main() -> probecov::CoverageResult<()> {
//! let mut loader = ExecFileLoader::new();
//! loader.load(Path::new("probecov.exec"))?;
//!
//! let mut builder = CoverageBuilder::new();
//! Analyzer::new(loader.store(), &mut builder).analyze_all(Path::new("target/classes"))?;
//! let bundle = builder.bundle("app");
//! println!("instructions: {}", bundle.node().instruction_counter());
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![cfg_attr(test, allow(clippy::large_stack_arrays, clippy::large_stack_frames))]

/// Jar and zip containers
pub mod archive;

/// Coverage counters and the analysis tree
#[allow(clippy::missing_errors_doc, clippy::must_use_candidate)]
pub mod analysis;

/// Class file codec
#[allow(
    clippy::missing_errors_doc,
    clippy::must_use_candidate,
    clippy::module_name_repetitions
)]
pub mod classfile;

/// Instrumentation and analysis configuration
pub mod config;

/// Execution data and the exec stream format
#[allow(clippy::missing_errors_doc)]
pub mod data;

/// Control-flow reconstruction and probe placement
#[allow(clippy::missing_errors_doc)]
pub mod flow;

/// Offline instrumentation
#[allow(clippy::missing_errors_doc)]
pub mod instr;

/// Errors
pub mod result;

/// Runtime registry for instrumented code
pub mod runtime;

#[cfg(test)]
mod testing;

pub use analysis::{
    Analyzer, BundleCoverage, ClassCoverage, Counter, CounterEntity, CoverageBuilder,
    CoverageNode, CoverageVisitor, Diagnostic, DiagnosticAction, ElementType, GroupCoverage,
    LineStatus, MethodCoverage, PackageCoverage, SourceFileCoverage,
};
pub use config::{AnalysisConfig, InstrumentConfig, ProbeMode};
pub use data::{
    ExecDataReader, ExecDataVisitor, ExecDataWriter, ExecFileLoader, ExecutionData,
    ExecutionDataStore, ProbeArray, SessionInfo,
};
pub use instr::{CompanionUnit, InstrumentedArchive, InstrumentedUnit, Instrumenter, Strategy};
pub use result::{CoverageError, CoverageResult};
pub use runtime::{ProbeArrayAccessor, RuntimeData};
