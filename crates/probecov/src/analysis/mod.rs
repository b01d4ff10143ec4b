//! Coverage analysis: joining class structure with recorded probes.
//!
//! # Architecture
//!
//! ```text
//! class bytes ──► plan_methods ──► method_instructions ──► MethodCoverage
//!                      ▲                    ▲                    │
//!                 same probe ids      ExecutionDataStore         ▼
//!                                                         ClassCoverage
//!                                                               │
//!                       CoverageBuilder ◄── CoverageVisitor ◄───┘
//!                              │
//!                              ▼
//!          SourceFileCoverage / PackageCoverage / BundleCoverage
//! ```
//!
//! Counters: instructions, branches, lines, cyclomatic complexity, methods
//! and classes. Parents sum their children, except the line counter of
//! nodes with a line table, which counts each line once.

mod analyzer;
mod builder;
mod bundle;
mod class;
mod counter;
mod diagnostics;
mod instructions;
mod line;
mod method;
mod node;
mod package;
mod source;

pub use analyzer::{Analyzer, CoverageVisitor};
pub use builder::CoverageBuilder;
pub use bundle::{BundleCoverage, GroupCoverage};
pub use class::ClassCoverage;
pub use counter::{Counter, CounterValue};
pub use diagnostics::{Diagnostic, DiagnosticAction, DiagnosticLog};
pub use instructions::{method_instructions, InstructionCoverage};
pub use line::{Line, LineStatus, LineTable};
pub use method::MethodCoverage;
pub use node::{CounterEntity, CoverageNode, ElementType};
pub use package::PackageCoverage;
pub use source::{SourceFileCoverage, SourceNode};
