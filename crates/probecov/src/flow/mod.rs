//! Control-flow reconstruction shared by instrumentation and analysis.
//!
//! Both sides run the same two steps over a decoded method body:
//!
//! 1. [`LabelFlow`] marks how every label can be reached.
//! 2. [`ControlFlowGraph::build`] places probe sites and assigns ids.
//!
//! The instrumenter rewrites the body at the sites; the analyzer reads the
//! recorded probes at the same sites. Because ids depend only on the bytes,
//! both sides agree on them.

mod frame_tracker;
mod graph;
mod ids;
mod labels;
mod plan;

pub use frame_tracker::FrameTracker;
pub use graph::{distinct_arms, ControlFlowGraph, ProbeSite};
pub use ids::{ProbeId, ProbeIdGenerator};
pub use labels::{LabelFlow, LabelInfo};
pub use plan::{flow_error, plan_methods, MethodPlan};

use crate::classfile::FormatError;
use thiserror::Error;

/// Control-flow reconstruction failure
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FlowError {
    /// `jsr`/`ret` subroutines
    #[error("subroutines (jsr/ret) are not supported")]
    Subroutine,

    /// Inconsistent body or constant pool
    #[error("{0}")]
    Format(#[from] FormatError),
}

/// Result type for flow operations
pub type FlowResult<T> = Result<T, FlowError>;
