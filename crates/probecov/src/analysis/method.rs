//! Method-level coverage.

use super::counter::Counter;
use super::instructions::InstructionCoverage;
use super::line::LineTable;
use super::node::{CoverageNode, ElementType};
use super::source::SourceNode;
use crate::config::ProbeMode;
use serde::{Deserialize, Serialize};

/// Coverage of one method
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MethodCoverage {
    source: SourceNode,
    descriptor: String,
}

impl MethodCoverage {
    /// Empty method node
    #[must_use]
    pub fn new(name: impl Into<String>, descriptor: impl Into<String>) -> Self {
        Self {
            source: SourceNode::new(ElementType::Method, name),
            descriptor: descriptor.into(),
        }
    }

    /// Method built from per-instruction results
    #[must_use]
    pub fn from_instructions(
        name: impl Into<String>,
        descriptor: impl Into<String>,
        instructions: &[InstructionCoverage],
    ) -> Self {
        let mut method = Self::new(name, descriptor);
        for insn in instructions {
            method.increment(
                insn.instruction_counter(),
                insn.branch_counter(),
                insn.line.map(u32::from),
            );
        }
        method.increment_method_counter(instructions.first().map_or(0, |insn| insn.executions));
        method
    }

    /// Record how the probes of this method were stored
    #[must_use]
    pub fn with_probe_mode(mut self, mode: Option<ProbeMode>) -> Self {
        self.source.node_mut().probe_mode = mode;
        self
    }

    /// Method name
    #[must_use]
    pub fn name(&self) -> &str {
        self.source.node().name()
    }

    /// Method descriptor
    #[must_use]
    pub fn descriptor(&self) -> &str {
        &self.descriptor
    }

    /// Counters
    #[must_use]
    pub const fn node(&self) -> &CoverageNode {
        self.source.node()
    }

    /// Per-line counters
    #[must_use]
    pub const fn lines(&self) -> &LineTable {
        self.source.lines()
    }

    pub(crate) const fn source(&self) -> &SourceNode {
        &self.source
    }

    /// Count one instruction
    ///
    /// A branching instruction with `b` branches, `c` covered, adds
    /// `max(0, c - 1)` covered and `max(0, b - c - 1)` missed complexity
    /// (clamped against `c = 0`).
    pub fn increment(&mut self, instructions: Counter, branches: Counter, line: Option<u32>) {
        self.source.increment(instructions, branches, line);
        if branches.total() > 1 {
            let covered = branches.covered().saturating_sub(1);
            let missed = branches.total().saturating_sub(covered + 1);
            self.source.node_mut().complexity += Counter::new(missed, covered);
        }
    }

    /// Set the method counter from the instruction counter and add the
    /// method's base complexity; call once after all instructions
    ///
    /// `entries` is how often the method was entered, counted on the
    /// method counter only.
    pub fn increment_method_counter(&mut self, entries: u32) {
        let node = self.source.node_mut();
        let base = Counter::single(node.instruction.covered() > 0);
        node.method += base.with_executions(entries);
        node.complexity += base;
    }
}
