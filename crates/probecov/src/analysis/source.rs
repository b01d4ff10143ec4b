//! Nodes that map to source lines: shared line bookkeeping and source files.

use super::counter::Counter;
use super::line::{Line, LineTable};
use super::node::{CoverageNode, ElementType};
use serde::{Deserialize, Serialize};

/// A coverage node with a line table
///
/// The line counter always equals `lines.line_counter()`: a line counts
/// once, as covered when any of its instructions is, with the executions of
/// its most executed instruction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceNode {
    node: CoverageNode,
    lines: LineTable,
}

impl SourceNode {
    /// Empty node
    #[must_use]
    pub fn new(element_type: ElementType, name: impl Into<String>) -> Self {
        Self {
            node: CoverageNode::new(element_type, name),
            lines: LineTable::new(),
        }
    }

    /// Counters
    #[must_use]
    pub const fn node(&self) -> &CoverageNode {
        &self.node
    }

    pub(crate) fn node_mut(&mut self) -> &mut CoverageNode {
        &mut self.node
    }

    /// Per-line counters
    #[must_use]
    pub const fn lines(&self) -> &LineTable {
        &self.lines
    }

    /// Count instructions and branches, attributed to `line` when known
    pub fn increment(&mut self, instructions: Counter, branches: Counter, line: Option<u32>) {
        self.node.instruction += instructions;
        self.node.branch += branches;
        if let Some(line) = line {
            self.increment_line(line, Line::new(instructions, branches));
        }
    }

    /// Add a child's counters and merge its lines into this table
    ///
    /// Every counter but the line counter is summed; the line counter is
    /// derived from the merged table.
    pub fn increment_source(&mut self, child: &Self) {
        let line = self.node.line;
        self.node.increment(&child.node);
        self.node.line = line;
        for (number, counters) in child.lines.iter() {
            self.increment_line(number, *counters);
        }
    }

    fn increment_line(&mut self, number: u32, line: Line) {
        let previous = self.lines.merge(number, line);
        let instructions = line.instructions();
        if instructions.total() == 0 {
            return;
        }
        let before = previous.instructions();
        let now_covered = instructions.covered() > 0;
        if before.total() == 0 {
            self.node.line += Counter::single(now_covered);
        } else if before.covered() == 0 && now_covered {
            self.node.line = self.node.line.mark_covered();
        }
        let added = line.executions().saturating_sub(previous.executions());
        self.node.line += Counter::EMPTY.with_executions(added);
    }
}

/// Classes compiled from one source file of one package
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceFileCoverage {
    source: SourceNode,
    package: String,
}

impl SourceFileCoverage {
    /// Empty source file node
    #[must_use]
    pub fn new(name: impl Into<String>, package: impl Into<String>) -> Self {
        Self {
            source: SourceNode::new(ElementType::SourceFile, name),
            package: package.into(),
        }
    }

    /// File name as recorded in the class
    #[must_use]
    pub fn name(&self) -> &str {
        self.source.node().name()
    }

    /// Internal package name (`/`-separated, empty for the default package)
    #[must_use]
    pub fn package(&self) -> &str {
        &self.package
    }

    /// Counters
    #[must_use]
    pub const fn node(&self) -> &CoverageNode {
        self.source.node()
    }

    /// Per-line counters, merged across classes
    #[must_use]
    pub const fn lines(&self) -> &LineTable {
        self.source.lines()
    }

    /// Fold a class of this file in
    pub fn increment(&mut self, class: &SourceNode) {
        self.source.increment_source(class);
    }
}
