//! Common counters of every level of the coverage tree.

use super::counter::Counter;
use crate::config::ProbeMode;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Level of a node in the coverage tree
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ElementType {
    /// Group of bundles
    Group,
    /// Classes analyzed together
    Bundle,
    /// Classes of one package
    Package,
    /// Classes compiled from one source file
    SourceFile,
    /// One class
    Class,
    /// One method
    Method,
}

impl fmt::Display for ElementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Group => "group",
            Self::Bundle => "bundle",
            Self::Package => "package",
            Self::SourceFile => "sourcefile",
            Self::Class => "class",
            Self::Method => "method",
        };
        f.write_str(name)
    }
}

/// Which counter of a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CounterEntity {
    /// Bytecode instructions
    Instruction,
    /// Branches of conditional jumps and switches
    Branch,
    /// Source lines with code
    Line,
    /// Cyclomatic complexity
    Complexity,
    /// Methods
    Method,
    /// Classes
    Class,
}

impl CounterEntity {
    /// Every entity, in report order
    pub const ALL: [Self; 6] = [
        Self::Instruction,
        Self::Branch,
        Self::Line,
        Self::Complexity,
        Self::Method,
        Self::Class,
    ];
}

/// Name, level and the six counters of a tree node
///
/// `probe_mode` is the weakest probe representation below the node, `None`
/// when nothing below was recorded. Execution counts are only meaningful
/// when it is [`ProbeMode::Count`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoverageNode {
    element_type: ElementType,
    name: String,
    #[serde(default)]
    pub(crate) probe_mode: Option<ProbeMode>,
    pub(crate) instruction: Counter,
    pub(crate) branch: Counter,
    pub(crate) line: Counter,
    pub(crate) complexity: Counter,
    pub(crate) method: Counter,
    pub(crate) class: Counter,
}

impl CoverageNode {
    /// Node with all counters empty
    #[must_use]
    pub fn new(element_type: ElementType, name: impl Into<String>) -> Self {
        Self {
            element_type,
            name: name.into(),
            probe_mode: None,
            instruction: Counter::EMPTY,
            branch: Counter::EMPTY,
            line: Counter::EMPTY,
            complexity: Counter::EMPTY,
            method: Counter::EMPTY,
            class: Counter::EMPTY,
        }
    }

    /// Level of this node
    #[must_use]
    pub const fn element_type(&self) -> ElementType {
        self.element_type
    }

    /// Node name
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// One counter
    #[must_use]
    pub const fn counter(&self, entity: CounterEntity) -> Counter {
        match entity {
            CounterEntity::Instruction => self.instruction,
            CounterEntity::Branch => self.branch,
            CounterEntity::Line => self.line,
            CounterEntity::Complexity => self.complexity,
            CounterEntity::Method => self.method,
            CounterEntity::Class => self.class,
        }
    }

    /// Instruction counter
    #[must_use]
    pub const fn instruction_counter(&self) -> Counter {
        self.instruction
    }

    /// Branch counter
    #[must_use]
    pub const fn branch_counter(&self) -> Counter {
        self.branch
    }

    /// Line counter
    #[must_use]
    pub const fn line_counter(&self) -> Counter {
        self.line
    }

    /// Complexity counter
    #[must_use]
    pub const fn complexity_counter(&self) -> Counter {
        self.complexity
    }

    /// Method counter
    #[must_use]
    pub const fn method_counter(&self) -> Counter {
        self.method
    }

    /// Class counter
    #[must_use]
    pub const fn class_counter(&self) -> Counter {
        self.class
    }

    /// Probe representation the counters were computed from
    #[must_use]
    pub const fn probe_mode(&self) -> Option<ProbeMode> {
        self.probe_mode
    }

    /// Fold a child's probe mode in; flags win over counts
    pub fn merge_probe_mode(&mut self, child: Option<ProbeMode>) {
        self.probe_mode = match (self.probe_mode, child) {
            (None, mode) | (mode, None) => mode,
            (Some(ProbeMode::Count), Some(ProbeMode::Count)) => Some(ProbeMode::Count),
            _ => Some(ProbeMode::Exists),
        };
    }

    /// Whether the node holds any instruction
    #[must_use]
    pub const fn contains_code(&self) -> bool {
        self.instruction.total() > 0
    }

    /// Add every counter of `child`
    pub fn increment(&mut self, child: &Self) {
        self.instruction += child.instruction;
        self.branch += child.branch;
        self.line += child.line;
        self.complexity += child.complexity;
        self.method += child.method;
        self.class += child.class;
        self.merge_probe_mode(child.probe_mode);
    }

    /// Node summing `children` under a new name and level
    #[must_use]
    pub fn sum<'a>(
        element_type: ElementType,
        name: impl Into<String>,
        children: impl IntoIterator<Item = &'a Self>,
    ) -> Self {
        let mut node = Self::new(element_type, name);
        for child in children {
            node.increment(child);
        }
        node
    }
}
