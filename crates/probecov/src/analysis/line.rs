//! Per-line counters and status flags.

use super::counter::Counter;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::ops::BitOr;

/// Coverage status of a source line
///
/// `PartlyCovered` is the OR of `NotCovered` and `FullyCovered`, so
/// statuses accumulate with `|`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum LineStatus {
    /// No code on the line
    #[default]
    Empty = 0,
    /// Nothing covered
    NotCovered = 1,
    /// Everything covered
    FullyCovered = 2,
    /// Some covered, some missed
    PartlyCovered = 3,
}

impl LineStatus {
    /// Status from its two-bit encoding
    #[must_use]
    pub const fn from_bits(bits: u8) -> Self {
        match bits & 0b11 {
            0 => Self::Empty,
            1 => Self::NotCovered,
            2 => Self::FullyCovered,
            _ => Self::PartlyCovered,
        }
    }

    /// Two-bit encoding
    #[must_use]
    pub const fn bits(self) -> u8 {
        self as u8
    }
}

impl BitOr for LineStatus {
    type Output = Self;

    fn bitor(self, other: Self) -> Self {
        Self::from_bits(self.bits() | other.bits())
    }
}

/// Instruction and branch counters of one source line
///
/// The line runs as often as its most executed instruction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Line {
    instructions: Counter,
    branches: Counter,
    #[serde(default)]
    executions: u32,
}

impl Line {
    /// Line with the given counters
    #[must_use]
    pub const fn new(instructions: Counter, branches: Counter) -> Self {
        Self {
            instructions,
            branches,
            executions: instructions.executions(),
        }
    }

    /// Executions of the line
    #[must_use]
    pub const fn executions(&self) -> u32 {
        self.executions
    }

    /// Instruction counter
    #[must_use]
    pub const fn instructions(&self) -> Counter {
        self.instructions
    }

    /// Branch counter
    #[must_use]
    pub const fn branches(&self) -> Counter {
        self.branches
    }

    /// Instruction status OR branch status
    #[must_use]
    pub fn status(&self) -> LineStatus {
        self.instructions.status() | self.branches.status()
    }

    #[must_use]
    fn increment(self, instructions: Counter, branches: Counter, executions: u32) -> Self {
        Self {
            instructions: self.instructions + instructions,
            branches: self.branches + branches,
            executions: self.executions.max(executions),
        }
    }
}

/// Sparse line number to [`Line`] map
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LineTable {
    lines: BTreeMap<u32, Line>,
}

impl LineTable {
    /// Empty table
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one instruction's counters to a line; returns the line as it
    /// was before
    pub fn increment(&mut self, line: u32, instructions: Counter, branches: Counter) -> Line {
        self.merge(line, Line::new(instructions, branches))
    }

    /// Merge another table's line into `line`; returns the line as it was
    /// before
    pub fn merge(&mut self, line: u32, other: Line) -> Line {
        let entry = self.lines.entry(line).or_default();
        let before = *entry;
        *entry = before.increment(other.instructions, other.branches, other.executions);
        before
    }

    /// Counters of a line (empty when absent)
    #[must_use]
    pub fn line(&self, line: u32) -> Line {
        self.lines.get(&line).copied().unwrap_or_default()
    }

    /// Status of a line
    #[must_use]
    pub fn status(&self, line: u32) -> LineStatus {
        self.line(line).status()
    }

    /// First line with code
    #[must_use]
    pub fn first_line(&self) -> Option<u32> {
        self.lines.keys().next().copied()
    }

    /// Last line with code
    #[must_use]
    pub fn last_line(&self) -> Option<u32> {
        self.lines.keys().next_back().copied()
    }

    /// Lines in ascending order
    pub fn iter(&self) -> impl Iterator<Item = (u32, &Line)> {
        self.lines.iter().map(|(number, line)| (*number, line))
    }

    /// Number of lines present
    #[must_use]
    pub fn len(&self) -> usize {
        self.lines.len()
    }

    /// Whether no line is present
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// One item per line with instructions: covered if any instruction is
    #[must_use]
    pub fn line_counter(&self) -> Counter {
        self.lines
            .values()
            .filter(|line| line.instructions.total() > 0)
            .map(|line| {
                Counter::single(line.instructions.covered() > 0).with_executions(line.executions)
            })
            .sum()
    }
}
