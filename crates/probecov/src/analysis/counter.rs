//! Missed/covered counters.

use super::line::LineStatus;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::iter::Sum;
use std::ops::{Add, AddAssign};

/// Quantity read from a [`Counter`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CounterValue {
    /// missed + covered
    TotalCount,
    /// Recorded executions (count mode only)
    TotalExecCount,
    /// Missed items
    MissedCount,
    /// Covered items
    CoveredCount,
    /// missed / total
    MissedRatio,
    /// covered / total
    CoveredRatio,
}

/// Immutable pair of missed and covered item counts
///
/// `executions` stays 0 unless the probes were recorded as hit counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Counter {
    missed: u32,
    covered: u32,
    #[serde(default)]
    executions: u32,
}

impl Counter {
    /// Nothing counted
    pub const EMPTY: Self = Self::new(0, 0);

    /// One missed item
    pub const MISSED: Self = Self::new(1, 0);

    /// One covered item
    pub const COVERED: Self = Self::new(0, 1);

    /// Counter with the given counts
    #[must_use]
    pub const fn new(missed: u32, covered: u32) -> Self {
        Self {
            missed,
            covered,
            executions: 0,
        }
    }

    /// Same items with the given execution count
    #[must_use]
    pub const fn with_executions(self, executions: u32) -> Self {
        Self { executions, ..self }
    }

    /// A single item, covered or not
    #[must_use]
    pub const fn single(covered: bool) -> Self {
        if covered {
            Self::COVERED
        } else {
            Self::MISSED
        }
    }

    /// Missed items
    #[must_use]
    pub const fn missed(&self) -> u32 {
        self.missed
    }

    /// Covered items
    #[must_use]
    pub const fn covered(&self) -> u32 {
        self.covered
    }

    /// Recorded executions of the items
    #[must_use]
    pub const fn executions(&self) -> u32 {
        self.executions
    }

    /// All items
    #[must_use]
    pub const fn total(&self) -> u32 {
        self.missed.saturating_add(self.covered)
    }

    /// covered / total, NaN when there are no items
    #[must_use]
    pub fn covered_ratio(&self) -> f64 {
        f64::from(self.covered) / f64::from(self.total())
    }

    /// missed / total, NaN when there are no items
    #[must_use]
    pub fn missed_ratio(&self) -> f64 {
        f64::from(self.missed) / f64::from(self.total())
    }

    /// Read one quantity as a float
    #[must_use]
    pub fn value(&self, value: CounterValue) -> f64 {
        match value {
            CounterValue::TotalCount => f64::from(self.total()),
            CounterValue::TotalExecCount => f64::from(self.executions),
            CounterValue::MissedCount => f64::from(self.missed),
            CounterValue::CoveredCount => f64::from(self.covered),
            CounterValue::MissedRatio => self.missed_ratio(),
            CounterValue::CoveredRatio => self.covered_ratio(),
        }
    }

    /// `FullyCovered` if anything is covered, OR `NotCovered` if anything is missed
    #[must_use]
    pub fn status(&self) -> LineStatus {
        let mut status = LineStatus::Empty;
        if self.covered > 0 {
            status = status | LineStatus::FullyCovered;
        }
        if self.missed > 0 {
            status = status | LineStatus::NotCovered;
        }
        status
    }

    /// Move one item from missed to covered
    #[must_use]
    pub const fn mark_covered(self) -> Self {
        Self::new(self.missed.saturating_sub(1), self.covered.saturating_add(1))
            .with_executions(self.executions)
    }
}

impl Add for Counter {
    type Output = Self;

    fn add(self, other: Self) -> Self {
        Self::new(
            self.missed.saturating_add(other.missed),
            self.covered.saturating_add(other.covered),
        )
        .with_executions(self.executions.saturating_add(other.executions))
    }
}

impl AddAssign for Counter {
    fn add_assign(&mut self, other: Self) {
        *self = *self + other;
    }
}

impl Sum for Counter {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::EMPTY, Add::add)
    }
}

impl fmt::Display for Counter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.covered, self.total())
    }
}
