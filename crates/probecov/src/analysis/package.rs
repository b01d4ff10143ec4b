//! Package-level coverage.

use super::class::ClassCoverage;
use super::node::{CoverageNode, ElementType};
use super::source::SourceFileCoverage;
use serde::{Deserialize, Serialize};

/// Classes and source files of one package
///
/// Counters are the sum of the source files plus the classes that have no
/// source file; classes with a source file are counted through it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageCoverage {
    node: CoverageNode,
    classes: Vec<ClassCoverage>,
    source_files: Vec<SourceFileCoverage>,
}

impl PackageCoverage {
    /// Aggregate a package
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        classes: Vec<ClassCoverage>,
        source_files: Vec<SourceFileCoverage>,
    ) -> Self {
        let mut node = CoverageNode::new(ElementType::Package, name);
        for file in &source_files {
            node.increment(file.node());
        }
        for class in classes.iter().filter(|c| c.source_file().is_none()) {
            node.increment(class.node());
        }
        Self {
            node,
            classes,
            source_files,
        }
    }

    /// Internal package name
    #[must_use]
    pub fn name(&self) -> &str {
        self.node.name()
    }

    /// Counters
    #[must_use]
    pub const fn node(&self) -> &CoverageNode {
        &self.node
    }

    /// Classes, sorted by name
    #[must_use]
    pub fn classes(&self) -> &[ClassCoverage] {
        &self.classes
    }

    /// Source files, sorted by name
    #[must_use]
    pub fn source_files(&self) -> &[SourceFileCoverage] {
        &self.source_files
    }
}
