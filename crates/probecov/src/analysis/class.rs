//! Class-level coverage.

use super::counter::Counter;
use super::line::LineTable;
use super::method::MethodCoverage;
use super::node::{CoverageNode, ElementType};
use super::source::SourceNode;
use crate::config::ProbeMode;
use serde::{Deserialize, Serialize};

/// Coverage of one class
///
/// The class counter is a single item: covered when at least one method
/// is, missed otherwise (including classes without methods).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassCoverage {
    source: SourceNode,
    id: u64,
    no_match: bool,
    super_name: Option<String>,
    interfaces: Vec<String>,
    source_file: Option<String>,
    methods: Vec<MethodCoverage>,
}

impl ClassCoverage {
    /// Class without methods
    #[must_use]
    pub fn new(name: impl Into<String>, id: u64, no_match: bool) -> Self {
        let mut source = SourceNode::new(ElementType::Class, name);
        source.node_mut().class = Counter::MISSED;
        Self {
            source,
            id,
            no_match,
            super_name: None,
            interfaces: Vec::new(),
            source_file: None,
            methods: Vec::new(),
        }
    }

    /// Record the super class and interfaces
    #[must_use]
    pub fn with_hierarchy(mut self, super_name: Option<String>, interfaces: Vec<String>) -> Self {
        self.super_name = super_name;
        self.interfaces = interfaces;
        self
    }

    /// Record how the probes of this class were stored, `None` without data
    #[must_use]
    pub fn with_probe_mode(mut self, mode: Option<ProbeMode>) -> Self {
        self.source.node_mut().probe_mode = mode;
        self
    }

    /// Record the source file name
    #[must_use]
    pub fn with_source_file(mut self, source_file: Option<String>) -> Self {
        self.source_file = source_file;
        self
    }

    /// Internal class name
    #[must_use]
    pub fn name(&self) -> &str {
        self.source.node().name()
    }

    /// Class id the coverage was computed for
    #[must_use]
    pub const fn id(&self) -> u64 {
        self.id
    }

    /// Whether recorded data exists for another version of this class
    #[must_use]
    pub const fn is_no_match(&self) -> bool {
        self.no_match
    }

    /// Internal package name, empty for the default package
    #[must_use]
    pub fn package_name(&self) -> &str {
        self.name().rsplit_once('/').map_or("", |(package, _)| package)
    }

    /// Super class name
    #[must_use]
    pub fn super_name(&self) -> Option<&str> {
        self.super_name.as_deref()
    }

    /// Implemented interfaces
    #[must_use]
    pub fn interfaces(&self) -> &[String] {
        &self.interfaces
    }

    /// Source file name from the class file
    #[must_use]
    pub fn source_file(&self) -> Option<&str> {
        self.source_file.as_deref()
    }

    /// Methods in declaration order
    #[must_use]
    pub fn methods(&self) -> &[MethodCoverage] {
        &self.methods
    }

    /// Counters
    #[must_use]
    pub const fn node(&self) -> &CoverageNode {
        self.source.node()
    }

    /// Per-line counters of all methods
    #[must_use]
    pub const fn lines(&self) -> &LineTable {
        self.source.lines()
    }

    pub(crate) const fn source(&self) -> &SourceNode {
        &self.source
    }

    /// Fold a method in
    pub fn add_method(&mut self, method: MethodCoverage) {
        self.source.increment_source(method.source());
        if method.node().instruction_counter().covered() > 0 {
            self.source.node_mut().class = Counter::COVERED;
        }
        self.methods.push(method);
    }
}
