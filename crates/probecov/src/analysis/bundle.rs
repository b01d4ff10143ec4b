//! Bundles and groups: the top of the coverage tree.

use super::class::ClassCoverage;
use super::node::{CoverageNode, ElementType};
use super::package::PackageCoverage;
use super::source::SourceFileCoverage;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Classes analyzed together, grouped by package
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BundleCoverage {
    node: CoverageNode,
    packages: Vec<PackageCoverage>,
}

impl BundleCoverage {
    /// Bundle of already built packages
    #[must_use]
    pub fn new(name: impl Into<String>, packages: Vec<PackageCoverage>) -> Self {
        let node = CoverageNode::sum(
            ElementType::Bundle,
            name,
            packages.iter().map(PackageCoverage::node),
        );
        Self { node, packages }
    }

    /// Group classes and source files by package
    #[must_use]
    pub fn from_classes(
        name: impl Into<String>,
        classes: impl IntoIterator<Item = ClassCoverage>,
        source_files: impl IntoIterator<Item = SourceFileCoverage>,
    ) -> Self {
        let mut by_package: BTreeMap<String, (Vec<ClassCoverage>, Vec<SourceFileCoverage>)> =
            BTreeMap::new();
        for class in classes {
            by_package
                .entry(class.package_name().to_string())
                .or_default()
                .0
                .push(class);
        }
        for file in source_files {
            by_package
                .entry(file.package().to_string())
                .or_default()
                .1
                .push(file);
        }
        let packages = by_package
            .into_iter()
            .map(|(package, (mut classes, mut files))| {
                classes.sort_by(|a, b| a.name().cmp(b.name()));
                files.sort_by(|a, b| a.name().cmp(b.name()));
                PackageCoverage::new(package, classes, files)
            })
            .collect();
        Self::new(name, packages)
    }

    /// Bundle name
    #[must_use]
    pub fn name(&self) -> &str {
        self.node.name()
    }

    /// Counters
    #[must_use]
    pub const fn node(&self) -> &CoverageNode {
        &self.node
    }

    /// Packages, sorted by name
    #[must_use]
    pub fn packages(&self) -> &[PackageCoverage] {
        &self.packages
    }

    /// Every class of every package
    pub fn classes(&self) -> impl Iterator<Item = &ClassCoverage> {
        self.packages.iter().flat_map(|p| p.classes().iter())
    }
}

/// Named group of bundles and nested groups
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupCoverage {
    node: CoverageNode,
    groups: Vec<GroupCoverage>,
    bundles: Vec<BundleCoverage>,
}

impl GroupCoverage {
    /// Sum of the given children
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        groups: Vec<GroupCoverage>,
        bundles: Vec<BundleCoverage>,
    ) -> Self {
        let node = CoverageNode::sum(
            ElementType::Group,
            name,
            groups
                .iter()
                .map(GroupCoverage::node)
                .chain(bundles.iter().map(BundleCoverage::node)),
        );
        Self {
            node,
            groups,
            bundles,
        }
    }

    /// Group name
    #[must_use]
    pub fn name(&self) -> &str {
        self.node.name()
    }

    /// Counters
    #[must_use]
    pub const fn node(&self) -> &CoverageNode {
        &self.node
    }

    /// Nested groups
    #[must_use]
    pub fn groups(&self) -> &[GroupCoverage] {
        &self.groups
    }

    /// Direct bundles
    #[must_use]
    pub fn bundles(&self) -> &[BundleCoverage] {
        &self.bundles
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use crate::analysis::counter::Counter;

    #[test]
    fn test_packages_are_sorted_and_summed() {
        let classes = vec![
            ClassCoverage::new("z/A", 1, false),
            ClassCoverage::new("a/B", 2, false),
            ClassCoverage::new("a/A", 3, false),
        ];
        let bundle = BundleCoverage::from_classes("app", classes, Vec::new());
        let names: Vec<_> = bundle.packages().iter().map(PackageCoverage::name).collect();
        assert_eq!(names, ["a", "z"]);
        assert_eq!(bundle.packages()[0].classes()[0].name(), "a/A");
        assert_eq!(bundle.node().class_counter(), Counter::new(3, 0));
        assert_eq!(bundle.classes().count(), 3);
    }

    #[test]
    fn test_group_sums_bundles_and_groups() {
        let a = BundleCoverage::from_classes("a", vec![ClassCoverage::new("A", 1, false)], Vec::new());
        let b = BundleCoverage::from_classes("b", vec![ClassCoverage::new("B", 2, false)], Vec::new());
        let inner = GroupCoverage::new("inner", Vec::new(), vec![b]);
        let outer = GroupCoverage::new("outer", vec![inner], vec![a]);
        assert_eq!(outer.node().class_counter(), Counter::new(2, 0));
        assert_eq!(outer.node().element_type(), ElementType::Group);
        assert_eq!(outer.groups().len(), 1);
        assert_eq!(outer.bundles()[0].name(), "a");
    }
}
