//! Collects analyzed classes into a coverage tree.

use super::analyzer::CoverageVisitor;
use super::bundle::BundleCoverage;
use super::class::ClassCoverage;
use super::diagnostics::{Diagnostic, DiagnosticLog};
use super::source::SourceFileCoverage;
use crate::result::{CoverageError, CoverageResult};
use std::collections::BTreeMap;

/// [`CoverageVisitor`] that keeps every class, keyed by name
#[derive(Debug, Default)]
pub struct CoverageBuilder {
    classes: BTreeMap<String, ClassCoverage>,
    diagnostics: DiagnosticLog,
}

impl CoverageBuilder {
    /// Create an empty builder
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Classes sorted by name
    pub fn classes(&self) -> impl Iterator<Item = &ClassCoverage> {
        self.classes.values()
    }

    /// Class by internal name
    #[must_use]
    pub fn class(&self, name: &str) -> Option<&ClassCoverage> {
        self.classes.get(name)
    }

    /// Source files, built from the classes that name one
    #[must_use]
    pub fn source_files(&self) -> Vec<SourceFileCoverage> {
        let mut files: BTreeMap<(&str, &str), SourceFileCoverage> = BTreeMap::new();
        for class in self.classes.values() {
            let Some(file) = class.source_file() else {
                continue;
            };
            let package = class.package_name();
            files
                .entry((package, file))
                .or_insert_with(|| SourceFileCoverage::new(file, package))
                .increment(class.source());
        }
        files.into_values().collect()
    }

    /// Classes whose recorded data belongs to another build
    #[must_use]
    pub fn no_match_classes(&self) -> Vec<&ClassCoverage> {
        self.classes.values().filter(|c| c.is_no_match()).collect()
    }

    /// Diagnostics raised so far
    #[must_use]
    pub const fn diagnostics(&self) -> &DiagnosticLog {
        &self.diagnostics
    }

    /// Everything collected, grouped by package
    #[must_use]
    pub fn bundle(&self, name: impl Into<String>) -> BundleCoverage {
        BundleCoverage::from_classes(name, self.classes.values().cloned(), self.source_files())
    }
}

impl CoverageVisitor for CoverageBuilder {
    fn visit_coverage(&mut self, coverage: ClassCoverage) -> CoverageResult<()> {
        if let Some(existing) = self.classes.get(coverage.name()) {
            if existing.id() != coverage.id() {
                let diagnostic = Diagnostic::DuplicateClass {
                    name: coverage.name().to_string(),
                    existing_id: existing.id(),
                    new_id: coverage.id(),
                };
                let message = diagnostic.description();
                let _ = self.diagnostics.record(diagnostic);
                return Err(CoverageError::mismatch(message));
            }
        }
        let _ = self.classes.insert(coverage.name().to_string(), coverage);
        Ok(())
    }

    fn visit_diagnostic(&mut self, diagnostic: Diagnostic) {
        let _ = self.diagnostics.record(diagnostic);
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use crate::analysis::analyzer::Analyzer;
    use crate::analysis::counter::Counter;
    use crate::analysis::line::LineStatus;
    use crate::analysis::node::CounterEntity;
    use crate::classfile::access::{PUBLIC, STATIC};
    use crate::classfile::opcodes::{ICONST_0, IRETURN, POP};
    use crate::config::{InstrumentConfig, ProbeMode};
    use crate::data::{class_id, ExecutionData, ExecutionDataStore, ProbeArray};
    use crate::instr::Instrumenter;
    use crate::testing::ClassFixture;

    fn build(store: &ExecutionDataStore, classes: &[(&str, Vec<u8>)]) -> CoverageBuilder {
        let mut builder = CoverageBuilder::new();
        let mut analyzer = Analyzer::new(store, &mut builder);
        for (location, bytes) in classes {
            analyzer.analyze_class(bytes, location).unwrap();
        }
        builder
    }

    fn record(store: &ExecutionDataStore, bytes: &[u8], name: &str, flags: &[bool]) {
        store
            .put(ExecutionData::with_probes(
                class_id(bytes),
                name,
                ProbeArray::from_flags(flags),
            ))
            .unwrap();
    }

    #[test]
    fn test_instrumented_probe_count_drives_full_and_empty_coverage() {
        let bytes = ClassFixture::if_without_else(52);
        let unit = Instrumenter::new(InstrumentConfig::builder().build())
            .instrument(&bytes, "a/Example")
            .unwrap();
        let count = unit.probe_count as usize;

        let all = ExecutionDataStore::new();
        record(&all, &bytes, "a/Example", &vec![true; count]);
        let full = build(&all, &[("Example.class", bytes.clone())]).bundle("app");
        assert_eq!(full.node().instruction_counter().missed(), 0);
        assert_eq!(full.node().branch_counter().missed(), 0);
        assert_eq!(full.node().line_counter().missed(), 0);

        let none = ExecutionDataStore::new();
        record(&none, &bytes, "a/Example", &vec![false; count]);
        let empty = build(&none, &[("Example.class", bytes)]).bundle("app");
        assert_eq!(empty.node().instruction_counter().covered(), 0);
        assert_eq!(empty.node().method_counter(), Counter::new(2, 0));
        assert_eq!(empty.node().class_counter(), Counter::MISSED);
    }

    #[test]
    fn test_if_without_else_line_status() {
        let bytes = ClassFixture::if_without_else(52);
        let store = ExecutionDataStore::new();
        record(&store, &bytes, "a/Example", &[true, true, false, true]);
        let builder = build(&store, &[("Example.class", bytes)]);

        let files = builder.source_files();
        assert_eq!(files.len(), 1);
        let file = &files[0];
        assert_eq!(file.name(), "Example.java");
        assert_eq!(file.package(), "a");
        assert_eq!(file.node().branch_counter(), Counter::new(1, 1));
        assert_eq!(file.lines().status(1), LineStatus::FullyCovered);
        assert_eq!(file.lines().status(3), LineStatus::PartlyCovered);
        assert_eq!(file.lines().status(4), LineStatus::NotCovered);
        assert_eq!(file.lines().status(5), LineStatus::FullyCovered);
        assert_eq!(file.lines().status(2), LineStatus::Empty);
    }

    #[test]
    fn test_hit_counts_reach_the_bundle() {
        // constructor run twice, f called 10 times with x != 0 on 6 of them
        let counted = ClassFixture::if_without_else(52);
        let store = ExecutionDataStore::new();
        store
            .put(ExecutionData::with_probes(
                class_id(&counted),
                "a/Example",
                ProbeArray::from_counts(&[2, 6, 4, 10]),
            ))
            .unwrap();
        let builder = build(&store, &[("Example.class", counted.clone())]);
        let class = builder.class("a/Example").unwrap();
        let node = class.node();
        assert_eq!(node.probe_mode(), Some(ProbeMode::Count));
        assert_eq!(node.method_counter(), Counter::new(0, 2).with_executions(12));
        assert_eq!(node.instruction_counter(), Counter::new(0, 9).with_executions(54));
        assert_eq!(node.line_counter(), Counter::new(0, 4).with_executions(26));
        assert_eq!(node.branch_counter(), Counter::new(0, 2));
        assert_eq!(class.lines().line(4).executions(), 4);
        let bundle = builder.bundle("counted");
        assert_eq!(bundle.node().instruction_counter().executions(), 54);
        assert_eq!(bundle.node().probe_mode(), Some(ProbeMode::Count));

        // one class recorded as flags turns the bundle to flags
        let flagged = ClassFixture::named_if_without_else("b/Other", 52);
        record(&store, &flagged, "b/Other", &[true, true, true, true]);
        let unrecorded = ClassFixture::named_if_without_else("c/Never", 52);
        let mixed = build(
            &store,
            &[("Example.class", counted), ("Other.class", flagged), ("Never.class", unrecorded)],
        )
        .bundle("mixed");
        assert_eq!(mixed.node().probe_mode(), Some(ProbeMode::Exists));
        let never = mixed.packages().iter().find(|p| p.name() == "c").unwrap();
        assert_eq!(never.node().probe_mode(), None);
    }

    #[test]
    fn test_straight_line_method_has_single_probe() {
        let bytes = ClassFixture::new("Straight", 52)
            .method(PUBLIC | STATIC, "g", "()I", |b| {
                b.label();
                b.line(1).simple(ICONST_0).simple(POP);
                b.line(2).simple(ICONST_0).simple(IRETURN);
            })
            .build();
        let unit = Instrumenter::new(InstrumentConfig::builder().build())
            .instrument(&bytes, "Straight")
            .unwrap();
        assert_eq!(unit.probe_count, 1);

        let store = ExecutionDataStore::new();
        record(&store, &bytes, "Straight", &[true]);
        let builder = build(&store, &[("Straight.class", bytes)]);
        let class = builder.class("Straight").unwrap();
        assert_eq!(class.node().instruction_counter(), Counter::new(0, 4));
        assert_eq!(class.node().line_counter(), Counter::new(0, 2));
        assert_eq!(class.package_name(), "");
    }

    #[test]
    fn test_no_match_is_isolated() {
        let store = ExecutionDataStore::new();
        let mut classes = Vec::new();
        for i in 0..10 {
            let name = format!("a/C{i}");
            let bytes = ClassFixture::named_if_without_else(&name, 52);
            let id = if i == 3 {
                class_id(&bytes) ^ 0xff
            } else {
                class_id(&bytes)
            };
            store
                .put(ExecutionData::with_probes(id, name.as_str(), ProbeArray::from_flags(&[true; 4])))
                .unwrap();
            classes.push((name, bytes));
        }
        let mut builder = CoverageBuilder::new();
        let mut analyzer = Analyzer::new(&store, &mut builder);
        for (name, bytes) in &classes {
            analyzer.analyze_class(bytes, name).unwrap();
        }

        let unmatched: Vec<_> = builder.no_match_classes().iter().map(|c| c.name()).collect();
        assert_eq!(unmatched, ["a/C3"]);
        assert_eq!(builder.diagnostics().len(), 1);
        assert_eq!(builder.diagnostics().no_match(), ["a/C3"]);
        for class in builder.classes() {
            let instructions = class.node().instruction_counter();
            if class.name() == "a/C3" {
                assert_eq!(instructions.covered(), 0);
            } else {
                assert_eq!(instructions.missed(), 0);
            }
        }
    }

    #[test]
    fn test_duplicate_class_is_rejected() {
        let first = ClassFixture::if_without_else(52);
        let second = ClassFixture::new("a/Example", 52).default_constructor(9).build();
        let store = ExecutionDataStore::new();
        let mut builder = CoverageBuilder::new();
        let mut analyzer = Analyzer::new(&store, &mut builder);
        analyzer.analyze_class(&first, "one").unwrap();
        // same bytes again replace the entry
        analyzer.analyze_class(&first, "one").unwrap();
        let err = analyzer.analyze_class(&second, "two").unwrap_err();
        assert!(matches!(err, CoverageError::StructuralMismatch { .. }));

        assert_eq!(builder.classes().count(), 1);
        assert_eq!(builder.class("a/Example").unwrap().id(), class_id(&first));
        assert!(builder.diagnostics().has_stop());
    }

    #[test]
    fn test_classes_without_source_file_count_in_package() {
        let with_source = ClassFixture::named_if_without_else("p/A", 52);
        let without = ClassFixture::new("p/B", 52).default_constructor(1).build();
        let store = ExecutionDataStore::new();
        let bundle = build(&store, &[("A", with_source), ("B", without)]).bundle("app");
        let package = &bundle.packages()[0];
        assert_eq!(package.name(), "p");
        assert_eq!(package.node().class_counter(), Counter::new(2, 0));
        assert_eq!(package.node().instruction_counter(), Counter::new(12, 0));
    }

    mod proptest_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn parent_counters_sum_children(
                flags in prop::collection::vec(prop::collection::vec(any::<bool>(), 4), 1..6),
            ) {
                let store = ExecutionDataStore::new();
                let mut classes = Vec::new();
                for (i, probes) in flags.iter().enumerate() {
                    let package = if i % 2 == 0 { "x" } else { "y" };
                    let name = format!("{package}/K{i}");
                    let bytes = ClassFixture::named_if_without_else(&name, 52);
                    record(&store, &bytes, &name, probes);
                    classes.push((name, bytes));
                }
                let refs: Vec<_> = classes.iter().map(|(n, b)| (n.as_str(), b.clone())).collect();
                let bundle = build(&store, &refs).bundle("app");

                for entity in CounterEntity::ALL {
                    let packages: Counter = bundle
                        .packages()
                        .iter()
                        .map(|p| p.node().counter(entity))
                        .sum();
                    prop_assert_eq!(bundle.node().counter(entity), packages);
                    for package in bundle.packages() {
                        let files: Counter = package
                            .source_files()
                            .iter()
                            .map(|f| f.node().counter(entity))
                            .sum();
                        prop_assert_eq!(package.node().counter(entity), files);
                        if entity != CounterEntity::Line {
                            let classes: Counter = package
                                .classes()
                                .iter()
                                .map(|c| c.node().counter(entity))
                                .sum();
                            prop_assert_eq!(package.node().counter(entity), classes);
                        }
                    }
                }
            }
        }
    }
}
