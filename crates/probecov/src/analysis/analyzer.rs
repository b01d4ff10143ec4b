//! Joins class structure with recorded probes.

use super::class::ClassCoverage;
use super::diagnostics::Diagnostic;
use super::instructions::method_instructions;
use super::method::MethodCoverage;
use crate::archive::{read_entries, ContentType, ARCHIVE_EXTENSIONS};
use crate::classfile::access::SYNTHETIC;
use crate::classfile::{ClassFile, FormatError};
use crate::config::AnalysisConfig;
use crate::data::{class_id, ExecutionData, ExecutionDataStore, ProbeArray};
use crate::flow::{plan_methods, ProbeIdGenerator};
use crate::result::{CoverageError, CoverageResult};
use std::fmt;
use std::fs;
use std::path::Path;
use tracing::debug;

const LAMBDA_PREFIX: &str = "lambda$";

/// Receives the results of an [`Analyzer`]
pub trait CoverageVisitor {
    /// One analyzed class
    fn visit_coverage(&mut self, coverage: ClassCoverage) -> CoverageResult<()>;

    /// A diagnostic raised while analyzing
    fn visit_diagnostic(&mut self, _diagnostic: Diagnostic) {}
}

/// Computes class coverage from class bytes and an execution data store
pub struct Analyzer<'a> {
    store: &'a ExecutionDataStore,
    visitor: &'a mut dyn CoverageVisitor,
    config: AnalysisConfig,
}

impl fmt::Debug for Analyzer<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Analyzer")
            .field("store", &self.store.len())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl<'a> Analyzer<'a> {
    /// Analyzer with the default configuration
    pub fn new(store: &'a ExecutionDataStore, visitor: &'a mut dyn CoverageVisitor) -> Self {
        Self::with_config(store, visitor, AnalysisConfig::default())
    }

    /// Analyzer with an explicit configuration
    pub fn with_config(
        store: &'a ExecutionDataStore,
        visitor: &'a mut dyn CoverageVisitor,
        config: AnalysisConfig,
    ) -> Self {
        Self {
            store,
            visitor,
            config,
        }
    }

    /// Analyze one class; `location` is used in error messages
    ///
    /// Module classes, and synthetic classes unless configured otherwise,
    /// produce nothing.
    pub fn analyze_class(&mut self, bytes: &[u8], location: &str) -> CoverageResult<()> {
        let malformed = |e: FormatError| CoverageError::malformed(location, e);
        let id = class_id(bytes);
        let class = ClassFile::parse(bytes).map_err(malformed)?;
        let name = class.name().map_err(malformed)?;
        if class.is_module() {
            debug!(class = %name, "skipping module descriptor");
            return Ok(());
        }
        if class.is_synthetic() && !self.config.include_synthetic {
            debug!(class = %name, "skipping synthetic class");
            return Ok(());
        }

        let mut ids = ProbeIdGenerator::new();
        let plans = plan_methods(&class, &name, &mut ids)?;
        let probe_count = ids.count() as usize;
        let data = self.store.get(id);
        let no_match = match &data {
            None => self.store.contains(&name),
            Some(data) => data.probe_count() != probe_count,
        };
        if no_match {
            self.visitor
                .visit_diagnostic(Diagnostic::NoMatch { name: name.clone(), id });
        }
        let probes = if no_match {
            None
        } else {
            data.as_deref().map(ExecutionData::probes)
        };
        debug!(
            class = %name,
            id = format_args!("{id:016x}"),
            probe_count,
            recorded = probes.is_some(),
            no_match,
            "analyzing"
        );

        let probe_mode = probes.map(ProbeArray::mode);
        let mut coverage = ClassCoverage::new(name.clone(), id, no_match)
            .with_probe_mode(probe_mode)
            .with_hierarchy(
                class.super_name().map_err(malformed)?,
                class.interface_names().map_err(malformed)?,
            )
            .with_source_file(class.source_file());
        for plan in &plans {
            if plan.access & SYNTHETIC != 0
                && !self.config.include_synthetic
                && !plan.name.starts_with(LAMBDA_PREFIX)
            {
                continue;
            }
            let instructions = method_instructions(&plan.code, &plan.cfg, probes);
            if instructions.is_empty() {
                continue;
            }
            coverage.add_method(
                MethodCoverage::from_instructions(
                    plan.name.as_str(),
                    plan.descriptor.as_str(),
                    &instructions,
                )
                .with_probe_mode(probe_mode),
            );
        }
        self.visitor.visit_coverage(coverage)
    }

    /// Analyze whatever `bytes` hold: a class, or an archive of classes
    ///
    /// Archive entries are analyzed recursively by content, so nested jars
    /// are opened too. Anything else is skipped. Returns the number of class
    /// files read.
    pub fn analyze_bytes(&mut self, bytes: &[u8], location: &str) -> CoverageResult<usize> {
        match ContentType::detect(bytes) {
            ContentType::ClassFile => {
                self.analyze_class(bytes, location)?;
                Ok(1)
            }
            ContentType::Archive => self.analyze_archive(bytes, location),
            ContentType::Other => Ok(0),
        }
    }

    /// Analyze every class in a jar or zip archive, in stored order
    pub fn analyze_archive(&mut self, bytes: &[u8], location: &str) -> CoverageResult<usize> {
        let mut count = 0;
        for entry in read_entries(bytes, location)? {
            if !entry.is_dir() {
                count += self.analyze_bytes(&entry.bytes, &entry.location(location))?;
            }
        }
        debug!(archive = location, classes = count, "analyzed archive");
        Ok(count)
    }

    /// Analyze a class file or archive, or every one below a directory
    ///
    /// Directory entries are visited in file-name order; only `.class` files
    /// and archives are read from directories. Returns the number of class
    /// files read.
    pub fn analyze_all(&mut self, path: &Path) -> CoverageResult<usize> {
        if !path.is_dir() {
            let bytes = fs::read(path)?;
            return self.analyze_bytes(&bytes, &path.display().to_string());
        }
        let mut entries = fs::read_dir(path)?.collect::<Result<Vec<_>, _>>()?;
        entries.sort_by_key(fs::DirEntry::file_name);
        let mut count = 0;
        for entry in entries {
            let child = entry.path();
            if child.is_dir() || is_analyzable(&child) {
                count += self.analyze_all(&child)?;
            }
        }
        Ok(count)
    }
}

fn is_analyzable(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext == "class" || ARCHIVE_EXTENSIONS.contains(&ext))
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use crate::analysis::counter::Counter;
    use crate::archive::{write_entries, ArchiveEntry};
    use crate::classfile::access::{PRIVATE, PUBLIC, STATIC};
    use crate::classfile::opcodes::RETURN;
    use crate::data::ProbeArray;
    use crate::testing::ClassFixture;

    #[derive(Default)]
    struct Collector {
        classes: Vec<ClassCoverage>,
        diagnostics: Vec<Diagnostic>,
    }

    impl CoverageVisitor for Collector {
        fn visit_coverage(&mut self, coverage: ClassCoverage) -> CoverageResult<()> {
            self.classes.push(coverage);
            Ok(())
        }

        fn visit_diagnostic(&mut self, diagnostic: Diagnostic) {
            self.diagnostics.push(diagnostic);
        }
    }

    fn analyze(bytes: &[u8], store: &ExecutionDataStore, config: AnalysisConfig) -> Collector {
        let mut collector = Collector::default();
        Analyzer::with_config(store, &mut collector, config)
            .analyze_class(bytes, "test")
            .unwrap();
        collector
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

    fn returning(body: &mut crate::testing::CodeBuilder, line: u16) {
        body.label();
        body.line(line).simple(RETURN);
    }

    #[test]
    fn test_jump_taken_only() {
        let bytes = ClassFixture::if_without_else(52);
        let store = ExecutionDataStore::new();
        record(&store, &bytes, "a/Example", &[true, true, false, true]);

        let result = analyze(&bytes, &store, AnalysisConfig::default());
        assert!(result.diagnostics.is_empty());
        let class = &result.classes[0];
        assert_eq!(class.name(), "a/Example");
        assert_eq!(class.source_file(), Some("Example.java"));
        assert_eq!(class.super_name(), Some("java/lang/Object"));
        assert!(!class.is_no_match());

        let f = &class.methods()[1];
        assert_eq!(f.name(), "f");
        assert_eq!(f.node().instruction_counter(), Counter::new(2, 4));
        assert_eq!(f.node().branch_counter(), Counter::new(1, 1));
        assert_eq!(f.node().complexity_counter(), Counter::new(1, 1));
        assert_eq!(class.node().method_counter(), Counter::new(0, 2));
        assert_eq!(class.node().class_counter(), Counter::COVERED);
        assert_eq!(class.node().line_counter(), Counter::new(1, 3));
    }

    #[test]
    fn test_no_data_is_all_missed() {
        let bytes = ClassFixture::if_without_else(52);
        let store = ExecutionDataStore::new();
        let result = analyze(&bytes, &store, AnalysisConfig::default());
        let class = &result.classes[0];
        assert!(!class.is_no_match());
        assert_eq!(class.node().instruction_counter(), Counter::new(9, 0));
        assert_eq!(class.node().class_counter(), Counter::MISSED);
        assert!(result.diagnostics.is_empty());
    }

    #[test]
    fn test_other_build_is_no_match() {
        let bytes = ClassFixture::if_without_else(52);
        let store = ExecutionDataStore::new();
        store
            .put(ExecutionData::with_probes(
                class_id(&bytes) ^ 1,
                "a/Example",
                ProbeArray::from_flags(&[true; 4]),
            ))
            .unwrap();
        let result = analyze(&bytes, &store, AnalysisConfig::default());
        assert!(result.classes[0].is_no_match());
        assert_eq!(result.classes[0].node().instruction_counter().covered(), 0);
        assert!(matches!(
            result.diagnostics.as_slice(),
            [Diagnostic::NoMatch { name, .. }] if name == "a/Example"
        ));
    }

    #[test]
    fn test_probe_count_mismatch_is_no_match() {
        let bytes = ClassFixture::if_without_else(52);
        let store = ExecutionDataStore::new();
        record(&store, &bytes, "a/Example", &[true; 3]);
        let result = analyze(&bytes, &store, AnalysisConfig::default());
        assert!(result.classes[0].is_no_match());
        assert_eq!(result.classes[0].node().instruction_counter().covered(), 0);
        assert_eq!(result.diagnostics.len(), 1);
    }

    #[test]
    fn test_module_class_is_skipped() {
        let bytes = ClassFixture::new("module-info", 53).module().build();
        let store = ExecutionDataStore::new();
        let result = analyze(&bytes, &store, AnalysisConfig::default());
        assert!(result.classes.is_empty());
    }

    #[test]
    fn test_synthetic_class_needs_opt_in() {
        let bytes = ClassFixture::new("a/Gen", 52)
            .synthetic()
            .method(PUBLIC | STATIC, "run", "()V", |b| returning(b, 1))
            .build();
        let store = ExecutionDataStore::new();
        assert!(analyze(&bytes, &store, AnalysisConfig::default()).classes.is_empty());
        let config = AnalysisConfig::builder().include_synthetic(true).build();
        assert_eq!(analyze(&bytes, &store, config).classes.len(), 1);
    }

    #[test]
    fn test_synthetic_methods_except_lambdas_are_skipped() {
        let bytes = ClassFixture::new("a/Outer", 52)
            .method(PUBLIC | STATIC, "run", "()V", |b| returning(b, 1))
            .method(STATIC | SYNTHETIC, "access$000", "()V", |b| returning(b, 2))
            .method(PRIVATE | STATIC | SYNTHETIC, "lambda$run$0", "()V", |b| {
                returning(b, 3);
            })
            .build();
        let store = ExecutionDataStore::new();
        // ids still advance through the skipped method
        record(&store, &bytes, "a/Outer", &[false, true, true]);
        let result = analyze(&bytes, &store, AnalysisConfig::default());
        let class = &result.classes[0];
        let names: Vec<_> = class.methods().iter().map(MethodCoverage::name).collect();
        assert_eq!(names, ["run", "lambda$run$0"]);
        assert_eq!(class.methods()[1].node().method_counter(), Counter::COVERED);
        assert_eq!(class.methods()[0].node().method_counter(), Counter::MISSED);
    }

    #[test]
    fn test_abstract_methods_are_not_reported() {
        let bytes = ClassFixture::new("a/Shape", 52)
            .interface()
            .abstract_method("area", "()D")
            .build();
        let store = ExecutionDataStore::new();
        let result = analyze(&bytes, &store, AnalysisConfig::default());
        let class = &result.classes[0];
        assert!(class.methods().is_empty());
        assert_eq!(class.node().class_counter(), Counter::MISSED);
        assert!(!class.node().contains_code());
    }

    #[test]
    fn test_malformed_bytes() {
        let store = ExecutionDataStore::new();
        let mut collector = Collector::default();
        let err = Analyzer::new(&store, &mut collector)
            .analyze_class(&[0xCA, 0xFE], "broken.class")
            .unwrap_err();
        assert!(matches!(err, CoverageError::MalformedUnit { name, .. } if name == "broken.class"));
    }

    #[test]
    fn test_analyze_all_walks_directories() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("a").join("b");
        fs::create_dir_all(&nested).unwrap();
        fs::write(dir.path().join("One.class"), ClassFixture::named_if_without_else("One", 52))
            .unwrap();
        fs::write(nested.join("Two.class"), ClassFixture::named_if_without_else("a/b/Two", 52))
            .unwrap();
        fs::write(nested.join("notes.txt"), b"not a class").unwrap();

        let store = ExecutionDataStore::new();
        let mut collector = Collector::default();
        let count = Analyzer::new(&store, &mut collector)
            .analyze_all(dir.path())
            .unwrap();
        assert_eq!(count, 2);
        let mut names: Vec<_> = collector.classes.iter().map(ClassCoverage::name).collect();
        names.sort_unstable();
        assert_eq!(names, ["One", "a/b/Two"]);
    }

    #[test]
    fn test_archives_are_opened_recursively() {
        let one = ClassFixture::named_if_without_else("p/One", 52);
        let two = ClassFixture::named_if_without_else("p/Two", 52);
        let inner = write_entries(&[ArchiveEntry::new("p/Two.class", two)], "inner.jar").unwrap();
        let outer = write_entries(
            &[
                ArchiveEntry::new("META-INF/", Vec::new()),
                ArchiveEntry::new("META-INF/MANIFEST.MF", b"Manifest-Version: 1.0".to_vec()),
                ArchiveEntry::new("p/One.class", one.clone()),
                ArchiveEntry::new("lib/inner.jar", inner),
            ],
            "app.jar",
        )
        .unwrap();

        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("app.jar"), &outer).unwrap();
        fs::write(dir.path().join("app.txt"), &outer).unwrap();

        let store = ExecutionDataStore::new();
        record(&store, &one, "p/One", &[true, true, false, true]);
        let mut collector = Collector::default();
        let count = Analyzer::new(&store, &mut collector)
            .analyze_all(dir.path())
            .unwrap();
        assert_eq!(count, 2);
        let names: Vec<_> = collector.classes.iter().map(ClassCoverage::name).collect();
        assert_eq!(names, ["p/One", "p/Two"]);
        assert!(collector.classes[0].node().instruction_counter().covered() > 0);
        assert_eq!(collector.classes[1].node().instruction_counter().covered(), 0);
    }

    #[test]
    fn test_broken_nested_class_names_its_entry() {
        let bad = ArchiveEntry::new("p/Bad.class", vec![0xCA, 0xFE, 0xBA, 0xBE]);
        let outer = write_entries(&[bad], "app.jar").unwrap();
        let store = ExecutionDataStore::new();
        let mut collector = Collector::default();
        let err = Analyzer::new(&store, &mut collector)
            .analyze_bytes(&outer, "app.jar")
            .unwrap_err();
        assert!(matches!(
            err,
            CoverageError::MalformedUnit { name, .. } if name == "app.jar@p/Bad.class"
        ));
    }
}
