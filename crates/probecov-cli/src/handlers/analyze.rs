//! `probecov analyze`

use super::expand_patterns;
use crate::commands::AnalyzeArgs;
use crate::error::CliResult;
use crate::output::Reporter;
use probecov::{
    AnalysisConfig, Analyzer, BundleCoverage, Counter, CoverageBuilder, CoverageNode,
    ExecFileLoader, ProbeMode,
};
use serde::Serialize;
use std::io::{self, Write};

/// The six counters of a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CounterSummary {
    /// Instructions
    pub instruction: Counter,
    /// Branches
    pub branch: Counter,
    /// Lines
    pub line: Counter,
    /// Cyclomatic complexity
    pub complexity: Counter,
    /// Methods
    pub method: Counter,
    /// Classes
    pub class: Counter,
}

impl From<&CoverageNode> for CounterSummary {
    fn from(node: &CoverageNode) -> Self {
        Self {
            instruction: node.instruction_counter(),
            branch: node.branch_counter(),
            line: node.line_counter(),
            complexity: node.complexity_counter(),
            method: node.method_counter(),
            class: node.class_counter(),
        }
    }
}

/// Counters of one package
#[derive(Debug, Clone, Serialize)]
pub struct PackageSummary {
    /// Internal package name
    pub name: String,
    /// Counters
    pub counters: CounterSummary,
}

/// Output of `analyze` without `--full`
#[derive(Debug, Clone, Serialize)]
pub struct AnalyzeSummary {
    /// Bundle name
    pub name: String,
    /// Number of analyzed classes
    pub classes: usize,
    /// Weakest probe representation of the recorded data; execution counts
    /// are filled in only for `count`
    pub probe_mode: Option<ProbeMode>,
    /// Bundle counters
    pub counters: CounterSummary,
    /// Per-package counters
    pub packages: Vec<PackageSummary>,
    /// Classes whose execution data belongs to another build
    pub no_match: Vec<String>,
}

impl AnalyzeSummary {
    /// Summarize a bundle
    #[must_use]
    pub fn new(bundle: &BundleCoverage, no_match: Vec<String>) -> Self {
        Self {
            name: bundle.name().to_string(),
            classes: bundle.classes().count(),
            probe_mode: bundle.node().probe_mode(),
            counters: bundle.node().into(),
            packages: bundle
                .packages()
                .iter()
                .map(|p| PackageSummary {
                    name: p.name().to_string(),
                    counters: p.node().into(),
                })
                .collect(),
            no_match,
        }
    }
}

/// Analyze class files against execution data and print JSON to stdout
pub fn run_analyze(args: &AnalyzeArgs, reporter: &Reporter) -> CliResult<()> {
    let mut config = match &args.config {
        Some(path) => AnalysisConfig::from_json_file(path)?,
        None => AnalysisConfig::default(),
    };
    if args.include_synthetic {
        config.include_synthetic = true;
    }

    let mut loader = ExecFileLoader::new();
    for path in expand_patterns(&args.exec)? {
        loader.load(&path)?;
    }

    let mut builder = CoverageBuilder::new();
    let mut analyzer = Analyzer::with_config(loader.store(), &mut builder, config);
    let mut count = 0;
    for path in &args.classes {
        count += analyzer.analyze_all(path)?;
    }
    reporter.info(&format!("Analyzed {count} class files"));

    let no_match: Vec<String> = builder
        .no_match_classes()
        .iter()
        .map(|c| c.name().to_string())
        .collect();
    for name in &no_match {
        reporter.warning(&format!("Execution data does not match class {name}"));
    }

    let bundle = builder.bundle(args.name.as_str());
    let mut out = io::stdout().lock();
    if args.full {
        serde_json::to_writer_pretty(&mut out, &bundle)?;
    } else {
        serde_json::to_writer_pretty(&mut out, &AnalyzeSummary::new(&bundle, no_match))?;
    }
    writeln!(out)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use probecov::ClassCoverage;

    #[test]
    fn test_summary_serializes_counters() {
        let bundle = BundleCoverage::from_classes(
            "app",
            vec![ClassCoverage::new("p/A", 1, false)],
            Vec::new(),
        );
        let summary = AnalyzeSummary::new(&bundle, vec!["p/B".to_string()]);
        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["name"], "app");
        assert_eq!(json["classes"], 1);
        assert_eq!(json["counters"]["class"]["missed"], 1);
        assert_eq!(json["packages"][0]["name"], "p");
        assert_eq!(json["no_match"][0], "p/B");
        assert!(json["probe_mode"].is_null());
        assert_eq!(json["counters"]["instruction"]["executions"], 0);
    }

    #[test]
    fn test_summary_reports_count_mode() {
        let bundle = BundleCoverage::from_classes(
            "app",
            vec![ClassCoverage::new("p/A", 1, false).with_probe_mode(Some(ProbeMode::Count))],
            Vec::new(),
        );
        let json = serde_json::to_value(AnalyzeSummary::new(&bundle, Vec::new())).unwrap();
        assert_eq!(json["probe_mode"], "count");
    }
}
