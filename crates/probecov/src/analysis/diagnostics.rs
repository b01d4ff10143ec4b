//! Analysis diagnostics: Stop vs LogAndContinue
//!
//! A class whose recorded probes belong to another build is still reported,
//! with every probe treated as missed. Two different classes under one name
//! make the whole report untrustworthy, so that one stops the build.

use serde::{Deserialize, Serialize};
use tracing::warn;

/// What the builder does after a diagnostic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DiagnosticAction {
    /// Abort with an error
    Stop,
    /// Record and keep going
    LogAndContinue,
}

/// Something the analysis noticed about the inputs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Diagnostic {
    /// Execution data exists for the class name but not for this build of it
    NoMatch {
        /// Class name
        name: String,
        /// Id of the analyzed bytes
        id: u64,
    },
    /// Two different classes share a name
    DuplicateClass {
        /// Class name
        name: String,
        /// Id already in the report
        existing_id: u64,
        /// Id of the rejected class
        new_id: u64,
    },
}

impl Diagnostic {
    /// Severity
    #[must_use]
    pub const fn action(&self) -> DiagnosticAction {
        match self {
            Self::NoMatch { .. } => DiagnosticAction::LogAndContinue,
            Self::DuplicateClass { .. } => DiagnosticAction::Stop,
        }
    }

    /// Affected class
    #[must_use]
    pub fn class_name(&self) -> &str {
        match self {
            Self::NoMatch { name, .. } | Self::DuplicateClass { name, .. } => name,
        }
    }

    /// Human-readable description
    #[must_use]
    pub fn description(&self) -> String {
        match self {
            Self::NoMatch { name, id } => {
                format!("Execution data for class {name} does not match (id {id:016x})")
            }
            Self::DuplicateClass {
                name,
                existing_id,
                new_id,
            } => format!(
                "Can't add different class with same name: {name} ({existing_id:016x} vs {new_id:016x})"
            ),
        }
    }

    /// Emit the diagnostic as a `tracing` event
    pub fn emit(&self) {
        warn!(
            class = self.class_name(),
            action = ?self.action(),
            "{}",
            self.description()
        );
    }
}

/// Diagnostics collected during one analysis
#[derive(Debug, Default, Clone)]
pub struct DiagnosticLog {
    entries: Vec<Diagnostic>,
}

impl DiagnosticLog {
    /// Create an empty log
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Emit and keep a diagnostic; returns its action
    pub fn record(&mut self, diagnostic: Diagnostic) -> DiagnosticAction {
        diagnostic.emit();
        let action = diagnostic.action();
        self.entries.push(diagnostic);
        action
    }

    /// Number of recorded diagnostics
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing was recorded
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Every diagnostic in record order
    #[must_use]
    pub fn all(&self) -> &[Diagnostic] {
        &self.entries
    }

    /// Names of classes reported as not matching
    #[must_use]
    pub fn no_match(&self) -> Vec<&str> {
        self.entries
            .iter()
            .filter_map(|d| match d {
                Diagnostic::NoMatch { name, .. } => Some(name.as_str()),
                Diagnostic::DuplicateClass { .. } => None,
            })
            .collect()
    }

    /// Whether any diagnostic asks to stop
    #[must_use]
    pub fn has_stop(&self) -> bool {
        self.entries
            .iter()
            .any(|d| d.action() == DiagnosticAction::Stop)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    #[test]
    fn test_action_classification() {
        let no_match = Diagnostic::NoMatch {
            name: "a/A".into(),
            id: 1,
        };
        assert_eq!(no_match.action(), DiagnosticAction::LogAndContinue);
        let duplicate = Diagnostic::DuplicateClass {
            name: "a/A".into(),
            existing_id: 1,
            new_id: 2,
        };
        assert_eq!(duplicate.action(), DiagnosticAction::Stop);
    }

    #[test]
    fn test_description_mentions_class() {
        let d = Diagnostic::NoMatch {
            name: "a/B".into(),
            id: 0xab,
        };
        assert!(d.description().contains("a/B"));
        assert!(d.description().contains("00000000000000ab"));
        assert_eq!(d.class_name(), "a/B");
    }

    #[test]
    fn test_log_records_in_order() {
        let mut log = DiagnosticLog::new();
        assert!(log.is_empty());
        let action = log.record(Diagnostic::NoMatch {
            name: "x".into(),
            id: 1,
        });
        assert_eq!(action, DiagnosticAction::LogAndContinue);
        let _ = log.record(Diagnostic::DuplicateClass {
            name: "y".into(),
            existing_id: 1,
            new_id: 2,
        });
        assert_eq!(log.len(), 2);
        assert_eq!(log.no_match(), ["x"]);
        assert!(log.has_stop());
        assert_eq!(log.all()[1].class_name(), "y");
    }
}
