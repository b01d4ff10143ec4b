//! Instrumentation and analysis configuration.

use crate::result::CoverageResult;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Default class providing the offline runtime accessor
pub const DEFAULT_RUNTIME_CLASS: &str = "probecov/runtime/Offline";

/// How probes record execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbeMode {
    /// One flag per probe (`boolean[]`)
    #[default]
    Exists,
    /// One hit counter per probe (`AtomicIntegerArray`)
    Count,
}

impl ProbeMode {
    /// Field descriptor of the probe array
    #[must_use]
    pub const fn descriptor(self) -> &'static str {
        match self {
            Self::Exists => "[Z",
            Self::Count => "Ljava/util/concurrent/atomic/AtomicIntegerArray;",
        }
    }

    /// Internal name usable in a class constant (`checkcast`, frames)
    #[must_use]
    pub const fn class_name(self) -> &'static str {
        match self {
            Self::Exists => "[Z",
            Self::Count => "java/util/concurrent/atomic/AtomicIntegerArray",
        }
    }

    /// Tag byte in execution data streams
    #[must_use]
    pub const fn tag(self) -> u8 {
        match self {
            Self::Exists => 0,
            Self::Count => 1,
        }
    }

    /// Mode for a stream tag byte
    #[must_use]
    pub const fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(Self::Exists),
            1 => Some(Self::Count),
            _ => None,
        }
    }
}

/// Instrumentation configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InstrumentConfig {
    /// Probe array representation
    pub probe_mode: ProbeMode,
    /// Class whose static accessor hands out probe arrays
    pub runtime_class: String,
}

impl InstrumentConfig {
    /// Create a builder for instrumentation config
    #[must_use]
    pub fn builder() -> InstrumentConfigBuilder {
        InstrumentConfigBuilder::default()
    }

    /// Load from a JSON file
    pub fn from_json_file(path: &Path) -> CoverageResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }
}

impl Default for InstrumentConfig {
    fn default() -> Self {
        Self {
            probe_mode: ProbeMode::Exists,
            runtime_class: DEFAULT_RUNTIME_CLASS.to_string(),
        }
    }
}

/// Builder for instrumentation configuration
#[derive(Debug, Default)]
pub struct InstrumentConfigBuilder {
    probe_mode: ProbeMode,
    runtime_class: Option<String>,
}

impl InstrumentConfigBuilder {
    /// Set the probe representation
    #[must_use]
    pub fn probe_mode(mut self, mode: ProbeMode) -> Self {
        self.probe_mode = mode;
        self
    }

    /// Set the runtime accessor class (internal name, `/` separated)
    #[must_use]
    pub fn runtime_class(mut self, name: impl Into<String>) -> Self {
        self.runtime_class = Some(name.into().replace('.', "/"));
        self
    }

    /// Build the configuration
    #[must_use]
    pub fn build(self) -> InstrumentConfig {
        InstrumentConfig {
            probe_mode: self.probe_mode,
            runtime_class: self
                .runtime_class
                .filter(|name| !name.is_empty())
                .unwrap_or_else(|| DEFAULT_RUNTIME_CLASS.to_string()),
        }
    }
}

/// Analysis configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Report compiler-generated classes and methods too
    pub include_synthetic: bool,
}

impl AnalysisConfig {
    /// Create a builder for analysis config
    #[must_use]
    pub fn builder() -> AnalysisConfigBuilder {
        AnalysisConfigBuilder::default()
    }

    /// Load from a JSON file
    pub fn from_json_file(path: &Path) -> CoverageResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }
}

/// Builder for analysis configuration
#[derive(Debug, Default)]
pub struct AnalysisConfigBuilder {
    include_synthetic: bool,
}

impl AnalysisConfigBuilder {
    /// Include synthetic classes and methods
    #[must_use]
    pub fn include_synthetic(mut self, enabled: bool) -> Self {
        self.include_synthetic = enabled;
        self
    }

    /// Build the configuration
    #[must_use]
    pub fn build(self) -> AnalysisConfig {
        AnalysisConfig {
            include_synthetic: self.include_synthetic,
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = InstrumentConfig::default();
        assert_eq!(config.probe_mode, ProbeMode::Exists);
        assert_eq!(config.runtime_class, DEFAULT_RUNTIME_CLASS);
    }

    #[test]
    fn test_builder_normalizes_class_name() {
        let config = InstrumentConfig::builder()
            .probe_mode(ProbeMode::Count)
            .runtime_class("org.example.Rt")
            .build();
        assert_eq!(config.probe_mode, ProbeMode::Count);
        assert_eq!(config.runtime_class, "org/example/Rt");
    }

    #[test]
    fn test_empty_runtime_class_falls_back() {
        let config = InstrumentConfig::builder().runtime_class("").build();
        assert_eq!(config.runtime_class, DEFAULT_RUNTIME_CLASS);
    }

    #[test]
    fn test_mode_tags() {
        for mode in [ProbeMode::Exists, ProbeMode::Count] {
            assert_eq!(ProbeMode::from_tag(mode.tag()), Some(mode));
        }
        assert_eq!(ProbeMode::from_tag(7), None);
    }

    #[test]
    fn test_load_partial_json() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"probe_mode": "count"}}"#).unwrap();
        let config = InstrumentConfig::from_json_file(file.path()).unwrap();
        assert_eq!(config.probe_mode, ProbeMode::Count);
        assert_eq!(config.runtime_class, DEFAULT_RUNTIME_CLASS);
    }

    #[test]
    fn test_analysis_builder() {
        let config = AnalysisConfig::builder().include_synthetic(true).build();
        assert!(config.include_synthetic);
        assert!(!AnalysisConfig::default().include_synthetic);
    }
}
