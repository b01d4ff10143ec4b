//! Recorded probes of one class.

use super::probes::ProbeArray;
use crate::config::ProbeMode;
use crate::result::{CoverageError, CoverageResult};

/// Probe array of one class, identified by class id and name
#[derive(Debug)]
pub struct ExecutionData {
    id: u64,
    name: String,
    probes: ProbeArray,
}

impl ExecutionData {
    /// Zeroed entry
    #[must_use]
    pub fn new(id: u64, name: impl Into<String>, probe_count: usize, mode: ProbeMode) -> Self {
        Self::with_probes(id, name, ProbeArray::new(mode, probe_count))
    }

    /// Entry with existing probe values
    #[must_use]
    pub fn with_probes(id: u64, name: impl Into<String>, probes: ProbeArray) -> Self {
        Self {
            id,
            name: name.into(),
            probes,
        }
    }

    /// Class id
    #[must_use]
    pub const fn id(&self) -> u64 {
        self.id
    }

    /// Class name (internal form)
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The probe array
    #[must_use]
    pub const fn probes(&self) -> &ProbeArray {
        &self.probes
    }

    /// Number of probes
    #[must_use]
    pub fn probe_count(&self) -> usize {
        self.probes.len()
    }

    /// Whether any probe fired
    #[must_use]
    pub fn has_hits(&self) -> bool {
        self.probes.has_hits()
    }

    /// Zero every probe
    pub fn reset(&self) {
        self.probes.reset();
    }

    /// Independent copy
    #[must_use]
    pub fn snapshot(&self) -> Self {
        Self::with_probes(self.id, self.name.clone(), self.probes.snapshot())
    }

    /// Fail unless `other` describes the same class with the same probe layout
    pub fn check_compatible(&self, other: &Self) -> CoverageResult<()> {
        self.check_shape(other.id, &other.name, other.probe_count(), other.probes.mode())
    }

    pub(crate) fn check_shape(
        &self,
        id: u64,
        name: &str,
        probe_count: usize,
        mode: ProbeMode,
    ) -> CoverageResult<()> {
        if self.id != id {
            return Err(CoverageError::mismatch(format!(
                "different class ids {:016x} and {id:016x}",
                self.id
            )));
        }
        if self.name != name {
            return Err(CoverageError::mismatch(format!(
                "different class names {} and {name} for {id:016x}",
                self.name
            )));
        }
        if self.probe_count() != probe_count || self.probes.mode() != mode {
            return Err(CoverageError::mismatch(format!(
                "incompatible execution data for class {name} with id {id:016x}"
            )));
        }
        Ok(())
    }

    /// Combine `other` into this entry after checking compatibility
    pub fn merge(&self, other: &Self, additive: bool) -> CoverageResult<()> {
        self.check_compatible(other)?;
        self.probes.merge(&other.probes, additive);
        Ok(())
    }
}
