//! Registry of execution data keyed by class id.
//!
//! Only the registration map is locked. Probe arrays are handed out as
//! `Arc`s, so running code records hits without touching the lock.

use super::execution_data::ExecutionData;
use super::io::ExecDataVisitor;
use crate::config::ProbeMode;
use crate::result::CoverageResult;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::debug;

#[derive(Debug, Default)]
struct StoreInner {
    entries: HashMap<u64, Arc<ExecutionData>>,
    names: HashSet<String>,
}

/// Thread-safe execution data table
#[derive(Debug, Default)]
pub struct ExecutionDataStore {
    inner: RwLock<StoreInner>,
}

impl ExecutionDataStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, StoreInner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, StoreInner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Entry for a class id
    #[must_use]
    pub fn get(&self, id: u64) -> Option<Arc<ExecutionData>> {
        self.read().entries.get(&id).cloned()
    }

    /// Whether any entry carries this class name
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.read().names.contains(name)
    }

    /// Existing entry for `id`, or a new zeroed one
    ///
    /// Concurrent first calls for the same id return the same entry. Fails if
    /// an entry exists whose name, length or mode differ.
    pub fn get_or_create(
        &self,
        id: u64,
        name: &str,
        probe_count: usize,
        mode: ProbeMode,
    ) -> CoverageResult<Arc<ExecutionData>> {
        if let Some(existing) = self.get(id) {
            existing.check_shape(id, name, probe_count, mode)?;
            return Ok(existing);
        }
        let mut inner = self.write();
        if let Some(existing) = inner.entries.get(&id) {
            existing.check_shape(id, name, probe_count, mode)?;
            return Ok(Arc::clone(existing));
        }
        debug!(class = name, id = format_args!("{id:016x}"), probe_count, "registering probes");
        let data = Arc::new(ExecutionData::new(id, name, probe_count, mode));
        let _ = inner.entries.insert(id, Arc::clone(&data));
        let _ = inner.names.insert(name.to_string());
        Ok(data)
    }

    /// Insert an entry, or merge it additively into the existing one
    pub fn put(&self, data: ExecutionData) -> CoverageResult<()> {
        let mut inner = self.write();
        if let Some(existing) = inner.entries.get(&data.id()) {
            return existing.merge(&data, true);
        }
        let _ = inner.names.insert(data.name().to_string());
        let _ = inner.entries.insert(data.id(), Arc::new(data));
        Ok(())
    }

    /// Combine every entry of `other` into this store
    ///
    /// Additive merges OR/sum; subtractive merges clear/subtract and never
    /// add entries. All shared entries are checked before anything changes,
    /// so a mismatch leaves this store untouched.
    pub fn merge(&self, other: &Self, additive: bool) -> CoverageResult<()> {
        let incoming: Vec<Arc<ExecutionData>> = other.contents();
        let mut inner = self.write();
        for data in &incoming {
            if let Some(existing) = inner.entries.get(&data.id()) {
                existing.check_compatible(data)?;
            }
        }
        for data in incoming {
            match inner.entries.get(&data.id()) {
                Some(existing) => existing.probes().merge(data.probes(), additive),
                None if additive => {
                    let _ = inner.names.insert(data.name().to_string());
                    let _ = inner.entries.insert(data.id(), Arc::new(data.snapshot()));
                }
                None => {}
            }
        }
        Ok(())
    }

    /// Subtract `other` from this store
    pub fn subtract(&self, other: &Self) -> CoverageResult<()> {
        self.merge(other, false)
    }

    /// Zero every probe, keeping the entries
    pub fn reset(&self) {
        for data in self.read().entries.values() {
            data.reset();
        }
    }

    /// All entries ordered by name, then id
    #[must_use]
    pub fn contents(&self) -> Vec<Arc<ExecutionData>> {
        let mut contents: Vec<_> = self.read().entries.values().cloned().collect();
        contents.sort_by(|a, b| a.name().cmp(b.name()).then(a.id().cmp(&b.id())));
        contents
    }

    /// Number of entries
    #[must_use]
    pub fn len(&self) -> usize {
        self.read().entries.len()
    }

    /// Whether the store has no entries
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Feed every entry to a visitor, in [`Self::contents`] order
    pub fn accept(&self, visitor: &mut dyn ExecDataVisitor) -> CoverageResult<()> {
        for data in self.contents() {
            visitor.visit_class_execution(&data)?;
        }
        Ok(())
    }
}

impl ExecDataVisitor for ExecutionDataStore {
    fn visit_class_execution(&mut self, data: &ExecutionData) -> CoverageResult<()> {
        self.put(data.snapshot())
    }
}
