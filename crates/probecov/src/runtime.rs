//! Runtime side of instrumented code.
//!
//! Instrumented classes call an accessor once per class load to obtain their
//! probe array. [`RuntimeData`] is the registry behind that accessor: it owns
//! an [`ExecutionDataStore`] and the current session, and is passed
//! explicitly to whoever hosts instrumented code.

use crate::config::ProbeMode;
use crate::data::{ExecDataVisitor, ExecutionData, ExecutionDataStore, SessionInfo};
use crate::result::CoverageResult;
use chrono::Utc;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::debug;
use uuid::Uuid;

/// Hands out the probe array of a class to its instrumented code
pub trait ProbeArrayAccessor: Send + Sync {
    /// Probe array for `(id, name, probe_count)`, created on first use
    fn probes(&self, id: u64, name: &str, probe_count: usize)
        -> CoverageResult<Arc<ExecutionData>>;
}

#[derive(Debug)]
struct Session {
    id: String,
    start: i64,
}

impl Session {
    fn begin(id: String) -> Self {
        Self {
            id,
            start: Utc::now().timestamp_millis(),
        }
    }
}

/// Explicit runtime registry
#[derive(Debug)]
pub struct RuntimeData {
    store: ExecutionDataStore,
    mode: ProbeMode,
    session: Mutex<Session>,
}

impl Default for RuntimeData {
    fn default() -> Self {
        Self::new(ProbeMode::default())
    }
}

impl RuntimeData {
    /// Registry with a generated session id
    #[must_use]
    pub fn new(mode: ProbeMode) -> Self {
        Self::with_session_id(mode, format!("probecov-{}", Uuid::new_v4()))
    }

    /// Registry with a caller-chosen session id
    #[must_use]
    pub fn with_session_id(mode: ProbeMode, session_id: impl Into<String>) -> Self {
        Self {
            store: ExecutionDataStore::new(),
            mode,
            session: Mutex::new(Session::begin(session_id.into())),
        }
    }

    /// Probe representation handed out by this registry
    #[must_use]
    pub const fn mode(&self) -> ProbeMode {
        self.mode
    }

    /// The underlying store
    #[must_use]
    pub const fn store(&self) -> &ExecutionDataStore {
        &self.store
    }

    /// Current session id
    #[must_use]
    pub fn session_id(&self) -> String {
        self.lock_session().id.clone()
    }

    /// Rename the current session
    pub fn set_session_id(&self, id: impl Into<String>) {
        self.lock_session().id = id.into();
    }

    fn lock_session(&self) -> std::sync::MutexGuard<'_, Session> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Emit the session record followed by every entry
    ///
    /// With `reset`, probes are zeroed afterwards and a new session starts
    /// at the dump time.
    pub fn collect(&self, visitor: &mut dyn ExecDataVisitor, reset: bool) -> CoverageResult<()> {
        let mut session = self.lock_session();
        let dump = Utc::now().timestamp_millis();
        visitor.visit_session_info(&SessionInfo::new(session.id.clone(), session.start, dump))?;
        self.store.accept(visitor)?;
        if reset {
            debug!(session = %session.id, "resetting execution data");
            self.store.reset();
            session.start = dump;
        }
        Ok(())
    }

    /// Zero every probe and restart the session clock
    pub fn reset(&self) {
        let mut session = self.lock_session();
        self.store.reset();
        session.start = Utc::now().timestamp_millis();
    }
}

impl ProbeArrayAccessor for RuntimeData {
    fn probes(
        &self,
        id: u64,
        name: &str,
        probe_count: usize,
    ) -> CoverageResult<Arc<ExecutionData>> {
        self.store.get_or_create(id, name, probe_count, self.mode)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use crate::data::{ExecDataReader, ExecDataWriter, ExecFileLoader};
    use std::io::Cursor;

    #[test]
    fn test_accessor_shares_arrays() {
        let runtime = RuntimeData::new(ProbeMode::Exists);
        let a = runtime.probes(1, "a/A", 2).unwrap();
        let b = runtime.probes(1, "a/A", 2).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert!(runtime.probes(1, "a/A", 3).is_err());
    }

    #[test]
    fn test_session_ids_are_unique() {
        let a = RuntimeData::default();
        let b = RuntimeData::default();
        assert_ne!(a.session_id(), b.session_id());
        assert!(a.session_id().starts_with("probecov-"));
    }

    #[test]
    fn test_collect_with_reset() {
        let runtime = RuntimeData::with_session_id(ProbeMode::Count, "unit");
        let data = runtime.probes(9, "a/A", 1).unwrap();
        data.probes().hit(0);
        data.probes().hit(0);

        let mut writer = ExecDataWriter::new(Vec::new()).unwrap();
        runtime.collect(&mut writer, true).unwrap();
        assert!(!data.has_hits());

        let mut loader = ExecFileLoader::new();
        ExecDataReader::new(Cursor::new(writer.into_inner()))
            .read(&mut loader)
            .unwrap();
        assert_eq!(loader.sessions().infos()[0].id, "unit");
        assert_eq!(loader.store().get(9).unwrap().probes().counts(), vec![2]);
    }
}
