//! Session metadata recorded alongside execution data.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// One recording session: an id plus start and dump timestamps (epoch millis)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionInfo {
    /// Free-text session id
    pub id: String,
    /// Start of recording
    pub start: i64,
    /// Time the data was dumped
    pub dump: i64,
}

impl SessionInfo {
    /// Create session info
    #[must_use]
    pub fn new(id: impl Into<String>, start: i64, dump: i64) -> Self {
        Self {
            id: id.into(),
            start,
            dump,
        }
    }

    /// Start as a timestamp
    #[must_use]
    pub fn start_time(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_millis_opt(self.start).single()
    }

    /// Dump as a timestamp
    #[must_use]
    pub fn dump_time(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_millis_opt(self.dump).single()
    }
}

/// Sessions collected from one or more streams
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionInfoStore {
    infos: Vec<SessionInfo>,
}

impl SessionInfoStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a session
    pub fn add(&mut self, info: SessionInfo) {
        self.infos.push(info);
    }

    /// Whether no session was recorded
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.infos.is_empty()
    }

    /// Sessions ordered by start time
    #[must_use]
    pub fn infos(&self) -> Vec<SessionInfo> {
        let mut infos = self.infos.clone();
        infos.sort_by_key(|i| (i.start, i.dump));
        infos
    }

    /// One session spanning all recorded ones: earliest start, latest dump
    ///
    /// With no sessions both timestamps are 0.
    #[must_use]
    pub fn merged_info(&self, id: impl Into<String>) -> SessionInfo {
        let start = self.infos.iter().map(|i| i.start).min().unwrap_or(0);
        let dump = self.infos.iter().map(|i| i.dump).max().unwrap_or(0);
        SessionInfo::new(id, start, dump)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merged_info_spans_sessions() {
        let mut store = SessionInfoStore::new();
        store.add(SessionInfo::new("b", 200, 300));
        store.add(SessionInfo::new("a", 100, 150));
        let merged = store.merged_info("all");
        assert_eq!(merged, SessionInfo::new("all", 100, 300));
        assert_eq!(store.infos()[0].id, "a");
    }

    #[test]
    fn test_empty_merge() {
        let merged = SessionInfoStore::new().merged_info("x");
        assert_eq!((merged.start, merged.dump), (0, 0));
    }

    #[test]
    fn test_timestamps() {
        let info = SessionInfo::new("s", 1_700_000_000_000, 1_700_000_001_000);
        let start = info.start_time();
        assert!(start.is_some());
        assert!(info.dump_time() > start);
    }
}
