//! Monitoring sessions and their rollups.
//!
//! Sessions are never deleted. A subject may have any number of concurrent
//! sessions; each is sampled independently.

use std::collections::HashMap;
use std::fmt;
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{ExecutionError, HemoError, HemoResult};
use crate::reading::{Reading, SubjectId};
use crate::severity::SeverityLevel;

/// Unique identifier for a monitoring session.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(Uuid);

impl SessionId {
    /// Create a new random session id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Wrap an existing UUID.
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle state. `Stopped` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    #[default]
    Created,
    Active,
    Stopped,
}

/// A monitoring session for one subject.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitoringSession {
    pub session_id: SessionId,
    pub subject_id: SubjectId,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub state: SessionState,
    pub reading_count: u64,
    pub max_loss_seen: f64,
    pub max_severity_seen: SeverityLevel,
}

impl MonitoringSession {
    #[must_use]
    pub fn new(subject_id: SubjectId) -> Self {
        Self {
            session_id: SessionId::new(),
            subject_id,
            start_time: Utc::now(),
            end_time: None,
            state: SessionState::Created,
            reading_count: 0,
            max_loss_seen: 0.0,
            max_severity_seen: SeverityLevel::Normal,
        }
    }

    #[must_use]
    pub const fn is_active(&self) -> bool {
        matches!(self.state, SessionState::Active)
    }

    /// Folds a sampled reading into the rollups.
    pub fn record(&mut self, reading: &Reading, level: SeverityLevel) {
        self.reading_count += 1;
        self.max_loss_seen = self.max_loss_seen.max(reading.cumulative_loss_ml());
        self.max_severity_seen = self.max_severity_seen.max(level);
    }
}

fn lock_err(context: &'static str) -> HemoError {
    HemoError::internal(format!("poisoned lock: {context}"))
}

/// All sessions the engine knows about.
#[derive(Debug, Default)]
pub struct SessionTable {
    sessions: RwLock<HashMap<SessionId, MonitoringSession>>,
}

impl SessionTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates and activates a session for `subject`.
    pub fn open(&self, subject: SubjectId) -> HemoResult<MonitoringSession> {
        let mut session = MonitoringSession::new(subject);
        session.state = SessionState::Active;
        let mut sessions = self.sessions.write().map_err(|_| lock_err("sessions.open"))?;
        sessions.insert(session.session_id, session.clone());
        Ok(session)
    }

    /// Moves a session to `Stopped`.
    ///
    /// Returns `false` if it was already stopped.
    pub fn stop(&self, id: SessionId) -> HemoResult<bool> {
        let mut sessions = self.sessions.write().map_err(|_| lock_err("sessions.stop"))?;
        let session = sessions
            .get_mut(&id)
            .ok_or_else(|| ExecutionError::SessionNotFound { id: id.to_string() })?;
        if session.state == SessionState::Stopped {
            return Ok(false);
        }
        session.state = SessionState::Stopped;
        session.end_time = Some(Utc::now());
        Ok(true)
    }

    /// Applies a sampled reading to a session's rollups.
    ///
    /// Works on stopped sessions too so an in-flight cycle can finish.
    pub fn record(&self, id: SessionId, reading: &Reading, level: SeverityLevel) -> HemoResult<()> {
        let mut sessions = self.sessions.write().map_err(|_| lock_err("sessions.record"))?;
        let session = sessions
            .get_mut(&id)
            .ok_or_else(|| ExecutionError::SessionNotFound { id: id.to_string() })?;
        session.record(reading, level);
        Ok(())
    }

    pub fn get(&self, id: SessionId) -> HemoResult<Option<MonitoringSession>> {
        let sessions = self.sessions.read().map_err(|_| lock_err("sessions.get"))?;
        Ok(sessions.get(&id).cloned())
    }

    /// Snapshot of sessions to sample this cycle, oldest first.
    pub fn active(&self) -> HemoResult<Vec<MonitoringSession>> {
        let sessions = self.sessions.read().map_err(|_| lock_err("sessions.active"))?;
        let mut out: Vec<_> = sessions.values().filter(|s| s.is_active()).cloned().collect();
        out.sort_by_key(|s| s.start_time);
        Ok(out)
    }

    pub fn for_subject(&self, subject: &SubjectId) -> HemoResult<Vec<MonitoringSession>> {
        let sessions = self.sessions.read().map_err(|_| lock_err("sessions.for_subject"))?;
        let mut out: Vec<_> = sessions.values().filter(|s| &s.subject_id == subject).cloned().collect();
        out.sort_by_key(|s| s.start_time);
        Ok(out)
    }

    pub fn active_count(&self) -> HemoResult<usize> {
        let sessions = self.sessions.read().map_err(|_| lock_err("sessions.active_count"))?;
        Ok(sessions.values().filter(|s| s.is_active()).count())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn subject() -> SubjectId {
        SubjectId::new("p1").unwrap()
    }

    #[test]
    fn rollups_track_maxima() {
        let mut session = MonitoringSession::new(subject());
        session.record(&Reading::now(subject(), 300.0, 1.0).unwrap(), SeverityLevel::Moderate);
        session.record(&Reading::now(subject(), 120.0, 1.0).unwrap(), SeverityLevel::Minor);
        assert_eq!(session.reading_count, 2);
        assert_eq!(session.max_loss_seen, 300.0);
        assert_eq!(session.max_severity_seen, SeverityLevel::Moderate);
    }

    #[test]
    fn stop_is_terminal_and_idempotent() {
        let table = SessionTable::new();
        let session = table.open(subject()).unwrap();
        assert!(session.is_active());
        assert_eq!(table.active_count().unwrap(), 1);

        assert!(table.stop(session.session_id).unwrap());
        assert!(!table.stop(session.session_id).unwrap());

        let stored = table.get(session.session_id).unwrap().unwrap();
        assert_eq!(stored.state, SessionState::Stopped);
        assert!(stored.end_time.is_some());
        assert!(table.active().unwrap().is_empty());
    }

    #[test]
    fn unknown_session_is_not_found() {
        let table = SessionTable::new();
        let err = table.stop(SessionId::new()).unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn concurrent_sessions_per_subject_are_allowed() {
        let table = SessionTable::new();
        let a = table.open(subject()).unwrap();
        let b = table.open(subject()).unwrap();
        assert_ne!(a.session_id, b.session_id);
        assert_eq!(table.for_subject(&subject()).unwrap().len(), 2);
    }
}
