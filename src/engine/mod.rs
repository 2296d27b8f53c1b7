//! Monitoring engine.
//!
//! `MonitorEngine` owns every piece of monitoring state (ledger, alerts,
//! sessions, observer hub) and exposes the inbound operations and queries.
//! There are no process-wide singletons: construct one engine per deployment
//! and share it behind an `Arc`.

mod ingest;

pub use ingest::IngestOutcome;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::alert::{Alert, AlertId, AlertRegistry};
use crate::classifier::Classifier;
use crate::config::MonitorConfig;
use crate::error::{ExecutionError, HemoResult};
use crate::hub::{BroadcastHub, MonitorEvent, Observer, ObserverId, ObserverStream};
use crate::ledger::{SubjectLedger, TrendStats};
use crate::reading::{Reading, SubjectId};
use crate::session::{MonitoringSession, SessionId, SessionTable};
use crate::severity::SeverityLevel;
use crate::source::{SimulatedSource, SimulationRequest, SourceMode};
use crate::subjects::{OpenRegistry, SubjectRegistry};
use crate::time::TimeRange;

/// Trailing window used for the trend in [`SubjectStatus`].
pub const STATUS_TREND_WINDOW_SECS: u64 = 5 * 60;

/// Default look-back for [`MonitorEngine::history_hours`].
pub const DEFAULT_HISTORY_HOURS: u32 = 24;

/// Current picture of one subject.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubjectStatus {
    pub subject_id: SubjectId,
    pub latest_reading: Option<Reading>,
    pub severity_level: SeverityLevel,
    pub rate_ml_per_min: f64,
    pub active_alerts: Vec<Alert>,
    pub active_sessions: usize,
    pub trend: Option<TrendStats>,
}

/// Readings for a subject over the trailing `time_range_hours`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistoryReport {
    pub subject_id: SubjectId,
    pub time_range_hours: u32,
    pub data_points: usize,
    pub history: Vec<Reading>,
}

/// Liveness summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthReport {
    pub status: &'static str,
    pub timestamp: DateTime<Utc>,
    pub mode: SourceMode,
    pub active_observers: usize,
    pub active_sessions: usize,
    pub tracked_subjects: usize,
}

/// Injectable monitoring state container.
pub struct MonitorEngine {
    config: MonitorConfig,
    classifier: Classifier,
    ledger: Arc<SubjectLedger>,
    alerts: AlertRegistry,
    hub: BroadcastHub,
    sessions: SessionTable,
    subjects: Arc<dyn SubjectRegistry>,
    subject_locks: Mutex<HashMap<SubjectId, Arc<Mutex<()>>>>,
}

impl MonitorEngine {
    /// Creates an engine after validating `config`.
    ///
    /// # Errors
    ///
    /// `InvalidConfig` when thresholds or intervals are inconsistent.
    pub fn new(config: MonitorConfig, subjects: Arc<dyn SubjectRegistry>) -> HemoResult<Self> {
        config.validate()?;
        let classifier = Classifier::from_config(&config)?;
        Ok(Self::build(config, classifier, subjects))
    }

    fn build(config: MonitorConfig, classifier: Classifier, subjects: Arc<dyn SubjectRegistry>) -> Self {
        tracing::info!(mode = %config.mode, "monitor engine created");
        Self {
            classifier,
            ledger: Arc::new(SubjectLedger::new(config.retention_horizon())),
            alerts: AlertRegistry::new(),
            hub: BroadcastHub::new(config.mode),
            sessions: SessionTable::new(),
            subjects,
            subject_locks: Mutex::new(HashMap::new()),
            config,
        }
    }

    #[must_use]
    pub const fn config(&self) -> &MonitorConfig {
        &self.config
    }

    #[must_use]
    pub const fn mode(&self) -> SourceMode {
        self.config.mode
    }

    #[must_use]
    pub const fn classifier(&self) -> &Classifier {
        &self.classifier
    }

    /// Shared handle to the ledger (the sensor adapter regresses over it).
    #[must_use]
    pub const fn ledger(&self) -> &Arc<SubjectLedger> {
        &self.ledger
    }

    #[must_use]
    pub const fn hub(&self) -> &BroadcastHub {
        &self.hub
    }

    #[must_use]
    pub const fn sessions(&self) -> &SessionTable {
        &self.sessions
    }

    /// Opens an active monitoring session for a known subject.
    pub fn start_session(&self, subject: &SubjectId) -> HemoResult<SessionId> {
        self.ensure_known(subject)?;
        let session = self.sessions.open(subject.clone())?;
        tracing::info!(subject = %subject, session = %session.session_id, "session started");
        Ok(session.session_id)
    }

    /// Stops a session. The next sampling cycle skips it; a cycle already
    /// sampling it finishes normally.
    pub fn stop_session(&self, session: SessionId) -> HemoResult<()> {
        if self.sessions.stop(session)? {
            tracing::info!(session = %session, "session stopped");
        }
        Ok(())
    }

    /// Looks up a session, stopped or not.
    pub fn session(&self, session: SessionId) -> HemoResult<MonitoringSession> {
        self.sessions
            .get(session)?
            .ok_or_else(|| ExecutionError::SessionNotFound { id: session.to_string() }.into())
    }

    /// Acknowledges an alert, broadcasting the first acknowledgement only.
    ///
    /// Returns whether the flag changed.
    pub fn acknowledge_alert(&self, alert_id: &AlertId) -> HemoResult<bool> {
        let changed = self.alerts.acknowledge(alert_id)?;
        if changed {
            tracing::info!(alert_id = %alert_id, "alert acknowledged");
            self.hub.publish(&MonitorEvent::AlertAcknowledged {
                alert_id: alert_id.clone(),
            })?;
        }
        Ok(changed)
    }

    pub fn alert(&self, alert_id: &AlertId) -> HemoResult<Alert> {
        self.alerts
            .get(alert_id)?
            .ok_or_else(|| ExecutionError::AlertNotFound { id: alert_id.to_string() }.into())
    }

    /// Alerts in raise order, optionally for one subject and/or unacknowledged only.
    pub fn alerts(&self, subject: Option<&SubjectId>, active_only: bool) -> HemoResult<Vec<Alert>> {
        self.alerts.list(subject, active_only)
    }

    /// Latest reading, its classification and the subject's open alerts.
    pub fn status(&self, subject: &SubjectId) -> HemoResult<SubjectStatus> {
        self.ensure_known(subject)?;
        let latest_reading = self.ledger.latest(subject)?;
        let (severity_level, rate_ml_per_min) = latest_reading.as_ref().map_or((SeverityLevel::Normal, 0.0), |r| {
            (self.classifier.classify_severity(r.cumulative_loss_ml()), r.rate_ml_per_min())
        });
        let active_sessions = self
            .sessions
            .for_subject(subject)?
            .iter()
            .filter(|s| s.is_active())
            .count();

        Ok(SubjectStatus {
            subject_id: subject.clone(),
            latest_reading,
            severity_level,
            rate_ml_per_min,
            active_alerts: self.alerts.list_active(Some(subject))?,
            active_sessions,
            trend: self.ledger.trend(subject, STATUS_TREND_WINDOW_SECS)?,
        })
    }

    /// Retained readings inside `range`, ordered by timestamp.
    pub fn history(&self, subject: &SubjectId, range: &TimeRange) -> HemoResult<Vec<Reading>> {
        self.ensure_known(subject)?;
        self.ledger.range(subject, range)
    }

    /// Readings from the trailing `hours`.
    pub fn history_hours(&self, subject: &SubjectId, hours: u32) -> HemoResult<HistoryReport> {
        let history = self.history(subject, &TimeRange::last_hours(hours))?;
        Ok(HistoryReport {
            subject_id: subject.clone(),
            time_range_hours: hours,
            data_points: history.len(),
            history,
        })
    }

    pub fn health(&self) -> HemoResult<HealthReport> {
        Ok(HealthReport {
            status: "healthy",
            timestamp: Utc::now(),
            mode: self.config.mode,
            active_observers: self.hub.len()?,
            active_sessions: self.sessions.active_count()?,
            tracked_subjects: self.ledger.subjects()?.len(),
        })
    }

    /// Generates a batch of readings and submits each through the manual path.
    ///
    /// # Errors
    ///
    /// `SimulationDisabled` in production mode.
    pub fn simulate_batch(&self, request: &SimulationRequest, source: &SimulatedSource) -> HemoResult<Vec<IngestOutcome>> {
        if self.config.mode != SourceMode::Simulation {
            return Err(ExecutionError::SimulationDisabled.into());
        }
        let readings = source.batch(request, Utc::now());
        tracing::info!(subject = %request.subject_id, points = readings.len(), "batch simulation");
        readings
            .into_iter()
            .map(|reading| self.submit_reading(&request.subject_id, reading))
            .collect()
    }

    /// Attaches an observer; it receives `connection_established` first.
    pub fn attach(&self, observer: Arc<dyn Observer>) -> HemoResult<ObserverId> {
        self.hub.attach(observer)
    }

    pub fn detach(&self, observer: ObserverId) -> HemoResult<bool> {
        self.hub.detach(observer)
    }

    /// Attaches a channel-backed observer with a buffer of `capacity` events.
    pub fn subscribe(&self, capacity: usize) -> HemoResult<ObserverStream> {
        self.hub.subscribe(capacity)
    }

    fn ensure_known(&self, subject: &SubjectId) -> HemoResult<()> {
        if self.subjects.contains(subject)? {
            Ok(())
        } else {
            Err(ExecutionError::SubjectNotFound { id: subject.to_string() }.into())
        }
    }
}

impl Default for MonitorEngine {
    fn default() -> Self {
        Self::build(MonitorConfig::default(), Classifier::default(), Arc::new(OpenRegistry))
    }
}

impl std::fmt::Debug for MonitorEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MonitorEngine")
            .field("mode", &self.config.mode)
            .field("ledger", &self.ledger)
            .finish_non_exhaustive()
    }
}
