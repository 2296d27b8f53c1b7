//! Ingestion pipeline.
//!
//! Manual submission and the sampling loop both end up here. Each subject has
//! its own mutex so concurrent writers for one subject are serialized while
//! different subjects proceed in parallel. Publishing happens under that mutex
//! so observers see a subject's reading and alert events in ingestion order.

use std::sync::{Arc, Mutex, PoisonError};

use serde::Serialize;

use crate::alert::Alert;
use crate::classifier::AlertDecision;
use crate::error::{HemoError, HemoResult, ValidationError};
use crate::hub::MonitorEvent;
use crate::reading::{Reading, SubjectId};
use crate::session::SessionId;

use super::MonitorEngine;

/// What happened to one ingested reading.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IngestOutcome {
    pub reading: Reading,
    #[serde(skip)]
    pub decision: AlertDecision,
    pub alert: Option<Alert>,
    /// Readings evicted from the ledger by this append.
    pub evicted: usize,
    /// Observer deliveries across the published events.
    pub delivered: usize,
}

impl MonitorEngine {
    /// Accepts a reading submitted outside the sampling loop.
    ///
    /// # Errors
    ///
    /// `InvalidReading` for negative or non-finite values, `SubjectMismatch`
    /// when the reading names another subject, `SubjectNotFound` for subjects
    /// the registry does not know.
    pub fn submit_reading(&self, subject: &SubjectId, reading: Reading) -> HemoResult<IngestOutcome> {
        reading.validate()?;
        if reading.subject_id() != subject {
            return Err(ValidationError::SubjectMismatch {
                expected: subject.to_string(),
                actual: reading.subject_id().to_string(),
            }
            .into());
        }
        self.ensure_known(subject)?;
        self.ingest(reading)
    }

    /// Ingests a reading sampled for `session`, folding it into the session rollups.
    ///
    /// Rollups only move once the reading has been stored and broadcast.
    ///
    /// # Errors
    ///
    /// As [`submit_reading`](Self::submit_reading), plus `SessionNotFound`.
    pub fn ingest_sampled(&self, session: SessionId, reading: Reading) -> HemoResult<IngestOutcome> {
        reading.validate()?;
        self.ensure_known(reading.subject_id())?;
        let outcome = self.ingest(reading)?;
        self.sessions.record(session, &outcome.reading, outcome.decision.level)?;
        Ok(outcome)
    }

    pub(crate) fn ingest(&self, reading: Reading) -> HemoResult<IngestOutcome> {
        let lock = self.subject_lock(reading.subject_id())?;
        // The mutex guards no data, so a panic while it was held leaves nothing torn.
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);

        let points = self.classifier.escalation_policy().history_points;
        let history = self.ledger.tail(reading.subject_id(), points)?;
        let decision = self.classifier.evaluate(&reading, &history);
        let alert = self.classifier.alert_for(&reading, &decision);

        // Raise before storing: a rejected alert leaves the ledger untouched.
        if let Some(alert) = &alert {
            self.alerts.raise(alert.clone())?;
            tracing::info!(
                subject = %reading.subject_id(),
                alert_id = %alert.alert_id,
                level = alert.severity_level_at_trigger.as_str(),
                severity = alert.alert_severity.as_str(),
                escalated = decision.escalated,
                "alert raised"
            );
        }

        let evicted = self.ledger.append(reading.clone())?;
        tracing::debug!(
            subject = %reading.subject_id(),
            loss_ml = reading.cumulative_loss_ml(),
            rate = reading.rate_ml_per_min(),
            level = decision.level.as_str(),
            "reading ingested"
        );

        let mut delivered = self.hub.publish(&MonitorEvent::Reading(reading.clone()))?.delivered;
        if let Some(alert) = &alert {
            delivered += self.hub.publish(&MonitorEvent::Alert(alert.clone()))?.delivered;
        }

        Ok(IngestOutcome {
            reading,
            decision,
            alert,
            evicted,
            delivered,
        })
    }

    fn subject_lock(&self, subject: &SubjectId) -> HemoResult<Arc<Mutex<()>>> {
        let mut locks = self
            .subject_locks
            .lock()
            .map_err(|_| HemoError::internal("poisoned lock: engine.subject_locks"))?;
        Ok(Arc::clone(locks.entry(subject.clone()).or_default()))
    }
}
