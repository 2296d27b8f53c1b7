//! Physical-sensor adapter.
//!
//! Probes report cumulative volume only. The bleeding rate is estimated by
//! regressing the subject's ledger readings from the last five minutes
//! together with the fresh sample.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::ledger::SubjectLedger;
use crate::reading::{RawSensorFields, Reading, SubjectId};

use super::regression;
use super::{ReadingSource, SourceMode};

/// Regression window used for rate estimation.
pub const RATE_WINDOW_SECS: u64 = 5 * 60;

/// A raw volume sample from hardware.
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeSample {
    pub volume_ml: f64,
    pub sensor_id: Option<String>,
}

/// Hardware access. `None` means the device is not ready.
pub trait SensorProbe: Send + Sync {
    fn sample(&self, subject: &SubjectId) -> Option<ProbeSample>;
}

/// [`ReadingSource`] backed by a [`SensorProbe`].
pub struct SensorSource {
    probe: Arc<dyn SensorProbe>,
    ledger: Arc<SubjectLedger>,
}

impl SensorSource {
    pub fn new(probe: Arc<dyn SensorProbe>, ledger: Arc<SubjectLedger>) -> Self {
        Self { probe, ledger }
    }

    pub fn read_at(&self, subject: &SubjectId, now: DateTime<Utc>) -> Option<Reading> {
        let sample = self.probe.sample(subject)?;

        let history = match self.ledger.recent_window_at(subject, RATE_WINDOW_SECS, now) {
            Ok(h) => h,
            Err(e) => {
                tracing::warn!(subject = %subject, error = %e, "ledger unavailable for rate estimation");
                Vec::new()
            }
        };

        let mut points: Vec<_> = history.iter().map(|r| (r.timestamp(), r.cumulative_loss_ml())).collect();
        points.push((now, sample.volume_ml));
        let rate = regression::estimate_rate(&points, now).unwrap_or(0.0);

        let raw = RawSensorFields {
            sensor_id: sample.sensor_id,
            raw_volume_ml: Some(sample.volume_ml),
            regression_points: Some(points.len()),
        };

        match Reading::new(subject.clone(), now, sample.volume_ml, rate) {
            Ok(reading) => Some(reading.with_raw(raw)),
            Err(e) => {
                tracing::warn!(subject = %subject, error = %e, "discarding invalid probe sample");
                None
            }
        }
    }
}

impl std::fmt::Debug for SensorSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SensorSource").finish_non_exhaustive()
    }
}

impl ReadingSource for SensorSource {
    fn read(&self, subject: &SubjectId) -> Option<Reading> {
        self.read_at(subject, Utc::now())
    }

    fn mode(&self) -> SourceMode {
        SourceMode::Production
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use chrono::Duration;

    use super::*;

    struct FixedProbe(Mutex<Option<f64>>);

    impl SensorProbe for FixedProbe {
        fn sample(&self, _subject: &SubjectId) -> Option<ProbeSample> {
            let v = *self.0.lock().unwrap();
            v.map(|volume_ml| ProbeSample {
                volume_ml,
                sensor_id: Some("pico-01".to_string()),
            })
        }
    }

    fn subject() -> SubjectId {
        SubjectId::new("p1").unwrap()
    }

    #[test]
    fn rate_comes_from_recent_history() {
        let ledger = Arc::new(SubjectLedger::default());
        let now = Utc::now();
        for m in (1..=4).rev() {
            let r = Reading::new(subject(), now - Duration::minutes(m), 200.0 - 12.0 * m as f64, 0.0).unwrap();
            ledger.append_at(r, now).unwrap();
        }
        // An old point outside the five-minute window must not influence the slope.
        ledger
            .append_at(Reading::new(subject(), now - Duration::minutes(20), 0.0, 0.0).unwrap(), now)
            .unwrap();

        let source = SensorSource::new(Arc::new(FixedProbe(Mutex::new(Some(200.0)))), Arc::clone(&ledger));
        let reading = source.read_at(&subject(), now).unwrap();

        assert!((reading.rate_ml_per_min() - 12.0).abs() < 1e-6);
        let raw = reading.raw().cloned().unwrap();
        assert_eq!(raw.regression_points, Some(5));
        assert_eq!(raw.sensor_id.as_deref(), Some("pico-01"));
    }

    #[test]
    fn first_sample_has_zero_rate() {
        let ledger = Arc::new(SubjectLedger::default());
        let source = SensorSource::new(Arc::new(FixedProbe(Mutex::new(Some(30.0)))), ledger);
        let reading = source.read(&subject()).unwrap();
        assert_eq!(reading.rate_ml_per_min(), 0.0);
        assert_eq!(source.mode(), SourceMode::Production);
    }

    #[test]
    fn silent_probe_yields_none() {
        let ledger = Arc::new(SubjectLedger::default());
        let source = SensorSource::new(Arc::new(FixedProbe(Mutex::new(None))), ledger);
        assert!(source.read(&subject()).is_none());
    }

    #[test]
    fn negative_probe_volume_is_discarded() {
        let ledger = Arc::new(SubjectLedger::default());
        let source = SensorSource::new(Arc::new(FixedProbe(Mutex::new(Some(-4.0)))), ledger);
        assert!(source.read(&subject()).is_none());
    }
}
