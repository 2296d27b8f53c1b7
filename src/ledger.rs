//! Per-subject reading history with a retention horizon.
//!
//! History is kept in arrival order. Timestamps are not required to be
//! monotonic (manual backfill may interleave with sampled readings), so
//! eviction scans the whole deque rather than trimming the front only.

use std::collections::{HashMap, VecDeque};
use std::sync::RwLock;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{HemoError, HemoResult};
use crate::reading::{Reading, SubjectId};
use crate::source::regression;
use crate::time::TimeRange;

fn lock_err(context: &'static str) -> HemoError {
    HemoError::internal(format!("poisoned lock: {context}"))
}

/// Summary of a subject's recent trajectory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendStats {
    pub samples: usize,
    pub first_loss_ml: f64,
    pub last_loss_ml: f64,
    pub loss_delta_ml: f64,
    pub mean_rate_ml_per_min: f64,
    pub peak_rate_ml_per_min: f64,
    /// Least-squares loss slope over the window, clamped to >= 0.
    pub regression_rate_ml_per_min: Option<f64>,
}

/// Owns the bounded history of every subject.
#[derive(Debug)]
pub struct SubjectLedger {
    horizon: Duration,
    state: RwLock<HashMap<SubjectId, VecDeque<Reading>>>,
}

impl SubjectLedger {
    /// Creates a ledger evicting readings older than `retention_horizon`.
    #[must_use]
    pub fn new(retention_horizon: StdDuration) -> Self {
        let horizon = Duration::from_std(retention_horizon).unwrap_or_else(|_| Duration::days(365 * 100));
        Self {
            horizon,
            state: RwLock::new(HashMap::new()),
        }
    }

    #[must_use]
    pub const fn retention_horizon(&self) -> Duration {
        self.horizon
    }

    /// Appends a reading and evicts anything older than the horizon.
    ///
    /// Returns the number of evicted readings.
    pub fn append(&self, reading: Reading) -> HemoResult<usize> {
        self.append_at(reading, Utc::now())
    }

    /// [`SubjectLedger::append`] with an explicit notion of "now".
    pub fn append_at(&self, reading: Reading, now: DateTime<Utc>) -> HemoResult<usize> {
        let mut state = self.state.write().map_err(|_| lock_err("ledger.append"))?;
        let history = state.entry(reading.subject_id().clone()).or_default();
        history.push_back(reading);

        let cutoff = now.checked_sub_signed(self.horizon).unwrap_or(DateTime::<Utc>::MIN_UTC);
        let before = history.len();
        history.retain(|r| r.timestamp() >= cutoff);
        Ok(before - history.len())
    }

    /// Readings no older than `seconds`, in arrival order.
    pub fn recent_window(&self, subject: &SubjectId, seconds: u64) -> HemoResult<Vec<Reading>> {
        self.recent_window_at(subject, seconds, Utc::now())
    }

    pub fn recent_window_at(
        &self,
        subject: &SubjectId,
        seconds: u64,
        now: DateTime<Utc>,
    ) -> HemoResult<Vec<Reading>> {
        let secs = i64::try_from(seconds).unwrap_or(i64::MAX).min(i64::MAX / 1_000);
        let window = Duration::seconds(secs);
        self.collect(subject, "ledger.recent_window", |r| now - r.timestamp() <= window)
    }

    /// The last `n` readings in arrival order.
    pub fn tail(&self, subject: &SubjectId, n: usize) -> HemoResult<Vec<Reading>> {
        let state = self.state.read().map_err(|_| lock_err("ledger.tail"))?;
        Ok(state
            .get(subject)
            .map(|h| h.iter().skip(h.len().saturating_sub(n)).cloned().collect())
            .unwrap_or_default())
    }

    /// Most recently appended reading.
    pub fn latest(&self, subject: &SubjectId) -> HemoResult<Option<Reading>> {
        let state = self.state.read().map_err(|_| lock_err("ledger.latest"))?;
        Ok(state.get(subject).and_then(|h| h.back().cloned()))
    }

    /// Readings whose timestamp falls in `range`, ordered by timestamp.
    pub fn range(&self, subject: &SubjectId, range: &TimeRange) -> HemoResult<Vec<Reading>> {
        let mut out = self.collect(subject, "ledger.range", |r| range.contains(r.timestamp()))?;
        out.sort_by_key(|r| r.timestamp());
        Ok(out)
    }

    /// Trend over the trailing `seconds`, or `None` when the window is empty.
    pub fn trend(&self, subject: &SubjectId, seconds: u64) -> HemoResult<Option<TrendStats>> {
        self.trend_at(subject, seconds, Utc::now())
    }

    pub fn trend_at(
        &self,
        subject: &SubjectId,
        seconds: u64,
        now: DateTime<Utc>,
    ) -> HemoResult<Option<TrendStats>> {
        let mut window = self.recent_window_at(subject, seconds, now)?;
        window.sort_by_key(|r| r.timestamp());
        let (Some(first), Some(last)) = (window.first(), window.last()) else {
            return Ok(None);
        };

        #[allow(clippy::cast_precision_loss)]
        let mean_rate = window.iter().map(|r| r.rate_ml_per_min()).sum::<f64>() / window.len() as f64;
        let peak_rate = window.iter().map(|r| r.rate_ml_per_min()).fold(0.0_f64, f64::max);
        let points: Vec<_> = window.iter().map(|r| (r.timestamp(), r.cumulative_loss_ml())).collect();

        Ok(Some(TrendStats {
            samples: window.len(),
            first_loss_ml: first.cumulative_loss_ml(),
            last_loss_ml: last.cumulative_loss_ml(),
            loss_delta_ml: last.cumulative_loss_ml() - first.cumulative_loss_ml(),
            mean_rate_ml_per_min: mean_rate,
            peak_rate_ml_per_min: peak_rate,
            regression_rate_ml_per_min: regression::estimate_rate(&points, now),
        }))
    }

    pub fn len(&self, subject: &SubjectId) -> HemoResult<usize> {
        let state = self.state.read().map_err(|_| lock_err("ledger.len"))?;
        Ok(state.get(subject).map_or(0, VecDeque::len))
    }

    /// Subjects with at least one retained reading.
    pub fn subjects(&self) -> HemoResult<Vec<SubjectId>> {
        let state = self.state.read().map_err(|_| lock_err("ledger.subjects"))?;
        let mut out: Vec<_> = state
            .iter()
            .filter(|(_, h)| !h.is_empty())
            .map(|(s, _)| s.clone())
            .collect();
        out.sort();
        Ok(out)
    }

    fn collect(
        &self,
        subject: &SubjectId,
        context: &'static str,
        keep: impl Fn(&Reading) -> bool,
    ) -> HemoResult<Vec<Reading>> {
        let state = self.state.read().map_err(|_| lock_err(context))?;
        Ok(state
            .get(subject)
            .map(|h| h.iter().filter(|r| keep(r)).cloned().collect())
            .unwrap_or_default())
    }
}

impl Default for SubjectLedger {
    fn default() -> Self {
        Self::new(StdDuration::from_secs(24 * 60 * 60))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn subject() -> SubjectId {
        SubjectId::new("p1").unwrap()
    }

    fn at(ts: DateTime<Utc>, loss: f64, rate: f64) -> Reading {
        Reading::new(subject(), ts, loss, rate).unwrap()
    }

    #[test]
    fn stale_reading_is_evicted_by_next_append() {
        let ledger = SubjectLedger::new(StdDuration::from_secs(3600));
        let now = Utc::now();

        // Backfilled reading older than the horizon.
        ledger.append_at(at(now - Duration::hours(2), 10.0, 0.0), now - Duration::hours(2)).unwrap();
        assert_eq!(ledger.len(&subject()).unwrap(), 1);

        let evicted = ledger.append_at(at(now, 20.0, 0.0), now).unwrap();
        assert_eq!(evicted, 1);

        let window = ledger.recent_window_at(&subject(), 3 * 3600, now).unwrap();
        assert_eq!(window.len(), 1);
        assert_eq!(window[0].cumulative_loss_ml(), 20.0);
    }

    #[test]
    fn append_accepts_out_of_order_timestamps() {
        let ledger = SubjectLedger::default();
        let now = Utc::now();
        ledger.append_at(at(now, 30.0, 0.0), now).unwrap();
        ledger.append_at(at(now - Duration::minutes(10), 10.0, 0.0), now).unwrap();

        let tail = ledger.tail(&subject(), 2).unwrap();
        assert_eq!(tail[0].cumulative_loss_ml(), 30.0);
        assert_eq!(tail[1].cumulative_loss_ml(), 10.0);
        assert_eq!(ledger.latest(&subject()).unwrap().unwrap().cumulative_loss_ml(), 10.0);

        let sorted = ledger.range(&subject(), &TimeRange::forever()).unwrap();
        assert_eq!(sorted[0].cumulative_loss_ml(), 10.0);
    }

    #[test]
    fn recent_window_is_inclusive_of_boundary() {
        let ledger = SubjectLedger::default();
        let now = Utc::now();
        ledger.append_at(at(now - Duration::seconds(300), 1.0, 0.0), now).unwrap();
        ledger.append_at(at(now - Duration::seconds(301), 2.0, 0.0), now).unwrap();

        let window = ledger.recent_window_at(&subject(), 300, now).unwrap();
        assert_eq!(window.len(), 1);
        assert_eq!(window[0].cumulative_loss_ml(), 1.0);
    }

    #[test]
    fn tail_of_unknown_subject_is_empty() {
        let ledger = SubjectLedger::default();
        assert!(ledger.tail(&subject(), 3).unwrap().is_empty());
        assert!(ledger.latest(&subject()).unwrap().is_none());
        assert!(ledger.trend(&subject(), 60).unwrap().is_none());
    }

    #[test]
    fn trend_summarizes_window() {
        let ledger = SubjectLedger::default();
        let now = Utc::now();
        for (i, loss) in [100.0, 110.0, 120.0, 130.0].iter().enumerate() {
            let ts = now - Duration::minutes(3 - i as i64);
            ledger.append_at(at(ts, *loss, 10.0 + i as f64), now).unwrap();
        }

        let stats = ledger.trend_at(&subject(), 600, now).unwrap().unwrap();
        assert_eq!(stats.samples, 4);
        assert_eq!(stats.loss_delta_ml, 30.0);
        assert_eq!(stats.peak_rate_ml_per_min, 13.0);
        assert!((stats.mean_rate_ml_per_min - 11.5).abs() < 1e-9);
        let slope = stats.regression_rate_ml_per_min.unwrap();
        assert!((slope - 10.0).abs() < 1e-6);
        assert_eq!(ledger.subjects().unwrap(), vec![subject()]);
    }
}
