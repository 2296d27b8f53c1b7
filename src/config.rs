//! Monitoring configuration.
//!
//! Every tunable has a default matching the clinical protocol. Values can be
//! overridden from JSON (`MonitorConfig::from_json_str`) or from `HEMODROP_*`
//! environment variables (`MonitorConfig::from_env`).

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::source::SourceMode;

/// Default cumulative-loss band ceilings (mL), inclusive.
pub const NORMAL_MAX_ML: f64 = 100.0;
pub const MINOR_MAX_ML: f64 = 250.0;
pub const MODERATE_MAX_ML: f64 = 500.0;
pub const MAJOR_MAX_ML: f64 = 1000.0;

/// Default bleeding-rate thresholds (mL/min), exclusive.
pub const EMERGENCY_RATE: f64 = 50.0;
pub const CRITICAL_RATE: f64 = 20.0;
pub const WARNING_RATE: f64 = 10.0;

/// Default trend escalation parameters.
pub const ESCALATION_HISTORY_POINTS: usize = 3;
pub const ESCALATION_NORMALIZATION_MINUTES: f64 = 15.0;
pub const ESCALATION_RATE_LIMIT: f64 = 15.0;

/// Inclusive upper bounds of each [`crate::SeverityLevel`] band.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SeverityThresholds {
    pub normal_max_ml: f64,
    pub minor_max_ml: f64,
    pub moderate_max_ml: f64,
    pub major_max_ml: f64,
}

impl Default for SeverityThresholds {
    fn default() -> Self {
        Self {
            normal_max_ml: NORMAL_MAX_ML,
            minor_max_ml: MINOR_MAX_ML,
            moderate_max_ml: MODERATE_MAX_ML,
            major_max_ml: MAJOR_MAX_ML,
        }
    }
}

impl SeverityThresholds {
    pub fn validate(&self) -> Result<(), ValidationError> {
        let bands = [
            self.normal_max_ml,
            self.minor_max_ml,
            self.moderate_max_ml,
            self.major_max_ml,
        ];
        if bands.iter().any(|v| !v.is_finite() || *v < 0.0) {
            return Err(invalid("severity thresholds must be finite and >= 0"));
        }
        if bands.windows(2).any(|w| w[0] >= w[1]) {
            return Err(invalid("severity thresholds must be strictly ascending"));
        }
        Ok(())
    }
}

/// Rate cut-offs used by rate assessment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateThresholds {
    pub emergency_ml_per_min: f64,
    pub critical_ml_per_min: f64,
    pub warning_ml_per_min: f64,
}

impl Default for RateThresholds {
    fn default() -> Self {
        Self {
            emergency_ml_per_min: EMERGENCY_RATE,
            critical_ml_per_min: CRITICAL_RATE,
            warning_ml_per_min: WARNING_RATE,
        }
    }
}

impl RateThresholds {
    pub fn validate(&self) -> Result<(), ValidationError> {
        let ok = self.warning_ml_per_min.is_finite()
            && self.warning_ml_per_min >= 0.0
            && self.warning_ml_per_min < self.critical_ml_per_min
            && self.critical_ml_per_min < self.emergency_ml_per_min
            && self.emergency_ml_per_min.is_finite();
        if ok {
            Ok(())
        } else {
            Err(invalid("rate thresholds must satisfy 0 <= warning < critical < emergency"))
        }
    }
}

/// Trend-based escalation heuristic.
///
/// The increase across the window is divided by a fixed number of minutes,
/// not by the elapsed time between the readings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EscalationPolicy {
    /// Historical readings required (and used) before the current one.
    pub history_points: usize,
    /// Fixed divisor applied to the loss increase.
    pub normalization_minutes: f64,
    /// Average mL/min above which the alert is forced to Emergency.
    pub rate_limit_ml_per_min: f64,
}

impl Default for EscalationPolicy {
    fn default() -> Self {
        Self {
            history_points: ESCALATION_HISTORY_POINTS,
            normalization_minutes: ESCALATION_NORMALIZATION_MINUTES,
            rate_limit_ml_per_min: ESCALATION_RATE_LIMIT,
        }
    }
}

impl EscalationPolicy {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.history_points == 0 {
            return Err(invalid("escalation history_points must be >= 1"));
        }
        if !self.normalization_minutes.is_finite() || self.normalization_minutes <= 0.0 {
            return Err(invalid("escalation normalization_minutes must be > 0"));
        }
        if !self.rate_limit_ml_per_min.is_finite() {
            return Err(invalid("escalation rate_limit_ml_per_min must be finite"));
        }
        Ok(())
    }
}

/// Sampling loop settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Delay between sampling cycles.
    pub sampling_interval_ms: u64,
    /// Delay before retrying after a cycle fault.
    pub fault_backoff_ms: u64,
    /// Upper bound on a single reading acquisition.
    pub source_timeout_ms: u64,
    /// Threads used to acquire readings.
    pub reader_workers: usize,
    /// Maximum queued acquisitions.
    pub reader_queue_capacity: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            sampling_interval_ms: 30_000,
            fault_backoff_ms: 5_000,
            source_timeout_ms: 2_000,
            reader_workers: 4,
            reader_queue_capacity: 256,
        }
    }
}

impl SchedulerConfig {
    #[must_use]
    pub const fn sampling_interval(&self) -> Duration {
        Duration::from_millis(self.sampling_interval_ms)
    }

    #[must_use]
    pub const fn fault_backoff(&self) -> Duration {
        Duration::from_millis(self.fault_backoff_ms)
    }

    #[must_use]
    pub const fn source_timeout(&self) -> Duration {
        Duration::from_millis(self.source_timeout_ms)
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.sampling_interval_ms == 0 {
            return Err(invalid("sampling_interval_ms must be > 0"));
        }
        if self.source_timeout_ms == 0 {
            return Err(invalid("source_timeout_ms must be > 0"));
        }
        Ok(())
    }
}

/// Top-level configuration for a monitoring engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub mode: SourceMode,
    /// Maximum age of readings kept per subject.
    pub retention_horizon_secs: u64,
    pub severity: SeverityThresholds,
    pub rates: RateThresholds,
    pub escalation: EscalationPolicy,
    pub scheduler: SchedulerConfig,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            mode: SourceMode::Simulation,
            retention_horizon_secs: 24 * 60 * 60,
            severity: SeverityThresholds::default(),
            rates: RateThresholds::default(),
            escalation: EscalationPolicy::default(),
            scheduler: SchedulerConfig::default(),
        }
    }
}

impl MonitorConfig {
    #[must_use]
    pub const fn retention_horizon(&self) -> Duration {
        Duration::from_secs(self.retention_horizon_secs)
    }

    /// Checks every section.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.retention_horizon_secs == 0 {
            return Err(invalid("retention_horizon_secs must be > 0"));
        }
        self.severity.validate()?;
        self.rates.validate()?;
        self.escalation.validate()?;
        self.scheduler.validate()?;
        Ok(())
    }

    /// Parses a (possibly partial) JSON document; missing fields keep their defaults.
    pub fn from_json_str(json: &str) -> Result<Self, ValidationError> {
        let cfg: Self = serde_json::from_str(json).map_err(|e| ValidationError::InvalidConfig {
            reason: format!("invalid config json: {e}"),
        })?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Load overrides from environment variables.
    ///
    /// Unparseable values are logged and ignored.
    pub fn from_env() -> Result<Self, ValidationError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub(crate) fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ValidationError> {
        let mut cfg = Self::default();

        if let Some(v) = lookup("SIMULATION_MODE") {
            cfg.mode = if v.trim().eq_ignore_ascii_case("true") {
                SourceMode::Simulation
            } else {
                SourceMode::Production
            };
        }

        override_from(&lookup, "HEMODROP_RETENTION_HORIZON_SECS", &mut cfg.retention_horizon_secs);
        override_from(&lookup, "HEMODROP_NORMAL_MAX_ML", &mut cfg.severity.normal_max_ml);
        override_from(&lookup, "HEMODROP_MINOR_MAX_ML", &mut cfg.severity.minor_max_ml);
        override_from(&lookup, "HEMODROP_MODERATE_MAX_ML", &mut cfg.severity.moderate_max_ml);
        override_from(&lookup, "HEMODROP_MAJOR_MAX_ML", &mut cfg.severity.major_max_ml);
        override_from(&lookup, "HEMODROP_EMERGENCY_RATE", &mut cfg.rates.emergency_ml_per_min);
        override_from(&lookup, "HEMODROP_CRITICAL_RATE", &mut cfg.rates.critical_ml_per_min);
        override_from(&lookup, "HEMODROP_WARNING_RATE", &mut cfg.rates.warning_ml_per_min);
        override_from(&lookup, "HEMODROP_ESCALATION_POINTS", &mut cfg.escalation.history_points);
        override_from(
            &lookup,
            "HEMODROP_ESCALATION_WINDOW_MINUTES",
            &mut cfg.escalation.normalization_minutes,
        );
        override_from(&lookup, "HEMODROP_ESCALATION_RATE", &mut cfg.escalation.rate_limit_ml_per_min);
        override_from(&lookup, "HEMODROP_SAMPLING_INTERVAL_MS", &mut cfg.scheduler.sampling_interval_ms);
        override_from(&lookup, "HEMODROP_FAULT_BACKOFF_MS", &mut cfg.scheduler.fault_backoff_ms);
        override_from(&lookup, "HEMODROP_SOURCE_TIMEOUT_MS", &mut cfg.scheduler.source_timeout_ms);
        override_from(&lookup, "HEMODROP_READER_WORKERS", &mut cfg.scheduler.reader_workers);

        cfg.validate()?;
        Ok(cfg)
    }
}

fn override_from<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, slot: &mut T)
where
    T: std::str::FromStr,
{
    let Some(raw) = lookup(key) else {
        return;
    };
    match raw.trim().parse::<T>() {
        Ok(v) => *slot = v,
        Err(_) => tracing::warn!(key, value = %raw, "ignoring unparseable config override"),
    }
}

fn invalid(reason: &str) -> ValidationError {
    ValidationError::InvalidConfig {
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    #[test]
    fn defaults_are_valid() {
        let cfg = MonitorConfig::default();
        cfg.validate().unwrap();
        assert_eq!(cfg.scheduler.sampling_interval(), Duration::from_secs(30));
        assert_eq!(cfg.scheduler.fault_backoff(), Duration::from_secs(5));
        assert_eq!(cfg.retention_horizon(), Duration::from_secs(86_400));
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let cfg = MonitorConfig::from_json_str(
            r#"{ "severity": { "normal_max_ml": 80.0 }, "scheduler": { "sampling_interval_ms": 1000 } }"#,
        )
        .unwrap();
        assert_eq!(cfg.severity.normal_max_ml, 80.0);
        assert_eq!(cfg.severity.minor_max_ml, MINOR_MAX_ML);
        assert_eq!(cfg.scheduler.sampling_interval_ms, 1000);
        assert_eq!(cfg.scheduler.fault_backoff_ms, 5_000);
    }

    #[test]
    fn non_ascending_thresholds_rejected() {
        let err = MonitorConfig::from_json_str(r#"{ "severity": { "minor_max_ml": 90.0 } }"#).unwrap_err();
        assert!(matches!(err, ValidationError::InvalidConfig { .. }));
    }

    #[test]
    fn env_overrides_apply_and_bad_values_are_ignored() {
        let vars: HashMap<&str, &str> = [
            ("SIMULATION_MODE", "false"),
            ("HEMODROP_SAMPLING_INTERVAL_MS", "250"),
            ("HEMODROP_ESCALATION_RATE", "not-a-number"),
        ]
        .into_iter()
        .collect();

        let cfg = MonitorConfig::from_lookup(|k| vars.get(k).map(|v| (*v).to_string())).unwrap();
        assert_eq!(cfg.mode, SourceMode::Production);
        assert_eq!(cfg.scheduler.sampling_interval_ms, 250);
        assert_eq!(cfg.escalation.rate_limit_ml_per_min, ESCALATION_RATE_LIMIT);
    }

    #[test]
    fn zero_interval_rejected() {
        let cfg = MonitorConfig {
            scheduler: SchedulerConfig {
                sampling_interval_ms: 0,
                ..SchedulerConfig::default()
            },
            ..MonitorConfig::default()
        };
        assert!(cfg.validate().is_err());
    }
}
