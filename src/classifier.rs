//! Severity classification and alert decisions.
//!
//! Everything here is deterministic given the configured thresholds, except
//! alert id issuance which draws from the instance's [`AlertIdGenerator`].

use crate::alert::{Alert, AlertIdGenerator};
use crate::config::{EscalationPolicy, MonitorConfig, RateThresholds, SeverityThresholds};
use crate::error::ValidationError;
use crate::reading::Reading;
use crate::severity::{AlertSeverity, SeverityLevel};

/// Outcome of evaluating one reading against its history.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AlertDecision {
    /// Cumulative-loss classification.
    pub level: SeverityLevel,
    /// Urgency from the instantaneous rate alone.
    pub base_severity: AlertSeverity,
    /// Effective urgency after trend escalation.
    pub severity: AlertSeverity,
    /// True when the trend heuristic overrode the rate assessment.
    pub escalated: bool,
}

impl AlertDecision {
    /// Whether this decision produces an alert.
    #[must_use]
    pub const fn raises_alert(&self) -> bool {
        !matches!(self.level, SeverityLevel::Normal) || self.severity.is_urgent()
    }
}

/// Threshold-based classifier with trend escalation.
#[derive(Debug, Default)]
pub struct Classifier {
    severity: SeverityThresholds,
    rates: RateThresholds,
    escalation: EscalationPolicy,
    ids: AlertIdGenerator,
}

impl Classifier {
    /// # Errors
    ///
    /// `InvalidConfig` when any of the threshold groups fails validation.
    pub fn new(
        severity: SeverityThresholds,
        rates: RateThresholds,
        escalation: EscalationPolicy,
    ) -> Result<Self, ValidationError> {
        severity.validate()?;
        rates.validate()?;
        escalation.validate()?;
        Ok(Self::from_parts(severity, rates, escalation))
    }

    /// # Errors
    ///
    /// `InvalidConfig` when the configured thresholds are inconsistent.
    pub fn from_config(config: &MonitorConfig) -> Result<Self, ValidationError> {
        Self::new(
            config.severity.clone(),
            config.rates.clone(),
            config.escalation.clone(),
        )
    }

    fn from_parts(severity: SeverityThresholds, rates: RateThresholds, escalation: EscalationPolicy) -> Self {
        Self {
            severity,
            rates,
            escalation,
            ids: AlertIdGenerator::new(),
        }
    }

    #[must_use]
    pub const fn escalation_policy(&self) -> &EscalationPolicy {
        &self.escalation
    }

    /// Maps cumulative loss to a level. Band ceilings are inclusive.
    #[must_use]
    pub fn classify_severity(&self, cumulative_loss_ml: f64) -> SeverityLevel {
        let t = &self.severity;
        if cumulative_loss_ml <= t.normal_max_ml {
            SeverityLevel::Normal
        } else if cumulative_loss_ml <= t.minor_max_ml {
            SeverityLevel::Minor
        } else if cumulative_loss_ml <= t.moderate_max_ml {
            SeverityLevel::Moderate
        } else if cumulative_loss_ml <= t.major_max_ml {
            SeverityLevel::Major
        } else {
            SeverityLevel::Critical
        }
    }

    /// Urgency implied by the current bleeding rate.
    #[must_use]
    pub fn assess_rate(&self, rate_ml_per_min: f64, level: SeverityLevel) -> AlertSeverity {
        let r = &self.rates;
        if rate_ml_per_min > r.emergency_ml_per_min {
            AlertSeverity::Emergency
        } else if rate_ml_per_min > r.critical_ml_per_min
            && matches!(level, SeverityLevel::Moderate | SeverityLevel::Major)
        {
            AlertSeverity::Critical
        } else if rate_ml_per_min > r.warning_ml_per_min {
            AlertSeverity::Warning
        } else {
            AlertSeverity::Info
        }
    }

    /// Trend override: forces `Emergency` when loss climbs too fast across the window.
    ///
    /// The window is the last `history_points` readings plus `current`. The
    /// increase is divided by `normalization_minutes` regardless of how much time
    /// actually elapsed between the readings.
    #[must_use]
    pub fn detect_escalation(&self, history: &[Reading], current: &Reading) -> Option<AlertSeverity> {
        let points = self.escalation.history_points;
        if points == 0 || history.len() < points {
            return None;
        }
        let window_start = &history[history.len() - points];
        let rate_of_increase = (current.cumulative_loss_ml() - window_start.cumulative_loss_ml())
            / self.escalation.normalization_minutes;

        (rate_of_increase > self.escalation.rate_limit_ml_per_min).then_some(AlertSeverity::Emergency)
    }

    /// Full decision for `reading` given the subject's history before it.
    #[must_use]
    pub fn evaluate(&self, reading: &Reading, history: &[Reading]) -> AlertDecision {
        let level = self.classify_severity(reading.cumulative_loss_ml());
        let base_severity = self.assess_rate(reading.rate_ml_per_min(), level);
        let (severity, escalated) = match self.detect_escalation(history, reading) {
            Some(overridden) => (overridden, overridden != base_severity),
            None => (base_severity, false),
        };
        AlertDecision {
            level,
            base_severity,
            severity,
            escalated,
        }
    }

    /// Builds an alert when the reading warrants one.
    ///
    /// The message depends only on the level; escalation changes urgency, not text.
    pub fn should_alert(&self, reading: &Reading, history: &[Reading]) -> Option<Alert> {
        let decision = self.evaluate(reading, history);
        self.alert_for(reading, &decision)
    }

    pub(crate) fn alert_for(&self, reading: &Reading, decision: &AlertDecision) -> Option<Alert> {
        if !decision.raises_alert() {
            return None;
        }
        let now = chrono::Utc::now();
        Some(Alert {
            alert_id: self.ids.next(reading.subject_id(), now),
            subject_id: reading.subject_id().clone(),
            alert_severity: decision.severity,
            message: decision.level.alert_message().to_string(),
            severity_level_at_trigger: decision.level,
            triggering_loss_ml: reading.cumulative_loss_ml(),
            timestamp: now,
            acknowledged: false,
        })
    }
}
